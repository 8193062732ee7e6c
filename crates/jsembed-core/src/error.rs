//! Error types for the host bridge

use jsembed_sdk::{EngineError, MethodId};

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors returned by context, value and prototype operations
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The context was already destroyed
    #[error("Context is uninitialized.")]
    UninitializedContext,

    /// The value was already released or weakened
    #[error("Value has been already released.")]
    AlreadyReleased,

    /// The value belongs to the engine's garbage collector
    #[error("Value is weak and owned by the engine.")]
    WeakValue,

    /// Script compilation or execution failed
    #[error("Failed to execute JS ({origin}): {message}")]
    Execution {
        /// Script name or operation that failed
        origin: String,
        /// Engine message
        message: String,
    },

    /// Template creation failed
    #[error("Failed to create prototype ({name}): {message}")]
    Prototype {
        /// Prototype name
        name: String,
        /// Engine message
        message: String,
    },

    /// Instance creation or wrapping failed
    #[error("Failed to wrap object: {0}")]
    Wrap(String),

    /// `get` on a field the object does not have
    #[error("field '{0}' is undefined")]
    UndefinedField(String),

    /// Two method names hash to the same id on one prototype
    #[error("method '{name}' collides with '{existing}' on prototype '{prototype}' (id {id})")]
    MethodCollision {
        /// Prototype name
        prototype: String,
        /// Name being added
        name: String,
        /// Name already registered under the id
        existing: String,
        /// Shared hash
        id: MethodId,
    },

    /// Engine-level failure outside script execution
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Host/engine value conversion failed
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

impl BridgeError {
    pub(crate) fn execution(origin: impl Into<String>, err: EngineError) -> Self {
        BridgeError::Execution {
            origin: origin.into(),
            message: err.into_message(),
        }
    }
}

/// Host/engine value conversion errors
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// The engine value is not of the requested type
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected type name
        expected: &'static str,
        /// Actual type name
        got: &'static str,
    },

    /// JSON encoding or decoding failed
    #[error("JSON conversion failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Conversion(ConversionError::Json(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(BridgeError::UninitializedContext.to_string(), "Context is uninitialized.");
        assert_eq!(BridgeError::AlreadyReleased.to_string(), "Value has been already released.");
        assert_eq!(
            BridgeError::UndefinedField("missing".into()).to_string(),
            "field 'missing' is undefined"
        );
    }

    #[test]
    fn test_execution_error_format() {
        let err = BridgeError::execution("main.js", EngineError::new("SyntaxError: Unexpected token"));
        assert_eq!(err.to_string(), "Failed to execute JS (main.js): SyntaxError: Unexpected token");
    }

    #[test]
    fn test_conversion_error_wraps() {
        let err: BridgeError = ConversionError::TypeMismatch {
            expected: "int64",
            got: "string",
        }
        .into();
        assert_eq!(err.to_string(), "Type mismatch: expected int64, got string");
    }
}
