//! Error type reported by engine backends

/// Result type for engine service calls
pub type EngineResult<T> = Result<T, EngineError>;

/// Failure reported by the engine.
///
/// The message is the engine's own rendering of the problem (an uncaught
/// exception, a syntax error, a termination notice).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    /// Create an error carrying an engine message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The engine message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Consume the error, returning its message
    pub fn into_message(self) -> String {
        self.message
    }
}

impl From<String> for EngineError {
    fn from(message: String) -> Self {
        EngineError { message }
    }
}

impl From<&str> for EngineError {
    fn from(message: &str) -> Self {
        EngineError::new(message)
    }
}
