//! Engine → host callback protocol
//!
//! The engine enters host code through a [`HostBridge`] it receives when a
//! context is created. Every host-implemented function, method, constructor,
//! property interceptor and finalizer is reached through it, identified only
//! by integers and names.

use crate::handle::RawHandle;
use crate::ids::{ContextId, MethodId, ObjectId};

// ============================================================================
// Caller location
// ============================================================================

/// Location of the script frame that invoked a host callback.
///
/// Empty when the callback was invoked directly from the host (through
/// `apply`) rather than from script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Loc {
    /// Name of the calling script function ("" for top-level code)
    pub funcname: String,
    /// Script name the caller was compiled from
    pub filename: String,
    /// 1-based line number (0 when unknown)
    pub line: u32,
    /// 1-based column number (0 when unknown)
    pub column: u32,
}

impl Loc {
    /// Create a location
    pub fn new(funcname: impl Into<String>, filename: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            funcname: funcname.into(),
            filename: filename.into(),
            line,
            column,
        }
    }

    /// True when no script frame was recorded
    pub fn is_empty(&self) -> bool {
        self.funcname.is_empty() && self.filename.is_empty() && self.line == 0 && self.column == 0
    }
}

// ============================================================================
// Call shapes
// ============================================================================

/// What a host-created engine function dispatches to when called
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionTarget {
    /// Arguments and result cross as JSON text
    Json {
        /// Owning context
        context: ContextId,
        /// Registered function name
        name: String,
    },
    /// Arguments and result cross as engine handles
    Raw {
        /// Owning context
        context: ContextId,
        /// Registered function name
        name: String,
    },
}

/// One engine → host call.
///
/// Argument handles are persistent handles minted for the host; ownership of
/// them passes to the host with the call.
#[derive(Debug)]
pub enum HostCall<'a> {
    /// Call of a JSON function
    Json {
        /// Owning context
        context: ContextId,
        /// Registered function name
        name: &'a str,
        /// JSON array of the call arguments
        args: &'a str,
    },
    /// Call of a raw function
    Raw {
        /// Owning context
        context: ContextId,
        /// Registered function name
        name: &'a str,
        /// Script frame of the caller
        from: Loc,
        /// Call arguments
        args: &'a [RawHandle],
    },
    /// Method call on a wrapped object
    Method {
        /// Receiver's object id
        object: ObjectId,
        /// Hashed method name
        method: MethodId,
        /// Script frame of the caller
        from: Loc,
        /// Call arguments
        args: &'a [RawHandle],
    },
    /// `new` on a class prototype's constructor
    Construct {
        /// Owning context
        context: ContextId,
        /// Prototype name
        prototype: &'a str,
        /// Script frame of the caller
        from: Loc,
        /// The freshly allocated instance (`this`)
        this: RawHandle,
        /// Call arguments
        args: &'a [RawHandle],
    },
}

impl HostCall<'_> {
    /// Short description used in diagnostics
    pub fn describe(&self) -> String {
        match self {
            HostCall::Json { context, name, .. } => format!("json function '{}' in {}", name, context),
            HostCall::Raw { context, name, .. } => format!("raw function '{}' in {}", name, context),
            HostCall::Method { object, method, .. } => format!("method {} on {}", method, object),
            HostCall::Construct {
                context, prototype, ..
            } => format!("constructor of '{}' in {}", prototype, context),
        }
    }
}

/// Result of a host call.
///
/// When the host threw (via [`crate::Engine::throw`]) it returns `Undefined`;
/// the engine must check its pending exception before using the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostReturn {
    /// No value
    Undefined,
    /// JSON text of the result (JSON calls only)
    Json(String),
    /// Handle to the result; the host keeps ownership
    Handle(RawHandle),
}

/// Host entry points the engine calls back through.
///
/// The engine invokes these while script is running, on the thread that is
/// currently inside the isolate.
pub trait HostBridge: Send + Sync {
    /// Invoke a host function, method or constructor
    fn dispatch(&self, call: HostCall<'_>) -> HostReturn;

    /// Named-property interception on a wrapped object.
    ///
    /// `None` means the host does not handle the property and the engine
    /// should fall back to ordinary lookup.
    fn property_get(&self, object: ObjectId, property: &str) -> Option<RawHandle>;

    /// The engine collected the instance tagged with `object`
    fn dispose(&self, object: ObjectId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loc_default_is_empty() {
        assert!(Loc::default().is_empty());
        assert!(!Loc::new("main", "app.js", 3, 7).is_empty());
    }

    #[test]
    fn test_host_call_describe() {
        let call = HostCall::Raw {
            context: ContextId::from_u64(2),
            name: "double",
            from: Loc::default(),
            args: &[],
        };
        assert_eq!(call.describe(), "raw function 'double' in ctx#2");

        let call = HostCall::Construct {
            context: ContextId::from_u64(1),
            prototype: "Point",
            from: Loc::default(),
            this: RawHandle::from_raw(1),
            args: &[],
        };
        assert_eq!(call.describe(), "constructor of 'Point' in ctx#1");
    }
}
