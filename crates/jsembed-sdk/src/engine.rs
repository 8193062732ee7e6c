//! The Engine trait
//!
//! This trait abstracts a JavaScript engine so the host bridge can be
//! compiled against the contract alone. A backend implements every method
//! in terms of its own isolate, context and persistent-handle machinery.
//!
//! Calls are made by the host while it holds the isolate's entry lock, with
//! the exception of [`Engine::terminate`], which may arrive from any thread
//! while script is running.

use std::ptr::NonNull;
use std::sync::Arc;

use crate::bridge::{FunctionTarget, HostBridge};
use crate::error::EngineResult;
use crate::handle::{ContextHandle, IsolateHandle, RawHandle, TemplateHandle};
use crate::ids::{ContextId, MethodId, ObjectId};
use crate::options::IsolateOptions;

// ============================================================================
// Supporting types
// ============================================================================

/// Primitive values the engine creates directly
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive<'a> {
    /// Signed integer (stored as an engine number)
    Int(i64),
    /// Unsigned integer (stored as an engine number)
    Uint(u64),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// Boolean
    Bool(bool),
    /// String
    String(&'a str),
    /// `null`
    Null,
    /// `undefined`
    Undefined,
}

/// Object kinds the host can test a value against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// `ArrayBuffer`
    ArrayBuffer,
    /// `DataView`
    DataView,
    /// `Date`
    Date,
    /// `Map`
    Map,
    /// Map iterator
    MapIterator,
    /// `Promise`
    Promise,
    /// `RegExp`
    RegExp,
    /// `Set`
    Set,
    /// Set iterator
    SetIterator,
    /// Any typed array view
    TypedArray,
    /// Callable
    Function,
    /// `Array`
    Array,
}

/// Where a script came from, for error messages and caller locations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptOrigin<'a> {
    /// Script name ("" when anonymous)
    pub filename: &'a str,
    /// Line offset of the first line (0-based)
    pub line: u32,
    /// Column offset of the first line (0-based)
    pub column: u32,
}

impl<'a> ScriptOrigin<'a> {
    /// Origin at the start of `filename`
    pub fn new(filename: &'a str) -> Self {
        Self {
            filename,
            line: 0,
            column: 0,
        }
    }

    /// Origin at an offset inside `filename`
    pub fn at(filename: &'a str, line: u32, column: u32) -> Self {
        Self { filename, line, column }
    }
}

/// Backing store of a byte view, owned by the engine.
///
/// Valid while the handle it was obtained from is alive and the engine is not
/// running script that could detach or resize it.
#[derive(Debug, Clone, Copy)]
pub struct BackingStore {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the store is only a pointer and a length; access goes through the
// unsafe `as_slice`, whose caller upholds the lifetime contract.
unsafe impl Send for BackingStore {}
unsafe impl Sync for BackingStore {}

impl BackingStore {
    /// Describe an engine-owned byte range
    ///
    /// # Safety
    /// `ptr` must be valid for reads of `len` bytes for as long as the store
    /// is used.
    pub unsafe fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// An empty store
    pub fn empty() -> Self {
        Self {
            ptr: NonNull::dangling(),
            len: 0,
        }
    }

    /// Number of bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length store
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View the bytes
    ///
    /// # Safety
    /// The caller picks `'a` and must not let it outlive the engine value the
    /// store was read from.
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        std::slice::from_raw_parts(self.ptr.as_ptr(), self.len)
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Engine service used by the host bridge.
///
/// Handles passed in are always handles this engine minted for the same
/// context. Every `RawHandle` returned is a new persistent handle owned by
/// the host.
pub trait Engine: Send + Sync {
    // ===== Isolates =====

    /// Create an isolate
    fn create_isolate(&self, options: &IsolateOptions) -> EngineResult<IsolateHandle>;

    /// Release an isolate with no remaining contexts
    fn release_isolate(&self, isolate: IsolateHandle);

    /// Stop whatever script is running in the isolate. No-op when idle.
    ///
    /// Callable from any thread, concurrently with execution.
    fn terminate(&self, isolate: IsolateHandle);

    /// Run queued background tasks. Returns true if a task ran.
    fn pump_message_loop(&self, isolate: IsolateHandle) -> bool;

    // ===== Contexts =====

    /// Create a context that calls back through `bridge`
    fn create_context(
        &self,
        isolate: IsolateHandle,
        id: ContextId,
        bridge: Arc<dyn HostBridge>,
    ) -> EngineResult<ContextHandle>;

    /// Release a context
    fn release_context(&self, context: ContextHandle);

    /// The context's global object
    fn global(&self, context: ContextHandle) -> EngineResult<RawHandle>;

    // ===== Execution =====

    /// Run a script and return its result as JSON text.
    ///
    /// `None` when the result has no JSON form (undefined, functions).
    fn execute(&self, context: ContextHandle, source: &str, origin: ScriptOrigin<'_>) -> EngineResult<Option<String>>;

    /// Run a script and return a handle to its result
    fn eval(&self, context: ContextHandle, source: &str, origin: ScriptOrigin<'_>) -> EngineResult<RawHandle>;

    /// Compile and evaluate a module, returning its completion value
    fn compile_module(&self, context: ContextHandle, source: &str, origin: ScriptOrigin<'_>) -> EngineResult<RawHandle>;

    /// Call `function` with `this` (global object when `None`) and `args`
    fn apply(
        &self,
        context: ContextHandle,
        function: RawHandle,
        this: Option<RawHandle>,
        args: &[RawHandle],
    ) -> EngineResult<RawHandle>;

    /// Schedule an exception carrying `message` in the running script
    fn throw(&self, context: ContextHandle, message: &str);

    // ===== Handles =====

    /// Free a persistent handle. Unknown or already collected handles are ignored.
    fn release(&self, context: ContextHandle, handle: RawHandle);

    /// Turn a persistent handle into one the garbage collector may clear
    fn weaken(&self, context: ContextHandle, handle: RawHandle);

    // ===== Values =====

    /// Create a primitive
    fn create_primitive(&self, context: ContextHandle, value: Primitive<'_>) -> EngineResult<RawHandle>;

    /// Create an array holding `items`
    fn create_array(&self, context: ContextHandle, items: &[RawHandle]) -> EngineResult<RawHandle>;

    /// Parse JSON text into a new value
    fn from_json(&self, context: ContextHandle, json: &str) -> EngineResult<RawHandle>;

    /// Render a value as JSON text
    fn to_json(&self, context: ContextHandle, handle: RawHandle) -> EngineResult<String>;

    /// Own enumerable properties of an object
    fn burst(&self, context: ContextHandle, handle: RawHandle) -> EngineResult<Vec<(String, RawHandle)>>;

    /// Assign a property on an object
    fn set_field(&self, context: ContextHandle, object: RawHandle, field: &str, value: RawHandle) -> EngineResult<()>;

    /// Short type name for diagnostics ("number", "object", ...)
    fn type_name(&self, context: ContextHandle, handle: RawHandle) -> &'static str;

    /// Test a value against an object kind
    fn is_kind(&self, context: ContextHandle, handle: RawHandle, kind: ValueKind) -> bool;

    /// The value as an `i32`, if it is one
    fn to_int32(&self, context: ContextHandle, handle: RawHandle) -> Option<i32>;

    /// The integer part of a number
    fn to_int64(&self, context: ContextHandle, handle: RawHandle) -> Option<i64>;

    /// The value as a `u32`, if it is one
    fn to_uint32(&self, context: ContextHandle, handle: RawHandle) -> Option<u32>;

    /// The value as a number
    fn to_number(&self, context: ContextHandle, handle: RawHandle) -> Option<f64>;

    /// The value as a boolean, if it is one
    fn to_boolean(&self, context: ContextHandle, handle: RawHandle) -> Option<bool>;

    /// Backing bytes of a `Uint8Array`
    fn backing_store(&self, context: ContextHandle, handle: RawHandle) -> Option<BackingStore>;

    // ===== Host functions and templates =====

    /// Create a function that dispatches `target` through the context's bridge
    fn create_function(&self, context: ContextHandle, target: FunctionTarget) -> EngineResult<RawHandle>;

    /// Create an object template with named-property interception
    fn create_object_template(&self, context: ContextHandle) -> EngineResult<TemplateHandle>;

    /// Create a class template whose constructor dispatches to the host
    fn create_class_template(&self, context: ContextHandle, name: &str) -> EngineResult<TemplateHandle>;

    /// Install a method dispatching `method` on the template's instances
    fn add_method(&self, context: ContextHandle, template: TemplateHandle, name: &str, method: MethodId) -> EngineResult<()>;

    /// The constructor function of a class template
    fn class_constructor(&self, context: ContextHandle, template: TemplateHandle) -> EngineResult<RawHandle>;

    /// Create an instance of `template` tagged with `object`.
    ///
    /// The returned handle is weak; the engine calls [`HostBridge::dispose`]
    /// when it collects the instance.
    fn instantiate(&self, context: ContextHandle, template: TemplateHandle, object: ObjectId) -> EngineResult<RawHandle>;

    /// Tag an existing object with `object`; same handle contract as `instantiate`
    fn wrap_instance(&self, context: ContextHandle, instance: RawHandle, object: ObjectId) -> EngineResult<RawHandle>;

    /// The object id an instance was tagged with
    fn object_id(&self, context: ContextHandle, handle: RawHandle) -> Option<ObjectId>;
}
