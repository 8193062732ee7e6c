//! Execution contexts
//!
//! Each [`Context`] represents one engine context with:
//! - a process-unique id the engine uses to call back into it
//! - JSON and raw host function tables
//! - a prototype table (get-or-create by name)
//! - the live set of every [`Value`] it handed out
//!
//! Teardown order is fixed: wrapped objects are disposed, live values
//! released, tables cleared and the context unregistered, and only then is
//! the engine context released.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use jsembed_sdk::{
    ContextHandle, ContextId, Engine, FunctionTarget, Loc, Primitive, RawHandle, ScriptOrigin,
};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde_json::Value as JsonValue;

use crate::convert::ToJs;
use crate::dispatch::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::function::{CallbackResult, CallbackTable, Constructor, Function, RawFunction};
use crate::isolate::{Isolate, IsolateInner};
use crate::options::ContextOptions;
use crate::pin::EntryGuard;
use crate::prototype::Prototype;
use crate::registry;
use crate::value::Value;

static NEXT_RAW_FUNC: AtomicU64 = AtomicU64::new(1);

pub(crate) struct ContextInner {
    id: ContextId,
    isolate: Isolate,
    engine: Arc<dyn Engine>,
    handle: RwLock<Option<ContextHandle>>,
    destroyed: AtomicBool,
    pub(crate) options: ContextOptions,
    functions: RwLock<CallbackTable<Function>>,
    raw_functions: RwLock<CallbackTable<RawFunction>>,
    prototypes: Mutex<FxHashMap<String, Arc<OnceCell<Prototype>>>>,
    values: Mutex<FxHashMap<u64, Value>>,
}

impl ContextInner {
    pub(crate) fn id(&self) -> ContextId {
        self.id
    }

    pub(crate) fn engine(&self) -> &dyn Engine {
        &*self.engine
    }

    pub(crate) fn isolate(&self) -> &Arc<IsolateInner> {
        self.isolate.inner()
    }

    /// Engine context handle, `None` once destroyed
    pub(crate) fn handle(&self) -> Option<ContextHandle> {
        *self.handle.read()
    }

    pub(crate) fn is_live(&self) -> bool {
        self.handle.read().is_some()
    }

    /// Engine context handle; using a destroyed context is a contract violation
    pub(crate) fn live_handle(&self) -> ContextHandle {
        match self.handle() {
            Some(handle) => handle,
            None => panic!("Context is uninitialized."),
        }
    }

    pub(crate) fn enter(&self) -> EntryGuard<'_> {
        self.isolate.inner().enter()
    }

    /// Wrap an engine handle as a tracked value of this context
    pub(crate) fn new_value(self: &Arc<Self>, handle: RawHandle) -> Value {
        let value = Value::bind(self, handle);
        self.values.lock().insert(value.key(), value.clone());
        value
    }

    pub(crate) fn forget_value(&self, key: u64) {
        self.values.lock().remove(&key);
    }

    pub(crate) fn release_handle(&self, handle: RawHandle) {
        if let Some(engine_ctx) = self.handle() {
            let _entry = self.enter();
            self.engine.release(engine_ctx, handle);
        }
    }

    /// Schedule an exception in the running script
    pub(crate) fn throw(&self, message: &str) {
        if let Some(engine_ctx) = self.handle() {
            let _entry = self.enter();
            self.engine.throw(engine_ctx, message);
        }
    }

    pub(crate) fn function(&self, name: &str) -> Option<Function> {
        self.functions.read().get(name)
    }

    pub(crate) fn raw_function(&self, name: &str) -> Option<RawFunction> {
        self.raw_functions.read().get(name)
    }

    pub(crate) fn prototype(&self, name: &str) -> Option<Prototype> {
        let cell = self.prototypes.lock().get(name).cloned()?;
        cell.get().cloned()
    }

    fn value_count(&self) -> usize {
        self.values.lock().len()
    }

    fn clear_values(&self) {
        let values: Vec<Value> = std::mem::take(&mut *self.values.lock()).into_values().collect();
        let Some(engine_ctx) = self.handle() else {
            return;
        };
        let _entry = self.enter();
        for value in &values {
            value.discard(self, engine_ctx);
        }
    }

    /// Claim the context for teardown; false if it was already claimed
    fn claim_teardown(&self) -> bool {
        !self.destroyed.swap(true, Ordering::SeqCst)
    }

    fn teardown(&self) {
        let disposed = registry::objects().dispose_context(self);
        self.clear_values();
        self.functions.write().clear();
        self.raw_functions.write().clear();
        self.prototypes.lock().clear();
        registry::contexts().remove(self.id);

        let handle = self.handle.write().take();
        if let Some(handle) = handle {
            let _entry = self.enter();
            self.engine.release_context(handle);
        }
        tracing::debug!(context = %self.id, disposed, "context destroyed");
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if self.claim_teardown() {
            self.teardown();
        }
    }
}

/// A JavaScript execution context
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Create a context with default options
    pub fn new(isolate: &Isolate) -> BridgeResult<Self> {
        Self::with_options(isolate, ContextOptions::default())
    }

    /// Create a context
    pub fn with_options(isolate: &Isolate, options: ContextOptions) -> BridgeResult<Self> {
        let table = registry::contexts();
        let id = table.reserve_id();
        let engine = isolate.inner().engine_arc();
        let handle = {
            let _entry = isolate.inner().enter();
            engine.create_context(isolate.handle(), id, Arc::new(Bridge))?
        };
        let inner = Arc::new(ContextInner {
            id,
            isolate: isolate.clone(),
            engine,
            handle: RwLock::new(Some(handle)),
            destroyed: AtomicBool::new(false),
            options,
            functions: RwLock::new(CallbackTable::new()),
            raw_functions: RwLock::new(CallbackTable::new()),
            prototypes: Mutex::new(FxHashMap::default()),
            values: Mutex::new(FxHashMap::default()),
        });
        table.register(&inner);
        tracing::debug!(context = %id, isolate = ?isolate.handle(), "context created");
        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    /// Process-unique id of this context
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// The isolate this context lives in
    pub fn isolate(&self) -> &Isolate {
        &self.inner.isolate
    }

    /// True after [`Context::destroy`]
    pub fn is_destroyed(&self) -> bool {
        !self.inner.is_live()
    }

    /// Tear the context down.
    ///
    /// Disposes every wrapped object it owns, releases every live value and
    /// then the engine context. A second call fails with
    /// [`BridgeError::UninitializedContext`].
    pub fn destroy(&self) -> BridgeResult<()> {
        if !self.inner.claim_teardown() {
            return Err(BridgeError::UninitializedContext);
        }
        self.inner.teardown();
        Ok(())
    }

    /// Stop the script running in this context's isolate
    pub fn terminate(&self) {
        self.inner.isolate.terminate();
    }

    /// Let the engine run queued background tasks
    pub fn pump_message_loop(&self) -> bool {
        self.inner.isolate.pump_message_loop()
    }

    /// Number of values currently tracked by this context
    pub fn count_values(&self) -> usize {
        self.inner.value_count()
    }

    /// Release every tracked value
    pub fn clear_values(&self) {
        self.inner.clear_values();
    }

    // ===== Execution =====

    /// Run `js` and return its result decoded from JSON.
    ///
    /// `None` when the result has no JSON form (undefined, functions).
    pub fn eval(&self, js: &str, filename: &str) -> BridgeResult<Option<JsonValue>> {
        let out = {
            let engine_ctx = self.inner.live_handle();
            let _entry = self.inner.enter();
            self.inner
                .engine
                .execute(engine_ctx, js, ScriptOrigin::new(filename))
                .map_err(|err| BridgeError::execution(origin_name(filename), err))?
        };
        match out {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Run `js` and return a handle to its result
    pub fn eval_raw(&self, js: &str, filename: &str) -> BridgeResult<Value> {
        self.eval_raw_at(js, filename, 0, 0)
    }

    /// Run `js` as if it started at `line`/`column` of `filename`
    pub fn eval_raw_at(&self, js: &str, filename: &str, line: u32, column: u32) -> BridgeResult<Value> {
        let handle = {
            let engine_ctx = self.inner.live_handle();
            let _entry = self.inner.enter();
            self.inner
                .engine
                .eval(engine_ctx, js, ScriptOrigin::at(filename, line, column))
                .map_err(|err| BridgeError::execution(origin_name(filename), err))?
        };
        Ok(self.inner.new_value(handle))
    }

    /// Evaluate the expression `js` and return a handle to it
    pub fn create_js(&self, js: &str, filename: &str) -> BridgeResult<Value> {
        self.eval_raw(&format!("(function() {{ return {}; }})()", js), filename)
    }

    /// Compile and evaluate a module
    pub fn compile_module(&self, js: &str, filename: &str) -> BridgeResult<Value> {
        let handle = {
            let engine_ctx = self.inner.live_handle();
            let _entry = self.inner.enter();
            self.inner
                .engine
                .compile_module(engine_ctx, js, ScriptOrigin::new(filename))
                .map_err(|err| BridgeError::execution(origin_name(filename), err))?
        };
        Ok(self.inner.new_value(handle))
    }

    /// Call the global function `funcname` with JSON arguments
    pub fn run(&self, funcname: &str, args: &[JsonValue]) -> BridgeResult<Option<JsonValue>> {
        let args: Vec<String> = args.iter().map(JsonValue::to_string).collect();
        let js = format!("{}({})", funcname, args.join(","));
        self.eval(&js, &format!("[RUN:{}]", funcname))
    }

    /// Call `function` with `this` (the global object when `None`)
    pub fn apply(&self, function: &Value, this: Option<&Value>, args: &[Value]) -> BridgeResult<Value> {
        let function = function.handle_in(&self.inner);
        let this = this.map(|this| this.handle_in(&self.inner));
        let args: Vec<RawHandle> = args.iter().map(|arg| arg.handle_in(&self.inner)).collect();
        let handle = {
            let engine_ctx = self.inner.live_handle();
            let _entry = self.inner.enter();
            self.inner
                .engine
                .apply(engine_ctx, function, this, &args)
                .map_err(|err| BridgeError::execution("apply", err))?
        };
        Ok(self.inner.new_value(handle))
    }

    // ===== Host functions =====

    /// Expose a JSON function as the global `name`
    pub fn add_func(
        &self,
        name: &str,
        function: impl Fn(&[JsonValue]) -> Option<JsonValue> + Send + Sync + 'static,
    ) -> BridgeResult<()> {
        self.install_global(
            name,
            FunctionTarget::Json {
                context: self.inner.id,
                name: name.to_string(),
            },
        )?;
        self.inner.functions.write().register(name, Arc::new(function));
        Ok(())
    }

    /// Expose a raw function as the global `name`
    pub fn add_raw_func(
        &self,
        name: &str,
        function: impl Fn(&Context, &Loc, &[Value]) -> CallbackResult + Send + Sync + 'static,
    ) -> BridgeResult<()> {
        self.install_global(
            name,
            FunctionTarget::Raw {
                context: self.inner.id,
                name: name.to_string(),
            },
        )?;
        self.inner.raw_functions.write().register(name, Arc::new(function));
        Ok(())
    }

    /// Create an anonymous raw function value.
    ///
    /// The function is registered under a name derived from the caller's
    /// source location.
    #[track_caller]
    pub fn create_raw_func(
        &self,
        function: impl Fn(&Context, &Loc, &[Value]) -> CallbackResult + Send + Sync + 'static,
    ) -> BridgeResult<Value> {
        let caller = std::panic::Location::caller();
        let name = format!(
            "RawFunc:{}:{}#{}",
            caller.file(),
            caller.line(),
            NEXT_RAW_FUNC.fetch_add(1, Ordering::Relaxed)
        );
        let handle = {
            let engine_ctx = self.inner.live_handle();
            let _entry = self.inner.enter();
            self.inner.engine.create_function(
                engine_ctx,
                FunctionTarget::Raw {
                    context: self.inner.id,
                    name: name.clone(),
                },
            )?
        };
        self.inner.raw_functions.write().register(name, Arc::new(function));
        Ok(self.inner.new_value(handle))
    }

    fn install_global(&self, name: &str, target: FunctionTarget) -> BridgeResult<()> {
        let engine_ctx = self.inner.live_handle();
        let _entry = self.inner.enter();
        let engine = &self.inner.engine;
        let function = engine.create_function(engine_ctx, target)?;
        let global = match engine.global(engine_ctx) {
            Ok(global) => global,
            Err(err) => {
                engine.release(engine_ctx, function);
                return Err(err.into());
            }
        };
        let installed = engine.set_field(engine_ctx, global, name, function);
        engine.release(engine_ctx, function);
        engine.release(engine_ctx, global);
        Ok(installed?)
    }

    /// The global object
    pub fn global(&self) -> BridgeResult<Value> {
        let handle = {
            let engine_ctx = self.inner.live_handle();
            let _entry = self.inner.enter();
            self.inner.engine.global(engine_ctx)?
        };
        Ok(self.inner.new_value(handle))
    }

    // ===== Values =====

    /// Convert a host value
    pub fn to_value<T: ToJs + ?Sized>(&self, value: &T) -> BridgeResult<Value> {
        value.to_js(self)
    }

    /// Parse JSON text into a new value
    pub fn from_json(&self, json: &str) -> BridgeResult<Value> {
        let handle = {
            let engine_ctx = self.inner.live_handle();
            let _entry = self.inner.enter();
            self.inner
                .engine
                .from_json(engine_ctx, json)
                .map_err(|err| BridgeError::execution("FromJSON", err))?
        };
        Ok(self.inner.new_value(handle))
    }

    fn primitive(&self, value: Primitive<'_>) -> BridgeResult<Value> {
        let handle = {
            let engine_ctx = self.inner.live_handle();
            let _entry = self.inner.enter();
            self.inner.engine.create_primitive(engine_ctx, value)?
        };
        Ok(self.inner.new_value(handle))
    }

    /// Create an integer
    pub fn create_int(&self, value: i64) -> BridgeResult<Value> {
        self.primitive(Primitive::Int(value))
    }

    /// Create an unsigned integer
    pub fn create_uint(&self, value: u64) -> BridgeResult<Value> {
        self.primitive(Primitive::Uint(value))
    }

    /// Create a number from an `f32`
    pub fn create_float(&self, value: f32) -> BridgeResult<Value> {
        self.primitive(Primitive::Float(value))
    }

    /// Create a number
    pub fn create_double(&self, value: f64) -> BridgeResult<Value> {
        self.primitive(Primitive::Double(value))
    }

    /// Create a boolean
    pub fn create_bool(&self, value: bool) -> BridgeResult<Value> {
        self.primitive(Primitive::Bool(value))
    }

    /// Create a string
    pub fn create_string(&self, value: &str) -> BridgeResult<Value> {
        self.primitive(Primitive::String(value))
    }

    /// Create `null`
    pub fn create_null(&self) -> BridgeResult<Value> {
        self.primitive(Primitive::Null)
    }

    /// Create `undefined`
    pub fn create_undefined(&self) -> BridgeResult<Value> {
        self.primitive(Primitive::Undefined)
    }

    /// Create an array of `items`
    pub fn create_array(&self, items: &[Value]) -> BridgeResult<Value> {
        let items: Vec<RawHandle> = items.iter().map(|item| item.handle_in(&self.inner)).collect();
        let handle = {
            let engine_ctx = self.inner.live_handle();
            let _entry = self.inner.enter();
            self.inner.engine.create_array(engine_ctx, &items)?
        };
        Ok(self.inner.new_value(handle))
    }

    // ===== Prototypes =====

    /// Get or create the object prototype `name`.
    ///
    /// Returns the prototype and whether this call created it.
    pub fn create_object_prototype(&self, name: &str) -> BridgeResult<(Prototype, bool)> {
        self.prototype_for(name, None)
    }

    /// Get or create the class prototype `name`, constructed through `constructor`
    pub fn create_class_prototype(
        &self,
        name: &str,
        constructor: impl Fn(&Context, &Loc, &Prototype, &Value, &[Value]) -> CallbackResult + Send + Sync + 'static,
    ) -> BridgeResult<(Prototype, bool)> {
        self.prototype_for(name, Some(Arc::new(constructor)))
    }

    fn prototype_for(&self, name: &str, constructor: Option<Constructor>) -> BridgeResult<(Prototype, bool)> {
        let cell = {
            let mut prototypes = self.inner.prototypes.lock();
            prototypes
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        let mut created = false;
        let prototype = cell
            .get_or_try_init(|| {
                created = true;
                Prototype::create(&self.inner, name, constructor)
            })?
            .clone();
        Ok((prototype, created))
    }
}

fn origin_name(filename: &str) -> &str {
    if filename.is_empty() {
        "<anonymous>"
    } else {
        filename
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("handle", &self.inner.handle())
            .field("functions", &self.inner.functions.read().len())
            .field("raw_functions", &self.inner.raw_functions.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_name() {
        assert_eq!(origin_name(""), "<anonymous>");
        assert_eq!(origin_name("app.js"), "app.js");
    }
}
