//! [`TestEngine`]: an in-process engine backend for tests
//!
//! The engine keeps every value in a Rust heap and evaluates scripts either
//! through closures registered with [`TestEngine::define_script`] or through
//! a small expression evaluator (literals, global lookups, member access,
//! calls and `new`). Garbage collection only happens on
//! [`TestEngine::collect_garbage`].
//!
//! The state lock is never held while calling back into the host, so host
//! callbacks may re-enter the engine freely.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use jsembed_sdk::{
    BackingStore, ContextHandle, ContextId, Engine, EngineError, EngineResult, FunctionTarget, HostBridge,
    IsolateHandle, IsolateOptions, MethodId, ObjectId, Primitive, RawHandle, ScriptOrigin, TemplateHandle,
    ValueKind,
};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::heap::{Callable, Heap, HeapObject, JsVal, ObjKind, ObjRef, ScriptResult};
use crate::script::{Scope, ScriptFn};

/// Message of the exception raised by [`Engine::terminate`]
pub const TERMINATED: &str = "Execution terminated";

/// Something the engine did, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// An isolate was created
    IsolateCreated(IsolateHandle),
    /// An isolate was released
    IsolateReleased(IsolateHandle),
    /// A context was created for a host context id
    ContextCreated(ContextHandle, ContextId),
    /// A context was released
    ContextReleased(ContextHandle, ContextId),
    /// Termination was requested while script was running
    Terminated(IsolateHandle),
    /// A weak wrapped object was collected and reported to the host
    Finalized(ObjectId),
}

type Observer = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// Termination state shared with running scopes
#[derive(Debug, Default)]
pub(crate) struct Interrupt {
    terminating: AtomicBool,
    depth: AtomicUsize,
}

impl Interrupt {
    pub(crate) fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Running<'_> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        Running(self)
    }
}

/// Marks script as running; the outermost exit clears termination
struct Running<'a>(&'a Interrupt);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        if self.0.depth.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.terminating.store(false, Ordering::SeqCst);
        }
    }
}

struct IsolateState {
    options: IsolateOptions,
    interrupt: Arc<Interrupt>,
    pumped: usize,
}

pub(crate) struct ContextState {
    isolate: u64,
    pub(crate) id: ContextId,
    pub(crate) bridge: Arc<dyn HostBridge>,
    pub(crate) global: ObjRef,
    pending: Option<String>,
}

pub(crate) struct Template {
    context: u64,
    pub(crate) class_name: Option<String>,
    pub(crate) methods: Vec<(String, MethodId)>,
}

struct Slot {
    context: u64,
    value: JsVal,
    weak: bool,
    finalizer: Option<ObjectId>,
}

#[derive(Default)]
pub(crate) struct State {
    next_id: u64,
    pub(crate) heap: Heap,
    isolates: FxHashMap<u64, IsolateState>,
    pub(crate) contexts: FxHashMap<u64, ContextState>,
    pub(crate) templates: FxHashMap<u64, Template>,
    handles: FxHashMap<u64, Slot>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn mint(&mut self, context: u64, value: JsVal) -> RawHandle {
        let id = self.next_id();
        self.handles.insert(
            id,
            Slot {
                context,
                value,
                weak: false,
                finalizer: None,
            },
        );
        RawHandle::from_raw(id)
    }

    /// Weak handle whose collection is reported as `object`
    fn mint_wrapped(&mut self, context: u64, value: JsVal, object: ObjectId) -> RawHandle {
        let id = self.next_id();
        self.handles.insert(
            id,
            Slot {
                context,
                value,
                weak: true,
                finalizer: Some(object),
            },
        );
        RawHandle::from_raw(id)
    }

    fn value(&self, context: ContextHandle, handle: RawHandle) -> EngineResult<JsVal> {
        match self.handles.get(&handle.as_raw()) {
            Some(slot) if slot.context == context.as_raw() => Ok(slot.value.clone()),
            Some(_) => Err(EngineError::new(format!("{:?} belongs to another context", handle))),
            None => Err(EngineError::new(format!("{:?} is not a live handle", handle))),
        }
    }

    fn object(&self, context: ContextHandle, handle: RawHandle) -> EngineResult<ObjRef> {
        self.value(context, handle)?
            .as_obj()
            .ok_or_else(|| EngineError::new("TypeError: value is not an object"))
    }

    fn context(&self, context: ContextHandle) -> EngineResult<&ContextState> {
        self.contexts
            .get(&context.as_raw())
            .ok_or_else(|| EngineError::new(format!("{:?} is released", context)))
    }

    fn template(&self, context: ContextHandle, template: TemplateHandle) -> EngineResult<&Template> {
        match self.templates.get(&template.as_raw()) {
            Some(t) if t.context == context.as_raw() => Ok(t),
            _ => Err(EngineError::new(format!("{:?} is not a template of {:?}", template, context))),
        }
    }
}

/// Engine backend for tests.
///
/// Isolate options are recorded (see [`TestEngine::isolate_options`]) but
/// not enforced: the heap has no byte accounting and errors carry no stack
/// traces.
///
/// # Example
///
/// ```ignore
/// let engine = TestEngine::new();
/// engine.define_script("spin()", |scope| loop {
///     scope.check_interrupt()?;
/// });
/// ```
pub struct TestEngine {
    pub(crate) state: Mutex<State>,
    scripts: RwLock<FxHashMap<String, ScriptFn>>,
    events: Mutex<Vec<EngineEvent>>,
    observer: RwLock<Option<Observer>>,
    faults: Mutex<FxHashMap<&'static str, String>>,
}

impl TestEngine {
    /// Create an engine with no isolates
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            scripts: RwLock::new(FxHashMap::default()),
            events: Mutex::new(Vec::new()),
            observer: RwLock::new(None),
            faults: Mutex::new(FxHashMap::default()),
        })
    }

    /// Evaluate `script` whenever exactly `source` is executed
    pub fn define_script(
        &self,
        source: impl Into<String>,
        script: impl Fn(&mut Scope<'_>) -> ScriptResult + Send + Sync + 'static,
    ) {
        self.scripts.write().insert(source.into(), Arc::new(script));
    }

    pub(crate) fn script(&self, source: &str) -> Option<ScriptFn> {
        let scripts = self.scripts.read();
        scripts
            .get(source)
            .or_else(|| scripts.get(source.trim()))
            .cloned()
    }

    /// Call `observer` on every engine event, as it happens
    pub fn set_observer(&self, observer: impl Fn(&EngineEvent) + Send + Sync + 'static) {
        *self.observer.write() = Some(Arc::new(observer));
    }

    /// Every event so far
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    /// Make the next call of `operation` fail with `message`.
    ///
    /// Supported operations: `"create_function"`, `"set_field"`.
    pub fn fail_next(&self, operation: &'static str, message: impl Into<String>) {
        self.faults.lock().insert(operation, message.into());
    }

    fn fault(&self, operation: &'static str) -> EngineResult<()> {
        match self.faults.lock().remove(operation) {
            Some(message) => Err(EngineError::new(message)),
            None => Ok(()),
        }
    }

    fn emit(&self, event: EngineEvent) {
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer(&event);
        }
        self.events.lock().push(event);
    }

    /// Number of live handles across all contexts
    pub fn handle_count(&self) -> usize {
        self.state.lock().handles.len()
    }

    /// Number of live handles of one context
    pub fn context_handle_count(&self, context: ContextHandle) -> usize {
        self.state
            .lock()
            .handles
            .values()
            .filter(|slot| slot.context == context.as_raw())
            .count()
    }

    /// Number of heap objects
    pub fn object_count(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Number of live contexts
    pub fn context_count(&self) -> usize {
        self.state.lock().contexts.len()
    }

    /// Number of live isolates
    pub fn isolate_count(&self) -> usize {
        self.state.lock().isolates.len()
    }

    /// Options an isolate was created with
    pub fn isolate_options(&self, isolate: IsolateHandle) -> Option<IsolateOptions> {
        self.state
            .lock()
            .isolates
            .get(&isolate.as_raw())
            .map(|i| i.options.clone())
    }

    /// How often the message loop of `isolate` was pumped
    pub fn pump_count(&self, isolate: IsolateHandle) -> usize {
        self.state
            .lock()
            .isolates
            .get(&isolate.as_raw())
            .map_or(0, |i| i.pumped)
    }

    /// Collect unreachable objects.
    ///
    /// Roots are the context globals and every strong handle. Weak handles
    /// to collected objects are dropped; those of wrapped objects are
    /// reported to the host through [`HostBridge::dispose`]. Returns the
    /// number of objects reported.
    pub fn collect_garbage(&self) -> usize {
        let finalized: Vec<(Arc<dyn HostBridge>, ObjectId)> = {
            let mut state = self.state.lock();
            let state = &mut *state;
            let roots: Vec<ObjRef> = state
                .contexts
                .values()
                .map(|ctx| ctx.global)
                .chain(
                    state
                        .handles
                        .values()
                        .filter(|slot| !slot.weak)
                        .filter_map(|slot| slot.value.as_obj()),
                )
                .collect();
            let before = state.heap.len();
            let marked = state.heap.sweep(roots);

            let mut finalized = Vec::new();
            let contexts = &state.contexts;
            state.handles.retain(|_, slot| {
                let collected = slot.weak && slot.value.as_obj().is_some_and(|r| !marked.contains(&r.0));
                if collected {
                    if let (Some(object), Some(ctx)) = (slot.finalizer, contexts.get(&slot.context)) {
                        finalized.push((ctx.bridge.clone(), object));
                    }
                }
                !collected
            });
            tracing::debug!(
                collected = before - state.heap.len(),
                finalized = finalized.len(),
                "garbage collected"
            );
            finalized
        };

        for (bridge, object) in &finalized {
            bridge.dispose(*object);
            self.emit(EngineEvent::Finalized(*object));
        }
        finalized.len()
    }

    pub(crate) fn mint(&self, context: ContextHandle, value: JsVal) -> RawHandle {
        self.state.lock().mint(context.as_raw(), value)
    }

    pub(crate) fn read_handle(&self, context: ContextHandle, handle: RawHandle) -> ScriptResult {
        self.state
            .lock()
            .value(context, handle)
            .map_err(|err| format!("ReferenceError: host returned an invalid value: {}", err))
    }

    pub(crate) fn take_pending(&self, context: ContextHandle) -> Option<String> {
        self.state
            .lock()
            .contexts
            .get_mut(&context.as_raw())
            .and_then(|ctx| ctx.pending.take())
    }

    fn alloc(&self, context: ContextHandle, object: HeapObject) -> EngineResult<RawHandle> {
        let mut state = self.state.lock();
        state.context(context)?;
        let r = state.heap.alloc(object);
        Ok(state.mint(context.as_raw(), JsVal::Obj(r)))
    }

    /// Run `body` as one script entry
    fn run(
        &self,
        context: ContextHandle,
        origin: Option<ScriptOrigin<'_>>,
        body: impl FnOnce(&mut Scope<'_>) -> ScriptResult,
    ) -> EngineResult<JsVal> {
        let interrupt = {
            let state = self.state.lock();
            let ctx = state.context(context)?;
            state
                .isolates
                .get(&ctx.isolate)
                .map(|isolate| isolate.interrupt.clone())
                .ok_or_else(|| EngineError::new("isolate is released"))?
        };
        let _running = interrupt.enter();
        let mut scope = Scope::new(self, context, origin, interrupt.clone());
        let result = body(&mut scope);
        let pending = self.take_pending(context);
        match (result, pending) {
            (Err(message), _) | (Ok(_), Some(message)) => Err(EngineError::new(message)),
            (Ok(value), None) => Ok(value),
        }
    }

    fn number(&self, context: ContextHandle, handle: RawHandle) -> Option<f64> {
        self.state.lock().value(context, handle).ok()?.as_number()
    }
}

impl Engine for TestEngine {
    fn create_isolate(&self, options: &IsolateOptions) -> EngineResult<IsolateHandle> {
        let handle = {
            let mut state = self.state.lock();
            let id = state.next_id();
            state.isolates.insert(
                id,
                IsolateState {
                    options: options.clone(),
                    interrupt: Arc::new(Interrupt::default()),
                    pumped: 0,
                },
            );
            IsolateHandle::from_raw(id)
        };
        self.emit(EngineEvent::IsolateCreated(handle));
        Ok(handle)
    }

    fn release_isolate(&self, isolate: IsolateHandle) {
        let removed = self.state.lock().isolates.remove(&isolate.as_raw()).is_some();
        if removed {
            self.emit(EngineEvent::IsolateReleased(isolate));
        }
    }

    fn terminate(&self, isolate: IsolateHandle) {
        let interrupt = self
            .state
            .lock()
            .isolates
            .get(&isolate.as_raw())
            .map(|i| i.interrupt.clone());
        let Some(interrupt) = interrupt else { return };
        if interrupt.depth.load(Ordering::SeqCst) > 0 {
            interrupt.terminating.store(true, Ordering::SeqCst);
            self.emit(EngineEvent::Terminated(isolate));
        }
    }

    fn pump_message_loop(&self, isolate: IsolateHandle) -> bool {
        if let Some(isolate) = self.state.lock().isolates.get_mut(&isolate.as_raw()) {
            isolate.pumped += 1;
        }
        false
    }

    fn create_context(
        &self,
        isolate: IsolateHandle,
        id: ContextId,
        bridge: Arc<dyn HostBridge>,
    ) -> EngineResult<ContextHandle> {
        let handle = {
            let mut state = self.state.lock();
            if !state.isolates.contains_key(&isolate.as_raw()) {
                return Err(EngineError::new(format!("{:?} is released", isolate)));
            }
            let global = state.heap.alloc(HeapObject::new(ObjKind::Plain));
            let raw = state.next_id();
            state.contexts.insert(
                raw,
                ContextState {
                    isolate: isolate.as_raw(),
                    id,
                    bridge,
                    global,
                    pending: None,
                },
            );
            ContextHandle::from_raw(raw)
        };
        self.emit(EngineEvent::ContextCreated(handle, id));
        Ok(handle)
    }

    fn release_context(&self, context: ContextHandle) {
        let released = {
            let mut state = self.state.lock();
            let raw = context.as_raw();
            let released = state.contexts.remove(&raw);
            state.handles.retain(|_, slot| slot.context != raw);
            state.templates.retain(|_, template| template.context != raw);
            released
        };
        if let Some(ctx) = released {
            self.emit(EngineEvent::ContextReleased(context, ctx.id));
        }
    }

    fn global(&self, context: ContextHandle) -> EngineResult<RawHandle> {
        let mut state = self.state.lock();
        let global = state.context(context)?.global;
        Ok(state.mint(context.as_raw(), JsVal::Obj(global)))
    }

    fn execute(&self, context: ContextHandle, source: &str, origin: ScriptOrigin<'_>) -> EngineResult<Option<String>> {
        let value = self.run(context, Some(origin), |scope| scope.eval(source))?;
        self.state.lock().heap.stringify(&value).map_err(EngineError::new)
    }

    fn eval(&self, context: ContextHandle, source: &str, origin: ScriptOrigin<'_>) -> EngineResult<RawHandle> {
        let value = self.run(context, Some(origin), |scope| scope.eval(source))?;
        Ok(self.mint(context, value))
    }

    fn compile_module(&self, context: ContextHandle, source: &str, origin: ScriptOrigin<'_>) -> EngineResult<RawHandle> {
        self.eval(context, source, origin)
    }

    fn apply(
        &self,
        context: ContextHandle,
        function: RawHandle,
        this: Option<RawHandle>,
        args: &[RawHandle],
    ) -> EngineResult<RawHandle> {
        let (function, this, args) = {
            let state = self.state.lock();
            let function = state.value(context, function)?;
            let this = match this {
                Some(this) => state.value(context, this)?,
                None => JsVal::Obj(state.context(context)?.global),
            };
            let args = args
                .iter()
                .map(|&arg| state.value(context, arg))
                .collect::<EngineResult<Vec<_>>>()?;
            (function, this, args)
        };
        let value = self.run(context, None, |scope| scope.call(&function, this, args))?;
        Ok(self.mint(context, value))
    }

    fn throw(&self, context: ContextHandle, message: &str) {
        if let Some(ctx) = self.state.lock().contexts.get_mut(&context.as_raw()) {
            ctx.pending = Some(message.to_string());
        }
    }

    fn release(&self, _context: ContextHandle, handle: RawHandle) {
        self.state.lock().handles.remove(&handle.as_raw());
    }

    fn weaken(&self, _context: ContextHandle, handle: RawHandle) {
        if let Some(slot) = self.state.lock().handles.get_mut(&handle.as_raw()) {
            slot.weak = true;
        }
    }

    fn create_primitive(&self, context: ContextHandle, value: Primitive<'_>) -> EngineResult<RawHandle> {
        let value = match value {
            Primitive::Int(n) => JsVal::Number(n as f64),
            Primitive::Uint(n) => JsVal::Number(n as f64),
            Primitive::Float(n) => JsVal::Number(f64::from(n)),
            Primitive::Double(n) => JsVal::Number(n),
            Primitive::Bool(b) => JsVal::Bool(b),
            Primitive::String(s) => JsVal::Str(s.to_string()),
            Primitive::Null => JsVal::Null,
            Primitive::Undefined => JsVal::Undefined,
        };
        let mut state = self.state.lock();
        state.context(context)?;
        Ok(state.mint(context.as_raw(), value))
    }

    fn create_array(&self, context: ContextHandle, items: &[RawHandle]) -> EngineResult<RawHandle> {
        let items = {
            let state = self.state.lock();
            items
                .iter()
                .map(|&item| state.value(context, item))
                .collect::<EngineResult<Vec<_>>>()?
        };
        self.alloc(context, HeapObject::new(ObjKind::Array(items)))
    }

    fn from_json(&self, context: ContextHandle, json: &str) -> EngineResult<RawHandle> {
        let json: serde_json::Value =
            serde_json::from_str(json).map_err(|err| EngineError::new(format!("SyntaxError: {}", err)))?;
        let mut state = self.state.lock();
        state.context(context)?;
        let value = state.heap.from_json(&json);
        Ok(state.mint(context.as_raw(), value))
    }

    fn to_json(&self, context: ContextHandle, handle: RawHandle) -> EngineResult<String> {
        let state = self.state.lock();
        let value = state.value(context, handle)?;
        let json = state.heap.stringify(&value).map_err(EngineError::new)?;
        Ok(json.unwrap_or_else(|| "undefined".to_string()))
    }

    fn burst(&self, context: ContextHandle, handle: RawHandle) -> EngineResult<Vec<(String, RawHandle)>> {
        let mut state = self.state.lock();
        let object = state.object(context, handle)?;
        let entries = state.heap.own_entries(object).map_err(EngineError::new)?;
        Ok(entries
            .into_iter()
            .map(|(key, value)| (key, state.mint(context.as_raw(), value)))
            .collect())
    }

    fn set_field(&self, context: ContextHandle, object: RawHandle, field: &str, value: RawHandle) -> EngineResult<()> {
        self.fault("set_field")?;
        let mut state = self.state.lock();
        let object = state.object(context, object)?;
        let value = state.value(context, value)?;
        state.heap.set_property(object, field, value).map_err(EngineError::new)
    }

    fn type_name(&self, context: ContextHandle, handle: RawHandle) -> &'static str {
        let state = self.state.lock();
        match state.value(context, handle) {
            Ok(value) => state.heap.type_name(&value),
            Err(_) => "undefined",
        }
    }

    fn is_kind(&self, context: ContextHandle, handle: RawHandle, kind: ValueKind) -> bool {
        let state = self.state.lock();
        state
            .value(context, handle)
            .is_ok_and(|value| state.heap.is_kind(&value, kind))
    }

    fn to_int32(&self, context: ContextHandle, handle: RawHandle) -> Option<i32> {
        let n = self.number(context, handle)?;
        (n.fract() == 0.0 && n >= f64::from(i32::MIN) && n <= f64::from(i32::MAX)).then_some(n as i32)
    }

    fn to_int64(&self, context: ContextHandle, handle: RawHandle) -> Option<i64> {
        self.number(context, handle).map(|n| n as i64)
    }

    fn to_uint32(&self, context: ContextHandle, handle: RawHandle) -> Option<u32> {
        let n = self.number(context, handle)?;
        (n.fract() == 0.0 && n >= 0.0 && n <= f64::from(u32::MAX)).then_some(n as u32)
    }

    fn to_number(&self, context: ContextHandle, handle: RawHandle) -> Option<f64> {
        self.number(context, handle)
    }

    fn to_boolean(&self, context: ContextHandle, handle: RawHandle) -> Option<bool> {
        match self.state.lock().value(context, handle).ok()? {
            JsVal::Bool(b) => Some(b),
            _ => None,
        }
    }

    fn backing_store(&self, context: ContextHandle, handle: RawHandle) -> Option<BackingStore> {
        let state = self.state.lock();
        let object = state.object(context, handle).ok()?;
        match &state.heap.get(object)?.kind {
            ObjKind::Bytes(bytes) if bytes.is_empty() => Some(BackingStore::empty()),
            ObjKind::Bytes(bytes) => {
                let ptr = NonNull::new(bytes.as_ptr() as *mut u8)?;
                // SAFETY: the boxed slice is owned by the heap object and is
                // never reallocated; it lives until the object is collected,
                // which cannot happen while `handle` is alive.
                Some(unsafe { BackingStore::new(ptr, bytes.len()) })
            }
            _ => None,
        }
    }

    fn create_function(&self, context: ContextHandle, target: FunctionTarget) -> EngineResult<RawHandle> {
        self.fault("create_function")?;
        self.alloc(context, HeapObject::new(ObjKind::Function(Callable::Host(target))))
    }

    fn create_object_template(&self, context: ContextHandle) -> EngineResult<TemplateHandle> {
        self.new_template(context, None)
    }

    fn create_class_template(&self, context: ContextHandle, name: &str) -> EngineResult<TemplateHandle> {
        self.new_template(context, Some(name.to_string()))
    }

    fn add_method(&self, context: ContextHandle, template: TemplateHandle, name: &str, method: MethodId) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.template(context, template)?;
        let Some(template) = state.templates.get_mut(&template.as_raw()) else {
            return Err(EngineError::new("template is released"));
        };
        match template.methods.iter_mut().find(|(existing, _)| existing == name) {
            Some(entry) => entry.1 = method,
            None => template.methods.push((name.to_string(), method)),
        }
        Ok(())
    }

    fn class_constructor(&self, context: ContextHandle, template: TemplateHandle) -> EngineResult<RawHandle> {
        {
            let state = self.state.lock();
            if state.template(context, template)?.class_name.is_none() {
                return Err(EngineError::new("object templates have no constructor"));
            }
        }
        self.alloc(
            context,
            HeapObject::new(ObjKind::Function(Callable::Class(template.as_raw()))),
        )
    }

    fn instantiate(&self, context: ContextHandle, template: TemplateHandle, object: ObjectId) -> EngineResult<RawHandle> {
        let mut state = self.state.lock();
        state.template(context, template)?;
        let mut instance = HeapObject::new(ObjKind::Plain);
        instance.template = Some(template.as_raw());
        instance.internal = Some(object);
        let r = state.heap.alloc(instance);
        Ok(state.mint_wrapped(context.as_raw(), JsVal::Obj(r), object))
    }

    fn wrap_instance(&self, context: ContextHandle, instance: RawHandle, object: ObjectId) -> EngineResult<RawHandle> {
        let mut state = self.state.lock();
        let r = state.object(context, instance)?;
        let target = state
            .heap
            .get_mut(r)
            .ok_or_else(|| EngineError::new("instance was collected"))?;
        if target.internal.is_some() {
            return Err(EngineError::new("object is already wrapped"));
        }
        target.internal = Some(object);
        Ok(state.mint_wrapped(context.as_raw(), JsVal::Obj(r), object))
    }

    fn object_id(&self, context: ContextHandle, handle: RawHandle) -> Option<ObjectId> {
        let state = self.state.lock();
        let r = state.object(context, handle).ok()?;
        state.heap.get(r)?.internal
    }
}

impl TestEngine {
    fn new_template(&self, context: ContextHandle, class_name: Option<String>) -> EngineResult<TemplateHandle> {
        let mut state = self.state.lock();
        state.context(context)?;
        let id = state.next_id();
        state.templates.insert(
            id,
            Template {
                context: context.as_raw(),
                class_name,
                methods: Vec::new(),
            },
        );
        Ok(TemplateHandle::from_raw(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsembed_sdk::{HostCall, HostReturn};

    struct NullBridge;

    impl HostBridge for NullBridge {
        fn dispatch(&self, _call: HostCall<'_>) -> HostReturn {
            HostReturn::Undefined
        }

        fn property_get(&self, _object: ObjectId, _property: &str) -> Option<RawHandle> {
            None
        }

        fn dispose(&self, _object: ObjectId) {}
    }

    fn context(engine: &TestEngine) -> ContextHandle {
        let isolate = engine.create_isolate(&IsolateOptions::default()).unwrap();
        engine
            .create_context(isolate, ContextId::from_u64(1), Arc::new(NullBridge))
            .unwrap()
    }

    #[test]
    fn test_execute_literal() {
        let engine = TestEngine::new();
        let ctx = context(&engine);
        let json = engine.execute(ctx, r#"{"a": [1, 2]}"#, ScriptOrigin::new("t.js")).unwrap();
        assert_eq!(json.as_deref(), Some(r#"{"a":[1,2]}"#));
        assert_eq!(engine.execute(ctx, "undefined", ScriptOrigin::default()).unwrap(), None);
    }

    #[test]
    fn test_unknown_global_is_reference_error() {
        let engine = TestEngine::new();
        let ctx = context(&engine);
        let err = engine.eval(ctx, "missing(1)", ScriptOrigin::default()).unwrap_err();
        assert_eq!(err.message(), "ReferenceError: missing is not defined");
    }

    #[test]
    fn test_release_context_drops_its_handles() {
        let engine = TestEngine::new();
        let ctx = context(&engine);
        engine.create_primitive(ctx, Primitive::Int(1)).unwrap();
        engine.global(ctx).unwrap();
        assert_eq!(engine.context_handle_count(ctx), 2);

        engine.release_context(ctx);
        assert_eq!(engine.handle_count(), 0);
        assert!(engine.create_primitive(ctx, Primitive::Null).is_err());
    }

    #[test]
    fn test_weak_handles_do_not_root_objects() {
        let engine = TestEngine::new();
        let ctx = context(&engine);
        let array = engine.create_array(ctx, &[]).unwrap();
        engine.weaken(ctx, array);
        engine.collect_garbage();
        assert_eq!(engine.handle_count(), 0);
        // only the global object survives
        assert_eq!(engine.object_count(), 1);
    }

    #[test]
    fn test_terminate_when_idle_is_ignored() {
        let engine = TestEngine::new();
        let isolate = engine.create_isolate(&IsolateOptions::default()).unwrap();
        engine.terminate(isolate);
        assert!(!engine.events().contains(&EngineEvent::Terminated(isolate)));
    }

    #[test]
    fn test_injected_fault_fails_once() {
        let engine = TestEngine::new();
        let ctx = context(&engine);
        let global = engine.global(ctx).unwrap();
        let one = engine.create_primitive(ctx, Primitive::Int(1)).unwrap();

        engine.fail_next("set_field", "object is frozen");
        let err = engine.set_field(ctx, global, "x", one).unwrap_err();
        assert_eq!(err.message(), "object is frozen");
        engine.set_field(ctx, global, "x", one).unwrap();
    }

    #[test]
    fn test_number_conversions() {
        let engine = TestEngine::new();
        let ctx = context(&engine);
        let n = engine.create_primitive(ctx, Primitive::Double(-3.0)).unwrap();
        assert_eq!(engine.to_int32(ctx, n), Some(-3));
        assert_eq!(engine.to_uint32(ctx, n), None);
        let f = engine.create_primitive(ctx, Primitive::Double(1.5)).unwrap();
        assert_eq!(engine.to_int32(ctx, f), None);
        assert_eq!(engine.to_number(ctx, f), Some(1.5));
        assert_eq!(engine.type_name(ctx, f), "number");
    }
}
