//! Value handles
//!
//! A [`Value`] is a host handle to one engine value, bound for its whole life
//! to the context that produced it. Clones share the same underlying slot:
//! releasing through one clone releases all of them.
//!
//! Every handle the engine gives the host is tracked in its context's live
//! set until it is released, weakened, or the context is torn down.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use jsembed_sdk::{ContextHandle, ContextId, Engine, ObjectId, RawHandle, ValueKind};
use parking_lot::Mutex;

use crate::context::{Context, ContextInner};
use crate::error::{BridgeError, BridgeResult};
use crate::fatal;
use crate::function::Payload;
use crate::registry;

static NEXT_VALUE_KEY: AtomicU64 = AtomicU64::new(1);

struct ValueState {
    handle: Option<RawHandle>,
    context: Option<Weak<ContextInner>>,
    weak: bool,
}

struct ValueSlot {
    key: u64,
    context_id: ContextId,
    state: Mutex<ValueState>,
}

/// Host handle to an engine value
#[derive(Clone)]
pub struct Value {
    slot: Arc<ValueSlot>,
}

impl Value {
    /// Bind `handle` to `ctx` without tracking it
    pub(crate) fn bind(ctx: &Arc<ContextInner>, handle: RawHandle) -> Self {
        Self {
            slot: Arc::new(ValueSlot {
                key: NEXT_VALUE_KEY.fetch_add(1, Ordering::Relaxed),
                context_id: ctx.id(),
                state: Mutex::new(ValueState {
                    handle: Some(handle),
                    context: Some(Arc::downgrade(ctx)),
                    weak: false,
                }),
            }),
        }
    }

    pub(crate) fn key(&self) -> u64 {
        self.slot.key
    }

    /// The owning context, while the value is bound and the context alive
    pub fn context(&self) -> Option<Context> {
        let state = self.slot.state.lock();
        state
            .context
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Context::from_inner)
    }

    /// Id of the context that produced this value
    pub fn context_id(&self) -> ContextId {
        self.slot.context_id
    }

    /// True once released, or weakened and handed back to the engine
    pub fn is_released(&self) -> bool {
        let state = self.slot.state.lock();
        state.handle.is_none() || state.context.is_none()
    }

    /// True after [`Value::weaken`]
    pub fn is_weak(&self) -> bool {
        self.slot.state.lock().weak
    }

    /// The engine handle, unless released
    pub fn raw_handle(&self) -> Option<RawHandle> {
        self.slot.state.lock().handle
    }

    /// True when both values share one handle slot
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// Free the engine handle.
    ///
    /// Fails with [`BridgeError::AlreadyReleased`] on a second call and with
    /// [`BridgeError::WeakValue`] on a weakened value.
    pub fn release(&self) -> BridgeResult<()> {
        let (handle, context) = {
            let mut state = self.slot.state.lock();
            if state.handle.is_none() {
                return Err(BridgeError::AlreadyReleased);
            }
            if state.weak {
                return Err(BridgeError::WeakValue);
            }
            (state.handle.take(), state.context.take())
        };
        if let (Some(handle), Some(ctx)) = (handle, context.and_then(|ctx| ctx.upgrade())) {
            ctx.forget_value(self.key());
            ctx.release_handle(handle);
        }
        Ok(())
    }

    /// Hand the value over to the engine's garbage collector.
    ///
    /// The value stays usable until the engine collects it, but it is no
    /// longer tracked by its context and must not be released.
    pub fn weaken(&self) -> BridgeResult<()> {
        let (handle, context) = {
            let mut state = self.slot.state.lock();
            let Some(handle) = state.handle else {
                return Err(BridgeError::AlreadyReleased);
            };
            if state.weak {
                return Ok(());
            }
            state.weak = true;
            (handle, state.context.as_ref().and_then(Weak::upgrade))
        };
        if let Some(ctx) = context {
            ctx.forget_value(self.key());
            if let Some(engine_ctx) = ctx.handle() {
                let _entry = ctx.enter();
                ctx.engine().weaken(engine_ctx, handle);
            }
        }
        Ok(())
    }

    /// Owning context and handle; panics when the value was reset
    pub(crate) fn live(&self) -> (Arc<ContextInner>, RawHandle) {
        let state = self.slot.state.lock();
        match (state.context.as_ref().and_then(Weak::upgrade), state.handle) {
            (Some(ctx), Some(handle)) => (ctx, handle),
            _ => panic!("Value or context were reset."),
        }
    }

    /// Handle of a value about to be used in `ctx`.
    ///
    /// A value of another context is bridge corruption.
    pub(crate) fn handle_in(&self, ctx: &ContextInner) -> RawHandle {
        if self.slot.context_id != ctx.id() {
            fatal::corrupt(format!(
                "value of {} used in {}",
                self.slot.context_id,
                ctx.id()
            ));
        }
        let state = self.slot.state.lock();
        match (state.context.is_some(), state.handle) {
            (true, Some(handle)) => handle,
            _ => panic!("Value or context were reset."),
        }
    }

    /// Release during teardown, when `ctx` may already be unreachable
    /// through the value's weak reference
    pub(crate) fn discard(&self, ctx: &ContextInner, engine_ctx: ContextHandle) {
        let handle = {
            let mut state = self.slot.state.lock();
            state.context = None;
            state.handle.take()
        };
        ctx.forget_value(self.key());
        if let Some(handle) = handle {
            ctx.engine().release(engine_ctx, handle);
        }
    }

    /// Validate a value returned by a host callback and give its handle to
    /// the engine
    pub(crate) fn settle_return(&self, ctx: &ContextInner, what: &str) -> RawHandle {
        if !ctx.is_live() {
            fatal::corrupt(format!("context {} of '{}' is not live", ctx.id(), what));
        }
        let mut state = self.slot.state.lock();
        if state.context.is_none() {
            drop(state);
            fatal::corrupt(format!(
                "return value of '{}' contains no context information, was it released?",
                what
            ));
        }
        if self.slot.context_id != ctx.id() {
            drop(state);
            fatal::corrupt(format!(
                "return value of '{}' was generated from another context ({} != {})",
                what,
                self.slot.context_id,
                ctx.id()
            ));
        }
        let Some(handle) = state.handle else {
            drop(state);
            fatal::corrupt(format!("return value of '{}' has no handle", what));
        };
        if state.weak {
            state.context = None;
        }
        handle
    }

    fn with_engine<R>(&self, f: impl FnOnce(&dyn Engine, ContextHandle, RawHandle) -> R) -> R {
        let (ctx, handle) = self.live();
        let engine_ctx = ctx.live_handle();
        let _entry = ctx.enter();
        f(ctx.engine(), engine_ctx, handle)
    }

    /// JSON rendering of the value
    pub fn to_json(&self) -> BridgeResult<String> {
        Ok(self.with_engine(|engine, ctx, handle| engine.to_json(ctx, handle))?)
    }

    /// Short engine type name ("number", "object", ...)
    pub fn type_name(&self) -> &'static str {
        self.with_engine(|engine, ctx, handle| engine.type_name(ctx, handle))
    }

    /// Test the value against an object kind
    pub fn is(&self, kind: ValueKind) -> bool {
        self.with_engine(|engine, ctx, handle| engine.is_kind(ctx, handle, kind))
    }

    /// Own enumerable properties, each as a new value
    pub fn burst(&self) -> BridgeResult<HashMap<String, Value>> {
        let (ctx, handle) = self.live();
        let engine_ctx = ctx.live_handle();
        let fields = {
            let _entry = ctx.enter();
            ctx.engine().burst(engine_ctx, handle)?
        };
        Ok(fields
            .into_iter()
            .map(|(name, field)| (name, ctx.new_value(field)))
            .collect())
    }

    /// One property of the object.
    ///
    /// Walks every own property on each call; use [`Value::burst`] to read
    /// many fields at once.
    pub fn get(&self, field: &str) -> BridgeResult<Value> {
        let (ctx, handle) = self.live();
        let engine_ctx = ctx.live_handle();
        let found = {
            let _entry = ctx.enter();
            let engine = ctx.engine();
            let mut found = None;
            for (name, value) in engine.burst(engine_ctx, handle)? {
                if found.is_none() && name == field {
                    found = Some(value);
                } else {
                    engine.release(engine_ctx, value);
                }
            }
            found
        };
        found
            .map(|handle| ctx.new_value(handle))
            .ok_or_else(|| BridgeError::UndefinedField(field.to_string()))
    }

    /// Assign a property
    pub fn set(&self, field: &str, value: &Value) -> BridgeResult<()> {
        let (ctx, handle) = self.live();
        let value = value.handle_in(&ctx);
        let engine_ctx = ctx.live_handle();
        let _entry = ctx.enter();
        Ok(ctx.engine().set_field(engine_ctx, handle, field, value)?)
    }

    /// Id of the wrapped object this value is an instance of
    pub fn object_id(&self) -> Option<ObjectId> {
        self.with_engine(|engine, ctx, handle| engine.object_id(ctx, handle))
    }

    /// Payload of the wrapped object this value is an instance of
    pub fn wrapped_payload(&self) -> Option<Payload> {
        let id = self.object_id()?;
        registry::objects().get(id).map(|object| object.payload.clone())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.slot.state.lock();
        f.debug_struct("Value")
            .field("handle", &state.handle)
            .field("context", &self.slot.context_id)
            .field("weak", &state.weak)
            .finish()
    }
}
