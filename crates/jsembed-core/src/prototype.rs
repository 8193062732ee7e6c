//! Prototypes and wrapped objects
//!
//! A [`Prototype`] is a named engine template owned by one context. Host
//! objects become script objects by instantiating a prototype (or wrapping
//! an existing engine object with one); each gets an [`ObjectId`] in the
//! global registry, which is all the engine ever sees of the host state.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use jsembed_sdk::{
    ContextHandle, ContextId, Engine, EngineResult, Loc, MethodId, ObjectId, RawHandle, TemplateHandle,
};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::context::{Context, ContextInner};
use crate::error::{BridgeError, BridgeResult};
use crate::fatal;
use crate::function::{CallbackResult, Constructor, Method, ObjectHooks, Payload};
use crate::registry::{self, WrappedObject};
use crate::value::Value;

struct PrototypeInner {
    name: String,
    context: Weak<ContextInner>,
    context_id: ContextId,
    template: TemplateHandle,
    constructor: Option<Constructor>,
    is_class: bool,
    methods: RwLock<FxHashMap<MethodId, (String, Method)>>,
}

/// Named template of one context
#[derive(Clone)]
pub struct Prototype {
    inner: Arc<PrototypeInner>,
}

impl Prototype {
    /// Create the engine template; a class template when `constructor` is set
    pub(crate) fn create(ctx: &Arc<ContextInner>, name: &str, constructor: Option<Constructor>) -> BridgeResult<Self> {
        let is_class = constructor.is_some();
        let template = {
            let engine_ctx = ctx.live_handle();
            let _entry = ctx.enter();
            if is_class {
                ctx.engine().create_class_template(engine_ctx, name)
            } else {
                ctx.engine().create_object_template(engine_ctx)
            }
        }
        .map_err(|err| BridgeError::Prototype {
            name: name.to_string(),
            message: err.into_message(),
        })?;
        tracing::debug!(context = %ctx.id(), prototype = name, is_class, "prototype created");
        Ok(Self {
            inner: Arc::new(PrototypeInner {
                name: name.to_string(),
                context: Arc::downgrade(ctx),
                context_id: ctx.id(),
                template,
                constructor,
                is_class,
                methods: RwLock::new(FxHashMap::default()),
            }),
        })
    }

    /// Prototype name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// True for class prototypes
    pub fn is_class(&self) -> bool {
        self.inner.is_class
    }

    /// Id of the owning context
    pub fn context_id(&self) -> ContextId {
        self.inner.context_id
    }

    /// The owning context, while alive
    pub fn context(&self) -> Option<Context> {
        self.inner.context.upgrade().map(Context::from_inner)
    }

    /// True when both handles name the same prototype
    pub fn ptr_eq(&self, other: &Prototype) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn owner(&self) -> Arc<ContextInner> {
        match self.inner.context.upgrade() {
            Some(ctx) => ctx,
            None => panic!("Context is uninitialized."),
        }
    }

    /// Add a method callable on every instance.
    ///
    /// Adding a name again replaces its method. A different name whose hash
    /// equals an existing method's is rejected.
    pub fn add_method(
        &self,
        name: &str,
        method: impl Fn(&Context, &Payload, &Loc, &[Value]) -> CallbackResult + Send + Sync + 'static,
    ) -> BridgeResult<()> {
        let id = MethodId::of(name);
        if let Some((existing, _)) = self.inner.methods.read().get(&id) {
            if existing != name {
                return Err(BridgeError::MethodCollision {
                    prototype: self.inner.name.clone(),
                    name: name.to_string(),
                    existing: existing.clone(),
                    id,
                });
            }
        }

        let ctx = self.owner();
        {
            let engine_ctx = ctx.live_handle();
            let _entry = ctx.enter();
            ctx.engine().add_method(engine_ctx, self.inner.template, name, id)?;
        }
        self.inner
            .methods
            .write()
            .insert(id, (name.to_string(), Arc::new(method)));
        Ok(())
    }

    /// Method registered under `id`, with its name
    pub(crate) fn method(&self, id: MethodId) -> Option<(String, Method)> {
        self.inner.methods.read().get(&id).cloned()
    }

    pub(crate) fn constructor(&self) -> Option<Constructor> {
        self.inner.constructor.clone()
    }

    /// Number of registered methods
    pub fn method_count(&self) -> usize {
        self.inner.methods.read().len()
    }

    /// The engine constructor function of a class prototype
    pub fn class_constructor(&self) -> BridgeResult<Value> {
        if !self.inner.is_class {
            return Err(BridgeError::Prototype {
                name: self.inner.name.clone(),
                message: "not a class prototype".to_string(),
            });
        }
        let ctx = self.owner();
        let handle = {
            let engine_ctx = ctx.live_handle();
            let _entry = ctx.enter();
            ctx.engine().class_constructor(engine_ctx, self.inner.template)?
        };
        Ok(ctx.new_value(handle))
    }

    /// Create a new engine object backed by `payload`
    pub fn instantiate<T: Any + Send + Sync>(&self, payload: T, hooks: ObjectHooks) -> BridgeResult<Value> {
        let ctx = self.owner();
        let template = self.inner.template;
        self.register(&ctx, Arc::new(payload), hooks, |engine, engine_ctx, id| {
            engine.instantiate(engine_ctx, template, id)
        })
    }

    fn register(
        &self,
        ctx: &Arc<ContextInner>,
        payload: Payload,
        hooks: ObjectHooks,
        create: impl FnOnce(&dyn Engine, ContextHandle, ObjectId) -> EngineResult<RawHandle>,
    ) -> BridgeResult<Value> {
        let objects = registry::objects();
        let id = objects.reserve_id();
        let handle = {
            let engine_ctx = ctx.live_handle();
            let _entry = ctx.enter();
            create(ctx.engine(), engine_ctx, id)
        }
        .map_err(|err| BridgeError::Wrap(err.into_message()))?;

        let external = ctx.new_value(handle);
        objects.insert(Arc::new(WrappedObject::new(
            id,
            ctx,
            self.clone(),
            external.clone(),
            payload,
            hooks.getter,
            hooks.disposer,
        )));
        tracing::debug!(object = %id, context = %ctx.id(), prototype = %self.inner.name, "wrapped object registered");
        Ok(external)
    }
}

impl Value {
    /// Attach `payload` to this engine object through `prototype`
    pub fn wrap<T: Any + Send + Sync>(&self, prototype: &Prototype, payload: T, hooks: ObjectHooks) -> BridgeResult<Value> {
        let (ctx, instance) = self.live();
        if prototype.context_id() != ctx.id() {
            fatal::corrupt(format!(
                "prototype '{}' of {} used to wrap a value of {}",
                prototype.name(),
                prototype.context_id(),
                ctx.id()
            ));
        }
        prototype.register(&ctx, Arc::new(payload), hooks, |engine, engine_ctx, id| {
            engine.wrap_instance(engine_ctx, instance, id)
        })
    }
}

impl fmt::Debug for Prototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prototype")
            .field("name", &self.inner.name)
            .field("context", &self.inner.context_id)
            .field("is_class", &self.inner.is_class)
            .finish()
    }
}
