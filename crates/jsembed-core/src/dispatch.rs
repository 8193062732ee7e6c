//! Engine → host dispatch
//!
//! [`Bridge`] is the [`HostBridge`] every context hands to the engine. Each
//! call shape resolves its target through the global registries, gives up
//! the isolate pin, runs the host callback and validates what it returned.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use jsembed_sdk::{ContextId, HostBridge, HostCall, HostReturn, Loc, MethodId, ObjectId, RawHandle};
use serde_json::Value as JsonValue;

use crate::context::{Context, ContextInner};
use crate::fatal;
use crate::function::CallbackResult;
use crate::registry;
use crate::value::Value;

/// Host side of the engine callback protocol
pub(crate) struct Bridge;

impl HostBridge for Bridge {
    fn dispatch(&self, call: HostCall<'_>) -> HostReturn {
        tracing::trace!(call = %call.describe(), "dispatch");
        match call {
            HostCall::Json { context, name, args } => call_json(context, name, args),
            HostCall::Raw {
                context,
                name,
                from,
                args,
            } => call_raw(context, name, &from, args),
            HostCall::Method {
                object,
                method,
                from,
                args,
            } => call_method(object, method, &from, args),
            HostCall::Construct {
                context,
                prototype,
                from,
                this,
                args,
            } => construct(context, prototype, &from, this, args),
        }
    }

    fn property_get(&self, object: ObjectId, property: &str) -> Option<RawHandle> {
        let object = resolve_object(object);
        let getter = object.getter.clone()?;
        let ctx = owning_context(&object.context, object.id);

        let isolate = ctx.isolate().clone();
        let _suspended = isolate.suspend();
        let context = Context::from_inner(ctx.clone());
        match guarded(&ctx, property, || getter(&context, &object.payload, property)) {
            Ok(result) => settle(&ctx, property, result),
            Err(message) => {
                ctx.throw(&message);
                None
            }
        }
    }

    fn dispose(&self, object: ObjectId) {
        let Some(object) = registry::objects().get(object) else {
            tracing::debug!(object = %object, "dispose of an object already destroyed");
            return;
        };
        match object.context.upgrade() {
            Some(ctx) => {
                let isolate = ctx.isolate().clone();
                let _suspended = isolate.suspend();
                object.dispose(&ctx);
            }
            None => {
                registry::objects().remove(object.id);
                tracing::warn!(object = %object.id, context = %object.context_id, "dispose after context teardown");
            }
        }
    }
}

fn resolve_context(id: ContextId) -> Arc<ContextInner> {
    registry::contexts()
        .get(id)
        .unwrap_or_else(|| fatal::corrupt(format!("callback for unknown context {}", id)))
}

fn resolve_object(id: ObjectId) -> Arc<registry::WrappedObject> {
    registry::objects()
        .get(id)
        .unwrap_or_else(|| fatal::corrupt(format!("callback for unknown object {}", id)))
}

fn owning_context(context: &std::sync::Weak<ContextInner>, object: ObjectId) -> Arc<ContextInner> {
    context
        .upgrade()
        .unwrap_or_else(|| fatal::corrupt(format!("context of {} is gone", object)))
}

fn call_json(context: ContextId, name: &str, args: &str) -> HostReturn {
    let ctx = resolve_context(context);
    let function = ctx
        .function(name)
        .unwrap_or_else(|| fatal::corrupt(format!("json function '{}' is not registered in {}", name, context)));

    let isolate = ctx.isolate().clone();
    let _suspended = isolate.suspend();
    let argv: Vec<JsonValue> = match serde_json::from_str(args) {
        Ok(argv) => argv,
        Err(err) => {
            ctx.throw(&format!("invalid arguments for '{}': {}", name, err));
            return HostReturn::Undefined;
        }
    };
    match guarded(&ctx, name, || function(&argv)) {
        Ok(Some(result)) => HostReturn::Json(result.to_string()),
        Ok(None) => HostReturn::Undefined,
        Err(message) => {
            ctx.throw(&message);
            HostReturn::Undefined
        }
    }
}

fn call_raw(context: ContextId, name: &str, from: &Loc, args: &[RawHandle]) -> HostReturn {
    let ctx = resolve_context(context);
    let function = ctx
        .raw_function(name)
        .unwrap_or_else(|| fatal::corrupt(format!("raw function '{}' is not registered in {}", name, context)));
    invoke(&ctx, name, args, |context, argv| function(context, from, argv))
}

fn call_method(object: ObjectId, method: MethodId, from: &Loc, args: &[RawHandle]) -> HostReturn {
    let object = resolve_object(object);
    let ctx = owning_context(&object.context, object.id);
    let (name, function) = object.prototype.method(method).unwrap_or_else(|| {
        fatal::corrupt(format!(
            "method {} is not registered on prototype '{}'",
            method,
            object.prototype.name()
        ))
    });
    invoke(&ctx, &name, args, |context, argv| function(context, &object.payload, from, argv))
}

fn construct(context: ContextId, prototype: &str, from: &Loc, this: RawHandle, args: &[RawHandle]) -> HostReturn {
    let ctx = resolve_context(context);
    let proto = ctx
        .prototype(prototype)
        .unwrap_or_else(|| fatal::corrupt(format!("prototype '{}' is not registered in {}", prototype, context)));
    let Some(constructor) = proto.constructor() else {
        return HostReturn::Undefined;
    };

    let mut all = Vec::with_capacity(args.len() + 1);
    all.push(this);
    all.extend_from_slice(args);
    invoke(&ctx, prototype, &all, |context, argv| match argv.split_first() {
        Some((instance, rest)) => constructor(context, from, &proto, instance, rest),
        None => Ok(None),
    })
}

/// Run a handle-based callback with the isolate unpinned
fn invoke(
    ctx: &Arc<ContextInner>,
    what: &str,
    args: &[RawHandle],
    callback: impl FnOnce(&Context, &[Value]) -> CallbackResult,
) -> HostReturn {
    let isolate = ctx.isolate().clone();
    let _suspended = isolate.suspend();
    let argv: Vec<Value> = args.iter().map(|&handle| ctx.new_value(handle)).collect();
    let context = Context::from_inner(ctx.clone());
    match guarded(ctx, what, || callback(&context, &argv)) {
        Ok(result) => match settle(ctx, what, result) {
            Some(handle) => HostReturn::Handle(handle),
            None => HostReturn::Undefined,
        },
        Err(message) => {
            ctx.throw(&message);
            HostReturn::Undefined
        }
    }
}

/// Contain panics of host code according to the context options.
///
/// Bridge corruption always propagates.
fn guarded<R>(ctx: &ContextInner, what: &str, callback: impl FnOnce() -> R) -> Result<R, String> {
    if !ctx.options.catch_panics {
        return Ok(callback());
    }
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(result) => Ok(result),
        Err(payload) => {
            if fatal::is_corruption(&*payload) {
                panic::resume_unwind(payload);
            }
            let message = fatal::panic_message(&*payload);
            tracing::warn!(callback = what, panic = message, "host callback panicked");
            Err(format!("host callback '{}' panicked: {}", what, message))
        }
    }
}

/// Turn a callback result into what the engine receives
fn settle(ctx: &ContextInner, what: &str, result: CallbackResult) -> Option<RawHandle> {
    match result {
        Ok(Some(value)) => Some(value.settle_return(ctx, what)),
        Ok(None) => None,
        Err(err) => {
            ctx.throw(&err.to_string());
            None
        }
    }
}
