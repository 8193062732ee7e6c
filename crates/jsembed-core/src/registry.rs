//! Process-wide registries
//!
//! The engine identifies host state by integer only, so two global tables
//! resolve those integers back:
//! - the context table: `ContextId` → context
//! - the wrapped-object table: `ObjectId` → wrapped object
//!
//! Ids are allocated under the table's lock, increase monotonically and are
//! never reused. No table lock is held while calling into the engine or into
//! host callbacks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use jsembed_sdk::{ContextId, ObjectId};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::context::ContextInner;
use crate::function::{Disposer, Getter, Payload};
use crate::prototype::Prototype;
use crate::value::Value;

static CONTEXTS: Lazy<ContextTable> = Lazy::new(ContextTable::new);
static OBJECTS: Lazy<ObjectRegistry> = Lazy::new(ObjectRegistry::new);

pub(crate) fn contexts() -> &'static ContextTable {
    &CONTEXTS
}

pub(crate) fn objects() -> &'static ObjectRegistry {
    &OBJECTS
}

// ============================================================================
// Context table
// ============================================================================

struct ContextSlots {
    next_id: u64,
    contexts: FxHashMap<ContextId, Weak<ContextInner>>,
}

/// Registry of live contexts
pub(crate) struct ContextTable {
    inner: RwLock<ContextSlots>,
}

impl ContextTable {
    fn new() -> Self {
        Self {
            inner: RwLock::new(ContextSlots {
                next_id: 1,
                contexts: FxHashMap::default(),
            }),
        }
    }

    /// Allocate the next context id
    pub(crate) fn reserve_id(&self) -> ContextId {
        let mut inner = self.inner.write();
        let id = ContextId::from_u64(inner.next_id);
        inner.next_id += 1;
        id
    }

    pub(crate) fn register(&self, context: &Arc<ContextInner>) {
        self.inner
            .write()
            .contexts
            .insert(context.id(), Arc::downgrade(context));
    }

    pub(crate) fn get(&self, id: ContextId) -> Option<Arc<ContextInner>> {
        self.inner.read().contexts.get(&id).and_then(Weak::upgrade)
    }

    pub(crate) fn remove(&self, id: ContextId) -> bool {
        self.inner.write().contexts.remove(&id).is_some()
    }
}

// ============================================================================
// Wrapped objects
// ============================================================================

/// A host object embedded into the engine
pub(crate) struct WrappedObject {
    pub(crate) id: ObjectId,
    pub(crate) context: Weak<ContextInner>,
    pub(crate) context_id: ContextId,
    pub(crate) prototype: Prototype,
    pub(crate) external: Value,
    pub(crate) payload: Payload,
    pub(crate) getter: Option<Getter>,
    pub(crate) disposer: Option<Disposer>,
    disposed: AtomicBool,
}

impl WrappedObject {
    pub(crate) fn new(
        id: ObjectId,
        context: &Arc<ContextInner>,
        prototype: Prototype,
        external: Value,
        payload: Payload,
        getter: Option<Getter>,
        disposer: Option<Disposer>,
    ) -> Self {
        Self {
            id,
            context: Arc::downgrade(context),
            context_id: context.id(),
            prototype,
            external,
            payload,
            getter,
            disposer,
            disposed: AtomicBool::new(false),
        }
    }

    /// Destroy the object: run the disposer, release the external value,
    /// drop the registry entry. Only the first call has any effect.
    pub(crate) fn dispose(&self, ctx: &ContextInner) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(disposer) = &self.disposer {
            if let Err(err) = disposer(self.payload.clone(), &self.external) {
                tracing::warn!(object = %self.id, prototype = self.prototype.name(), error = %err, "disposer failed");
                if let Some(handler) = &ctx.options.dispose_error_handler {
                    handler(self.id, &err);
                }
            }
        }
        if let Some(engine_ctx) = ctx.handle() {
            let _entry = ctx.enter();
            self.external.discard(ctx, engine_ctx);
        }
        objects().remove(self.id);
        tracing::debug!(object = %self.id, context = %self.context_id, "wrapped object disposed");
    }
}

struct ObjectSlots {
    next_id: u64,
    objects: FxHashMap<ObjectId, Arc<WrappedObject>>,
}

/// Registry of every wrapped object of every context
pub(crate) struct ObjectRegistry {
    inner: RwLock<ObjectSlots>,
}

impl ObjectRegistry {
    fn new() -> Self {
        Self {
            inner: RwLock::new(ObjectSlots {
                next_id: 1,
                objects: FxHashMap::default(),
            }),
        }
    }

    /// Allocate the next object id
    pub(crate) fn reserve_id(&self) -> ObjectId {
        let mut inner = self.inner.write();
        let id = ObjectId::from_u64(inner.next_id);
        inner.next_id += 1;
        id
    }

    pub(crate) fn insert(&self, object: Arc<WrappedObject>) {
        let previous = self.inner.write().objects.insert(object.id, object);
        debug_assert!(previous.is_none(), "object id registered twice");
    }

    pub(crate) fn get(&self, id: ObjectId) -> Option<Arc<WrappedObject>> {
        self.inner.read().objects.get(&id).cloned()
    }

    pub(crate) fn remove(&self, id: ObjectId) -> Option<Arc<WrappedObject>> {
        self.inner.write().objects.remove(&id)
    }

    /// Objects owned by a context, in id order
    pub(crate) fn owned_by(&self, context: ContextId) -> Vec<Arc<WrappedObject>> {
        let mut owned: Vec<_> = self
            .inner
            .read()
            .objects
            .values()
            .filter(|object| object.context_id == context)
            .cloned()
            .collect();
        owned.sort_by_key(|object| object.id);
        owned
    }

    /// Dispose every object owned by `ctx`; returns how many were disposed
    pub(crate) fn dispose_context(&self, ctx: &ContextInner) -> usize {
        let owned = self.owned_by(ctx.id());
        for object in &owned {
            object.dispose(ctx);
        }
        owned.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_ids_are_monotonic() {
        let table = ContextTable::new();
        let a = table.reserve_id();
        let b = table.reserve_id();
        assert!(b > a);
        assert!(table.get(a).is_none());
    }

    #[test]
    fn test_object_ids_are_monotonic() {
        let registry = ObjectRegistry::new();
        let ids: Vec<_> = (0..5).map(|_| registry.reserve_id()).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(registry.get(ids[0]).is_none());
    }

    #[test]
    fn test_concurrent_reservation_never_collides() {
        let registry = Arc::new(ObjectRegistry::new());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || (0..100).map(|_| registry.reserve_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<ObjectId> = threads.into_iter().flat_map(|t| t.join().unwrap()).collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
