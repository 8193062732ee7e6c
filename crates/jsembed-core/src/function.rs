//! Host callback types
//!
//! Every host function reachable from script is one of these shapes. They
//! are stored behind `Arc` so dispatch can clone one out of its table and
//! release the table lock before invoking it.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use jsembed_sdk::Loc;
use rustc_hash::FxHashMap;
use serde_json::Value as JsonValue;

use crate::context::Context;
use crate::prototype::Prototype;
use crate::value::Value;

/// Opaque host state attached to a wrapped object
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Result of a raw callback: a value, nothing (`undefined`), or an error
/// thrown into script
pub type CallbackResult = anyhow::Result<Option<Value>>;

/// Function whose arguments and result cross as JSON
pub type Function = Arc<dyn Fn(&[JsonValue]) -> Option<JsonValue> + Send + Sync>;

/// Function receiving engine values
pub type RawFunction = Arc<dyn Fn(&Context, &Loc, &[Value]) -> CallbackResult + Send + Sync>;

/// Method of a prototype, called with the receiver's payload
pub type Method = Arc<dyn Fn(&Context, &Payload, &Loc, &[Value]) -> CallbackResult + Send + Sync>;

/// Constructor of a class prototype, called with the new instance as `this`
pub type Constructor = Arc<dyn Fn(&Context, &Loc, &Prototype, &Value, &[Value]) -> CallbackResult + Send + Sync>;

/// Named-property resolver of a wrapped object
pub type Getter = Arc<dyn Fn(&Context, &Payload, &str) -> CallbackResult + Send + Sync>;

/// Runs once when a wrapped object is destroyed
pub type Disposer = Arc<dyn Fn(Payload, &Value) -> anyhow::Result<()> + Send + Sync>;

/// Optional callbacks of a wrapped object
#[derive(Clone, Default)]
pub struct ObjectHooks {
    pub(crate) getter: Option<Getter>,
    pub(crate) disposer: Option<Disposer>,
}

impl ObjectHooks {
    /// No getter, no disposer
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve named properties through `getter`.
    ///
    /// Returning `Ok(None)` falls back to the object's own properties.
    pub fn getter(mut self, getter: impl Fn(&Context, &Payload, &str) -> CallbackResult + Send + Sync + 'static) -> Self {
        self.getter = Some(Arc::new(getter));
        self
    }

    /// Run `disposer` when the object is collected or its context destroyed
    pub fn disposer(mut self, disposer: impl Fn(Payload, &Value) -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        self.disposer = Some(Arc::new(disposer));
        self
    }
}

impl fmt::Debug for ObjectHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHooks")
            .field("getter", &self.getter.is_some())
            .field("disposer", &self.disposer.is_some())
            .finish()
    }
}

/// Name → callback table of a context
pub(crate) struct CallbackTable<F> {
    entries: FxHashMap<String, F>,
}

impl<F: Clone> CallbackTable<F> {
    pub(crate) fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
        }
    }

    /// Register a callback, replacing any previous one of the same name
    pub(crate) fn register(&mut self, name: impl Into<String>, callback: F) {
        self.entries.insert(name.into(), callback);
    }

    pub(crate) fn get(&self, name: &str) -> Option<F> {
        self.entries.get(name).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_table_register_and_get() {
        let mut table: CallbackTable<Function> = CallbackTable::new();
        table.register("answer", Arc::new(|_: &[JsonValue]| Some(JsonValue::from(42))) as Function);

        assert!(table.get("question").is_none());
        assert_eq!(table.len(), 1);

        let f = table.get("answer").unwrap();
        assert_eq!(f(&[]), Some(JsonValue::from(42)));
    }

    #[test]
    fn test_callback_table_replace_and_clear() {
        let mut table: CallbackTable<Function> = CallbackTable::new();
        table.register("f", Arc::new(|_: &[JsonValue]| None) as Function);
        table.register("f", Arc::new(|_: &[JsonValue]| Some(JsonValue::Bool(true))) as Function);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("f").unwrap()(&[]), Some(JsonValue::Bool(true)));

        table.clear();
        assert_eq!(table.len(), 0);
        assert!(table.get("f").is_none());
    }

    #[test]
    fn test_object_hooks_builder() {
        let hooks = ObjectHooks::new().disposer(|_, _| Ok(()));
        assert!(hooks.getter.is_none());
        assert!(hooks.disposer.is_some());
    }
}
