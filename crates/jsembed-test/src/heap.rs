//! Object heap of the test engine
//!
//! Values are plain Rust enums; objects live in one table keyed by an
//! integer reference and are collected by mark and sweep from the handle
//! table and the context globals.

use std::fmt;
use std::sync::Arc;

use jsembed_sdk::{FunctionTarget, MethodId, ObjectId, ValueKind};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value as JsonValue;

use crate::script::Scope;

/// Result of any script-level operation; `Err` carries the exception message
pub type ScriptResult<T = JsVal> = Result<T, String>;

/// Native function body: `(scope, this, args)`
pub type NativeFn = Arc<dyn Fn(&mut Scope<'_>, JsVal, Vec<JsVal>) -> ScriptResult + Send + Sync>;

/// Reference to a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(pub(crate) u64);

/// A script value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum JsVal {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Bool(bool),
    /// Number
    Number(f64),
    /// String
    Str(String),
    /// Object reference
    Obj(ObjRef),
}

impl JsVal {
    /// The number, if this is one
    pub fn as_number(&self) -> Option<f64> {
        match self {
            JsVal::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The string, if this is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsVal::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The object reference, if this is an object
    pub fn as_obj(&self) -> Option<ObjRef> {
        match self {
            JsVal::Obj(r) => Some(*r),
            _ => None,
        }
    }

    /// `undefined` or `null`
    pub fn is_nullish(&self) -> bool {
        matches!(self, JsVal::Undefined | JsVal::Null)
    }
}

impl From<f64> for JsVal {
    fn from(n: f64) -> Self {
        JsVal::Number(n)
    }
}

impl From<i32> for JsVal {
    fn from(n: i32) -> Self {
        JsVal::Number(f64::from(n))
    }
}

impl From<bool> for JsVal {
    fn from(b: bool) -> Self {
        JsVal::Bool(b)
    }
}

impl From<&str> for JsVal {
    fn from(s: &str) -> Self {
        JsVal::Str(s.to_string())
    }
}

impl From<String> for JsVal {
    fn from(s: String) -> Self {
        JsVal::Str(s)
    }
}

#[derive(Clone)]
pub(crate) enum Callable {
    /// Host function created through the engine API
    Host(FunctionTarget),
    /// Template method, dispatched on the receiver's object id
    Method(MethodId),
    /// Class constructor of a template
    Class(u64),
    /// Function implemented by a test script
    Native(NativeFn),
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Host(target) => f.debug_tuple("Host").field(target).finish(),
            Callable::Method(id) => f.debug_tuple("Method").field(id).finish(),
            Callable::Class(template) => f.debug_tuple("Class").field(template).finish(),
            Callable::Native(_) => f.write_str("Native"),
        }
    }
}

#[derive(Debug)]
pub(crate) enum ObjKind {
    Plain,
    Array(Vec<JsVal>),
    Function(Callable),
    /// `Uint8Array`; the boxed slice never moves while the object lives
    Bytes(Box<[u8]>),
    ArrayBuffer,
    DataView,
    Date,
    Map,
    MapIterator,
    Set,
    SetIterator,
    Promise,
    RegExp,
}

impl ObjKind {
    pub(crate) fn builtin(kind: ValueKind) -> Self {
        match kind {
            ValueKind::ArrayBuffer => ObjKind::ArrayBuffer,
            ValueKind::DataView => ObjKind::DataView,
            ValueKind::Date => ObjKind::Date,
            ValueKind::Map => ObjKind::Map,
            ValueKind::MapIterator => ObjKind::MapIterator,
            ValueKind::Promise => ObjKind::Promise,
            ValueKind::RegExp => ObjKind::RegExp,
            ValueKind::Set => ObjKind::Set,
            ValueKind::SetIterator => ObjKind::SetIterator,
            ValueKind::TypedArray => ObjKind::Bytes(Box::default()),
            ValueKind::Function => ObjKind::Function(Callable::Native(Arc::new(|_, _, _| Ok(JsVal::Undefined)))),
            ValueKind::Array => ObjKind::Array(Vec::new()),
        }
    }

    fn is(&self, kind: ValueKind) -> bool {
        matches!(
            (self, kind),
            (ObjKind::ArrayBuffer, ValueKind::ArrayBuffer)
                | (ObjKind::DataView, ValueKind::DataView)
                | (ObjKind::Date, ValueKind::Date)
                | (ObjKind::Map, ValueKind::Map)
                | (ObjKind::MapIterator, ValueKind::MapIterator)
                | (ObjKind::Promise, ValueKind::Promise)
                | (ObjKind::RegExp, ValueKind::RegExp)
                | (ObjKind::Set, ValueKind::Set)
                | (ObjKind::SetIterator, ValueKind::SetIterator)
                | (ObjKind::Bytes(_), ValueKind::TypedArray)
                | (ObjKind::Function(_), ValueKind::Function)
                | (ObjKind::Array(_), ValueKind::Array)
        )
    }
}

#[derive(Debug)]
pub(crate) struct HeapObject {
    pub(crate) kind: ObjKind,
    pub(crate) props: Vec<(String, JsVal)>,
    /// Template the object was instantiated from
    pub(crate) template: Option<u64>,
    /// Host object id stored in the internal field
    pub(crate) internal: Option<ObjectId>,
}

impl HeapObject {
    pub(crate) fn new(kind: ObjKind) -> Self {
        Self {
            kind,
            props: Vec::new(),
            template: None,
            internal: None,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Heap {
    next: u64,
    objects: FxHashMap<u64, HeapObject>,
}

impl Heap {
    pub(crate) fn alloc(&mut self, object: HeapObject) -> ObjRef {
        self.next += 1;
        self.objects.insert(self.next, object);
        ObjRef(self.next)
    }

    pub(crate) fn get(&self, r: ObjRef) -> Option<&HeapObject> {
        self.objects.get(&r.0)
    }

    pub(crate) fn get_mut(&mut self, r: ObjRef) -> Option<&mut HeapObject> {
        self.objects.get_mut(&r.0)
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }

    pub(crate) fn own_property(&self, r: ObjRef, name: &str) -> Option<JsVal> {
        let object = self.get(r)?;
        if let ObjKind::Array(items) = &object.kind {
            if name == "length" {
                return Some(JsVal::Number(items.len() as f64));
            }
            if let Ok(index) = name.parse::<usize>() {
                return Some(items.get(index).cloned().unwrap_or_default());
            }
        }
        if let ObjKind::Bytes(bytes) = &object.kind {
            if name == "length" {
                return Some(JsVal::Number(bytes.len() as f64));
            }
        }
        object
            .props
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    }

    pub(crate) fn set_property(&mut self, r: ObjRef, name: &str, value: JsVal) -> ScriptResult<()> {
        let object = self
            .get_mut(r)
            .ok_or_else(|| "TypeError: object was collected".to_string())?;
        if let ObjKind::Array(items) = &mut object.kind {
            if let Ok(index) = name.parse::<usize>() {
                if index >= items.len() {
                    items.resize(index + 1, JsVal::Undefined);
                }
                items[index] = value;
                return Ok(());
            }
        }
        match object.props.iter_mut().find(|(key, _)| key == name) {
            Some((_, slot)) => *slot = value,
            None => object.props.push((name.to_string(), value)),
        }
        Ok(())
    }

    /// Enumerable own properties, array indices first
    pub(crate) fn own_entries(&self, r: ObjRef) -> ScriptResult<Vec<(String, JsVal)>> {
        let object = self
            .get(r)
            .ok_or_else(|| "TypeError: object was collected".to_string())?;
        let mut entries = Vec::new();
        match &object.kind {
            ObjKind::Array(items) => {
                entries.extend(items.iter().enumerate().map(|(i, v)| (i.to_string(), v.clone())));
            }
            ObjKind::Bytes(bytes) => {
                entries.extend(
                    bytes
                        .iter()
                        .enumerate()
                        .map(|(i, b)| (i.to_string(), JsVal::Number(f64::from(*b)))),
                );
            }
            _ => {}
        }
        entries.extend(object.props.iter().cloned());
        Ok(entries)
    }

    pub(crate) fn is_kind(&self, value: &JsVal, kind: ValueKind) -> bool {
        match value {
            JsVal::Obj(r) => self.get(*r).is_some_and(|object| object.kind.is(kind)),
            _ => false,
        }
    }

    pub(crate) fn callable(&self, value: &JsVal) -> Option<Callable> {
        match &self.get(value.as_obj()?)?.kind {
            ObjKind::Function(callable) => Some(callable.clone()),
            _ => None,
        }
    }

    /// `typeof`, except that arrays report "array"
    pub(crate) fn type_name(&self, value: &JsVal) -> &'static str {
        match value {
            JsVal::Undefined => "undefined",
            JsVal::Null => "null",
            JsVal::Bool(_) => "boolean",
            JsVal::Number(_) => "number",
            JsVal::Str(_) => "string",
            JsVal::Obj(r) => match self.get(*r).map(|object| &object.kind) {
                Some(ObjKind::Function(_)) => "function",
                Some(ObjKind::Array(_)) => "array",
                _ => "object",
            },
        }
    }

    pub(crate) fn from_json(&mut self, json: &JsonValue) -> JsVal {
        match json {
            JsonValue::Null => JsVal::Null,
            JsonValue::Bool(b) => JsVal::Bool(*b),
            JsonValue::Number(n) => JsVal::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => JsVal::Str(s.clone()),
            JsonValue::Array(items) => {
                let items = items.iter().map(|item| self.from_json(item)).collect();
                JsVal::Obj(self.alloc(HeapObject::new(ObjKind::Array(items))))
            }
            JsonValue::Object(map) => {
                let mut object = HeapObject::new(ObjKind::Plain);
                for (key, value) in map {
                    let value = self.from_json(value);
                    object.props.push((key.clone(), value));
                }
                JsVal::Obj(self.alloc(object))
            }
        }
    }

    /// `JSON.stringify`; `None` for values without a JSON form
    pub(crate) fn stringify(&self, value: &JsVal) -> ScriptResult<Option<String>> {
        let mut out = String::new();
        let mut path = Vec::new();
        if self.write_json(value, &mut out, &mut path)? {
            Ok(Some(out))
        } else {
            Ok(None)
        }
    }

    /// Call arguments as a JSON array
    pub(crate) fn stringify_args(&self, args: &[JsVal]) -> ScriptResult<String> {
        let mut out = String::from("[");
        let mut path = Vec::new();
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            if !self.write_json(arg, &mut out, &mut path)? {
                out.push_str("null");
            }
        }
        out.push(']');
        Ok(out)
    }

    fn write_json(&self, value: &JsVal, out: &mut String, path: &mut Vec<ObjRef>) -> ScriptResult<bool> {
        match value {
            JsVal::Undefined => return Ok(false),
            JsVal::Null => out.push_str("null"),
            JsVal::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            JsVal::Number(n) => out.push_str(&number_json(*n)),
            JsVal::Str(s) => out.push_str(&JsonValue::String(s.clone()).to_string()),
            JsVal::Obj(r) => {
                let Some(object) = self.get(*r) else {
                    out.push_str("null");
                    return Ok(true);
                };
                if matches!(object.kind, ObjKind::Function(_)) {
                    return Ok(false);
                }
                if path.contains(r) {
                    return Err("TypeError: Converting circular structure to JSON".to_string());
                }
                path.push(*r);
                if let ObjKind::Array(items) = &object.kind {
                    out.push('[');
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            out.push(',');
                        }
                        if !self.write_json(item, out, path)? {
                            out.push_str("null");
                        }
                    }
                    out.push(']');
                } else {
                    out.push('{');
                    let mut first = true;
                    for (key, item) in self.own_entries(*r)? {
                        let mark = out.len();
                        if !first {
                            out.push(',');
                        }
                        out.push_str(&JsonValue::String(key).to_string());
                        out.push(':');
                        if self.write_json(&item, out, path)? {
                            first = false;
                        } else {
                            out.truncate(mark);
                        }
                    }
                    out.push('}');
                }
                path.pop();
            }
        }
        Ok(true)
    }

    /// Drop every object not reachable from `roots`
    pub(crate) fn sweep(&mut self, roots: impl IntoIterator<Item = ObjRef>) -> FxHashSet<u64> {
        let mut marked = FxHashSet::default();
        let mut stack: Vec<ObjRef> = roots.into_iter().collect();
        while let Some(r) = stack.pop() {
            if !marked.insert(r.0) {
                continue;
            }
            let Some(object) = self.get(r) else { continue };
            if let ObjKind::Array(items) = &object.kind {
                stack.extend(items.iter().filter_map(JsVal::as_obj));
            }
            stack.extend(object.props.iter().filter_map(|(_, value)| value.as_obj()));
        }
        self.objects.retain(|id, _| marked.contains(id));
        marked
    }
}

/// Number text as `JSON.stringify` writes it
pub(crate) fn number_json(n: f64) -> String {
    if !n.is_finite() {
        "null".to_string()
    } else if n.fract() == 0.0 && n.abs() < 9.0e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_json() {
        assert_eq!(number_json(42.0), "42");
        assert_eq!(number_json(-0.0), "0");
        assert_eq!(number_json(2.5), "2.5");
        assert_eq!(number_json(f64::NAN), "null");
    }

    #[test]
    fn test_json_round_trip_of_nested_value() {
        let mut heap = Heap::default();
        let source = json!({"a": [1, 2.5, null], "b": {"c": "x\"y"}});
        let value = heap.from_json(&source);
        let text = heap.stringify(&value).unwrap().unwrap();
        assert_eq!(serde_json::from_str::<JsonValue>(&text).unwrap(), source);
    }

    #[test]
    fn test_stringify_skips_undefined_members() {
        let mut heap = Heap::default();
        let mut object = HeapObject::new(ObjKind::Plain);
        object.props.push(("a".to_string(), JsVal::Undefined));
        object.props.push(("b".to_string(), JsVal::from(1)));
        let r = heap.alloc(object);
        let array = heap.alloc(HeapObject::new(ObjKind::Array(vec![JsVal::Undefined])));

        assert_eq!(heap.stringify(&JsVal::Obj(r)).unwrap().unwrap(), r#"{"b":1}"#);
        assert_eq!(heap.stringify(&JsVal::Obj(array)).unwrap().unwrap(), "[null]");
        assert_eq!(heap.stringify(&JsVal::Undefined).unwrap(), None);
    }

    #[test]
    fn test_stringify_rejects_cycles() {
        let mut heap = Heap::default();
        let r = heap.alloc(HeapObject::new(ObjKind::Plain));
        heap.set_property(r, "self", JsVal::Obj(r)).unwrap();
        let err = heap.stringify(&JsVal::Obj(r)).unwrap_err();
        assert!(err.contains("circular"));
    }

    #[test]
    fn test_sweep_keeps_reachable_objects() {
        let mut heap = Heap::default();
        let child = heap.alloc(HeapObject::new(ObjKind::Plain));
        let root = heap.alloc(HeapObject::new(ObjKind::Array(vec![JsVal::Obj(child)])));
        let orphan = heap.alloc(HeapObject::new(ObjKind::Plain));

        heap.sweep([root]);
        assert!(heap.get(root).is_some());
        assert!(heap.get(child).is_some());
        assert!(heap.get(orphan).is_none());
    }
}
