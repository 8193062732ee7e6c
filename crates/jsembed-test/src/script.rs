//! Script execution: [`Scope`] and the expression evaluator
//!
//! The evaluator understands what the bridge itself generates plus simple
//! test snippets:
//! - JSON literals and `undefined`
//! - global names, member access (`a.b`) and calls (`f(x, y)`, `a.b(x)`)
//! - `new Name(args)`
//! - the `(function() { return EXPR; })()` wrapper
//! - `;`-separated sequences, whose value is the last expression
//!
//! Anything else is written as a closure with [`TestEngine::define_script`].

use std::sync::Arc;

use jsembed_sdk::{ContextHandle, ContextId, FunctionTarget, HostBridge, HostCall, HostReturn, Loc, ScriptOrigin, ValueKind};

use crate::engine::{Interrupt, TestEngine, TERMINATED};
use crate::heap::{Callable, HeapObject, JsVal, ObjKind, ScriptResult};

/// Closure standing in for the source text of a script
pub type ScriptFn = Arc<dyn Fn(&mut Scope<'_>) -> ScriptResult + Send + Sync>;

const IIFE_OPEN: &str = "(function() { return ";
const IIFE_CLOSE: &str = "})()";

/// Execution scope of one script entry
pub struct Scope<'e> {
    engine: &'e TestEngine,
    context: ContextHandle,
    from: Loc,
    interrupt: Arc<Interrupt>,
}

impl<'e> Scope<'e> {
    pub(crate) fn new(
        engine: &'e TestEngine,
        context: ContextHandle,
        origin: Option<ScriptOrigin<'_>>,
        interrupt: Arc<Interrupt>,
    ) -> Self {
        let from = match origin {
            Some(origin) => Loc::new("", origin.filename, origin.line + 1, origin.column + 1),
            None => Loc::default(),
        };
        Self {
            engine,
            context,
            from,
            interrupt,
        }
    }

    /// The script location reported to host callbacks
    pub fn location(&self) -> &Loc {
        &self.from
    }

    /// Fail with the termination exception once termination was requested
    pub fn check_interrupt(&self) -> ScriptResult<()> {
        if self.interrupt.is_terminating() {
            Err(TERMINATED.to_string())
        } else {
            Ok(())
        }
    }

    /// Host id of the running context
    pub fn context_id(&self) -> ScriptResult<ContextId> {
        Ok(self.bridge()?.0)
    }

    fn bridge(&self) -> ScriptResult<(ContextId, Arc<dyn HostBridge>)> {
        let state = self.engine.state.lock();
        state
            .contexts
            .get(&self.context.as_raw())
            .map(|ctx| (ctx.id, ctx.bridge.clone()))
            .ok_or_else(|| "ReferenceError: context is released".to_string())
    }

    /// The global object
    pub fn global_object(&self) -> ScriptResult {
        let state = self.engine.state.lock();
        state
            .contexts
            .get(&self.context.as_raw())
            .map(|ctx| JsVal::Obj(ctx.global))
            .ok_or_else(|| "ReferenceError: context is released".to_string())
    }

    /// Resolve a global name
    pub fn lookup(&mut self, name: &str) -> ScriptResult {
        let global = self.global_object()?;
        let r = global.as_obj().ok_or_else(|| "TypeError: no global object".to_string())?;
        self.engine
            .state
            .lock()
            .heap
            .own_property(r, name)
            .ok_or_else(|| format!("ReferenceError: {} is not defined", name))
    }

    /// Define a global name
    pub fn set_global(&mut self, name: &str, value: JsVal) -> ScriptResult<()> {
        let global = self.global_object()?;
        self.set(&global, name, value)
    }

    /// Property read, consulting the host getter of wrapped objects first
    pub fn get(&mut self, target: &JsVal, name: &str) -> ScriptResult {
        self.check_interrupt()?;
        let r = match target {
            JsVal::Obj(r) => *r,
            JsVal::Undefined | JsVal::Null => {
                return Err(format!(
                    "TypeError: Cannot read properties of {} (reading '{}')",
                    self.engine.state.lock().heap.type_name(target),
                    name
                ))
            }
            JsVal::Str(s) if name == "length" => return Ok(JsVal::Number(s.chars().count() as f64)),
            _ => return Ok(JsVal::Undefined),
        };

        let (internal, template) = {
            let state = self.engine.state.lock();
            let object = state
                .heap
                .get(r)
                .ok_or_else(|| "TypeError: object was collected".to_string())?;
            (object.internal, object.template)
        };
        if let Some(object) = internal {
            let (_, bridge) = self.bridge()?;
            let intercepted = bridge.property_get(object, name);
            self.rethrow()?;
            if let Some(handle) = intercepted {
                return self.engine.read_handle(self.context, handle);
            }
        }

        let mut state = self.engine.state.lock();
        if let Some(value) = state.heap.own_property(r, name) {
            return Ok(value);
        }
        let method = template.and_then(|template| {
            state
                .templates
                .get(&template)
                .and_then(|t| t.methods.iter().find(|(method, _)| method == name).map(|(_, id)| *id))
        });
        Ok(match method {
            Some(id) => JsVal::Obj(
                state
                    .heap
                    .alloc(HeapObject::new(ObjKind::Function(Callable::Method(id)))),
            ),
            None => JsVal::Undefined,
        })
    }

    /// Property write
    pub fn set(&mut self, target: &JsVal, name: &str, value: JsVal) -> ScriptResult<()> {
        let r = target
            .as_obj()
            .ok_or_else(|| format!("TypeError: Cannot set property '{}' of a primitive", name))?;
        self.engine.state.lock().heap.set_property(r, name, value)
    }

    /// Call `function` with `this` and `args`
    pub fn call(&mut self, function: &JsVal, this: JsVal, args: Vec<JsVal>) -> ScriptResult {
        self.check_interrupt()?;
        let callable = self.engine.state.lock().heap.callable(function);
        let Some(callable) = callable else {
            return Err(format!(
                "TypeError: {} is not a function",
                self.engine.state.lock().heap.type_name(function)
            ));
        };

        match callable {
            Callable::Native(body) => body(self, this, args),
            Callable::Host(FunctionTarget::Json { context, name }) => {
                let argv = self.engine.state.lock().heap.stringify_args(&args)?;
                let (_, bridge) = self.bridge()?;
                let returned = bridge.dispatch(HostCall::Json {
                    context,
                    name: &name,
                    args: &argv,
                });
                self.settle(returned)
            }
            Callable::Host(FunctionTarget::Raw { context, name }) => {
                let argv = self.mint_all(args);
                let (_, bridge) = self.bridge()?;
                let returned = bridge.dispatch(HostCall::Raw {
                    context,
                    name: &name,
                    from: self.from.clone(),
                    args: &argv,
                });
                self.settle(returned)
            }
            Callable::Method(method) => {
                let object = this.as_obj().and_then(|r| {
                    self.engine
                        .state
                        .lock()
                        .heap
                        .get(r)
                        .and_then(|object| object.internal)
                });
                let Some(object) = object else {
                    return Err("TypeError: Illegal invocation".to_string());
                };
                let argv = self.mint_all(args);
                let (_, bridge) = self.bridge()?;
                let returned = bridge.dispatch(HostCall::Method {
                    object,
                    method,
                    from: self.from.clone(),
                    args: &argv,
                });
                self.settle(returned)
            }
            Callable::Class(_) => Err("TypeError: Class constructor cannot be invoked without 'new'".to_string()),
        }
    }

    /// Call a global function
    pub fn call_global(&mut self, name: &str, args: Vec<JsVal>) -> ScriptResult {
        let function = self.lookup(name)?;
        self.call(&function, JsVal::Undefined, args)
    }

    /// Call `target.name(args)`
    pub fn call_method(&mut self, target: &JsVal, name: &str, args: Vec<JsVal>) -> ScriptResult {
        let function = self.get(target, name)?;
        self.call(&function, target.clone(), args)
    }

    /// `new constructor(args)`
    pub fn construct(&mut self, constructor: &JsVal, args: Vec<JsVal>) -> ScriptResult {
        self.check_interrupt()?;
        let callable = self.engine.state.lock().heap.callable(constructor);
        let template = match callable {
            Some(Callable::Class(template)) => template,
            Some(Callable::Native(body)) => {
                let instance = self.object(Vec::new());
                let returned = body(self, instance.clone(), args)?;
                return Ok(if returned.as_obj().is_some() { returned } else { instance });
            }
            _ => return Err("TypeError: value is not a constructor".to_string()),
        };

        let (prototype, instance) = {
            let mut state = self.engine.state.lock();
            let prototype = state
                .templates
                .get(&template)
                .and_then(|t| t.class_name.clone())
                .ok_or_else(|| "TypeError: class template is released".to_string())?;
            let mut instance = HeapObject::new(ObjKind::Plain);
            instance.template = Some(template);
            (prototype, JsVal::Obj(state.heap.alloc(instance)))
        };
        let this = self.engine.mint(self.context, instance.clone());
        let argv = self.mint_all(args);
        let (context, bridge) = self.bridge()?;
        let returned = bridge.dispatch(HostCall::Construct {
            context,
            prototype: &prototype,
            from: self.from.clone(),
            this,
            args: &argv,
        });
        let returned = self.settle(returned)?;
        Ok(if returned.as_obj().is_some() { returned } else { instance })
    }

    /// A native function object
    pub fn function(
        &mut self,
        body: impl Fn(&mut Scope<'_>, JsVal, Vec<JsVal>) -> ScriptResult + Send + Sync + 'static,
    ) -> JsVal {
        self.alloc(ObjKind::Function(Callable::Native(Arc::new(body))))
    }

    /// A plain object with `props`
    pub fn object<'a>(&mut self, props: impl IntoIterator<Item = (&'a str, JsVal)>) -> JsVal {
        let mut object = HeapObject::new(ObjKind::Plain);
        object.props = props.into_iter().map(|(key, value)| (key.to_string(), value)).collect();
        JsVal::Obj(self.engine.state.lock().heap.alloc(object))
    }

    /// An array of `items`
    pub fn array(&mut self, items: Vec<JsVal>) -> JsVal {
        self.alloc(ObjKind::Array(items))
    }

    /// A `Uint8Array` holding a copy of `bytes`
    pub fn uint8_array(&mut self, bytes: &[u8]) -> JsVal {
        self.alloc(ObjKind::Bytes(bytes.into()))
    }

    /// An empty object of a built-in kind
    pub fn builtin(&mut self, kind: ValueKind) -> JsVal {
        self.alloc(ObjKind::builtin(kind))
    }

    /// `JSON.parse`
    pub fn parse_json(&mut self, json: &str) -> ScriptResult {
        let json: serde_json::Value = serde_json::from_str(json).map_err(|err| format!("SyntaxError: {}", err))?;
        Ok(self.engine.state.lock().heap.from_json(&json))
    }

    /// `JSON.stringify`; `None` for values without a JSON form
    pub fn stringify(&self, value: &JsVal) -> ScriptResult<Option<String>> {
        self.engine.state.lock().heap.stringify(value)
    }

    /// Evaluate source text
    pub fn eval(&mut self, source: &str) -> ScriptResult {
        if let Some(script) = self.engine.script(source) {
            return script(self);
        }
        let mut parser = Parser { src: source, pos: 0 };
        let mut value = JsVal::Undefined;
        loop {
            parser.skip_ws();
            if parser.at_end() {
                break;
            }
            value = parser.expr(self)?;
            if !parser.eat(";") {
                break;
            }
        }
        parser.skip_ws();
        if !parser.at_end() {
            return Err(parser.unexpected());
        }
        Ok(value)
    }

    fn alloc(&mut self, kind: ObjKind) -> JsVal {
        JsVal::Obj(self.engine.state.lock().heap.alloc(HeapObject::new(kind)))
    }

    fn mint_all(&self, args: Vec<JsVal>) -> Vec<jsembed_sdk::RawHandle> {
        args.into_iter()
            .map(|arg| self.engine.mint(self.context, arg))
            .collect()
    }

    fn rethrow(&self) -> ScriptResult<()> {
        match self.engine.take_pending(self.context) {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }

    /// Resume script after a host call
    fn settle(&mut self, returned: HostReturn) -> ScriptResult {
        self.rethrow()?;
        match returned {
            HostReturn::Undefined => Ok(JsVal::Undefined),
            HostReturn::Json(json) => self.parse_json(&json),
            HostReturn::Handle(handle) => self.engine.read_handle(self.context, handle),
        }
    }
}

struct Parser<'s> {
    src: &'s str,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn rest(&self) -> &'s str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn peek(&mut self, token: &str) -> bool {
        self.skip_ws();
        self.rest().starts_with(token)
    }

    fn eat(&mut self, token: &str) -> bool {
        let found = self.peek(token);
        if found {
            self.pos += token.len();
        }
        found
    }

    fn expect(&mut self, token: &str) -> ScriptResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&self) -> String {
        match self.rest().chars().next() {
            Some(c) => format!("SyntaxError: Unexpected token '{}'", c),
            None => "SyntaxError: Unexpected end of input".to_string(),
        }
    }

    fn ident(&mut self) -> Option<&'s str> {
        self.skip_ws();
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
            .unwrap_or(rest.len());
        if len == 0 || rest.as_bytes()[0].is_ascii_digit() {
            return None;
        }
        self.pos += len;
        Some(&rest[..len])
    }

    fn expr(&mut self, scope: &mut Scope<'_>) -> ScriptResult {
        scope.check_interrupt()?;
        if self.eat(IIFE_OPEN) {
            let value = self.expr(scope)?;
            self.eat(";");
            self.expect(IIFE_CLOSE)?;
            return Ok(value);
        }
        match self.rest().chars().next() {
            Some('"' | '[' | '{' | '-') => return self.literal(scope),
            Some(c) if c.is_ascii_digit() => return self.literal(scope),
            _ => {}
        }

        let start = self.pos;
        let mut value = match self.ident() {
            Some("true" | "false" | "null") => {
                self.pos = start;
                return self.literal(scope);
            }
            Some("undefined") => return Ok(JsVal::Undefined),
            Some("new") => {
                let name = self.ident().ok_or_else(|| self.unexpected())?;
                let constructor = scope.lookup(name)?;
                let args = if self.peek("(") { self.args(scope)? } else { Vec::new() };
                scope.construct(&constructor, args)?
            }
            Some(name) => scope.lookup(name)?,
            None => return Err(self.unexpected()),
        };

        let mut this = JsVal::Undefined;
        loop {
            if self.eat(".") {
                let field = self.ident().ok_or_else(|| self.unexpected())?;
                let target = std::mem::take(&mut value);
                value = scope.get(&target, field)?;
                this = target;
            } else if self.peek("(") {
                let args = self.args(scope)?;
                value = scope.call(&value, std::mem::take(&mut this), args)?;
            } else {
                break;
            }
        }
        Ok(value)
    }

    fn args(&mut self, scope: &mut Scope<'_>) -> ScriptResult<Vec<JsVal>> {
        self.expect("(")?;
        let mut args = Vec::new();
        if self.eat(")") {
            return Ok(args);
        }
        loop {
            args.push(self.expr(scope)?);
            if self.eat(")") {
                return Ok(args);
            }
            self.expect(",")?;
        }
    }

    fn literal(&mut self, scope: &mut Scope<'_>) -> ScriptResult {
        let rest = self.rest();
        let len = literal_len(rest);
        self.pos += len;
        scope.parse_json(&rest[..len])
    }
}

/// Byte length of the JSON literal at the start of `text`
fn literal_len(text: &str) -> usize {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in text.as_bytes().iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
                if depth == 0 {
                    return i + 1;
                }
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                if depth == 0 {
                    return i;
                }
                depth -= 1;
                if depth == 0 {
                    return i + 1;
                }
            }
            b',' | b')' | b';' | b' ' | b'\t' | b'\n' | b'\r' if depth == 0 => return i,
            _ => {}
        }
    }
    text.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_len() {
        assert_eq!(literal_len("21)"), 2);
        assert_eq!(literal_len(r#""a,b", 1"#), 5);
        assert_eq!(literal_len(r#"{"a": [1, {"b": "}"}]}; x"#), 22);
        assert_eq!(literal_len("-1.5e3"), 6);
        assert_eq!(literal_len("true;"), 4);
    }

    #[test]
    fn test_ident() {
        let mut parser = Parser { src: "  $a_1.b", pos: 0 };
        assert_eq!(parser.ident(), Some("$a_1"));
        assert!(parser.eat("."));
        assert_eq!(parser.ident(), Some("b"));
        assert!(parser.at_end());

        let mut parser = Parser { src: "1abc", pos: 0 };
        assert_eq!(parser.ident(), None);
    }
}
