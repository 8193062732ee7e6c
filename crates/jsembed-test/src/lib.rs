//! jsembed test engine
//!
//! [`TestEngine`] implements [`jsembed_sdk::Engine`] entirely in Rust so the
//! bridge can be exercised without a native engine. It models what the
//! bridge relies on: persistent and weak handles, templates with internal
//! object ids, named property interception, termination and finalization.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod engine;
mod heap;
mod script;

pub use engine::{EngineEvent, TestEngine, TERMINATED};
pub use heap::{JsVal, NativeFn, ObjRef, ScriptResult};
pub use script::{Scope, ScriptFn};
