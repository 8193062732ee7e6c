//! jsembed - host bridge for an embedded JavaScript engine
//!
//! This crate sits between host code and an engine backend implementing
//! [`jsembed_sdk::Engine`]:
//! - [`Isolate`] / [`Context`]: engine lifecycle, script execution
//! - [`Value`]: context-bound handles to engine values
//! - [`Prototype`]: templates for exposing host objects to script
//! - host functions in JSON and raw (handle) flavours
//!
//! The engine refers to host state through integer ids only; the dispatch
//! bridge resolves them through process-wide registries and rejects any
//! identity violation as bridge corruption.
//!
//! # Example
//!
//! ```ignore
//! let isolate = Isolate::new(engine)?;
//! let ctx = Context::new(&isolate)?;
//! ctx.add_raw_func("double", |ctx, _from, args| {
//!     let n = args[0].to_double()?;
//!     Ok(Some(ctx.create_double(n * 2.0)?))
//! })?;
//! assert_eq!(ctx.run("double", &[json!(21)])?, Some(json!(42)));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod context;
mod convert;
mod dispatch;
mod error;
mod fatal;
mod function;
mod isolate;
mod options;
mod pin;
mod prototype;
mod registry;
mod value;

pub use context::Context;
pub use convert::{FromJs, Json, ToJs};
pub use error::{BridgeError, BridgeResult, ConversionError};
pub use function::{
    CallbackResult, Constructor, Disposer, Function, Getter, Method, ObjectHooks, Payload, RawFunction,
};
pub use isolate::Isolate;
pub use options::{ContextOptions, DisposeErrorHandler};
pub use prototype::Prototype;
pub use value::Value;

pub use jsembed_sdk::{
    ContextId, Engine, IsolateOptions, Loc, MethodId, ObjectId, RawHandle, ResourceLimits, ValueKind,
};
