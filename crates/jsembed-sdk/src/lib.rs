//! jsembed SDK - the engine service contract
//!
//! This crate holds the types shared between the host bridge (`jsembed-core`)
//! and a JavaScript engine backend:
//!
//! - opaque engine handles ([`RawHandle`], [`IsolateHandle`], [`ContextHandle`],
//!   [`TemplateHandle`])
//! - bridge identifiers ([`ContextId`], [`ObjectId`], [`MethodId`])
//! - the [`Engine`] trait a backend implements
//! - the [`HostBridge`] trait a backend calls back through
//!
//! A backend never sees host objects. Everything crossing the boundary is an
//! opaque handle, an integer identifier, or JSON text.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod engine;
pub mod error;
pub mod handle;
pub mod ids;
pub mod options;

pub use bridge::{FunctionTarget, HostBridge, HostCall, HostReturn, Loc};
pub use engine::{BackingStore, Engine, Primitive, ScriptOrigin, ValueKind};
pub use error::{EngineError, EngineResult};
pub use handle::{ContextHandle, IsolateHandle, RawHandle, TemplateHandle};
pub use ids::{ContextId, MethodId, ObjectId};
pub use options::{IsolateOptions, ResourceLimits};
