//! Host ⇄ engine value conversion
//!
//! Scalars map one-to-one onto engine primitives. Everything else crosses as
//! JSON text parsed by the engine, so structures are copied and shared
//! references on the host side become independent engine values.

use jsembed_sdk::{ContextHandle, Engine, RawHandle};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::context::Context;
use crate::error::{BridgeResult, ConversionError};
use crate::value::Value;

// ============================================================================
// Host → engine
// ============================================================================

/// Convert a host value into an engine value of `ctx`
pub trait ToJs {
    /// Create the engine value
    fn to_js(&self, ctx: &Context) -> BridgeResult<Value>;
}

/// Marshal any serializable value through JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Json<T>(pub T);

macro_rules! signed_to_js {
    ($($ty:ty),*) => {$(
        impl ToJs for $ty {
            fn to_js(&self, ctx: &Context) -> BridgeResult<Value> {
                ctx.create_int(i64::from(*self))
            }
        }
    )*};
}

macro_rules! unsigned_to_js {
    ($($ty:ty),*) => {$(
        impl ToJs for $ty {
            fn to_js(&self, ctx: &Context) -> BridgeResult<Value> {
                ctx.create_uint(u64::from(*self))
            }
        }
    )*};
}

signed_to_js!(i8, i16, i32, i64);
unsigned_to_js!(u8, u16, u32, u64);

impl ToJs for isize {
    fn to_js(&self, ctx: &Context) -> BridgeResult<Value> {
        ctx.create_int(*self as i64)
    }
}

impl ToJs for usize {
    fn to_js(&self, ctx: &Context) -> BridgeResult<Value> {
        ctx.create_uint(*self as u64)
    }
}

impl ToJs for f32 {
    fn to_js(&self, ctx: &Context) -> BridgeResult<Value> {
        ctx.create_float(*self)
    }
}

impl ToJs for f64 {
    fn to_js(&self, ctx: &Context) -> BridgeResult<Value> {
        ctx.create_double(*self)
    }
}

impl ToJs for bool {
    fn to_js(&self, ctx: &Context) -> BridgeResult<Value> {
        ctx.create_bool(*self)
    }
}

impl ToJs for str {
    fn to_js(&self, ctx: &Context) -> BridgeResult<Value> {
        ctx.create_string(self)
    }
}

impl ToJs for String {
    fn to_js(&self, ctx: &Context) -> BridgeResult<Value> {
        ctx.create_string(self)
    }
}

impl ToJs for JsonValue {
    fn to_js(&self, ctx: &Context) -> BridgeResult<Value> {
        ctx.from_json(&self.to_string())
    }
}

impl<T: Serialize> ToJs for Json<T> {
    fn to_js(&self, ctx: &Context) -> BridgeResult<Value> {
        let json = serde_json::to_string(&self.0).map_err(ConversionError::Json)?;
        ctx.from_json(&json)
    }
}

impl<T: ToJs + ?Sized> ToJs for &T {
    fn to_js(&self, ctx: &Context) -> BridgeResult<Value> {
        (**self).to_js(ctx)
    }
}

// ============================================================================
// Engine → host
// ============================================================================

/// Extract a host value from an engine value
pub trait FromJs: Sized {
    /// Convert, failing when the engine value has another type
    fn from_js(value: &Value) -> BridgeResult<Self>;
}

impl FromJs for i32 {
    fn from_js(value: &Value) -> BridgeResult<Self> {
        value.to_int()
    }
}

impl FromJs for i64 {
    fn from_js(value: &Value) -> BridgeResult<Self> {
        value.to_int64()
    }
}

impl FromJs for u32 {
    fn from_js(value: &Value) -> BridgeResult<Self> {
        value.to_uint()
    }
}

impl FromJs for f32 {
    fn from_js(value: &Value) -> BridgeResult<Self> {
        value.to_float()
    }
}

impl FromJs for f64 {
    fn from_js(value: &Value) -> BridgeResult<Self> {
        value.to_double()
    }
}

impl FromJs for bool {
    fn from_js(value: &Value) -> BridgeResult<Self> {
        value.to_bool()
    }
}

impl FromJs for String {
    fn from_js(value: &Value) -> BridgeResult<Self> {
        value.to_string()
    }
}

impl FromJs for JsonValue {
    fn from_js(value: &Value) -> BridgeResult<Self> {
        Ok(serde_json::from_str(&value.to_json()?)?)
    }
}

impl<T: DeserializeOwned> FromJs for Json<T> {
    fn from_js(value: &Value) -> BridgeResult<Self> {
        let json = value.to_json()?;
        Ok(Json(serde_json::from_str(&json).map_err(ConversionError::Json)?))
    }
}

impl Value {
    fn mismatch(&self, expected: &'static str) -> ConversionError {
        ConversionError::TypeMismatch {
            expected,
            got: self.type_name(),
        }
    }

    fn scalar<T>(
        &self,
        expected: &'static str,
        extract: impl FnOnce(&dyn Engine, ContextHandle, RawHandle) -> Option<T>,
    ) -> BridgeResult<T> {
        let (ctx, handle) = self.live();
        let engine_ctx = ctx.live_handle();
        let extracted = {
            let _entry = ctx.enter();
            extract(ctx.engine(), engine_ctx, handle)
        };
        extracted.ok_or_else(|| self.mismatch(expected).into())
    }

    /// The value as an `i32`
    pub fn to_int(&self) -> BridgeResult<i32> {
        self.scalar("int32", |engine, ctx, handle| engine.to_int32(ctx, handle))
    }

    /// The integer part of a number
    pub fn to_int64(&self) -> BridgeResult<i64> {
        self.scalar("int64", |engine, ctx, handle| engine.to_int64(ctx, handle))
    }

    /// The value as a `u32`
    pub fn to_uint(&self) -> BridgeResult<u32> {
        self.scalar("uint32", |engine, ctx, handle| engine.to_uint32(ctx, handle))
    }

    /// The number narrowed to `f32`
    pub fn to_float(&self) -> BridgeResult<f32> {
        self.scalar("float", |engine, ctx, handle| engine.to_number(ctx, handle).map(|n| n as f32))
    }

    /// The value as a number
    pub fn to_double(&self) -> BridgeResult<f64> {
        self.scalar("double", |engine, ctx, handle| engine.to_number(ctx, handle))
    }

    /// The value as a boolean
    pub fn to_bool(&self) -> BridgeResult<bool> {
        self.scalar("boolean", |engine, ctx, handle| engine.to_boolean(ctx, handle))
    }

    /// The value as a string; other types are a mismatch, not coerced
    pub fn to_string(&self) -> BridgeResult<String> {
        let json = self.to_json()?;
        serde_json::from_str::<String>(&json).map_err(|_| self.mismatch("string").into())
    }

    /// Convert into any [`FromJs`] type
    pub fn to<T: FromJs>(&self) -> BridgeResult<T> {
        T::from_js(self)
    }

    /// Borrow the bytes of a `Uint8Array` without copying.
    ///
    /// The slice is only valid inside `f`; do not release the value from
    /// within it.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> BridgeResult<R> {
        let (ctx, handle) = self.live();
        let engine_ctx = ctx.live_handle();
        let _entry = ctx.enter();
        let store = ctx
            .engine()
            .backing_store(engine_ctx, handle)
            .ok_or_else(|| self.mismatch("Uint8Array"))?;
        // SAFETY: the handle keeps the array alive and the isolate stays
        // pinned for as long as `f` can see the slice.
        let bytes = unsafe { store.as_slice() };
        Ok(f(bytes))
    }

    /// Copy the bytes of a `Uint8Array`
    pub fn to_bytes(&self) -> BridgeResult<Vec<u8>> {
        self.with_bytes(<[u8]>::to_vec)
    }
}
