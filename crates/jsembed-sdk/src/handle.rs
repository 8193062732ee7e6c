//! Opaque engine handles
//!
//! Handles are plain integers minted by the engine backend. The bridge never
//! interprets them; it only stores them, compares them and hands them back.

use std::fmt;

macro_rules! engine_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw handle value minted by the engine
            pub const fn from_raw(raw: u64) -> Self {
                $name(raw)
            }

            /// Get the raw handle value
            pub const fn as_raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0)
            }
        }
    };
}

engine_handle!(
    /// Persistent handle to an engine value.
    ///
    /// The engine keeps the referenced value alive until the handle is
    /// released or weakened and then collected.
    RawHandle
);

engine_handle!(
    /// Handle to an engine isolate (one heap, one thread at a time)
    IsolateHandle
);

engine_handle!(
    /// Handle to an engine context (one global object inside an isolate)
    ContextHandle
);

engine_handle!(
    /// Handle to an object or class template
    TemplateHandle
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_round_trip() {
        let h = RawHandle::from_raw(0x2a);
        assert_eq!(h.as_raw(), 0x2a);
        assert_eq!(h, RawHandle::from_raw(42));
    }

    #[test]
    fn test_handle_debug() {
        assert_eq!(format!("{:?}", ContextHandle::from_raw(16)), "ContextHandle(0x10)");
    }
}
