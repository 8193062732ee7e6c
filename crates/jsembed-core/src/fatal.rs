//! Bridge corruption
//!
//! Identity violations between host and engine (an unknown callback target,
//! a value crossing contexts, a released return value) leave both sides in
//! an undefined state. They are logged and turned into a panic that no
//! dispatch frame contains.

use std::any::Any;

const PREFIX: &str = "bridge corruption: ";

/// Log and abort the current operation
#[cold]
#[track_caller]
pub(crate) fn corrupt(message: String) -> ! {
    tracing::error!(%message, "bridge corruption");
    panic!("{}{}", PREFIX, message);
}

/// True for panic payloads raised by [`corrupt`]
pub(crate) fn is_corruption(payload: &(dyn Any + Send)) -> bool {
    panic_message(payload).starts_with(PREFIX)
}

/// Text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;

    #[test]
    fn test_corruption_payload_is_recognised() {
        let payload = panic::catch_unwind(|| corrupt("unknown context ctx#9".to_string())).unwrap_err();
        assert!(is_corruption(&*payload));
        assert_eq!(panic_message(&*payload), "bridge corruption: unknown context ctx#9");
    }

    #[test]
    fn test_ordinary_panic_is_not_corruption() {
        let payload = panic::catch_unwind(|| panic!("index out of bounds")).unwrap_err();
        assert!(!is_corruption(&*payload));
        assert_eq!(panic_message(&*payload), "index out of bounds");
    }
}
