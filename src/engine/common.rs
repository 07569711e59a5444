// src/engine/common.rs
//
// Common utilities shared across engine modules.

use crate::error::ResizerError;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run a codec call, converting a panic into `ResizerError::InternalPanic`.
///
/// libjpeg reports fatal errors by unwinding through mozjpeg, and a few pure
/// Rust decoders still panic on hostile input. Neither may take down the
/// worker that owes its caller a completion callback.
pub fn run_with_panic_policy<T, F>(label: &'static str, f: F) -> Result<T, ResizerError>
where
    F: FnOnce() -> Result<T, ResizerError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            tracing::error!(stage = label, %detail, "codec panicked");
            Err(ResizerError::internal_panic(format!("{label}: {detail}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn passes_through_ok_and_err() {
        assert_eq!(run_with_panic_policy("t", || Ok(3)).unwrap(), 3);
        let err = run_with_panic_policy::<(), _>("t", || Err(ResizerError::decode_failed("x")))
            .unwrap_err();
        assert!(matches!(err, ResizerError::DecodeFailed { .. }));
    }

    #[test]
    fn converts_panic_to_internal_error() {
        let err = run_with_panic_policy::<(), _>("decode:test", || panic!("bad marker"))
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InternalBug);
        assert!(err.to_string().contains("decode:test"));
        assert!(err.to_string().contains("bad marker"));
    }
}
