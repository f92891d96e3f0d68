//! Result type definition and extension traits.
//!
//! Provides combinators for Result types so call sites that only need to log a
//! failure do not reach for unwrap/expect.

use crate::error::Error;

/// The standard Result type for delayq operations.
///
/// # Examples
///
/// ```ignore
/// fn schedule(engine: &WheelEngine) -> Result<()> {
///     engine.start_timer(TimerId::from("rh-1"), 30, MsgMeta::default()).await?;
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing logging combinators for Results.
pub trait ResultExt<T> {
    /// Convert a Result to an Option, logging the error if present.
    fn into_option_logged(self) -> Option<T>;

    /// Inspect the error without consuming the Result.
    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self;
}

impl<T> ResultExt<T> for Result<T> {
    fn into_option_logged(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Operation failed: {}", e);
                None
            }
        }
    }

    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}
