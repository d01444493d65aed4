#![forbid(unsafe_code)]

//! Logging shims.
//!
//! With the `tracing` feature the `tracing` macros are re-exported as-is.
//! Without it the same macro names expand to nothing, so call sites never
//! need their own `cfg`.

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, trace};

#[cfg(not(feature = "tracing"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use {debug, trace};
