#![forbid(unsafe_code)]

//! Error taxonomy for the reactive engine.
//!
//! Subscriber failures are not represented here: a panicking callback unwinds
//! straight out of [`Container::set`](crate::Container::set) and interrupts
//! the remaining notifications of that call.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReactiveError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ReactiveError {
    /// `get()` found no cached value and the source emitted nothing
    /// synchronously.
    #[error("unable to resolve lazily without a subscriber")]
    Unresolved,

    /// A merge-tracker (or `combine`) was asked to address more inputs than
    /// its accumulator holds.
    #[error("merge-tracker capacity exceeded: {requested} inputs requested, at most {max} supported")]
    Capacity { requested: usize, max: usize },

    /// A cancellation token was checked after it had been cancelled.
    #[error("operation cancelled")]
    Cancelled,
}
