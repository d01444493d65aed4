#![forbid(unsafe_code)]

//! Push-based reactive containers.
//!
//! - [`Container`]: holds a current value, multicasts updates to subscribers
//!   in registration order, and runs a lazily activated *source* while it has
//!   subscribers.
//! - [`CancelToken`] / [`CancelController`]: one-shot cancellation used both
//!   to end subscriptions and to tell a source to release what it acquired.
//! - [`Subscription`]: RAII guard that unsubscribes on drop.
//! - Combinators ([`constant`], [`transform`], [`filter`], [`chain`],
//!   [`combine`], ...): build derived containers purely on the public
//!   container contract.
//! - [`MergeTracker`]: the bit accumulator `combine` uses to know when every
//!   input has produced a value.
//!
//! # Architecture
//!
//! Everything is single-threaded (`Rc<RefCell<..>>`) and synchronous: one
//! `set()` on a root container cascades through every derived container
//! before returning. Nothing is batched, coalesced or scheduled.
//!
//! Structured logging goes through `tracing` when the `tracing` feature is
//! enabled and compiles away otherwise.
//!
//! A container is *idle* until its first subscriber arrives, *active* while
//! its source runs, and returns to idle (clearing its cached value and
//! cancelling the source's token) when its subscribers are gone.
//!
//! # Example
//!
//! ```
//! use ripple::{combine, constant};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let width = constant(2);
//! let height = constant(3);
//! let area = combine(&[width.clone(), height.clone()])
//!     .unwrap()
//!     .map(|dims| dims.iter().product::<i32>());
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = Rc::clone(&seen);
//! let sub = area.observe(move |a| sink.borrow_mut().push(*a));
//!
//! width.set(4);
//! assert_eq!(*seen.borrow(), vec![6, 12]);
//!
//! drop(sub);
//! assert!(!width.is_active());
//! ```

pub mod cancel;
pub mod combinators;
pub mod container;
pub mod error;
mod logging;
pub mod merge;

pub use cancel::{CancelController, CancelToken, HookId, Subscription, cancellations_total};
pub use combinators::{chain, combine, combine2, combine3, constant, dedupe, filter, transform};
pub use container::{Container, Slot, SubscriberId, WriteHandle};
pub use error::{ReactiveError, Result};
pub use merge::MergeTracker;
