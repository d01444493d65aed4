#![forbid(unsafe_code)]

//! One-shot cancellation tokens for sources and subscriptions.
//!
//! A [`CancelToken`] is the observing half: it can be queried, cloned, handed
//! to a source, and used to register hooks that run when cancellation
//! happens. The [`CancelController`] is the owning half that triggers it.
//!
//! # Design
//!
//! Tokens are single-threaded (`Rc` inside) because the whole engine
//! dispatches synchronously on one thread. Cancellation is push-based: hooks
//! run synchronously, in registration order, inside
//! [`CancelController::cancel`]. A hook registered on an already-cancelled
//! token runs immediately.
//!
//! Dropping a controller does **not** cancel its token; cancellation is
//! always explicit. [`Subscription`] is the RAII wrapper for callers that
//! want drop-to-cancel.
//!
//! # Example
//!
//! ```
//! use ripple::cancel::CancelToken;
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let (token, ctrl) = CancelToken::new();
//! let released = Rc::new(Cell::new(false));
//! let flag = Rc::clone(&released);
//! token.on_cancel(move || flag.set(true));
//!
//! ctrl.cancel();
//! assert!(token.is_cancelled());
//! assert!(released.get());
//! ```

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ReactiveError, Result};
use crate::logging::trace;

// ─── Token ID generation ─────────────────────────────────────────────────────

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

fn next_token_id() -> u64 {
    NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Metrics counters ────────────────────────────────────────────────────────

/// Total number of token cancellations observed.
static CANCELLATIONS_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Read the total cancellation count (for diagnostics).
#[must_use]
pub fn cancellations_total() -> u64 {
    CANCELLATIONS_TOTAL.load(Ordering::Relaxed)
}

// ─── Inner shared state ──────────────────────────────────────────────────────

/// Identifies a hook registered with [`CancelToken::on_cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(u64);

type Hook = Box<dyn FnOnce()>;

struct TokenInner {
    id: u64,
    cancelled: Cell<bool>,
    /// Keyed by a per-token counter, so iteration is registration order.
    hooks: RefCell<BTreeMap<u64, Hook>>,
    next_hook: Cell<u64>,
    /// Link to the parent token and the hook that forwards its cancellation.
    parent: RefCell<Option<(Weak<TokenInner>, HookId)>>,
}

impl TokenInner {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            id: next_token_id(),
            cancelled: Cell::new(false),
            hooks: RefCell::new(BTreeMap::new()),
            next_hook: Cell::new(0),
            parent: RefCell::new(None),
        })
    }

    fn cancel(&self) {
        if self.cancelled.replace(true) {
            return;
        }
        CANCELLATIONS_TOTAL.fetch_add(1, Ordering::Relaxed);
        trace!(token_id = self.id, "token cancelled");

        let parent = self.parent.borrow_mut().take();
        if let Some((weak, hook)) = parent {
            if let Some(parent) = weak.upgrade() {
                let forward = parent.hooks.borrow_mut().remove(&hook.0);
                drop(forward);
            }
        }

        // Pop one hook at a time: a running hook may detach a later one.
        loop {
            let next = self.hooks.borrow_mut().pop_first();
            match next {
                Some((_, hook)) => hook(),
                None => break,
            }
        }
    }
}

impl Drop for TokenInner {
    fn drop(&mut self) {
        // A child dropped before cancellation stops listening to its parent.
        if let Some((weak, hook)) = self.parent.get_mut().take() {
            if let Some(parent) = weak.upgrade() {
                let forward = parent.hooks.borrow_mut().remove(&hook.0);
                drop(forward);
            }
        }
    }
}

impl fmt::Debug for TokenInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenInner")
            .field("id", &self.id)
            .field("cancelled", &self.cancelled.get())
            .field("hooks", &self.hooks.borrow().len())
            .finish()
    }
}

// ─── CancelToken ─────────────────────────────────────────────────────────────

/// Observing half of a one-shot cancellation signal.
///
/// Cheaply cloneable; clones observe the same signal.
#[derive(Clone, Debug)]
pub struct CancelToken {
    inner: Rc<TokenInner>,
}

impl CancelToken {
    /// Create a live token and the controller that cancels it.
    #[must_use]
    pub fn new() -> (Self, CancelController) {
        let inner = TokenInner::new();
        let token = Self {
            inner: Rc::clone(&inner),
        };
        (token, CancelController { inner })
    }

    /// A token that is cancelled from the start.
    #[must_use]
    pub fn cancelled() -> Self {
        let (token, ctrl) = Self::new();
        ctrl.cancel();
        token
    }

    /// Derive a child token.
    ///
    /// Cancelling `self` cancels the child. Cancelling or dropping the child
    /// detaches it from `self` without affecting it.
    #[must_use]
    pub fn child(&self) -> (Self, CancelController) {
        let (child, ctrl) = Self::new();
        let weak = Rc::downgrade(&child.inner);
        let hook = self.on_cancel(move || {
            if let Some(inner) = weak.upgrade() {
                inner.cancel();
            }
        });
        if !child.is_cancelled() {
            *child.inner.parent.borrow_mut() = Some((Rc::downgrade(&self.inner), hook));
        }
        (child, ctrl)
    }

    /// Unique identifier for this token (for tracing).
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    /// Return `Err(Cancelled)` once the token has been cancelled.
    ///
    /// Intended for sources doing deferred work:
    /// ```ignore
    /// token.check()?;
    /// handle.set(next);
    /// ```
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ReactiveError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Register `hook` to run when the token is cancelled.
    ///
    /// Runs `hook` immediately if the token is already cancelled.
    pub fn on_cancel(&self, hook: impl FnOnce() + 'static) -> HookId {
        let raw = self.inner.next_hook.get();
        self.inner.next_hook.set(raw + 1);
        if self.is_cancelled() {
            hook();
        } else {
            self.inner.hooks.borrow_mut().insert(raw, Box::new(hook));
        }
        HookId(raw)
    }

    /// Remove a hook that has not run yet. Returns whether it was removed.
    pub fn detach(&self, hook: HookId) -> bool {
        // Dropped after the borrow ends: the hook may own a child token.
        let removed = self.inner.hooks.borrow_mut().remove(&hook.0);
        removed.is_some()
    }

    /// Number of hooks still waiting for cancellation.
    #[must_use]
    pub fn pending_hooks(&self) -> usize {
        self.inner.hooks.borrow().len()
    }
}

// ─── CancelController ────────────────────────────────────────────────────────

/// Owning half of a [`CancelToken`].
#[derive(Debug)]
pub struct CancelController {
    inner: Rc<TokenInner>,
}

impl CancelController {
    /// Cancel the token and run its hooks. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    /// Another handle to the token this controller cancels.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            inner: Rc::clone(&self.inner),
        }
    }
}

// ─── Subscription ────────────────────────────────────────────────────────────

/// RAII guard that cancels its token on drop.
///
/// Returned by [`Container::observe`](crate::Container::observe); dropping it
/// unregisters the callback.
#[derive(Debug)]
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    controller: CancelController,
}

impl Subscription {
    pub(crate) fn new(controller: CancelController) -> Self {
        Self { controller }
    }

    /// Whether the guarded token is still live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.controller.is_cancelled()
    }

    /// Cancel explicitly. Equivalent to dropping.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.controller.cancel();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_token_is_live() {
        let (token, ctrl) = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(!ctrl.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn cancel_propagates_to_clones() {
        let (token, ctrl) = CancelToken::new();
        let other = token.clone();
        ctrl.cancel();
        assert!(token.is_cancelled());
        assert!(other.is_cancelled());
        assert_eq!(other.check(), Err(ReactiveError::Cancelled));
    }

    #[test]
    fn hooks_run_in_registration_order() {
        let (token, ctrl) = CancelToken::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = Rc::clone(&log);
            token.on_cancel(move || log.borrow_mut().push(i));
        }
        assert_eq!(token.pending_hooks(), 3);
        ctrl.cancel();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert_eq!(token.pending_hooks(), 0);
    }

    #[test]
    fn hook_on_cancelled_token_runs_immediately() {
        let token = CancelToken::cancelled();
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        token.on_cancel(move || flag.set(true));
        assert!(ran.get());
        assert_eq!(token.pending_hooks(), 0);
    }

    #[test]
    fn double_cancel_runs_hooks_once() {
        let (token, ctrl) = CancelToken::new();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        token.on_cancel(move || c.set(c.get() + 1));
        ctrl.cancel();
        ctrl.cancel();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn detached_hook_never_runs() {
        let (token, ctrl) = CancelToken::new();
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        let hook = token.on_cancel(move || flag.set(true));
        assert!(token.detach(hook));
        assert!(!token.detach(hook));
        ctrl.cancel();
        assert!(!ran.get());
    }

    #[test]
    fn hook_can_detach_a_later_hook() {
        let (token, ctrl) = CancelToken::new();
        let ran_second = Rc::new(Cell::new(false));
        let slot: Rc<Cell<Option<HookId>>> = Rc::new(Cell::new(None));

        let t = token.clone();
        let s = Rc::clone(&slot);
        token.on_cancel(move || {
            if let Some(id) = s.get() {
                t.detach(id);
            }
        });
        let flag = Rc::clone(&ran_second);
        slot.set(Some(token.on_cancel(move || flag.set(true))));

        ctrl.cancel();
        assert!(!ran_second.get());
    }

    #[test]
    fn child_follows_parent() {
        let (parent, parent_ctrl) = CancelToken::new();
        let (child, _child_ctrl) = parent.child();
        assert!(!child.is_cancelled());
        parent_ctrl.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_cancel_detaches_from_parent() {
        let (parent, parent_ctrl) = CancelToken::new();
        let (_child, child_ctrl) = parent.child();
        assert_eq!(parent.pending_hooks(), 1);
        child_ctrl.cancel();
        assert_eq!(parent.pending_hooks(), 0);
        assert!(!parent.is_cancelled());
        parent_ctrl.cancel();
    }

    #[test]
    fn dropped_child_detaches_from_parent() {
        let (parent, _parent_ctrl) = CancelToken::new();
        for _ in 0..4 {
            let (_child, _child_ctrl) = parent.child();
            assert_eq!(parent.pending_hooks(), 1);
        }
        assert_eq!(parent.pending_hooks(), 0);
    }

    #[test]
    fn child_of_cancelled_parent_starts_cancelled() {
        let parent = CancelToken::cancelled();
        let (child, _ctrl) = parent.child();
        assert!(child.is_cancelled());
    }

    #[test]
    fn dropping_controller_does_not_cancel() {
        let (token, ctrl) = CancelToken::new();
        drop(ctrl);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn subscription_cancels_on_drop() {
        let (token, ctrl) = CancelToken::new();
        let sub = Subscription::new(ctrl);
        assert!(sub.is_active());
        drop(sub);
        assert!(token.is_cancelled());
    }

    #[test]
    fn token_ids_are_unique() {
        let (a, _) = CancelToken::new();
        let (b, _) = CancelToken::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn cancellation_counter_increments() {
        let before = cancellations_total();
        let (_token, ctrl) = CancelToken::new();
        ctrl.cancel();
        let after_first = cancellations_total();
        assert!(after_first > before);
    }
}
