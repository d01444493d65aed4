#![forbid(unsafe_code)]

//! The reactive container: a current value, an ordered subscriber registry,
//! and a lazily activated source.
//!
//! # Design
//!
//! [`Container<T>`] is a cheaply cloneable handle to `Rc<..>` shared state.
//! Values are produced by a *source* routine that runs when the first
//! subscriber arrives and the container holds no value. The source receives a
//! [`WriteHandle`] and the activation's [`CancelToken`]; it may push values
//! synchronously or at any later point until that token is cancelled.
//!
//! The cached value is an explicit [`Slot`], so "not yet resolved" never
//! collides with a domain value such as `None`.
//!
//! # Invariants
//!
//! 1. At most one source activation is in flight. A subscriber arriving while
//!    an activation is still pending joins it.
//! 2. Subscribers are notified in registration order, synchronously, once per
//!    `set()`.
//! 3. A subscriber arriving while a value is cached receives it immediately
//!    (replay) and does not start an activation.
//! 4. When a removal brings the subscriber count down to the quiet threshold
//!    recorded at activation, the activation token is cancelled and the
//!    cached value is cleared. The next subscriber re-runs the source.
//! 5. A value `set` while idle is cached only until the last subscriber
//!    leaves; after that the next subscriber runs the source.
//! 6. An active container keeps its own state alive. Dropping every handle
//!    does not end an activation; only its subscribers leaving does.
//! 7. No `RefCell` borrow is held while user code (sources, callbacks, hooks)
//!    runs, so every entry point is re-entrant.
//!
//! # Failure Modes
//!
//! - **Nothing to resolve**: [`Container::get`] returns
//!   [`ReactiveError::Unresolved`] when neither a cached value nor a
//!   synchronous emission is available.
//! - **Subscriber panics**: the panic unwinds out of `set()`. Subscribers
//!   registered after the failing one miss that value. The value itself was
//!   stored before notification began and the container remains usable.
//! - **Cycles**: a container that feeds itself through a derived chain
//!   recurses until the stack overflows. There is no guard.
//! - **Forgotten subscriptions**: a subscriber registered without a token is
//!   only removed by [`Container::unsubscribe`]. Until then the activation,
//!   and the container with it, stays alive.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cancel::{CancelController, CancelToken, HookId, Subscription};
use crate::error::{ReactiveError, Result};
use crate::logging::{debug, trace};

static NEXT_CONTAINER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one registered callback within one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

/// Cached value of a container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Slot<T> {
    /// No value since creation or since the last teardown.
    #[default]
    Pending,
    Resolved(T),
}

impl<T> Slot<T> {
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    #[must_use]
    pub fn as_resolved(&self) -> Option<&T> {
        match self {
            Self::Resolved(value) => Some(value),
            Self::Pending => None,
        }
    }
}

type Callback<T> = Rc<dyn Fn(&T)>;
type Source<T> = Box<dyn Fn(&WriteHandle<T>, &CancelToken)>;
type Retain<T> = Box<dyn Fn(&T)>;

struct Entry<T> {
    callback: Callback<T>,
    /// Hook registered on the caller's token, detached on explicit removal.
    hook: Option<(CancelToken, HookId)>,
}

enum Activation<T> {
    Idle,
    Active {
        controller: CancelController,
        /// `None` while the source call is still on the stack.
        quiet_threshold: Option<usize>,
        /// Holds the container open while it has an activation, so a derived
        /// container keeps forwarding after its last handle is dropped.
        /// Released at teardown.
        keep_alive: Rc<Inner<T>>,
    },
}

struct State<T> {
    current: Slot<T>,
    subscribers: BTreeMap<SubscriberId, Entry<T>>,
    next_subscriber: u64,
    activation: Activation<T>,
    version: u64,
}

struct Inner<T> {
    id: u64,
    source: Source<T>,
    /// Called with every stored value, before subscribers are notified.
    retain: Option<Retain<T>>,
    state: RefCell<State<T>>,
}

/// A push-based reactive value.
///
/// Cloning a `Container` creates a new handle to the **same** state.
pub struct Container<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for Container<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Container<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Container")
            .field("id", &self.inner.id)
            .field("current", &state.current)
            .field("subscribers", &state.subscribers.len())
            .field(
                "active",
                &matches!(state.activation, Activation::Active { .. }),
            )
            .field("version", &state.version)
            .finish()
    }
}

impl<T: Clone + 'static> Container<T> {
    /// Create a container backed by `source`.
    ///
    /// The source is not called until the first subscription.
    pub fn new(source: impl Fn(&WriteHandle<T>, &CancelToken) + 'static) -> Self {
        Self::build(Box::new(source), None)
    }

    /// Like [`Container::new`], but `retain` sees every stored value, whether
    /// the container is active or idle. Used by sources that must outlive
    /// teardown with the latest value.
    pub(crate) fn retaining(
        source: impl Fn(&WriteHandle<T>, &CancelToken) + 'static,
        retain: impl Fn(&T) + 'static,
    ) -> Self {
        Self::build(Box::new(source), Some(Box::new(retain)))
    }

    fn build(source: Source<T>, retain: Option<Retain<T>>) -> Self {
        Self {
            inner: Rc::new(Inner {
                id: NEXT_CONTAINER_ID.fetch_add(1, Ordering::Relaxed),
                source,
                retain,
                state: RefCell::new(State {
                    current: Slot::Pending,
                    subscribers: BTreeMap::new(),
                    next_subscriber: 0,
                    activation: Activation::Idle,
                    version: 0,
                }),
            }),
        }
    }

    /// Current value, resolving synchronously if nothing is cached.
    ///
    /// Without a cached value this subscribes with an already-cancelled token,
    /// keeps whatever the source emits during the call, and unsubscribes
    /// again, so no subscription outlives the call.
    pub fn get(&self) -> Result<T> {
        if let Some(value) = self.cached() {
            return Ok(value);
        }
        let captured: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&captured);
        self.subscribe(
            move |value: &T| *sink.borrow_mut() = Some(value.clone()),
            Some(&CancelToken::cancelled()),
        );
        let value = captured.borrow_mut().take();
        value.ok_or_else(|| {
            debug!(container_id = self.inner.id, "get found nothing to resolve");
            ReactiveError::Unresolved
        })
    }

    /// The cached value, without triggering an activation.
    #[must_use]
    pub fn cached(&self) -> Option<T> {
        self.inner.state.borrow().current.as_resolved().cloned()
    }

    /// Store `value` and notify every registered subscriber in order.
    ///
    /// On an idle container the value is cached until the last subscriber
    /// that saw it leaves.
    pub fn set(&self, value: T) {
        if let Some(retain) = &self.inner.retain {
            retain(&value);
        }
        let ids: Vec<SubscriberId> = {
            let mut state = self.inner.state.borrow_mut();
            state.current = Slot::Resolved(value.clone());
            state.version += 1;
            state.subscribers.keys().copied().collect()
        };
        for id in ids {
            // Skip subscribers removed by an earlier callback of this pass.
            let callback = self
                .inner
                .state
                .borrow()
                .subscribers
                .get(&id)
                .map(|entry| Rc::clone(&entry.callback));
            if let Some(callback) = callback {
                callback(&value);
            }
        }
    }

    /// Register `callback`.
    ///
    /// A cached value is replayed to `callback` immediately. Otherwise, if the
    /// container is idle, the source is activated. If `token` is already
    /// cancelled the callback is removed again before returning; if it is
    /// cancelled later the callback is removed then.
    pub fn subscribe(
        &self,
        callback: impl Fn(&T) + 'static,
        token: Option<&CancelToken>,
    ) -> SubscriberId {
        let callback: Callback<T> = Rc::new(callback);
        let (id, replay, activate) = {
            let mut state = self.inner.state.borrow_mut();
            let id = SubscriberId(state.next_subscriber);
            state.next_subscriber += 1;
            state.subscribers.insert(
                id,
                Entry {
                    callback: Rc::clone(&callback),
                    hook: None,
                },
            );
            let replay = state.current.as_resolved().cloned();
            let activate = replay.is_none() && matches!(state.activation, Activation::Idle);
            (id, replay, activate)
        };
        trace!(container_id = self.inner.id, subscriber_id = id.0, "subscribed");

        if let Some(value) = replay {
            callback(&value);
        } else if activate {
            self.activate(id);
        }

        match token {
            Some(token) if token.is_cancelled() => {
                self.unsubscribe(id);
            }
            Some(token) => {
                let weak = Rc::downgrade(&self.inner);
                let hook = token.on_cancel(move || {
                    if let Some(inner) = weak.upgrade() {
                        Container { inner }.unsubscribe(id);
                    }
                });
                let registered = match self.inner.state.borrow_mut().subscribers.get_mut(&id) {
                    Some(entry) => {
                        entry.hook = Some((token.clone(), hook));
                        true
                    }
                    None => false,
                };
                if !registered {
                    token.detach(hook);
                }
            }
            None => {}
        }
        id
    }

    /// Subscribe with a fresh token owned by the returned guard.
    pub fn observe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let (token, controller) = CancelToken::new();
        self.subscribe(callback, Some(&token));
        Subscription::new(controller)
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    ///
    /// Tears the activation down once the remaining subscribers are only
    /// those the source itself created. On an idle container the last
    /// removal clears the cached value.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.inner.state.borrow_mut().subscribers.remove(&id);
        let Some(entry) = removed else {
            return false;
        };
        if let Some((token, hook)) = &entry.hook {
            token.detach(*hook);
        }
        trace!(
            container_id = self.inner.id,
            subscriber_id = id.0,
            "unsubscribed"
        );
        self.settle();
        true
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.state.borrow().subscribers.len()
    }

    /// Whether a source activation is currently live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self.inner.state.borrow().activation,
            Activation::Active { .. }
        )
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.inner.state.borrow().current.is_resolved()
    }

    /// Number of successful `set()` calls over the container's lifetime.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.state.borrow().version
    }

    /// Unique identifier for this container (for tracing).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether two handles share the same state.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn activate(&self, trigger: SubscriberId) {
        let (token, controller) = CancelToken::new();
        self.inner.state.borrow_mut().activation = Activation::Active {
            controller,
            quiet_threshold: None,
            keep_alive: Rc::clone(&self.inner),
        };
        debug!(
            container_id = self.inner.id,
            token_id = token.id(),
            "activating source"
        );

        let handle = WriteHandle {
            target: Rc::downgrade(&self.inner),
            token: token.clone(),
        };
        (self.inner.source)(&handle, &token);

        {
            let mut state = self.inner.state.borrow_mut();
            let others =
                state.subscribers.len() - usize::from(state.subscribers.contains_key(&trigger));
            if let Activation::Active {
                quiet_threshold, ..
            } = &mut state.activation
            {
                *quiet_threshold = Some(others);
            }
        }
        // The trigger may already have left during the source call.
        self.settle();
    }

    fn settle(&self) {
        let released = {
            let mut state = self.inner.state.borrow_mut();
            let quiet = match state.activation {
                Activation::Active {
                    quiet_threshold: Some(threshold),
                    ..
                } => state.subscribers.len() <= threshold,
                Activation::Active { .. } => false,
                Activation::Idle => state.subscribers.is_empty() && state.current.is_resolved(),
            };
            if !quiet {
                return;
            }
            state.current = Slot::Pending;
            std::mem::replace(&mut state.activation, Activation::Idle)
        };
        match released {
            Activation::Active {
                controller,
                keep_alive,
                ..
            } => {
                debug!(container_id = self.inner.id, "tearing down activation");
                controller.cancel();
                drop(keep_alive);
            }
            Activation::Idle => {
                trace!(container_id = self.inner.id, "idle value released");
            }
        }
    }
}

/// Write-only view of a container, handed to its source.
///
/// Bound to one activation: once that activation is torn down `set` does
/// nothing.
pub struct WriteHandle<T> {
    target: Weak<Inner<T>>,
    token: CancelToken,
}

impl<T> Clone for WriteHandle<T> {
    fn clone(&self) -> Self {
        Self {
            target: Weak::clone(&self.target),
            token: self.token.clone(),
        }
    }
}

impl<T> fmt::Debug for WriteHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteHandle")
            .field("token", &self.token)
            .field("live", &self.is_live())
            .finish()
    }
}

impl<T> WriteHandle<T> {
    /// Whether writes through this handle still reach the container.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.token.is_cancelled() && self.target.strong_count() > 0
    }
}

impl<T: Clone + 'static> WriteHandle<T> {
    pub fn set(&self, value: T) {
        if self.token.is_cancelled() {
            trace!(token_id = self.token.id(), "write after teardown ignored");
            return;
        }
        if let Some(container) = self.container() {
            container.set(value);
        }
    }

    /// Upgrade to a full container handle while the container is alive.
    pub(crate) fn container(&self) -> Option<Container<T>> {
        self.target.upgrade().map(|inner| Container { inner })
    }
}
