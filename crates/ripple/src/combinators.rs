#![forbid(unsafe_code)]

//! Combinators building derived containers.
//!
//! Every combinator returns a fresh [`Container`] whose source subscribes to
//! its parent(s) with the activation's token and forwards through its
//! [`WriteHandle`]. Because parents are subscribed with that token, tearing
//! the derived container down releases the parents as well, and a derived
//! container only keeps its parents active while it is itself active.
//!
//! Derived containers hold strong handles to their parents; parents only hold
//! weak write handles back. An active container keeps itself alive until its
//! teardown, so a derived container subscribed through a temporary keeps
//! forwarding for as long as its subscription lasts.

use std::cell::RefCell;
use std::rc::Rc;

use crate::cancel::{CancelController, CancelToken};
use crate::container::{Container, WriteHandle};
use crate::error::Result;
use crate::logging::trace;
use crate::merge::MergeTracker;

/// An always-resolved container holding `value`.
///
/// Later `set()` calls are remembered across teardown, including those made
/// while idle: a reactivation emits the latest value rather than the seed.
pub fn constant<T: Clone + 'static>(value: T) -> Container<T> {
    let latest = Rc::new(RefCell::new(value));
    let seed = Rc::clone(&latest);
    Container::retaining(
        move |handle: &WriteHandle<T>, _: &CancelToken| {
            let value = seed.borrow().clone();
            handle.set(value);
        },
        move |value: &T| *latest.borrow_mut() = value.clone(),
    )
}

/// Forward `f(value)` for every parent value.
pub fn transform<T, U>(parent: &Container<T>, f: impl Fn(&T) -> U + 'static) -> Container<U>
where
    T: Clone + 'static,
    U: Clone + 'static,
{
    let parent = parent.clone();
    let f = Rc::new(f);
    Container::new(move |handle: &WriteHandle<U>, token: &CancelToken| {
        let f = Rc::clone(&f);
        let handle = handle.clone();
        parent.subscribe(move |value: &T| handle.set(f(value)), Some(token));
    })
}

/// Forward only the parent values for which `predicate` holds.
///
/// The result stays unresolved until a value passes.
pub fn filter<T: Clone + 'static>(
    parent: &Container<T>,
    predicate: impl Fn(&T) -> bool + 'static,
) -> Container<T> {
    let parent = parent.clone();
    let predicate = Rc::new(predicate);
    Container::new(move |handle: &WriteHandle<T>, token: &CancelToken| {
        let predicate = Rc::clone(&predicate);
        let handle = handle.clone();
        parent.subscribe(
            move |value: &T| {
                if predicate(value) {
                    handle.set(value.clone());
                }
            },
            Some(token),
        );
    })
}

/// Flat-map: follow the container `f` returns for the latest parent value.
///
/// Switches to the latest inner container: the subscription to the previous
/// inner container is cancelled before the next one starts, so late
/// emissions from a superseded inner container are never forwarded.
pub fn chain<T, U>(
    parent: &Container<T>,
    f: impl Fn(&T) -> Container<U> + 'static,
) -> Container<U>
where
    T: Clone + 'static,
    U: Clone + 'static,
{
    let parent = parent.clone();
    let f = Rc::new(f);
    Container::new(move |handle: &WriteHandle<U>, token: &CancelToken| {
        // The inner container is kept alive here; its subscriber only holds
        // a weak handle back to us.
        let current: Rc<RefCell<Option<(Container<U>, CancelController)>>> =
            Rc::new(RefCell::new(None));
        let f = Rc::clone(&f);
        let handle = handle.clone();
        let activation = token.clone();
        parent.subscribe(
            move |value: &T| {
                let previous = current.borrow_mut().take();
                if let Some((_, controller)) = previous {
                    controller.cancel();
                }
                let next = f(value);
                trace!(inner_id = next.id(), "chain switching inner container");
                let (inner_token, controller) = activation.child();
                *current.borrow_mut() = Some((next.clone(), controller));
                let handle = handle.clone();
                next.subscribe(
                    move |inner: &U| handle.set(inner.clone()),
                    Some(&inner_token),
                );
            },
            Some(token),
        );
    })
}

/// Zip-latest over a homogeneous list of containers.
///
/// Emits the ordered vector of latest values each time any input updates,
/// once every input has produced at least once in the current activation.
/// Fails with [`ReactiveError::Capacity`](crate::ReactiveError::Capacity)
/// when `inputs` exceeds [`MergeTracker::CAPACITY`]. With no inputs the
/// result never resolves.
pub fn combine<T: Clone + 'static>(inputs: &[Container<T>]) -> Result<Container<Vec<T>>> {
    let blank = MergeTracker::new(inputs.len())?;
    let inputs = inputs.to_vec();
    Ok(Container::new(
        move |handle: &WriteHandle<Vec<T>>, token: &CancelToken| {
            let zip = Rc::new(RefCell::new(Zip {
                latest: vec![None; inputs.len()],
                tracker: blank,
            }));
            for (index, input) in inputs.iter().enumerate() {
                let zip = Rc::clone(&zip);
                let handle = handle.clone();
                input.subscribe(
                    move |value: &T| {
                        let snapshot = zip.borrow_mut().record(index, value);
                        if let Some(values) = snapshot {
                            handle.set(values);
                        }
                    },
                    Some(token),
                );
            }
        },
    ))
}

/// Per-activation state of [`combine`].
struct Zip<T> {
    latest: Vec<Option<T>>,
    tracker: MergeTracker,
}

impl<T: Clone> Zip<T> {
    fn record(&mut self, index: usize, value: &T) -> Option<Vec<T>> {
        self.latest[index] = Some(value.clone());
        self.tracker.mark(index);
        if self.tracker.all_observed() {
            self.latest.iter().cloned().collect()
        } else {
            None
        }
    }
}

/// Zip-latest over two containers of different types.
pub fn combine2<A, B>(a: &Container<A>, b: &Container<B>) -> Container<(A, B)>
where
    A: Clone + 'static,
    B: Clone + 'static,
{
    let a = a.clone();
    let b = b.clone();
    Container::new(move |handle: &WriteHandle<(A, B)>, token: &CancelToken| {
        let latest: Rc<RefCell<(Option<A>, Option<B>)>> = Rc::default();

        let slots = Rc::clone(&latest);
        let out = handle.clone();
        a.subscribe(
            move |value: &A| {
                let pair = {
                    let mut slots = slots.borrow_mut();
                    slots.0 = Some(value.clone());
                    both(&slots)
                };
                if let Some(pair) = pair {
                    out.set(pair);
                }
            },
            Some(token),
        );

        let slots = Rc::clone(&latest);
        let out = handle.clone();
        b.subscribe(
            move |value: &B| {
                let pair = {
                    let mut slots = slots.borrow_mut();
                    slots.1 = Some(value.clone());
                    both(&slots)
                };
                if let Some(pair) = pair {
                    out.set(pair);
                }
            },
            Some(token),
        );
    })
}

fn both<A: Clone, B: Clone>(slots: &(Option<A>, Option<B>)) -> Option<(A, B)> {
    Some((slots.0.clone()?, slots.1.clone()?))
}

/// Zip-latest over three containers of different types.
pub fn combine3<A, B, C>(
    a: &Container<A>,
    b: &Container<B>,
    c: &Container<C>,
) -> Container<(A, B, C)>
where
    A: Clone + 'static,
    B: Clone + 'static,
    C: Clone + 'static,
{
    let ab = combine2(a, b);
    transform(&combine2(&ab, c), |((a, b), c)| {
        (a.clone(), b.clone(), c.clone())
    })
}

/// Forward a parent value only when it differs from the last one forwarded
/// during the current activation.
pub fn dedupe<T: Clone + PartialEq + 'static>(parent: &Container<T>) -> Container<T> {
    let parent = parent.clone();
    Container::new(move |handle: &WriteHandle<T>, token: &CancelToken| {
        let last: Rc<RefCell<Option<T>>> = Rc::default();
        let handle = handle.clone();
        parent.subscribe(
            move |value: &T| {
                let changed = {
                    let mut last = last.borrow_mut();
                    if last.as_ref() == Some(value) {
                        false
                    } else {
                        *last = Some(value.clone());
                        true
                    }
                };
                if changed {
                    handle.set(value.clone());
                }
            },
            Some(token),
        );
    })
}

impl<T: Clone + 'static> Container<T> {
    /// See [`constant`].
    pub fn constant(value: T) -> Self {
        constant(value)
    }

    /// See [`transform`].
    pub fn map<U: Clone + 'static>(&self, f: impl Fn(&T) -> U + 'static) -> Container<U> {
        transform(self, f)
    }

    /// See [`filter`].
    pub fn filter(&self, predicate: impl Fn(&T) -> bool + 'static) -> Container<T> {
        filter(self, predicate)
    }

    /// See [`chain`].
    pub fn chain<U: Clone + 'static>(
        &self,
        f: impl Fn(&T) -> Container<U> + 'static,
    ) -> Container<U> {
        chain(self, f)
    }
}

impl<T: Clone + PartialEq + 'static> Container<T> {
    /// See [`dedupe`].
    pub fn dedupe(&self) -> Container<T> {
        dedupe(self)
    }
}
