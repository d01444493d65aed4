#![no_main]

//! Builds an arbitrary graph of derived containers, drives it with arbitrary
//! subscribe / unsubscribe / set / get operations, and checks that releasing
//! every subscription returns the whole graph to idle.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use ripple::{Container, Subscription, combine, constant};

#[derive(Arbitrary, Debug)]
enum Node {
    Map(u8),
    Filter(u8),
    Dedupe(u8),
    Chain(u8),
    Combine(u8, u8),
}

#[derive(Arbitrary, Debug)]
enum Action {
    Subscribe(u8),
    Unsubscribe(u8),
    Set(u8, i16),
    Get(u8),
}

#[derive(Arbitrary, Debug)]
struct Scenario {
    roots: u8,
    nodes: Vec<Node>,
    actions: Vec<Action>,
}

fn pick<T>(items: &[T], index: u8) -> &T {
    &items[usize::from(index) % items.len()]
}

fuzz_target!(|scenario: Scenario| {
    let roots: Vec<Container<i64>> = (0..=i64::from(scenario.roots % 4))
        .map(constant)
        .collect();
    let mut all: Vec<Container<i64>> = roots.clone();

    for node in scenario.nodes.iter().take(32) {
        let derived = match node {
            Node::Map(p) => pick(&all, *p).map(|v| v.wrapping_mul(3)),
            Node::Filter(p) => pick(&all, *p).filter(|v| v % 2 == 0),
            Node::Dedupe(p) => pick(&all, *p).dedupe(),
            Node::Chain(p) => {
                let fallback = pick(&roots, *p).clone();
                pick(&all, *p).chain(move |v| {
                    if v % 3 == 0 {
                        fallback.clone()
                    } else {
                        constant(*v)
                    }
                })
            }
            Node::Combine(a, b) => {
                let inputs = [pick(&all, *a).clone(), pick(&all, *b).clone()];
                match combine(&inputs) {
                    Ok(zipped) => {
                        zipped.map(|v| v.iter().fold(0i64, |acc, x| acc.wrapping_add(*x)))
                    }
                    Err(_) => return,
                }
            }
        };
        all.push(derived);
    }

    let mut subs: Vec<Subscription> = Vec::new();
    for action in scenario.actions.iter().take(256) {
        match action {
            Action::Subscribe(i) => subs.push(pick(&all, *i).observe(|_| {})),
            Action::Unsubscribe(i) => {
                if !subs.is_empty() {
                    let idx = usize::from(*i) % subs.len();
                    drop(subs.remove(idx));
                }
            }
            Action::Set(i, v) => pick(&roots, *i).set(i64::from(*v)),
            Action::Get(i) => {
                let _ = pick(&all, *i).get();
            }
        }
    }

    drop(subs);
    for c in &all {
        assert_eq!(c.subscriber_count(), 0, "subscriber leaked on {c:?}");
        assert!(!c.is_active(), "container left active: {c:?}");
    }
});
