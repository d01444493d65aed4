#![forbid(unsafe_code)]

//! Structured logging: activation, teardown and cancellation emit tracing
//! events carrying the ids of the container or token involved.
//!
//! Built only with the `tracing` feature.

use std::sync::{Arc, Mutex};

use ripple::{CancelToken, constant};
use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

#[derive(Debug, Default, Clone)]
struct Captured {
    message: String,
    container_id: Option<u64>,
    token_id: Option<u64>,
}

struct Capture {
    events: Arc<Mutex<Vec<Captured>>>,
}

impl<S: Subscriber> Layer<S> for Capture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        struct Visitor(Captured);
        impl tracing::field::Visit for Visitor {
            fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
                match field.name() {
                    "container_id" => self.0.container_id = Some(value),
                    "token_id" => self.0.token_id = Some(value),
                    _ => {}
                }
            }

            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.0.message = format!("{value:?}").trim_matches('"').to_string();
                }
            }
        }
        let mut visitor = Visitor(Captured::default());
        event.record(&mut visitor);
        self.events.lock().expect("capture lock").push(visitor.0);
    }
}

fn capture<R>(f: impl FnOnce() -> R) -> (R, Vec<Captured>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry().with(Capture {
        events: Arc::clone(&events),
    });
    let out = tracing::subscriber::with_default(subscriber, f);
    let events = events.lock().expect("capture lock").clone();
    (out, events)
}

#[test]
fn activation_and_teardown_are_logged() {
    let c = constant(1);
    let id = c.id();
    let (_, events) = capture(|| {
        let sub = c.observe(|_| {});
        drop(sub);
    });

    let activation = events
        .iter()
        .find(|e| e.message == "activating source")
        .expect("activation event");
    assert_eq!(activation.container_id, Some(id));
    assert!(activation.token_id.is_some());

    let teardown = events
        .iter()
        .find(|e| e.message == "tearing down activation")
        .expect("teardown event");
    assert_eq!(teardown.container_id, Some(id));
}

#[test]
fn idle_value_release_is_logged() {
    let c = constant(1);
    c.set(2);
    let id = c.id();
    let (_, events) = capture(|| drop(c.observe(|_| {})));
    assert!(
        events
            .iter()
            .any(|e| e.message == "idle value released" && e.container_id == Some(id))
    );
    assert!(!events.iter().any(|e| e.message == "activating source"));
}

#[test]
fn unresolved_get_is_logged() {
    let silent: ripple::Container<u8> =
        ripple::Container::new(|_: &ripple::WriteHandle<u8>, _: &CancelToken| {});
    let (result, events) = capture(|| silent.get());
    assert!(result.is_err());
    assert!(
        events
            .iter()
            .any(|e| e.message == "get found nothing to resolve"
                && e.container_id == Some(silent.id()))
    );
}

#[test]
fn cancellation_is_logged_once() {
    let (token, ctrl) = CancelToken::new();
    let (_, events) = capture(|| {
        ctrl.cancel();
        ctrl.cancel();
    });
    let cancels = events
        .iter()
        .filter(|e| e.message == "token cancelled" && e.token_id == Some(token.id()))
        .count();
    assert_eq!(cancels, 1);
}
