//! Process-wide notifications for route registration, inbound connections
//! and handler failures.
//!
//! The [`Emitter`] is a thin wrapper over a tokio broadcast channel. Emitting
//! with no subscribers is not an error; events are observability hooks, never
//! part of the control flow.

use crate::http::Method;
use tokio::sync::broadcast;

#[derive(Clone, Debug)]
pub enum Event {
    RouteRegistered { method: Method, uri: String },
    ConnectionReceived { method: Method, path: String },
    HandlerError { method: Method, path: String, message: String },
}

#[derive(Clone)]
pub struct Emitter {
    tx: broadcast::Sender<Event>,
}

impl Emitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: Event) {
        // A send error only means nobody is listening.
        let _ = self.tx.send(event);
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}
