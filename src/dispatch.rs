//! Request/response correlation and data-push fan-out.
//!
//! Two handler populations coexist. One-shot pending requests are keyed by
//! their expected frame tags and an optional correlation id; exactly one
//! fires per inbound frame and is removed immediately. Persistent handlers
//! are keyed by the frame's data-source (collection) name and fire on every
//! matching data push for as long as they stay registered.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::codec::ServerMessage;

/// A data-push event delivered to persistent handlers.
#[derive(Clone, Debug)]
pub struct StreamEvent {
    /// Data-source (collection) the event belongs to.
    pub collection: String,
    /// Document identifier, when the server supplies one.
    pub id: Option<String>,
    /// Event field set, verbatim from the wire.
    pub fields: Value,
}

impl StreamEvent {
    /// Sub-stream name this event addresses, when present.
    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        self.fields.get("eventName").and_then(Value::as_str)
    }

    /// Event argument list; empty when the frame carried none.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        self.fields
            .get("args")
            .and_then(Value::as_array)
            .map_or(&[], Vec::as_slice)
    }
}

/// Persistent event handler.
pub type EventHandler = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

/// Identifies one registered persistent handler so it can be removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct HandlerToken(u64);

struct Pending {
    tags: &'static [&'static str],
    id: Option<String>,
    tx: oneshot::Sender<ServerMessage>,
}

impl Pending {
    fn matches(&self, tag: &str, id: Option<&str>) -> bool {
        if !self.tags.contains(&tag) {
            return false;
        }
        // Id match is required only when the inbound frame carries one;
        // id-less frames match any pending request with the same tag.
        match id {
            Some(id) => self.id.as_deref() == Some(id),
            None => true,
        }
    }
}

/// Correlates outbound requests with inbound frames.
pub(crate) struct Dispatcher {
    correlation_counter: AtomicU64,
    handler_counter: AtomicU64,
    pending: Mutex<Vec<Pending>>,
    persistent: DashMap<String, Vec<(HandlerToken, EventHandler)>>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self {
            correlation_counter: AtomicU64::new(1),
            handler_counter: AtomicU64::new(1),
            pending: Mutex::new(Vec::new()),
            persistent: DashMap::new(),
        }
    }

    /// Next correlation id, formatted as the string the server expects.
    pub(crate) fn next_id(&self) -> String {
        self.correlation_counter
            .fetch_add(1, Ordering::Relaxed)
            .to_string()
    }

    /// Register a one-shot request awaiting a frame with one of `tags` and,
    /// when `id` is set, a matching correlation id.
    ///
    /// The receiver errors if the connection is closed before a matching
    /// frame arrives.
    pub(crate) fn register(
        &self,
        tags: &'static [&'static str],
        id: Option<String>,
    ) -> oneshot::Receiver<ServerMessage> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock();
        // Requests whose callers gave up (e.g. handshake timeout) must not
        // swallow frames meant for live ones.
        pending.retain(|entry| !entry.tx.is_closed());
        pending.push(Pending { tags, id, tx });
        rx
    }

    /// Register a persistent handler for `collection` data pushes.
    pub(crate) fn add_persistent(&self, collection: &str, handler: EventHandler) -> HandlerToken {
        let token = HandlerToken(self.handler_counter.fetch_add(1, Ordering::Relaxed));
        self.persistent
            .entry(collection.to_string())
            .or_default()
            .push((token, handler));
        token
    }

    /// Remove one persistent handler.
    pub(crate) fn remove_persistent(&self, collection: &str, token: HandlerToken) {
        if let Some(mut handlers) = self.persistent.get_mut(collection) {
            handlers.retain(|(registered, _)| *registered != token);
        }
    }

    /// Route one inbound frame to persistent handlers or exactly one
    /// pending request.
    pub(crate) fn dispatch(&self, message: ServerMessage) {
        match message {
            ServerMessage::Added { collection, id, fields }
            | ServerMessage::Changed { collection, id, fields } => {
                self.deliver(&StreamEvent {
                    collection,
                    id: Some(id),
                    fields,
                });
            }
            ServerMessage::Removed { collection, id } => {
                self.deliver(&StreamEvent {
                    collection,
                    id: Some(id),
                    fields: Value::Null,
                });
            }
            // A single ready frame can acknowledge several subscriptions.
            ServerMessage::Ready { subs } => {
                for sub in subs {
                    let frame = ServerMessage::Ready {
                        subs: vec![sub.clone()],
                    };
                    self.complete("ready", Some(&sub), frame);
                }
            }
            other => {
                let tag = other.tag();
                let id = other.correlation_id().map(ToOwned::to_owned);
                self.complete(tag, id.as_deref(), other);
            }
        }
    }

    fn deliver(&self, event: &StreamEvent) {
        match self.persistent.get(&event.collection) {
            Some(handlers) => {
                for (_, handler) in handlers.iter() {
                    handler(event);
                }
            }
            None => trace!(collection = %event.collection, "data push with no handler"),
        }
    }

    /// Complete exactly one live pending request matching `tag`/`id`.
    fn complete(&self, tag: &str, id: Option<&str>, message: ServerMessage) {
        let mut pending = self.pending.lock();
        loop {
            let Some(index) = pending.iter().position(|entry| entry.matches(tag, id)) else {
                debug!(tag, ?id, "frame matched no pending request");
                return;
            };
            let entry = pending.remove(index);
            if entry.tx.send(message.clone()).is_ok() {
                return;
            }
            // Receiver already dropped; try the next match.
        }
    }

    /// Drop every pending request; their receivers observe closure.
    ///
    /// Used by explicit close only — pending requests wait across transient
    /// reconnects.
    pub(crate) fn fail_all(&self) {
        self.pending.lock().clear();
    }
}
