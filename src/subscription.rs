//! Registry of active stream subscriptions.
//!
//! Entries are keyed by the id the server assigned when the subscription was
//! first established. That key stays stable for the life of the handle even
//! though reconnection replaces the server-side id underneath it.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde_json::Value;

use crate::{
    client::ClientInner,
    dispatch::{EventHandler, HandlerToken, StreamEvent},
    error::ClientError,
};

pub(crate) struct SubscriptionEntry {
    /// Current server-side correlation id; replaced on resubscription.
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) params: Vec<Value>,
    /// Persistent handlers attached through [`Subscription::on_event`].
    pub(crate) handlers: Vec<HandlerToken>,
}

/// Tracks active subscriptions so they can be torn down individually, all at
/// once, or re-established after a reconnect.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    entries: DashMap<String, SubscriptionEntry>,
}

impl SubscriptionRegistry {
    pub(crate) fn insert(&self, key: String, entry: SubscriptionEntry) {
        self.entries.insert(key, entry);
    }

    pub(crate) fn remove(&self, key: &str) -> Option<SubscriptionEntry> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    /// Remove and return every tracked entry.
    pub(crate) fn drain(&self) -> Vec<SubscriptionEntry> {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.remove(&key))
            .collect()
    }

    /// Snapshot of `(key, name, params)` for every tracked entry.
    pub(crate) fn snapshot(&self) -> Vec<(String, String, Vec<Value>)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.name.clone(), entry.params.clone()))
            .collect()
    }

    /// Replace the server-side id for `key` after a resubscription.
    pub(crate) fn set_current_id(&self, key: &str, id: String) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.id = id;
        }
    }

    /// Record a handler token for teardown; `false` if `key` is unknown.
    pub(crate) fn push_handler(&self, key: &str, token: HandlerToken) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.handlers.push(token);
                true
            }
            None => false,
        }
    }
}

/// Handle to one active subscription.
///
/// The handle stays valid across reconnects: the registry re-establishes the
/// stream with the same name and parameters and any attached handlers keep
/// firing.
pub struct Subscription {
    pub(crate) key: String,
    pub(crate) name: String,
    pub(crate) first_param: Option<String>,
    pub(crate) client: Weak<ClientInner>,
}

impl Subscription {
    /// Stable identifier the registry tracks this subscription under.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stream name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach a persistent handler for this subscription's events.
    ///
    /// When the subscription was created with a sub-stream name as its first
    /// parameter, events addressed to other sub-streams of the same
    /// collection are not delivered.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let Some(inner) = self.client.upgrade() else {
            return;
        };
        let expected = self.first_param.clone();
        let wrapped: EventHandler = Arc::new(move |event| {
            if let Some(expected) = &expected {
                if event.event_name().is_some_and(|name| name != expected.as_str()) {
                    return;
                }
            }
            handler(event);
        });
        let token = inner.dispatcher.add_persistent(&self.name, wrapped);
        if !inner.registry.push_handler(&self.key, token) {
            // Unsubscribed in the meantime; do not leak the handler.
            inner.dispatcher.remove_persistent(&self.name, token);
        }
    }

    /// Tear down this subscription.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Subscription`] if the registry no longer knows
    /// this handle, and [`ClientError::NotConnected`] if no session is live.
    pub async fn unsubscribe(&self) -> Result<(), ClientError> {
        let Some(inner) = self.client.upgrade() else {
            return Err(ClientError::ConnectionClosed);
        };
        inner.unsubscribe_key(&self.key).await
    }
}
