//! Public client facade.
//!
//! [`Client`] is a cheaply cloneable handle to one logical session. All
//! protocol state lives in [`ClientInner`], owned by an `Arc` shared with
//! the session pump and the reconnect loop; the application never touches
//! protocol state except through the operations here.

mod builder;

use std::{
    fmt,
    sync::{Arc, atomic::AtomicBool},
};

pub use builder::ClientBuilder;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::{
    sync::mpsc,
    time::{Duration, Instant, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    auth::{Credentials, UserInfo},
    cache::MethodCache,
    codec::{ClientMessage, MethodFailure, PROTOCOL_VERSION, ServerMessage},
    connection::{self, Session, SessionEnd, SessionState},
    dispatch::Dispatcher,
    error::ClientError,
    filter::{Message, MessageFilter, MessagePolicy, ROOM_MESSAGE_STREAM, RoomMeta, parse_room_message},
    subscription::{Subscription, SubscriptionEntry, SubscriptionRegistry},
    transport::Connect,
};

/// Handle to one logical session with the upstream server.
///
/// Clones share the session. Explicitly [`close`](Client::close) the client
/// when done; dropping handles alone leaves the session pump running.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

pub(crate) struct ClientInner {
    pub(crate) config: crate::config::ClientConfig,
    pub(crate) connector: Box<dyn Connect>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) cache: MethodCache,
    pub(crate) session: Mutex<Session>,
    /// Present while a session pump is live; dropped while disconnected so
    /// calls fail fast instead of queueing.
    pub(crate) outbound: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    /// Guard ensuring at most one reopen attempt is pending.
    pub(crate) reconnecting: AtomicBool,
    pub(crate) shutdown: CancellationToken,
}

impl Client {
    /// Start building a client.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.session.lock().state
    }

    /// Server-assigned session identifier, when connected.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.inner.session.lock().id.clone()
    }

    /// Authenticated identity, if login has completed.
    #[must_use]
    pub fn user(&self) -> Option<UserInfo> {
        self.inner.session.lock().identity.clone()
    }

    /// Instant of the most recent keepalive pong, if any.
    #[must_use]
    pub fn last_keepalive(&self) -> Option<Instant> {
        self.inner.session.lock().last_keepalive
    }

    /// Log in with `credentials` and resubscribe every tracked stream.
    ///
    /// On success the resume token is stored so reconnects re-authenticate
    /// transparently.
    ///
    /// # Errors
    ///
    /// [`ClientError::Authentication`] when the server rejects the
    /// credentials; [`ClientError::NotConnected`] while disconnected.
    pub async fn login(&self, credentials: Credentials) -> Result<UserInfo, ClientError> {
        let user = self.inner.authenticate(credentials).await?;
        self.inner.resubscribe_all().await?;
        Ok(user)
    }

    /// Log out: clear the stored identity and resume token, tear down every
    /// subscription, and invalidate the server-side session.
    ///
    /// Calling while already logged out succeeds trivially.
    ///
    /// # Errors
    ///
    /// Propagates server-side failures of the logout call itself.
    pub async fn logout(&self) -> Result<(), ClientError> {
        self.inner.logout().await
    }

    /// Invoke a server method and await its result.
    ///
    /// # Errors
    ///
    /// [`ClientError::Method`] carries a server-reported application error;
    /// [`ClientError::NotConnected`] is returned immediately while
    /// disconnected; [`ClientError::ConnectionClosed`] if the client is
    /// closed before the result arrives.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        self.inner.call(method, params).await
    }

    /// Subscribe to a named stream.
    ///
    /// The returned handle stays valid across reconnects.
    ///
    /// # Errors
    ///
    /// [`ClientError::Subscription`] when the server rejects the request;
    /// [`ClientError::NotConnected`] while disconnected.
    pub async fn subscribe(
        &self,
        name: &str,
        params: Vec<Value>,
    ) -> Result<Subscription, ClientError> {
        Arc::clone(&self.inner).subscribe(name, params).await
    }

    /// Tear down every tracked subscription.
    ///
    /// # Errors
    ///
    /// Propagates the first teardown failure other than being disconnected.
    pub async fn unsubscribe_all(&self) -> Result<(), ClientError> {
        self.inner.unsubscribe_all().await
    }

    /// Establish cache bounds for `method`, discarding any cached entries.
    pub fn cache_create(&self, method: &str, max_entries: usize, max_age: Duration) {
        self.inner.cache.create(method, max_entries, max_age);
    }

    /// Cached result for `(method, key)`, if present and not aged out.
    #[must_use]
    pub fn cache_get(&self, method: &str, key: &str) -> Option<Value> {
        self.inner.cache.get(method, key)
    }

    /// Drop one cached entry, or every entry for `method` when `key` is
    /// `None`.
    pub fn cache_invalidate(&self, method: &str, key: Option<&str>) {
        self.inner.cache.invalidate(method, key);
    }

    /// Invoke `method` with `[key]` as its parameter list, serving the
    /// result from the method cache when possible.
    ///
    /// Concurrent calls for the same uncached key are not deduplicated;
    /// both round-trip to the server.
    ///
    /// # Errors
    ///
    /// Same as [`call`](Client::call).
    pub async fn call_cached(&self, method: &str, key: &str) -> Result<Value, ClientError> {
        self.inner.call_cached(method, key).await
    }

    /// Install the message filter pipeline.
    ///
    /// `callback` runs for every room-message event that passes `policy`.
    /// The de-duplication watermark starts now: backlog older than the
    /// installation instant never fires.
    pub fn on_message<F>(&self, policy: MessagePolicy, callback: F)
    where
        F: Fn(&Message, &RoomMeta) + Send + Sync + 'static,
    {
        Arc::clone(&self.inner).on_message(policy, callback);
    }

    /// Close the session: tear down subscriptions, stop the pump and any
    /// reconnect loop, and reject pending requests with
    /// [`ClientError::ConnectionClosed`].
    pub async fn close(&self) {
        self.inner.close();
    }
}

impl ClientInner {
    pub(crate) fn state(&self) -> SessionState {
        self.session.lock().state
    }

    pub(crate) fn set_state(&self, next: SessionState) {
        let mut session = self.session.lock();
        if !session.state.can_transition_to(next) && session.state != next {
            debug!(from = ?session.state, to = ?next, "out-of-band state transition");
        }
        session.state = next;
    }

    pub(crate) fn drop_outbound(&self) {
        *self.outbound.lock() = None;
    }

    pub(crate) fn note_keepalive(&self) {
        self.session.lock().last_keepalive = Some(Instant::now());
    }

    /// Queue a frame for the session pump.
    pub(crate) fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        let outbound = self.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            return Err(ClientError::NotConnected);
        };
        tx.send(message).map_err(|_| ClientError::NotConnected)
    }

    /// Dial the transport, spawn the session pump, and run the handshake.
    pub(crate) async fn open_session(self: Arc<Self>) -> Result<(), ClientError> {
        self.set_state(SessionState::Opening);
        let url = self.config.endpoint_url();
        debug!(%url, "opening transport");
        let transport = match self.connector.connect(&url).await {
            Ok(transport) => transport,
            Err(err) => {
                self.set_state(SessionState::Closed);
                return Err(ClientError::Transport(err));
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        *self.outbound.lock() = Some(tx);
        let pump = Arc::clone(&self);
        tokio::spawn(async move {
            match connection::run_session(Arc::clone(&pump), transport, rx).await {
                SessionEnd::Shutdown => debug!("session pump stopped"),
                SessionEnd::TransportLost => connection::schedule_reconnect(&pump),
            }
        });

        match self.handshake().await {
            Ok(session_id) => {
                info!(session = %session_id, "handshake acknowledged");
                let mut session = self.session.lock();
                session.id = Some(session_id);
                session.state = SessionState::Open;
                Ok(())
            }
            Err(err) => {
                // Tear down the half-open session; dropping the sender stops
                // the pump without scheduling a reconnect of its own.
                self.drop_outbound();
                Err(err)
            }
        }
    }

    async fn handshake(&self) -> Result<String, ClientError> {
        let reply = self.dispatcher.register(&["connected", "failed"], None);
        self.send(ClientMessage::Connect {
            version: PROTOCOL_VERSION.to_string(),
            support: vec![PROTOCOL_VERSION.to_string()],
        })?;
        let reply = timeout(self.config.connect_timeout_value(), reply)
            .await
            .map_err(|_| ClientError::ConnectTimeout)?
            .map_err(|_| ClientError::ConnectionClosed)?;
        match reply {
            ServerMessage::Connected { session } => Ok(session),
            ServerMessage::Failed { version } => Err(ClientError::UnsupportedProtocol {
                requested: PROTOCOL_VERSION.to_string(),
                offered: version,
            }),
            other => {
                debug!(tag = other.tag(), "unexpected handshake reply");
                Err(ClientError::ConnectionClosed)
            }
        }
    }

    /// Reopen after transport loss: handshake, resume login, resubscribe.
    pub(crate) async fn reopen(self: Arc<Self>) -> Result<(), ClientError> {
        Arc::clone(&self).open_session().await?;
        let resume = self.session.lock().resume.clone();
        if let Some(credentials) = resume {
            match self.authenticate(credentials).await {
                Ok(_) => {}
                Err(ClientError::Authentication { reason }) => {
                    // The stored token was invalidated server-side. Keep the
                    // session open unauthenticated rather than retrying a
                    // credential that can no longer work.
                    warn!(%reason, "resume login failed");
                    self.session.lock().resume = None;
                }
                Err(err) => return Err(err),
            }
        }
        self.resubscribe_all().await
    }

    /// Run the login exchange and store the resulting identity.
    ///
    /// Does not resubscribe; [`Client::login`] layers that on top.
    pub(crate) async fn authenticate(
        &self,
        credentials: Credentials,
    ) -> Result<UserInfo, ClientError> {
        let result = match self.call("login", vec![credentials.to_params()]).await {
            Ok(value) => value,
            Err(ClientError::Method(failure)) => {
                return Err(ClientError::Authentication {
                    reason: normalize_auth_reason(&failure),
                });
            }
            Err(err) => return Err(err),
        };
        let user = UserInfo::from_login_result(&result).ok_or_else(|| {
            ClientError::Authentication {
                reason: "malformed login result".to_string(),
            }
        })?;
        {
            let mut session = self.session.lock();
            session.identity = Some(user.clone());
            session.resume = Some(Credentials::Resume {
                token: user.token.clone(),
            });
            session.state = SessionState::Authenticated;
        }
        info!(user = %user.id, "authenticated");
        Ok(user)
    }

    pub(crate) async fn logout(&self) -> Result<(), ClientError> {
        let was_logged_in = {
            let mut session = self.session.lock();
            let had_identity = session.identity.take().is_some();
            session.resume = None;
            had_identity
        };
        self.unsubscribe_all().await?;
        if !was_logged_in {
            return Ok(());
        }
        match self.call("logout", Vec::new()).await {
            Ok(_) => {}
            // Nothing to invalidate server-side without a session.
            Err(ClientError::NotConnected) => {}
            Err(err) => return Err(err),
        }
        let mut session = self.session.lock();
        if session.state == SessionState::Authenticated {
            session.state = SessionState::Open;
        }
        Ok(())
    }

    pub(crate) async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        if !self.state().is_open() {
            return Err(ClientError::NotConnected);
        }
        let id = self.dispatcher.next_id();
        let reply = self.dispatcher.register(&["result"], Some(id.clone()));
        self.send(ClientMessage::Method {
            id,
            method: method.to_string(),
            params,
        })?;
        let reply = reply.await.map_err(|_| ClientError::ConnectionClosed)?;
        match reply {
            ServerMessage::Result {
                error: Some(failure),
                ..
            } => Err(ClientError::Method(failure)),
            ServerMessage::Result { result, .. } => Ok(result.unwrap_or(Value::Null)),
            other => {
                debug!(tag = other.tag(), "unexpected reply to method call");
                Err(ClientError::ConnectionClosed)
            }
        }
    }

    pub(crate) async fn call_cached(&self, method: &str, key: &str) -> Result<Value, ClientError> {
        if let Some(value) = self.cache.get(method, key) {
            trace!(method, key, "serving method result from cache");
            return Ok(value);
        }
        // Concurrent misses for the same key intentionally race; both
        // round-trip to the server.
        let value = self
            .call(method, vec![Value::String(key.to_string())])
            .await?;
        self.cache.insert(method, key, value.clone());
        Ok(value)
    }

    pub(crate) async fn subscribe(
        self: Arc<Self>,
        name: &str,
        params: Vec<Value>,
    ) -> Result<Subscription, ClientError> {
        if !self.state().is_open() {
            return Err(ClientError::NotConnected);
        }
        let id = self.dispatcher.next_id();
        let reply = self
            .dispatcher
            .register(&["ready", "nosub"], Some(id.clone()));
        self.send(ClientMessage::Sub {
            id: id.clone(),
            name: name.to_string(),
            params: params.clone(),
        })?;
        let reply = reply.await.map_err(|_| ClientError::ConnectionClosed)?;
        match reply {
            ServerMessage::Ready { .. } => {
                debug!(subscription = %id, stream = name, "subscription ready");
                let first_param = params.first().and_then(Value::as_str).map(str::to_string);
                self.registry.insert(
                    id.clone(),
                    SubscriptionEntry {
                        id: id.clone(),
                        name: name.to_string(),
                        params,
                        handlers: Vec::new(),
                    },
                );
                Ok(Subscription {
                    key: id,
                    name: name.to_string(),
                    first_param,
                    client: Arc::downgrade(&self),
                })
            }
            ServerMessage::Nosub { error, .. } => Err(ClientError::Subscription {
                reason: error.map_or_else(
                    || "subscription refused".to_string(),
                    |failure| failure.to_string(),
                ),
            }),
            other => {
                debug!(tag = other.tag(), "unexpected reply to subscribe");
                Err(ClientError::ConnectionClosed)
            }
        }
    }

    pub(crate) async fn unsubscribe_key(&self, key: &str) -> Result<(), ClientError> {
        let Some(entry) = self.registry.remove(key) else {
            return Err(ClientError::Subscription {
                reason: format!("unknown subscription {key}"),
            });
        };
        for token in &entry.handlers {
            self.dispatcher.remove_persistent(&entry.name, *token);
        }
        self.finish_unsubscribe(&entry.id).await
    }

    async fn finish_unsubscribe(&self, id: &str) -> Result<(), ClientError> {
        let reply = self
            .dispatcher
            .register(&["result", "nosub"], Some(id.to_string()));
        self.send(ClientMessage::Unsub { id: id.to_string() })?;
        // A `nosub` reply means the server had already dropped the
        // subscription (e.g. across a reconnect); that counts as success.
        reply.await.map_err(|_| ClientError::ConnectionClosed)?;
        Ok(())
    }

    pub(crate) async fn unsubscribe_all(&self) -> Result<(), ClientError> {
        let entries = self.registry.drain();
        for entry in &entries {
            for token in &entry.handlers {
                self.dispatcher.remove_persistent(&entry.name, *token);
            }
        }
        for entry in entries {
            match self.finish_unsubscribe(&entry.id).await {
                Ok(()) => {}
                // Nothing to tear down server-side while disconnected.
                Err(ClientError::NotConnected) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Re-issue every tracked subscription after a reopen, replacing each
    /// entry's server-side id while keeping its stable key and handlers.
    pub(crate) async fn resubscribe_all(&self) -> Result<(), ClientError> {
        let snapshot = self.registry.snapshot();
        if snapshot.is_empty() {
            return Ok(());
        }
        info!(count = snapshot.len(), "re-establishing subscriptions");
        for (key, name, params) in snapshot {
            let id = self.dispatcher.next_id();
            let reply = self
                .dispatcher
                .register(&["ready", "nosub"], Some(id.clone()));
            self.send(ClientMessage::Sub {
                id: id.clone(),
                name,
                params,
            })?;
            match reply.await {
                Ok(ServerMessage::Ready { .. }) => self.registry.set_current_id(&key, id),
                Ok(ServerMessage::Nosub { error, .. }) => {
                    warn!(
                        subscription = %key,
                        ?error,
                        "server refused resubscription; will retry on next reconnect"
                    );
                }
                Ok(other) => {
                    debug!(tag = other.tag(), "unexpected reply to resubscribe");
                    return Err(ClientError::ConnectionClosed);
                }
                Err(_) => return Err(ClientError::ConnectionClosed),
            }
        }
        Ok(())
    }

    pub(crate) fn on_message<F>(self: Arc<Self>, policy: MessagePolicy, callback: F)
    where
        F: Fn(&Message, &RoomMeta) + Send + Sync + 'static,
    {
        let filter = Mutex::new(MessageFilter::new(policy));
        let weak = Arc::downgrade(&self);
        let _token = self.dispatcher.add_persistent(
            ROOM_MESSAGE_STREAM,
            Arc::new(move |event| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let Some((message, room)) = parse_room_message(event) else {
                    trace!("ignoring malformed room message event");
                    return;
                };
                let own_id = inner
                    .session
                    .lock()
                    .identity
                    .as_ref()
                    .map(|user| user.id.clone());
                let verdict = filter.lock().evaluate(own_id.as_deref(), &message, &room);
                match verdict {
                    Ok(()) => callback(&message, &room),
                    Err(rejection) => {
                        trace!(?rejection, message = %message.id, "message filtered")
                    }
                }
            }),
        );
    }

    pub(crate) fn close(&self) {
        if self.state() == SessionState::Closed {
            return;
        }
        self.set_state(SessionState::Closing);
        // Best-effort teardown; the transport is about to go away anyway.
        for entry in self.registry.drain() {
            for token in &entry.handlers {
                self.dispatcher.remove_persistent(&entry.name, *token);
            }
            if let Err(err) = self.send(ClientMessage::Unsub { id: entry.id }) {
                debug!(error = %err, "unsubscribe during close failed");
            }
        }
        self.shutdown.cancel();
        self.drop_outbound();
        self.dispatcher.fail_all();
        let mut session = self.session.lock();
        session.clear();
    }
}

/// Collapse "unknown user" into the generic invalid-credentials message so
/// callers cannot distinguish which failure mode occurred.
fn normalize_auth_reason(failure: &MethodFailure) -> String {
    let reason = failure.to_string();
    if reason.eq_ignore_ascii_case("user not found") {
        "Invalid credentials".to_string()
    } else {
        reason
    }
}
