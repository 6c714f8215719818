//! Builder assembling a [`Client`] and opening its first session.

use std::{
    sync::{Arc, atomic::AtomicBool},
    time::Duration,
};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    auth::Credentials,
    cache::MethodCache,
    client::{Client, ClientInner},
    config::ClientConfig,
    connection::Session,
    dispatch::Dispatcher,
    error::ClientError,
    subscription::SubscriptionRegistry,
    transport::{Connect, WsConnector},
};

/// Builder for [`Client`].
///
/// # Examples
///
/// ```no_run
/// use rivulet::{Client, Credentials};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), rivulet::ClientError> {
/// let client = Client::builder()
///     .host("chat.example.com")
///     .use_tls(true)
///     .credentials(Credentials::password("bot", "hunter2"))
///     .connect()
///     .await?;
/// # let _ = client;
/// # Ok(())
/// # }
/// ```
#[must_use]
pub struct ClientBuilder {
    config: ClientConfig,
    credentials: Option<Credentials>,
    connector: Box<dyn Connect>,
}

impl ClientBuilder {
    pub(crate) fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            credentials: None,
            connector: Box::new(WsConnector),
        }
    }

    /// Server host; any protocol prefix is stripped.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config = self.config.host(host);
        self
    }

    /// Connect with TLS (`wss`) instead of plaintext (`ws`).
    pub fn use_tls(mut self, enabled: bool) -> Self {
        self.config = self.config.use_tls(enabled);
        self
    }

    /// Deadline for the handshake acknowledgement.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.connect_timeout(timeout);
        self
    }

    /// Interval between keepalive pings.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.keepalive_interval(interval);
        self
    }

    /// Fixed delay between reconnect attempts.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config = self.config.reconnect_delay(delay);
        self
    }

    /// Replace the configuration wholesale.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Credentials presented automatically once the handshake completes.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Replace the transport connector.
    ///
    /// Tests inject in-memory transports through this seam.
    pub fn connector(mut self, connector: impl Connect + 'static) -> Self {
        self.connector = Box::new(connector);
        self
    }

    /// Open the session: dial the transport, run the handshake, and log in
    /// when credentials were supplied.
    ///
    /// # Errors
    ///
    /// [`ClientError::Transport`] if the transport cannot be established,
    /// [`ClientError::ConnectTimeout`] if the handshake acknowledgement does
    /// not arrive in time, and [`ClientError::Authentication`] if the
    /// supplied credentials are rejected.
    pub async fn connect(self) -> Result<Client, ClientError> {
        let inner = Arc::new(ClientInner {
            config: self.config,
            connector: self.connector,
            dispatcher: Dispatcher::new(),
            registry: SubscriptionRegistry::default(),
            cache: MethodCache::default(),
            session: Mutex::new(Session::default()),
            outbound: Mutex::new(None),
            reconnecting: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });
        if let Err(err) = Arc::clone(&inner).open_session().await {
            // Stop the pump before surfacing the error so a half-open
            // session cannot linger or start reconnecting.
            inner.close();
            return Err(err);
        }
        if let Some(credentials) = self.credentials {
            if let Err(err) = inner.authenticate(credentials).await {
                inner.close();
                return Err(err);
            }
        }
        Ok(Client { inner })
    }
}
