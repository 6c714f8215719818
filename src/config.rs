//! Client configuration.

use std::time::Duration;

/// Configuration consumed by the connection core.
///
/// Setters follow the builder convention and can be chained. The host may be
/// given with a protocol prefix (`https://`, `wss://`, ...); the prefix is
/// stripped on ingest and only the TLS flag decides the scheme actually used.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use rivulet::ClientConfig;
///
/// let config = ClientConfig::new("https://chat.example.com")
///     .use_tls(true)
///     .keepalive_interval(Duration::from_secs(20));
/// assert_eq!(config.host_str(), "chat.example.com");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    host: String,
    use_tls: bool,
    connect_timeout: Duration,
    keepalive_interval: Duration,
    reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost:3000".to_string(),
            use_tls: false,
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

impl ClientConfig {
    /// Create a configuration for `host` with default timing settings.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self { Self::default().host(host) }

    /// Set the server host, stripping any protocol prefix.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = strip_scheme(&host.into()).to_string();
        self
    }

    /// Connect with TLS (`wss`) instead of plaintext (`ws`).
    #[must_use]
    pub fn use_tls(mut self, enabled: bool) -> Self {
        self.use_tls = enabled;
        self
    }

    /// Deadline for the handshake acknowledgement after the transport opens.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Interval between keepalive pings. Two intervals without a pong
    /// declare the connection stale.
    #[must_use]
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Fixed delay between reconnect attempts.
    ///
    /// The delay is deliberately not exponential: the upstream protocol
    /// expects a responsive bot rather than a backed-off one.
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// The configured host, without a protocol prefix.
    #[must_use]
    pub fn host_str(&self) -> &str { &self.host }

    pub(crate) fn connect_timeout_value(&self) -> Duration { self.connect_timeout }

    pub(crate) fn keepalive_interval_value(&self) -> Duration { self.keepalive_interval }

    pub(crate) fn reconnect_delay_value(&self) -> Duration { self.reconnect_delay }

    /// WebSocket endpoint URL for this configuration.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!("{scheme}://{}/websocket", self.host)
    }
}

fn strip_scheme(raw: &str) -> &str {
    for prefix in ["https://", "http://", "wss://", "ws://"] {
        if let Some(rest) = raw.strip_prefix(prefix) {
            return rest;
        }
    }
    raw
}
