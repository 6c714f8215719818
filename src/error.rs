//! Error types for rivulet client operations.

use crate::codec::MethodFailure;

/// Errors produced by the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The underlying WebSocket could not be established or failed mid-use.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// The transport was closed.
    #[error("transport closed")]
    Closed,
}

/// Errors surfaced to callers of [`Client`](crate::Client) operations.
///
/// Transport-level failures after the initial connect are recovered
/// internally via reconnection and never appear here; the variants below are
/// the caller-visible outcomes.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No handshake acknowledgement arrived within the configured timeout.
    #[error("timed out waiting for the server handshake")]
    ConnectTimeout,
    /// The transport could not be opened.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The server rejected the handshake and proposed a different protocol
    /// version.
    #[error("server rejected protocol version {requested} (offered {offered:?})")]
    UnsupportedProtocol {
        /// Version this client requested.
        requested: String,
        /// Version the server proposed instead, if it named one.
        offered: Option<String>,
    },
    /// The server rejected the supplied credentials.
    #[error("authentication failed: {reason}")]
    Authentication {
        /// Server-supplied failure reason.
        reason: String,
    },
    /// An operation requiring a live session was attempted while
    /// disconnected or reconnecting.
    #[error("not connected")]
    NotConnected,
    /// The server rejected a subscribe request, or the subscription handle
    /// is unknown.
    #[error("subscription failed: {reason}")]
    Subscription {
        /// Server-supplied failure reason.
        reason: String,
    },
    /// The server reported an application error for a method call.
    #[error("method call failed: {0}")]
    Method(MethodFailure),
    /// The connection was closed before a response arrived.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
}
