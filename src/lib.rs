//! Public API for the `rivulet` library.
//!
//! `rivulet` is an async client for a DDP-style publish/subscribe and
//! remote-procedure-call protocol carried over a persistent WebSocket. It
//! maintains one logical session with an upstream server, multiplexes method
//! calls and stream subscriptions over that session, survives transport
//! failures transparently (reconnect, login resume, resubscription), and
//! exposes a filtered stream of room-message events to the application.
//!
//! # Examples
//!
//! ```no_run
//! use rivulet::{Client, Credentials, MessagePolicy};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), rivulet::ClientError> {
//! let client = Client::builder()
//!     .host("chat.example.com")
//!     .use_tls(true)
//!     .credentials(Credentials::password("bot", "hunter2"))
//!     .connect()
//!     .await?;
//!
//! client.on_message(MessagePolicy::rooms(["GENERAL"]), |message, _room| {
//!     println!("{}: {}", message.author_id, message.text);
//! });
//! # Ok(())
//! # }
//! ```

pub mod auth;
mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod subscription;
pub mod transport;

pub use auth::{Credentials, UserInfo};
pub use client::{Client, ClientBuilder};
pub use codec::{ClientMessage, MethodFailure, ServerMessage};
pub use config::ClientConfig;
pub use connection::SessionState;
pub use dispatch::StreamEvent;
pub use error::{ClientError, TransportError};
pub use filter::{Message, MessagePolicy, RoomKind, RoomMeta, RoomScope};
pub use subscription::Subscription;
pub use transport::{Connect, Transport, WsConnector};
