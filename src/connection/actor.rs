//! The session pump: one task owning the transport.

use std::sync::Arc;

use log::{debug, trace, warn};
use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior, interval_at},
};

use crate::{
    client::ClientInner,
    codec::{self, ClientMessage, ServerMessage},
    transport::Transport,
};

/// Why a session pump ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    /// Explicit close; do not reconnect.
    Shutdown,
    /// The transport died or went stale; reconnect.
    TransportLost,
}

/// Keepalive intervals without a pong before the connection is stale.
const MAX_MISSED_PONGS: u8 = 2;

/// Pump one session until shutdown or transport loss.
pub(crate) async fn run_session(
    inner: Arc<ClientInner>,
    mut transport: Box<dyn Transport>,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
) -> SessionEnd {
    let period = inner.config.keepalive_interval_value();
    let mut keepalive = interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut missed_pongs: u8 = 0;

    loop {
        tokio::select! {
            biased;
            () = inner.shutdown.cancelled() => {
                transport.close().await;
                return SessionEnd::Shutdown;
            }
            message = outbound.recv() => {
                let Some(message) = message else {
                    // Sender dropped: the session is being torn down.
                    transport.close().await;
                    return SessionEnd::Shutdown;
                };
                let frame = match codec::encode(&message) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!("dropping unserializable frame: {err}");
                        continue;
                    }
                };
                if let Err(err) = transport.send(frame).await {
                    warn!("transport write failed: {err}");
                    return SessionEnd::TransportLost;
                }
            }
            frame = transport.recv() => {
                match frame {
                    Some(Ok(text)) => {
                        let Some(message) = codec::decode(&text) else {
                            continue;
                        };
                        if let Some(end) =
                            handle_frame(&inner, transport.as_mut(), &mut missed_pongs, message)
                                .await
                        {
                            return end;
                        }
                    }
                    Some(Err(err)) => {
                        warn!("transport read failed: {err}");
                        return SessionEnd::TransportLost;
                    }
                    None => {
                        debug!("transport closed by peer");
                        return SessionEnd::TransportLost;
                    }
                }
            }
            _ = keepalive.tick() => {
                if missed_pongs >= MAX_MISSED_PONGS {
                    warn!("no pong in {MAX_MISSED_PONGS} keepalive intervals; connection is stale");
                    return SessionEnd::TransportLost;
                }
                missed_pongs += 1;
                if let Some(end) = send_now(transport.as_mut(), &ClientMessage::Ping { id: None }).await {
                    return end;
                }
            }
        }
    }
}

/// Handle one decoded inbound frame; `Some` ends the session.
async fn handle_frame(
    inner: &Arc<ClientInner>,
    transport: &mut dyn Transport,
    missed_pongs: &mut u8,
    message: ServerMessage,
) -> Option<SessionEnd> {
    match message {
        // Server pings are answered immediately, no business logic attached.
        ServerMessage::Ping { id } => send_now(transport, &ClientMessage::Pong { id }).await,
        ServerMessage::Pong { .. } => {
            trace!("keepalive pong");
            *missed_pongs = 0;
            inner.note_keepalive();
            None
        }
        other => {
            inner.dispatcher.dispatch(other);
            None
        }
    }
}

/// Send a frame directly on the transport, bypassing the outbound queue.
async fn send_now(transport: &mut dyn Transport, message: &ClientMessage) -> Option<SessionEnd> {
    let frame = match codec::encode(message) {
        Ok(frame) => frame,
        Err(err) => {
            warn!("dropping unserializable frame: {err}");
            return None;
        }
    };
    match transport.send(frame).await {
        Ok(()) => None,
        Err(err) => {
            warn!("transport write failed: {err}");
            Some(SessionEnd::TransportLost)
        }
    }
}
