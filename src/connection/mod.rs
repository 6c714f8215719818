//! Session lifecycle: handshake pump, keepalive, and reconnection.
//!
//! One actor task owns the transport for the life of a session and pumps it
//! with a biased `select!` loop: shutdown first, outbound frames next,
//! inbound frames, then the keepalive timer. Everything else in the crate
//! reaches the wire through an mpsc sender that is dropped while
//! disconnected, which is what makes calls fail fast instead of queueing.

mod actor;
mod state;

use std::sync::{Arc, atomic::Ordering};

pub(crate) use actor::{SessionEnd, run_session};
pub(crate) use state::Session;
pub use state::SessionState;
use tracing::{info, warn};

use crate::client::ClientInner;

/// Schedule a reopen after transport loss.
///
/// Guarded so at most one reopen attempt is pending at a time; the loop
/// retries at the configured fixed delay until the session is back or the
/// client is closed.
pub(crate) fn schedule_reconnect(inner: &Arc<ClientInner>) {
    if inner.shutdown.is_cancelled() {
        return;
    }
    if inner.reconnecting.swap(true, Ordering::SeqCst) {
        return;
    }
    inner.set_state(SessionState::Opening);
    inner.drop_outbound();
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let delay = inner.config.reconnect_delay_value();
        loop {
            tokio::select! {
                () = inner.shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
            match Arc::clone(&inner).reopen().await {
                Ok(()) => {
                    // Clear the guard before returning so a loss right after
                    // reopen can schedule the next attempt.
                    inner.reconnecting.store(false, Ordering::SeqCst);
                    info!("session re-established");
                    return;
                }
                Err(err) => warn!(error = %err, "reconnect attempt failed"),
            }
        }
        inner.reconnecting.store(false, Ordering::SeqCst);
    });
}
