//! Named session states and the session record.

use tokio::time::Instant;

use crate::auth::{Credentials, UserInfo};

/// Lifecycle states for a client session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No transport; nothing in flight.
    Closed,
    /// Transport dialling or handshake in flight.
    Opening,
    /// Handshake acknowledged; no authenticated identity.
    Open,
    /// Handshake acknowledged and login completed.
    Authenticated,
    /// Explicit close in progress.
    Closing,
}

impl SessionState {
    /// Whether calls may be issued in this state.
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open | Self::Authenticated)
    }

    /// Whether moving from `self` to `next` is part of the normal
    /// lifecycle. Transport loss additionally forces any open state back to
    /// [`SessionState::Opening`] while the reconnect loop runs.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Closed, Self::Opening)
                | (Self::Opening, Self::Open | Self::Closed | Self::Opening)
                | (Self::Open, Self::Authenticated | Self::Closing | Self::Opening)
                | (Self::Authenticated, Self::Open | Self::Closing | Self::Opening)
                | (Self::Closing, Self::Closed)
        )
    }
}

/// Mutable session record owned by the client core.
///
/// Fields are cleared wholesale on explicit disconnect.
pub(crate) struct Session {
    pub(crate) state: SessionState,
    /// Server-assigned session identifier from the handshake.
    pub(crate) id: Option<String>,
    /// Authenticated identity, if login has completed.
    pub(crate) identity: Option<UserInfo>,
    /// Credential used to re-authenticate transparently after reconnects.
    pub(crate) resume: Option<Credentials>,
    /// Instant of the most recent keepalive pong.
    pub(crate) last_keepalive: Option<Instant>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: SessionState::Closed,
            id: None,
            identity: None,
            resume: None,
            last_keepalive: None,
        }
    }
}

impl Session {
    /// Reset every field to the disconnected baseline.
    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}
