//! Per-session types: identifiers, lifecycle state, registry entries

use std::collections::HashSet;

use tokio::sync::mpsc;

use parley_protocol::Message;

/// Unique session identifier
///
/// Positive, allocated monotonically by the registry; never reused for the
/// lifetime of the server process. The wire `sender_id` field carries the
/// raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(i32);

impl SessionId {
    /// Create a SessionId from a raw value
    ///
    /// Only the registry allocates ids; this exists for tests and for
    /// interpreting wire values.
    pub fn from_raw(value: i32) -> Self {
        Self(value)
    }

    /// Get the raw value
    pub fn value(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session({})", self.0)
    }
}

/// Dispatcher-local lifecycle state of one connection
///
/// Transitions are one-directional: Connecting → Active → Closing → Closed.
/// No state is ever re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    fn rank(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Active => 1,
            Self::Closing => 2,
            Self::Closed => 3,
        }
    }

    /// Move forward to `next`; returns false (and stays put) on any
    /// attempt to move backwards or sideways
    pub fn advance(&mut self, next: SessionState) -> bool {
        if next.rank() > self.rank() {
            *self = next;
            true
        } else {
            false
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Entry for an admitted session
pub struct SessionEntry {
    /// Display name, unique among active sessions
    pub name: String,
    /// Channel draining into this session's connection
    pub outbound: mpsc::Sender<Message>,
    /// Sender ids this session refuses to receive from; mutated only
    /// through registry calls made by the owning dispatcher
    pub blocked: HashSet<i32>,
}

impl std::fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntry")
            .field("name", &self.name)
            .field("blocked", &self.blocked)
            .field("outbound_closed", &self.outbound.is_closed())
            .finish()
    }
}

/// Point-in-time view of one active session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub name: String,
}
