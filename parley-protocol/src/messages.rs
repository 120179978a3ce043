//! Chat message types

use crate::SYSTEM_SENDER_ID;

/// Kind of a chat message, with its fixed wire tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Handshake carrying the desired display name as payload
    Join = 0,
    /// Ordinary chat text (also carries `ban <id>` / `unban <id>` commands)
    Text = 1,
    /// Client-initiated disconnect
    Logout = 2,
    /// Server is going down; sent to every session before teardown
    Shutdown = 3,
}

impl MessageKind {
    /// Wire tag byte for this kind
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Parse a wire tag byte
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Join),
            1 => Some(Self::Text),
            2 => Some(Self::Logout),
            3 => Some(Self::Shutdown),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Join => "Join",
            Self::Text => "Text",
            Self::Logout => "Logout",
            Self::Shutdown => "Shutdown",
        };
        write!(f, "{}", name)
    }
}

/// One unit of communication between client and server
///
/// `sender_id` 0 is reserved for server-originated messages; real sessions
/// are assigned positive ids at admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender_id: i32,
    pub kind: MessageKind,
    pub payload: String,
}

impl Message {
    /// Create a message of the given kind
    pub fn new(sender_id: i32, kind: MessageKind, payload: impl Into<String>) -> Self {
        Self {
            sender_id,
            kind,
            payload: payload.into(),
        }
    }

    /// Handshake message declaring a display name
    pub fn join(name: impl Into<String>) -> Self {
        Self::new(SYSTEM_SENDER_ID, MessageKind::Join, name)
    }

    /// Chat text from the given sender
    pub fn text(sender_id: i32, payload: impl Into<String>) -> Self {
        Self::new(sender_id, MessageKind::Text, payload)
    }

    /// Server-originated text (sender id 0)
    pub fn system(payload: impl Into<String>) -> Self {
        Self::new(SYSTEM_SENDER_ID, MessageKind::Text, payload)
    }

    /// Client-initiated disconnect
    pub fn logout(sender_id: i32) -> Self {
        Self::new(sender_id, MessageKind::Logout, "")
    }

    /// Server shutdown notice
    pub fn shutdown() -> Self {
        Self::new(SYSTEM_SENDER_ID, MessageKind::Shutdown, "")
    }

    /// Whether this message originated from the server itself
    pub fn is_system(&self) -> bool {
        self.sender_id == SYSTEM_SENDER_ID
    }
}
