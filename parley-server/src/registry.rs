//! Session registry
//!
//! Tracks admitted sessions by id and by display name, enforcing name
//! uniqueness and allocating ids. Thread-safe for concurrent access from
//! every connection dispatcher.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use parley_protocol::Message;
use parley_utils::{ParleyError, Result};

use crate::session::{SessionEntry, SessionId, SessionInfo};

/// Registry of all active sessions
///
/// Id allocation and name reservation happen as one atomic step: the name
/// index entry is held while the id is drawn, so two concurrent admissions
/// of the same name see exactly one winner.
pub struct SessionRegistry {
    /// Session id -> entry
    sessions: DashMap<SessionId, SessionEntry>,
    /// Display name -> session id (reverse index for uniqueness)
    names: DashMap<String, SessionId>,
    /// Counter for allocating session ids; ids are never reused
    next_session_id: AtomicI32,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            names: DashMap::new(),
            next_session_id: AtomicI32::new(1),
        }
    }

    // ==================== Admission & Removal ====================

    /// Admit a session under `name`, wiring `outbound` as its delivery
    /// channel
    ///
    /// Returns the allocated id, or [`ParleyError::NameTaken`] if the name
    /// is held by an active session.
    pub fn admit(&self, name: &str, outbound: mpsc::Sender<Message>) -> Result<SessionId> {
        let id = match self.names.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(ParleyError::NameTaken(name.to_string())),
            Entry::Vacant(slot) => {
                let id = SessionId::from_raw(self.next_session_id.fetch_add(1, Ordering::SeqCst));
                slot.insert(id);
                id
            }
        };

        self.sessions.insert(
            id,
            SessionEntry {
                name: name.to_string(),
                outbound,
                blocked: HashSet::new(),
            },
        );

        debug!("Admitted {} as '{}'", id, name);
        Ok(id)
    }

    /// Remove a session from both indices
    ///
    /// Idempotent: removing an absent id is a no-op. The display name is
    /// released only while it still maps to this id, so a name re-admitted
    /// by a newer session is left alone.
    pub fn remove(&self, id: SessionId) {
        if let Some((_, entry)) = self.sessions.remove(&id) {
            self.names.remove_if(&entry.name, |_, held| *held == id);
            debug!("Removed {} ('{}')", id, entry.name);
        }
    }

    /// Drop every session (lifecycle shutdown)
    pub fn clear(&self) {
        self.sessions.clear();
        self.names.clear();
    }

    // ==================== Queries ====================

    /// Point-in-time list of active sessions
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|entry| SessionInfo {
                id: *entry.key(),
                name: entry.name.clone(),
            })
            .collect()
    }

    /// Delivery view for a broadcast from `sender_id`: every active
    /// session not blocking that sender
    ///
    /// Senders are cloned out before any send happens, so no map lock is
    /// held during delivery.
    pub fn recipients(&self, sender_id: i32) -> Vec<(SessionId, mpsc::Sender<Message>)> {
        self.sessions
            .iter()
            .filter(|entry| !entry.blocked.contains(&sender_id))
            .map(|entry| (*entry.key(), entry.outbound.clone()))
            .collect()
    }

    /// Outbound channels of every active session, ignoring block sets
    ///
    /// Used for lifecycle notices (shutdown) that must reach everyone.
    pub fn outbounds(&self) -> Vec<(SessionId, mpsc::Sender<Message>)> {
        self.sessions
            .iter()
            .map(|entry| (*entry.key(), entry.outbound.clone()))
            .collect()
    }

    /// Whether a session with this id is active
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Number of active sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    // ==================== Block sets ====================

    /// Add `target` to the block set of `owner`
    ///
    /// Returns false when the owner is no longer active.
    pub fn block(&self, owner: SessionId, target: i32) -> bool {
        match self.sessions.get_mut(&owner) {
            Some(mut entry) => {
                entry.blocked.insert(target);
                debug!("{} now blocks sender {}", owner, target);
                true
            }
            None => false,
        }
    }

    /// Remove `target` from the block set of `owner`
    pub fn unblock(&self, owner: SessionId, target: i32) -> bool {
        match self.sessions.get_mut(&owner) {
            Some(mut entry) => {
                entry.blocked.remove(&target);
                debug!("{} no longer blocks sender {}", owner, target);
                true
            }
            None => false,
        }
    }

    /// Whether `owner` currently blocks `sender_id`
    pub fn is_blocked(&self, owner: SessionId, sender_id: i32) -> bool {
        self.sessions
            .get(&owner)
            .map(|entry| entry.blocked.contains(&sender_id))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("session_count", &self.sessions.len())
            .field(
                "next_session_id",
                &self.next_session_id.load(Ordering::SeqCst),
            )
            .finish()
    }
}
