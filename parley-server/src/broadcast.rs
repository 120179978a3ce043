//! Broadcast routing
//!
//! Fans one message out to every active session except those blocking its
//! sender. Delivery is a non-blocking handoff onto each recipient's
//! bounded outbound queue, so one stalled connection never delays the
//! rest.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use parley_protocol::Message;

use crate::registry::SessionRegistry;

/// Router delivering messages to all unblocked recipients
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<SessionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `message` to every active session whose block set does not
    /// contain the sender, the sender itself included
    ///
    /// Returns the number of successful handoffs. A closed queue means
    /// that recipient's dispatcher is already tearing the session down;
    /// it is skipped here, never cleaned up inline. A full queue drops
    /// the message for that recipient only.
    pub fn deliver(&self, message: Message) -> usize {
        let recipients = self.registry.recipients(message.sender_id);

        let mut delivered = 0;
        for (id, outbound) in recipients {
            match outbound.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Outbound queue for {} closed, skipping", id);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Outbound queue for {} full, dropping message", id);
                }
            }
        }

        debug!(
            "Delivered {} from sender {} to {} sessions",
            message.kind, message.sender_id, delivered
        );
        delivered
    }
}
