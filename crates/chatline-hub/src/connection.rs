//! Connection identity, directory handles and teardown.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::protocol::OutboundFrame;
use crate::registry::RegistryHandle;

/// Process-unique identifier of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Result of attempting to queue a frame for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Frame was queued for delivery
    Sent,
    /// The outbound queue is full
    ChannelFull,
    /// The outbound queue is closed
    ChannelClosed,
}

/// Directory entry for a connection.
///
/// Holds the only strong sender of the connection's outbound queue, so
/// dropping the handle closes the queue.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: String,
    sender: mpsc::Sender<OutboundFrame>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, user_id: impl Into<String>, sender: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            sender,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Queue a frame without waiting.
    pub fn try_deliver(&self, frame: OutboundFrame) -> SendResult {
        match self.sender.try_send(frame) {
            Ok(()) => SendResult::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => SendResult::ChannelFull,
            Err(mpsc::error::TrySendError::Closed(_)) => SendResult::ChannelClosed,
        }
    }
}

/// Shared exactly-once teardown for a reader/writer pair.
///
/// Whichever task finishes first releases the connection from the registry
/// and cancels the other one. Later calls are no-ops. Dropping the last
/// reference runs it as well, so a panicking task still releases.
pub struct Teardown {
    id: ConnectionId,
    user_id: String,
    registry: RegistryHandle,
    cancel: CancellationToken,
    fired: AtomicBool,
}

impl Teardown {
    pub fn new(registry: RegistryHandle, user_id: impl Into<String>, id: ConnectionId) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            registry,
            cancel: CancellationToken::new(),
            fired: AtomicBool::new(false),
        }
    }

    /// Release the connection. Returns true for the call that actually ran.
    pub fn run(&self, reason: &str) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        debug!(
            connection_id = %self.id,
            user_id = %self.user_id,
            reason,
            "Tearing down connection"
        );
        self.registry.release(&self.user_id, self.id);
        self.cancel.cancel();
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Token cancelled once teardown has run.
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.run("dropped");
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown")
            .field("connection_id", &self.id)
            .field("user_id", &self.user_id)
            .field("fired", &self.has_fired())
            .finish()
    }
}
