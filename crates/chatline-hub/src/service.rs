//! Collaborators consumed by the hub.
//!
//! The hub does not persist anything and does not validate tokens itself.
//! Both concerns are delegated through these traits so the binary can plug in
//! its own store and verifier.

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::protocol::{IncomingEvent, OutgoingEvent};

/// Handles domain requests from authenticated connections.
///
/// Implementations return the event to deliver; its `participants` decide who
/// receives it. The hub marks the origin connection itself.
#[async_trait]
pub trait ChatService: Send + Sync + 'static {
    /// Append a message to a conversation.
    async fn add_message(&self, event: IncomingEvent) -> Result<OutgoingEvent, ServiceError>;

    /// Add participants to a conversation.
    async fn add_participant(&self, event: IncomingEvent) -> Result<OutgoingEvent, ServiceError>;
}

/// Validates identity tokens presented during the handshake.
#[async_trait]
pub trait IdentityVerifier: Send + Sync + 'static {
    /// Verify a token and return the user id it was issued to.
    async fn verify(&self, token: &str) -> Result<String, ServiceError>;
}
