//! Per-connection session state machine.
//!
//! ```text
//! Connecting ──open──▶ Unauthenticated ──Authenticate ok──▶ Authenticated
//!                           │   └─ deadline / bad token / wrong subject ─┐
//!                           ▼                                            ▼
//!                                          Closed
//! ```
//!
//! The session decides; the reader acts on the returned [`SessionAction`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::connection::ConnectionId;
use crate::protocol::{IncomingEvent, Notice, OutgoingEvent, Request, RequestType};
use crate::service::{ChatService, IdentityVerifier};
use crate::HubError;

/// Authentication state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport upgraded, not yet registered
    Connecting,
    /// Registered and waiting for a valid token
    Unauthenticated,
    /// Token verified for the claimed user id
    Authenticated,
    /// Terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Unauthenticated => write!(f, "unauthenticated"),
            SessionState::Authenticated => write!(f, "authenticated"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// What the reader should do after a session transition.
#[derive(Debug)]
pub enum SessionAction {
    /// Nothing to do
    Ignore,
    /// Handshake completed
    Authenticated,
    /// Hand the event to the registry for targeted delivery
    Deliver(OutgoingEvent),
    /// Queue a notice to this connection and keep going
    Notify(Notice),
    /// The chat service failed; the event is dropped
    Suppressed(HubError),
    /// Queue a best-effort notice, then tear the connection down
    Close(HubError),
}

/// Session for one connection.
pub struct ClientSession {
    connection_id: ConnectionId,
    user_id: String,
    state: SessionState,
    chat: Arc<dyn ChatService>,
    verifier: Arc<dyn IdentityVerifier>,
}

impl ClientSession {
    pub fn new(
        connection_id: ConnectionId,
        user_id: impl Into<String>,
        chat: Arc<dyn ChatService>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        Self {
            connection_id,
            user_id: user_id.into(),
            state: SessionState::Connecting,
            chat,
            verifier,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Mark the connection as registered and waiting for authentication.
    pub fn open(&mut self) {
        if self.state == SessionState::Connecting {
            self.state = SessionState::Unauthenticated;
        }
    }

    /// Enter the terminal state.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// The handshake deadline elapsed.
    pub fn expire(&mut self, window: Duration) -> SessionAction {
        match self.state {
            SessionState::Connecting | SessionState::Unauthenticated => {
                info!(
                    connection_id = %self.connection_id,
                    user_id = %self.user_id,
                    "Handshake deadline elapsed"
                );
                self.close();
                SessionAction::Close(HubError::HandshakeTimeout(window))
            }
            SessionState::Authenticated | SessionState::Closed => SessionAction::Ignore,
        }
    }

    /// Apply one decoded request.
    pub async fn handle(&mut self, request: Request) -> SessionAction {
        match (self.state, request) {
            (SessionState::Closed, _) => SessionAction::Ignore,

            (SessionState::Connecting | SessionState::Unauthenticated, Request::Authenticate { token }) => {
                self.authenticate(&token).await
            }
            (SessionState::Connecting | SessionState::Unauthenticated, other) => {
                debug!(
                    connection_id = %self.connection_id,
                    request_type = %other.kind(),
                    "Ignoring request before authentication"
                );
                SessionAction::Ignore
            }

            (SessionState::Authenticated, Request::Authenticate { .. }) => {
                debug!(connection_id = %self.connection_id, "Already authenticated");
                SessionAction::Ignore
            }
            (SessionState::Authenticated, Request::AddMessage(event)) => {
                self.delegate(RequestType::AddMessage, event).await
            }
            (SessionState::Authenticated, Request::AddParticipant(event)) => {
                self.delegate(RequestType::AddParticipant, event).await
            }
            (SessionState::Authenticated, Request::NotSupported(kind)) => {
                debug!(connection_id = %self.connection_id, request_type = %kind, "Request type not supported");
                SessionAction::Notify(Notice::new(format!(
                    "Request type {} is not supported.",
                    kind.code()
                )))
            }
        }
    }

    async fn authenticate(&mut self, token: &str) -> SessionAction {
        match self.verifier.verify(token).await {
            Ok(subject) if subject == self.user_id => {
                self.state = SessionState::Authenticated;
                info!(
                    connection_id = %self.connection_id,
                    user_id = %self.user_id,
                    "Connection authenticated"
                );
                SessionAction::Authenticated
            }
            Ok(subject) => {
                warn!(
                    connection_id = %self.connection_id,
                    user_id = %self.user_id,
                    subject = %subject,
                    "Token subject does not match connection user"
                );
                self.close();
                SessionAction::Close(HubError::SubjectMismatch {
                    claimed: self.user_id.clone(),
                    subject,
                })
            }
            Err(e) => {
                warn!(
                    connection_id = %self.connection_id,
                    user_id = %self.user_id,
                    error = %e,
                    "Token rejected"
                );
                self.close();
                SessionAction::Close(HubError::auth_failed(e.to_string()))
            }
        }
    }

    async fn delegate(&self, kind: RequestType, mut event: IncomingEvent) -> SessionAction {
        let result = match kind {
            RequestType::AddParticipant => self.chat.add_participant(event).await,
            _ => {
                // The sender is always the authenticated user, whatever the client claims.
                if let Some(message) = event.message.as_mut() {
                    message.sender_id = self.user_id.clone();
                }
                self.chat.add_message(event).await
            }
        };
        match result {
            Ok(outgoing) => SessionAction::Deliver(outgoing.from_connection(self.connection_id)),
            Err(e) => {
                warn!(
                    connection_id = %self.connection_id,
                    request_type = %kind,
                    error = %e,
                    "Chat service rejected request"
                );
                SessionAction::Suppressed(HubError::delegate(e.to_string()))
            }
        }
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("connection_id", &self.connection_id)
            .field("user_id", &self.user_id)
            .field("state", &self.state)
            .finish()
    }
}
