//! Error types for the chat hub.

use std::time::Duration;

use thiserror::Error;

/// Hub and connection errors.
///
/// Every error raised on behalf of a connection is scoped to that connection;
/// none of them propagate into the registry loop.
#[derive(Debug, Error)]
pub enum HubError {
    /// A frame could not be decoded into a request
    #[error("Malformed frame: {0}")]
    Protocol(String),

    /// The identity collaborator rejected the token
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// The token was valid but belongs to another user
    #[error("Token subject {subject} does not match connection user {claimed}")]
    SubjectMismatch {
        /// User id the connection claimed at upgrade time
        claimed: String,
        /// Subject the verified token belongs to
        subject: String,
    },

    /// No successful authentication within the handshake window
    #[error("Did not authenticate within {0:?}")]
    HandshakeTimeout(Duration),

    /// The chat service failed to process a domain request
    #[error("Chat service error: {0}")]
    Delegate(String),

    /// Read or write failure on the transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// Inbound frame larger than the configured limit
    #[error("Frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// Size of the offending frame
        size: usize,
        /// Configured maximum
        limit: usize,
    },

    /// Peer stopped answering heartbeats
    #[error("No pong received within {0:?}")]
    PongTimeout(Duration),

    /// A single write did not complete in time
    #[error("Write did not complete within {0:?}")]
    WriteTimeout(Duration),

    /// The registry task has stopped
    #[error("Registry is no longer running")]
    RegistryClosed,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HubError {
    /// Create a new protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a new authentication error.
    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::AuthFailed(msg.into())
    }

    /// Create a new delegate error.
    pub fn delegate(msg: impl Into<String>) -> Self {
        Self::Delegate(msg.into())
    }

    /// Create a new transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error ends the connection that produced it.
    ///
    /// Protocol and delegate errors are local to one frame or request.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Protocol(_) | Self::Delegate(_))
    }

    /// Text sent to the client in an error notice before the connection closes.
    pub fn notice_text(&self) -> String {
        match self {
            Self::AuthFailed(_) => "Token not valid.".to_string(),
            Self::SubjectMismatch { .. } => "Token does not match client uid.".to_string(),
            Self::HandshakeTimeout(window) => {
                format!("Did not authenticate client within {} seconds.", window.as_secs())
            }
            other => other.to_string(),
        }
    }
}

/// Failure reported by a collaborator (chat service or identity verifier).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// The referenced conversation or entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request is missing data or is otherwise unusable
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The request clashes with existing state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The caller is not allowed to perform the operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Any other failure inside the collaborator
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for HubError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unauthorized(msg) => HubError::AuthFailed(msg),
            other => HubError::Delegate(other.to_string()),
        }
    }
}
