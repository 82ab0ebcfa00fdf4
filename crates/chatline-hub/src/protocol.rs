//! Wire format for chat events.
//!
//! Clients and the hub exchange JSON text frames. Inbound frames decode into
//! [`IncomingEvent`] and are then lifted into the closed [`Request`] enum;
//! outbound traffic is either an [`OutgoingEvent`] or a server [`Notice`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionId;
use crate::HubError;

/// Separator placed between coalesced messages in one outbound frame.
pub const FRAME_DELIMITER: char = '\n';

/// Request kind carried in the `requestType` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum RequestType {
    /// Append a message to a conversation
    AddMessage,
    /// Add participants to a conversation
    AddParticipant,
    /// Remove a message (not supported)
    RemoveMessage,
    /// Remove a participant (not supported)
    RemoveParticipant,
    /// Present an identity token
    Authenticate,
}

impl RequestType {
    /// Numeric code used on the wire.
    pub fn code(self) -> i32 {
        match self {
            RequestType::AddMessage => 1,
            RequestType::AddParticipant => 2,
            RequestType::RemoveMessage => 3,
            RequestType::RemoveParticipant => 4,
            RequestType::Authenticate => 5,
        }
    }
}

impl From<RequestType> for i32 {
    fn from(kind: RequestType) -> Self {
        kind.code()
    }
}

impl TryFrom<i32> for RequestType {
    type Error = UnknownRequestType;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(RequestType::AddMessage),
            2 => Ok(RequestType::AddParticipant),
            3 => Ok(RequestType::RemoveMessage),
            4 => Ok(RequestType::RemoveParticipant),
            5 => Ok(RequestType::Authenticate),
            other => Err(UnknownRequestType(other)),
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestType::AddMessage => write!(f, "add_message"),
            RequestType::AddParticipant => write!(f, "add_participant"),
            RequestType::RemoveMessage => write!(f, "remove_message"),
            RequestType::RemoveParticipant => write!(f, "remove_participant"),
            RequestType::Authenticate => write!(f, "authenticate"),
        }
    }
}

/// A `requestType` code outside the known range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownRequestType(pub i32);

impl fmt::Display for UnknownRequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown request type {}", self.0)
    }
}

/// A chat message as carried inside events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatMessage {
    /// Store-assigned id, absent on inbound messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub sender_id: String,
    pub content_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub body: String,
    /// Store-assigned timestamp, absent on inbound messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

/// Event received from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub request_type: RequestType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl IncomingEvent {
    /// Build an event of the given kind with every optional field empty.
    pub fn new(request_type: RequestType) -> Self {
        Self {
            conversation_id: None,
            request_type,
            message: None,
            participants: None,
            token: None,
        }
    }
}

/// Event delivered to the participants of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub request_type: RequestType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,
    /// User ids entitled to receive this event
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<String>,
    /// Connection the event came from; never delivered back to it
    #[serde(skip)]
    pub origin: Option<ConnectionId>,
}

impl OutgoingEvent {
    /// Create an event with no payload.
    pub fn new(request_type: RequestType, conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: Some(conversation_id.into()),
            request_type,
            message: None,
            participants: Vec::new(),
            origin: None,
        }
    }

    /// Mark the connection that produced this event.
    pub fn from_connection(mut self, origin: ConnectionId) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Serialize for delivery. The origin is never part of the output.
    pub fn encode(&self) -> Result<OutboundFrame, HubError> {
        serde_json::to_string(self)
            .map(OutboundFrame::new)
            .map_err(|e| HubError::protocol(format!("could not encode outgoing event: {}", e)))
    }
}

/// Server-originated notice, used for rejections and warnings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub error: String,
}

impl Notice {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// Serialize into an outbound frame.
    pub fn encode(&self) -> OutboundFrame {
        let text = serde_json::to_string(self)
            .unwrap_or_else(|_| String::from(r#"{"error":"internal error"}"#));
        OutboundFrame::new(text)
    }
}

/// A decoded client request, dispatched exhaustively by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Identity token presented during the handshake
    Authenticate { token: String },
    /// Domain request: append a message
    AddMessage(IncomingEvent),
    /// Domain request: add participants
    AddParticipant(IncomingEvent),
    /// Known request kind without server-side support
    NotSupported(RequestType),
}

impl Request {
    /// Kind of this request.
    pub fn kind(&self) -> RequestType {
        match self {
            Request::Authenticate { .. } => RequestType::Authenticate,
            Request::AddMessage(_) => RequestType::AddMessage,
            Request::AddParticipant(_) => RequestType::AddParticipant,
            Request::NotSupported(kind) => *kind,
        }
    }
}

impl From<IncomingEvent> for Request {
    fn from(event: IncomingEvent) -> Self {
        match event.request_type {
            RequestType::Authenticate => Request::Authenticate {
                token: event.token.unwrap_or_default(),
            },
            RequestType::AddMessage => Request::AddMessage(event),
            RequestType::AddParticipant => Request::AddParticipant(event),
            kind @ (RequestType::RemoveMessage | RequestType::RemoveParticipant) => {
                Request::NotSupported(kind)
            }
        }
    }
}

/// Replace embedded newlines with spaces and trim surrounding whitespace.
pub fn normalize_frame(text: &str) -> String {
    text.replace('\n', " ").trim().to_string()
}

/// Decode one inbound text frame into a request.
pub fn decode_frame(text: &str) -> Result<Request, HubError> {
    let normalized = normalize_frame(text);
    let event: IncomingEvent = serde_json::from_str(&normalized)
        .map_err(|e| HubError::protocol(e.to_string()))?;
    Ok(Request::from(event))
}

/// Text queued for delivery to one connection.
///
/// Cheap to clone: a broadcast serializes once and shares the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    text: Arc<str>,
}

impl OutboundFrame {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Transport-level frame seen by the reader and writer pumps.
///
/// The server maps its WebSocket message type onto this enum so the pumps
/// stay independent of the HTTP stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}
