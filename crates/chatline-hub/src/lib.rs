//! # chatline-hub
//!
//! Real-time event hub for Chatline.
//!
//! Routes chat events between authenticated client connections. The crate is
//! transport-agnostic: the server maps its WebSocket messages onto
//! [`protocol::Frame`] and hands each upgraded connection to [`ChatHub::accept`].
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐   Register / Unregister / Send / Broadcast
//!   transport ──▶ │ Reader task  │ ─────────────────────────────────┐
//!                 │  session     │── ChatService / IdentityVerifier │
//!                 └──────┬───────┘                                  ▼
//!                        │ shared Teardown              ┌────────────────────┐
//!                 ┌──────┴───────┐   bounded queue      │ Registry task      │
//!   transport ◀── │ Writer task  │ ◀─────────────────── │ user → connections │
//!                 └──────────────┘   (evicted if full)  └────────────────────┘
//! ```
//!
//! - **Registry**: one task, sole owner of the directory, never blocks on a consumer
//! - **Reader**: decodes frames, drives the handshake, delegates domain requests
//! - **Writer**: drains the outbound queue, coalesces frames, sends heartbeats

pub mod config;
pub mod connection;
pub mod protocol;
pub mod reader;
pub mod registry;
pub mod server;
pub mod service;
pub mod session;
pub mod writer;

mod error;

pub use config::HubConfig;
pub use connection::{ConnectionHandle, ConnectionId, SendResult, Teardown};
pub use error::{HubError, ServiceError};
pub use protocol::{
    ChatMessage, Frame, IncomingEvent, Notice, OutboundFrame, OutgoingEvent, Request, RequestType,
};
pub use registry::{DirectorySnapshot, Registry, RegistryHandle};
pub use server::{ChatHub, ConnectionTasks};
pub use service::{ChatService, IdentityVerifier};
pub use session::{ClientSession, SessionAction, SessionState};
