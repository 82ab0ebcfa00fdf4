//! Chatline Server
//!
//! HTTP and WebSocket front end for the chat hub: the `/chat/ws` event
//! stream, the conversation API backed by an in-memory store, and
//! JWT-based identity.

pub mod auth;
pub mod config;
pub mod server;
pub mod shutdown;
pub mod store;
pub mod telemetry;
