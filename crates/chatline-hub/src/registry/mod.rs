//! Connection registry for real-time event fan-out.
//!
//! A single task owns the directory of live connections. Everything else talks
//! to it through a [`RegistryHandle`]:
//!
//! ```text
//! Reader (alice#1) ──Send──▶ ┌────────────────────────┐ ──try_send──▶ Writer (bob#1)
//! Reader (bob#1)  ──Unreg──▶ │ Registry task          │ ──try_send──▶ Writer (alice#2)
//! Server          ──Bcast──▶ │ HashMap<user, Vec<..>> │   full/closed ⇒ evict
//!                            └────────────────────────┘
//! ```
//!
//! Delivery never blocks: a connection whose outbound queue is full or closed
//! is removed from the directory on the spot.

mod directory;
mod hub;

pub use directory::{DeliveryReport, Directory, DirectorySnapshot};
pub use hub::{Registry, RegistryHandle};
