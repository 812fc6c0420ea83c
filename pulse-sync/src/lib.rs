//! # pulse-sync — Real-time proposal synchronization for Pulse
//!
//! Keeps every connected client's copy of the proposal set in step with
//! the authoritative [`pulse_core::SharedState`] over WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐      WebSocket       ┌─────────────┐
//! │ SyncClient  │ ◄──────────────────► │ SyncServer  │
//! │ (per user)  │  JSON {type,payload} │ (central)   │
//! └──────┬──────┘                      └──────┬──────┘
//!        │                                    │ ConnectionEvent
//!        ▼                                    ▼
//! ┌─────────────┐                      ┌─────────────┐
//! │ Replica     │                      │ EventLoop   │
//! │ (local)     │                      │ (one writer)│
//! └─────────────┘                      └──────┬──────┘
//!                                             │
//!                                     ┌───────┴───────┐
//!                                     │ Router        │
//!                                     │  SharedState  │
//!                                     │  Registry     │
//!                                     │  Broadcast    │
//!                                     └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON envelopes (`ClientMessage`, `ServerMessage`)
//! - [`registry`] — User id ↔ connection bindings
//! - [`broadcast`] — Encode-once fan-out with per-connection backpressure
//! - [`router`] — Command dispatch against the store
//! - [`lifecycle`] — Connection events and the single-writer event loop
//! - [`server`] — WebSocket sync server
//! - [`client`] — Reconnecting WebSocket client
//! - [`replica`] — Client-side state folding
//! - [`identity`] — Durable client user id
//! - [`config`] — Environment-driven configuration

pub mod broadcast;
pub mod client;
pub mod config;
pub mod identity;
pub mod lifecycle;
pub mod protocol;
pub mod registry;
pub mod replica;
pub mod router;
pub mod server;

// Re-exports for convenience
pub use broadcast::{BroadcastEngine, BroadcastStats};
pub use client::{ClientError, ConnectionState, ReconnectPolicy, SyncClient, SyncEvent};
pub use config::{ClientConfig, ConfigError, ServerConfig};
pub use identity::load_or_create_user_id;
pub use lifecycle::{ConnectionEvent, EventLoop, Handled, SessionState};
pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use registry::{Connection, ConnectionId, ConnectionRegistry, SendError};
pub use replica::Replica;
pub use router::{Outcome, Router};
pub use server::{ServerError, ServerStats, SyncServer};
