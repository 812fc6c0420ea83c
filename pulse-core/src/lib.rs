//! # pulse-core — Authoritative proposal state for Pulse
//!
//! Holds the shared proposal set (with nested comments, votes and treasury
//! transactions) and the set of known users. Every mutation is a plain
//! synchronous method on [`SharedState`]; serializing access is the
//! caller's job (see `pulse-sync`, which owns the store from a single
//! event loop).
//!
//! ## Modules
//!
//! - [`model`] — Wire-visible entities (camelCase JSON)
//! - [`store`] — `SharedState` mutation and query operations
//! - [`id`] — Time-plus-random identifier generation

pub mod id;
pub mod model;
pub mod store;

pub use id::generate_id;
pub use model::{
    Comment, Proposal, ProposalFields, ProposalStatus, Snapshot, Transaction, User, Vote,
};
pub use store::{SharedState, StoreError};
