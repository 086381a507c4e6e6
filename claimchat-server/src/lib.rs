//! `ClaimChat` server library.
//!
//! The real-time messaging core for claim negotiation: connection
//! lifecycle, room membership, presence, the delivery protocol and the
//! typing relay, served over a WebSocket endpoint. The durable message store
//! and the claim directory are external collaborators behind traits.

pub mod claims;
pub mod config;
pub mod connection;
pub mod delivery;
pub mod error;
pub mod outbound;
pub mod presence;
pub mod rooms;
pub mod server;
pub mod store;
pub mod typing;
