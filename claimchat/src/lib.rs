//! `ClaimChat` client library: WebSocket client, conversation views, typing
//! signals, and the session that ties them together.

pub mod client;
pub mod config;
pub mod session;
pub mod typing;
pub mod view;
