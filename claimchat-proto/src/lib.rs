//! Shared protocol definitions for the `ClaimChat` wire format.

pub mod codec;
pub mod event;
pub mod message;
pub mod presence;
pub mod typing;
