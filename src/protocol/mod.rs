//! Protocol layer
//! - message.rs: JSON-RPC envelopes and message origins
//! - extensions.rs: Requests outside the base protocol

pub mod extensions;
pub mod message;

pub use message::{Message, Origin, ServiceId};
