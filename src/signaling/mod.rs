//! Signaling protocol support
//!
//! Everything needed to talk to the signaling relay:
//! - Typed message envelopes with opaque negotiation payloads
//! - A WebSocket transport channel with ordered event delivery

pub mod channel;
pub mod message;

// Re-exports
pub use channel::{ChannelEvent, SignalChannel};
pub use message::{OpaquePayload, SessionRole, SignalMessage};
