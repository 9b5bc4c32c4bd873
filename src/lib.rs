//! streamcast-core - WebRTC signaling and negotiation core
//!
//! Client-side plumbing for one-to-one streaming sessions: a typed
//! signaling protocol, a WebSocket channel to the relay, and a session
//! coordinator that drives offer/answer negotiation against a pluggable
//! WebRTC engine.

pub mod config;
pub mod error;
pub mod negotiation;
pub mod session;
pub mod signaling;

// Re-exports
pub use config::{Config, IceServerConfig};
pub use error::SignalError;
pub use negotiation::{NegotiationEvent, NegotiationFacade};
pub use session::{SessionConfig, SessionCoordinator, SessionEvent, SessionHandle, SessionPhase};
pub use signaling::{ChannelEvent, OpaquePayload, SessionRole, SignalChannel, SignalMessage};
