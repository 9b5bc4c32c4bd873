//! Error taxonomy for the signaling core
//!
//! Only connection loss and server-reported failures are fatal to a whole
//! session; every other error is scoped to the in-flight negotiation attempt.

use thiserror::Error;

/// Errors surfaced by the signaling and negotiation core
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    /// Transport unreachable or closed unexpectedly
    #[error("connection error: {0}")]
    Connection(String),

    /// Raw payload could not be decoded into an envelope
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Envelope valid but wrong for the current phase or peer
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// Offer, answer, or candidate rejected by the media engine
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Explicit error envelope from the signaling server
    #[error("server error: {0}")]
    ServerReported(String),

    /// Built without a negotiation engine
    #[error("webrtc engine support is not enabled")]
    FeatureDisabled,
}

impl SignalError {
    /// Whether this error tears the whole session down.
    ///
    /// Non-fatal errors release at most the current negotiation attempt;
    /// the session stays registered and can serve a later peer.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SignalError::Connection(_) | SignalError::ServerReported(_) | SignalError::FeatureDisabled
        )
    }
}
