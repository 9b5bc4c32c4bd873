//! Negotiation facade
//!
//! Narrow seam between the session coordinator and the media engine:
//! create and apply session descriptions, ingest remote candidates, and
//! surface locally gathered candidates. The coordinator never blocks on
//! the engine; operations run to completion in the background and report
//! back through [`NegotiationEvent`]s.

#[cfg(feature = "webrtc-engine")]
pub mod engine;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SignalError;
use crate::signaling::OpaquePayload;

/// Sink the facade emits local candidates into
pub type EngineSink = mpsc::UnboundedSender<NegotiationEvent>;

/// Events flowing from the engine side into the coordinator.
///
/// `LocalCandidate` is emitted by the facade whenever the engine gathers a
/// candidate. The remaining variants complete coordinator-initiated
/// operations and carry the epoch the operation started under, so
/// completions outliving their negotiation are discarded instead of
/// corrupting a newer one.
#[derive(Debug)]
pub enum NegotiationEvent {
    /// Locally gathered connectivity candidate
    LocalCandidate(OpaquePayload),
    /// Local offer creation finished
    OfferReady {
        epoch: u64,
        result: Result<OpaquePayload, SignalError>,
    },
    /// Remote offer acceptance finished, carrying the local answer
    AnswerReady {
        epoch: u64,
        result: Result<OpaquePayload, SignalError>,
    },
    /// Remote answer application finished
    AnswerApplied {
        epoch: u64,
        result: Result<(), SignalError>,
    },
}

/// Interface the coordinator drives the media engine through.
///
/// Calls arrive from a single dispatcher task, one at a time, in the
/// order the session submitted them; implementations never see
/// overlapping operations. In particular a `close` submitted before a
/// fresh offer has fully run before that offer starts.
#[async_trait]
pub trait NegotiationFacade: Send + Sync {
    /// Create a local offer and install it as the local description.
    ///
    /// Replaces any engine session left over from an earlier negotiation.
    async fn create_local_offer(&self) -> Result<OpaquePayload, SignalError>;

    /// Accept a remote offer and produce the local answer.
    async fn accept_remote_offer(&self, offer: OpaquePayload) -> Result<OpaquePayload, SignalError>;

    /// Apply the remote peer's answer to the outstanding offer.
    async fn apply_remote_answer(&self, answer: OpaquePayload) -> Result<(), SignalError>;

    /// Ingest a remote connectivity candidate.
    ///
    /// Fire-and-forget: malformed or late candidates are logged and
    /// ignored, never fatal.
    async fn add_remote_candidate(&self, candidate: OpaquePayload);

    /// Tear down the current engine session, if any.
    async fn close(&self);
}
