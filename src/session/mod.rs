//! Streaming session coordination
//!
//! One session covers the life of a registered stream endpoint: connect,
//! register, negotiate with at most one remote peer at a time, and tear
//! down. The coordinator serializes everything onto a single event loop;
//! callers observe progress through [`SessionEvent`]s and control the
//! session through a [`SessionHandle`].

pub mod coordinator;

// Re-exports
pub use coordinator::SessionCoordinator;

use tokio::sync::mpsc;

use crate::error::SignalError;
use crate::signaling::SessionRole;

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No connection
    Idle,
    /// Transport channel dialing
    Connecting,
    /// Connected with an endpoint identity, registration pending
    Connected,
    /// Stream registered, no remote peer
    Registered,
    /// Offer/answer exchange in progress with the assigned peer
    Negotiating,
    /// Negotiation complete, media session established
    Active,
}

/// Caller-supplied session parameters
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Signaling server URL
    pub server_url: String,
    /// Stream identifier to register
    pub stream_id: String,
    /// Endpoint role
    pub role: SessionRole,
}

/// Notifications delivered to the session owner
#[derive(Debug, PartialEq)]
pub enum SessionEvent {
    /// Transport connected and the server assigned an endpoint identity
    Connected { client_id: String },
    /// Stream registration confirmed
    Registered {
        stream_id: String,
        embed_url: Option<String>,
    },
    /// A remote peer was assigned and negotiation started
    PeerJoined { peer_id: String },
    /// The remote peer slot was released
    PeerLeft { peer_id: String },
    /// Negotiation with the peer completed
    Active { peer_id: String },
    /// The watched stream was ended by its publisher
    StreamEnded,
    /// A fatal or negotiation-scoped error occurred
    Error(SignalError),
    /// Session returned to idle; no further events follow
    Stopped,
}

/// Commands accepted by a running coordinator
#[derive(Debug)]
pub(crate) enum SessionCommand {
    Stop,
}

/// Handle for controlling a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub(crate) fn new(command_tx: mpsc::UnboundedSender<SessionCommand>) -> Self {
        Self { command_tx }
    }

    /// Request a graceful stop. The session announces the stop to the
    /// server when registered, closes the channel, and returns to idle.
    pub fn stop(&self) {
        let _ = self.command_tx.send(SessionCommand::Stop);
    }
}
