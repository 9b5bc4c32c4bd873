//! Signaling message envelopes
//!
//! Typed wire protocol spoken with the signaling relay: registration,
//! peer lifecycle notifications, and the offer/answer/candidate exchange.
//! Every message is a JSON object tagged by a `type` field; negotiation
//! payloads are carried opaquely and re-encoded byte-for-byte in shape so
//! the remote engine can parse them on its own terms.

use serde::{Deserialize, Serialize};

use crate::error::SignalError;

/// Endpoint role within a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionRole {
    /// Publishes media and answers join requests with offers
    #[default]
    Streamer,
    /// Watches an existing stream and answers the publisher's offer
    Viewer,
}

impl SessionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionRole::Streamer => "streamer",
            SessionRole::Viewer => "viewer",
        }
    }
}

/// Opaque negotiation payload forwarded through the relay untouched.
///
/// Session descriptions and connectivity candidates arrive either as a raw
/// string or as a structured object depending on the remote engine; the
/// original shape survives a decode/encode round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpaquePayload {
    Text(String),
    Json(serde_json::Value),
}

/// Signaling envelope exchanged with the relay server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Server assigned an endpoint identity to this connection
    Connected {
        #[serde(rename = "clientId")]
        client_id: String,
    },

    /// Claim a stream identifier as its publisher
    RegisterStreamer {
        #[serde(rename = "streamId")]
        stream_id: String,
    },

    /// Join an existing stream as a viewer
    RegisterViewer {
        #[serde(rename = "streamId")]
        stream_id: String,
    },

    /// Registration confirmed by the server
    Registered {
        #[serde(rename = "streamId")]
        stream_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<SessionRole>,
        #[serde(rename = "embedUrl", default, skip_serializing_if = "Option::is_none")]
        embed_url: Option<String>,
    },

    /// A viewer joined the published stream
    ViewerJoined {
        #[serde(rename = "viewerId")]
        viewer_id: String,
    },

    /// A viewer left the published stream
    ViewerLeft {
        #[serde(rename = "viewerId")]
        viewer_id: String,
    },

    /// Session description offer; `target_id` outbound, `sender_id` inbound
    Offer {
        offer: OpaquePayload,
        #[serde(rename = "targetId", default, skip_serializing_if = "Option::is_none")]
        target_id: Option<String>,
        #[serde(rename = "senderId", default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<String>,
    },

    /// Session description answer; `target_id` outbound, `sender_id` inbound
    Answer {
        answer: OpaquePayload,
        #[serde(rename = "targetId", default, skip_serializing_if = "Option::is_none")]
        target_id: Option<String>,
        #[serde(rename = "senderId", default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<String>,
    },

    /// Connectivity candidate; `target_id` outbound, `sender_id` inbound
    IceCandidate {
        candidate: OpaquePayload,
        #[serde(rename = "targetId", default, skip_serializing_if = "Option::is_none")]
        target_id: Option<String>,
        #[serde(rename = "senderId", default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<String>,
    },

    /// Publisher stops the stream
    StopStream,

    /// The watched stream was stopped by its publisher
    StreamEnded,

    /// Server-reported failure
    Error { message: String },

    /// Unrecognized message type; ignored for forward compatibility
    #[serde(other)]
    Unknown,
}

impl SignalMessage {
    /// Parse a message from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self, SignalError> {
        serde_json::from_str(json)
            .map_err(|e| SignalError::MalformedMessage(format!("failed to parse message: {}", e)))
    }

    /// Serialize this message to JSON.
    pub fn to_json(&self) -> Result<String, SignalError> {
        serde_json::to_string(self)
            .map_err(|e| SignalError::MalformedMessage(format!("failed to serialize message: {}", e)))
    }

    /// Create a registration message for the given role.
    pub fn register(role: SessionRole, stream_id: &str) -> Self {
        match role {
            SessionRole::Streamer => SignalMessage::RegisterStreamer {
                stream_id: stream_id.to_string(),
            },
            SessionRole::Viewer => SignalMessage::RegisterViewer {
                stream_id: stream_id.to_string(),
            },
        }
    }

    /// Create an offer addressed to a peer.
    pub fn offer(offer: OpaquePayload, target_id: &str) -> Self {
        SignalMessage::Offer {
            offer,
            target_id: Some(target_id.to_string()),
            sender_id: None,
        }
    }

    /// Create an answer addressed to a peer.
    pub fn answer(answer: OpaquePayload, target_id: &str) -> Self {
        SignalMessage::Answer {
            answer,
            target_id: Some(target_id.to_string()),
            sender_id: None,
        }
    }

    /// Create a candidate message addressed to a peer.
    pub fn ice_candidate(candidate: OpaquePayload, target_id: &str) -> Self {
        SignalMessage::IceCandidate {
            candidate,
            target_id: Some(target_id.to_string()),
            sender_id: None,
        }
    }

    /// Wire name of this message type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Connected { .. } => "connected",
            SignalMessage::RegisterStreamer { .. } => "register-streamer",
            SignalMessage::RegisterViewer { .. } => "register-viewer",
            SignalMessage::Registered { .. } => "registered",
            SignalMessage::ViewerJoined { .. } => "viewer-joined",
            SignalMessage::ViewerLeft { .. } => "viewer-left",
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::IceCandidate { .. } => "ice-candidate",
            SignalMessage::StopStream => "stop-stream",
            SignalMessage::StreamEnded => "stream-ended",
            SignalMessage::Error { .. } => "error",
            SignalMessage::Unknown => "unknown",
        }
    }

    /// Originating peer, where the relay attached one.
    pub fn sender_id(&self) -> Option<&str> {
        match self {
            SignalMessage::Offer { sender_id, .. }
            | SignalMessage::Answer { sender_id, .. }
            | SignalMessage::IceCandidate { sender_id, .. } => sender_id.as_deref(),
            _ => None,
        }
    }
}
