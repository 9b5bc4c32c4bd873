//! WebRTC negotiation engine
//!
//! Adapter from the [`NegotiationFacade`] trait onto the `webrtc` crate.
//! One adapter serves successive negotiations: creating or accepting an
//! offer replaces the previous peer connection with a fresh one, and
//! candidate callbacks from a replaced connection go quiet instead of
//! leaking into the new exchange.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use async_trait::async_trait;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::{EngineSink, NegotiationEvent, NegotiationFacade};
use crate::config::IceServerConfig;
use crate::error::SignalError;
use crate::signaling::OpaquePayload;

/// Facade adapter over the webrtc crate
pub struct WebRtcEngine {
    ice_servers: Vec<IceServerConfig>,
    events: EngineSink,
    connection: Mutex<Option<Arc<RTCPeerConnection>>>,
    /// Incremented for every new peer connection; callbacks registered on
    /// an older connection compare against it and stay silent.
    generation: Arc<AtomicU64>,
}

impl WebRtcEngine {
    /// Create an adapter. No engine resources are allocated until the
    /// first offer is created or accepted.
    pub fn new(ice_servers: Vec<IceServerConfig>, events: EngineSink) -> Self {
        Self {
            ice_servers,
            events,
            connection: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Build a fresh peer connection, closing any previous one.
    async fn new_connection(&self) -> Result<Arc<RTCPeerConnection>, SignalError> {
        let mut guard = self.connection.lock().await;
        if let Some(old) = guard.take() {
            debug!("Replacing existing peer connection");
            if let Err(e) = old.close().await {
                warn!("Failed to close previous peer connection: {}", e);
            }
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| SignalError::Negotiation(format!("failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            SignalError::Negotiation(format!("failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = self
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = api.new_peer_connection(rtc_config).await.map_err(|e| {
            SignalError::Negotiation(format!("failed to create peer connection: {}", e))
        })?;
        let peer_connection = Arc::new(peer_connection);

        // Forward gathered candidates while this connection is current
        let events = self.events.clone();
        let generations = self.generation.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate| {
            let events = events.clone();
            let generations = generations.clone();
            Box::pin(async move {
                if generations.load(Ordering::SeqCst) != generation {
                    return;
                }
                if let Some(candidate) = candidate {
                    match candidate.to_json() {
                        Ok(init) => match serde_json::to_value(&init) {
                            Ok(value) => {
                                let _ = events.send(NegotiationEvent::LocalCandidate(
                                    OpaquePayload::Json(value),
                                ));
                            }
                            Err(e) => warn!("Failed to serialize local candidate: {}", e),
                        },
                        Err(e) => warn!("Failed to read local candidate: {}", e),
                    }
                }
            })
        }));

        peer_connection.on_peer_connection_state_change(Box::new(move |state| {
            Box::pin(async move {
                info!("Peer connection state: {:?}", state);
            })
        }));

        info!("Created peer connection (generation {})", generation);
        *guard = Some(peer_connection.clone());
        Ok(peer_connection)
    }

    async fn current_connection(&self) -> Result<Arc<RTCPeerConnection>, SignalError> {
        self.connection
            .lock()
            .await
            .clone()
            .ok_or_else(|| SignalError::Negotiation("no active peer connection".to_string()))
    }
}

#[async_trait]
impl NegotiationFacade for WebRtcEngine {
    async fn create_local_offer(&self) -> Result<OpaquePayload, SignalError> {
        let peer_connection = self.new_connection().await?;
        // A control channel gives the offer a transport section even before
        // media tracks are attached, so ICE gathering starts immediately.
        peer_connection
            .create_data_channel("control", None)
            .await
            .map_err(|e| {
                SignalError::Negotiation(format!("failed to create control channel: {}", e))
            })?;
        let offer = peer_connection
            .create_offer(None)
            .await
            .map_err(|e| SignalError::Negotiation(format!("failed to create offer: {}", e)))?;
        peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| {
                SignalError::Negotiation(format!("failed to set local description: {}", e))
            })?;
        description_to_payload(&offer)
    }

    async fn accept_remote_offer(&self, offer: OpaquePayload) -> Result<OpaquePayload, SignalError> {
        let sdp = payload_to_sdp(&offer)
            .ok_or_else(|| SignalError::Negotiation("offer carries no sdp".to_string()))?;
        let peer_connection = self.new_connection().await?;
        let remote = RTCSessionDescription::offer(sdp)
            .map_err(|e| SignalError::Negotiation(format!("invalid offer: {}", e)))?;
        peer_connection
            .set_remote_description(remote)
            .await
            .map_err(|e| {
                SignalError::Negotiation(format!("failed to set remote description: {}", e))
            })?;
        let answer = peer_connection
            .create_answer(None)
            .await
            .map_err(|e| SignalError::Negotiation(format!("failed to create answer: {}", e)))?;
        peer_connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| {
                SignalError::Negotiation(format!("failed to set local description: {}", e))
            })?;
        description_to_payload(&answer)
    }

    async fn apply_remote_answer(&self, answer: OpaquePayload) -> Result<(), SignalError> {
        let sdp = payload_to_sdp(&answer)
            .ok_or_else(|| SignalError::Negotiation("answer carries no sdp".to_string()))?;
        let peer_connection = self.current_connection().await?;
        let remote = RTCSessionDescription::answer(sdp)
            .map_err(|e| SignalError::Negotiation(format!("invalid answer: {}", e)))?;
        peer_connection
            .set_remote_description(remote)
            .await
            .map_err(|e| {
                SignalError::Negotiation(format!("failed to set remote description: {}", e))
            })?;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: OpaquePayload) {
        let peer_connection = match self.current_connection().await {
            Ok(pc) => pc,
            Err(_) => {
                debug!("Ignoring remote candidate without an active connection");
                return;
            }
        };
        let init = match payload_to_candidate(&candidate) {
            Some(init) => init,
            None => {
                warn!("Ignoring malformed remote candidate");
                return;
            }
        };
        if let Err(e) = peer_connection.add_ice_candidate(init).await {
            warn!("Failed to add remote candidate: {}", e);
        }
    }

    async fn close(&self) {
        let old = self.connection.lock().await.take();
        if let Some(peer_connection) = old {
            self.generation.fetch_add(1, Ordering::SeqCst);
            match peer_connection.close().await {
                Ok(()) => info!("Peer connection closed"),
                Err(e) => warn!("Failed to close peer connection: {}", e),
            }
        }
    }
}

fn description_to_payload(description: &RTCSessionDescription) -> Result<OpaquePayload, SignalError> {
    serde_json::to_value(description)
        .map(OpaquePayload::Json)
        .map_err(|e| SignalError::Negotiation(format!("failed to serialize description: {}", e)))
}

/// Extract the SDP text from an opaque description payload.
///
/// Remote engines send descriptions either as a `{type, sdp}` object, as a
/// JSON string containing one, or as bare SDP text.
fn payload_to_sdp(payload: &OpaquePayload) -> Option<String> {
    match payload {
        OpaquePayload::Json(value) => value
            .get("sdp")
            .and_then(|sdp| sdp.as_str())
            .map(|sdp| sdp.to_string()),
        OpaquePayload::Text(text) => {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
                if let Some(sdp) = value.get("sdp").and_then(|sdp| sdp.as_str()) {
                    return Some(sdp.to_string());
                }
            }
            Some(text.clone())
        }
    }
}

fn payload_to_candidate(payload: &OpaquePayload) -> Option<RTCIceCandidateInit> {
    match payload {
        OpaquePayload::Json(value) => serde_json::from_value(value.clone()).ok(),
        OpaquePayload::Text(text) => match serde_json::from_str::<RTCIceCandidateInit>(text) {
            Ok(init) => Some(init),
            // A bare candidate line without the surrounding object
            Err(_) => Some(RTCIceCandidateInit {
                candidate: text.clone(),
                sdp_mid: None,
                sdp_mline_index: None,
                username_fragment: None,
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[test]
    fn sdp_extracted_from_object_payload() {
        let payload = OpaquePayload::Json(json!({"type": "answer", "sdp": "v=0 object"}));
        assert_eq!(payload_to_sdp(&payload).as_deref(), Some("v=0 object"));
    }

    #[test]
    fn sdp_extracted_from_stringified_object() {
        let payload = OpaquePayload::Text(r#"{"type":"answer","sdp":"v=0 nested"}"#.to_string());
        assert_eq!(payload_to_sdp(&payload).as_deref(), Some("v=0 nested"));
    }

    #[test]
    fn bare_text_is_treated_as_sdp() {
        let payload = OpaquePayload::Text("v=0 bare".to_string());
        assert_eq!(payload_to_sdp(&payload).as_deref(), Some("v=0 bare"));
    }

    #[test]
    fn object_without_sdp_yields_nothing() {
        let payload = OpaquePayload::Json(json!({"type": "answer"}));
        assert_eq!(payload_to_sdp(&payload), None);
    }

    #[test]
    fn candidate_parsed_from_object_and_bare_line() {
        let object = OpaquePayload::Json(json!({
            "candidate": "candidate:1 1 UDP 2122252543 10.0.0.1 5000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
        }));
        let init = payload_to_candidate(&object).unwrap();
        assert!(init.candidate.starts_with("candidate:1"));
        assert_eq!(init.sdp_mid.as_deref(), Some("0"));

        let bare = OpaquePayload::Text("candidate:2 1 UDP 1 10.0.0.2 5001 typ host".to_string());
        let init = payload_to_candidate(&bare).unwrap();
        assert!(init.candidate.starts_with("candidate:2"));
        assert_eq!(init.sdp_mid, None);
    }

    #[tokio::test]
    async fn engine_offer_round_trips_through_payloads() {
        let (events, _events_rx) = mpsc::unbounded_channel();
        let engine = WebRtcEngine::new(Vec::new(), events);

        let offer = engine.create_local_offer().await.unwrap();
        let sdp = payload_to_sdp(&offer).expect("offer carries sdp");
        assert!(sdp.starts_with("v=0"));

        // A second engine can answer the first one's offer
        let (peer_events, _peer_events_rx) = mpsc::unbounded_channel();
        let peer = WebRtcEngine::new(Vec::new(), peer_events);
        let answer = peer.accept_remote_offer(offer).await.unwrap();
        engine.apply_remote_answer(answer).await.unwrap();

        engine.close().await;
        peer.close().await;
    }
}
