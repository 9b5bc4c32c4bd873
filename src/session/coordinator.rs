//! Session coordinator
//!
//! Owns one streaming session end to end: opens the transport channel,
//! registers the stream, tracks the single remote peer slot, and drives
//! the negotiation facade. Channel events, engine events, and caller
//! commands are serialized onto one processing loop, so session state is
//! never touched concurrently and replaying the same message sequence
//! always lands in the same phase.
//!
//! Engine work is funneled through a single dispatcher task that runs
//! one operation at a time in submission order: the teardown of a
//! replaced peer always finishes before the successor's offer starts,
//! and a candidate is applied to the connection it was accepted for.
//! Completions come back through the engine event queue tagged with the
//! negotiation epoch they started under; a completion whose epoch no
//! longer matches is discarded.

use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{SessionCommand, SessionConfig, SessionEvent, SessionHandle, SessionPhase};
use crate::error::SignalError;
use crate::negotiation::{NegotiationEvent, NegotiationFacade};
use crate::signaling::{ChannelEvent, OpaquePayload, SessionRole, SignalChannel, SignalMessage};

/// Single-stream session state machine
pub struct SessionCoordinator {
    config: SessionConfig,
    /// Engine work, drained in submission order by the dispatcher task
    engine_ops: mpsc::UnboundedSender<EngineOp>,
    engine_rx: mpsc::UnboundedReceiver<NegotiationEvent>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    channel: Option<SignalChannel>,
    phase: SessionPhase,
    client_id: Option<String>,
    registered: bool,
    remote_peer: Option<String>,
    /// Bumped whenever the peer slot changes hands or the session ends
    epoch: u64,
    /// A local description operation (offer creation or offer acceptance)
    /// is running in the background
    offer_inflight: bool,
    /// A remote answer is being applied in the background
    answer_inflight: bool,
    pending_candidates: VecDeque<OpaquePayload>,
    running: bool,
}

/// One unit of engine work, run by [`run_engine_ops`] strictly in the
/// order the state machine submitted it.
enum EngineOp {
    CreateOffer { epoch: u64 },
    AcceptOffer { epoch: u64, offer: OpaquePayload },
    ApplyAnswer { epoch: u64, answer: OpaquePayload },
    AddCandidate(OpaquePayload),
    Close,
}

impl SessionCoordinator {
    /// Create a coordinator together with its control handle and event
    /// stream. Must be called inside a tokio runtime: the engine
    /// dispatcher task is spawned here.
    ///
    /// The facade must emit local candidates into the sender half of
    /// `engine_rx`; the dispatcher routes operation completions through
    /// the same queue.
    pub fn new(
        config: SessionConfig,
        facade: Arc<dyn NegotiationFacade>,
        engine_tx: mpsc::UnboundedSender<NegotiationEvent>,
        engine_rx: mpsc::UnboundedReceiver<NegotiationEvent>,
    ) -> (Self, SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_engine_ops(facade, engine_tx, ops_rx));
        let coordinator = Self {
            config,
            engine_ops: ops_tx,
            engine_rx,
            command_rx,
            events_tx,
            channel: None,
            phase: SessionPhase::Idle,
            client_id: None,
            registered: false,
            remote_peer: None,
            epoch: 0,
            offer_inflight: false,
            answer_inflight: false,
            pending_candidates: VecDeque::new(),
            running: true,
        };
        (coordinator, SessionHandle::new(command_tx), events_rx)
    }

    /// Current session phase
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Server-assigned endpoint identity, once known
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Run the session until it returns to idle.
    pub async fn run(mut self) {
        info!(
            "Starting {} session for stream {}",
            self.config.role.as_str(),
            self.config.stream_id
        );
        self.set_phase(SessionPhase::Connecting);
        let (channel, mut channel_rx) = SignalChannel::connect(&self.config.server_url);
        self.channel = Some(channel);

        while self.running {
            tokio::select! {
                Some(command) = self.command_rx.recv() => self.handle_command(command).await,
                Some(event) = channel_rx.recv() => self.handle_channel_event(event).await,
                Some(event) = self.engine_rx.recv() => self.handle_engine_event(event),
                else => break,
            }
        }
        debug!("Session loop finished");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Stop => {
                info!("Stop requested");
                self.teardown().await;
            }
        }
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => {
                debug!("Transport channel open, waiting for identity assignment");
            }
            ChannelEvent::Message(raw) => match SignalMessage::from_json(&raw) {
                Ok(message) => self.handle_envelope(message).await,
                Err(e) => {
                    warn!("Dropping undecodable message: {}", e);
                    self.notify(SessionEvent::Error(e));
                }
            },
            ChannelEvent::Error(cause) => {
                self.notify(SessionEvent::Error(SignalError::Connection(cause)));
                self.teardown().await;
            }
            ChannelEvent::Closed { code, reason } => {
                let detail = match code {
                    Some(code) if !reason.is_empty() => {
                        format!("closed with code {}: {}", code, reason)
                    }
                    Some(code) => format!("closed with code {}", code),
                    None => "closed unexpectedly".to_string(),
                };
                self.notify(SessionEvent::Error(SignalError::Connection(detail)));
                self.teardown().await;
            }
        }
    }

    async fn handle_envelope(&mut self, message: SignalMessage) {
        match message {
            SignalMessage::Connected { client_id } => self.on_connected(client_id),
            SignalMessage::Registered {
                stream_id,
                role,
                embed_url,
            } => self.on_registered(stream_id, role, embed_url),
            SignalMessage::ViewerJoined { viewer_id } => self.on_viewer_joined(viewer_id),
            SignalMessage::ViewerLeft { viewer_id } => self.on_viewer_left(viewer_id),
            SignalMessage::Offer {
                offer, sender_id, ..
            } => self.on_remote_offer(offer, sender_id),
            SignalMessage::Answer {
                answer, sender_id, ..
            } => self.on_remote_answer(answer, sender_id),
            SignalMessage::IceCandidate {
                candidate,
                sender_id,
                ..
            } => self.on_remote_candidate(candidate, sender_id),
            SignalMessage::StreamEnded => self.on_stream_ended().await,
            SignalMessage::Error { message } => self.on_server_error(message).await,
            SignalMessage::Unknown => debug!("Ignoring message with unrecognized type"),
            other => self.drop_envelope(other.kind(), "not addressed to this endpoint"),
        }
    }

    fn handle_engine_event(&mut self, event: NegotiationEvent) {
        match event {
            NegotiationEvent::LocalCandidate(candidate) => self.on_local_candidate(candidate),
            NegotiationEvent::OfferReady { epoch, result } => self.on_offer_ready(epoch, result),
            NegotiationEvent::AnswerReady { epoch, result } => self.on_answer_ready(epoch, result),
            NegotiationEvent::AnswerApplied { epoch, result } => {
                self.on_answer_applied(epoch, result)
            }
        }
    }

    fn on_connected(&mut self, client_id: String) {
        if self.phase != SessionPhase::Connecting {
            self.drop_envelope("connected", "identity already assigned");
            return;
        }
        info!("Assigned endpoint identity {}", client_id);
        self.client_id = Some(client_id.clone());
        self.set_phase(SessionPhase::Connected);
        self.emit(SignalMessage::register(
            self.config.role,
            &self.config.stream_id,
        ));
        self.notify(SessionEvent::Connected { client_id });
    }

    fn on_registered(
        &mut self,
        stream_id: String,
        role: Option<SessionRole>,
        embed_url: Option<String>,
    ) {
        if self.phase != SessionPhase::Connected {
            self.drop_envelope("registered", "no registration pending");
            return;
        }
        if stream_id != self.config.stream_id {
            self.drop_envelope("registered", "confirmation for a different stream");
            return;
        }
        if let Some(role) = role {
            if role != self.config.role {
                self.drop_envelope("registered", "confirmation for a different role");
                return;
            }
        }
        info!(
            "Registered stream {} as {}",
            stream_id,
            self.config.role.as_str()
        );
        self.registered = true;
        self.set_phase(SessionPhase::Registered);
        self.notify(SessionEvent::Registered {
            stream_id,
            embed_url,
        });
    }

    fn on_viewer_joined(&mut self, viewer_id: String) {
        if self.config.role != SessionRole::Streamer {
            self.drop_envelope("viewer-joined", "not publishing");
            return;
        }
        match self.phase {
            SessionPhase::Registered => {}
            SessionPhase::Negotiating | SessionPhase::Active => {
                // The single peer slot holds one viewer; a newcomer replaces
                // the current one after its engine session is torn down.
                if let Some(old) = self.release_peer() {
                    info!("Viewer {} replaces {}", viewer_id, old);
                    self.notify(SessionEvent::PeerLeft { peer_id: old });
                }
            }
            _ => {
                self.drop_envelope("viewer-joined", "stream not registered");
                return;
            }
        }
        info!("Viewer {} joined", viewer_id);
        self.assign_peer(viewer_id.clone());
        self.notify(SessionEvent::PeerJoined { peer_id: viewer_id });
        self.start_offer();
    }

    fn on_viewer_left(&mut self, viewer_id: String) {
        if self.config.role != SessionRole::Streamer {
            self.drop_envelope("viewer-left", "not publishing");
            return;
        }
        if self.remote_peer.as_deref() != Some(viewer_id.as_str()) {
            self.drop_envelope("viewer-left", "viewer is not the current peer");
            return;
        }
        info!("Viewer {} left", viewer_id);
        self.release_peer();
        self.notify(SessionEvent::PeerLeft { peer_id: viewer_id });
    }

    fn on_remote_offer(&mut self, offer: OpaquePayload, sender_id: Option<String>) {
        if self.config.role != SessionRole::Viewer {
            self.drop_envelope("offer", "not expecting offers");
            return;
        }
        if self.phase != SessionPhase::Registered {
            self.drop_envelope("offer", "negotiation already in progress");
            return;
        }
        let sender = match sender_id {
            Some(sender) => sender,
            None => {
                self.drop_envelope("offer", "missing sender identity");
                return;
            }
        };
        info!("Offer received from {}", sender);
        self.assign_peer(sender.clone());
        self.notify(SessionEvent::PeerJoined { peer_id: sender });

        self.offer_inflight = true;
        self.submit(EngineOp::AcceptOffer {
            epoch: self.epoch,
            offer,
        });
    }

    fn on_remote_answer(&mut self, answer: OpaquePayload, sender_id: Option<String>) {
        if self.config.role != SessionRole::Streamer {
            self.drop_envelope("answer", "not expecting answers");
            return;
        }
        if self.phase != SessionPhase::Negotiating || self.offer_inflight || self.answer_inflight {
            self.drop_envelope("answer", "no offer awaiting an answer");
            return;
        }
        let sender = match sender_id {
            Some(sender) => sender,
            None => {
                self.drop_envelope("answer", "missing sender identity");
                return;
            }
        };
        if self.remote_peer.as_deref() != Some(sender.as_str()) {
            self.drop_envelope("answer", "sender is not the current peer");
            return;
        }
        self.answer_inflight = true;
        self.submit(EngineOp::ApplyAnswer {
            epoch: self.epoch,
            answer,
        });
    }

    fn on_remote_candidate(&mut self, candidate: OpaquePayload, sender_id: Option<String>) {
        if self.phase != SessionPhase::Negotiating && self.phase != SessionPhase::Active {
            self.drop_envelope("ice-candidate", "no negotiation in progress");
            return;
        }
        if let Some(ref sender) = sender_id {
            if self.remote_peer.as_deref() != Some(sender.as_str()) {
                self.drop_envelope("ice-candidate", "sender is not the current peer");
                return;
            }
        }
        self.submit(EngineOp::AddCandidate(candidate));
    }

    async fn on_stream_ended(&mut self) {
        if self.config.role != SessionRole::Viewer {
            self.drop_envelope("stream-ended", "not watching a stream");
            return;
        }
        info!("Stream ended by the publisher");
        self.notify(SessionEvent::StreamEnded);
        self.teardown().await;
    }

    async fn on_server_error(&mut self, message: String) {
        warn!("Server reported error: {}", message);
        self.notify(SessionEvent::Error(SignalError::ServerReported(message)));
        self.teardown().await;
    }

    fn on_local_candidate(&mut self, candidate: OpaquePayload) {
        match self.remote_peer.clone() {
            Some(target) => self.emit(SignalMessage::ice_candidate(candidate, &target)),
            None => {
                debug!("Buffering local candidate until a peer is assigned");
                self.pending_candidates.push_back(candidate);
            }
        }
    }

    fn on_offer_ready(&mut self, epoch: u64, result: Result<OpaquePayload, SignalError>) {
        if epoch != self.epoch {
            debug!("Discarding offer completion from a stale negotiation");
            return;
        }
        self.offer_inflight = false;
        match result {
            Ok(offer) => {
                let target = match self.remote_peer.clone() {
                    Some(target) => target,
                    None => return,
                };
                self.emit(SignalMessage::offer(offer, &target));
                info!("Offer sent to {}", target);
            }
            Err(e) => {
                warn!("Offer creation failed: {}", e);
                self.notify(SessionEvent::Error(e));
                if let Some(peer) = self.release_peer() {
                    self.notify(SessionEvent::PeerLeft { peer_id: peer });
                }
            }
        }
    }

    fn on_answer_ready(&mut self, epoch: u64, result: Result<OpaquePayload, SignalError>) {
        if epoch != self.epoch {
            debug!("Discarding answer completion from a stale negotiation");
            return;
        }
        self.offer_inflight = false;
        match result {
            Ok(answer) => {
                let target = match self.remote_peer.clone() {
                    Some(target) => target,
                    None => return,
                };
                self.emit(SignalMessage::answer(answer, &target));
                info!("Answer sent to {}", target);
                self.set_phase(SessionPhase::Active);
                self.notify(SessionEvent::Active { peer_id: target });
                self.flush_candidates();
            }
            Err(e) => {
                warn!("Failed to accept offer: {}", e);
                self.notify(SessionEvent::Error(e));
                if let Some(peer) = self.release_peer() {
                    self.notify(SessionEvent::PeerLeft { peer_id: peer });
                }
            }
        }
    }

    fn on_answer_applied(&mut self, epoch: u64, result: Result<(), SignalError>) {
        if epoch != self.epoch {
            debug!("Discarding answer completion from a stale negotiation");
            return;
        }
        self.answer_inflight = false;
        match result {
            Ok(()) => {
                let peer = match self.remote_peer.clone() {
                    Some(peer) => peer,
                    None => return,
                };
                info!("Negotiation with {} complete", peer);
                self.set_phase(SessionPhase::Active);
                self.notify(SessionEvent::Active { peer_id: peer });
                self.flush_candidates();
            }
            Err(e) => {
                warn!("Answer rejected: {}", e);
                self.notify(SessionEvent::Error(e));
                if let Some(peer) = self.release_peer() {
                    self.notify(SessionEvent::PeerLeft { peer_id: peer });
                }
            }
        }
    }

    /// Record the peer and open a new negotiation epoch. Candidates
    /// gathered before the peer was known are flushed right away.
    fn assign_peer(&mut self, peer_id: String) {
        self.epoch += 1;
        self.remote_peer = Some(peer_id);
        self.set_phase(SessionPhase::Negotiating);
        self.flush_candidates();
    }

    /// Release the peer slot: queue the engine teardown, invalidate
    /// outstanding completions, and drop candidates that belonged to it.
    /// Ops submitted after this point run behind the teardown.
    fn release_peer(&mut self) -> Option<String> {
        let old = self.remote_peer.take()?;
        self.epoch += 1;
        self.offer_inflight = false;
        self.answer_inflight = false;
        if !self.pending_candidates.is_empty() {
            debug!(
                "Discarding {} unsent candidates for {}",
                self.pending_candidates.len(),
                old
            );
            self.pending_candidates.clear();
        }
        self.submit(EngineOp::Close);
        self.set_phase(SessionPhase::Registered);
        Some(old)
    }

    fn start_offer(&mut self) {
        self.offer_inflight = true;
        self.submit(EngineOp::CreateOffer { epoch: self.epoch });
    }

    fn flush_candidates(&mut self) {
        if self.pending_candidates.is_empty() {
            return;
        }
        let target = match self.remote_peer.clone() {
            Some(target) => target,
            None => return,
        };
        debug!(
            "Flushing {} buffered candidates to {}",
            self.pending_candidates.len(),
            target
        );
        while let Some(candidate) = self.pending_candidates.pop_front() {
            self.emit(SignalMessage::ice_candidate(candidate, &target));
        }
    }

    /// Tear the session down to idle: best-effort stop notice, channel
    /// close, engine shutdown, per-peer state discarded.
    async fn teardown(&mut self) {
        if let Some(channel) = self.channel.take() {
            if self.registered && self.config.role == SessionRole::Streamer {
                channel.send(&SignalMessage::StopStream);
            }
            channel.disconnect();
        }
        self.submit(EngineOp::Close);
        self.epoch += 1;
        self.remote_peer = None;
        self.pending_candidates.clear();
        self.offer_inflight = false;
        self.answer_inflight = false;
        self.registered = false;
        self.client_id = None;
        self.set_phase(SessionPhase::Idle);
        self.notify(SessionEvent::Stopped);
        self.running = false;
    }

    /// Log and drop an envelope that is valid but wrong for the current
    /// phase or peer. Session state stays untouched.
    fn drop_envelope(&self, kind: &str, detail: &str) {
        warn!("Dropping {} message: {}", kind, detail);
        self.notify(SessionEvent::Error(SignalError::ProtocolMismatch(format!(
            "{}: {}",
            kind, detail
        ))));
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            debug!("Session phase: {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    fn emit(&self, message: SignalMessage) {
        if let Some(ref channel) = self.channel {
            channel.send(&message);
        }
    }

    fn notify(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    fn submit(&self, op: EngineOp) {
        let _ = self.engine_ops.send(op);
    }
}

/// Drain engine work one operation at a time.
///
/// A single dispatcher owns the facade, so ops land in exactly the order
/// the state machine submitted them. The task ends when the coordinator
/// drops its sender, after any queued teardown has run.
async fn run_engine_ops(
    facade: Arc<dyn NegotiationFacade>,
    completions: mpsc::UnboundedSender<NegotiationEvent>,
    mut ops: mpsc::UnboundedReceiver<EngineOp>,
) {
    while let Some(op) = ops.recv().await {
        match op {
            EngineOp::CreateOffer { epoch } => {
                let result = facade.create_local_offer().await;
                let _ = completions.send(NegotiationEvent::OfferReady { epoch, result });
            }
            EngineOp::AcceptOffer { epoch, offer } => {
                let result = facade.accept_remote_offer(offer).await;
                let _ = completions.send(NegotiationEvent::AnswerReady { epoch, result });
            }
            EngineOp::ApplyAnswer { epoch, answer } => {
                let result = facade.apply_remote_answer(answer).await;
                let _ = completions.send(NegotiationEvent::AnswerApplied { epoch, result });
            }
            EngineOp::AddCandidate(candidate) => facade.add_remote_candidate(candidate).await,
            EngineOp::Close => facade.close().await,
        }
    }
    debug!("Engine dispatcher finished");
}
