//! Signaling transport channel
//!
//! WebSocket client connection to the signaling relay. Connection failures
//! surface through the event stream rather than from `connect` itself, and
//! events are delivered in arrival order. The channel never reconnects on
//! its own; a closed channel stays closed and sends become no-ops.

use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

use super::message::SignalMessage;

/// Observable channel events, delivered in arrival order
#[derive(Debug, PartialEq)]
pub enum ChannelEvent {
    /// Connection established
    Open,
    /// Raw text payload received
    Message(String),
    /// Transport-level failure; a `Closed` event follows
    Error(String),
    /// Connection finished, gracefully or not; nothing follows
    Closed { code: Option<u16>, reason: String },
}

/// Duplex message channel to the signaling relay
pub struct SignalChannel {
    outbound_tx: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
}

impl SignalChannel {
    /// Start connecting to the relay.
    ///
    /// Always returns immediately; dial failures arrive on the event stream
    /// as an `Error` followed by `Closed`.
    pub fn connect(url: &str) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Message>();
        let open = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_connection(
            url.to_string(),
            outbound_tx.clone(),
            outbound_rx,
            event_tx,
            open.clone(),
        ));

        (Self { outbound_tx, open }, event_rx)
    }

    /// Send a message if the channel is open; otherwise drop it.
    pub fn send(&self, message: &SignalMessage) {
        if !self.open.load(Ordering::SeqCst) {
            debug!("Channel not open, dropping {} message", message.kind());
            return;
        }
        match message.to_json() {
            Ok(text) => {
                let _ = self.outbound_tx.send(Message::Text(text));
            }
            Err(e) => warn!("Failed to encode {} message: {}", message.kind(), e),
        }
    }

    /// Close the connection gracefully. Subsequent sends are dropped.
    pub fn disconnect(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Closing signaling connection");
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "closing".into(),
        };
        let _ = self.outbound_tx.send(Message::Close(Some(frame)));
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

async fn run_connection(
    url: String,
    outbound_tx: mpsc::UnboundedSender<Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    open: Arc<AtomicBool>,
) {
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            error!("Failed to connect to {}: {}", url, e);
            let _ = event_tx.send(ChannelEvent::Error(format!("connect to {} failed: {}", url, e)));
            let _ = event_tx.send(ChannelEvent::Closed {
                code: None,
                reason: String::new(),
            });
            return;
        }
    };

    info!("Connected to signaling server at {}", url);
    open.store(true, Ordering::SeqCst);
    let _ = event_tx.send(ChannelEvent::Open);

    let (mut write, mut read) = ws_stream.split();

    // Drain the outbound queue into the socket; a close frame ends the task
    let writer_handle = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if write.send(message).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Deliver incoming frames until the connection ends
    let mut closed = None;
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let _ = event_tx.send(ChannelEvent::Message(text));
            }
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => {
                    let _ = event_tx.send(ChannelEvent::Message(text));
                }
                Err(_) => debug!("Ignoring non-UTF8 binary frame"),
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Pong(_)) => {}
            Ok(Message::Frame(_)) => {}
            Ok(Message::Close(frame)) => {
                closed = Some(match frame {
                    Some(frame) => ChannelEvent::Closed {
                        code: Some(u16::from(frame.code)),
                        reason: frame.reason.to_string(),
                    },
                    None => ChannelEvent::Closed {
                        code: None,
                        reason: String::new(),
                    },
                });
                break;
            }
            Err(e) => {
                error!("Signaling connection error: {}", e);
                let _ = event_tx.send(ChannelEvent::Error(e.to_string()));
                break;
            }
        }
    }

    open.store(false, Ordering::SeqCst);
    let _ = event_tx.send(closed.unwrap_or(ChannelEvent::Closed {
        code: None,
        reason: String::new(),
    }));

    // The channel handle still holds a sender, so the writer will not end
    // on its own once the socket is gone.
    writer_handle.abort();
    let _ = writer_handle.await;
    debug!("Signaling connection task finished");
}
