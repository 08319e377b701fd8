//! Full-duplex text channel.
//!
//! ## Design
//! - [`Channel::open`] spawns one tokio task per socket that owns the
//!   tokio-tungstenite stream; the rest of the crate only sees
//!   [`ChannelHandle`] (outbound) and a [`ChannelEvent`] receiver (inbound)
//! - [`Channel::pair`] builds the same contract in memory; the returned
//!   [`Peer`] plays the remote side in tests
//!
//! The receive path of each channel runs on its own worker. Whoever drains the
//! event receiver is that channel's single reader.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use crate::error::{RelayError, Result};

/// Something that happened on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(String),
    Error(String),
    Closed { code: Option<u16>, reason: String },
}

/// Something the local side asked the channel to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// Cloneable sending half.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelHandle {
    /// Queue a text frame. Fails once the socket task has gone away.
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        self.tx
            .send(Outbound::Text(text.into()))
            .map_err(|_| RelayError::ChannelClosed)
    }

    /// Ask the socket to close. Idempotent.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A channel: the sending handle plus the stream of inbound events.
#[derive(Debug)]
pub struct Channel {
    pub handle: ChannelHandle,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl Channel {
    /// Connect to `url` in the background.
    ///
    /// Returns immediately; `ChannelEvent::Open` arrives once the websocket
    /// handshake completes, or `Error` followed by `Closed` if it fails.
    /// Must be called from within a tokio runtime.
    pub fn open(url: impl Into<String>) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(url.into(), out_rx, ev_tx));
        Channel {
            handle: ChannelHandle { tx: out_tx },
            events: ev_rx,
        }
    }

    /// In-memory channel; the [`Peer`] drives the remote side.
    pub fn pair() -> (Channel, Peer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        (
            Channel {
                handle: ChannelHandle { tx: out_tx },
                events: ev_rx,
            },
            Peer {
                sent: out_rx,
                events: ev_tx,
            },
        )
    }
}

/// The remote end of an in-memory channel.
#[derive(Debug)]
pub struct Peer {
    sent: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl Peer {
    pub fn open(&self) {
        let _ = self.events.send(ChannelEvent::Open);
    }

    /// Deliver a text frame to the local side.
    pub fn deliver(&self, text: impl Into<String>) {
        let _ = self.events.send(ChannelEvent::Message(text.into()));
    }

    pub fn fail(&self, err: impl Into<String>) {
        let _ = self.events.send(ChannelEvent::Error(err.into()));
    }

    pub fn close(&self, code: Option<u16>, reason: impl Into<String>) {
        let _ = self.events.send(ChannelEvent::Closed {
            code,
            reason: reason.into(),
        });
    }

    /// Wait for the next thing the local side sent.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.sent.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.sent.try_recv().ok()
    }

    /// Wait for the next text frame, skipping close requests.
    pub async fn recv_text(&mut self) -> Option<String> {
        while let Some(out) = self.sent.recv().await {
            if let Outbound::Text(t) = out {
                return Some(t);
            }
        }
        None
    }

    /// Everything sent so far that has not been read yet, text frames only.
    pub fn drain_texts(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(item) = self.sent.try_recv() {
            if let Outbound::Text(t) = item {
                out.push(t);
            }
        }
        out
    }
}

/// `Some(reason)` when `url` needs TLS and this build has none.
fn tls_unavailable(url: &str) -> Option<String> {
    if cfg!(feature = "tls") || !url.starts_with("wss://") {
        return None;
    }
    Some(format!("{url} needs TLS; rebuild with the `tls` feature or use a ws:// url"))
}

async fn run_socket(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let connected = match tls_unavailable(&url) {
        Some(reason) => Err(reason),
        None => tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| e.to_string()),
    };
    let (ws, _response) = match connected {
        Ok(pair) => pair,
        Err(e) => {
            warn!(url = %url, error = %e, "websocket connect failed");
            let _ = events.send(ChannelEvent::Error(e));
            let _ = events.send(ChannelEvent::Closed {
                code: None,
                reason: "connect failed".into(),
            });
            return;
        }
    };
    debug!(url = %url, "websocket opened");
    let _ = events.send(ChannelEvent::Open);

    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        let _ = events.send(ChannelEvent::Error(e.to_string()));
                        let _ = events.send(ChannelEvent::Closed { code: None, reason: "send failed".into() });
                        return;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    let _ = events.send(ChannelEvent::Closed { code: Some(1000), reason: "closed locally".into() });
                    return;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = events.send(ChannelEvent::Message(text));
                }
                Some(Ok(WsMessage::Binary(bytes))) => {
                    let _ = events.send(ChannelEvent::Message(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (Some(u16::from(f.code)), f.reason.into_owned()))
                        .unwrap_or((None, String::new()));
                    let _ = events.send(ChannelEvent::Closed { code, reason });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(ChannelEvent::Error(e.to_string()));
                    let _ = events.send(ChannelEvent::Closed { code: None, reason: e.to_string() });
                    return;
                }
                None => {
                    let _ = events.send(ChannelEvent::Closed { code: None, reason: "stream ended".into() });
                    return;
                }
            },
        }
    }
}
