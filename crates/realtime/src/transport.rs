//! Transport abstraction for the hub connection.
//!
//! A transport turns a URL into a pair of text channels. The hub logic only
//! ever sees [`TransportLink`], so it can be driven by a real WebSocket or by
//! the in-process [`MemoryTransport`].

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use crate::error::{RealtimeError, RealtimeResult};

/// Text frames in both directions.
///
/// Dropping `outbound` closes the connection; `inbound` yields `None` once the
/// peer is gone.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str) -> RealtimeResult<TransportLink>;
}

/// WebSocket transport implementation using tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> RealtimeResult<TransportLink> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| RealtimeError::Connection(e.to_string()))?;
        let (mut sink, mut stream) = ws_stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                    warn!(error = %e, "websocket write failed");
                    return;
                }
            }
            // sender dropped: close politely
            let _ = sink.close().await;
            debug!("websocket writer finished");
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("ignoring non-utf8 binary frame");
                            continue;
                        }
                    },
                    Ok(WsMessage::Close(frame)) => {
                        debug!(?frame, "websocket closed by peer");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "websocket read failed");
                        break;
                    }
                };
                if inbound_tx.send(text).is_err() {
                    break;
                }
            }
            debug!("websocket reader finished");
        });

        Ok(TransportLink { outbound, inbound })
    }
}

/// Server side of a [`MemoryTransport`] connection.
#[derive(Debug)]
pub struct MemoryPeer {
    pub url: String,
    /// Frames pushed to the client. Drop to simulate a lost connection.
    pub to_client: mpsc::UnboundedSender<String>,
    /// Frames written by the client.
    pub from_client: mpsc::UnboundedReceiver<String>,
}

/// In-process transport: every successful `open` hands a [`MemoryPeer`] to
/// whoever holds the accept side.
#[derive(Debug)]
pub struct MemoryTransport {
    accept: mpsc::UnboundedSender<MemoryPeer>,
    refusals: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (accept, peers) = mpsc::unbounded_channel();
        (
            Self {
                accept,
                refusals: AtomicUsize::new(0),
            },
            peers,
        )
    }

    /// Fail the next `count` open attempts.
    pub fn refuse_next(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, url: &str) -> RealtimeResult<TransportLink> {
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(RealtimeError::Connection("connection refused".into()));
        }

        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        self.accept
            .send(MemoryPeer {
                url: url.to_string(),
                to_client,
                from_client,
            })
            .map_err(|_| RealtimeError::Connection("no listener".into()))?;

        Ok(TransportLink { outbound, inbound })
    }
}
