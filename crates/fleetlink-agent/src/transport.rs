//! WebSocket transport to the relay

use crate::error::TransportError;
use async_trait::async_trait;
use fleetlink_proto::Outgoing;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, warn};

/// Capacity of the outbound and inbound queues of a link
pub const LINK_QUEUE_SIZE: usize = 64;

/// An established transport: a write queue and a stream of text frames.
///
/// The inbound side ends when the transport closes.
#[derive(Debug)]
pub struct Link {
    /// Queue drained by the link's single writer task
    pub outbound: mpsc::Sender<Outgoing>,
    /// Text frames received from the relay
    pub inbound: mpsc::Receiver<String>,
}

/// Opens links to the relay
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Perform the transport handshake with `url`
    async fn dial(&self, url: &str) -> Result<Link, TransportError>;
}

/// Dialer backed by `tokio-tungstenite`
#[derive(Debug, Default, Clone, Copy)]
pub struct WsDialer;

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, url: &str) -> Result<Link, TransportError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(format!("{}: {}", url, e)))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outgoing>(LINK_QUEUE_SIZE);
        let (inbound_tx, inbound_rx) = mpsc::channel::<String>(LINK_QUEUE_SIZE);

        tokio::spawn(async move {
            while let Some(item) = outbound_rx.recv().await {
                match item {
                    Outgoing::Text(text) => {
                        if let Err(e) = ws_sender.send(WsMessage::Text(text)).await {
                            warn!("WebSocket write failed: {}", e);
                            break;
                        }
                    }
                    Outgoing::Close => {
                        if let Err(e) = ws_sender.send(WsMessage::Close(None)).await {
                            debug!("Close frame not sent: {}", e);
                        }
                        break;
                    }
                }
            }
            let _ = ws_sender.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        if inbound_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        debug!("Relay closed the WebSocket");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
