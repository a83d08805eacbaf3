use crate::data_sync::events::{EventPosition, PositionedEvent, RawLog, decode_log, subscribed_topics};
use alloy_primitives::Address;
use eyre::{Result, eyre};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

/// What an event source delivers to the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Event(PositionedEvent),
    /// The subscription was interrupted after `last_confirmed`; events may be missing.
    Gap { last_confirmed: Option<EventPosition> },
    /// A log for `pool` could not be decoded; its state must be re-read.
    Resync { pool: Address },
}

/// A long-lived feed of protocol events.
pub trait EventSource: Send + Sync {
    /// Start feeding `items` until `shutdown` flips to `true`.
    fn subscribe(&self, items: mpsc::Sender<StreamItem>, shutdown: watch::Receiver<bool>) -> JoinHandle<()>;
}

enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// `eth_subscribe("logs")` over WebSocket with reconnection.
///
/// After a reconnect a [`StreamItem::Gap`] is emitted before any new event, carrying the
/// last position forwarded before the drop.
#[derive(Debug, Clone)]
pub struct LogSubscriber {
    rpc_url: String,
    connection_timeout: Duration,
    max_reconnect_attempts: u32,
    reconnect_delay: Duration,
}

impl LogSubscriber {
    pub fn new(rpc_url: String, connection_timeout: Duration, max_reconnect_attempts: u32, reconnect_delay: Duration) -> Self {
        Self { rpc_url, connection_timeout, max_reconnect_attempts, reconnect_delay }
    }

    fn subscribe_request() -> Value {
        let topics: Vec<String> = subscribed_topics().iter().map(|topic| format!("{:#x}", topic)).collect();
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_subscribe",
            "params": ["logs", { "topics": [topics] }]
        })
    }

    async fn run(self, items: mpsc::Sender<StreamItem>, mut shutdown: watch::Receiver<bool>) {
        let mut reconnect_count = 0;
        let mut last_confirmed: Option<EventPosition> = None;
        let mut connected_once = false;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.connect_and_subscribe(&items, &mut shutdown, &mut last_confirmed, &mut connected_once, &mut reconnect_count).await {
                Ok(SessionEnd::Shutdown) => {
                    info!("Log subscription ended");
                    break;
                }
                Ok(SessionEnd::Disconnected) => {
                    warn!("Log subscription disconnected after position {:?}", last_confirmed);
                }
                Err(e) => {
                    error!("WebSocket connection error: {}", e);
                }
            }

            reconnect_count += 1;
            if reconnect_count > self.max_reconnect_attempts {
                error!("Max reconnection attempts reached, giving up");
                break;
            }

            warn!("Attempting reconnection #{} in {:?}", reconnect_count, self.reconnect_delay);
            tokio::select! {
                _ = sleep(self.reconnect_delay) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    async fn connect_and_subscribe(
        &self,
        items: &mpsc::Sender<StreamItem>,
        shutdown: &mut watch::Receiver<bool>,
        last_confirmed: &mut Option<EventPosition>,
        connected_once: &mut bool,
        reconnect_count: &mut u32,
    ) -> Result<SessionEnd> {
        let url = Url::parse(&self.rpc_url)?;
        info!("Connecting to WebSocket: {}", url);

        let (ws_stream, _) = timeout(self.connection_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| eyre!("WebSocket connection timeout"))?
            .map_err(|e| eyre!("WebSocket connection failed: {}", e))?;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        ws_sender.send(Message::Text(Self::subscribe_request().to_string().into())).await?;
        info!("Sent logs subscription request");

        let subscription_id = match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                let response: Value = serde_json::from_str(text.as_str())?;
                if let Some(result) = response.get("result") {
                    result.as_str().ok_or_else(|| eyre!("Invalid subscription ID format"))?.to_string()
                } else if let Some(error) = response.get("error") {
                    return Err(eyre!("Subscription error: {}", error));
                } else {
                    return Err(eyre!("Unexpected subscription response: {}", text));
                }
            }
            Some(Ok(msg)) => return Err(eyre!("Unexpected message type during subscription: {:?}", msg)),
            Some(Err(e)) => return Err(eyre!("WebSocket error during subscription: {}", e)),
            None => return Err(eyre!("WebSocket closed during subscription")),
        };

        info!("Subscribed to protocol logs with ID: {}", subscription_id);
        *reconnect_count = 0;

        if *connected_once {
            if items.send(StreamItem::Gap { last_confirmed: *last_confirmed }).await.is_err() {
                return Ok(SessionEnd::Shutdown);
            }
        }
        *connected_once = true;

        loop {
            tokio::select! {
                ws_msg = ws_receiver.next() => {
                    match ws_msg {
                        Some(Ok(Message::Text(text))) => {
                            match Self::handle_message(text.as_str()) {
                                Ok(Some(item)) => {
                                    if let StreamItem::Event(event) = &item {
                                        if !event.removed {
                                            *last_confirmed = (*last_confirmed).max(Some(event.position));
                                        }
                                    }
                                    if items.send(item).await.is_err() {
                                        info!("Event channel closed, ending subscription");
                                        return Ok(SessionEnd::Shutdown);
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => warn!("Failed to handle WebSocket message: {}", e),
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("WebSocket closed by server");
                            return Ok(SessionEnd::Disconnected);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                                error!("Failed to send pong: {}", e);
                                return Ok(SessionEnd::Disconnected);
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!("WebSocket error: {}", e);
                            return Ok(SessionEnd::Disconnected);
                        }
                        None => {
                            info!("WebSocket stream ended");
                            return Ok(SessionEnd::Disconnected);
                        }
                    }
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Received shutdown signal");
                        let _ = ws_sender.send(Message::Close(None)).await;
                        return Ok(SessionEnd::Shutdown);
                    }
                }
            }
        }
    }

    /// Turn one subscription notification into a stream item.
    pub(crate) fn handle_message(text: &str) -> Result<Option<StreamItem>> {
        let message: Value = serde_json::from_str(text)?;

        let Some(result) = message.get("params").and_then(|params| params.get("result")) else {
            return Ok(None);
        };

        let log: RawLog = serde_json::from_value(result.clone())?;
        match decode_log(&log) {
            Ok(Some(event)) => {
                debug!("Received {} for {} at {}", event.event.kind(), event.event.pool(), event.position);
                Ok(Some(StreamItem::Event(event)))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!("Undecodable log from {}: {}", log.address, e);
                Ok(Some(StreamItem::Resync { pool: log.address }))
            }
        }
    }
}

impl EventSource for LogSubscriber {
    fn subscribe(&self, items: mpsc::Sender<StreamItem>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.clone().run(items, shutdown))
    }
}
