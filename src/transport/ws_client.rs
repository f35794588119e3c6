//! Normalized WebSocket client for panel devices.
//!
//! Wraps the raw WebSocket stream behind three normalized message kinds:
//! text, closed, error. Binary frames are dropped silently (reserved for
//! protocol-buffer payloads), a graceful peer close yields exactly one
//! terminal `Closed`, and abnormal terminations yield `Error`. The
//! underlying library's error taxonomy never escapes this module.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

use super::errors::ClientError;
use super::ws::{WsStream, connect_websocket};

/// Normalized messages yielded by the client stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    /// A text frame carrying a JSON payload.
    Text(String),
    /// The peer closed gracefully. Terminal; emitted exactly once.
    Closed,
    /// The connection failed abnormally. Terminal.
    Error,
}

impl WsMessage {
    /// Decode a text message payload into JSON.
    pub fn json(&self) -> Result<Value, ClientError> {
        match self {
            Self::Text(data) => serde_json::from_str(data)
                .map_err(|err| ClientError::Client(format!("invalid JSON frame: {err}"))),
            _ => Err(ClientError::Client(
                "only text messages can be decoded".to_string(),
            )),
        }
    }
}

/// Capacity of the single-consumer inbound message channel. A slow consumer
/// backpressures the reader task instead of buffering without bound.
const INBOUND_CHANNEL_CAPACITY: usize = 64;

type Writer = Arc<Mutex<SplitSink<WsStream, Message>>>;

/// WebSocket wrapper for panel devices.
///
/// A producer task reads frames, normalizes them, and feeds a bounded
/// single-consumer channel; the session listener takes the receiver and
/// reads until shutdown or a terminal message.
pub struct WsClient {
    writer: Writer,
    messages: StdMutex<Option<mpsc::Receiver<WsMessage>>>,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
    ping_task: StdMutex<Option<JoinHandle<()>>>,
}

impl WsClient {
    /// Connect to `ws://host:port{path}` and start the reader task.
    ///
    /// `ping_interval` enables transport-level ping frames to keep
    /// middleboxes from idling the connection out; application keepalive is
    /// the session's job.
    pub async fn connect(
        host: &str,
        port: u16,
        path: &str,
        ping_interval: Option<Duration>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let stream = connect_websocket(host, port, path, timeout).await?;
        let (write, mut read) = stream.split();
        let writer: Writer = Arc::new(Mutex::new(write));

        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let reader_task = tokio::spawn(async move {
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(data))) => {
                        if tx.send(WsMessage::Text(data.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        // Reserved for protobuf payloads; dropped silently.
                        trace!("dropping binary frame");
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = tx.send(WsMessage::Closed).await;
                        break;
                    }
                    Some(Err(err)) => {
                        debug!(%err, "websocket read failed");
                        let _ = tx.send(WsMessage::Error).await;
                        break;
                    }
                }
            }
        });

        let ping_task = ping_interval.map(|interval| {
            let writer = Arc::clone(&writer);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                // First tick fires immediately; skip it.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if writer
                        .lock()
                        .await
                        .send(Message::Ping(Vec::new().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            })
        });

        Ok(Self {
            writer,
            messages: StdMutex::new(Some(rx)),
            reader_task: StdMutex::new(Some(reader_task)),
            ping_task: StdMutex::new(ping_task),
        })
    }

    /// Take the inbound message receiver. Single consumer; the first caller
    /// wins and later calls get `None`.
    pub fn take_messages(&self) -> Option<mpsc::Receiver<WsMessage>> {
        self.messages.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Send a JSON payload as a text frame.
    pub async fn send_json(&self, payload: &Value) -> Result<(), ClientError> {
        let data = payload.to_string();
        self.writer
            .lock()
            .await
            .send(Message::Text(data.into()))
            .await
            .map_err(super::ws::map_ws_error)
    }

    /// Send binary data (reserved for protocol-buffer payloads).
    pub async fn send_bytes(&self, data: Vec<u8>) -> Result<(), ClientError> {
        self.writer
            .lock()
            .await
            .send(Message::Binary(data.into()))
            .await
            .map_err(super::ws::map_ws_error)
    }

    /// Close the connection gracefully and stop the background tasks.
    pub async fn close(&self) {
        self.abort_tasks();
        // SinkExt::close drives the close handshake from our side.
        let _ = self.writer.lock().await.close().await;
    }

    fn abort_tasks(&self) {
        if let Some(task) = self.ping_task.lock().ok().and_then(|mut slot| slot.take()) {
            task.abort();
        }
        if let Some(task) = self.reader_task.lock().ok().and_then(|mut slot| slot.take()) {
            task.abort();
        }
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
