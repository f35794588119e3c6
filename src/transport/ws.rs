//! WebSocket connector for panel devices.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use super::errors::ClientError;

/// The concrete stream type produced by [`connect_websocket`].
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default WebSocket path on panel devices.
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Connect to a device WebSocket endpoint.
///
/// Maps every failure into the closed [`ClientError`] taxonomy: elapsed
/// timeout, handshake rejection, or connection failure.
pub async fn connect_websocket(
    host: &str,
    port: u16,
    path: &str,
    timeout: Duration,
) -> Result<WsStream, ClientError> {
    let url = format!("ws://{host}:{port}{path}");
    debug!(%url, "connecting websocket");

    let connect = connect_async(&url);
    let result = tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| ClientError::Timeout("WebSocket connection timed out".to_string()))?;

    match result {
        Ok((stream, _response)) => Ok(stream),
        Err(err) => Err(map_ws_error(err)),
    }
}

/// Map a tungstenite error into the client taxonomy. Nothing outside the
/// transport layer sees the library's own error type.
pub(crate) fn map_ws_error(err: WsError) -> ClientError {
    match err {
        WsError::Http(response) => ClientError::Handshake(format!(
            "WebSocket handshake rejected with status {}",
            response.status()
        )),
        WsError::HttpFormat(err) => {
            ClientError::Handshake(format!("WebSocket handshake failed: {err}"))
        }
        WsError::Url(err) => ClientError::Handshake(format!("invalid WebSocket URL: {err}")),
        WsError::Io(err) => ClientError::Connection(format!("WebSocket connection failed: {err}")),
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            ClientError::Connection("WebSocket connection closed".to_string())
        }
        other => ClientError::Client(format!("WebSocket error: {other}")),
    }
}
