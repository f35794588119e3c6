//! Device transport layer
//!
//! All I/O and wire handling for panel devices: the pairing HTTP client,
//! the WebSocket connector, and the normalized message stream the session
//! listener consumes. Nothing above this layer sees the underlying
//! libraries' error taxonomies.

mod errors;
pub mod http;
pub mod ws;
pub mod ws_client;

pub use errors::ClientError;
pub use http::HttpClient;
pub use ws::connect_websocket;
pub use ws_client::{WsClient, WsMessage};
