//! Closed error taxonomy for panel device interactions.

use thiserror::Error;

/// Errors raised while communicating with a panel device.
///
/// The transport wrappers map every underlying library failure into one of
/// these; sessions map them to reconnects except during explicit shutdown.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("timeout while communicating with the device: {0}")]
    Timeout(String),

    #[error("network connection to the device failed: {0}")]
    Connection(String),

    #[error("websocket handshake failed: {0}")]
    Handshake(String),

    #[error("http response error ({status}): {message}")]
    Response { status: u16, message: String },

    #[error("client error: {0}")]
    Client(String),
}

impl ClientError {
    /// HTTP status for response errors, if that is what this is.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Response { status, .. } => Some(*status),
            _ => None,
        }
    }
}
