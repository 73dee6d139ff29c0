use std::time::Duration;

use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("websocket handshake failed: {0}")]
    Handshake(Box<tungstenite::Error>),

    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid gateway request: {0}")]
    InvalidRequest(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("gateway unreachable after {attempts} attempts (last error: {last})")]
    Exhausted {
        attempts: u32,
        last: Box<GatewayError>,
    },

    #[error("gateway was disconnected")]
    Shutdown,
}

impl From<tungstenite::Error> for GatewayError {
    fn from(e: tungstenite::Error) -> Self {
        Self::Handshake(Box::new(e))
    }
}
