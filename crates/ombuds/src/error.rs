use ombud_common::TokenError;
use thiserror::Error;

/// Errors that can occur during relay server operation.
#[derive(Error, Debug)]
pub enum OmbudsError {
    /// The presented token failed verification.
    #[error("authentication failed: {0}")]
    Auth(#[from] TokenError),
    /// The client did not complete authentication in time.
    #[error("authentication timed out")]
    AuthTimeout,
    /// The client offered an unsupported subprotocol version.
    #[error("unsupported client protocol version")]
    UnsupportedProtocol,
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Outbound envelope could not be encoded.
    #[error("envelope encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    /// The connection was closed by the remote peer.
    #[error("connection closed")]
    ConnectionClosed,
}
