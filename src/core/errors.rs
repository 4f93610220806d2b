use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("transport error: {0}")]
    TransportError(String),

    #[error("connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("authentication error: {0}")]
    AuthError(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("JSON encoding error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl EngineError {
    /// True for errors the managed loop may recover from by reconnecting.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::TransportError(_) | Self::ConnectionTimeout(_))
    }
}
