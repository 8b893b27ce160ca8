//! Client error types.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;

/// Error returned by every public session operation.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Object not initialized")]
    ObjectNotInitialized,

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Out of memory")]
    OutOfMemory,

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Unsubscribe failed: {0}")]
    UnsubscribeFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Status codes reported by the protocol engine.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    #[error("bad parameter")]
    BadParameter,

    #[error("no memory")]
    NoMemory,

    #[error("send failed")]
    SendFailed,

    #[error("receive failed")]
    RecvFailed,

    #[error("bad response")]
    BadResponse,

    #[error("server refused")]
    ServerRefused,

    #[error("no data available")]
    NoDataAvailable,

    #[error("illegal state")]
    IllegalState,

    #[error("state collision")]
    StateCollision,

    #[error("keep-alive timeout")]
    KeepAliveTimeout,
}

impl EngineError {
    /// Whether this status means the link can no longer carry traffic.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            EngineError::RecvFailed
                | EngineError::SendFailed
                | EngineError::BadResponse
                | EngineError::KeepAliveTimeout
                | EngineError::IllegalState
        )
    }
}

impl From<EngineError> for ClientError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NoMemory => ClientError::OutOfMemory,
            EngineError::BadParameter => ClientError::InvalidArgument(err.to_string()),
            other => ClientError::Internal(format!("protocol engine: {}", other)),
        }
    }
}
