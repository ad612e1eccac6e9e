use thiserror::Error;

/// Errors surfaced by the messaging core.
#[derive(Error, Debug)]
pub enum PulseError {
    /// An operation that requires a live transport was invoked while
    /// disconnected. Surfaced synchronously to the caller.
    #[error("Not connected to the chat server")]
    NotConnected,

    /// Low-level connection failure. Logged and absorbed by the reconnect
    /// policy; never raised across the public session operations.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A wire frame or payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The session task is gone (its command channel closed during shutdown).
    #[error("Session closed")]
    SessionClosed,
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, PulseError>;
