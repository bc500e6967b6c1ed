// Common types for the streaming module

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for streaming operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur inside the streaming pipeline.
///
/// None of these reach the dashboard directly: the session turns the ones the
/// user should see into a [`SessionError`] and logs the rest.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Channel closed")]
    ChannelClosed,
}

/// Connection lifecycle state of a streaming session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Idle, no transport and no pending retry
    #[default]
    Disconnected,

    /// First attempt in flight
    Connecting,

    /// Transport open, keepalive running
    Connected,

    /// Transport lost; a retry is scheduled or in flight
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-visible error recorded on the session.
///
/// The dashboard polls this next to [`ConnectionState`]; its `Display` form is
/// the human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No credential at connect time
    #[error("Missing auth token")]
    AuthMissing,

    /// Transport reported an error; the connection lives on until it closes
    #[error("WebSocket error: {0}")]
    Transport(String),

    /// The transport could not be created at all; no automatic retry
    #[error("Failed to connect WebSocket: {0}")]
    TransportConstruction(String),
}

/// Identifies one transport attempt. Events tagged with an older id are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Events a transport feeds into the session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Error(String),
    Close,
}

/// Events emitted by the stream controller
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        session_id: String,
        state: ConnectionState,
    },
    SampleAppended {
        session_id: String,
        history_len: usize,
    },
    Error {
        session_id: String,
        error: SessionError,
    },
}
