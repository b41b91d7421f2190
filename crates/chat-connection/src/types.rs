//! Public types for the chat-connection crate.

use std::fmt;

use serde::Serialize;

/// Lifecycle state of the connection. Exactly one holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Closed locally because no activity happened within the window.
    Inactive,
    /// The last open attempt failed.
    Errored,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Inactive => "inactive",
            ConnectionState::Errored => "errored",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Received from the remote endpoint.
    Inbound,
    /// Delivered to the transport by this client.
    Outbound,
    /// Notice generated locally ("Connected to server", ...).
    System,
}

/// A line for the rendering sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub direction: Direction,
    pub text: String,
}

impl ChatMessage {
    pub(crate) fn new(direction: Direction, text: impl Into<String>) -> Self {
        Self {
            direction,
            text: text.into(),
        }
    }
}

/// Events emitted by a [`Connection`](crate::Connection), in the order the
/// transitions happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    StateChanged {
        state: ConnectionState,
    },
    Message(ChatMessage),
    Error {
        error: Error,
    },
    /// An automatic reconnection attempt was scheduled.
    ReconnectScheduled {
        attempt: u32,
        delay_ms: u64,
    },
}

/// Errors reported by this crate.
///
/// Connection failures are delivered as [`Event::Error`] and never abort the
/// connection; only [`Error::Config`] is fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Error {
    #[error("connection open failed: {reason}")]
    ConnectionOpen { reason: String },

    #[error("connection lost: code={code}, {reason}")]
    ConnectionLost { code: u16, reason: String },

    #[error("failed to send {message:?}: {reason}")]
    SendFailed { message: String, reason: String },

    #[error("reconnection abandoned after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("config error: {reason}")]
    Config { reason: String },

    #[error("connection closed before it opened")]
    Closed,

    #[error("client has shut down")]
    Shutdown,
}

impl Error {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Error::Config {
            reason: reason.into(),
        }
    }

    /// Whether this error ends a pending connect attempt.
    pub(crate) fn ends_attempt(&self) -> bool {
        matches!(
            self,
            Error::ConnectionOpen { .. }
                | Error::ConnectionLost { .. }
                | Error::RetriesExhausted { .. }
        )
    }
}
