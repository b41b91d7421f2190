//! Transport capability consumed by the state machine.

use url::Url;

/// WebSocket close codes used by this crate.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const NO_STATUS: u16 = 1005;
    pub const ABNORMAL: u16 = 1006;
}

/// Identity of one opened transport instance. Every `open` yields a new
/// handle; events carrying an older handle belong to a superseded
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportHandle(u64);

impl TransportHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// How a transport instance ended, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Closure without a close handshake (dropped socket, failed connect).
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(close_code::ABNORMAL, reason)
    }

    /// Only a normal (1000) closure counts as clean. Anything else may be
    /// retried.
    pub fn is_clean(&self) -> bool {
        self.code == close_code::NORMAL
    }
}

/// Callbacks a transport delivers for one of its handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed(CloseReason),
    Errored(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("transport {0:?} is not open")]
    NotOpen(TransportHandle),

    #[error("no async runtime available: {0}")]
    Runtime(String),
}

/// A persistent full-duplex text transport.
///
/// Events for a handle are delivered out of band (the concrete transport is
/// constructed with its event sink) and fed to
/// [`Connection::on_transport_event`](crate::Connection::on_transport_event).
/// `open` returning `Ok` only means the attempt started; success arrives as
/// [`TransportEvent::Opened`].
pub trait Transport {
    fn open(&mut self, url: &Url) -> Result<TransportHandle, TransportError>;

    fn send(&mut self, handle: TransportHandle, text: &str) -> Result<(), TransportError>;

    /// Start a local close. No further events for `handle` are required to
    /// be delivered.
    fn close(&mut self, handle: TransportHandle, code: u16, reason: &str);
}
