//! [`Transport`] over a real WebSocket.
//!
//! Each `open` spawns one link task that owns the socket. Link tasks report
//! back through the event channel given at construction, tagged with their
//! [`TransportHandle`].

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

use crate::transport::{
    CloseReason, Transport, TransportError, TransportEvent, TransportHandle, close_code,
};

/// Upper bound on waiting for the peer to finish a closing handshake.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Sending half of the channel link tasks report into.
pub type TransportEventSender = mpsc::UnboundedSender<(TransportHandle, TransportEvent)>;

// ---------------------------------------------------------------------------
// Type aliases for WebSocket split halves
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

type WsRead = futures_util::stream::SplitStream<WsStream>;
type WsWrite = futures_util::stream::SplitSink<WsStream, tungstenite::Message>;

#[derive(Debug)]
enum Outgoing {
    Text(String),
    Close { code: u16, reason: String },
}

/// WebSocket transport backed by `tokio-tungstenite`.
///
/// Must be used from within a tokio runtime.
pub struct WsTransport {
    next_id: u64,
    events: TransportEventSender,
    links: HashMap<TransportHandle, mpsc::UnboundedSender<Outgoing>>,
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new(events: TransportEventSender, connect_timeout: Duration) -> Self {
        Self {
            next_id: 0,
            events,
            links: HashMap::new(),
            connect_timeout,
        }
    }
}

impl Transport for WsTransport {
    fn open(&mut self, url: &Url) -> Result<TransportHandle, TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Runtime(e.to_string()))?;

        // Links whose task has exited are no longer reachable.
        self.links.retain(|_, tx| !tx.is_closed());

        self.next_id += 1;
        let handle = TransportHandle::new(self.next_id);
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(run_link(
            handle,
            url.clone(),
            self.connect_timeout,
            rx,
            self.events.clone(),
        ));
        self.links.insert(handle, tx);
        Ok(handle)
    }

    fn send(&mut self, handle: TransportHandle, text: &str) -> Result<(), TransportError> {
        let link = self
            .links
            .get(&handle)
            .ok_or(TransportError::NotOpen(handle))?;
        link.send(Outgoing::Text(text.to_string()))
            .map_err(|_| TransportError::NotOpen(handle))
    }

    fn close(&mut self, handle: TransportHandle, code: u16, reason: &str) {
        if let Some(link) = self.links.remove(&handle) {
            let _ = link.send(Outgoing::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Link task
// ---------------------------------------------------------------------------

async fn connect_and_split(url: &Url) -> Result<(WsWrite, WsRead), TransportError> {
    let (ws, _resp) = tokio_tungstenite::connect_async(url.as_str()).await?;
    Ok(ws.split())
}

async fn run_link(
    handle: TransportHandle,
    url: Url,
    connect_timeout: Duration,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: TransportEventSender,
) {
    let report = |event: TransportEvent| {
        let _ = events.send((handle, event));
    };
    let fail = |reason: String| {
        report(TransportEvent::Errored(reason.clone()));
        report(TransportEvent::Closed(CloseReason::abnormal(reason)));
    };

    let connecting = tokio::time::timeout(connect_timeout, connect_and_split(&url));
    let (mut ws_write, mut ws_read) = tokio::select! {
        result = connecting => match result {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => {
                tracing::debug!(handle = handle.id(), "WebSocket connect failed: {e}");
                fail(e.to_string());
                return;
            }
            Err(_) => {
                fail(format!(
                    "connect timed out after {}ms",
                    connect_timeout.as_millis()
                ));
                return;
            }
        },
        // Closed locally before the handshake finished.
        _ = outgoing.recv() => return,
    };

    report(TransportEvent::Opened);

    loop {
        tokio::select! {
            frame = ws_read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        report(TransportEvent::Message(text.as_str().to_string()));
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let reason = match frame {
                            Some(f) => CloseReason::new(u16::from(f.code), f.reason.as_str()),
                            None => CloseReason::new(close_code::NO_STATUS, ""),
                        };
                        report(TransportEvent::Closed(reason));
                        // Flushes the close reply tungstenite queued.
                        finish_close(ws_write, ws_read).await;
                        return;
                    }
                    Some(Ok(_)) => {
                        // Ignore binary, ping, pong frames
                    }
                    Some(Err(e)) => {
                        tracing::debug!(handle = handle.id(), "WebSocket error: {e}");
                        fail(e.to_string());
                        return;
                    }
                    None => {
                        report(TransportEvent::Closed(CloseReason::abnormal(
                            "WebSocket stream ended",
                        )));
                        return;
                    }
                }
            }

            cmd = outgoing.recv() => {
                match cmd {
                    Some(Outgoing::Text(text)) => {
                        let frame = tungstenite::Message::Text(text.into());
                        if let Err(e) = ws_write.send(frame).await {
                            fail(e.to_string());
                            return;
                        }
                    }
                    Some(Outgoing::Close { code, reason }) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = ws_write.send(tungstenite::Message::Close(Some(frame))).await;
                        finish_close(ws_write, ws_read).await;
                        return;
                    }
                    None => {
                        let _ = ws_write.close().await;
                        finish_close(ws_write, ws_read).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Drive the closing handshake until the peer's side is done or
/// [`CLOSE_GRACE`] runs out.
async fn finish_close(mut ws_write: WsWrite, mut ws_read: WsRead) {
    let drain = async {
        let _ = ws_write.flush().await;
        while let Some(Ok(_)) = ws_read.next().await {}
    };
    let _ = tokio::time::timeout(CLOSE_GRACE, drain).await;
}

impl From<tungstenite::Error> for TransportError {
    fn from(e: tungstenite::Error) -> Self {
        TransportError::WebSocket(e.to_string())
    }
}
