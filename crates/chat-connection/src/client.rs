//! Public entry point: [`ChatClient`].
//!
//! Runs a [`Connection`] over [`WsTransport`] and [`TokioScheduler`] in a
//! background task and exposes it through a command channel.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::config::ConnectionConfig;
use crate::machine::Connection;
use crate::scheduler::{Scheduler, TimerHandle, TokioScheduler};
use crate::transport::{Transport, TransportEvent, TransportHandle};
use crate::types::{ConnectionState, Direction, Error, Event};
use crate::ws::WsTransport;

type ConnectWaiter = oneshot::Sender<Result<(), Error>>;

enum Command {
    /// `None` when the caller does not wait for the outcome.
    Connect(Option<ConnectWaiter>),
    Send(String),
    Disconnect,
    Reconnect,
    Touch,
    Focus,
    SetInactivityTimeout(Option<Duration>),
    SetDebug(bool),
    State(oneshot::Sender<ConnectionState>),
}

/// Handle to a running chat connection.
///
/// Call [`next`](ChatClient::next) to receive events. Dropping the client (or
/// calling [`close`](ChatClient::close)) shuts the connection down.
///
/// Inbound chat messages may be dropped under backpressure if the consumer
/// falls behind. State changes and errors are never dropped.
pub struct ChatClient {
    rx: mpsc::Receiver<Event>,
    commands: mpsc::UnboundedSender<Command>,
    close_tx: Option<oneshot::Sender<()>>,
}

impl ChatClient {
    /// Start the background task. Nothing is opened until the first
    /// [`connect`](ChatClient::connect), [`send`](ChatClient::send) or
    /// [`focus`](ChatClient::focus).
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: ConnectionConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel::<Event>(config.event_channel_capacity());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel::<()>();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let transport = WsTransport::new(transport_tx, config.connect_timeout());
        let scheduler = TokioScheduler::new(timer_tx);
        let conn = Connection::new(config, transport, scheduler);

        tokio::spawn(run_event_loop(
            EventLoopState {
                conn,
                event_tx,
                waiters: Vec::new(),
                last_error: None,
                dropped_messages: 0,
            },
            Inputs {
                commands: command_rx,
                transport: transport_rx,
                timers: timer_rx,
                close: close_rx,
            },
        ));

        Self {
            rx: event_rx,
            commands: command_tx,
            close_tx: Some(close_tx),
        }
    }

    /// Receive the next event. Returns `None` if the background task has exited.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Connect and wait for the attempt to settle.
    ///
    /// Resolves `Ok` once connected (immediately if already connected), or
    /// with the error that ended the attempt. Automatic retries that follow a
    /// failed attempt are reported through [`next`](ChatClient::next) only.
    pub async fn connect(&self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Connect(Some(tx)))?;
        rx.await.map_err(|_| Error::Shutdown)?
    }

    /// Start connecting without waiting. The outcome arrives through
    /// [`next`](ChatClient::next).
    pub fn request_connect(&self) -> Result<(), Error> {
        self.command(Command::Connect(None))
    }

    /// Send a message, connecting first when needed. Empty or
    /// whitespace-only input is ignored.
    pub fn send(&self, text: impl Into<String>) -> Result<(), Error> {
        self.command(Command::Send(text.into()))
    }

    pub fn disconnect(&self) -> Result<(), Error> {
        self.command(Command::Disconnect)
    }

    /// Deliberately close and immediately reconnect.
    pub fn reconnect(&self) -> Result<(), Error> {
        self.command(Command::Reconnect)
    }

    /// Record user interaction.
    pub fn touch(&self) -> Result<(), Error> {
        self.command(Command::Touch)
    }

    /// The user focused the input: connect on demand.
    pub fn focus(&self) -> Result<(), Error> {
        self.command(Command::Focus)
    }

    /// `None` disables inactivity disconnects.
    pub fn set_inactivity_timeout(&self, timeout: Option<Duration>) -> Result<(), Error> {
        self.command(Command::SetInactivityTimeout(timeout))
    }

    pub fn set_debug(&self, enabled: bool) -> Result<(), Error> {
        self.command(Command::SetDebug(enabled))
    }

    pub async fn state(&self) -> Result<ConnectionState, Error> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::State(tx))?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// Shut down the background task, closing any open connection.
    pub fn close(mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
    }

    fn command(&self, cmd: Command) -> Result<(), Error> {
        self.commands.send(cmd).map_err(|_| Error::Shutdown)
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

struct Inputs {
    commands: mpsc::UnboundedReceiver<Command>,
    transport: mpsc::UnboundedReceiver<(TransportHandle, TransportEvent)>,
    timers: mpsc::UnboundedReceiver<TimerHandle>,
    close: oneshot::Receiver<()>,
}

struct EventLoopState<T: Transport, S: Scheduler> {
    conn: Connection<T, S>,
    event_tx: mpsc::Sender<Event>,
    waiters: Vec<ConnectWaiter>,
    /// Most recent error that ended a connection attempt.
    last_error: Option<Error>,
    dropped_messages: u64,
}

#[derive(Debug, PartialEq, Eq)]
enum LoopAction {
    Continue,
    Stop,
}

async fn run_event_loop<T: Transport, S: Scheduler>(
    mut p: EventLoopState<T, S>,
    mut inputs: Inputs,
) {
    loop {
        // Transport events that are already queued are handled before any
        // deadline that fired after them.
        tokio::select! {
            biased;

            _ = &mut inputs.close => {
                tracing::info!("Close requested");
                break;
            }

            Some((handle, event)) = inputs.transport.recv() => {
                p.conn.on_transport_event(handle, event);
            }

            Some(timer) = inputs.timers.recv() => {
                p.conn.on_timer(timer);
            }

            cmd = inputs.commands.recv() => {
                match cmd {
                    Some(cmd) => p.apply(cmd),
                    None => break,
                }
            }

            else => break,
        }

        if p.flush().await == LoopAction::Stop {
            break;
        }
    }

    for waiter in p.waiters.drain(..) {
        let _ = waiter.send(Err(Error::Shutdown));
    }
    if p.dropped_messages > 0 {
        tracing::warn!(
            total_dropped = p.dropped_messages,
            "event loop exiting with dropped messages"
        );
    }
    // Dropping the connection closes the transport and cancels timers.
}

impl<T: Transport, S: Scheduler> EventLoopState<T, S> {
    fn apply(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(waiter) => {
                self.conn.connect();
                match waiter {
                    Some(waiter) if self.conn.state() == ConnectionState::Connected => {
                        let _ = waiter.send(Ok(()));
                    }
                    Some(waiter) => self.waiters.push(waiter),
                    None => {}
                }
            }
            Command::Send(text) => self.conn.send(&text),
            Command::Disconnect => self.conn.disconnect(),
            Command::Reconnect => self.conn.reconnect(),
            Command::Touch => self.conn.touch(),
            Command::Focus => self.conn.focus(),
            Command::SetInactivityTimeout(timeout) => self.conn.set_inactivity_timeout(timeout),
            Command::SetDebug(enabled) => self.conn.set_debug(enabled),
            Command::State(reply) => {
                let _ = reply.send(self.conn.state());
            }
        }
    }

    /// Forward every queued event to the consumer.
    async fn flush(&mut self) -> LoopAction {
        while let Some(event) = self.conn.poll_event() {
            self.settle_waiters(&event);

            let inbound =
                matches!(&event, Event::Message(m) if m.direction == Direction::Inbound);
            if inbound {
                // Chat traffic may be dropped under backpressure; status
                // events must not be lost.
                match self.event_tx.try_send(event) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.dropped_messages += 1;
                        tracing::warn!(
                            total_dropped = self.dropped_messages,
                            "event channel full, dropping message"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return LoopAction::Stop,
                }
            } else if self.event_tx.send(event).await.is_err() {
                return LoopAction::Stop;
            }
        }
        LoopAction::Continue
    }

    fn settle_waiters(&mut self, event: &Event) {
        match event {
            Event::Error { error } if error.ends_attempt() => {
                self.last_error = Some(error.clone());
            }
            Event::StateChanged {
                state: ConnectionState::Connected,
            } => {
                self.last_error = None;
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
            }
            Event::StateChanged { state } if *state != ConnectionState::Connecting => {
                // A forced reconnect passes through `Disconnected` on its way
                // to a fresh attempt; the waiters belong to that attempt.
                if self.conn.state() == ConnectionState::Connecting {
                    return;
                }
                let error = self.last_error.take().unwrap_or(Error::Closed);
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(error.clone()));
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::config::ConnectionOptions;
    use crate::scheduler::ManualScheduler;
    use crate::transport::TransportError;

    /// Hands out sequential handles and accepts everything.
    #[derive(Default)]
    struct LoopbackTransport {
        next_id: u64,
    }

    impl Transport for LoopbackTransport {
        fn open(&mut self, _url: &Url) -> Result<TransportHandle, TransportError> {
            self.next_id += 1;
            Ok(TransportHandle::new(self.next_id))
        }

        fn send(&mut self, _handle: TransportHandle, _text: &str) -> Result<(), TransportError> {
            Ok(())
        }

        fn close(&mut self, _handle: TransportHandle, _code: u16, _reason: &str) {}
    }

    struct Harness {
        events: mpsc::Receiver<Event>,
        commands: mpsc::UnboundedSender<Command>,
        transport: mpsc::UnboundedSender<(TransportHandle, TransportEvent)>,
        timers: mpsc::UnboundedSender<TimerHandle>,
        _close: oneshot::Sender<()>,
    }

    impl Harness {
        async fn state(&self) -> ConnectionState {
            let (tx, rx) = oneshot::channel();
            self.commands.send(Command::State(tx)).unwrap();
            rx.await.unwrap()
        }

        fn drain(&mut self) -> Vec<Event> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }
    }

    fn start(conn: Connection<LoopbackTransport, ManualScheduler>) -> Harness {
        let (event_tx, events) = mpsc::channel(64);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (transport, transport_rx) = mpsc::unbounded_channel();
        let (timers, timer_rx) = mpsc::unbounded_channel();
        let (close, close_rx) = oneshot::channel();
        tokio::spawn(run_event_loop(
            EventLoopState {
                conn,
                event_tx,
                waiters: Vec::new(),
                last_error: None,
                dropped_messages: 0,
            },
            Inputs {
                commands: command_rx,
                transport: transport_rx,
                timers: timer_rx,
                close: close_rx,
            },
        ));
        Harness {
            events,
            commands,
            transport,
            timers,
            _close: close,
        }
    }

    fn connection(inactivity_ms: i64) -> Connection<LoopbackTransport, ManualScheduler> {
        let config = ConnectionConfig::from_options(ConnectionOptions {
            url: "ws://chat.test/ws".to_string(),
            inactivity_timeout: inactivity_ms,
            ..Default::default()
        })
        .unwrap();
        Connection::new(config, LoopbackTransport::default(), ManualScheduler::new())
    }

    fn state_changes(events: &[Event]) -> Vec<ConnectionState> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::StateChanged { state } => Some(*state),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn message_queued_before_deadline_is_delivered() {
        let mut conn = connection(1000);
        conn.connect();
        let handle = TransportHandle::new(1);
        conn.on_transport_event(handle, TransportEvent::Opened);
        assert_eq!(conn.state(), ConnectionState::Connected);

        // The deadline elapses with a message already waiting ahead of it.
        let fired = conn.scheduler_mut().advance(Duration::from_millis(1000));
        assert_eq!(fired.len(), 1);

        let mut harness = start(conn);
        harness
            .transport
            .send((handle, TransportEvent::Message("hi".to_string())))
            .unwrap();
        for timer in fired {
            harness.timers.send(timer).unwrap();
        }

        assert_eq!(harness.state().await, ConnectionState::Connected);
        let events = harness.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Message(m) if m.direction == Direction::Inbound && m.text == "hi"
        )));
        assert!(!state_changes(&events).contains(&ConnectionState::Inactive));
    }

    #[tokio::test]
    async fn connect_waiter_follows_forced_reconnect() {
        let mut harness = start(connection(0));
        let (tx, mut rx) = oneshot::channel();
        harness.commands.send(Command::Connect(Some(tx))).unwrap();
        harness.commands.send(Command::Reconnect).unwrap();
        assert_eq!(harness.state().await, ConnectionState::Connecting);
        assert!(rx.try_recv().is_err(), "waiter settled by the transient state");

        // The first link was abandoned; only the second attempt counts.
        harness
            .transport
            .send((TransportHandle::new(2), TransportEvent::Opened))
            .unwrap();
        assert_eq!(rx.await.unwrap(), Ok(()));
        assert_eq!(
            state_changes(&harness.drain()),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Connected,
            ]
        );
    }

    #[tokio::test]
    async fn connect_waiter_resolves_closed_on_disconnect() {
        let harness = start(connection(0));
        let (tx, rx) = oneshot::channel();
        harness.commands.send(Command::Connect(Some(tx))).unwrap();
        harness.commands.send(Command::Disconnect).unwrap();
        assert_eq!(rx.await.unwrap(), Err(Error::Closed));
    }

    #[tokio::test]
    async fn connect_without_waiter_still_opens() {
        let mut harness = start(connection(0));
        harness.commands.send(Command::Connect(None)).unwrap();
        assert_eq!(harness.state().await, ConnectionState::Connecting);
        harness
            .transport
            .send((TransportHandle::new(1), TransportEvent::Opened))
            .unwrap();
        assert_eq!(harness.state().await, ConnectionState::Connected);
        assert!(state_changes(&harness.drain()).contains(&ConnectionState::Connected));
    }
}
