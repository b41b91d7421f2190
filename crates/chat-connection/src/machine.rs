//! Connection state machine: transitions, reconnection, inactivity, and
//! connect-on-demand sends.
//!
//! The machine is synchronous. Callers feed it inputs (user operations,
//! [`TransportEvent`]s, expired [`TimerHandle`]s) one at a time and drain the
//! resulting [`Event`]s with [`Connection::poll_event`].

use std::collections::VecDeque;

use crate::config::ConnectionConfig;
use crate::inactivity::InactivityMonitor;
use crate::scheduler::{Scheduler, TimerHandle};
use crate::transport::{CloseReason, Transport, TransportEvent, TransportHandle, close_code};
use crate::types::{ChatMessage, ConnectionState, Direction, Error, Event};

const DELIBERATE_CLOSE_REASON: &str = "Deliberate disconnection";
const INACTIVITY_CLOSE_REASON: &str = "Inactivity timeout";
const SUPERSEDED_CLOSE_REASON: &str = "Superseded by a new connection";
const RELEASED_CLOSE_REASON: &str = "Session ended";

/// Debug trace sink: a no-op unless debug logging is enabled on the
/// connection.
macro_rules! trace_debug {
    ($conn:expr, $($arg:tt)*) => {
        if $conn.debug {
            tracing::debug!($($arg)*);
        }
    };
}

/// Lifecycle manager for one logical chat session.
pub struct Connection<T: Transport, S: Scheduler> {
    config: ConnectionConfig,
    transport: T,
    scheduler: S,
    state: ConnectionState,
    handle: Option<TransportHandle>,
    retry_count: u32,
    reconnect_timer: Option<TimerHandle>,
    inactivity: InactivityMonitor,
    pending: Option<String>,
    debug: bool,
    events: VecDeque<Event>,
}

impl<T: Transport, S: Scheduler> Connection<T, S> {
    pub fn new(config: ConnectionConfig, transport: T, scheduler: S) -> Self {
        let inactivity = InactivityMonitor::new(config.inactivity_timeout());
        let debug = config.debug();
        let conn = Self {
            config,
            transport,
            scheduler,
            state: ConnectionState::Disconnected,
            handle: None,
            retry_count: 0,
            reconnect_timer: None,
            inactivity,
            pending: None,
            debug,
            events: VecDeque::new(),
        };
        trace_debug!(conn, url = %conn.config.url(), "connection initialized");
        conn
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// The message waiting for the connection to open, if any.
    pub fn pending_outbound(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn inactivity_timeout(&self) -> Option<std::time::Duration> {
        self.inactivity.timeout()
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// Next emitted event, oldest first.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    // -----------------------------------------------------------------------
    // User operations
    // -----------------------------------------------------------------------

    /// Open the transport unless an attempt is in flight or already open.
    ///
    /// A manual connect resets the retry counter and replaces any scheduled
    /// automatic retry.
    pub fn connect(&mut self) {
        match self.state {
            ConnectionState::Connecting => {
                trace_debug!(self, "connection already in progress");
                return;
            }
            ConnectionState::Connected => {
                trace_debug!(self, "already connected");
                return;
            }
            _ => {}
        }
        self.retry_count = 0;
        self.cancel_reconnect_timer();
        self.open();
    }

    /// Close the transport deliberately. Never schedules a reconnection.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected
            && self.handle.is_none()
            && self.reconnect_timer.is_none()
        {
            trace_debug!(self, "already disconnected");
            return;
        }

        trace_debug!(self, "disconnecting");
        self.inactivity.cancel(&mut self.scheduler);
        self.cancel_reconnect_timer();
        if let Some(handle) = self.handle.take() {
            self.transport
                .close(handle, close_code::NORMAL, DELIBERATE_CLOSE_REASON);
        }
        self.fail_pending("disconnected before the connection opened");
        if self.state != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected);
            self.system("Disconnected from server");
        }
    }

    /// Force a fresh connection: deliberate close, then connect.
    pub fn reconnect(&mut self) {
        trace_debug!(self, "force reconnect initiated");
        // Keep the pending message across the forced cycle.
        let pending = self.pending.take();
        self.disconnect();
        self.pending = pending;
        self.connect();
    }

    /// Send a message, connecting first when needed.
    ///
    /// Empty or whitespace-only input is ignored. While not connected the
    /// message becomes the single pending outbound message, replacing any
    /// earlier one.
    pub fn send(&mut self, text: &str) {
        let message = text.trim();
        if message.is_empty() {
            trace_debug!(self, "empty message, not sending");
            return;
        }

        if self.state == ConnectionState::Connected {
            self.deliver(message.to_string());
            return;
        }

        trace_debug!(self, "not connected, connecting before sending");
        if let Some(previous) = self.pending.replace(message.to_string()) {
            trace_debug!(self, superseded = %previous, "pending message replaced");
        }
        self.connect();
    }

    /// Explicit user interaction; counts as activity.
    pub fn touch(&mut self) {
        if self.state == ConnectionState::Connected {
            self.inactivity.arm(&mut self.scheduler);
        }
    }

    /// The user focused the input: connect on demand, then count as
    /// activity.
    pub fn focus(&mut self) {
        if self.state != ConnectionState::Connected {
            self.connect();
        }
        self.touch();
    }

    /// Change the inactivity window at runtime. `None` disables it.
    pub fn set_inactivity_timeout(&mut self, timeout: Option<std::time::Duration>) {
        self.inactivity.set_timeout(timeout, &mut self.scheduler);
        if self.state == ConnectionState::Connected && !self.inactivity.is_armed() {
            self.inactivity.arm(&mut self.scheduler);
        }
        trace_debug!(self, ?timeout, "inactivity timeout updated");
    }

    pub fn set_debug(&mut self, enabled: bool) {
        self.debug = enabled;
        trace_debug!(self, "debug logging enabled");
    }

    // -----------------------------------------------------------------------
    // Environment inputs
    // -----------------------------------------------------------------------

    /// Feed a transport callback. Events for any handle other than the
    /// current one are dropped.
    pub fn on_transport_event(&mut self, handle: TransportHandle, event: TransportEvent) {
        if self.handle != Some(handle) {
            trace_debug!(self, handle = handle.id(), ?event, "ignoring stale transport event");
            return;
        }
        match event {
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::Message(text) => self.on_inbound(text),
            TransportEvent::Closed(reason) => self.on_closed(reason),
            TransportEvent::Errored(reason) => self.on_errored(reason),
        }
    }

    /// Feed an expired deadline. Cancelled or superseded deadlines are
    /// dropped.
    pub fn on_timer(&mut self, timer: TimerHandle) {
        if self.reconnect_timer == Some(timer) {
            self.reconnect_timer = None;
            self.on_reconnect_due();
        } else if self.inactivity.expire(timer) {
            self.on_inactive();
        } else {
            trace_debug!(self, timer = timer.id(), "ignoring stale timer");
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn open(&mut self) {
        if let Some(stale) = self.handle.take() {
            self.transport
                .close(stale, close_code::NORMAL, SUPERSEDED_CLOSE_REASON);
        }
        self.set_state(ConnectionState::Connecting);
        trace_debug!(self, url = %self.config.url(), "attempting to connect");
        match self.transport.open(self.config.url()) {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => self.open_failed(e.to_string()),
        }
    }

    fn open_failed(&mut self, reason: String) {
        tracing::warn!("Connection error: {reason}");
        self.emit(Event::Error {
            error: Error::ConnectionOpen {
                reason: reason.clone(),
            },
        });
        self.fail_pending(&reason);
        self.set_state(ConnectionState::Errored);
        self.system(format!("Connection error: {reason}"));
    }

    fn on_opened(&mut self) {
        if self.state != ConnectionState::Connecting {
            trace_debug!(self, state = %self.state, "ignoring open outside connecting state");
            return;
        }
        tracing::info!(url = %self.config.url(), "Connection established");
        self.retry_count = 0;
        self.set_state(ConnectionState::Connected);
        self.system("Connected to server");
        self.inactivity.arm(&mut self.scheduler);
        if let Some(message) = self.pending.take() {
            self.deliver(message);
        }
    }

    fn on_inbound(&mut self, text: String) {
        if self.state != ConnectionState::Connected {
            trace_debug!(self, state = %self.state, "dropping message outside connected state");
            return;
        }
        self.inactivity.arm(&mut self.scheduler);
        trace_debug!(self, message = %text, "message received");
        self.emit(Event::Message(ChatMessage::new(Direction::Inbound, text)));
    }

    fn on_errored(&mut self, reason: String) {
        match self.state {
            ConnectionState::Connecting => self.open_failed(reason),
            _ => {
                // The transport follows up with a close; that is where loss
                // is reported.
                tracing::warn!(state = %self.state, "Transport error: {reason}");
            }
        }
    }

    fn on_closed(&mut self, reason: CloseReason) {
        let previous = self.state;
        self.handle = None;
        self.inactivity.cancel(&mut self.scheduler);
        trace_debug!(
            self,
            code = reason.code,
            clean = reason.is_clean(),
            "connection closed: {}",
            reason.reason
        );

        let abnormal = !reason.is_clean();
        if abnormal {
            match previous {
                ConnectionState::Connected => {
                    tracing::warn!(code = reason.code, "Connection lost: {}", reason.reason);
                    self.emit(Event::Error {
                        error: Error::ConnectionLost {
                            code: reason.code,
                            reason: reason.reason.clone(),
                        },
                    });
                }
                ConnectionState::Connecting => {
                    tracing::warn!(code = reason.code, "Connection failed: {}", reason.reason);
                    self.emit(Event::Error {
                        error: Error::ConnectionOpen {
                            reason: reason.reason.clone(),
                        },
                    });
                }
                // Errored already reported the failure.
                _ => {}
            }
        }

        self.fail_pending(&format!("connection closed: {}", reason.reason));
        self.set_state(ConnectionState::Disconnected);
        self.system("Disconnected from server");

        if abnormal && self.config.auto_reconnect() {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        let max = self.config.max_reconnect_attempts();
        if self.retry_count >= max {
            tracing::warn!(attempts = self.retry_count, "Maximum reconnection attempts reached");
            self.emit(Event::Error {
                error: Error::RetriesExhausted {
                    attempts: self.retry_count,
                },
            });
            self.system("Maximum reconnection attempts reached");
            return;
        }

        self.retry_count += 1;
        let delay = self.config.backoff().delay(self.retry_count);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.reconnect_timer = Some(self.scheduler.after(delay));
        tracing::info!(
            attempt = self.retry_count,
            max,
            delay_ms,
            "Scheduling reconnect"
        );
        self.emit(Event::ReconnectScheduled {
            attempt: self.retry_count,
            delay_ms,
        });
        self.system(format!(
            "Attempting to reconnect in {:.1} seconds...",
            delay.as_secs_f64()
        ));
    }

    fn on_reconnect_due(&mut self) {
        if self.state != ConnectionState::Disconnected {
            trace_debug!(self, state = %self.state, "skipping reconnect, state changed");
            return;
        }
        trace_debug!(self, attempt = self.retry_count, "executing reconnect attempt");
        self.open();
    }

    fn on_inactive(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }
        tracing::info!("Inactivity timeout reached");
        self.cancel_reconnect_timer();
        if let Some(handle) = self.handle.take() {
            self.transport
                .close(handle, close_code::NORMAL, INACTIVITY_CLOSE_REASON);
        }
        self.set_state(ConnectionState::Inactive);
        self.system("Disconnected due to inactivity");
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn deliver(&mut self, message: String) {
        let Some(handle) = self.handle else {
            self.send_failed(message, "no open transport".to_string());
            return;
        };
        match self.transport.send(handle, &message) {
            Ok(()) => {
                trace_debug!(self, message = %message, "message sent");
                self.emit(Event::Message(ChatMessage::new(Direction::Outbound, message)));
                self.inactivity.arm(&mut self.scheduler);
            }
            Err(e) => self.send_failed(message, e.to_string()),
        }
    }

    fn fail_pending(&mut self, reason: &str) {
        if let Some(message) = self.pending.take() {
            self.send_failed(message, reason.to_string());
        }
    }

    fn send_failed(&mut self, message: String, reason: String) {
        tracing::warn!("Send error: {reason}");
        self.system(format!("Failed to send message: {reason}"));
        self.emit(Event::Error {
            error: Error::SendFailed { message, reason },
        });
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            self.scheduler.cancel(timer);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        self.state = state;
        trace_debug!(self, %state, "status updated");
        self.emit(Event::StateChanged { state });
    }

    fn system(&mut self, text: impl Into<String>) {
        self.emit(Event::Message(ChatMessage::new(Direction::System, text)));
    }

    fn emit(&mut self, event: Event) {
        self.events.push_back(event);
    }

    /// Cancel timers and close the transport without emitting events.
    fn release(&mut self) {
        self.inactivity.cancel(&mut self.scheduler);
        self.cancel_reconnect_timer();
        if let Some(handle) = self.handle.take() {
            self.transport
                .close(handle, close_code::NORMAL, RELEASED_CLOSE_REASON);
        }
    }
}

impl<T: Transport, S: Scheduler> Drop for Connection<T, S> {
    fn drop(&mut self) {
        self.release();
    }
}
