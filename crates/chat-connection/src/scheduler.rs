//! Timer capability used by the state machine.
//!
//! The machine never sleeps. It asks a [`Scheduler`] for a deadline and is
//! later handed the [`TimerHandle`] back through
//! [`Connection::on_timer`](crate::Connection::on_timer). Two
//! implementations are provided: [`TokioScheduler`] for real time and
//! [`ManualScheduler`], a virtual clock for deterministic tests.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Identity of one scheduled deadline. Never reused by a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

pub trait Scheduler {
    /// Schedule a deadline `delay` from now.
    fn after(&mut self, delay: Duration) -> TimerHandle;

    /// Cancel a deadline. Unknown or already fired handles are ignored.
    fn cancel(&mut self, timer: TimerHandle);
}

// ---------------------------------------------------------------------------
// Real time
// ---------------------------------------------------------------------------

/// Scheduler backed by `tokio::time`. Expired handles are pushed into the
/// channel given at construction; the driver feeds them to the machine.
///
/// Must be used from within a tokio runtime.
pub struct TokioScheduler {
    next_id: u64,
    fired_tx: mpsc::UnboundedSender<TimerHandle>,
    timers: HashMap<TimerHandle, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new(fired_tx: mpsc::UnboundedSender<TimerHandle>) -> Self {
        Self {
            next_id: 0,
            fired_tx,
            timers: HashMap::new(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn after(&mut self, delay: Duration) -> TimerHandle {
        self.timers.retain(|_, task| !task.is_finished());

        let timer = TimerHandle(self.next_id);
        self.next_id += 1;
        let tx = self.fired_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(timer);
        });
        self.timers.insert(timer, task);
        timer
    }

    fn cancel(&mut self, timer: TimerHandle) {
        if let Some(task) = self.timers.remove(&timer) {
            task.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, task) in self.timers.drain() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Virtual time
// ---------------------------------------------------------------------------

/// Virtual clock. Time only moves when [`advance`](ManualScheduler::advance)
/// is called, which returns the deadlines that elapsed in firing order.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    now: Duration,
    next_id: u64,
    pending: BTreeMap<TimerHandle, Duration>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time, measured from construction.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Number of deadlines still pending.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Delays, relative to now, of every pending deadline in firing order.
    pub fn pending_delays(&self) -> Vec<Duration> {
        let mut deadlines: Vec<Duration> = self.pending.values().copied().collect();
        deadlines.sort();
        deadlines
            .into_iter()
            .map(|d| d.saturating_sub(self.now))
            .collect()
    }

    /// Time until the earliest pending deadline.
    pub fn next_delay(&self) -> Option<Duration> {
        self.pending
            .values()
            .min()
            .map(|d| d.saturating_sub(self.now))
    }

    /// Move the clock forward and collect every deadline that elapsed,
    /// ordered by deadline then by scheduling order.
    pub fn advance(&mut self, by: Duration) -> Vec<TimerHandle> {
        self.now = self.now.saturating_add(by);
        let now = self.now;
        let mut due: Vec<(Duration, TimerHandle)> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(timer, deadline)| (*deadline, *timer))
            .collect();
        due.sort();
        for (_, timer) in &due {
            self.pending.remove(timer);
        }
        due.into_iter().map(|(_, timer)| timer).collect()
    }
}

impl Scheduler for ManualScheduler {
    fn after(&mut self, delay: Duration) -> TimerHandle {
        let timer = TimerHandle(self.next_id);
        self.next_id += 1;
        self.pending.insert(timer, self.now.saturating_add(delay));
        timer
    }

    fn cancel(&mut self, timer: TimerHandle) {
        self.pending.remove(&timer);
    }
}
