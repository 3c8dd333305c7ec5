//! Run termination latch.
//!
//! Every component that can end a run (state counter, timer, scheduler,
//! workers, the driver) signals through one `ExitNotifier`. The first
//! reason recorded wins; later signals are ignored. Waiters are released
//! once, when that first reason lands.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reason an exploration run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    /// The configured number of distinct states was reached.
    MaxStates,
    /// The wall-clock limit ran out.
    MaxTime,
    /// No state has pending actions and no worker is busy.
    Exhausted,
    /// The driver asked the run to stop.
    Stopped,
    /// A fatal error ended the run.
    Error(String),
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxStates => f.write_str("maximum states reached"),
            Self::MaxTime => f.write_str("maximum time passed"),
            Self::Exhausted => f.write_str("exploration exhausted"),
            Self::Stopped => f.write_str("stopped manually"),
            Self::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

pub struct ExitNotifier {
    /// 0 means unlimited.
    max_states: usize,
    states: AtomicUsize,
    reason: Mutex<Option<ExitStatus>>,
    released: Condvar,
    exit_called: AtomicBool,
}

impl ExitNotifier {
    pub fn new(max_states: usize) -> Self {
        Self {
            max_states,
            states: AtomicUsize::new(0),
            reason: Mutex::new(None),
            released: Condvar::new(),
            exit_called: AtomicBool::new(false),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Record one more distinct state. Signals `MaxStates` when the count
    /// reaches the limit. Returns the new count.
    pub fn increment_number_of_states(&self) -> usize {
        let count = self.states.fetch_add(1, Ordering::AcqRel) + 1;
        if self.max_states > 0 && count >= self.max_states {
            tracing::info!(count, max = self.max_states, "state limit reached");
            self.signal(ExitStatus::MaxStates);
        }
        count
    }

    pub fn number_of_states(&self) -> usize {
        self.states.load(Ordering::Acquire)
    }

    pub fn signal_time_is_up(&self) {
        self.signal(ExitStatus::MaxTime);
    }

    pub fn signal_crawl_exhausted(&self) {
        self.signal(ExitStatus::Exhausted);
    }

    pub fn signal_error(&self, message: impl Into<String>) {
        self.signal(ExitStatus::Error(message.into()));
    }

    pub fn stop(&self) {
        self.signal(ExitStatus::Stopped);
    }

    /// Record `status` unless a reason is already set. Returns whether this
    /// call was the one that ended the run.
    pub fn signal(&self, status: ExitStatus) -> bool {
        let mut reason = self.reason.lock().unwrap();
        if reason.is_some() {
            return false;
        }
        tracing::debug!(reason = %status, "exit signalled");
        *reason = Some(status);
        self.exit_called.store(true, Ordering::Release);
        self.released.notify_all();
        true
    }

    /// Cheap check used by workers at loop boundaries.
    pub fn is_exit_called(&self) -> bool {
        self.exit_called.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<ExitStatus> {
        self.reason.lock().unwrap().clone()
    }

    /// Block until a reason is recorded.
    pub fn await_termination(&self) -> ExitStatus {
        let mut reason = self.reason.lock().unwrap();
        loop {
            if let Some(status) = reason.as_ref() {
                return status.clone();
            }
            reason = self.released.wait(reason).unwrap();
        }
    }

    /// Like `await_termination`, giving up after `timeout`.
    pub fn await_termination_timeout(&self, timeout: Duration) -> Option<ExitStatus> {
        let reason = self.reason.lock().unwrap();
        let (reason, _) = self
            .released
            .wait_timeout_while(reason, timeout, |r| r.is_none())
            .unwrap();
        reason.clone()
    }
}

impl Default for ExitNotifier {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl std::fmt::Debug for ExitNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitNotifier")
            .field("max_states", &self.max_states)
            .field("states", &self.number_of_states())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_max_states_one_exits_on_first_state() {
        let notifier = ExitNotifier::new(1);
        assert!(!notifier.is_exit_called());
        assert_eq!(notifier.increment_number_of_states(), 1);
        assert!(notifier.is_exit_called());
        assert_eq!(notifier.await_termination(), ExitStatus::MaxStates);
    }

    #[test]
    fn test_unlimited_never_exits_on_count() {
        let notifier = ExitNotifier::unlimited();
        for _ in 0..1000 {
            notifier.increment_number_of_states();
        }
        assert!(!notifier.is_exit_called());
        assert_eq!(notifier.number_of_states(), 1000);
    }

    #[test]
    fn test_first_writer_wins() {
        let notifier = ExitNotifier::unlimited();
        assert!(notifier.signal(ExitStatus::Exhausted));
        notifier.signal_time_is_up();
        notifier.signal_error("late");
        assert_eq!(notifier.reason(), Some(ExitStatus::Exhausted));
    }

    #[test]
    fn test_waiters_all_released() {
        let notifier = Arc::new(ExitNotifier::unlimited());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let n = Arc::clone(&notifier);
                thread::spawn(move || n.await_termination())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        notifier.stop();

        for w in waiters {
            assert_eq!(w.join().unwrap(), ExitStatus::Stopped);
        }
    }

    #[test]
    fn test_await_with_timeout() {
        let notifier = ExitNotifier::unlimited();
        assert_eq!(notifier.await_termination_timeout(Duration::from_millis(10)), None);
        notifier.signal_time_is_up();
        assert_eq!(
            notifier.await_termination_timeout(Duration::from_millis(10)),
            Some(ExitStatus::MaxTime)
        );
    }

    #[test]
    fn test_concurrent_increments_signal_once() {
        let notifier = Arc::new(ExitNotifier::new(50));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let n = Arc::clone(&notifier);
                thread::spawn(move || {
                    for _ in 0..25 {
                        n.increment_number_of_states();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(notifier.number_of_states(), 200);
        assert_eq!(notifier.reason(), Some(ExitStatus::MaxStates));
    }
}
