//! Timeout supervision of a run thread
//!
//! The worker blocks on the run's event channel with a deadline instead of
//! polling. On expiry it raises the cancellation signal and gives teardown a
//! separate grace period; a run that does not finalize within it is
//! detached and its fixtures reported as leaked.

use super::run::{Outcome, RunEvent};
use crate::context::{CancelToken, RunContext};
use crate::fixture::TeardownFailure;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// What the worker learned about one run
#[derive(Default)]
pub(crate) struct Supervision {
    pub ctx: Option<Arc<RunContext>>,
    pub outcome: Option<Outcome>,
    pub teardown: Option<Vec<TeardownFailure>>,
    pub timed_out: bool,
    /// Teardown did not finish within the grace period
    pub leaked: bool,
    /// The run thread vanished without reporting
    pub lost: bool,
    /// Setup plus body, up to the timeout
    pub elapsed: Duration,
}

impl Supervision {
    fn apply(&mut self, event: RunEvent) {
        match event {
            RunEvent::Started(ctx) => self.ctx = Some(ctx),
            RunEvent::Executed(outcome) => self.outcome = Some(outcome),
            RunEvent::Finalized(failures) => self.teardown = Some(failures),
        }
    }
}

pub(crate) fn supervise(
    events: &Receiver<RunEvent>,
    cancel: &CancelToken,
    timeout: Duration,
    grace: Duration,
) -> Supervision {
    let start = Instant::now();
    let deadline = start + timeout;
    let mut sup = Supervision::default();

    while sup.outcome.is_none() {
        match events.recv_deadline(deadline) {
            Ok(event) => sup.apply(event),
            Err(RecvTimeoutError::Timeout) => {
                cancel.cancel();
                sup.timed_out = true;
                break;
            }
            Err(RecvTimeoutError::Disconnected) => {
                sup.lost = true;
                sup.elapsed = start.elapsed();
                return sup;
            }
        }
    }
    sup.elapsed = start.elapsed();

    // A run that finished in time may use the rest of its budget for
    // teardown; a cancelled one only gets the grace period.
    let now = Instant::now();
    let teardown_deadline = if sup.timed_out {
        now + grace
    } else {
        deadline.max(now + grace)
    };
    while sup.teardown.is_none() {
        match events.recv_deadline(teardown_deadline) {
            Ok(event) => sup.apply(event),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "teardown exceeded grace period, detaching run"
                );
                sup.leaked = true;
                break;
            }
            Err(RecvTimeoutError::Disconnected) => {
                sup.lost = true;
                break;
            }
        }
    }
    sup
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use std::thread;

    #[test]
    fn test_run_that_finishes_in_time() {
        let (tx, rx) = unbounded();
        let cancel = CancelToken::new();
        tx.send(RunEvent::Executed(Outcome::passed())).unwrap();
        tx.send(RunEvent::Finalized(Vec::new())).unwrap();
        let sup = supervise(&rx, &cancel, Duration::from_secs(5), Duration::from_secs(1));
        assert!(!sup.timed_out);
        assert!(!sup.leaked);
        assert_eq!(sup.outcome, Some(Outcome::passed()));
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn test_timeout_cancels_then_waits_for_teardown() {
        let (tx, rx) = unbounded();
        let cancel = CancelToken::new();
        let observed = cancel.clone();
        let handle = thread::spawn(move || {
            while !observed.is_cancelled() {
                thread::sleep(Duration::from_millis(1));
            }
            let _ = tx.send(RunEvent::Finalized(Vec::new()));
        });
        let sup = supervise(&rx, &cancel, Duration::from_millis(20), Duration::from_secs(5));
        handle.join().unwrap();
        assert!(sup.timed_out);
        assert!(cancel.is_cancelled());
        assert!(!sup.leaked);
        assert!(sup.teardown.is_some());
    }

    #[test]
    fn test_teardown_past_grace_is_leaked() {
        let (tx, rx) = unbounded::<RunEvent>();
        let cancel = CancelToken::new();
        let sup = supervise(&rx, &cancel, Duration::from_millis(10), Duration::from_millis(10));
        assert!(sup.timed_out);
        assert!(sup.leaked);
        drop(tx);
    }

    #[test]
    fn test_vanished_thread_is_lost() {
        let (tx, rx) = unbounded::<RunEvent>();
        drop(tx);
        let cancel = CancelToken::new();
        let sup = supervise(&rx, &cancel, Duration::from_secs(1), Duration::from_secs(1));
        assert!(sup.lost);
        assert!(sup.outcome.is_none());
    }
}
