//! Duplex replication between two store instances.
//!
//! Each endpoint runs on its own thread; A's outgoing channel is B's incoming
//! one and vice versa. A [`CompletionBarrier`] counts the two directions down
//! and runs the completion callback once both have finished.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use geo_store::{ReplicationEndpoint, ReplicationStats, StoreError};
use serde::Serialize;

use crate::error::BenchError;

const STAGE: &str = "replication";

type Callback = Box<dyn FnOnce() + Send>;

/// Countdown that runs its callback exactly once, on the arrival that brings
/// it to zero. Arrivals past zero are ignored.
pub struct CompletionBarrier {
    remaining: AtomicUsize,
    callback: Mutex<Option<Callback>>,
}

impl CompletionBarrier {
    pub fn new(parties: usize, callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            remaining: AtomicUsize::new(parties),
            callback: Mutex::new(Some(Box::new(callback))),
        }
    }

    /// Count one party in. Returns true for the arrival that completed the
    /// barrier.
    pub fn arrive(&self) -> bool {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous != Ok(1) {
            return false;
        }

        let callback = match self.callback.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(callback) = callback {
            callback();
        }
        true
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplicationState {
    Idle,
    Replicating,
    AllDone,
    Failed,
}

/// Per-direction stats of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplicationSummary {
    pub a: ReplicationStats,
    pub b: ReplicationStats,
}

impl fmt::Display for ReplicationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a->b {} sent, b->a {} sent", self.a.sent, self.b.sent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
}

type Outcome = (Side, Result<ReplicationStats, StoreError>);

/// Runs one duplex replication session. Single use.
pub struct ReplicationDriver {
    state: ReplicationState,
    timeout: Option<Duration>,
}

impl ReplicationDriver {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            state: ReplicationState::Idle,
            timeout,
        }
    }

    pub fn state(&self) -> ReplicationState {
        self.state
    }

    /// Replicate `a` and `b` into each other and block until both directions
    /// have ended. `on_complete` runs once, on whichever endpoint thread
    /// finishes last, and never when either side fails.
    pub fn replicate(
        &mut self,
        a: Arc<dyn ReplicationEndpoint>,
        b: Arc<dyn ReplicationEndpoint>,
        on_complete: impl FnOnce() + Send + 'static,
    ) -> Result<ReplicationSummary, BenchError> {
        if self.state != ReplicationState::Idle {
            return Err(BenchError::InvalidState(format!(
                "replication driver is {:?}; it runs once",
                self.state
            )));
        }
        self.state = ReplicationState::Replicating;

        match self.run(a, b, on_complete) {
            Ok(summary) => {
                self.state = ReplicationState::AllDone;
                Ok(summary)
            }
            Err(e) => {
                self.state = ReplicationState::Failed;
                Err(e)
            }
        }
    }

    fn run(
        &self,
        a: Arc<dyn ReplicationEndpoint>,
        b: Arc<dyn ReplicationEndpoint>,
        on_complete: impl FnOnce() + Send + 'static,
    ) -> Result<ReplicationSummary, BenchError> {
        let barrier = Arc::new(CompletionBarrier::new(2, on_complete));
        let (a_out, b_in) = mpsc::channel();
        let (b_out, a_in) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<Outcome>();

        let handles = [
            spawn_side(Side::A, a, a_out, a_in, barrier.clone(), done_tx.clone())?,
            spawn_side(Side::B, b, b_out, b_in, barrier, done_tx)?,
        ];

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut stats = [None, None];
        for _ in 0..2 {
            let (side, result) = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    done_rx.recv_timeout(left).map_err(|e| match e {
                        RecvTimeoutError::Timeout => BenchError::Timeout {
                            stage: STAGE.to_string(),
                            after: self.timeout.unwrap_or_default(),
                        },
                        RecvTimeoutError::Disconnected => lost_endpoint(),
                    })?
                }
                None => done_rx.recv().map_err(|_| lost_endpoint())?,
            };

            let result = result.map_err(|e| {
                log::error!("Replication side {side:?} failed: {e}");
                BenchError::Replication(e)
            })?;
            log::debug!("Replication side {side:?} finished: {result:?}");
            stats[side as usize] = Some(result);
        }

        for handle in handles {
            if handle.join().is_err() {
                return Err(lost_endpoint());
            }
        }

        match stats {
            [Some(a), Some(b)] => Ok(ReplicationSummary { a, b }),
            _ => Err(BenchError::InvalidState(
                "replication ended without both sides reporting".into(),
            )),
        }
    }
}

fn spawn_side(
    side: Side,
    endpoint: Arc<dyn ReplicationEndpoint>,
    outgoing: mpsc::Sender<geo_store::ReplicationMessage>,
    incoming: mpsc::Receiver<geo_store::ReplicationMessage>,
    barrier: Arc<CompletionBarrier>,
    done: mpsc::Sender<Outcome>,
) -> Result<JoinHandle<()>, BenchError> {
    thread::Builder::new()
        .name(format!("geobench-replicate-{side:?}").to_lowercase())
        .spawn(move || {
            let result = endpoint.replicate(outgoing, incoming);
            if result.is_ok() {
                barrier.arrive();
            }
            let _ = done.send((side, result));
        })
        .map_err(|e| {
            BenchError::Replication(StoreError::Replication(format!(
                "failed to spawn endpoint thread: {e}"
            )))
        })
}

fn lost_endpoint() -> BenchError {
    BenchError::Replication(StoreError::Replication(
        "endpoint thread exited without reporting".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_store::ReplicationMessage;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc::{Receiver, Sender};

    /// Endpoint double that ignores the channels and finishes after `delay`.
    struct Scripted {
        delay: Duration,
        fail: bool,
        fired: Arc<AtomicUsize>,
        saw_early_fire: Arc<AtomicBool>,
    }

    impl Scripted {
        fn new(delay_ms: u64, fired: &Arc<AtomicUsize>) -> Self {
            Self {
                delay: Duration::from_millis(delay_ms),
                fail: false,
                fired: fired.clone(),
                saw_early_fire: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl ReplicationEndpoint for Scripted {
        fn replicate(
            &self,
            _outgoing: Sender<ReplicationMessage>,
            _incoming: Receiver<ReplicationMessage>,
        ) -> geo_store::Result<ReplicationStats> {
            thread::sleep(self.delay);
            if self.fired.load(Ordering::SeqCst) > 0 {
                self.saw_early_fire.store(true, Ordering::SeqCst);
            }
            if self.fail {
                return Err(StoreError::Replication("scripted failure".into()));
            }
            Ok(ReplicationStats {
                sent: 1,
                ..ReplicationStats::default()
            })
        }
    }

    fn counting_callback(fired: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let fired = fired.clone();
        move || {
            fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn barrier_fires_once_at_zero() {
        let fired = Arc::new(AtomicUsize::new(0));
        let barrier = CompletionBarrier::new(2, counting_callback(&fired));

        assert!(!barrier.arrive());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(barrier.arrive());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!barrier.arrive());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(barrier.remaining(), 0);
    }

    #[test]
    fn callback_waits_for_the_slower_side() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fast = Scripted::new(0, &fired);
        let slow = Scripted::new(150, &fired);
        let slow_saw_early = slow.saw_early_fire.clone();

        let mut driver = ReplicationDriver::new(None);
        let summary = driver
            .replicate(Arc::new(fast), Arc::new(slow), counting_callback(&fired))
            .unwrap();

        assert!(!slow_saw_early.load(Ordering::SeqCst));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(summary.a.sent + summary.b.sent, 2);
        assert_eq!(driver.state(), ReplicationState::AllDone);
    }

    #[test]
    fn failed_side_fails_the_session_without_callback() {
        let fired = Arc::new(AtomicUsize::new(0));
        let ok = Scripted::new(0, &fired);
        let mut bad = Scripted::new(20, &fired);
        bad.fail = true;

        let mut driver = ReplicationDriver::new(None);
        let err = driver
            .replicate(Arc::new(ok), Arc::new(bad), counting_callback(&fired))
            .unwrap_err();

        assert!(matches!(err, BenchError::Replication(_)));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(driver.state(), ReplicationState::Failed);
    }

    #[test]
    fn slow_session_times_out() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fast = Scripted::new(0, &fired);
        let stuck = Scripted::new(2_000, &fired);

        let mut driver = ReplicationDriver::new(Some(Duration::from_millis(50)));
        let err = driver
            .replicate(Arc::new(fast), Arc::new(stuck), counting_callback(&fired))
            .unwrap_err();

        assert!(matches!(err, BenchError::Timeout { ref stage, .. } if stage == "replication"));
        assert_eq!(driver.state(), ReplicationState::Failed);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn summary_shows_both_directions() {
        let summary = ReplicationSummary {
            a: ReplicationStats {
                sent: 100,
                received: 3,
                applied: 3,
            },
            b: ReplicationStats {
                sent: 3,
                received: 100,
                applied: 100,
            },
        };
        assert_eq!(summary.to_string(), "a->b 100 sent, b->a 3 sent");
    }

    #[test]
    fn driver_runs_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut driver = ReplicationDriver::new(None);
        driver
            .replicate(
                Arc::new(Scripted::new(0, &fired)),
                Arc::new(Scripted::new(0, &fired)),
                counting_callback(&fired),
            )
            .unwrap();

        let again = driver.replicate(
            Arc::new(Scripted::new(0, &fired)),
            Arc::new(Scripted::new(0, &fired)),
            || {},
        );
        assert!(matches!(again, Err(BenchError::InvalidState(_))));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
