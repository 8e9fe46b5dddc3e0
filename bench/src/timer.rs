//! Named-stage stopwatch with optional storage counter deltas.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use geo_store::CounterSource;
use serde::Serialize;

use crate::error::BenchError;

/// Name of the synthetic stage produced by [`PerfTimer::total`].
pub const TOTAL_STAGE: &str = "total";

/// Change of one storage counter across a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterDelta {
    pub name: &'static str,
    pub delta: u64,
}

/// One timed stage. `finished_at` is `started_at + duration`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTiming {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
    pub counters: Vec<CounterDelta>,
}

impl StageTiming {
    fn new(
        name: String,
        started_at: DateTime<Utc>,
        duration: Duration,
        counters: Vec<CounterDelta>,
    ) -> Self {
        let span = TimeDelta::from_std(duration).unwrap_or_else(|_| TimeDelta::zero());
        Self {
            name,
            started_at,
            finished_at: started_at + span,
            duration,
            counters,
        }
    }

    pub fn millis(&self) -> f64 {
        self.duration.as_secs_f64() * 1e3
    }

    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counters
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.delta)
    }
}

struct OpenStage {
    name: String,
    started: Instant,
    started_at: DateTime<Utc>,
    counters: Vec<(&'static str, u64)>,
}

/// Records the stages of one run in the order they were started.
///
/// At most one stage is open at a time. [`PerfTimer::total`] closes the run:
/// it appends a `total` stage summing every recorded duration and refuses any
/// further use.
pub struct PerfTimer {
    counters: Option<Arc<dyn CounterSource>>,
    open: Option<OpenStage>,
    stages: Vec<StageTiming>,
    totalled: bool,
}

impl Default for PerfTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfTimer {
    /// Wall-clock only timer.
    pub fn new() -> Self {
        Self {
            counters: None,
            open: None,
            stages: Vec::new(),
            totalled: false,
        }
    }

    /// Timer that also records deltas of `source`'s counters per stage.
    pub fn with_counters(source: Arc<dyn CounterSource>) -> Self {
        Self {
            counters: Some(source),
            ..Self::new()
        }
    }

    pub fn start(&mut self, name: impl Into<String>) -> Result<(), BenchError> {
        let name = name.into();
        if self.totalled {
            return Err(BenchError::InvalidState(format!(
                "cannot start '{name}': the run was already totalled"
            )));
        }
        if let Some(open) = &self.open {
            return Err(BenchError::InvalidState(format!(
                "cannot start '{name}' while '{}' is still running",
                open.name
            )));
        }

        let counters = self.snapshot();
        self.open = Some(OpenStage {
            name,
            started: Instant::now(),
            started_at: Utc::now(),
            counters,
        });
        Ok(())
    }

    /// Close the open stage and append its timing to the run.
    pub fn end(&mut self) -> Result<StageTiming, BenchError> {
        let open = self
            .open
            .take()
            .ok_or_else(|| BenchError::InvalidState("no stage is running".into()))?;
        let duration = open.started.elapsed();

        let after = self.snapshot();
        let counters = after
            .iter()
            .map(|&(name, value)| {
                let before = open
                    .counters
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map_or(0, |&(_, v)| v);
                CounterDelta {
                    name,
                    delta: value.saturating_sub(before),
                }
            })
            .collect();

        let timing = StageTiming::new(open.name, open.started_at, duration, counters);
        self.stages.push(timing.clone());
        Ok(timing)
    }

    /// Append and return the `total` stage. Callable once, with no stage open.
    pub fn total(&mut self) -> Result<StageTiming, BenchError> {
        if self.totalled {
            return Err(BenchError::InvalidState("total was already taken".into()));
        }
        if let Some(open) = &self.open {
            return Err(BenchError::InvalidState(format!(
                "cannot total while '{}' is still running",
                open.name
            )));
        }

        let duration = self.stages.iter().map(|s| s.duration).sum();
        let started_at = self
            .stages
            .first()
            .map_or_else(Utc::now, |s| s.started_at);

        let mut counters: Vec<CounterDelta> = Vec::new();
        for delta in self.stages.iter().flat_map(|s| &s.counters) {
            match counters.iter_mut().find(|c| c.name == delta.name) {
                Some(sum) => sum.delta += delta.delta,
                None => counters.push(*delta),
            }
        }

        let timing = StageTiming::new(TOTAL_STAGE.to_string(), started_at, duration, counters);
        self.stages.push(timing.clone());
        self.totalled = true;
        Ok(timing)
    }

    pub fn is_running(&self) -> bool {
        self.open.is_some()
    }

    pub fn stages(&self) -> &[StageTiming] {
        &self.stages
    }

    pub fn into_stages(self) -> Vec<StageTiming> {
        self.stages
    }

    fn snapshot(&self) -> Vec<(&'static str, u64)> {
        self.counters
            .as_ref()
            .map(|source| source.counter_snapshot())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;

    #[derive(Default)]
    struct FakeCounters {
        reads: AtomicU64,
        writes: AtomicU64,
    }

    impl CounterSource for FakeCounters {
        fn counter_snapshot(&self) -> Vec<(&'static str, u64)> {
            vec![
                ("reads", self.reads.load(Ordering::Relaxed)),
                ("writes", self.writes.load(Ordering::Relaxed)),
            ]
        }
    }

    #[test]
    fn start_twice_is_invalid_state() {
        let mut timer = PerfTimer::new();
        timer.start("insert").unwrap();
        let err = timer.start("index").unwrap_err();
        assert!(matches!(err, BenchError::InvalidState(_)));
        assert!(timer.is_running());
    }

    #[test]
    fn end_without_start_is_invalid_state() {
        let mut timer = PerfTimer::new();
        assert!(matches!(timer.end(), Err(BenchError::InvalidState(_))));

        timer.start("insert").unwrap();
        timer.end().unwrap();
        assert!(matches!(timer.end(), Err(BenchError::InvalidState(_))));
    }

    #[test]
    fn stages_are_recorded_in_order() {
        let mut timer = PerfTimer::new();
        for name in ["insert", "index", "centroid"] {
            timer.start(name).unwrap();
            let timing = timer.end().unwrap();
            assert_eq!(timing.name, name);
            assert!(timing.finished_at >= timing.started_at);
            assert!(timing.counters.is_empty());
        }
        let names: Vec<&str> = timer.stages().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["insert", "index", "centroid"]);
    }

    #[test]
    fn total_covers_the_longest_stage() {
        let mut timer = PerfTimer::new();
        timer.start("short").unwrap();
        timer.end().unwrap();
        timer.start("long").unwrap();
        thread::sleep(Duration::from_millis(20));
        let long = timer.end().unwrap();

        let total = timer.total().unwrap();
        assert_eq!(total.name, TOTAL_STAGE);
        assert!(total.duration >= long.duration);
        assert!(total.duration >= Duration::from_millis(20));
        assert_eq!(timer.stages().last().unwrap().name, TOTAL_STAGE);
    }

    #[test]
    fn total_is_callable_once() {
        let mut timer = PerfTimer::new();
        timer.start("insert").unwrap();
        assert!(matches!(timer.total(), Err(BenchError::InvalidState(_))));
        timer.end().unwrap();

        timer.total().unwrap();
        assert!(matches!(timer.total(), Err(BenchError::InvalidState(_))));
        assert!(matches!(timer.start("again"), Err(BenchError::InvalidState(_))));
    }

    #[test]
    fn counter_deltas_are_per_stage() {
        let source = Arc::new(FakeCounters::default());
        let mut timer = PerfTimer::with_counters(source.clone());

        source.reads.store(5, Ordering::Relaxed);
        timer.start("insert").unwrap();
        source.writes.fetch_add(100, Ordering::Relaxed);
        let insert = timer.end().unwrap();

        timer.start("query").unwrap();
        source.reads.fetch_add(7, Ordering::Relaxed);
        let query = timer.end().unwrap();

        assert_eq!(insert.counter("writes"), Some(100));
        assert_eq!(insert.counter("reads"), Some(0));
        assert_eq!(query.counter("reads"), Some(7));
        assert_eq!(query.counter("writes"), Some(0));
        let names: Vec<&str> = insert.counters.iter().map(|c| c.name).collect();
        assert_eq!(names, ["reads", "writes"]);

        let total = timer.total().unwrap();
        assert_eq!(total.counter("reads"), Some(7));
        assert_eq!(total.counter("writes"), Some(100));
    }
}
