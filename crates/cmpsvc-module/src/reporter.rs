//! Throughput reporting shared by the worker threads of one process
//!
//! Each worker counts comparisons locally and folds its count into the
//! shared sample every `flush_every` operations, under the sample's
//! spinlock. The clock is only read when the shared count crosses a
//! `sample_every` boundary, and a line is only emitted when at least
//! `min_interval` has passed since the previous one. The common path is
//! a local increment.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use cmpsvc_core::config::ReporterConfig;
use cmpsvc_core::error::Result;

use crate::spinlock::{SpinLock, SpinPolicy};

/// Shared running count (guarded by the reporter's lock)
#[derive(Debug)]
struct ThroughputSample {
    count: u64,
    last: Instant,
}

/// Per-worker count not yet folded into the shared sample
#[derive(Debug, Default)]
pub struct WorkerCounter {
    local: u64,
}

impl WorkerCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Comparisons counted locally since the last fold
    pub fn pending(&self) -> u64 {
        self.local
    }
}

/// One emitted throughput measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputLine {
    /// Wall-clock seconds since the Unix epoch
    pub timestamp: f64,
    /// Comparisons since the previous line
    pub count: u64,
    /// Seconds since the previous line
    pub elapsed: f64,
    /// Comparisons per second
    pub rate: f64,
}

pub struct ThroughputReporter {
    config: ReporterConfig,
    policy: SpinPolicy,
    sample: SpinLock<ThroughputSample>,
    lines: AtomicU64,
}

impl ThroughputReporter {
    pub fn new(config: ReporterConfig, policy: SpinPolicy) -> Self {
        Self {
            config,
            policy,
            sample: SpinLock::new(ThroughputSample { count: 0, last: Instant::now() }),
            lines: AtomicU64::new(0),
        }
    }

    /// Count one successful comparison
    ///
    /// Only fails with `LockStuck`.
    #[inline]
    pub fn record(&self, counter: &mut WorkerCounter) -> Result<Option<ThroughputLine>> {
        if !self.config.enabled {
            return Ok(None);
        }
        counter.local += 1;
        if counter.local < self.config.flush_every {
            return Ok(None);
        }
        self.flush(counter)
    }

    /// Fold whatever the worker has counted into the shared sample
    pub fn flush(&self, counter: &mut WorkerCounter) -> Result<Option<ThroughputLine>> {
        if !self.config.enabled || counter.local == 0 {
            return Ok(None);
        }
        let n = std::mem::take(&mut counter.local);

        let line = {
            let mut sample = self.sample.lock(&self.policy, "throughput sample")?;
            let before = sample.count;
            sample.count += n;

            let every = self.config.sample_every.max(1);
            if sample.count / every == before / every {
                return Ok(None);
            }

            let now = Instant::now();
            let elapsed = now.duration_since(sample.last);
            if elapsed < self.config.min_interval {
                return Ok(None);
            }

            let line = ThroughputLine {
                timestamp: unix_seconds(),
                count: sample.count,
                elapsed: elapsed.as_secs_f64(),
                rate: rate(sample.count, elapsed),
            };
            sample.last = now;
            sample.count = 0;
            line
        };

        self.lines.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            target: "cmpsvc::throughput",
            timestamp = line.timestamp,
            count = line.count,
            elapsed = line.elapsed,
            rate = line.rate,
            "throughput"
        );
        Ok(Some(line))
    }

    /// Lines emitted so far
    pub fn lines_emitted(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }
}

fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn config(flush: u64, sample: u64, interval: Duration) -> ReporterConfig {
        ReporterConfig { enabled: true, flush_every: flush, sample_every: sample, min_interval: interval }
    }

    #[test]
    fn test_local_batching() {
        let r = ThroughputReporter::new(config(10, 100, Duration::ZERO), SpinPolicy::default());
        let mut c = WorkerCounter::new();
        for _ in 0..9 {
            assert!(r.record(&mut c).unwrap().is_none());
        }
        assert_eq!(c.pending(), 9);
        r.record(&mut c).unwrap();
        assert_eq!(c.pending(), 0);
        assert_eq!(r.lines_emitted(), 0);
    }

    #[test]
    fn test_emits_at_sample_boundary() {
        let r = ThroughputReporter::new(config(10, 100, Duration::ZERO), SpinPolicy::default());
        let mut c = WorkerCounter::new();
        let mut lines = vec![];
        for _ in 0..250 {
            if let Some(line) = r.record(&mut c).unwrap() {
                lines.push(line);
            }
        }
        // Boundaries at 100 and 200 (count resets after each line)
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].count, 100);
        assert_eq!(r.lines_emitted(), 2);
    }

    #[test]
    fn test_min_interval_suppresses() {
        let r = ThroughputReporter::new(
            config(10, 100, Duration::from_secs(3600)),
            SpinPolicy::default(),
        );
        let mut c = WorkerCounter::new();
        for _ in 0..1000 {
            assert!(r.record(&mut c).unwrap().is_none());
        }
        assert_eq!(r.lines_emitted(), 0);
    }

    #[test]
    fn test_disabled_counts_nothing() {
        let r = ThroughputReporter::new(ReporterConfig::disabled(), SpinPolicy::default());
        let mut c = WorkerCounter::new();
        for _ in 0..50_000 {
            r.record(&mut c).unwrap();
        }
        assert_eq!(c.pending(), 0);
        assert_eq!(r.lines_emitted(), 0);
    }

    #[test]
    fn test_concurrent_workers() {
        let r = Arc::new(ThroughputReporter::new(config(10, 1000, Duration::ZERO), SpinPolicy::default()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let r = Arc::clone(&r);
                thread::spawn(move || {
                    let mut c = WorkerCounter::new();
                    for _ in 0..2500 {
                        r.record(&mut c).unwrap();
                    }
                    r.flush(&mut c).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        // 10_000 folded in multiples of 10: every 1000-boundary emits once
        assert_eq!(r.lines_emitted(), 10);
    }
}
