//! Latency collection for blueprint calls.

use serde::Serialize;

/// Collects per-call timings in microseconds.
#[derive(Debug, Clone, Default)]
pub struct LatencyStats {
    samples: Vec<u64>,
}

/// Summary of a [`LatencyStats`] run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySummary {
    /// Number of samples
    pub count: usize,
    /// Fastest call
    pub min_us: u64,
    /// Mean call time
    pub mean_us: f64,
    /// Median call time
    pub p50_us: u64,
    /// 99th percentile
    pub p99_us: u64,
    /// Slowest call
    pub max_us: u64,
}

impl LatencyStats {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a timing sample in microseconds.
    pub fn record(&mut self, us: u64) {
        self.samples.push(us);
    }

    /// Get the number of samples.
    pub fn count(&self) -> usize {
        self.samples.len()
    }

    /// Get the mean execution time in microseconds.
    pub fn mean_us(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<u64>() as f64 / self.samples.len() as f64
    }

    /// Get a percentile value.
    pub fn percentile(&self, p: usize) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let idx = (p * sorted.len() / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get min execution time.
    pub fn min_us(&self) -> u64 {
        self.samples.iter().copied().min().unwrap_or(0)
    }

    /// Get max execution time.
    pub fn max_us(&self) -> u64 {
        self.samples.iter().copied().max().unwrap_or(0)
    }

    /// Summarize the samples.
    pub fn summarize(&self) -> LatencySummary {
        LatencySummary {
            count: self.count(),
            min_us: self.min_us(),
            mean_us: self.mean_us(),
            p50_us: self.percentile(50),
            p99_us: self.percentile(99),
            max_us: self.max_us(),
        }
    }

    /// One-line summary of the results.
    pub fn summary(&self) -> String {
        let s = self.summarize();
        format!(
            "n={} min={}us mean={:.1}us p50={}us p99={}us max={}us",
            s.count, s.min_us, s.mean_us, s.p50_us, s.p99_us, s.max_us
        )
    }
}
