//! Statistics tracking for the accelerator pipeline
//!
//! This module provides counters for monitoring item flow, in-flight depth
//! and per-phase latency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Statistics for a single pipeline phase
#[derive(Debug, Default)]
pub struct StageStats {
    /// Total items processed
    items_processed: AtomicU64,
    /// Total bytes processed
    bytes_processed: AtomicU64,
    /// Sum of latencies in microseconds (for averaging)
    total_latency_us: AtomicU64,
    /// Maximum latency observed in microseconds
    max_latency_us: AtomicU64,
    /// Minimum latency observed in microseconds
    min_latency_us: AtomicU64,
}

impl StageStats {
    /// Create new stage statistics
    pub fn new() -> Self {
        Self {
            min_latency_us: AtomicU64::new(u64::MAX),
            ..Default::default()
        }
    }

    /// Record one processed item
    pub fn record(&self, bytes: usize, latency: Duration) {
        let latency_us = latency.as_micros() as u64;

        self.items_processed.fetch_add(1, Ordering::Relaxed);
        self.bytes_processed.fetch_add(bytes as u64, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.max_latency_us.fetch_max(latency_us, Ordering::Relaxed);
        self.min_latency_us.fetch_min(latency_us, Ordering::Relaxed);
    }

    /// Get number of items processed
    pub fn items(&self) -> u64 {
        self.items_processed.load(Ordering::Relaxed)
    }

    /// Get bytes processed
    pub fn bytes(&self) -> u64 {
        self.bytes_processed.load(Ordering::Relaxed)
    }

    /// Get average latency
    pub fn avg_latency(&self) -> Duration {
        let items = self.items();
        if items == 0 {
            return Duration::ZERO;
        }
        let total_us = self.total_latency_us.load(Ordering::Relaxed);
        Duration::from_micros(total_us / items)
    }

    /// Get maximum latency
    pub fn max_latency(&self) -> Duration {
        Duration::from_micros(self.max_latency_us.load(Ordering::Relaxed))
    }

    /// Get minimum latency
    pub fn min_latency(&self) -> Duration {
        let min = self.min_latency_us.load(Ordering::Relaxed);
        if min == u64::MAX {
            Duration::ZERO
        } else {
            Duration::from_micros(min)
        }
    }
}

/// Aggregated pipeline statistics
#[derive(Debug)]
pub struct PipelineStats {
    /// Start time of the pipeline
    start_time: Instant,
    /// Host-side submission (prepare, bind, enqueue)
    pub submit: StageStats,
    /// Submission to emission or failure
    pub complete: StageStats,
    submitted: AtomicU64,
    emitted: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStats {
    /// Create new pipeline statistics
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            submit: StageStats::new(),
            complete: StageStats::new(),
            submitted: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            peak_in_flight: AtomicU64::new(0),
        }
    }

    /// Record an item entering the pipeline
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        let depth = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(depth, Ordering::Relaxed);
    }

    /// Record an item that was emitted and acked
    pub fn record_emitted(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an item that was failed
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get elapsed time since pipeline start
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Items submitted
    pub fn submitted_count(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Items emitted, each acked right after
    pub fn emitted_count(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Items failed
    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Items submitted but not yet emitted or failed
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Largest in-flight count observed
    pub fn peak_in_flight(&self) -> u64 {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    /// Get throughput in items per second
    pub fn throughput_ips(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        (self.emitted_count() + self.failed_count()) as f64 / elapsed
    }

    /// Generate a summary report
    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            elapsed: self.elapsed(),
            submitted: self.submitted_count(),
            emitted: self.emitted_count(),
            failed: self.failed_count(),
            peak_in_flight: self.peak_in_flight(),
            throughput_ips: self.throughput_ips(),
            submit_avg_latency: self.submit.avg_latency(),
            complete_avg_latency: self.complete.avg_latency(),
            complete_max_latency: self.complete.max_latency(),
        }
    }
}

/// Summary of pipeline statistics
#[derive(Debug, Clone)]
pub struct StatsSummary {
    /// Total elapsed time
    pub elapsed: Duration,
    /// Items submitted
    pub submitted: u64,
    /// Items emitted
    pub emitted: u64,
    /// Items failed
    pub failed: u64,
    /// Largest in-flight count
    pub peak_in_flight: u64,
    /// Finished items per second
    pub throughput_ips: f64,
    /// Average submission latency
    pub submit_avg_latency: Duration,
    /// Average submission-to-emission latency
    pub complete_avg_latency: Duration,
    /// Worst submission-to-emission latency
    pub complete_max_latency: Duration,
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Pipeline Statistics:")?;
        writeln!(f, "  Elapsed: {:?}", self.elapsed)?;
        writeln!(f, "  Items: {} submitted, {} emitted, {} failed",
                 self.submitted, self.emitted, self.failed)?;
        writeln!(f, "  Throughput: {:.1} items/s", self.throughput_ips)?;
        writeln!(f, "  Peak in flight: {}", self.peak_in_flight)?;
        writeln!(f, "  Latency:")?;
        writeln!(f, "    Submit (avg):   {:?}", self.submit_avg_latency)?;
        writeln!(f, "    Complete (avg): {:?}", self.complete_avg_latency)?;
        writeln!(f, "    Complete (max): {:?}", self.complete_max_latency)?;
        Ok(())
    }
}

/// Shared statistics handle for use across threads
pub type SharedStats = Arc<PipelineStats>;
