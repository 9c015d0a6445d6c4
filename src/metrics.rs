use crate::resources::StageKind;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// Sliding window of latency samples (milliseconds) for percentiles
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    samples: VecDeque<f64>,
    window_size: usize,
}

impl PercentileTracker {
    pub fn new(window_size: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    pub fn record(&mut self, value: f64) {
        if self.samples.len() >= self.window_size {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Nearest-rank percentile, `p` in `0.0..=1.0`
    pub fn percentile(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_unstable_by(f64::total_cmp);
        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx.min(sorted.len() - 1)]
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[derive(Debug, Clone)]
struct StatsInner {
    generated: u64,
    processed: u64,
    evaluated: u64,
    filtered: u64,
    dropped: u64,
    timeouts: u64,
    barrier_waits: [u64; 3],
    total_latency_ms: f64,
    accumulated: f64,
    latency: PercentileTracker,
}

impl StatsInner {
    fn new() -> Self {
        Self {
            generated: 0,
            processed: 0,
            evaluated: 0,
            filtered: 0,
            dropped: 0,
            timeouts: 0,
            barrier_waits: [0; 3],
            total_latency_ms: 0.0,
            accumulated: 0.0,
            latency: PercentileTracker::new(1000),
        }
    }
}

/// Run-wide counters, all mutated under one short-lived lock
#[derive(Debug)]
pub struct PipelineStats {
    inner: Mutex<StatsInner>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatsInner::new()),
        }
    }

    /// Zero every counter, at the start of a run
    pub fn reset(&self) {
        *self.inner.lock() = StatsInner::new();
    }

    pub fn record_generated(&self) {
        self.inner.lock().generated += 1;
    }

    pub fn record_processed(&self) {
        self.inner.lock().processed += 1;
    }

    /// An item reached FilterReduce, whether or not it passed
    pub fn record_evaluated(&self) {
        self.inner.lock().evaluated += 1;
    }

    /// An item passed the filter; `latency_ms` is its end-to-end latency
    pub fn record_filtered(&self, latency_ms: f64) {
        let mut inner = self.inner.lock();
        inner.filtered += 1;
        inner.total_latency_ms += latency_ms;
        inner.latency.record(latency_ms);
    }

    pub fn record_dropped(&self, count: u64) {
        self.inner.lock().dropped += count;
    }

    pub fn record_timeout(&self) {
        self.inner.lock().timeouts += 1;
    }

    pub fn record_barrier_wait(&self, stage: StageKind) {
        self.inner.lock().barrier_waits[stage.index()] += 1;
    }

    /// Publish the FilterReduce running accumulator
    pub fn set_accumulated(&self, value: f64) {
        self.inner.lock().accumulated = value;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock();
        StatsSnapshot {
            items_generated: inner.generated,
            items_processed: inner.processed,
            items_evaluated: inner.evaluated,
            items_filtered: inner.filtered,
            items_dropped: inner.dropped,
            timeouts: inner.timeouts,
            barrier_waits: inner.barrier_waits,
            total_latency_ms: inner.total_latency_ms,
            latency_p50_ms: inner.latency.percentile(0.50),
            latency_p99_ms: inner.latency.percentile(0.99),
            accumulated: inner.accumulated,
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// A copy of the counters at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub items_generated: u64,
    pub items_processed: u64,
    pub items_evaluated: u64,
    pub items_filtered: u64,
    pub items_dropped: u64,
    pub timeouts: u64,
    /// Indexed by [`StageKind::index`]
    pub barrier_waits: [u64; 3],
    pub total_latency_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
    pub accumulated: f64,
}

impl StatsSnapshot {
    pub fn barrier_waits_for(&self, stage: StageKind) -> u64 {
        self.barrier_waits[stage.index()]
    }

    pub fn total_barrier_waits(&self) -> u64 {
        self.barrier_waits.iter().sum()
    }

    /// Barrier waits per stage
    pub fn avg_barrier_waits(&self) -> f64 {
        self.total_barrier_waits() as f64 / self.barrier_waits.len() as f64
    }

    /// Share of generated items that passed the filter, in percent
    pub fn filtered_pct(&self) -> f64 {
        if self.items_generated == 0 {
            0.0
        } else {
            100.0 * self.items_filtered as f64 / self.items_generated as f64
        }
    }

    /// Mean end-to-end latency of accepted items
    pub fn avg_latency_ms(&self) -> f64 {
        if self.items_filtered == 0 {
            0.0
        } else {
            self.total_latency_ms / self.items_filtered as f64
        }
    }

    /// True when every stage hit the barrier the same number of times
    pub fn is_lockstep(&self) -> bool {
        self.barrier_waits.windows(2).all(|w| w[0] == w[1])
    }

    /// Which stage, if any, let a backlog build up in front of the next one
    pub fn balance(&self) -> Balance {
        if self.items_generated > self.items_processed + BALANCE_SLACK {
            Balance::ProcessorBottleneck
        } else if self.items_processed > self.items_evaluated + BALANCE_SLACK {
            Balance::FilterBottleneck
        } else {
            Balance::Balanced
        }
    }
}

const BALANCE_SLACK: u64 = 50;

/// Verdict of [`StatsSnapshot::balance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Balance {
    Balanced,
    ProcessorBottleneck,
    FilterBottleneck,
}

impl std::fmt::Display for Balance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Balance::Balanced => f.write_str("pipeline balanced"),
            Balance::ProcessorBottleneck => f.write_str("processor stage is the bottleneck"),
            Balance::FilterBottleneck => f.write_str("filter stage is the bottleneck"),
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== PIPELINE STATISTICS ===")?;
        writeln!(f, "Items generated:    {}", self.items_generated)?;
        writeln!(f, "Items processed:    {}", self.items_processed)?;
        writeln!(
            f,
            "Items filtered:     {} ({:.1}%)",
            self.items_filtered,
            self.filtered_pct()
        )?;
        writeln!(f, "Items dropped:      {}", self.items_dropped)?;
        writeln!(f, "Channel timeouts:   {}", self.timeouts)?;
        writeln!(f, "Avg barrier waits:  {:.1}", self.avg_barrier_waits())?;
        writeln!(f, "Avg latency:        {:.2} ms", self.avg_latency_ms())?;
        writeln!(
            f,
            "Latency P50/P99:    {:.2} / {:.2} ms",
            self.latency_p50_ms, self.latency_p99_ms
        )?;
        write!(f, "Accumulated result: {:.6}", self.accumulated)
    }
}

/// How one stage thread finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Ran every configured tick
    Completed,
    /// Observed a shutdown (closed channel, broken barrier or the flag)
    Shutdown,
    /// Gave up after too many consecutive channel timeouts
    TimedOut,
}

/// Per-stage outcome collected at join time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageExit {
    pub stage: StageKind,
    pub reason: ExitReason,
    pub ticks_completed: u64,
}

/// Everything reported once all stage threads have joined
#[derive(Debug, Clone)]
pub struct RunReport {
    pub stats: StatsSnapshot,
    pub stages: Vec<StageExit>,
    pub elapsed: Duration,
    pub shutdown_requested: bool,
}

impl RunReport {
    /// Generated items per second of wall time
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.stats.items_generated as f64 / secs
        }
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageExit> {
        self.stages.iter().find(|exit| exit.stage == kind)
    }

    /// Every stage ran all of its ticks
    pub fn completed(&self) -> bool {
        self.stages
            .iter()
            .all(|exit| exit.reason == ExitReason::Completed)
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Total time:         {:.3} s", self.elapsed.as_secs_f64())?;
        writeln!(f, "Throughput:         {:.2} items/s", self.throughput())?;
        for exit in &self.stages {
            writeln!(
                f,
                "  {:<14} {:?} after {} ticks",
                exit.stage.name(),
                exit.reason,
                exit.ticks_completed
            )?;
        }
        writeln!(f, "{}", self.stats)?;
        write!(f, "Balance:            {}", self.stats.balance())
    }
}
