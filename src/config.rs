use crate::error::{PipelineError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Tick count used when none (or garbage) is given on the command line
pub const DEFAULT_TICKS: u64 = 1000;
/// Capacity of each hand-off channel
pub const DEFAULT_CAPACITY: usize = 100;
/// Size of the precomputed lookup table and upper bound of generated values
pub const DATA_RANGE: usize = 10_000;
/// Default location of the per-transition log
pub const DEFAULT_LOG_PATH: &str = "data/pipeline_log.txt";
/// Environment variable overriding [`DEFAULT_LOG_PATH`] in the binary
pub const LOG_PATH_ENV: &str = "TICK_PIPELINE_LOG";

/// Typed configuration shared by all three stages of one run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of ticks every stage executes
    pub ticks: u64,
    /// Capacity of channel A and channel B
    pub capacity: usize,
    /// Deadline for a single push or pop
    pub channel_timeout: Duration,
    /// Consecutive timeouts a stage tolerates before giving up
    pub max_consecutive_timeouts: u32,
    /// Pause after each generated item, simulating generation cost
    pub generator_pause: Duration,
    /// Publish a progress event every this many ticks (0 disables)
    pub progress_interval: u64,
    /// Per-transition log file; `None` disables it
    pub log_path: Option<PathBuf>,
    /// Seed of the shared generator
    pub rng_seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ticks: DEFAULT_TICKS,
            capacity: DEFAULT_CAPACITY,
            channel_timeout: Duration::from_millis(1000),
            max_consecutive_timeouts: 3,
            generator_pause: Duration::from_millis(1),
            progress_interval: 100,
            log_path: Some(PathBuf::from(DEFAULT_LOG_PATH)),
            rng_seed: 42,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "channel capacity must be greater than zero".into(),
            ));
        }
        if self.channel_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "channel timeout must be greater than zero".into(),
            ));
        }
        if self.max_consecutive_timeouts == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_consecutive_timeouts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Parse the tick-count argument, falling back to [`DEFAULT_TICKS`] when it
/// is missing or not a non-negative integer.
pub fn parse_ticks(arg: Option<&str>) -> u64 {
    arg.and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(DEFAULT_TICKS)
}
