//! Resources built once per run and shared read-only by every stage.

use crate::config::{PipelineConfig, DATA_RANGE};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Which stage wrote a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Generator,
    Processor,
    FilterReduce,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [
        StageKind::Generator,
        StageKind::Processor,
        StageKind::FilterReduce,
    ];

    /// Tag used in the log file
    pub fn tag(self) -> &'static str {
        match self {
            StageKind::Generator => "Stage1",
            StageKind::Processor => "Stage2",
            StageKind::FilterReduce => "Stage3",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StageKind::Generator => "generator",
            StageKind::Processor => "processor",
            StageKind::FilterReduce => "filter_reduce",
        }
    }

    /// Position in per-stage arrays
    pub fn index(self) -> usize {
        match self {
            StageKind::Generator => 0,
            StageKind::Processor => 1,
            StageKind::FilterReduce => 2,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Milliseconds since the unix epoch
pub fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Append-style comma separated log of stage transitions
pub struct LogSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl LogSink {
    /// Create (truncating) the log file and write its header
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        writeln!(writer, "Pipeline Log - Timestamp: {started}")?;
        writeln!(writer, "Stage,ItemID,Value,Timestamp")?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one `tag,id,value,millis` line
    pub fn record(&self, stage: StageKind, id: u64, value: impl std::fmt::Display) {
        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(writer, "{},{},{},{}", stage.tag(), id, value, now_millis()) {
            tracing::warn!(path = %self.path.display(), "Failed to write pipeline log: {}", e);
        }
    }

    pub fn flush(&self) -> io::Result<()> {
        self.writer.lock().flush()
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink").field("path", &self.path).finish()
    }
}

/// Everything the stages share after one-time setup
#[derive(Debug)]
pub struct SharedResources {
    lookup_table: Vec<f64>,
    rng: Mutex<StdRng>,
    log_sink: Option<LogSink>,
}

impl SharedResources {
    /// Build the lookup table, seed the generator and open the log sink.
    ///
    /// A log file that cannot be opened is reported and skipped; the run
    /// continues without it.
    pub fn build(config: &PipelineConfig) -> Self {
        tracing::info!("Initializing shared pipeline resources");

        let log_sink = config.log_path.as_deref().and_then(|path| match LogSink::open(path) {
            Ok(sink) => {
                tracing::info!(path = %path.display(), "Pipeline log opened");
                Some(sink)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "Could not open pipeline log: {}", e);
                None
            }
        });

        let lookup_table = build_lookup_table(DATA_RANGE);
        tracing::debug!(entries = lookup_table.len(), seed = config.rng_seed, "Lookup table and generator ready");

        Self {
            lookup_table,
            rng: Mutex::new(StdRng::seed_from_u64(config.rng_seed)),
            log_sink,
        }
    }

    /// Table entry for `raw`, wrapping modulo the table size
    pub fn lookup(&self, raw: i64) -> f64 {
        let idx = raw.rem_euclid(self.lookup_table.len() as i64) as usize;
        self.lookup_table[idx]
    }

    pub fn lookup_table(&self) -> &[f64] {
        &self.lookup_table
    }

    /// Next value of the shared deterministic sequence, uniform in `low..=high`
    pub fn next_random(&self, low: i64, high: i64) -> i64 {
        self.rng.lock().random_range(low..=high)
    }

    pub fn log_sink(&self) -> Option<&LogSink> {
        self.log_sink.as_ref()
    }

    /// Record a stage transition if logging is enabled
    pub fn log(&self, stage: StageKind, id: u64, value: impl std::fmt::Display) {
        if let Some(sink) = &self.log_sink {
            sink.record(stage, id, value);
        }
    }

    pub fn flush_log(&self) {
        if let Some(sink) = &self.log_sink {
            if let Err(e) = sink.flush() {
                tracing::warn!(path = %sink.path().display(), "Failed to flush pipeline log: {}", e);
            }
        }
    }
}

/// `sqrt(sin(x)^2 + cos(x)^2)` at `x = i * 0.001`; always ~1.0, computed
/// the long way to give the table a real build cost.
fn build_lookup_table(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| {
            let x = i as f64 * 0.001;
            (x.sin() * x.sin() + x.cos() * x.cos()).sqrt()
        })
        .collect()
}
