//! A three-stage lockstep stream pipeline.
//!
//! A generator, a processor and a filter/reduce stage each run on their own
//! thread. They hand items to each other through two bounded channels and
//! meet at a cyclic barrier once per tick, so tick `k` work of every stage
//! finishes before any stage starts tick `k + 1`.
//!
//! # Features
//!
//! - Bounded FIFO channels with timed push/pop and distinct timeout/closed outcomes
//! - Reusable cyclic barrier that shutdown can break
//! - Exactly-once initialization of the shared lookup table, seeded generator and log sink
//! - Broadcast shutdown that releases every blocked stage
//! - Run statistics: per-stage counters, barrier waits, end-to-end latency
//!
//! # Example
//!
//! ```ignore
//! use tick_pipeline::{DataItem, MapTransform, PipelineBuilder, PredicateFilter, SequenceGenerator};
//!
//! let report = PipelineBuilder::new()
//!     .ticks(20)
//!     .capacity(4)
//!     .without_log()
//!     .generator(SequenceGenerator::starting_at(1))
//!     .processor(MapTransform::new("double", |item: &DataItem| item.raw_value() as f64 * 2.0))
//!     .filter(PredicateFilter::new("even", |item: &DataItem| item.raw_value() % 2 == 0))
//!     .build()?
//!     .run()?;
//!
//! assert_eq!(report.stats.items_filtered, 10);
//! ```

pub mod barrier;
pub mod buffer;
pub mod config;
pub mod error;
pub mod item;
pub mod metrics;
pub mod once;
pub mod pipeline;
pub mod resources;
pub mod shutdown;
pub mod stage;

// Re-exports for convenience
pub use barrier::{BarrierWaitResult, CyclicBarrier};
pub use buffer::BoundedChannel;
pub use config::{parse_ticks, PipelineConfig, DEFAULT_TICKS};
pub use error::{BarrierError, PipelineError, PopError, PushError, Result};
pub use item::DataItem;
pub use metrics::{Balance, ExitReason, PipelineStats, RunReport, StageExit, StatsSnapshot};
pub use once::{InitState, OnceInit};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineContext, RunningPipeline};
pub use resources::{SharedResources, StageKind};
pub use shutdown::{Interruptible, ShutdownController};
pub use stage::{
    DefaultFilter, Filter, Generate, LookupTransform, MapTransform, PredicateFilter,
    ProgressEvent, RandomGenerator, SequenceGenerator, StageRole, StageRunner, Transform,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
