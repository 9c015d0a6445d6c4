use crate::barrier::CyclicBarrier;
use crate::buffer::BoundedChannel;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::item::DataItem;
use crate::metrics::{PipelineStats, RunReport, StageExit, StatsSnapshot};
use crate::once::OnceInit;
use crate::resources::{SharedResources, StageKind};
use crate::shutdown::ShutdownController;
use crate::stage::{
    DefaultFilter, Filter, Generate, LookupTransform, ProgressEvent, RandomGenerator, StageRole,
    StageRunner, Transform,
};
use crossbeam::channel::{unbounded, Receiver};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Number of stages, and therefore barrier parties
pub const STAGE_COUNT: usize = 3;

/// State shared by every stage thread of one pipeline instance
pub struct PipelineContext {
    pub(crate) config: PipelineConfig,
    pub(crate) channel_a: Arc<BoundedChannel<DataItem>>,
    pub(crate) channel_b: Arc<BoundedChannel<DataItem>>,
    pub(crate) barrier: Arc<CyclicBarrier>,
    pub(crate) shutdown: ShutdownController,
    pub(crate) stats: PipelineStats,
    resources: OnceInit<SharedResources>,
}

impl PipelineContext {
    /// Build the channels and barrier and wire them to a fresh shutdown
    /// controller.
    ///
    /// A shutdown closes channel A and breaks the barrier. Channel B is
    /// closed by the stage threads as they exit, so filter/reduce still sees
    /// everything the processor drains out of A.
    pub fn new(config: PipelineConfig) -> Self {
        let channel_a = Arc::new(BoundedChannel::new(config.capacity));
        let channel_b = Arc::new(BoundedChannel::new(config.capacity));
        let barrier = Arc::new(CyclicBarrier::new(STAGE_COUNT));

        let shutdown = ShutdownController::new();
        shutdown.register(channel_a.clone());
        shutdown.register(barrier.clone());

        Self {
            config,
            channel_a,
            channel_b,
            barrier,
            shutdown,
            stats: PipelineStats::new(),
            resources: OnceInit::new(),
        }
    }

    /// Shared resources, built by whichever stage gets here first
    pub fn resources(&self) -> &SharedResources {
        self.resources.ensure(|| SharedResources::build(&self.config))
    }

    /// Shared resources if some stage has already built them
    pub fn built_resources(&self) -> Option<&SharedResources> {
        self.resources.get()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn shutdown(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Generator → processor hand-off
    pub fn channel_a(&self) -> &BoundedChannel<DataItem> {
        &self.channel_a
    }

    /// Processor → filter/reduce hand-off
    pub fn channel_b(&self) -> &BoundedChannel<DataItem> {
        &self.channel_b
    }

    pub fn barrier(&self) -> &CyclicBarrier {
        &self.barrier
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("config", &self.config)
            .field("channel_a", &self.channel_a)
            .field("channel_b", &self.channel_b)
            .field("shutdown", &self.shutdown)
            .finish()
    }
}

/// Builder for constructing pipelines
pub struct PipelineBuilder {
    config: PipelineConfig,
    generator: Option<Box<dyn Generate>>,
    processor: Option<Box<dyn Transform>>,
    filter: Option<Box<dyn Filter>>,
}

impl PipelineBuilder {
    /// Start from [`PipelineConfig::default`] and the built-in behaviors
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            config,
            generator: None,
            processor: None,
            filter: None,
        }
    }

    /// Ticks every stage runs
    pub fn ticks(mut self, ticks: u64) -> Self {
        self.config.ticks = ticks;
        self
    }

    /// Capacity of both hand-off channels
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    pub fn channel_timeout(mut self, timeout: Duration) -> Self {
        self.config.channel_timeout = timeout;
        self
    }

    pub fn max_consecutive_timeouts(mut self, limit: u32) -> Self {
        self.config.max_consecutive_timeouts = limit;
        self
    }

    pub fn generator_pause(mut self, pause: Duration) -> Self {
        self.config.generator_pause = pause;
        self
    }

    pub fn progress_interval(mut self, interval: u64) -> Self {
        self.config.progress_interval = interval;
        self
    }

    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_path = Some(path.into());
        self
    }

    /// Do not write a per-transition log file
    pub fn without_log(mut self) -> Self {
        self.config.log_path = None;
        self
    }

    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.config.rng_seed = seed;
        self
    }

    pub fn generator(mut self, generator: impl Generate) -> Self {
        self.generator = Some(Box::new(generator));
        self
    }

    pub fn processor(mut self, transform: impl Transform) -> Self {
        self.processor = Some(Box::new(transform));
        self
    }

    pub fn filter(mut self, filter: impl Filter) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;

        let roles = vec![
            StageRole::Generator(self.generator.unwrap_or_else(|| Box::new(RandomGenerator))),
            StageRole::Processor(self.processor.unwrap_or_else(|| Box::new(LookupTransform))),
            StageRole::FilterReduce(self.filter.unwrap_or_else(|| Box::new(DefaultFilter))),
        ];

        Ok(Pipeline {
            ctx: Arc::new(PipelineContext::new(self.config)),
            roles,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured three-stage pipeline that has not started yet
pub struct Pipeline {
    ctx: Arc<PipelineContext>,
    roles: Vec<StageRole>,
}

impl Pipeline {
    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    /// Handle that can stop the pipeline from another thread
    pub fn shutdown_handle(&self) -> ShutdownController {
        self.ctx.shutdown.clone()
    }

    /// Spawn one thread per stage
    pub fn start(self) -> Result<RunningPipeline> {
        let Pipeline { ctx, roles } = self;
        ctx.stats.reset();

        tracing::info!(
            ticks = ctx.config.ticks,
            capacity = ctx.config.capacity,
            "Starting pipeline with {} stages",
            roles.len()
        );

        let (progress_tx, progress_rx) = unbounded();
        let mut running = RunningPipeline {
            ctx: Arc::clone(&ctx),
            handles: Vec::with_capacity(roles.len()),
            progress: progress_rx,
            started: Instant::now(),
        };

        for role in roles {
            let kind = role.kind();
            let runner = StageRunner::new(role, Arc::clone(&ctx), Some(progress_tx.clone()));
            let spawned = std::thread::Builder::new()
                .name(format!("stage-{}", kind.name()))
                .spawn(move || runner.run());

            match spawned {
                Ok(handle) => running.handles.push((kind, handle)),
                Err(e) => {
                    // Stages already spawned would wait on the barrier forever
                    ctx.shutdown.request_shutdown();
                    let _ = running.join_all();
                    return Err(PipelineError::ThreadError(format!(
                        "failed to spawn {kind} stage: {e}"
                    )));
                }
            }
        }

        Ok(running)
    }

    /// Start the pipeline and block until it finishes
    pub fn run(self) -> Result<RunReport> {
        self.start()?.wait()
    }
}

/// A running pipeline that can be monitored, stopped and joined
pub struct RunningPipeline {
    ctx: Arc<PipelineContext>,
    handles: Vec<(StageKind, JoinHandle<StageExit>)>,
    progress: Receiver<ProgressEvent>,
    started: Instant,
}

impl RunningPipeline {
    /// Progress events; the receiver disconnects once every stage has exited
    pub fn progress(&self) -> &Receiver<ProgressEvent> {
        &self.progress
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    pub fn shutdown_handle(&self) -> ShutdownController {
        self.ctx.shutdown.clone()
    }

    /// Ask every stage to stop; see [`ShutdownController::request_shutdown`]
    pub fn request_shutdown(&self) -> bool {
        self.ctx.shutdown.request_shutdown()
    }

    /// Current counters, for periodic reporting
    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.stats.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(|(_, handle)| handle.is_finished())
    }

    /// Wait for every stage thread and collect the run report
    pub fn wait(mut self) -> Result<RunReport> {
        let stages = self.join_all()?;

        let leftovers = self.ctx.channel_a.drain().len() + self.ctx.channel_b.drain().len();
        if leftovers > 0 {
            tracing::warn!(leftovers, "Items left in channels after shutdown");
            self.ctx.stats.record_dropped(leftovers as u64);
        }
        if let Some(resources) = self.ctx.built_resources() {
            resources.flush_log();
        }

        let stats = self.ctx.stats.snapshot();
        let shutdown_requested = self.ctx.shutdown.is_requested();
        if !shutdown_requested && !stats.is_lockstep() {
            tracing::error!(waits = ?stats.barrier_waits, "Barrier party mismatch");
            return Err(PipelineError::StageFailed {
                stage: "barrier",
                reason: format!("stages arrived unequally: {:?}", stats.barrier_waits),
            });
        }

        let report = RunReport {
            stats,
            stages,
            elapsed: self.started.elapsed(),
            shutdown_requested,
        };
        tracing::info!(
            generated = report.stats.items_generated,
            processed = report.stats.items_processed,
            filtered = report.stats.items_filtered,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Pipeline finished"
        );
        Ok(report)
    }

    /// Request shutdown, then wait
    pub fn shutdown(self) -> Result<RunReport> {
        self.request_shutdown();
        self.wait()
    }

    fn join_all(&mut self) -> Result<Vec<StageExit>> {
        let mut exits = Vec::with_capacity(self.handles.len());
        let mut panicked = Vec::new();
        for (kind, handle) in self.handles.drain(..) {
            match handle.join() {
                Ok(exit) => exits.push(exit),
                Err(_) => panicked.push(kind),
            }
        }

        if !panicked.is_empty() {
            let names: Vec<&str> = panicked.iter().map(|kind| kind.name()).collect();
            return Err(PipelineError::ThreadError(format!(
                "stage thread panicked: {}",
                names.join(", ")
            )));
        }
        Ok(exits)
    }
}

impl Drop for RunningPipeline {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.ctx.shutdown.request_shutdown();
            let _ = self.join_all();
        }
    }
}
