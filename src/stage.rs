use crate::buffer::BoundedChannel;
use crate::config::DATA_RANGE;
use crate::error::{PopError, PushError};
use crate::item::DataItem;
use crate::metrics::{ExitReason, StageExit};
use crate::pipeline::PipelineContext;
use crate::resources::{SharedResources, StageKind};
use crate::shutdown::ShutdownOnPanic;
use crossbeam::channel::Sender;
use std::hint::black_box;
use std::sync::Arc;

/// Produces the raw payload of each new item
pub trait Generate: Send + 'static {
    fn generate(&mut self, id: u64, resources: &SharedResources) -> i64;

    fn name(&self) -> &str {
        "generator"
    }
}

/// Computes the processed value of an item
pub trait Transform: Send + 'static {
    fn transform(&mut self, item: &DataItem, resources: &SharedResources) -> f64;

    fn name(&self) -> &str {
        "transform"
    }
}

/// Decides whether a processed item is folded into the result
pub trait Filter: Send + 'static {
    fn accept(&mut self, item: &DataItem) -> bool;

    fn name(&self) -> &str {
        "filter"
    }
}

/// Uniform values in `1..=DATA_RANGE` drawn from the shared seeded generator
#[derive(Debug, Default)]
pub struct RandomGenerator;

impl Generate for RandomGenerator {
    fn generate(&mut self, _id: u64, resources: &SharedResources) -> i64 {
        resources.next_random(1, DATA_RANGE as i64)
    }

    fn name(&self) -> &str {
        "random"
    }
}

/// `start, start + 1, start + 2, ...`
#[derive(Debug)]
pub struct SequenceGenerator {
    next: i64,
}

impl SequenceGenerator {
    pub fn starting_at(start: i64) -> Self {
        Self { next: start }
    }
}

impl Generate for SequenceGenerator {
    fn generate(&mut self, _id: u64, _resources: &SharedResources) -> i64 {
        let value = self.next;
        self.next += 1;
        value
    }

    fn name(&self) -> &str {
        "sequence"
    }
}

/// Table-driven transform with a fixed amount of extra arithmetic per item
#[derive(Debug, Default)]
pub struct LookupTransform;

/// Iterations of the simulated per-item cost
const COST_ITERATIONS: u32 = 1000;

impl Transform for LookupTransform {
    fn transform(&mut self, item: &DataItem, resources: &SharedResources) -> f64 {
        let raw = item.raw_value() as f64;
        let base = resources.lookup(item.raw_value());

        let mut value = base * (raw + 1.0).ln();
        value += (raw * 0.01).sin() * (item.id() as f64 * 0.02).cos();
        value = value.abs();

        let mut cost = 0.0;
        for i in 0..COST_ITERATIONS {
            cost += black_box(f64::from(i) + raw).sqrt();
        }
        value + cost * 1e-6
    }

    fn name(&self) -> &str {
        "lookup"
    }
}

/// A transform backed by a closure
pub struct MapTransform<F>
where
    F: FnMut(&DataItem) -> f64 + Send + 'static,
{
    name: String,
    mapper: F,
}

impl<F> MapTransform<F>
where
    F: FnMut(&DataItem) -> f64 + Send + 'static,
{
    pub fn new(name: impl Into<String>, mapper: F) -> Self {
        Self {
            name: name.into(),
            mapper,
        }
    }
}

impl<F> Transform for MapTransform<F>
where
    F: FnMut(&DataItem) -> f64 + Send + 'static,
{
    fn transform(&mut self, item: &DataItem, _resources: &SharedResources) -> f64 {
        (self.mapper)(item)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Accepts items whose processed value lies in `(0.1, 100.0)`, whose id is
/// not a multiple of 13, and whose raw value is a multiple of 3 or 7.
#[derive(Debug, Default)]
pub struct DefaultFilter;

impl Filter for DefaultFilter {
    fn accept(&mut self, item: &DataItem) -> bool {
        let Some(value) = item.processed_value() else {
            return false;
        };
        let raw = item.raw_value();
        value > 0.1 && value < 100.0 && item.id() % 13 != 0 && (raw % 3 == 0 || raw % 7 == 0)
    }

    fn name(&self) -> &str {
        "default"
    }
}

/// A filter backed by a closure
pub struct PredicateFilter<F>
where
    F: FnMut(&DataItem) -> bool + Send + 'static,
{
    name: String,
    predicate: F,
}

impl<F> PredicateFilter<F>
where
    F: FnMut(&DataItem) -> bool + Send + 'static,
{
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> Filter for PredicateFilter<F>
where
    F: FnMut(&DataItem) -> bool + Send + 'static,
{
    fn accept(&mut self, item: &DataItem) -> bool {
        (self.predicate)(item)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// The behavior a stage thread runs, tagged by position in the pipeline
pub enum StageRole {
    Generator(Box<dyn Generate>),
    Processor(Box<dyn Transform>),
    FilterReduce(Box<dyn Filter>),
}

impl StageRole {
    pub fn kind(&self) -> StageKind {
        match self {
            StageRole::Generator(_) => StageKind::Generator,
            StageRole::Processor(_) => StageKind::Processor,
            StageRole::FilterReduce(_) => StageKind::FilterReduce,
        }
    }

    pub fn behavior_name(&self) -> &str {
        match self {
            StageRole::Generator(g) => g.name(),
            StageRole::Processor(t) => t.name(),
            StageRole::FilterReduce(f) => f.name(),
        }
    }
}

impl std::fmt::Debug for StageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StageRole")
            .field(&self.kind())
            .field(&self.behavior_name())
            .finish()
    }
}

/// Lifecycle of a stage thread, traced on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StageState {
    NotStarted,
    Running,
    Draining,
    Stopped,
}

/// Periodic progress published by a stage
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub stage: StageKind,
    /// Ticks completed so far
    pub tick: u64,
    /// Items this stage has handled
    pub handled: u64,
    /// Filter/reduce only: accepted items and running sum
    pub valid: Option<(u64, f64)>,
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] tick {}: {} items", self.stage, self.tick, self.handled)?;
        if let Some((valid, sum)) = self.valid {
            let pct = if self.handled == 0 {
                0.0
            } else {
                100.0 * valid as f64 / self.handled as f64
            };
            write!(f, ", {valid} valid ({pct:.1}%), sum={sum:.2}")?;
        }
        Ok(())
    }
}

/// Runs one stage: Fetch, Compute, Emit and BarrierWait once per tick
pub struct StageRunner {
    role: StageRole,
    ctx: Arc<PipelineContext>,
    progress: Option<Sender<ProgressEvent>>,
    state: StageState,
    handled: u64,
    valid: u64,
    accumulated: f64,
}

impl StageRunner {
    pub fn new(
        role: StageRole,
        ctx: Arc<PipelineContext>,
        progress: Option<Sender<ProgressEvent>>,
    ) -> Self {
        Self {
            role,
            ctx,
            progress,
            state: StageState::NotStarted,
            handled: 0,
            valid: 0,
            accumulated: 0.0,
        }
    }

    pub fn kind(&self) -> StageKind {
        self.role.kind()
    }

    /// Run the stage until its ticks are exhausted or the pipeline shuts down
    pub fn run(mut self) -> StageExit {
        let kind = self.kind();
        let ctx = Arc::clone(&self.ctx);
        let _guard = ShutdownOnPanic::new(&ctx.shutdown, kind.name());
        // Channel B is not closed by the shutdown but when either of its ends
        // exits; filter/reduce drains it until the processor is gone
        let _close = CloseOnExit(match kind {
            StageKind::Generator => None,
            StageKind::Processor | StageKind::FilterReduce => Some(&*ctx.channel_b),
        });

        self.transition(StageState::Running);
        let resources = ctx.resources();

        let mut ticks_completed = 0;
        let mut reason = ExitReason::Completed;
        while ticks_completed < ctx.config.ticks {
            if let Err(stop) = self.tick(ticks_completed, resources) {
                reason = stop;
                break;
            }
            ticks_completed += 1;
            self.report_progress(ticks_completed);
        }

        if reason != ExitReason::Completed {
            // Leaving early: release the siblings before anything else
            ctx.shutdown.request_shutdown();
            self.transition(StageState::Draining);
            self.drain(resources);
        }

        if kind == StageKind::FilterReduce {
            ctx.stats.set_accumulated(self.accumulated);
        }
        self.transition(StageState::Stopped);
        tracing::info!(
            stage = %kind,
            behavior = self.role.behavior_name(),
            ticks = ticks_completed,
            handled = self.handled,
            ?reason,
            "Stage finished"
        );

        StageExit {
            stage: kind,
            reason,
            ticks_completed,
        }
    }

    fn tick(&mut self, tick: u64, resources: &SharedResources) -> Result<(), ExitReason> {
        let ctx = &*self.ctx;
        match &mut self.role {
            StageRole::Generator(generator) => {
                if ctx.shutdown.is_requested() {
                    return Err(ExitReason::Shutdown);
                }
                let item = DataItem::new(tick, generator.generate(tick, resources));
                let (id, raw) = (item.id(), item.raw_value());
                emit(ctx, &ctx.channel_a, item, StageKind::Generator)?;
                resources.log(StageKind::Generator, id, raw);
                ctx.stats.record_generated();
                self.handled += 1;
            }
            StageRole::Processor(transform) => {
                let mut item = fetch(ctx, &ctx.channel_a, StageKind::Processor)?;
                item.set_processed(transform.transform(&item, resources));
                let (id, value) = (item.id(), item.processed_value().unwrap_or_default());
                emit(ctx, &ctx.channel_b, item, StageKind::Processor)?;
                resources.log(StageKind::Processor, id, value);
                ctx.stats.record_processed();
                self.handled += 1;
            }
            StageRole::FilterReduce(filter) => {
                let item = fetch(ctx, &ctx.channel_b, StageKind::FilterReduce)?;
                self.handled += 1;
                if reduce(ctx, filter.as_mut(), item, resources, &mut self.accumulated) {
                    self.valid += 1;
                }
            }
        }

        let kind = self.role.kind();
        ctx.stats.record_barrier_wait(kind);
        if ctx.barrier.wait().is_err() {
            tracing::debug!(stage = %kind, tick, "Barrier broken");
            return Err(ExitReason::Shutdown);
        }

        if kind == StageKind::Generator && !ctx.config.generator_pause.is_zero() {
            std::thread::sleep(ctx.config.generator_pause);
        }
        Ok(())
    }

    /// After shutdown: consume what is already queued inbound, without the
    /// barrier, until the inbound channel reports closed. Channel A is
    /// closed by the shutdown itself; channel B only once the processor has
    /// finished draining A.
    fn drain(&mut self, resources: &SharedResources) {
        let ctx = &*self.ctx;
        let channel = match self.role {
            StageRole::Generator(_) => return,
            StageRole::Processor(_) => &ctx.channel_a,
            StageRole::FilterReduce(_) => &ctx.channel_b,
        };
        loop {
            let item = match channel.pop(ctx.config.channel_timeout) {
                Ok(item) => item,
                Err(PopError::Closed) => break,
                Err(PopError::Timeout) => {
                    tracing::trace!(stage = %self.kind(), "Waiting for upstream to finish");
                    continue;
                }
            };
            match &mut self.role {
                StageRole::Generator(_) => {}
                StageRole::Processor(transform) => {
                    let mut item = item;
                    item.set_processed(transform.transform(&item, resources));
                    let (id, value) = (item.id(), item.processed_value().unwrap_or_default());
                    if emit(ctx, &ctx.channel_b, item, StageKind::Processor).is_err() {
                        // Whatever is left in A is counted as dropped at join
                        break;
                    }
                    resources.log(StageKind::Processor, id, value);
                    ctx.stats.record_processed();
                    self.handled += 1;
                }
                StageRole::FilterReduce(filter) => {
                    self.handled += 1;
                    if reduce(ctx, filter.as_mut(), item, resources, &mut self.accumulated) {
                        self.valid += 1;
                    }
                }
            }
        }
    }

    fn report_progress(&self, tick: u64) {
        let interval = self.ctx.config.progress_interval;
        if interval == 0 || tick % interval != 0 {
            return;
        }
        let event = ProgressEvent {
            stage: self.kind(),
            tick,
            handled: self.handled,
            valid: (self.kind() == StageKind::FilterReduce).then_some((self.valid, self.accumulated)),
        };
        tracing::debug!("{}", event);
        if let Some(tx) = &self.progress {
            // Nobody listening is fine
            let _ = tx.send(event);
        }
    }

    fn transition(&mut self, next: StageState) {
        tracing::trace!(stage = %self.kind(), from = ?self.state, to = ?next, "Stage transition");
        self.state = next;
    }
}

/// Closes a channel when the stage exits, unwinding included
struct CloseOnExit<'a>(Option<&'a BoundedChannel<DataItem>>);

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        if let Some(channel) = self.0 {
            channel.close();
        }
    }
}

/// Pop from `channel`, retrying soft timeouts up to the configured limit
fn fetch(
    ctx: &PipelineContext,
    channel: &BoundedChannel<DataItem>,
    stage: StageKind,
) -> Result<DataItem, ExitReason> {
    let mut timeouts = 0;
    loop {
        match channel.pop(ctx.config.channel_timeout) {
            Ok(item) => return Ok(item),
            Err(PopError::Closed) => return Err(ExitReason::Shutdown),
            Err(PopError::Timeout) => {
                ctx.stats.record_timeout();
                timeouts += 1;
                if timeouts >= ctx.config.max_consecutive_timeouts {
                    tracing::warn!(stage = %stage, timeouts, "Giving up waiting for input");
                    return Err(ExitReason::TimedOut);
                }
                tracing::warn!(stage = %stage, timeouts, "Timed out waiting for input, retrying");
            }
        }
    }
}

/// Push to `channel`, retrying soft timeouts. An item that cannot be
/// delivered is counted as dropped, except a freshly generated one turned
/// away by shutdown, which never entered the pipeline.
fn emit(
    ctx: &PipelineContext,
    channel: &BoundedChannel<DataItem>,
    mut item: DataItem,
    stage: StageKind,
) -> Result<(), ExitReason> {
    let mut timeouts = 0;
    loop {
        match channel.push(item, ctx.config.channel_timeout) {
            Ok(()) => return Ok(()),
            Err(PushError::Closed(rejected)) => {
                tracing::debug!(stage = %stage, id = rejected.id(), "Item rejected by closed channel");
                if stage != StageKind::Generator {
                    ctx.stats.record_dropped(1);
                }
                return Err(ExitReason::Shutdown);
            }
            Err(PushError::Timeout(returned)) => {
                ctx.stats.record_timeout();
                timeouts += 1;
                if timeouts >= ctx.config.max_consecutive_timeouts {
                    tracing::warn!(stage = %stage, id = returned.id(), timeouts, "Giving up sending item");
                    ctx.stats.record_dropped(1);
                    return Err(ExitReason::TimedOut);
                }
                tracing::warn!(stage = %stage, id = returned.id(), timeouts, "Timed out sending item, retrying");
                item = returned;
            }
        }
    }
}

/// Evaluate an item in filter/reduce; returns whether it was accepted
fn reduce(
    ctx: &PipelineContext,
    filter: &mut dyn Filter,
    mut item: DataItem,
    resources: &SharedResources,
    accumulated: &mut f64,
) -> bool {
    ctx.stats.record_evaluated();
    let passes = filter.accept(&item);
    item.set_valid(passes);
    if !passes {
        return false;
    }

    let value = item.processed_value().unwrap_or_default();
    *accumulated += value;
    ctx.stats.record_filtered(item.age_ms());
    resources.log(StageKind::FilterReduce, item.id(), value);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    fn resources() -> SharedResources {
        SharedResources::build(&PipelineConfig {
            log_path: None,
            ..PipelineConfig::default()
        })
    }

    #[test]
    fn test_sequence_generator() {
        let resources = resources();
        let mut generator = SequenceGenerator::starting_at(1);
        let values: Vec<i64> = (0..3).map(|id| generator.generate(id, &resources)).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_random_generator_in_range() {
        let resources = resources();
        let mut generator = RandomGenerator;
        for id in 0..100 {
            let value = generator.generate(id, &resources);
            assert!((1..=DATA_RANGE as i64).contains(&value));
        }
    }

    #[test]
    fn test_lookup_transform_is_deterministic_and_positive() {
        let resources = resources();
        let mut transform = LookupTransform;
        let item = DataItem::new(4, 21);
        let a = transform.transform(&item, &resources);
        let b = transform.transform(&item, &resources);
        assert_eq!(a, b);
        assert!(a > 0.0);
        // ln(22) plus a small trigonometric term, plus the simulated cost
        assert!((a - 22f64.ln()).abs() < 1.1);
    }

    #[test]
    fn test_map_transform() {
        let resources = resources();
        let mut transform = MapTransform::new("double", |item: &DataItem| item.raw_value() as f64 * 2.0);
        assert_eq!(transform.transform(&DataItem::new(0, 5), &resources), 10.0);
        assert_eq!(transform.name(), "double");
    }

    #[test]
    fn test_default_filter_criteria() {
        let mut filter = DefaultFilter;

        let mut accepted = DataItem::new(1, 21);
        accepted.set_processed(5.0);
        assert!(filter.accept(&accepted));

        let mut bad_id = DataItem::new(26, 21);
        bad_id.set_processed(5.0);
        assert!(!filter.accept(&bad_id));

        let mut bad_raw = DataItem::new(1, 11);
        bad_raw.set_processed(5.0);
        assert!(!filter.accept(&bad_raw));

        let mut out_of_range = DataItem::new(1, 21);
        out_of_range.set_processed(150.0);
        assert!(!filter.accept(&out_of_range));

        assert!(!filter.accept(&DataItem::new(1, 21)));
    }

    #[test]
    fn test_predicate_filter() {
        let mut filter = PredicateFilter::new("even", |item: &DataItem| item.raw_value() % 2 == 0);
        assert!(filter.accept(&DataItem::new(0, 4)));
        assert!(!filter.accept(&DataItem::new(0, 5)));
    }

    #[test]
    fn test_role_kind() {
        let role = StageRole::Processor(Box::new(LookupTransform));
        assert_eq!(role.kind(), StageKind::Processor);
        assert_eq!(role.behavior_name(), "lookup");
    }

    #[test]
    fn test_progress_event_display() {
        let event = ProgressEvent {
            stage: StageKind::FilterReduce,
            tick: 100,
            handled: 100,
            valid: Some((25, 12.5)),
        };
        assert_eq!(
            event.to_string(),
            "[filter_reduce] tick 100: 100 items, 25 valid (25.0%), sum=12.50"
        );
    }
}
