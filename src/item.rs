use std::time::{Duration, Instant};

/// One unit of work flowing through the pipeline.
///
/// Items are moved, never shared: exactly one stage owns an item at a time.
/// The processed value is written once by the processor and the verdict
/// once by filter/reduce.
#[derive(Debug)]
pub struct DataItem {
    id: u64,
    raw_value: i64,
    processed_value: Option<f64>,
    valid: Option<bool>,
    created_at: Instant,
}

impl DataItem {
    pub fn new(id: u64, raw_value: i64) -> Self {
        Self {
            id,
            raw_value,
            processed_value: None,
            valid: None,
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn raw_value(&self) -> i64 {
        self.raw_value
    }

    /// `None` until the processor has run
    pub fn processed_value(&self) -> Option<f64> {
        self.processed_value
    }

    /// `None` until filter/reduce has evaluated the item
    pub fn verdict(&self) -> Option<bool> {
        self.valid
    }

    pub fn is_valid(&self) -> bool {
        self.valid.unwrap_or(false)
    }

    pub(crate) fn set_processed(&mut self, value: f64) {
        debug_assert!(self.processed_value.is_none(), "item {} processed twice", self.id);
        self.processed_value = Some(value);
    }

    pub(crate) fn set_valid(&mut self, valid: bool) {
        debug_assert!(self.valid.is_none(), "item {} evaluated twice", self.id);
        self.valid = Some(valid);
    }

    /// Time since the generator created the item
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn age_ms(&self) -> f64 {
        self.age().as_secs_f64() * 1000.0
    }
}
