use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while configuring or running a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration rejected before any thread was spawned
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// A stage could not be started
    #[error("Stage {stage} failed: {reason}")]
    StageFailed { stage: &'static str, reason: String },

    /// Thread spawn or join error
    #[error("Thread error: {0}")]
    ThreadError(String),

    /// Log sink I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a push that did not enqueue. The item is handed back.
#[derive(Error, PartialEq, Eq)]
pub enum PushError<T> {
    /// The channel stayed full until the deadline
    #[error("push timed out")]
    Timeout(T),

    /// The channel is full and has been closed by shutdown
    #[error("push rejected: channel closed")]
    Closed(T),
}

impl<T> PushError<T> {
    /// Take back the item that could not be pushed
    pub fn into_inner(self) -> T {
        match self {
            PushError::Timeout(item) | PushError::Closed(item) => item,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PushError::Timeout(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, PushError::Closed(_))
    }
}

// Manual impl so `T` does not need to be `Debug`.
impl<T> std::fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushError::Timeout(_) => f.write_str("Timeout(..)"),
            PushError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

/// Outcome of a pop that returned no item
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    /// The channel stayed empty until the deadline
    #[error("pop timed out")]
    Timeout,

    /// The channel is drained and has been closed by shutdown
    #[error("channel closed")]
    Closed,
}

/// Barrier failure
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierError {
    /// The barrier was broken by shutdown; parties will never all arrive
    #[error("barrier broken by shutdown")]
    Broken,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_error_returns_item() {
        let err = PushError::Closed(7u32);
        assert!(err.is_closed());
        assert!(!err.is_timeout());
        assert_eq!(err.into_inner(), 7);
    }

    #[test]
    fn test_error_messages() {
        let err = PipelineError::InvalidConfig("capacity must be > 0".into());
        assert_eq!(err.to_string(), "Configuration error: capacity must be > 0");
        assert_eq!(PopError::Closed.to_string(), "channel closed");
        assert_eq!(
            PushError::Timeout(()).to_string(),
            "push timed out"
        );
    }
}
