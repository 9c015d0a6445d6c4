use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Something a shutdown has to wake up: a channel or a barrier
pub trait Interruptible: Send + Sync {
    /// Release every thread blocked on this primitive. Must be idempotent.
    fn interrupt(&self);
}

struct ShutdownInner {
    requested: AtomicBool,
    targets: Mutex<Vec<Arc<dyn Interruptible>>>,
}

/// Shared shutdown flag plus the broadcast that unblocks every waiter.
///
/// Cloning yields another handle to the same flag. Once requested the flag
/// stays set for the lifetime of the run. In-flight compute is never
/// aborted; stages notice the shutdown at their next channel operation,
/// barrier wait, or explicit flag check.
#[derive(Clone)]
pub struct ShutdownController {
    inner: Arc<ShutdownInner>,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownInner {
                requested: AtomicBool::new(false),
                targets: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a primitive to interrupt on shutdown. A target registered
    /// after shutdown was requested is interrupted immediately.
    pub fn register(&self, target: Arc<dyn Interruptible>) {
        let mut targets = self.inner.targets.lock();
        if self.is_requested() {
            target.interrupt();
        }
        targets.push(target);
    }

    /// Set the flag and interrupt every registered target.
    ///
    /// Only the first call broadcasts; it returns `true`. Later calls are
    /// no-ops and return `false`.
    pub fn request_shutdown(&self) -> bool {
        // Hold the target list so a concurrent register cannot miss the flag
        let targets = self.inner.targets.lock();
        if self.inner.requested.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::info!(targets = targets.len(), "Pipeline shutdown requested");
        for target in targets.iter() {
            target.interrupt();
        }
        true
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownController")
            .field("requested", &self.is_requested())
            .finish()
    }
}

/// Requests shutdown when dropped during a panic, so a stage that unwinds
/// never strands its siblings on the barrier.
pub(crate) struct ShutdownOnPanic<'a> {
    shutdown: &'a ShutdownController,
    stage: &'static str,
}

impl<'a> ShutdownOnPanic<'a> {
    pub(crate) fn new(shutdown: &'a ShutdownController, stage: &'static str) -> Self {
        Self { shutdown, stage }
    }
}

impl Drop for ShutdownOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!(stage = self.stage, "Stage panicked, shutting down pipeline");
            self.shutdown.request_shutdown();
        }
    }
}
