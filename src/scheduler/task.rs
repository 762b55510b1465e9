//! Task registration types for the low-precision scheduler.
//!
//! Defines [`TaskRegistration`], the unit of recurring work handed to the
//! scheduler, and the type-erased callback it wraps.

use futures_util::future::BoxFuture;
use std::sync::Arc;

/// Type-erased task body: a zero-argument async unit of work.
///
/// The scheduler never awaits the returned future itself; it spawns it and
/// logs an `Err` at the dispatch boundary.
pub type TaskWork = Arc<dyn Fn() -> BoxFuture<'static, crate::Result<()>> + Send + Sync>;

/// A unit of recurring background work, keyed by `(key, interval)`.
///
/// `key` only has to be unique within its interval bucket; two different
/// intervals may each carry a registration with the same key.
pub struct TaskRegistration {
    /// Identity of the task within its interval bucket.
    pub key: String,
    /// Epoch-millisecond anchor for the first firing boundary. Callers may
    /// anchor to any reference point (midnight, session start, "now").
    pub firing_date_ms: u64,
    /// Repeat period in milliseconds; also the bucket key.
    pub interval_delay_ms: u64,
    work: TaskWork,
}

impl TaskRegistration {
    /// Create a registration from an async closure.
    pub fn new<F, Fut>(
        key: impl Into<String>,
        firing_date_ms: u64,
        interval_delay_ms: u64,
        work: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = crate::Result<()>> + Send + 'static,
    {
        Self {
            key: key.into(),
            firing_date_ms,
            interval_delay_ms,
            work: Arc::new(move || -> BoxFuture<'static, crate::Result<()>> { Box::pin(work()) }),
        }
    }

    /// Check the caller contract: non-empty key, strictly positive interval.
    pub fn validate(&self) -> crate::Result<()> {
        if self.key.is_empty() {
            return Err(crate::CourierError::Scheduler(
                "task key must not be empty".to_owned(),
            ));
        }
        if self.interval_delay_ms == 0 {
            return Err(crate::CourierError::Scheduler(format!(
                "interval for task '{}' must be strictly positive",
                self.key
            )));
        }
        Ok(())
    }

    /// Clone a handle to the task body for dispatch.
    pub(crate) fn work(&self) -> TaskWork {
        Arc::clone(&self.work)
    }
}

impl std::fmt::Debug for TaskRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistration")
            .field("key", &self.key)
            .field("firing_date_ms", &self.firing_date_ms)
            .field("interval_delay_ms", &self.interval_delay_ms)
            .finish_non_exhaustive()
    }
}
