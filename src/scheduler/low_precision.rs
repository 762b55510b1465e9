//! Coalescing timer registry.
//!
//! One shared repeating tokio timer per distinct interval value. Tasks
//! registered with the same interval join that timer's cadence instead of
//! getting an independently phased schedule, which bounds the number of
//! live timers by the number of distinct intervals in use.

use crate::scheduler::task::{TaskRegistration, TaskWork};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// Shared state for one distinct interval value.
struct IntervalBucket {
    /// Handle of the bucket's shared repeating timer loop.
    timer: JoinHandle<()>,
    /// Registered tasks by key. A BTreeMap keeps dispatch order stable.
    tasks: BTreeMap<String, TaskRegistration>,
    /// Keys that already fired for their current registration.
    fired: BTreeSet<String>,
}

type Buckets = HashMap<u64, IntervalBucket>;

/// Wall-clock origin paired with a tokio [`Instant`], so the scheduler
/// clock follows virtual time under `tokio::time::pause`.
#[derive(Clone, Copy)]
struct SchedulerClock {
    origin_epoch_ms: u64,
    origin: Instant,
}

impl SchedulerClock {
    fn start() -> Self {
        let origin_epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Self {
            origin_epoch_ms,
            origin: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.origin_epoch_ms.saturating_add(elapsed)
    }
}

/// Coalescing scheduler for coarse periodic background work.
///
/// Tasks are keyed by `(key, interval)`. All tasks sharing an interval run
/// on one shared timer; each registration fires at most once per firing
/// window and, once executed, does not run again until re-registered.
/// Re-registering an existing key replaces the previous entry (last write
/// wins); cancelling the last task of an interval stops its timer.
///
/// Construct one instance per client context and call
/// [`shutdown`](Self::shutdown) on teardown. Registration spawns timers on
/// the current tokio runtime, so the scheduler must be created and used
/// from within one.
pub struct LowPrecisionTaskScheduler {
    buckets: Arc<Mutex<Buckets>>,
    clock: SchedulerClock,
}

impl LowPrecisionTaskScheduler {
    /// Create an empty scheduler with no live timers.
    pub fn new() -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            clock: SchedulerClock::start(),
        }
    }

    /// Current scheduler clock in epoch milliseconds.
    ///
    /// Useful for computing firing anchors relative to "now".
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Register a task, creating the interval's shared timer if absent.
    ///
    /// A task joining an existing bucket inherits that bucket's cadence and
    /// is picked up on its next tick; only the first registration for an
    /// interval phases the timer, at the next firing boundary
    /// `firing_date + n * interval` after now. A duplicate key silently
    /// supersedes the earlier registration.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::Scheduler`](crate::CourierError::Scheduler)
    /// for an empty key or a zero interval.
    pub fn add_task(&self, registration: TaskRegistration) -> crate::Result<()> {
        registration.validate()?;
        let interval_ms = registration.interval_delay_ms;

        let mut buckets = lock(&self.buckets);
        if let Some(bucket) = buckets.get_mut(&interval_ms) {
            // A replaced key gets a fresh fired-marker.
            debug!(key = %registration.key, interval_ms, "task joined existing interval bucket");
            bucket.fired.remove(&registration.key);
            bucket.tasks.insert(registration.key.clone(), registration);
            return Ok(());
        }

        let delay =
            delay_until_next_boundary(self.now_ms(), registration.firing_date_ms, interval_ms);
        let first_tick = Instant::now() + Duration::from_millis(delay);
        let timer =
            spawn_bucket_timer(Arc::clone(&self.buckets), self.clock, interval_ms, first_tick);
        debug!(
            key = %registration.key,
            interval_ms,
            first_fire_in_ms = delay,
            "started shared timer for new interval bucket"
        );

        let mut tasks = BTreeMap::new();
        tasks.insert(registration.key.clone(), registration);
        buckets.insert(
            interval_ms,
            IntervalBucket {
                timer,
                tasks,
                fired: BTreeSet::new(),
            },
        );
        Ok(())
    }

    /// Remove a task, effective for all future ticks.
    ///
    /// An unknown key/interval is a silent no-op. Removing the last task of
    /// a bucket stops that bucket's shared timer. An invocation already
    /// dispatched by the current tick completes normally.
    pub fn cancel_task(&self, key: &str, interval_delay_ms: u64) {
        let mut buckets = lock(&self.buckets);
        let Some(bucket) = buckets.get_mut(&interval_delay_ms) else {
            return;
        };
        bucket.tasks.remove(key);
        bucket.fired.remove(key);

        if bucket.tasks.is_empty() {
            if let Some(bucket) = buckets.remove(&interval_delay_ms) {
                bucket.timer.abort();
                debug!(
                    interval_ms = interval_delay_ms,
                    "last task cancelled, stopped shared timer"
                );
            }
        }
    }

    /// Stop every bucket timer and clear the registry.
    pub fn shutdown(&self) {
        let mut buckets = lock(&self.buckets);
        let stopped = buckets.len();
        for (_, bucket) in buckets.drain() {
            bucket.timer.abort();
        }
        if stopped > 0 {
            info!(intervals = stopped, "scheduler shut down");
        }
    }

    /// Number of distinct intervals with a live shared timer.
    pub fn interval_count(&self) -> usize {
        lock(&self.buckets).len()
    }

    /// Number of tasks registered under an interval.
    pub fn task_count(&self, interval_delay_ms: u64) -> usize {
        lock(&self.buckets)
            .get(&interval_delay_ms)
            .map_or(0, |bucket| bucket.tasks.len())
    }

    /// Whether a key is currently registered under an interval.
    pub fn is_registered(&self, key: &str, interval_delay_ms: u64) -> bool {
        lock(&self.buckets)
            .get(&interval_delay_ms)
            .is_some_and(|bucket| bucket.tasks.contains_key(key))
    }
}

impl Default for LowPrecisionTaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LowPrecisionTaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock(buckets: &Mutex<Buckets>) -> MutexGuard<'_, Buckets> {
    buckets.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared timer loop for one interval bucket. Exits once the bucket has
/// been torn down.
fn spawn_bucket_timer(
    buckets: Arc<Mutex<Buckets>>,
    clock: SchedulerClock,
    interval_ms: u64,
    first_tick: Instant,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(first_tick, Duration::from_millis(interval_ms));
        loop {
            ticker.tick().await;
            if !run_due_tasks(&buckets, interval_ms, clock.now_ms()) {
                break;
            }
        }
    })
}

/// One firing window: dispatch every task that has reached its anchor and
/// has not fired for its current registration. Returns `false` once the
/// bucket no longer exists.
fn run_due_tasks(buckets: &Mutex<Buckets>, interval_ms: u64, now_ms: u64) -> bool {
    let mut due: Vec<(String, TaskWork)> = Vec::new();
    {
        let mut guard = lock(buckets);
        let Some(bucket) = guard.get_mut(&interval_ms) else {
            return false;
        };
        let IntervalBucket { tasks, fired, .. } = bucket;
        for (key, entry) in tasks.iter() {
            if fired.contains(key) || entry.firing_date_ms > now_ms {
                continue;
            }
            fired.insert(key.clone());
            due.push((key.clone(), entry.work()));
        }
    }

    // Fire-and-forget: the tick handler never waits on task bodies, and a
    // failing task only produces a log line.
    for (key, work) in due {
        debug!(key = %key, interval_ms, "dispatching scheduled task");
        tokio::spawn(async move {
            if let Err(e) = work().await {
                warn!(key = %key, interval_ms, error = %e, "scheduled task failed");
            }
        });
    }
    true
}

/// Delay from `now_ms` to the next firing boundary
/// `firing_date_ms + n * interval_ms` strictly in the future.
///
/// An anchor several periods in the past does not fire immediately to
/// catch up; it waits for the next boundary.
fn delay_until_next_boundary(now_ms: u64, firing_date_ms: u64, interval_ms: u64) -> u64 {
    if firing_date_ms > now_ms {
        return firing_date_ms - now_ms;
    }
    let elapsed = now_ms - firing_date_ms;
    interval_ms - (elapsed % interval_ms)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn noop(key: &str, firing_date_ms: u64, interval_delay_ms: u64) -> TaskRegistration {
        TaskRegistration::new(key, firing_date_ms, interval_delay_ms, || async { Ok(()) })
    }

    #[test]
    fn boundary_is_one_full_interval_when_anchored_at_now() {
        assert_eq!(delay_until_next_boundary(5_000, 5_000, 1_000), 1_000);
    }

    #[test]
    fn boundary_for_future_anchor_is_the_anchor_itself() {
        assert_eq!(delay_until_next_boundary(1_000, 3_500, 1_000), 2_500);
    }

    #[test]
    fn boundary_for_past_anchor_is_the_next_multiple() {
        // Anchor 400ms ago with a 1s period: next boundary in 600ms.
        assert_eq!(delay_until_next_boundary(10_400, 10_000, 1_000), 600);
    }

    #[test]
    fn boundary_at_exact_multiple_waits_a_full_period() {
        assert_eq!(delay_until_next_boundary(13_000, 10_000, 1_000), 1_000);
    }

    #[tokio::test]
    async fn invalid_registrations_are_rejected_without_side_effects() {
        let scheduler = LowPrecisionTaskScheduler::new();

        assert!(scheduler.add_task(noop("", 0, 1_000)).is_err());
        assert!(scheduler.add_task(noop("refresh", 0, 0)).is_err());
        assert_eq!(scheduler.interval_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tasks_sharing_an_interval_share_one_bucket() {
        let scheduler = LowPrecisionTaskScheduler::new();
        let now = scheduler.now_ms();

        scheduler.add_task(noop("a", now, 1_000)).unwrap();
        scheduler.add_task(noop("b", now, 1_000)).unwrap();
        scheduler.add_task(noop("c", now, 7_000)).unwrap();

        assert_eq!(scheduler.interval_count(), 2);
        assert_eq!(scheduler.task_count(1_000), 2);
        assert_eq!(scheduler.task_count(7_000), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_in_different_intervals_is_independent() {
        let scheduler = LowPrecisionTaskScheduler::new();
        let now = scheduler.now_ms();

        scheduler.add_task(noop("refresh", now, 1_000)).unwrap();
        scheduler.add_task(noop("refresh", now, 2_000)).unwrap();

        assert!(scheduler.is_registered("refresh", 1_000));
        assert!(scheduler.is_registered("refresh", 2_000));

        scheduler.cancel_task("refresh", 1_000);
        assert!(!scheduler.is_registered("refresh", 1_000));
        assert!(scheduler.is_registered("refresh", 2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn re_registering_a_key_replaces_the_entry() {
        let scheduler = LowPrecisionTaskScheduler::new();
        let now = scheduler.now_ms();

        scheduler.add_task(noop("sweep", now, 1_000)).unwrap();
        scheduler.add_task(noop("sweep", now, 1_000)).unwrap();

        assert_eq!(scheduler.task_count(1_000), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_of_unknown_key_is_a_no_op() {
        let scheduler = LowPrecisionTaskScheduler::new();
        let now = scheduler.now_ms();

        scheduler.add_task(noop("sweep", now, 1_000)).unwrap();
        scheduler.cancel_task("ghost", 1_000);
        scheduler.cancel_task("sweep", 9_999);

        assert_eq!(scheduler.task_count(1_000), 1);
        assert_eq!(scheduler.interval_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_the_last_task_discards_the_bucket() {
        let scheduler = LowPrecisionTaskScheduler::new();
        let now = scheduler.now_ms();

        scheduler.add_task(noop("a", now, 1_000)).unwrap();
        scheduler.add_task(noop("b", now, 1_000)).unwrap();

        scheduler.cancel_task("a", 1_000);
        assert_eq!(scheduler.interval_count(), 1);

        scheduler.cancel_task("b", 1_000);
        assert_eq!(scheduler.interval_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_clears_every_bucket() {
        let scheduler = LowPrecisionTaskScheduler::new();
        let now = scheduler.now_ms();

        scheduler.add_task(noop("a", now, 1_000)).unwrap();
        scheduler.add_task(noop("b", now, 2_000)).unwrap();
        scheduler.add_task(noop("c", now, 3_000)).unwrap();

        scheduler.shutdown();
        assert_eq!(scheduler.interval_count(), 0);
    }
}
