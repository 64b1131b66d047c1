//! Job Queue
//!
//! The job queue batches work that should happen at most once per tick,
//! such as re-rendering a component or running a queued watcher callback.
//!
//! # Algorithm
//!
//! 1. `queue_job` appends a job unless a job with the same id is already
//!    waiting, and asks the tick driver for one flush.
//! 2. `flush_jobs` takes a snapshot of the queue and runs it in FIFO order.
//!    Jobs queued while the snapshot runs wait for the next flush.
//! 3. A job whose owning effect has been stopped is skipped.
//!
//! The queue is thread-local. With [`TickDriver::Manual`] the caller decides
//! when to flush; with [`TickDriver::TokioLocal`] a flush task is spawned on
//! the thread's current-thread tokio runtime.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tokio::runtime::RuntimeFlavor;

use super::subscriber::Subscriber;

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    /// Generate a new unique job ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

/// A unit of deferred work.
///
/// Cloning keeps the id, so every clone deduplicates against the others.
#[derive(Clone)]
pub struct Job {
    id: JobId,
    run: Arc<dyn Fn() + Send + Sync>,
    owner: Option<Weak<dyn Subscriber>>,
}

impl Job {
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            id: JobId::new(),
            run: Arc::new(run),
            owner: None,
        }
    }

    /// Tie the job to an effect. Once the effect stops, the job is skipped.
    pub fn owned_by(mut self, owner: &Arc<dyn Subscriber>) -> Self {
        self.owner = Some(Arc::downgrade(owner));
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Whether the owning effect is gone or stopped.
    pub fn is_stale(&self) -> bool {
        match &self.owner {
            Some(owner) => owner
                .upgrade()
                .map_or(true, |effect| !effect.core().is_active()),
            None => false,
        }
    }

    pub fn run(&self) {
        (self.run)();
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("owned", &self.owner.is_some())
            .finish()
    }
}

/// How a flush is requested after a job is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickDriver {
    /// Nothing happens until the caller flushes.
    #[default]
    Manual,

    /// A flush task is spawned on the current-thread tokio runtime the
    /// job was queued from, `LocalSet`s included.
    ///
    /// Without such a runtime a warning is logged and the queue waits for
    /// a manual flush.
    TokioLocal,
}

/// Per-thread job queue settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub driver: TickDriver,
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn driver(mut self, driver: TickDriver) -> Self {
        self.driver = driver;
        self
    }
}

#[derive(Default)]
struct JobQueue {
    queue: VecDeque<Job>,
    queued: HashSet<JobId>,
    flush_pending: bool,
    config: SchedulerConfig,
}

thread_local! {
    static QUEUE: RefCell<JobQueue> = RefCell::new(JobQueue::default());
}

/// Set the queue configuration for the current thread.
pub fn configure_scheduler(config: SchedulerConfig) {
    QUEUE.with(|queue| queue.borrow_mut().config = config);
}

/// The queue configuration of the current thread.
pub fn scheduler_config() -> SchedulerConfig {
    QUEUE.with(|queue| queue.borrow().config)
}

/// Add `job` to the queue. Returns false if it was already waiting.
pub fn queue_job(job: &Job) -> bool {
    let request = QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        if !queue.queued.insert(job.id) {
            return None;
        }
        queue.queue.push_back(job.clone());

        if queue.flush_pending {
            Some(None)
        } else {
            queue.flush_pending = true;
            Some(Some(queue.config.driver))
        }
    });

    match request {
        None => false,
        Some(driver) => {
            if let Some(TickDriver::TokioLocal) = driver {
                spawn_flush();
            }
            true
        }
    }
}

fn spawn_flush() {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::CurrentThread => {
            handle.spawn(async {
                flush_jobs();
            });
        }
        Ok(_) => {
            tracing::warn!("tokio tick driver needs a current-thread runtime; flush manually");
        }
        Err(err) => {
            tracing::warn!(%err, "no tokio runtime for the tick driver; flush manually");
        }
    }
}

/// Run every job queued so far. Returns the number of jobs that ran.
pub fn flush_jobs() -> usize {
    let jobs: Vec<Job> = QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        queue.flush_pending = false;
        queue.queued.clear();
        queue.queue.drain(..).collect()
    });

    if jobs.is_empty() {
        return 0;
    }

    let mut ran = 0;
    let mut skipped = 0;
    for job in jobs {
        if job.is_stale() {
            tracing::trace!(job = job.id.raw(), "skipping stale job");
            skipped += 1;
            continue;
        }
        job.run();
        ran += 1;
    }

    tracing::debug!(ran, skipped, "flushed job queue");
    ran
}

/// Number of jobs waiting for the next flush.
pub fn pending_jobs() -> usize {
    QUEUE.with(|queue| queue.borrow().queue.len())
}

/// Whether a flush has been requested and not yet run.
pub fn has_pending_flush() -> bool {
    QUEUE.with(|queue| queue.borrow().flush_pending)
}

/// Yield to the executor once, then flush the queue.
pub async fn next_tick() -> usize {
    tokio::task::yield_now().await;
    flush_jobs()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::ReactiveEffect;
    use parking_lot::Mutex;

    fn recording_job(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Job {
        let log = log.clone();
        Job::new(move || log.lock().push(name))
    }

    #[test]
    fn jobs_run_in_fifo_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        queue_job(&recording_job(&log, "a"));
        queue_job(&recording_job(&log, "b"));
        queue_job(&recording_job(&log, "c"));
        assert_eq!(pending_jobs(), 3);

        assert_eq!(flush_jobs(), 3);
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
        assert_eq!(pending_jobs(), 0);
    }

    #[test]
    fn duplicate_jobs_are_dropped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let job = recording_job(&log, "render");

        assert!(queue_job(&job));
        assert!(!queue_job(&job));
        assert!(!queue_job(&job.clone()));
        assert_eq!(flush_jobs(), 1);

        // Once flushed, the job can be queued again.
        assert!(queue_job(&job));
        assert_eq!(flush_jobs(), 1);
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn jobs_queued_during_flush_wait_for_next_flush() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let later = recording_job(&log, "later");

        let log_clone = log.clone();
        let first = Job::new(move || {
            log_clone.lock().push("first");
            queue_job(&later);
        });

        queue_job(&first);
        assert_eq!(flush_jobs(), 1);
        assert_eq!(*log.lock(), vec!["first"]);
        assert!(has_pending_flush());

        assert_eq!(flush_jobs(), 1);
        assert_eq!(*log.lock(), vec!["first", "later"]);
    }

    #[test]
    fn stale_jobs_are_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let owner = ReactiveEffect::new(|| ());
        let job = recording_job(&log, "owned").owned_by(&owner.as_subscriber());

        queue_job(&job);
        owner.stop();
        assert!(job.is_stale());
        assert_eq!(flush_jobs(), 0);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn config_deserialises_from_json() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"driver":"tokio_local"}"#).expect("valid config");
        assert_eq!(config, SchedulerConfig::new().driver(TickDriver::TokioLocal));

        let defaulted: SchedulerConfig = serde_json::from_str("{}").expect("valid config");
        assert_eq!(defaulted.driver, TickDriver::Manual);
    }

    #[test]
    fn tokio_driver_without_runtime_waits_for_manual_flush() {
        let log = Arc::new(Mutex::new(Vec::new()));
        configure_scheduler(SchedulerConfig::new().driver(TickDriver::TokioLocal));

        assert!(queue_job(&recording_job(&log, "manual")));
        assert!(has_pending_flush());
        assert!(log.lock().is_empty());

        configure_scheduler(SchedulerConfig::default());
        assert_eq!(flush_jobs(), 1);
        assert_eq!(*log.lock(), vec!["manual"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tokio_driver_on_multi_thread_runtime_does_not_spawn() {
        let log = Arc::new(Mutex::new(Vec::new()));
        configure_scheduler(SchedulerConfig::new().driver(TickDriver::TokioLocal));

        queue_job(&recording_job(&log, "manual"));
        configure_scheduler(SchedulerConfig::default());
        assert!(has_pending_flush());
        assert_eq!(flush_jobs(), 1);
    }

    #[tokio::test]
    async fn next_tick_flushes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        queue_job(&recording_job(&log, "tick"));

        assert_eq!(next_tick().await, 1);
        assert_eq!(*log.lock(), vec!["tick"]);
    }

    #[tokio::test]
    async fn tokio_local_driver_flushes_without_caller() {
        let local = tokio::task::LocalSet::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let job = recording_job(&log, "spawned");
        local
            .run_until(async move {
                configure_scheduler(SchedulerConfig::new().driver(TickDriver::TokioLocal));
                queue_job(&job);

                for _ in 0..10 {
                    if !has_pending_flush() {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
                configure_scheduler(SchedulerConfig::default());
            })
            .await;

        assert_eq!(*log.lock(), vec!["spawned"]);
    }
}
