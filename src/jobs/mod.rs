//! Asynchronous job layer: queue, status registry, and worker pool.
//!
//! Submissions return a [`JobId`] immediately; a fixed pool of worker
//! threads drains the queue. Jobs sharing a serialization identity (the
//! target recipe id, or the global rebuild identity) never run concurrently:
//! the queue marks an identity busy while a worker holds one of its jobs and
//! skips over queued jobs for busy identities. First attempts for one
//! identity are delivered in submission order; a retried job re-enters the
//! queue when its backoff elapses and may land behind newer work.
//!
//! Only transient failures are retried, with exponential backoff capped at
//! [`MAX_BACKOFF`]. Everything else is terminal on the first attempt.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::mutation::{Deadline, MutationOp, Mutator};

/// Ceiling for retry backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Opaque job handle, monotonically allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    /// Reconstruct a handle from its numeric form (CLI input).
    pub fn from_raw(raw: u64) -> Self {
        JobId(raw)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job:{}", self.0)
    }
}

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Committed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Committed => "committed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: JobId,
    pub kind: &'static str,
    pub identity: String,
    pub state: JobState,
    pub attempts: u32,
    pub error: Option<String>,
}

#[derive(Debug)]
struct QueuedJob {
    id: JobId,
    op: MutationOp,
    identity: String,
    /// Attempts already completed.
    attempts: u32,
}

#[derive(Debug, Default)]
struct QueueInner {
    ready: VecDeque<QueuedJob>,
    delayed: Vec<(Instant, QueuedJob)>,
    busy: HashSet<String>,
    shutdown: bool,
}

/// Blocking multi-consumer queue with per-identity exclusion.
#[derive(Debug, Default)]
struct JobQueue {
    inner: Mutex<QueueInner>,
    cvar: Condvar,
}

impl JobQueue {
    fn push(&self, job: QueuedJob) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.ready.push_back(job);
        self.cvar.notify_one();
    }

    fn push_delayed(&self, job: QueuedJob, delay: Duration) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.delayed.push((Instant::now() + delay, job));
        self.cvar.notify_all();
    }

    /// Take the next runnable job, marking its identity busy. Blocks until
    /// one is available; returns `None` once the queue is shut down.
    fn pop(&self) -> Option<QueuedJob> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        loop {
            if inner.shutdown {
                return None;
            }
            let now = Instant::now();
            // Promote delayed jobs whose backoff elapsed.
            let mut i = 0;
            while i < inner.delayed.len() {
                if inner.delayed[i].0 <= now {
                    let (_, job) = inner.delayed.swap_remove(i);
                    inner.ready.push_back(job);
                } else {
                    i += 1;
                }
            }
            if let Some(pos) = inner
                .ready
                .iter()
                .position(|job| !inner.busy.contains(&job.identity))
            {
                let job = inner.ready.remove(pos).unwrap_or_else(|| unreachable!());
                inner.busy.insert(job.identity.clone());
                return Some(job);
            }
            let wait = inner
                .delayed
                .iter()
                .map(|(due, _)| due.saturating_duration_since(now))
                .min()
                .unwrap_or(Duration::from_millis(250));
            let (guard, _) = self
                .cvar
                .wait_timeout(inner, wait)
                .unwrap_or_else(|p| p.into_inner());
            inner = guard;
        }
    }

    /// Release an identity after its job reached a terminal state or was
    /// scheduled for retry.
    fn finish(&self, identity: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.busy.remove(identity);
        self.cvar.notify_all();
    }

    fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.shutdown = true;
        self.cvar.notify_all();
    }

    fn is_shutdown(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .shutdown
    }
}

/// Accepts submissions and tracks job status.
#[derive(Debug)]
pub struct JobRunner {
    queue: Arc<JobQueue>,
    registry: Arc<DashMap<JobId, JobStatus>>,
    next: AtomicU64,
}

impl JobRunner {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(JobQueue::default()),
            registry: Arc::new(DashMap::new()),
            next: AtomicU64::new(1),
        }
    }

    /// Enqueue an operation, returning its job handle.
    pub fn submit(&self, op: MutationOp) -> Result<JobId, EngineError> {
        if self.queue.is_shutdown() {
            return Err(EngineError::Shutdown);
        }
        let id = JobId(self.next.fetch_add(1, Ordering::Relaxed));
        let identity = op.identity();
        self.registry.insert(
            id,
            JobStatus {
                id,
                kind: op.kind(),
                identity: identity.clone(),
                state: JobState::Queued,
                attempts: 0,
                error: None,
            },
        );
        debug!(%id, identity, kind = op.kind(), "job submitted");
        self.queue.push(QueuedJob {
            id,
            op,
            identity,
            attempts: 0,
        });
        Ok(id)
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.registry.get(&id).map(|s| s.clone())
    }

    /// All jobs, sorted by submission.
    pub fn list(&self) -> Vec<JobStatus> {
        let mut jobs: Vec<JobStatus> = self.registry.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    /// Cancel a job that has not started. Returns `false` if it already ran,
    /// is running, or does not exist.
    pub fn cancel(&self, id: JobId) -> bool {
        match self.registry.get_mut(&id) {
            Some(mut status) if status.state == JobState::Queued => {
                status.state = JobState::Cancelled;
                info!(%id, "job cancelled");
                true
            }
            _ => false,
        }
    }

    /// Move a job to `Running` for its next attempt, unless it was
    /// cancelled. One registry guard covers the check and the transition,
    /// so a concurrent [`cancel`](Self::cancel) either lands first (and the
    /// job never starts) or observes `Running` and is refused.
    fn try_start(&self, id: JobId, attempts: u32) -> bool {
        match self.registry.get_mut(&id) {
            Some(mut status) => {
                if status.state == JobState::Cancelled {
                    return false;
                }
                status.state = JobState::Running;
                status.attempts = attempts;
                status.error = None;
                true
            }
            None => false,
        }
    }

    fn set_state(&self, id: JobId, state: JobState, attempts: u32, error: Option<String>) {
        if let Some(mut status) = self.registry.get_mut(&id) {
            status.state = state;
            status.attempts = attempts;
            status.error = error;
        }
    }
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub workers: usize,
    pub job_timeout: Duration,
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub rebuild_interval: Option<Duration>,
}

/// Fixed pool of worker threads draining the job queue, plus an optional
/// periodic rebuild scheduler.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handles: Vec<JoinHandle<()>>,
    scheduler_stop: Arc<(Mutex<bool>, Condvar)>,
}

impl WorkerPool {
    pub fn spawn(mutator: Arc<Mutator>, runner: Arc<JobRunner>, cfg: WorkerConfig) -> Self {
        let queue = Arc::clone(&runner.queue);
        let mut handles = Vec::with_capacity(cfg.workers + 1);
        for n in 0..cfg.workers.max(1) {
            let queue = Arc::clone(&queue);
            let mutator = Arc::clone(&mutator);
            let runner = Arc::clone(&runner);
            let cfg = cfg.clone();
            handles.push(
                std::thread::Builder::new()
                    .name(format!("larder-worker-{n}"))
                    .spawn(move || worker_loop(&queue, &mutator, &runner, &cfg))
                    .unwrap_or_else(|e| panic!("failed to spawn worker thread: {e}")),
            );
        }

        let scheduler_stop = Arc::new((Mutex::new(false), Condvar::new()));
        if let Some(interval) = cfg.rebuild_interval {
            let runner = Arc::clone(&runner);
            let stop = Arc::clone(&scheduler_stop);
            handles.push(
                std::thread::Builder::new()
                    .name("larder-rebuild-scheduler".to_string())
                    .spawn(move || scheduler_loop(&runner, &stop, interval))
                    .unwrap_or_else(|e| panic!("failed to spawn scheduler thread: {e}")),
            );
        }

        Self {
            queue,
            handles,
            scheduler_stop,
        }
    }

    /// Stop accepting work and join all threads. Queued jobs stay in their
    /// last recorded state.
    pub fn shutdown(&mut self) {
        self.queue.shutdown();
        {
            let (lock, cvar) = &*self.scheduler_stop;
            *lock.lock().unwrap_or_else(|p| p.into_inner()) = true;
            cvar.notify_all();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(queue: &JobQueue, mutator: &Mutator, runner: &JobRunner, cfg: &WorkerConfig) {
    while let Some(job) = queue.pop() {
        let attempt = job.attempts + 1;
        if !runner.try_start(job.id, attempt) {
            queue.finish(&job.identity);
            continue;
        }

        let deadline = Deadline::new(cfg.job_timeout);
        match mutator.apply(&job.op, &deadline) {
            Ok(()) => {
                debug!(id = %job.id, attempt, "job committed");
                runner.set_state(job.id, JobState::Committed, attempt, None);
            }
            Err(err) if err.is_transient() && attempt < cfg.max_attempts => {
                let backoff = backoff_for(cfg.retry_base, attempt);
                warn!(
                    id = %job.id,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    %err,
                    "transient failure, retrying"
                );
                runner.set_state(job.id, JobState::Queued, attempt, Some(err.to_string()));
                queue.push_delayed(
                    QueuedJob {
                        id: job.id,
                        op: job.op,
                        identity: job.identity.clone(),
                        attempts: attempt,
                    },
                    backoff,
                );
            }
            Err(err) => {
                error!(id = %job.id, attempt, %err, "job failed");
                runner.set_state(job.id, JobState::Failed, attempt, Some(err.to_string()));
            }
        }
        queue.finish(&job.identity);
    }
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped.
fn backoff_for(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << (attempt - 1).min(16);
    (base * factor).min(MAX_BACKOFF)
}

fn scheduler_loop(runner: &JobRunner, stop: &(Mutex<bool>, Condvar), interval: Duration) {
    let (lock, cvar) = stop;
    let mut stopped = lock.lock().unwrap_or_else(|p| p.into_inner());
    loop {
        let (guard, _) = cvar
            .wait_timeout(stopped, interval)
            .unwrap_or_else(|p| p.into_inner());
        stopped = guard;
        if *stopped {
            return;
        }
        match runner.submit(MutationOp::Rebuild) {
            Ok(id) => debug!(%id, "scheduled periodic rebuild"),
            Err(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::build_graph;
    use crate::cache::ResultCache;
    use crate::ident::Interner;
    use crate::recipe::RecipeDraft;
    use crate::schema::Schema;
    use crate::store::SharedGraph;

    fn draft(title: &str) -> RecipeDraft {
        RecipeDraft {
            title: title.to_string(),
            instructions: vec!["Cook".into()],
            prep_time_minutes: 5,
            difficulty: None,
            meal_type: None,
            vegan: false,
            vegetarian: false,
            calories: 100.0,
            protein: 5.0,
            fat: 2.0,
            carbohydrates: 10.0,
            ingredients: Vec::new(),
        }
    }

    fn mutator() -> (Arc<SharedGraph>, Arc<Mutator>) {
        let interner = Arc::new(Interner::new());
        let schema = Arc::new(Schema::base(&interner));
        let store = build_graph(Arc::clone(&schema), Arc::clone(&interner), &[], 1).unwrap();
        let graph = Arc::new(SharedGraph::new(store));
        let mutator = Arc::new(Mutator::new(
            schema,
            interner,
            Arc::clone(&graph),
            Arc::new(ResultCache::new()),
            None,
            Vec::new(),
        ));
        (graph, mutator)
    }

    fn wait_for(runner: &JobRunner, id: JobId, timeout: Duration) -> JobStatus {
        let start = Instant::now();
        loop {
            let status = runner.status(id).unwrap();
            match status.state {
                JobState::Committed | JobState::Failed | JobState::Cancelled => return status,
                _ if start.elapsed() > timeout => return status,
                _ => std::thread::sleep(Duration::from_millis(5)),
            }
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            workers: 2,
            job_timeout: Duration::from_secs(5),
            max_attempts: 3,
            retry_base: Duration::from_millis(10),
            rebuild_interval: None,
        }
    }

    #[test]
    fn queue_skips_busy_identities() {
        let queue = JobQueue::default();
        let job = |id: u64, identity: &str| QueuedJob {
            id: JobId(id),
            op: MutationOp::Delete {
                id: identity.to_string(),
            },
            identity: identity.to_string(),
            attempts: 0,
        };
        queue.push(job(1, "a"));
        queue.push(job(2, "a"));
        queue.push(job(3, "b"));

        assert_eq!(queue.pop().unwrap().id, JobId(1));
        // "a" is busy; the next runnable job is 3.
        assert_eq!(queue.pop().unwrap().id, JobId(3));
        queue.finish("a");
        assert_eq!(queue.pop().unwrap().id, JobId(2));
    }

    #[test]
    fn submitted_job_commits() {
        let (graph, mutator) = mutator();
        let runner = Arc::new(JobRunner::new());
        let mut pool = WorkerPool::spawn(Arc::clone(&mutator), Arc::clone(&runner), config());

        let id = runner.submit(MutationOp::Create(draft("Pasta"))).unwrap();
        let status = wait_for(&runner, id, Duration::from_secs(5));
        assert_eq!(status.state, JobState::Committed);
        assert_eq!(status.attempts, 1);
        assert_eq!(mutator.recipe_count(), 1);
        let _ = graph;
        pool.shutdown();
    }

    #[test]
    fn terminal_failure_is_not_retried() {
        let (_graph, mutator) = mutator();
        let runner = Arc::new(JobRunner::new());
        let mut pool = WorkerPool::spawn(Arc::clone(&mutator), Arc::clone(&runner), config());

        let mut bad = draft("Pasta");
        bad.title = " ".into();
        let id = runner.submit(MutationOp::Create(bad)).unwrap();
        let status = wait_for(&runner, id, Duration::from_secs(5));
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.attempts, 1);
        assert!(status.error.unwrap().contains("title"));
        pool.shutdown();
    }

    #[test]
    fn transient_failure_retries_until_success() {
        let (graph, mutator) = mutator();
        let runner = Arc::new(JobRunner::new());
        // Backoff long enough that the retry lands after the window closes.
        let cfg = WorkerConfig {
            retry_base: Duration::from_millis(200),
            ..config()
        };
        let mut pool = WorkerPool::spawn(Arc::clone(&mutator), Arc::clone(&runner), cfg);

        let guard = graph.begin_rebuild().unwrap();
        let id = runner.submit(MutationOp::Create(draft("Pasta"))).unwrap();
        // Let the first attempt bounce off the rebuild window.
        std::thread::sleep(Duration::from_millis(50));
        drop(guard);

        let status = wait_for(&runner, id, Duration::from_secs(5));
        assert_eq!(status.state, JobState::Committed);
        assert!(status.attempts >= 2);
        pool.shutdown();
    }

    #[test]
    fn retries_exhaust_to_failed() {
        let (graph, mutator) = mutator();
        let runner = Arc::new(JobRunner::new());
        let mut pool = WorkerPool::spawn(Arc::clone(&mutator), Arc::clone(&runner), config());

        // Held for the whole test: every attempt sees the rebuild window.
        let _guard = graph.begin_rebuild().unwrap();
        let id = runner.submit(MutationOp::Create(draft("Pasta"))).unwrap();
        let status = wait_for(&runner, id, Duration::from_secs(5));
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.attempts, 3);
        pool.shutdown();
    }

    #[test]
    fn queued_job_can_be_cancelled() {
        let runner = JobRunner::new();
        // No pool: the job stays queued.
        let id = runner.submit(MutationOp::Rebuild).unwrap();
        assert!(runner.cancel(id));
        assert_eq!(runner.status(id).unwrap().state, JobState::Cancelled);
        // Cancelling twice fails.
        assert!(!runner.cancel(id));
    }

    #[test]
    fn cancelled_job_never_starts() {
        let (_graph, mutator) = mutator();
        let runner = Arc::new(JobRunner::new());
        // Cancel while no workers exist, then start the pool: the worker
        // must drop the job instead of running it.
        let id = runner.submit(MutationOp::Create(draft("Pasta"))).unwrap();
        assert!(runner.cancel(id));

        let mut pool = WorkerPool::spawn(Arc::clone(&mutator), Arc::clone(&runner), config());
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(runner.status(id).unwrap().state, JobState::Cancelled);
        assert_eq!(mutator.recipe_count(), 0);
        pool.shutdown();
    }

    #[test]
    fn list_is_sorted_by_submission() {
        let runner = JobRunner::new();
        let a = runner.submit(MutationOp::Rebuild).unwrap();
        let b = runner
            .submit(MutationOp::Delete {
                id: "recipe:x".into(),
            })
            .unwrap();
        let listed: Vec<JobId> = runner.list().into_iter().map(|j| j.id).collect();
        assert_eq!(listed, vec![a, b]);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_for(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_for(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_for(base, 3), Duration::from_secs(8));
        assert_eq!(backoff_for(base, 10), MAX_BACKOFF);
    }

    #[test]
    fn shutdown_rejects_new_submissions() {
        let (_graph, mutator) = mutator();
        let runner = Arc::new(JobRunner::new());
        let mut pool = WorkerPool::spawn(mutator, Arc::clone(&runner), config());
        pool.shutdown();
        assert!(matches!(
            runner.submit(MutationOp::Rebuild),
            Err(EngineError::Shutdown)
        ));
    }
}
