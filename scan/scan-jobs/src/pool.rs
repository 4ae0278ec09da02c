//! Bounded pool of reconstruction worker threads.
//!
//! Jobs are queued on a bounded channel shared by a fixed set of named
//! worker threads. Submitting never blocks: a full queue is reported to the
//! caller. Every job is either run or explicitly cancelled, including jobs
//! rejected at submission and jobs still queued at shutdown.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{JobError, JobResult};
use crate::id::ScanId;

/// Largest accepted worker count.
pub const MAX_WORKERS: usize = 64;

/// A unit of background work for one scan.
pub trait Job: Send + 'static {
    /// The scan this job belongs to, for logging.
    fn scan_id(&self) -> &ScanId;

    /// Performs the work. Panics are caught and logged by the pool.
    fn run(self: Box<Self>);

    /// Called instead of [`run`](Job::run) when the job will never run,
    /// so the job can record its scan as failed.
    fn cancel(self: Box<Self>);
}

/// Worker pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Jobs that may wait in the queue beyond those running.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 32,
        }
    }
}

impl PoolConfig {
    /// Creates a configuration.
    #[must_use]
    pub const fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
        }
    }

    /// Checks both limits are usable.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidConfig`] for zero workers, more than
    /// [`MAX_WORKERS`], or a zero-length queue.
    pub fn validate(&self) -> JobResult<()> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(JobError::InvalidConfig {
                reason: format!("workers must be in 1..={MAX_WORKERS}, got {}", self.workers),
            });
        }
        if self.queue_capacity == 0 {
            return Err(JobError::InvalidConfig {
                reason: "queue capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

type BoxedJob = Box<dyn Job>;

#[derive(Default)]
struct Shared {
    queued: AtomicUsize,
    running: AtomicUsize,
    cancel_queued: AtomicBool,
    cancelled: AtomicUsize,
}

/// A fixed set of worker threads fed by a bounded queue.
///
/// Dropping the pool performs a graceful [`shutdown`](Self::shutdown).
pub struct WorkerPool {
    sender: Mutex<Option<SyncSender<BoxedJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<Shared>,
    config: PoolConfig,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("queued", &self.queued())
            .field("running", &self.running())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Starts the worker threads.
    ///
    /// # Errors
    ///
    /// [`JobError::InvalidConfig`] for an invalid configuration, or
    /// [`JobError::Spawn`] if a thread cannot be started.
    pub fn new(config: PoolConfig) -> JobResult<Self> {
        config.validate()?;

        let (sender, receiver) = mpsc::sync_channel::<BoxedJob>(config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let shared = Arc::new(Shared::default());

        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let receiver = Arc::clone(&receiver);
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("scan-worker-{index}"))
                .spawn(move || worker_loop(index, &receiver, &shared))
                .map_err(JobError::Spawn)?;
            workers.push(handle);
        }

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "Worker pool started"
        );

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            shared,
            config,
        })
    }

    /// The configuration the pool was started with.
    #[must_use]
    pub const fn config(&self) -> PoolConfig {
        self.config
    }

    /// Jobs waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    /// Jobs currently running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Queues a job without blocking.
    ///
    /// A rejected job is cancelled before this returns.
    ///
    /// # Errors
    ///
    /// [`JobError::QueueFull`] when the queue is at capacity,
    /// [`JobError::ShutDown`] after shutdown.
    pub fn submit(&self, job: BoxedJob) -> JobResult<()> {
        let Ok(guard) = self.sender.lock() else {
            job.cancel();
            return Err(JobError::Poisoned);
        };
        let Some(sender) = guard.as_ref() else {
            drop(guard);
            warn!(scan_id = %job.scan_id(), "Job submitted after shutdown");
            job.cancel();
            return Err(JobError::ShutDown);
        };

        let scan_id = job.scan_id().clone();
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(job) {
            Ok(()) => {
                debug!(scan_id = %scan_id, queued = self.queued(), "Job queued");
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                drop(guard);
                warn!(
                    scan_id = %scan_id,
                    capacity = self.config.queue_capacity,
                    "Job queue full, rejecting job"
                );
                job.cancel();
                Err(JobError::QueueFull {
                    capacity: self.config.queue_capacity,
                })
            }
            Err(TrySendError::Disconnected(job)) => {
                self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                drop(guard);
                error!(scan_id = %scan_id, "All workers have exited");
                job.cancel();
                Err(JobError::ShutDown)
            }
        }
    }

    /// Stops accepting jobs, runs everything already queued, and waits for
    /// the workers to exit. Calling it again is a no-op.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().map_or(None, |mut guard| guard.take());
        let Some(sender) = sender else {
            return;
        };
        drop(sender);

        let handles = self
            .workers
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default();
        for handle in handles {
            let name = handle.thread().name().unwrap_or("scan-worker").to_owned();
            if handle.join().is_err() {
                error!(worker = %name, "Worker thread panicked");
            }
        }

        info!(
            cancelled = self.shared.cancelled.load(Ordering::SeqCst),
            "Worker pool stopped"
        );
    }

    /// Stops accepting jobs and cancels every queued job instead of running
    /// it. Jobs already running are allowed to finish. Returns the number
    /// of jobs cancelled.
    pub fn shutdown_now(&self) -> usize {
        self.shared.cancel_queued.store(true, Ordering::SeqCst);
        let before = self.shared.cancelled.load(Ordering::SeqCst);
        self.shutdown();
        self.shared.cancelled.load(Ordering::SeqCst) - before
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(index: usize, receiver: &Mutex<Receiver<BoxedJob>>, shared: &Shared) {
    debug!(worker = index, "Worker started");
    loop {
        // The guard is a temporary, so the lock is released before the job runs.
        let next = match receiver.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => break,
        };
        let Ok(job) = next else {
            break;
        };
        shared.queued.fetch_sub(1, Ordering::SeqCst);

        if shared.cancel_queued.load(Ordering::SeqCst) {
            warn!(scan_id = %job.scan_id(), "Cancelling queued job at shutdown");
            shared.cancelled.fetch_add(1, Ordering::SeqCst);
            job.cancel();
            continue;
        }

        let scan_id = job.scan_id().clone();
        shared.running.fetch_add(1, Ordering::SeqCst);
        debug!(worker = index, scan_id = %scan_id, "Job started");
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job.run())) {
            error!(
                worker = index,
                scan_id = %scan_id,
                panic = panic_message(payload.as_ref()),
                "Job panicked"
            );
        }
        shared.running.fetch_sub(1, Ordering::SeqCst);
    }
    debug!(worker = index, "Worker exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::Sender;
    use std::time::Duration;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Outcome {
        Ran(String),
        Cancelled(String),
    }

    #[derive(Default)]
    struct Probe {
        outcomes: Mutex<Vec<Outcome>>,
    }

    impl Probe {
        fn outcomes(&self) -> Vec<Outcome> {
            self.outcomes.lock().unwrap().clone()
        }

        fn ran(&self) -> usize {
            self.outcomes()
                .iter()
                .filter(|o| matches!(o, Outcome::Ran(_)))
                .count()
        }

        fn cancelled(&self) -> usize {
            self.outcomes()
                .iter()
                .filter(|o| matches!(o, Outcome::Cancelled(_)))
                .count()
        }
    }

    struct TestJob {
        scan_id: ScanId,
        probe: Arc<Probe>,
        started: Option<Sender<()>>,
        gate: Option<Receiver<()>>,
        panics: bool,
    }

    impl TestJob {
        fn new(n: u32, probe: &Arc<Probe>) -> Box<Self> {
            Box::new(Self {
                scan_id: ScanId::new(format!("job-{n}")).unwrap(),
                probe: Arc::clone(probe),
                started: None,
                gate: None,
                panics: false,
            })
        }

        /// A job that signals when it starts and then waits for the gate.
        fn blocking(n: u32, probe: &Arc<Probe>) -> (Box<Self>, Receiver<()>, Sender<()>) {
            let (started_tx, started_rx) = mpsc::channel();
            let (gate_tx, gate_rx) = mpsc::channel();
            let mut job = Self::new(n, probe);
            job.started = Some(started_tx);
            job.gate = Some(gate_rx);
            (job, started_rx, gate_tx)
        }
    }

    impl Job for TestJob {
        fn scan_id(&self) -> &ScanId {
            &self.scan_id
        }

        fn run(self: Box<Self>) {
            if let Some(started) = &self.started {
                started.send(()).unwrap();
            }
            if let Some(gate) = &self.gate {
                gate.recv().unwrap();
            }
            assert!(!self.panics, "job {} exploded", self.scan_id);
            self.probe
                .outcomes
                .lock()
                .unwrap()
                .push(Outcome::Ran(self.scan_id.to_string()));
        }

        fn cancel(self: Box<Self>) {
            self.probe
                .outcomes
                .lock()
                .unwrap()
                .push(Outcome::Cancelled(self.scan_id.to_string()));
        }
    }

    #[test]
    fn runs_every_job() {
        let probe = Arc::new(Probe::default());
        let pool = WorkerPool::new(PoolConfig::new(4, 64)).unwrap();
        for n in 0..40 {
            pool.submit(TestJob::new(n, &probe)).unwrap();
        }
        pool.shutdown();
        assert_eq!(probe.ran(), 40);
        assert_eq!(pool.queued(), 0);
        assert_eq!(pool.running(), 0);
    }

    #[test]
    fn full_queue_rejects_and_cancels() {
        let probe = Arc::new(Probe::default());
        let pool = WorkerPool::new(PoolConfig::new(1, 1)).unwrap();

        let (first, started, gate) = TestJob::blocking(0, &probe);
        pool.submit(first).unwrap();
        started.recv_timeout(Duration::from_secs(10)).unwrap();

        pool.submit(TestJob::new(1, &probe)).unwrap();
        let err = pool.submit(TestJob::new(2, &probe)).unwrap_err();
        assert!(matches!(err, JobError::QueueFull { capacity: 1 }));
        assert_eq!(probe.outcomes(), [Outcome::Cancelled("job-2".to_string())]);

        gate.send(()).unwrap();
        pool.shutdown();
        assert_eq!(probe.ran(), 2);
        assert_eq!(probe.cancelled(), 1);
    }

    #[test]
    fn shutdown_drains_queue() {
        let probe = Arc::new(Probe::default());
        let pool = WorkerPool::new(PoolConfig::new(1, 8)).unwrap();

        let (first, started, gate) = TestJob::blocking(0, &probe);
        pool.submit(first).unwrap();
        started.recv_timeout(Duration::from_secs(10)).unwrap();
        for n in 1..=3 {
            pool.submit(TestJob::new(n, &probe)).unwrap();
        }
        assert_eq!(pool.queued(), 3);
        assert_eq!(pool.running(), 1);

        gate.send(()).unwrap();
        pool.shutdown();
        assert_eq!(probe.ran(), 4);
        assert_eq!(probe.cancelled(), 0);
    }

    #[test]
    fn shutdown_now_cancels_queued_jobs() {
        let probe = Arc::new(Probe::default());
        let pool = WorkerPool::new(PoolConfig::new(1, 8)).unwrap();

        let (first, started, gate) = TestJob::blocking(0, &probe);
        pool.submit(first).unwrap();
        started.recv_timeout(Duration::from_secs(10)).unwrap();
        for n in 1..=3 {
            pool.submit(TestJob::new(n, &probe)).unwrap();
        }

        let release = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            gate.send(()).unwrap();
        });
        let cancelled = pool.shutdown_now();
        release.join().unwrap();

        assert_eq!(cancelled, 3);
        assert_eq!(probe.outcomes()[0], Outcome::Ran("job-0".to_string()));
        assert_eq!(probe.cancelled(), 3);
    }

    #[test]
    fn submit_after_shutdown_cancels() {
        let probe = Arc::new(Probe::default());
        let pool = WorkerPool::new(PoolConfig::default()).unwrap();
        pool.shutdown();
        pool.shutdown();

        let err = pool.submit(TestJob::new(0, &probe)).unwrap_err();
        assert!(matches!(err, JobError::ShutDown));
        assert_eq!(probe.outcomes(), [Outcome::Cancelled("job-0".to_string())]);
    }

    #[test]
    fn panicking_job_does_not_kill_worker() {
        let probe = Arc::new(Probe::default());
        let pool = WorkerPool::new(PoolConfig::new(1, 4)).unwrap();

        let mut bad = TestJob::new(0, &probe);
        bad.panics = true;
        pool.submit(bad).unwrap();
        pool.submit(TestJob::new(1, &probe)).unwrap();
        pool.shutdown();

        assert_eq!(probe.outcomes(), [Outcome::Ran("job-1".to_string())]);
    }

    #[test]
    fn rejects_bad_config() {
        assert!(PoolConfig::new(0, 4).validate().is_err());
        assert!(PoolConfig::new(MAX_WORKERS + 1, 4).validate().is_err());
        assert!(PoolConfig::new(2, 0).validate().is_err());
        assert!(PoolConfig::new(2, 1).validate().is_ok());
        assert!(matches!(
            WorkerPool::new(PoolConfig::new(0, 1)),
            Err(JobError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn worker_threads_are_named() {
        let (tx, rx) = mpsc::channel();
        struct NameJob(ScanId, Sender<Option<String>>);
        impl Job for NameJob {
            fn scan_id(&self) -> &ScanId {
                &self.0
            }
            fn run(self: Box<Self>) {
                let name = thread::current().name().map(str::to_owned);
                self.1.send(name).unwrap();
            }
            fn cancel(self: Box<Self>) {}
        }

        let pool = WorkerPool::new(PoolConfig::new(1, 1)).unwrap();
        pool.submit(Box::new(NameJob(ScanId::new("n").unwrap(), tx)))
            .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(name.as_deref(), Some("scan-worker-0"));
    }
}
