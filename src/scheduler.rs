//! Work Scheduler - deduplicating job queue and a fixed worker pool
//!
//! Jobs are keyed by path. At most one job per path is queued and at most
//! one runs; newer content arriving for a queued path replaces the queued
//! job, and newer content arriving for a running path is parked and queued
//! again once the running job finishes.

use crate::indexer::{IndexOutcome, Indexer};
use crate::Result;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A request to (re)index one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexJob {
    pub path: String,
    pub args: Vec<String>,
    /// Modification time the file is known to have
    pub mod_time: i64,
    /// Reparse even if the stored modification time is current
    pub force: bool,
}

impl IndexJob {
    pub fn new(path: impl Into<String>, args: Vec<String>, mod_time: i64) -> Self {
        Self {
            path: path.into(),
            args,
            mod_time,
            force: false,
        }
    }

    /// A job that reparses an unchanged file, e.g. after a header it
    /// includes changed
    pub fn forced(path: impl Into<String>, args: Vec<String>, mod_time: i64) -> Self {
        Self {
            force: true,
            ..Self::new(path, args, mod_time)
        }
    }

    /// Whether this job should replace one at `mod_time`/`force`
    fn supersedes(&self, mod_time: i64, force: bool) -> bool {
        self.mod_time > mod_time || (self.mod_time == mod_time && self.force && !force)
    }
}

/// What workers call for every job
pub trait JobHandler: Send + Sync + 'static {
    fn run(&self, job: &IndexJob) -> Result<IndexOutcome>;
}

impl JobHandler for Indexer {
    fn run(&self, job: &IndexJob) -> Result<IndexOutcome> {
        if job.force {
            self.reindex(&job.path, &job.args, job.mod_time)
        } else {
            self.index(&job.path, &job.args, job.mod_time)
        }
    }
}

struct InFlight {
    mod_time: i64,
    force: bool,
    parked: Option<IndexJob>,
}

#[derive(Default)]
struct QueueState {
    order: VecDeque<String>,
    queued: HashMap<String, IndexJob>,
    in_flight: HashMap<String, InFlight>,
    shutdown: bool,
}

impl QueueState {
    fn depth(&self) -> usize {
        self.queued.len()
            + self.in_flight.len()
            + self.in_flight.values().filter(|f| f.parked.is_some()).count()
    }

    fn is_drained(&self) -> bool {
        self.queued.is_empty() && self.in_flight.is_empty()
    }

    fn push(&mut self, job: IndexJob) {
        self.order.push_back(job.path.clone());
        self.queued.insert(job.path.clone(), job);
    }
}

struct Shared {
    state: Mutex<QueueState>,
    /// Signalled when a job is queued or on shutdown
    work: Condvar,
    /// Signalled when the queue drains
    drained: Condvar,
    status: Mutex<Vec<String>>,
    handler: Arc<dyn JobHandler>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, worker: usize, line: String) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = status.get_mut(worker) {
            *slot = line;
        }
    }

    fn next_job(&self) -> Option<IndexJob> {
        let mut state = self.state();
        loop {
            if state.shutdown {
                return None;
            }
            while let Some(path) = state.order.pop_front() {
                if let Some(job) = state.queued.remove(&path) {
                    state.in_flight.insert(
                        path,
                        InFlight {
                            mod_time: job.mod_time,
                            force: job.force,
                            parked: None,
                        },
                    );
                    return Some(job);
                }
            }
            state = self.work.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn finish(&self, path: &str) {
        let mut state = self.state();
        if let Some(parked) = state.in_flight.remove(path).and_then(|f| f.parked) {
            if !state.shutdown {
                state.push(parked);
                self.work.notify_one();
            }
        }
        if state.is_drained() {
            self.drained.notify_all();
        }
    }

    fn worker_loop(&self, worker: usize) {
        while let Some(job) = self.next_job() {
            self.set_status(worker, format!("Parsing {}", job.path));
            let result = panic::catch_unwind(AssertUnwindSafe(|| self.handler.run(&job)));
            let line = match result {
                Ok(Ok(IndexOutcome::ParseFailed(message))) => format!("Failed with {}", message),
                Ok(Ok(_)) => String::new(),
                Ok(Err(e)) => {
                    warn!("Indexing {} failed: {}", job.path, e);
                    format!("Failed with {}", e)
                }
                Err(_) => {
                    warn!("Indexing {} panicked", job.path);
                    "Failed with panic".to_string()
                }
            };
            self.set_status(worker, line);
            self.finish(&job.path);
        }
        debug!("Worker {} stopped", worker);
    }
}

/// Fixed pool of indexing threads fed by one deduplicating queue
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Default pool size: one and a half threads per CPU
    pub fn default_workers() -> usize {
        (num_cpus::get() * 3 / 2).max(1)
    }

    pub fn new(handler: Arc<dyn JobHandler>, workers: usize) -> Self {
        let workers = workers.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            work: Condvar::new(),
            drained: Condvar::new(),
            status: Mutex::new(vec![String::new(); workers]),
            handler,
        });

        let handles = (0..workers)
            .filter_map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("symdex-worker-{}", i))
                    .spawn(move || shared.worker_loop(i))
                    .map_err(|e| warn!("Failed to spawn worker {}: {}", i, e))
                    .ok()
            })
            .collect();
        info!("Started {} index workers", workers);

        Self {
            shared,
            workers: Mutex::new(handles),
        }
    }

    /// Queue a job. Returns `false` when the path is already queued or
    /// running with the same or newer modification time, unless only the
    /// new job is forced.
    pub fn enqueue(&self, job: IndexJob) -> bool {
        let mut state = self.shared.state();
        if state.shutdown {
            return false;
        }

        if let Some(running) = state.in_flight.get_mut(&job.path) {
            let (newest, forced) = running
                .parked
                .as_ref()
                .map_or((running.mod_time, running.force), |p| (p.mod_time, p.force));
            if !job.supersedes(newest, forced) {
                return false;
            }
            debug!("Parking {} until the running parse finishes", job.path);
            running.parked = Some(job);
            return true;
        }

        if let Some(queued) = state.queued.get_mut(&job.path) {
            if !job.supersedes(queued.mod_time, queued.force) {
                return false;
            }
            *queued = job;
            return true;
        }

        state.push(job);
        self.shared.work.notify_one();
        true
    }

    /// Jobs queued, running or parked behind a running job
    pub fn queue_depth(&self) -> usize {
        self.shared.state().depth()
    }

    pub fn is_drained(&self) -> bool {
        self.shared.state().is_drained()
    }

    /// Block until nothing is queued or running
    pub fn wait_until_drained(&self) {
        let mut state = self.shared.state();
        while !state.is_drained() && !state.shutdown {
            state = self
                .shared
                .drained
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// [`Self::wait_until_drained`] with a deadline; `true` if drained
    pub fn wait_until_drained_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state();
        while !state.is_drained() {
            let now = Instant::now();
            if now >= deadline || state.shutdown {
                return state.is_drained();
            }
            state = self
                .shared
                .drained
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        true
    }

    /// Status line of every busy or failed worker
    pub fn status(&self) -> Vec<String> {
        self.shared
            .status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|line| !line.is_empty())
            .cloned()
            .collect()
    }

    /// Drop queued jobs, let running ones finish, and join the workers
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.order.clear();
            state.queued.clear();
            self.shared.work.notify_all();
            self.shared.drained.notify_all();
        }

        let handles = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            if handle.join().is_err() {
                warn!("Index worker exited abnormally");
            }
        }
        info!("Index workers stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::{self, Receiver, Sender};

    /// Handler that reports each start and waits for a release token
    struct Gated {
        started: Mutex<Sender<IndexJob>>,
        release: Mutex<Receiver<()>>,
    }

    impl JobHandler for Gated {
        fn run(&self, job: &IndexJob) -> Result<IndexOutcome> {
            self.started.lock().unwrap().send(job.clone()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            Ok(IndexOutcome::UpToDate)
        }
    }

    fn gated(workers: usize) -> (Scheduler, Receiver<IndexJob>, Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let handler = Arc::new(Gated {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        });
        (Scheduler::new(handler, workers), started_rx, release_tx)
    }

    struct Counting {
        runs: AtomicUsize,
    }

    impl JobHandler for Counting {
        fn run(&self, _job: &IndexJob) -> Result<IndexOutcome> {
            thread::sleep(Duration::from_millis(2));
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(IndexOutcome::UpToDate)
        }
    }

    struct Failing;

    impl JobHandler for Failing {
        fn run(&self, _job: &IndexJob) -> Result<IndexOutcome> {
            Ok(IndexOutcome::ParseFailed("bad input".into()))
        }
    }

    fn job(path: &str, mod_time: i64) -> IndexJob {
        IndexJob::new(path, vec![], mod_time)
    }

    #[test]
    fn test_dedup_and_newer_content() {
        let (scheduler, started, release) = gated(1);

        assert!(scheduler.enqueue(job("/a.cpp", 1)));
        let first = started.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first, job("/a.cpp", 1));

        // Running path: equal time is a no-op, newer is parked once
        assert!(!scheduler.enqueue(job("/a.cpp", 1)));
        assert!(scheduler.enqueue(job("/a.cpp", 2)));
        assert!(!scheduler.enqueue(job("/a.cpp", 2)));

        // Queued path: older/equal is a no-op, newer replaces in place
        assert!(scheduler.enqueue(job("/b.cpp", 1)));
        assert!(!scheduler.enqueue(job("/b.cpp", 1)));
        assert!(scheduler.enqueue(job("/b.cpp", 3)));
        assert_eq!(scheduler.queue_depth(), 3);

        let mut runs = vec![first];
        for _ in 0..3 {
            release.send(()).unwrap();
        }
        for _ in 0..2 {
            runs.push(started.recv_timeout(Duration::from_secs(5)).unwrap());
        }
        assert!(scheduler.wait_until_drained_timeout(Duration::from_secs(5)));

        assert_eq!(runs, vec![job("/a.cpp", 1), job("/b.cpp", 3), job("/a.cpp", 2)]);
        assert_eq!(scheduler.queue_depth(), 0);
    }

    #[test]
    fn test_forced_job_supersedes_equal_time() {
        let (scheduler, started, release) = gated(1);

        assert!(scheduler.enqueue(job("/a.cpp", 5)));
        started.recv_timeout(Duration::from_secs(5)).unwrap();

        // Behind a running unforced job: one forced job parks, a second is a no-op
        assert!(scheduler.enqueue(IndexJob::forced("/a.cpp", vec![], 5)));
        assert!(!scheduler.enqueue(IndexJob::forced("/a.cpp", vec![], 5)));
        assert!(!scheduler.enqueue(job("/a.cpp", 5)));

        // Queued path: a forced job upgrades an unforced one in place
        assert!(scheduler.enqueue(job("/b.cpp", 3)));
        assert!(scheduler.enqueue(IndexJob::forced("/b.cpp", vec![], 3)));
        assert!(!scheduler.enqueue(job("/b.cpp", 3)));
        assert!(!scheduler.enqueue(IndexJob::forced("/b.cpp", vec![], 2)));

        for _ in 0..3 {
            release.send(()).unwrap();
        }
        let runs: Vec<IndexJob> = (0..2)
            .map(|_| started.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert!(scheduler.wait_until_drained_timeout(Duration::from_secs(5)));
        assert_eq!(
            runs,
            vec![IndexJob::forced("/b.cpp", vec![], 3), IndexJob::forced("/a.cpp", vec![], 5)]
        );
    }

    #[test]
    fn test_drain_barrier() {
        let handler = Arc::new(Counting {
            runs: AtomicUsize::new(0),
        });
        let scheduler = Scheduler::new(handler.clone(), 4);
        for i in 0..20 {
            assert!(scheduler.enqueue(job(&format!("/f{}.cpp", i), 1)));
        }

        scheduler.wait_until_drained();
        assert_eq!(handler.runs.load(Ordering::SeqCst), 20);
        assert_eq!(scheduler.queue_depth(), 0);
        assert!(scheduler.is_drained());
    }

    #[test]
    fn test_failure_status() {
        let scheduler = Scheduler::new(Arc::new(Failing), 1);
        scheduler.enqueue(job("/bad.cpp", 1));
        assert!(scheduler.wait_until_drained_timeout(Duration::from_secs(5)));
        assert_eq!(scheduler.status(), vec!["Failed with bad input".to_string()]);
    }

    #[test]
    fn test_shutdown_stops_accepting() {
        let scheduler = Scheduler::new(
            Arc::new(Counting {
                runs: AtomicUsize::new(0),
            }),
            2,
        );
        scheduler.shutdown();
        assert!(!scheduler.enqueue(job("/late.cpp", 1)));
        // Second shutdown is a no-op
        scheduler.shutdown();
    }
}
