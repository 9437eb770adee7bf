//! Job scheduler (C7): a bounded worker pool multiplexing over named queues
//! with per-queue serialization, used to rate-limit expensive background
//! refreshes. Grounded on `rapina`'s `tokio::spawn` worker-task idiom,
//! generalized from "one task per request" to a fixed pool draining a
//! shared pending list under a single mutex (§4.6, §5: "C7 holds a single
//! mutex for the pending list and active set; job functions execute
//! outside the lock").

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

/// A unit of scheduled work: an async closure run with no argument, boxed
/// for storage in the pending list.
pub type JobFn = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

struct PendingJob {
    queue: String,
    job: JobFn,
}

struct SchedulerState {
    pending: Vec<PendingJob>,
    active: HashSet<String>,
}

/// Bounded worker pool, `Concurrency` workers wide, serializing jobs by
/// queue name (§4.6).
pub struct Scheduler {
    state: Arc<Mutex<SchedulerState>>,
    work_available: Arc<Notify>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// `concurrency == 0` means "number of CPU cores" (§6.3).
    pub fn new(concurrency: usize) -> Arc<Self> {
        let concurrency = if concurrency == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            concurrency
        };

        let scheduler = Arc::new(Self {
            state: Arc::new(Mutex::new(SchedulerState { pending: Vec::new(), active: HashSet::new() })),
            work_available: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
        });

        for _ in 0..concurrency {
            scheduler.clone().spawn_worker();
        }
        scheduler
    }

    fn spawn_worker(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = self.work_available.notified() => {}
                }

                let Some((queue, job)) = self.claim_job().await else { continue };

                job().await;

                let mut state = self.state.lock().await;
                state.active.remove(&queue);
                drop(state);
                self.work_available.notify_one();
            }
        });
    }

    /// Scans `pending` in order for the first job whose queue isn't
    /// currently running; removes and returns it, marking its queue active.
    async fn claim_job(&self) -> Option<(String, JobFn)> {
        let mut state = self.state.lock().await;
        let idx = state
            .pending
            .iter()
            .position(|j| !state.active.contains(&j.queue))?;
        let job = state.pending.remove(idx);
        state.active.insert(job.queue.clone());
        drop(state);
        self.work_available.notify_one();
        Some((job.queue, job.job))
    }

    /// Submits a one-shot job onto `queue`. Submission order equals
    /// execution order within a queue (FIFO, §5).
    pub async fn submit<F, Fut>(&self, queue: impl Into<String>, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: JobFn = Box::new(move || Box::pin(job()));
        let mut state = self.state.lock().await;
        state.pending.push(PendingJob { queue: queue.into(), job: boxed });
        drop(state);
        self.work_available.notify_one();
    }

    /// Submits a job that re-submits itself on the same queue after
    /// `interval`, until the scheduler is cancelled (§4.6).
    pub fn submit_periodic<F, Fut>(self: &Arc<Self>, queue: impl Into<String>, interval: Duration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let queue = queue.into();
        let scheduler = self.clone();
        let job = Arc::new(job);
        tokio::spawn(async move {
            loop {
                let job = job.clone();
                let (done_tx, done_rx) = tokio::sync::oneshot::channel();
                scheduler
                    .submit(queue.clone(), move || async move {
                        job().await;
                        let _ = done_tx.send(());
                    })
                    .await;

                tokio::select! {
                    _ = scheduler.cancel.cancelled() => return,
                    _ = done_rx => {}
                }

                tokio::select! {
                    _ = scheduler.cancel.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });
    }

    /// Stops workers from claiming further jobs. In-flight job futures run
    /// to completion; they are not force-cancelled beyond whatever
    /// cooperative cancellation their own body observes (§4.6).
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// A decorator that prefixes every submitted queue name with a fixed
/// string, materialized eagerly at construction (§9 Design Notes:
/// "submit-time work is a single string concatenation").
#[derive(Clone)]
pub struct PrefixedScheduler {
    inner: Arc<Scheduler>,
    prefix: String,
}

impl PrefixedScheduler {
    pub fn new(inner: Arc<Scheduler>, prefix: impl Into<String>) -> Self {
        Self { inner, prefix: prefix.into() }
    }

    /// Further prefixing composes by string concatenation.
    pub fn nested(&self, prefix: impl AsRef<str>) -> Self {
        Self { inner: self.inner.clone(), prefix: format!("{}{}", self.prefix, prefix.as_ref()) }
    }

    pub async fn submit<F, Fut>(&self, queue: impl AsRef<str>, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.submit(format!("{}{}", self.prefix, queue.as_ref()), job).await;
    }
}
