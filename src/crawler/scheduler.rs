//! Task scheduler with bounded concurrency and retry
//!
//! This module handles:
//! - The task table and the FIFO queue of runnable tasks
//! - Global concurrency limiting via a semaphore slot pool
//! - Dispatching tasks to a fixed pool of workers
//! - Classifying executor outcomes and scheduling retries with backoff
//! - Draining on `close()` and cancelling on `shutdown()`
//!
//! The dispatch loop acquires a slot before it dequeues, so a task is only
//! taken off the queue once a worker can start it. The slot travels with the
//! task to the worker and is released after the outcome is recorded.

use crate::config::CrawlerConfig;
use crate::crawler::retry::RetryPolicy;
use crate::model::{CrawlTask, FareRecord, TaskId, TaskParams};
use crate::output::RunSummary;
use crate::state::TaskStatus;
use crate::{FailureKind, SchedulerError, SchedulerResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::Span;

/// Runs one attempt of a task
///
/// Implemented by the crawl orchestrator, and by any closure
/// `Fn(CrawlTask) -> impl Future<Output = Result<Vec<FareRecord>, FailureKind>>`.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: CrawlTask) -> Result<Vec<FareRecord>, FailureKind>;
}

#[async_trait]
impl<F, Fut> TaskExecutor for F
where
    F: Fn(CrawlTask) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<FareRecord>, FailureKind>> + Send + 'static,
{
    async fn execute(&self, task: CrawlTask) -> Result<Vec<FareRecord>, FailureKind> {
        (self)(task).await
    }
}

/// A dequeued task together with the slot it runs in
struct Dispatch {
    task_id: TaskId,
    _slot: OwnedSemaphorePermit,
}

type TaskEntry = Arc<Mutex<CrawlTask>>;

/// Scheduler owns every task and drives them to a terminal status
///
/// The scheduler coordinates:
/// - At most `max_concurrency` executor calls at any time
/// - FIFO ordering of queued tasks, retries re-entering at the back
/// - Bounded retries of transient failures with exponential backoff
pub struct TaskScheduler {
    /// Task table; the map is only write-locked to insert
    tasks: RwLock<HashMap<TaskId, TaskEntry>>,

    /// Runnable task ids in FIFO order
    queue_tx: mpsc::UnboundedSender<TaskId>,

    /// Receiving end of the queue, taken by the one `run` call
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<TaskId>>>,

    executor: Mutex<Option<Arc<dyn TaskExecutor>>>,

    policy: RetryPolicy,

    /// Tasks not yet in a terminal status
    outstanding: AtomicUsize,

    closed: AtomicBool,

    /// Fires once closed with nothing outstanding
    drained: CancellationToken,

    /// Fires on `shutdown()`
    cancel: CancellationToken,

    running: AtomicUsize,
    peak_running: AtomicUsize,

    span: Span,
}

impl TaskScheduler {
    /// Creates a scheduler with the given retry policy
    pub fn new(policy: RetryPolicy) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        Self {
            tasks: RwLock::new(HashMap::new()),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            executor: Mutex::new(None),
            policy,
            outstanding: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            drained: CancellationToken::new(),
            cancel: CancellationToken::new(),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
            span: tracing::info_span!("scheduler"),
        }
    }

    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self::new(RetryPolicy::from_config(config))
    }

    /// Logs under `span` instead of the default `scheduler` span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sets the executor every task is run with
    pub async fn register_executor(&self, executor: Arc<dyn TaskExecutor>) {
        *self.executor.lock().await = Some(executor);
    }

    /// Adds a task to the back of the queue
    ///
    /// # Errors
    ///
    /// * `DuplicateTask` - a task with this id exists; it is left untouched
    /// * `Closed` - `close()` or `shutdown()` was called
    pub async fn enqueue(&self, task: CrawlTask) -> SchedulerResult<TaskId> {
        let mut tasks = self.tasks.write().await;

        if self.closed.load(Ordering::SeqCst) {
            return Err(SchedulerError::Closed);
        }

        if tasks.contains_key(&task.id) {
            return Err(SchedulerError::DuplicateTask(task.id));
        }

        if task.status != TaskStatus::Queued {
            return Err(SchedulerError::InvalidTransition {
                task: task.id.clone(),
                from: task.status,
                to: TaskStatus::Queued,
            });
        }

        let id = task.id.clone();
        if self.queue_tx.send(id.clone()).is_err() {
            return Err(SchedulerError::Closed);
        }

        tasks.insert(id.clone(), Arc::new(Mutex::new(task)));
        self.outstanding.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(parent: &self.span, task = %id, "Task queued");
        Ok(id)
    }

    /// Enqueues a new task with a generated id
    pub async fn enqueue_params(&self, params: TaskParams) -> SchedulerResult<TaskId> {
        self.enqueue(CrawlTask::with_generated_id(params)).await
    }

    /// Stops accepting tasks; `run` returns once the queue drains
    pub async fn close(&self) {
        {
            let _tasks = self.tasks.write().await;
            self.closed.store(true, Ordering::SeqCst);
        }

        if self.outstanding.load(Ordering::SeqCst) == 0 {
            self.drained.cancel();
        }
    }

    /// Cancels all remaining work
    ///
    /// Queued tasks and tasks waiting out a backoff become Failed with
    /// `FailureKind::Cancelled`. Executor calls already in flight finish.
    pub async fn shutdown(&self) {
        tracing::info!(parent: &self.span, "Shutdown requested");
        self.close().await;
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of executor calls in flight
    pub fn running_count(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous executor calls observed
    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }

    /// Closes the scheduler, then runs it to completion
    pub async fn run_all(self: &Arc<Self>, max_concurrency: usize) -> SchedulerResult<RunSummary> {
        self.close().await;
        self.run(max_concurrency).await
    }

    /// Runs queued tasks with `max_concurrency` workers
    ///
    /// Returns after the scheduler is closed and every task has reached a
    /// terminal status. Tasks may still be enqueued while this runs, up to
    /// `close()`.
    ///
    /// # Errors
    ///
    /// * `NoExecutor` - `register_executor` was never called
    /// * `AlreadyRunning` - `run` was already called on this scheduler
    pub async fn run(self: &Arc<Self>, max_concurrency: usize) -> SchedulerResult<RunSummary> {
        let executor = self
            .executor
            .lock()
            .await
            .clone()
            .ok_or(SchedulerError::NoExecutor)?;

        let mut queue = self
            .queue_rx
            .lock()
            .await
            .take()
            .ok_or(SchedulerError::AlreadyRunning)?;

        let max_concurrency = max_concurrency.max(1);
        let started = Instant::now();

        tracing::info!(parent: &self.span, max_concurrency, "Starting workers");

        let slots = Arc::new(Semaphore::new(max_concurrency));
        let (dispatch_tx, dispatch_rx) = mpsc::channel::<Dispatch>(max_concurrency);
        let dispatch_rx = Arc::new(Mutex::new(dispatch_rx));

        let workers: Vec<_> = (0..max_concurrency)
            .map(|worker| {
                let scheduler = Arc::clone(self);
                let executor = Arc::clone(&executor);
                let dispatch_rx = Arc::clone(&dispatch_rx);
                tokio::spawn(async move {
                    loop {
                        let next = dispatch_rx.lock().await.recv().await;
                        match next {
                            Some(dispatch) => scheduler.process(dispatch, &executor).await,
                            None => break,
                        }
                    }
                    tracing::trace!(parent: &scheduler.span, worker, "Worker exiting");
                })
            })
            .collect();

        loop {
            let slot = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.drained.cancelled() => break,
                slot = Arc::clone(&slots).acquire_owned() => match slot {
                    Ok(slot) => slot,
                    Err(_) => break,
                },
            };

            let task_id = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.drained.cancelled() => break,
                next = queue.recv() => match next {
                    Some(task_id) => task_id,
                    None => break,
                },
            };

            let dispatch = Dispatch {
                task_id,
                _slot: slot,
            };
            if dispatch_tx.send(dispatch).await.is_err() {
                break;
            }
        }

        drop(dispatch_tx);
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(parent: &self.span, "Worker task failed: {}", e);
            }
        }

        // Whatever is still queued never got a slot
        queue.close();
        while let Some(task_id) = queue.recv().await {
            self.cancel_queued(&task_id).await;
        }

        self.drained.cancelled().await;

        let summary = RunSummary::from_tasks(
            &self.snapshot().await,
            self.peak_running(),
            started.elapsed(),
        );

        tracing::info!(
            parent: &self.span,
            succeeded = summary.succeeded,
            failed = summary.failed,
            records = summary.records,
            "Run finished"
        );

        Ok(summary)
    }

    /// Current status of a task
    pub async fn task_status(&self, id: &TaskId) -> SchedulerResult<TaskStatus> {
        let entry = self.entry(id).await?;
        let task = entry.lock().await;
        Ok(task.status)
    }

    /// Records of a task; `Some` only once it has succeeded
    pub async fn task_result(&self, id: &TaskId) -> SchedulerResult<Option<Vec<FareRecord>>> {
        let entry = self.entry(id).await?;
        let task = entry.lock().await;
        Ok(task.finished_result().map(<[FareRecord]>::to_vec))
    }

    /// Full copy of a task
    pub async fn task(&self, id: &TaskId) -> SchedulerResult<CrawlTask> {
        let entry = self.entry(id).await?;
        let task = entry.lock().await;
        Ok(task.clone())
    }

    /// Copies of every task, in no particular order
    pub async fn snapshot(&self) -> Vec<CrawlTask> {
        let entries: Vec<TaskEntry> = self.tasks.read().await.values().cloned().collect();

        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries {
            tasks.push(entry.lock().await.clone());
        }
        tasks
    }

    async fn entry(&self, id: &TaskId) -> SchedulerResult<TaskEntry> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownTask(id.clone()))
    }

    /// Runs one dispatched task and records the outcome
    async fn process(self: &Arc<Self>, dispatch: Dispatch, executor: &Arc<dyn TaskExecutor>) {
        let task_id = dispatch.task_id.clone();

        let entry = match self.entry(&task_id).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(parent: &self.span, "Dropping dispatch: {}", e);
                return;
            }
        };

        let snapshot = {
            let mut task = entry.lock().await;

            if self.cancel.is_cancelled() {
                self.fail(&mut task, cancelled());
                return;
            }

            if let Err(e) = task.mark_running(Utc::now()) {
                tracing::warn!(parent: &self.span, "Cannot start task: {}", e);
                return;
            }
            task.clone()
        };

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(running, Ordering::SeqCst);

        tracing::debug!(
            parent: &self.span,
            task = %task_id,
            attempt = snapshot.attempts,
            "Executing task"
        );

        // A panicking executor fails its task instead of taking the worker down
        let call = {
            let executor = Arc::clone(executor);
            tokio::spawn(async move { executor.execute(snapshot).await })
        };
        let outcome = match call.await {
            Ok(outcome) => outcome,
            Err(e) => Err(FailureKind::Rejected(format!("executor panicked: {}", e))),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);

        self.record_outcome(&entry, outcome).await;
        drop(dispatch);
    }

    async fn record_outcome(
        self: &Arc<Self>,
        entry: &TaskEntry,
        outcome: Result<Vec<FareRecord>, FailureKind>,
    ) {
        let now = Utc::now();
        let mut task = entry.lock().await;

        let recorded = match outcome {
            Ok(records) => {
                tracing::info!(
                    parent: &self.span,
                    task = %task.id,
                    records = records.len(),
                    "Task succeeded"
                );
                task.mark_succeeded(records, now).map(|_| self.settle())
            }

            Err(kind) if kind.is_empty_outcome() => {
                tracing::info!(parent: &self.span, task = %task.id, "Task found no fares: {}", kind);
                task.mark_succeeded(Vec::new(), now).map(|_| self.settle())
            }

            Err(kind) if kind.is_transient() && self.policy.should_retry(task.attempts) => {
                let delay = self.policy.backoff_for(task.attempts.saturating_sub(1));
                tracing::warn!(
                    parent: &self.span,
                    task = %task.id,
                    attempt = task.attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Task failed, retrying: {}",
                    kind
                );
                task.mark_retrying(kind, now)
                    .map(|_| self.schedule_retry(Arc::clone(entry), delay))
            }

            Err(kind) => {
                tracing::error!(
                    parent: &self.span,
                    task = %task.id,
                    attempts = task.attempts,
                    "Task failed: {}",
                    kind
                );
                task.mark_failed(kind, now).map(|_| self.settle())
            }
        };

        if let Err(e) = recorded {
            tracing::error!(parent: &self.span, "Failed to record outcome: {}", e);
        }
    }

    /// Requeues a retrying task after `delay`, unless shut down first
    fn schedule_retry(self: &Arc<Self>, entry: TaskEntry, delay: Duration) {
        let scheduler = Arc::clone(self);

        tokio::spawn(async move {
            let was_cancelled = tokio::select! {
                biased;
                _ = scheduler.cancel.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };

            let mut task = entry.lock().await;

            if !was_cancelled
                && task.mark_requeued().is_ok()
                && scheduler.queue_tx.send(task.id.clone()).is_ok()
            {
                tracing::debug!(parent: &scheduler.span, task = %task.id, "Task requeued");
                return;
            }

            scheduler.fail(&mut task, cancelled());
        });
    }

    async fn cancel_queued(&self, task_id: &TaskId) {
        if let Ok(entry) = self.entry(task_id).await {
            let mut task = entry.lock().await;
            self.fail(&mut task, cancelled());
        }
    }

    fn fail(&self, task: &mut CrawlTask, failure: FailureKind) {
        tracing::debug!(parent: &self.span, task = %task.id, "Task cancelled");
        match task.mark_failed(failure, Utc::now()) {
            Ok(()) => self.settle(),
            Err(e) => tracing::warn!(parent: &self.span, "Cannot cancel task: {}", e),
        }
    }

    /// A task reached a terminal status
    fn settle(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.closed.load(Ordering::SeqCst) {
            self.drained.cancel();
        }
    }
}

fn cancelled() -> FailureKind {
    FailureKind::Cancelled("scheduler shut down".to_string())
}
