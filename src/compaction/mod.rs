//! # Compaction Module
//!
//! Priority-driven background execution for the two maintenance tasks of
//! the LSM tree:
//!
//! - **Level-0 flush** — streams the oldest immutable memtable into a new
//!   level-0 SSTable, registers it, and prunes WAL segments that are now
//!   fully covered ([`flush`]).
//! - **Level-N merge** — k-way merges the selected source files with the
//!   overlapping files of the next level, keeping the newest version of
//!   every key and dropping tombstones at the bottom level ([`merge`]).
//!
//! ## Scheduling contract
//!
//! Tasks enter a priority queue (higher priority first, ties broken by
//! submission order) drained by a fixed pool of worker threads that dequeue
//! with a timeout so shutdown never hangs. [`Scheduler::trigger_check`]
//! scans the memtable manager and the level manager and submits at most one
//! task per actionable condition — in-flight input tagging guarantees two
//! tasks never hold the same memtable or overlapping input files, which is
//! what lets disjoint compactions run in parallel.
//!
//! Every task carries a completion slot (a bounded crossbeam channel); the
//! returned [`TaskHandle`] waits on it instead of polling.
//!
//! ## Failure semantics
//!
//! A failed task records its error in the stats, unlinks its partial
//! outputs, and leaves its inputs live so the next trigger retries. A
//! failed manifest update is fatal: the engine stops accepting writes.
//!
//! ## Shutdown
//!
//! `shutdown` stops intake, cancels everything still queued, wakes the
//! workers, and waits a bounded grace period for them to finish their
//! current task. Workers that overrun the grace period are abandoned — any
//! partially written output has no footer and is swept on the next open.

pub mod flush;
pub mod merge;

#[cfg(test)]
mod tests;

use std::{
    collections::{BinaryHeap, HashSet},
    io,
    path::PathBuf,
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{Receiver, Sender, bounded, unbounded};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::level::{CompactionSelection, LevelError, LevelManager};
use crate::manifest::{Manifest, ManifestError};
use crate::memtable::{Memtable, MemtableError, manager::MemtableManager};
use crate::sstable::{BlockCache, SstError, builder::BuildOptions};
use crate::wal::{Wal, WalError};

/// How long a worker sleeps on the queue condvar before rechecking the
/// shutdown flag.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors produced by compaction tasks and the scheduler.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// Memtable failure while flushing.
    #[error("memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// SSTable build or read failure.
    #[error("sstable error: {0}")]
    Sst(#[from] SstError),

    /// Manifest update failure (fatal to the engine).
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Level bookkeeping failure.
    #[error("level error: {0}")]
    Level(#[from] LevelError),

    /// WAL pruning failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Waiting on a task exceeded the configured bound.
    #[error("timed out waiting for task completion")]
    Timeout,

    /// The task was cancelled by shutdown before completion.
    #[error("task cancelled by shutdown")]
    Cancelled,

    /// Scheduler is not accepting tasks.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Shared task context
// ------------------------------------------------------------------------------------------------

/// Everything a worker needs to execute flush and merge tasks.
pub(crate) struct CompactionCtx {
    /// Directory holding the SSTable files.
    pub data_dir: PathBuf,

    pub manifest: Arc<Manifest>,
    pub levels: Arc<LevelManager>,
    pub memtables: Arc<MemtableManager>,

    /// `None` when the WAL is disabled.
    pub wal: Option<Arc<Wal>>,

    pub cache: Option<Arc<BlockCache>>,
    pub build_options: BuildOptions,

    /// Target size for each merge output file.
    pub target_file_size: u64,

    /// Immutable-queue capacity, used to grade flush priority.
    pub max_immutable_count: usize,

    pub stats: Arc<SchedulerStats>,

    /// Set when a manifest update fails; the engine refuses further writes.
    pub fatal: Arc<AtomicBool>,

    /// Cooperative cancellation flag checked inside long merges.
    pub shutdown: Arc<AtomicBool>,
}

// ------------------------------------------------------------------------------------------------
// Stats
// ------------------------------------------------------------------------------------------------

/// Scheduler counters, updated by workers and snapshotted by `Db::stats`.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    pub(crate) tasks_submitted: AtomicU64,
    pub(crate) tasks_completed: AtomicU64,
    pub(crate) tasks_failed: AtomicU64,
    pub(crate) flush_count: AtomicU64,
    pub(crate) merge_count: AtomicU64,
    pub(crate) bytes_compacted: AtomicU64,
}

/// Point-in-time copy of the scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStatsSnapshot {
    /// Tasks accepted by the queue.
    pub tasks_submitted: u64,
    /// Tasks that ran to completion.
    pub tasks_completed: u64,
    /// Tasks that failed (inputs stay live for retry).
    pub tasks_failed: u64,
    /// Completed level-0 flushes.
    pub flush_count: u64,
    /// Completed level-N merges.
    pub merge_count: u64,
    /// Input bytes consumed by completed merges.
    pub bytes_compacted: u64,
}

impl SchedulerStats {
    /// Captures the current counter values.
    pub fn snapshot(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            flush_count: self.flush_count.load(Ordering::Relaxed),
            merge_count: self.merge_count.load(Ordering::Relaxed),
            bytes_compacted: self.bytes_compacted.load(Ordering::Relaxed),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Tasks
// ------------------------------------------------------------------------------------------------

/// Dequeue priority; higher values run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPriority {
    /// Housekeeping with no pressure behind it.
    Low = 0,
    /// Routine flush or merge.
    Normal = 1,
    /// A level is over its trigger.
    High = 2,
    /// Writers are (or are about to be) blocked on this work.
    Urgent = 3,
}

/// What a task does.
pub(crate) enum TaskKind {
    /// Flush one immutable memtable to a level-0 SSTable.
    Level0Flush { memtable: Arc<Memtable> },

    /// Merge source files into the next level.
    LevelN { selection: CompactionSelection },
}

/// Terminal state of a task, delivered through its completion slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task ran to completion.
    Completed,
    /// The task failed; the message carries the error chain.
    Failed(String),
    /// The task was cancelled by shutdown before running.
    Cancelled,
}

/// Inputs claimed by an in-flight task, released when it finishes.
#[derive(Debug, Clone, Default)]
struct TaskTags {
    /// Raw pointer identity of the memtable being flushed.
    memtable: Option<usize>,

    /// `(level, file_id)` of every claimed input file.
    files: Vec<(u8, u32)>,
}

struct Task {
    id: u64,
    kind: TaskKind,
    tags: TaskTags,
    done: Sender<TaskOutcome>,
}

/// Completion slot for a submitted task.
pub struct TaskHandle {
    /// Task id, unique per scheduler.
    pub id: u64,
    rx: Receiver<TaskOutcome>,
}

impl TaskHandle {
    /// Blocks until the task reaches a terminal state or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Result<TaskOutcome, CompactionError> {
        self.rx.recv_timeout(timeout).map_err(|_| CompactionError::Timeout)
    }
}

struct QueuedTask {
    priority: TaskPriority,
    submission: u64,
    task: Task,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.submission == other.submission
    }
}
impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority first, then earlier submission.
        self.priority
            .cmp(&other.priority)
            .then(other.submission.cmp(&self.submission))
    }
}

// ------------------------------------------------------------------------------------------------
// Scheduler
// ------------------------------------------------------------------------------------------------

struct SchedulerQueue {
    heap: BinaryHeap<QueuedTask>,
    next_submission: u64,
    next_task_id: u64,
    accepting: bool,
}

struct InFlight {
    memtables: HashSet<usize>,
    files: HashSet<(u8, u32)>,
}

struct SchedulerShared {
    ctx: CompactionCtx,
    queue: Mutex<SchedulerQueue>,
    queue_cv: Condvar,
    in_flight: Mutex<InFlight>,
    shutdown: Arc<AtomicBool>,
    worker_exited_tx: Sender<usize>,
    worker_exited_rx: Receiver<usize>,
}

/// Priority work queue plus a fixed worker pool.
pub(crate) struct Scheduler {
    shared: Arc<SchedulerShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Starts `worker_count` background workers over the given context.
    pub(crate) fn start(ctx: CompactionCtx, worker_count: usize) -> Self {
        let shutdown = Arc::clone(&ctx.shutdown);
        let (worker_exited_tx, worker_exited_rx) = unbounded();
        let shared = Arc::new(SchedulerShared {
            ctx,
            queue: Mutex::new(SchedulerQueue {
                heap: BinaryHeap::new(),
                next_submission: 0,
                next_task_id: 1,
                accepting: true,
            }),
            queue_cv: Condvar::new(),
            in_flight: Mutex::new(InFlight {
                memtables: HashSet::new(),
                files: HashSet::new(),
            }),
            shutdown,
            worker_exited_tx,
            worker_exited_rx,
        });

        let mut workers = Vec::with_capacity(worker_count.max(1));
        for idx in 0..worker_count.max(1) {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("concord-compact-{idx}"))
                .spawn(move || worker_loop(shared, idx))
                .expect("failed to spawn compaction worker");
            workers.push(handle);
        }
        info!(workers = worker_count.max(1), "compaction scheduler started");

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Scans the memtable manager and the level manager and submits at most
    /// one task per actionable condition. Safe to call from any thread.
    pub(crate) fn trigger_check(&self) {
        self.shared.trigger_check();
    }

    /// Submits a task unless one of its inputs is already claimed by an
    /// in-flight task. Returns `Ok(None)` on such a conflict.
    pub(crate) fn try_submit(
        &self,
        kind: TaskKind,
        priority: TaskPriority,
    ) -> Result<Option<TaskHandle>, CompactionError> {
        self.shared.try_submit(kind, priority)
    }

    /// Stops intake, cancels queued tasks, and waits up to `grace` for the
    /// workers to finish their current task. Overrunning workers are
    /// abandoned with a warning.
    pub(crate) fn shutdown(&self, grace: Duration) {
        let shared = &self.shared;
        shared.shutdown.store(true, Ordering::Release);

        // Stop intake and cancel everything still queued.
        if let Ok(mut queue) = shared.queue.lock() {
            queue.accepting = false;
            while let Some(queued) = queue.heap.pop() {
                release_tags(shared, &queued.task.tags);
                let _ = queued.task.done.send(TaskOutcome::Cancelled);
            }
        }
        shared.queue_cv.notify_all();

        let worker_count = self.workers.lock().map(|w| w.len()).unwrap_or(0);
        let deadline = std::time::Instant::now() + grace;
        let mut exited = 0usize;
        while exited < worker_count {
            let now = std::time::Instant::now();
            if now >= deadline {
                warn!(
                    exited,
                    workers = worker_count,
                    "shutdown grace period elapsed; abandoning remaining workers"
                );
                return;
            }
            match shared.worker_exited_rx.recv_timeout(deadline - now) {
                Ok(_) => exited += 1,
                Err(_) => {
                    warn!(
                        exited,
                        workers = worker_count,
                        "shutdown grace period elapsed; abandoning remaining workers"
                    );
                    return;
                }
            }
        }

        if let Ok(mut workers) = self.workers.lock() {
            for handle in workers.drain(..) {
                let _ = handle.join();
            }
        }
        info!("compaction scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // A dropped scheduler that was never shut down must not strand its
        // workers; wake them so they observe the flag and exit.
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.queue_cv.notify_all();
    }
}

/// Claims the inputs a task will hold.
fn tags_for(kind: &TaskKind) -> TaskTags {
    match kind {
        TaskKind::Level0Flush { memtable } => TaskTags {
            memtable: Some(Arc::as_ptr(memtable) as usize),
            files: Vec::new(),
        },
        TaskKind::LevelN { selection } => TaskTags {
            memtable: None,
            files: selection
                .inputs
                .iter()
                .chain(selection.overlaps.iter())
                .map(|f| (f.level, f.file_id))
                .collect(),
        },
    }
}

fn release_tags(shared: &SchedulerShared, tags: &TaskTags) {
    if let Ok(mut in_flight) = shared.in_flight.lock() {
        if let Some(ptr) = tags.memtable {
            in_flight.memtables.remove(&ptr);
        }
        for id in &tags.files {
            in_flight.files.remove(id);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Worker loop
// ------------------------------------------------------------------------------------------------

fn worker_loop(shared: Arc<SchedulerShared>, idx: usize) {
    debug!(worker = idx, "compaction worker started");

    loop {
        let queued = {
            let mut queue = match shared.queue.lock() {
                Ok(g) => g,
                Err(_) => break,
            };
            loop {
                if let Some(task) = queue.heap.pop() {
                    break Some(task);
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    break None;
                }
                queue = match shared.queue_cv.wait_timeout(queue, DEQUEUE_TIMEOUT) {
                    Ok((guard, _)) => guard,
                    Err(_) => break None,
                };
            }
        };

        let Some(queued) = queued else { break };
        execute_task(&shared, queued.task);
    }

    debug!(worker = idx, "compaction worker exited");
    let _ = shared.worker_exited_tx.send(idx);
}

fn execute_task(shared: &SchedulerShared, task: Task) {
    let ctx = &shared.ctx;
    let result = match &task.kind {
        TaskKind::Level0Flush { memtable } => flush::run_flush(ctx, Arc::clone(memtable)),
        TaskKind::LevelN { selection } => merge::run_merge(ctx, selection),
    };

    release_tags(shared, &task.tags);

    match result {
        Ok(()) => {
            ctx.stats.tasks_completed.fetch_add(1, Ordering::Relaxed);
            let _ = task.done.send(TaskOutcome::Completed);
        }
        Err(CompactionError::Cancelled) => {
            ctx.stats.tasks_failed.fetch_add(1, Ordering::Relaxed);
            let _ = task.done.send(TaskOutcome::Cancelled);
        }
        Err(e) => {
            ctx.stats.tasks_failed.fetch_add(1, Ordering::Relaxed);
            error!(task = task.id, error = %e, "compaction task failed");
            let _ = task.done.send(TaskOutcome::Failed(e.to_string()));
        }
    }

    // Cascade: the finished task may have made another condition actionable
    // (a drained memtable, a now-over-budget target level).
    if !shared.shutdown.load(Ordering::Acquire) {
        shared.trigger_check();
    }
}

// ------------------------------------------------------------------------------------------------
// Shared scheduler logic (reachable from workers without the pool handle)
// ------------------------------------------------------------------------------------------------

impl SchedulerShared {
    /// Scans the memtable manager and the level manager and submits at most
    /// one task per actionable condition.
    fn trigger_check(&self) {
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        let ctx = &self.ctx;

        // Flush condition: an immutable memtable is waiting.
        match ctx.memtables.oldest_immutable() {
            Ok(Some(oldest)) => {
                let queued = ctx.memtables.immutable_count().unwrap_or(0);
                let priority = if queued >= ctx.max_immutable_count {
                    TaskPriority::Urgent
                } else if queued > ctx.max_immutable_count / 2 {
                    TaskPriority::High
                } else {
                    TaskPriority::Normal
                };
                let _ = self.try_submit(TaskKind::Level0Flush { memtable: oldest }, priority);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "trigger check: memtable manager unavailable"),
        }

        // Merge conditions: one candidate per over-budget level.
        for level in 0..ctx.levels.max_levels().saturating_sub(1) {
            let score = match ctx.levels.compaction_score(level) {
                Ok(s) => s,
                Err(e) => {
                    warn!(level, error = %e, "trigger check: level score unavailable");
                    continue;
                }
            };
            if score < 1.0 {
                continue;
            }
            let selection = match ctx.levels.select_victim(level) {
                Ok(Some(s)) => s,
                Ok(None) => continue,
                Err(e) => {
                    warn!(level, error = %e, "trigger check: victim selection failed");
                    continue;
                }
            };
            let priority = if score >= 2.0 {
                TaskPriority::Urgent
            } else {
                TaskPriority::High
            };
            let _ = self.try_submit(TaskKind::LevelN { selection }, priority);
        }
    }

    /// Enqueues `kind` unless one of its inputs is already claimed.
    fn try_submit(
        &self,
        kind: TaskKind,
        priority: TaskPriority,
    ) -> Result<Option<TaskHandle>, CompactionError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(CompactionError::InvalidState(
                "scheduler is shutting down".into(),
            ));
        }

        let tags = tags_for(&kind);
        {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| CompactionError::Internal("in-flight lock poisoned".into()))?;

            let memtable_conflict = tags
                .memtable
                .is_some_and(|ptr| in_flight.memtables.contains(&ptr));
            let file_conflict = tags.files.iter().any(|id| in_flight.files.contains(id));
            if memtable_conflict || file_conflict {
                debug!("task submission skipped: inputs already claimed");
                return Ok(None);
            }

            if let Some(ptr) = tags.memtable {
                in_flight.memtables.insert(ptr);
            }
            in_flight.files.extend(tags.files.iter().copied());
        }

        let (done_tx, done_rx) = bounded(1);
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| CompactionError::Internal("queue lock poisoned".into()))?;
        if !queue.accepting {
            drop(queue);
            release_tags(self, &tags);
            return Err(CompactionError::InvalidState(
                "scheduler is not accepting tasks".into(),
            ));
        }

        let id = queue.next_task_id;
        queue.next_task_id += 1;
        let submission = queue.next_submission;
        queue.next_submission += 1;

        queue.heap.push(QueuedTask {
            priority,
            submission,
            task: Task {
                id,
                kind,
                tags,
                done: done_tx,
            },
        });
        drop(queue);

        self.ctx.stats.tasks_submitted.fetch_add(1, Ordering::Relaxed);
        self.queue_cv.notify_one();
        Ok(Some(TaskHandle { id, rx: done_rx }))
    }
}
