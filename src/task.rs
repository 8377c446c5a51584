//! Registry for long-running build and export tasks.
//!
//! Each task owns a one-shot cancel flag polled cooperatively by its
//! worker thread. Counters are plain atomics so progress updates never
//! block snapshot readers; the remaining state sits behind a
//! reader-writer lock so snapshots are consistent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Serialize;

use crate::xdb::export::{export_with_searcher, ExportOptions};
use crate::xdb::maker::Maker;
use crate::xdb::searcher::Searcher;
use crate::{Error, Result};

/// Ceiling on build duration; expiry fails the task.
pub const BUILD_DEADLINE: Duration = Duration::from_secs(600);

/// Lifecycle state of a task. Transitions are monotonic; `Completed`,
/// `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// What kind of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Build,
    Export,
}

/// Point-in-time view of a task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// Percentage in `[0, 100]`.
    pub progress: f64,
    /// Current sweep position or records processed.
    pub records: u64,
    /// Segments found or written so far.
    pub segments: u64,
    pub detail: String,
    pub error: Option<String>,
    #[serde(with = "unix_seconds")]
    pub start_time: Option<SystemTime>,
    #[serde(with = "unix_seconds")]
    pub end_time: Option<SystemTime>,
    pub duration_seconds: f64,
}

mod unix_seconds {
    use std::time::{SystemTime, UNIX_EPOCH};

    use serde::{Serialize, Serializer};

    pub fn serialize<S>(time: &Option<SystemTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        time.map(|t| t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs())
            .serialize(serializer)
    }
}

#[derive(Debug)]
struct TaskCore {
    status: TaskStatus,
    detail: String,
    error: Option<String>,
    start_time: Option<SystemTime>,
    end_time: Option<SystemTime>,
}

#[derive(Debug)]
struct TaskInner {
    id: String,
    kind: TaskKind,
    cancel: Arc<AtomicBool>,
    records: AtomicU64,
    segments: AtomicU64,
    /// Bits of an `f64` percentage, stored atomically so progress writes
    /// never take the core lock.
    progress: AtomicU64,
    core: RwLock<TaskCore>,
}

/// Shared handle to one task's state; cloned into the worker thread.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    inner: Arc<TaskInner>,
}

impl TaskHandle {
    fn new(id: String, kind: TaskKind) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id,
                kind,
                cancel: Arc::new(AtomicBool::new(false)),
                records: AtomicU64::new(0),
                segments: AtomicU64::new(0),
                progress: AtomicU64::new(0f64.to_bits()),
                core: RwLock::new(TaskCore {
                    status: TaskStatus::Pending,
                    detail: String::new(),
                    error: None,
                    start_time: None,
                    end_time: None,
                }),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TaskKind {
        self.inner.kind
    }

    /// The one-shot cancel flag workers poll.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.inner.cancel.clone()
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.inner.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.load(Ordering::SeqCst)
    }

    /// Advance the lifecycle. Ignored once the task is terminal.
    pub fn set_status(&self, status: TaskStatus) {
        let mut core = self.inner.core.write();
        if core.status.is_terminal() {
            return;
        }
        core.status = status;
        if status == TaskStatus::Processing && core.start_time.is_none() {
            core.start_time = Some(SystemTime::now());
        }
        if status.is_terminal() {
            core.end_time = Some(SystemTime::now());
        }
    }

    pub fn set_detail(&self, detail: impl Into<String>) {
        self.inner.core.write().detail = detail.into();
    }

    pub fn set_progress(&self, percent: f64) {
        self.inner
            .progress
            .store(percent.clamp(0.0, 100.0).to_bits(), Ordering::Relaxed);
    }

    pub fn set_records(&self, records: u64) {
        self.inner.records.store(records, Ordering::Relaxed);
    }

    pub fn set_segments(&self, segments: u64) {
        self.inner.segments.store(segments, Ordering::Relaxed);
    }

    /// Mark the task terminal according to `error`: `Cancelled` for a
    /// cooperative cancel, `Failed` otherwise.
    pub fn fail(&self, error: &Error) {
        {
            let mut core = self.inner.core.write();
            if !core.status.is_terminal() {
                core.error = Some(error.to_string());
            }
        }
        match error {
            Error::Cancelled => self.set_status(TaskStatus::Cancelled),
            _ => self.set_status(TaskStatus::Failed),
        }
    }

    pub fn complete(&self) {
        self.set_progress(100.0);
        self.set_status(TaskStatus::Completed);
    }

    /// Consistent point-in-time view of the task.
    pub fn snapshot(&self) -> TaskSnapshot {
        let core = self.inner.core.read();
        let end = core.end_time;
        let duration_seconds = match (core.start_time, end) {
            (Some(start), Some(end)) => {
                end.duration_since(start).unwrap_or_default().as_secs_f64()
            }
            (Some(start), None) => SystemTime::now()
                .duration_since(start)
                .unwrap_or_default()
                .as_secs_f64(),
            _ => 0.0,
        };

        TaskSnapshot {
            id: self.inner.id.clone(),
            kind: self.inner.kind,
            status: core.status,
            progress: f64::from_bits(self.inner.progress.load(Ordering::Relaxed)),
            records: self.inner.records.load(Ordering::Relaxed),
            segments: self.inner.segments.load(Ordering::Relaxed),
            detail: core.detail.clone(),
            error: core.error.clone(),
            start_time: core.start_time,
            end_time: end,
            duration_seconds,
        }
    }
}

/// Registry of all known tasks, keyed by id.
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, TaskHandle>>,
    next_id: AtomicU64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new pending task and return its handle.
    pub fn register(&self, kind: TaskKind) -> TaskHandle {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("task-{}", n);
        let handle = TaskHandle::new(id.clone(), kind);
        self.tasks.write().insert(id, handle.clone());
        handle
    }

    /// Snapshot of the task with the given id.
    pub fn get(&self, id: &str) -> Option<TaskSnapshot> {
        self.tasks.read().get(id).map(TaskHandle::snapshot)
    }

    /// Set the task's cancel flag. Returns false for unknown ids.
    pub fn cancel(&self, id: &str) -> bool {
        match self.tasks.read().get(id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop a task from the registry. The worker, if still running, keeps
    /// its own handle and finishes undisturbed.
    pub fn remove(&self, id: &str) -> bool {
        self.tasks.write().remove(id).is_some()
    }

    /// Snapshots of every known task.
    pub fn list(&self) -> Vec<TaskSnapshot> {
        self.tasks.read().values().map(TaskHandle::snapshot).collect()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: Lazy<TaskRegistry> = Lazy::new(TaskRegistry::new);

/// Process-wide task registry.
pub fn task_registry() -> &'static TaskRegistry {
    &REGISTRY
}

/// Build an xdb on a worker thread; returns the task id immediately.
///
/// The build is subject to [`BUILD_DEADLINE`]; expiry fails the task.
pub fn spawn_build(registry: &TaskRegistry, src_path: PathBuf, dst_path: PathBuf) -> String {
    let handle = registry.register(TaskKind::Build);
    let id = handle.id().to_string();

    thread::spawn(move || {
        log::info!("build task {} started", handle.id());
        handle.set_status(TaskStatus::Processing);
        handle.set_detail("loading source segments");

        match run_build(&handle, &src_path, &dst_path) {
            Ok(count) => {
                handle.set_detail(format!("built {} segments", count));
                handle.complete();
                log::info!("build task {} completed, {} segments", handle.id(), count);
            }
            Err(e) => {
                log::warn!("build task {} failed: {}", handle.id(), e);
                handle.fail(&e);
            }
        }
    });

    id
}

fn run_build(handle: &TaskHandle, src_path: &Path, dst_path: &Path) -> Result<usize> {
    let progress_handle = handle.clone();
    let mut maker = Maker::new(src_path, dst_path)?
        .with_cancel_flag(handle.cancel_flag())
        .with_deadline(Instant::now() + BUILD_DEADLINE)
        .with_progress(Box::new(move |done, total| {
            progress_handle.set_records(done);
            if total > 0 {
                progress_handle.set_progress(done as f64 / total as f64 * 100.0);
            }
        }));

    maker.init()?;
    handle.set_detail("writing xdb");
    maker.start()?;
    maker.finish()?;

    let count = maker.segments_count();
    handle.set_segments(count as u64);
    Ok(count)
}

/// Export an xdb on a worker thread; returns the task id immediately.
pub fn spawn_export(
    registry: &TaskRegistry,
    xdb_path: PathBuf,
    out_path: PathBuf,
    options: ExportOptions,
) -> String {
    let handle = registry.register(TaskKind::Export);
    let id = handle.id().to_string();

    thread::spawn(move || {
        log::info!("export task {} started", handle.id());
        handle.set_status(TaskStatus::Processing);
        handle.set_detail("opening xdb");

        match run_export(&handle, &xdb_path, &out_path, options) {
            Ok(runs) => {
                handle.set_detail(format!("exported {} runs", runs));
                handle.complete();
                log::info!("export task {} completed, {} runs", handle.id(), runs);
            }
            Err(e) => {
                log::warn!("export task {} failed: {}", handle.id(), e);
                handle.fail(&e);
            }
        }
    });

    id
}

fn run_export(
    handle: &TaskHandle,
    xdb_path: &Path,
    out_path: &Path,
    options: ExportOptions,
) -> Result<usize> {
    let searcher = Searcher::open_vector(xdb_path)?;
    handle.set_detail("sweeping address space");

    let progress_handle = handle.clone();
    let cancel = handle.cancel_flag();
    export_with_searcher(
        &searcher,
        out_path,
        options,
        move |current_ip, last_ip, runs| {
            progress_handle.set_records(current_ip as u64);
            progress_handle.set_segments(runs as u64);
            progress_handle.set_progress(current_ip as f64 / last_ip as f64 * 100.0);
        },
        &cancel,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_creates_pending_tasks_with_unique_ids() {
        let registry = TaskRegistry::new();
        let a = registry.register(TaskKind::Build);
        let b = registry.register(TaskKind::Export);

        assert_ne!(a.id(), b.id());
        let snapshot = registry.get(a.id()).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Pending);
        assert_eq!(snapshot.kind, TaskKind::Build);
        assert!(snapshot.start_time.is_none());
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        let registry = TaskRegistry::new();
        let handle = registry.register(TaskKind::Build);

        handle.set_status(TaskStatus::Processing);
        assert!(handle.snapshot().start_time.is_some());

        handle.complete();
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert!(snapshot.end_time.is_some());
        assert_eq!(snapshot.progress, 100.0);

        // terminal states never regress
        handle.set_status(TaskStatus::Processing);
        assert_eq!(handle.snapshot().status, TaskStatus::Completed);
        handle.fail(&Error::EmptyInput);
        assert_eq!(handle.snapshot().status, TaskStatus::Completed);
    }

    #[test]
    fn test_fail_distinguishes_cancellation() {
        let registry = TaskRegistry::new();

        let cancelled = registry.register(TaskKind::Export);
        cancelled.fail(&Error::Cancelled);
        assert_eq!(cancelled.snapshot().status, TaskStatus::Cancelled);

        let failed = registry.register(TaskKind::Export);
        failed.fail(&Error::EmptyInput);
        let snapshot = failed.snapshot();
        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("empty segment list"));
    }

    #[test]
    fn test_cancel_sets_the_one_shot_flag() {
        let registry = TaskRegistry::new();
        let handle = registry.register(TaskKind::Export);

        assert!(!handle.is_cancelled());
        assert!(registry.cancel(handle.id()));
        assert!(handle.is_cancelled());
        assert!(handle.cancel_flag().load(Ordering::SeqCst));

        assert!(!registry.cancel("task-999999"));
    }

    #[test]
    fn test_progress_counters_reach_snapshots() {
        let registry = TaskRegistry::new();
        let handle = registry.register(TaskKind::Export);

        handle.set_records(1234);
        handle.set_segments(56);
        handle.set_progress(250.0);

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.records, 1234);
        assert_eq!(snapshot.segments, 56);
        assert_eq!(snapshot.progress, 100.0);
    }

    #[test]
    fn test_remove_forgets_the_task() {
        let registry = TaskRegistry::new();
        let handle = registry.register(TaskKind::Build);
        let id = handle.id().to_string();

        assert!(registry.remove(&id));
        assert!(registry.get(&id).is_none());
        assert!(!registry.remove(&id));
    }

    #[test]
    fn test_snapshot_serializes_times_as_unix_seconds() {
        let registry = TaskRegistry::new();
        let handle = registry.register(TaskKind::Build);
        handle.set_status(TaskStatus::Processing);
        handle.complete();

        let json = serde_json::to_value(handle.snapshot()).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["kind"], "build");
        assert!(json["start_time"].is_u64());
        assert!(json["end_time"].is_u64());
    }
}
