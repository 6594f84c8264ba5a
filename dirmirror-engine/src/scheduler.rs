//! Lock-aware task scheduling.
//!
//! Tasks run in parallel on the runtime's worker threads; the scheduler only
//! serializes tasks whose lock identifier sets overlap (prefix-related on
//! the same connection). Deferred tasks are re-checked cooperatively on
//! every release; scheduling itself never fails and never aborts a task for
//! lock contention.

use crate::lock::{LockId, LockTarget, conflicts, lock_identifiers};
use async_trait::async_trait;
use dirmirror_core::monitor::{ErrorRecord, ProgressMonitor};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// A schedulable unit of asynchronous work.
///
/// `run` does the work and reports failures to the monitor; `notify` emits
/// coarse-grained change events and only runs when the task was not
/// canceled.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    fn name(&self) -> String;

    /// Resources this task touches; admission defers the task while any
    /// active task holds an overlapping set.
    fn lock_targets(&self) -> Vec<LockTarget>;

    async fn run(&self, monitor: &ProgressMonitor);

    async fn notify(&self, _monitor: &ProgressMonitor) {}
}

#[async_trait]
impl<T: Task + ?Sized> Task for Arc<T> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn lock_targets(&self) -> Vec<LockTarget> {
        (**self).lock_targets()
    }

    async fn run(&self, monitor: &ProgressMonitor) {
        (**self).run(monitor).await
    }

    async fn notify(&self, monitor: &ProgressMonitor) {
        (**self).notify(monitor).await
    }
}

/// Final status of a completed task.
#[derive(Debug, Clone)]
pub enum TaskStatus {
    Succeeded,
    Canceled,
    Failed(Vec<ErrorRecord>),
}

impl TaskStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Completion report of one task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub id: Uuid,
    pub name: String,
    pub status: TaskStatus,
}

/// Handle to a submitted task.
pub struct TaskHandle {
    id: Uuid,
    monitor: ProgressMonitor,
    join: JoinHandle<TaskReport>,
}

impl TaskHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The task's monitor; cancellation requested here is observed at the
    /// task's next loop head.
    pub fn monitor(&self) -> &ProgressMonitor {
        &self.monitor
    }

    pub fn cancel(&self) {
        self.monitor.set_canceled(true);
    }

    /// Wait for the task to finish.
    pub async fn wait(self) -> TaskReport {
        match self.join.await {
            Ok(report) => report,
            Err(join_error) => TaskReport {
                id: self.id,
                name: String::new(),
                status: TaskStatus::Failed(vec![ErrorRecord {
                    message: format!("task aborted: {join_error}"),
                    cause: None,
                    at: chrono::Utc::now(),
                }]),
            },
        }
    }
}

/// Admits or defers tasks based on lock identifier overlap.
pub struct TaskScheduler {
    active: Mutex<HashMap<Uuid, Vec<LockId>>>,
    released: Notify,
}

impl TaskScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: Mutex::new(HashMap::new()),
            released: Notify::new(),
        })
    }

    /// Submit a task for execution. The task waits for admission, runs,
    /// releases its locks, and (when not canceled) runs its notification
    /// body.
    pub fn submit(self: &Arc<Self>, task: impl Task) -> TaskHandle {
        let id = Uuid::new_v4();
        let monitor = ProgressMonitor::new();
        let scheduler = Arc::clone(self);
        let task_monitor = monitor.clone();

        let join = tokio::spawn(async move {
            let name = task.name();
            let locks = lock_identifiers(&task.lock_targets());

            scheduler.admit(id, &locks).await;
            debug!(task = %name, %id, "task admitted");

            let run = AssertUnwindSafe(task.run(&task_monitor)).catch_unwind().await;
            scheduler.release(id);

            if let Err(panic) = run {
                warn!(task = %name, %id, "task panicked");
                task_monitor.report_error(
                    format!("task panicked: {}", panic_message(&panic)),
                    None,
                );
            } else if !task_monitor.is_canceled() {
                task.notify(&task_monitor).await;
            }

            let status = if task_monitor.is_canceled() {
                TaskStatus::Canceled
            } else if task_monitor.errors_reported() {
                TaskStatus::Failed(task_monitor.errors())
            } else {
                TaskStatus::Succeeded
            };
            debug!(task = %name, %id, ?status, "task finished");

            TaskReport { id, name, status }
        });

        TaskHandle { id, monitor, join }
    }

    /// Identifier sets of the currently admitted tasks.
    pub fn active_lock_sets(&self) -> Vec<Vec<LockId>> {
        self.active.lock().values().cloned().collect()
    }

    async fn admit(&self, id: Uuid, locks: &[LockId]) {
        loop {
            // register interest before checking, so a release between the
            // check and the await cannot be missed
            let released = self.released.notified();
            {
                let mut active = self.active.lock();
                if !active.values().any(|held| conflicts(held, locks)) {
                    active.insert(id, locks.to_vec());
                    return;
                }
            }
            debug!(%id, "task deferred on lock conflict");
            released.await;
        }
    }

    fn release(&self, id: Uuid) {
        self.active.lock().remove(&id);
        self.released.notify_waiters();
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
