//! TaskStore: in-memory FIFO queue plus the task map.
//!
//! Each task runs while holding its room's lease, so at most one task per room
//! executes at a time. The store lock is never held across execution.
//!
//! Dropping a `run_next` future mid-execution releases the lease and marks the
//! task failed.

use serde::Serialize;
use serde_json::Value;
use station_core::config::{BusyPolicy, StationConfig, TasksConfig};
use station_core::error::{Result, StationError};
use station_core::traits::{Clock, CredentialSource, TaskExecutor};
use station_core::types::{Task, TaskMode, TaskStatus};
use station_rooms::lease::LeaseStore;
use station_rooms::lock::{LockTable, RoomLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::executor::{Executor, OfflineExecutor};

/// Prefix for the lease names taken by task runs.
pub const TASK_LEASE_PREFIX: &str = "tasks/";

/// Bounds applied to `list_tasks`.
pub const MIN_LIST_LIMIT: usize = 1;
pub const MAX_LIST_LIMIT: usize = 200;

/// Snapshot returned by `TaskStore::status`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStoreStatus {
    pub mode: TaskMode,
    pub queue_len: usize,
    pub tasks_len: usize,
    pub rooms: Vec<String>,
}

struct Entry {
    // Submission order; breaks created_at ties.
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<String>,
    tasks: HashMap<String, Entry>,
    next_seq: u64,
}

impl Inner {
    /// Drop the oldest finished tasks until at most `retention` remain.
    /// Queued and running tasks are never evicted.
    fn evict(&mut self, retention: usize) {
        if self.tasks.len() <= retention {
            return;
        }
        let mut finished: Vec<(u64, String)> = self
            .tasks
            .iter()
            .filter(|(_, e)| e.task.status.is_terminal())
            .map(|(id, e)| (e.seq, id.clone()))
            .collect();
        finished.sort_unstable();
        let excess = self.tasks.len() - retention;
        for (_, id) in finished.into_iter().take(excess) {
            self.tasks.remove(&id);
        }
    }
}

/// Releases the lease of an in-flight task on drop. A task that never had its
/// outcome recorded is marked failed.
struct RunGuard {
    inner: Arc<Mutex<Inner>>,
    id: String,
    lock: RoomLock,
    clock: Arc<dyn Clock>,
    finished: bool,
}

impl RunGuard {
    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.lock.release();
        if self.finished {
            return;
        }
        tracing::warn!("⚠️ Task {} cancelled mid-execution", self.id);

        let id = std::mem::take(&mut self.id);
        let now = self.clock.now();
        let mark = move |inner: &mut Inner| {
            if let Some(entry) = inner.tasks.get_mut(&id) {
                if entry.task.status == TaskStatus::Running {
                    entry.task.status = TaskStatus::Failed;
                    entry.task.error = Some("execution cancelled".to_string());
                    entry.task.updated_at = now;
                }
            }
        };
        match self.inner.try_lock() {
            Ok(mut inner) => mark(&mut *inner),
            Err(_) => {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let inner = Arc::clone(&self.inner);
                    handle.spawn(async move {
                        let mut inner = inner.lock().await;
                        mark(&mut *inner);
                    });
                }
            }
        }
    }
}

pub struct TaskStore {
    inner: Arc<Mutex<Inner>>,
    locks: LockTable,
    executor: Executor,
    credentials: Arc<dyn CredentialSource>,
    clock: Arc<dyn Clock>,
    config: TasksConfig,
}

impl TaskStore {
    pub fn new(
        config: TasksConfig,
        locks: LockTable,
        executor: Executor,
        credentials: Arc<dyn CredentialSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            locks,
            executor,
            credentials,
            clock,
            config,
        }
    }

    /// Build a store from configuration: one lease per task room (plus the
    /// fallback room), the offline handlers, and an optional online executor
    /// capped at `[online] timeout_secs` per attempt.
    pub fn from_config(
        config: &StationConfig,
        leases: Arc<dyn LeaseStore>,
        credentials: Arc<dyn CredentialSource>,
        online: Option<Arc<dyn TaskExecutor>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut rooms = config.tasks.rooms.clone();
        if !rooms.contains(&config.tasks.fallback_room) {
            rooms.push(config.tasks.fallback_room.clone());
        }
        let locks = LockTable::new(
            rooms.iter().cloned(),
            TASK_LEASE_PREFIX,
            &config.locks,
            leases,
            Arc::clone(&clock),
        );
        let offline = OfflineExecutor::new(rooms, locks.count(), Arc::clone(&clock));
        let executor = Executor::new(Arc::new(offline), online)
            .with_online_timeout(Duration::from_secs(config.online.timeout_secs.max(1)));
        Self::new(config.tasks.clone(), locks, executor, credentials, clock)
    }

    /// Rooms tasks can be submitted to, in configured order.
    pub fn rooms(&self) -> Vec<String> {
        let mut rooms = self.config.rooms.clone();
        if !rooms.contains(&self.config.fallback_room) {
            rooms.push(self.config.fallback_room.clone());
        }
        rooms
    }

    /// Mode a task submitted now would be stamped with.
    pub fn mode(&self) -> TaskMode {
        if self.credentials.has_online_credential() {
            TaskMode::Online
        } else {
            TaskMode::Offline
        }
    }

    /// Queue a task. Unknown rooms fall back to the configured fallback room.
    pub async fn submit(&self, room: &str, task_type: &str, payload: Value) -> Task {
        let room = if self.locks.contains(room) {
            room.to_string()
        } else {
            self.config.fallback_room.clone()
        };
        let task = Task::queued(
            uuid::Uuid::new_v4().to_string(),
            room,
            task_type.trim(),
            payload,
            self.mode(),
            self.clock.now(),
        );

        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.queue.push_back(task.id.clone());
        inner.tasks.insert(
            task.id.clone(),
            Entry {
                seq,
                task: task.clone(),
            },
        );
        inner.evict(self.config.retention);
        tracing::debug!(
            "📥 Queued task {} ({}) in room '{}' [{}]",
            task.id,
            task.task_type,
            task.room,
            task.mode
        );
        task
    }

    /// Run the task at the head of the queue under its room's lease.
    ///
    /// `QueueEmpty` when nothing is queued. `Busy` when the room's lease is
    /// held; the task is then requeued at the head or failed, depending on
    /// `busy_policy`. Execution, online attempt and offline fallback
    /// included, is bounded by the room's lease TTL.
    pub async fn run_next(&self) -> Result<Task> {
        let (task, in_flight) = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let Some(id) = inner.queue.pop_front() else {
                return Err(StationError::QueueEmpty);
            };
            let now = self.clock.now();
            let Some(entry) = inner.tasks.get_mut(&id) else {
                return Err(StationError::not_found(format!("task {id}")));
            };
            let lock = match self.lock_for(&entry.task.room) {
                Ok(lock) => lock,
                Err(e) => {
                    entry.task.status = TaskStatus::Failed;
                    entry.task.error = Some(e.to_string());
                    entry.task.updated_at = now;
                    return Err(e);
                }
            };

            if !lock.acquire() {
                let room = entry.task.room.clone();
                match self.config.busy_policy {
                    BusyPolicy::Requeue => {
                        inner.queue.push_front(id);
                        tracing::debug!("🔒 Room '{room}' busy, task requeued");
                    }
                    BusyPolicy::Drop => {
                        entry.task.status = TaskStatus::Failed;
                        entry.task.error = Some(format!("room {room} busy"));
                        entry.task.updated_at = now;
                        tracing::warn!("⚠️ Room '{room}' busy, task {id} dropped");
                    }
                }
                return Err(StationError::busy(format!("room {room}")));
            }

            entry.task.status = TaskStatus::Running;
            entry.task.updated_at = now;
            let in_flight = RunGuard {
                inner: Arc::clone(&self.inner),
                id: id.clone(),
                lock,
                clock: Arc::clone(&self.clock),
                finished: false,
            };
            (entry.task.clone(), in_flight)
        };

        let ttl = in_flight.lock.ttl();
        let execution = tokio::time::timeout(ttl, self.executor.run(&task, ttl)).await;

        let finished = {
            let mut inner = self.inner.lock().await;
            let now = self.clock.now();
            inner.tasks.get_mut(&task.id).map(|entry| {
                let stored = &mut entry.task;
                match execution {
                    Ok(run) => {
                        stored.online_error = run.online_error;
                        match run.result {
                            Ok(value) => {
                                stored.result = Some(value);
                                stored.status = TaskStatus::Done;
                            }
                            Err(e) => {
                                stored.error = Some(e.to_string());
                                stored.status = TaskStatus::Failed;
                            }
                        }
                    }
                    Err(_) => {
                        stored.error = Some(format!("task exceeded lease ttl of {ttl:?}"));
                        stored.status = TaskStatus::Failed;
                    }
                }
                stored.updated_at = now;
                stored.clone()
            })
        };
        in_flight.finish();
        let Some(finished) = finished else {
            return Err(StationError::not_found(format!("task {}", task.id)));
        };

        match finished.status {
            TaskStatus::Failed => tracing::warn!(
                "⚠️ Task {} ({}) failed: {}",
                finished.id,
                finished.task_type,
                finished.error.as_deref().unwrap_or("unknown error")
            ),
            _ => tracing::info!(
                "✅ Task {} ({}) done in room '{}'",
                finished.id,
                finished.task_type,
                finished.room
            ),
        }
        Ok(finished)
    }

    /// Most recent tasks first. `limit` is clamped to [1, 200].
    pub async fn list_tasks(&self, limit: usize) -> Vec<Task> {
        let limit = limit.clamp(MIN_LIST_LIMIT, MAX_LIST_LIMIT);
        let inner = self.inner.lock().await;
        let mut entries: Vec<&Entry> = inner.tasks.values().collect();
        entries.sort_by(|a, b| {
            b.task
                .created_at
                .cmp(&a.task.created_at)
                .then_with(|| b.seq.cmp(&a.seq))
        });
        entries
            .into_iter()
            .take(limit)
            .map(|e| e.task.clone())
            .collect()
    }

    pub async fn get_task(&self, id: &str) -> Result<Task> {
        self.inner
            .lock()
            .await
            .tasks
            .get(id)
            .map(|e| e.task.clone())
            .ok_or_else(|| StationError::not_found(format!("task {id}")))
    }

    pub async fn status(&self) -> TaskStoreStatus {
        let inner = self.inner.lock().await;
        TaskStoreStatus {
            mode: self.mode(),
            queue_len: inner.queue.len(),
            tasks_len: inner.tasks.len(),
            rooms: self.rooms(),
        }
    }

    fn lock_for(&self, room: &str) -> Result<RoomLock> {
        self.locks
            .get(room)
            .or_else(|| self.locks.get(&self.config.fallback_room))
            .cloned()
            .ok_or_else(|| StationError::not_found(format!("lock for room {room}")))
    }
}
