use crate::{
    error::{ImageGenError, Result},
    models::{CostBreakdown, TaskSnapshot, TaskStatus},
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

struct TaskEntry {
    snapshot: TaskSnapshot,
    input_path: Option<PathBuf>,
    output_path: Option<PathBuf>,
    handle: Option<JoinHandle<()>>,
}

/// A task taken out of the registry whose worker and files still need
/// to be disposed of.
struct Released {
    snapshot: TaskSnapshot,
    files: Vec<PathBuf>,
    handle: Option<JoinHandle<()>>,
}

impl TaskEntry {
    fn release(self) -> Released {
        let mut files: Vec<PathBuf> = Vec::new();
        for path in [&self.snapshot.result_path, &self.output_path, &self.input_path]
            .into_iter()
            .flatten()
        {
            if !files.contains(path) {
                files.push(path.clone());
            }
        }
        Released {
            snapshot: self.snapshot,
            files,
            handle: self.handle,
        }
    }
}

impl Released {
    /// Stops a still running worker, then deletes every file the task owns,
    /// including an output the worker may have been writing.
    async fn dispose(self) -> TaskSnapshot {
        if let Some(handle) = self.handle {
            if !handle.is_finished() {
                log::warn!("Aborting running worker for task {}", self.snapshot.task_id);
                handle.abort();
                let _ = handle.await;
            }
        }
        remove_files(self.files).await;
        self.snapshot
    }
}

/// Registry of web generation tasks keyed by id.
///
/// Every status change goes through the store, and a task in a terminal
/// state is never moved again.
#[derive(Default)]
pub struct TaskStore {
    tasks: Mutex<HashMap<String, TaskEntry>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TaskEntry>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create(&self, input_path: Option<PathBuf>) -> String {
        let task_id = Uuid::new_v4().to_string();
        let snapshot = TaskSnapshot {
            task_id: task_id.clone(),
            status: TaskStatus::Pending,
            progress: 0,
            message: "Task created".to_string(),
            result_path: None,
            error: None,
            cost: None,
            created_at: Utc::now(),
            finished_at: None,
        };
        self.lock().insert(
            task_id.clone(),
            TaskEntry {
                snapshot,
                input_path,
                output_path: None,
                handle: None,
            },
        );
        task_id
    }

    pub fn get(&self, task_id: &str) -> Result<TaskSnapshot> {
        self.lock()
            .get(task_id)
            .map(|entry| entry.snapshot.clone())
            .ok_or_else(|| ImageGenError::NotFound("Task".into()))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn attach_handle(&self, task_id: &str, handle: JoinHandle<()>) {
        if let Some(entry) = self.lock().get_mut(task_id) {
            entry.handle = Some(handle);
        }
    }

    /// Records where the worker will write its image, so eviction can delete
    /// a partial or unreported output.
    pub fn reserve_output(&self, task_id: &str, path: PathBuf) {
        if let Some(entry) = self.lock().get_mut(task_id) {
            entry.output_path = Some(path);
        }
    }

    fn update<F>(&self, task_id: &str, next: TaskStatus, apply: F) -> Result<()>
    where
        F: FnOnce(&mut TaskSnapshot),
    {
        let mut tasks = self.lock();
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| ImageGenError::NotFound("Task".into()))?;
        let current = entry.snapshot.status;
        if current != next && !current.can_transition_to(next) {
            return Err(ImageGenError::InvalidTransition(format!(
                "{} -> {}",
                current.as_str(),
                next.as_str()
            )));
        }
        if current == next && current.is_terminal() {
            return Err(ImageGenError::InvalidTransition(format!(
                "{} is final",
                current.as_str()
            )));
        }
        entry.snapshot.status = next;
        apply(&mut entry.snapshot);
        if next.is_terminal() {
            entry.snapshot.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn advance(
        &self,
        task_id: &str,
        next: TaskStatus,
        progress: u8,
        message: impl Into<String>,
    ) -> Result<()> {
        let message = message.into();
        self.update(task_id, next, |task| {
            task.progress = progress.min(100);
            task.message = message;
        })
    }

    /// Changes the message of a live task without moving its status.
    pub fn set_message(&self, task_id: &str, message: impl Into<String>) -> Result<()> {
        let mut tasks = self.lock();
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| ImageGenError::NotFound("Task".into()))?;
        if !entry.snapshot.status.is_terminal() {
            entry.snapshot.message = message.into();
        }
        Ok(())
    }

    pub fn record_cost(&self, task_id: &str, cost: CostBreakdown) -> Result<()> {
        let mut tasks = self.lock();
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| ImageGenError::NotFound("Task".into()))?;
        entry.snapshot.cost = Some(cost);
        Ok(())
    }

    pub fn complete(&self, task_id: &str, result_path: PathBuf) -> Result<()> {
        self.update(task_id, TaskStatus::Completed, |task| {
            task.progress = 100;
            task.message = "Image generated successfully!".to_string();
            task.result_path = Some(result_path);
        })
    }

    /// Progress is left where the task was when it failed.
    pub fn fail(&self, task_id: &str, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        self.update(task_id, TaskStatus::Error, |task| {
            task.message = format!("Error: {}", error);
            task.error = Some(error);
        })
    }

    /// Forgets the uploaded input once the worker has removed it.
    pub fn clear_input(&self, task_id: &str) {
        if let Some(entry) = self.lock().get_mut(task_id) {
            entry.input_path = None;
        }
    }

    /// Evicts one task: aborts its worker if still running and deletes its files.
    pub async fn remove(&self, task_id: &str) -> Result<TaskSnapshot> {
        let entry = self
            .lock()
            .remove(task_id)
            .ok_or_else(|| ImageGenError::NotFound("Task".into()))?;
        Ok(entry.release().dispose().await)
    }

    /// Evicts terminal tasks finished longer than `finished_ttl` ago and any
    /// task created longer than `max_age` ago. Returns how many were evicted.
    pub async fn sweep(&self, now: DateTime<Utc>, finished_ttl: Duration, max_age: Duration) -> usize {
        let evicted: Vec<TaskEntry> = {
            let mut tasks = self.lock();
            let expired: Vec<String> = tasks
                .iter()
                .filter(|(_, entry)| is_expired(&entry.snapshot, now, finished_ttl, max_age))
                .map(|(task_id, _)| task_id.clone())
                .collect();
            expired
                .iter()
                .filter_map(|task_id| tasks.remove(task_id))
                .collect()
        };

        let count = evicted.len();
        for entry in evicted {
            log::debug!(
                "Evicting task {} ({})",
                entry.snapshot.task_id,
                entry.snapshot.status.as_str()
            );
            entry.release().dispose().await;
        }
        if count > 0 {
            log::info!("Swept {} expired task(s)", count);
        }
        count
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

fn is_expired(task: &TaskSnapshot, now: DateTime<Utc>, finished_ttl: Duration, max_age: Duration) -> bool {
    if elapsed(task.created_at, now) > max_age {
        return true;
    }
    match task.finished_at {
        Some(finished_at) if task.status.is_terminal() => elapsed(finished_at, now) > finished_ttl,
        _ => false,
    }
}

async fn remove_files(files: Vec<PathBuf>) {
    for path in files {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => log::debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}
