use std::collections::HashMap;
use chrono::Utc;
use super::errors::{Result, UploadError};
use super::progress::ProgressSnapshot;
use super::task::UploadTask;
use super::types::{FileSource, UploadId, UploadState, UploadStats};

/// Highest progress a task may show before the engine confirms success.
const MAX_IN_FLIGHT_PROGRESS: u8 = 99;

struct StoredTask {
    task: UploadTask,
    source: FileSource,
}

/// Task id -> record. Every state change goes through here.
#[derive(Default)]
pub struct TaskStore {
    tasks: HashMap<UploadId, StoredTask>,
    /// submission order
    order: Vec<UploadId>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: UploadTask, source: FileSource) -> Result<()> {
        let id = task.id;
        if self.tasks.contains_key(&id) {
            return Err(UploadError::DuplicateTask(id));
        }

        self.tasks.insert(id, StoredTask { task, source });
        self.order.push(id);
        Ok(())
    }

    pub fn get(&self, id: &UploadId) -> Option<&UploadTask> {
        self.tasks.get(id).map(|stored| &stored.task)
    }

    pub fn source(&self, id: &UploadId) -> Option<&FileSource> {
        self.tasks.get(id).map(|stored| &stored.source)
    }

    pub fn contains(&self, id: &UploadId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Records in submission order
    pub fn iter(&self) -> impl Iterator<Item = &UploadTask> {
        self.order.iter().filter_map(|id| self.get(id))
    }

    fn transition(&mut self, id: &UploadId, next: UploadState, action: &'static str) -> Result<(&mut UploadTask, UploadState)> {
        let stored = self.tasks.get_mut(id).ok_or(UploadError::NotFound(*id))?;
        let old_state = stored.task.state;

        if !old_state.can_transition_to(next) {
            return Err(UploadError::invalid_state(*id, old_state, action));
        }

        stored.task.state = next;
        Ok((&mut stored.task, old_state))
    }

    pub fn mark_uploading(&mut self, id: &UploadId) -> Result<UploadState> {
        let (task, old_state) = self.transition(id, UploadState::Uploading, "dispatch")?;
        task.clear_transfer_state();
        task.progress = 0;
        task.started_at = Some(Utc::now());
        Ok(old_state)
    }

    /// Apply a tick to an uploading task. Progress and byte counts never move
    /// backwards, and progress stays below 100 until completion.
    pub fn apply_progress(&mut self, id: &UploadId, snapshot: &ProgressSnapshot) -> Option<&UploadTask> {
        let stored = self.tasks.get_mut(id)?;
        let task = &mut stored.task;
        if task.state != UploadState::Uploading {
            return None;
        }

        task.uploaded_bytes = task.uploaded_bytes.max(snapshot.uploaded_bytes);
        task.progress = task.progress.max(snapshot.progress.min(MAX_IN_FLIGHT_PROGRESS));
        task.speed = snapshot.speed;
        task.eta_seconds = snapshot.eta_seconds;

        Some(task)
    }

    pub fn mark_completed(&mut self, id: &UploadId, result_location: String) -> Result<UploadState> {
        let (task, old_state) = self.transition(id, UploadState::Completed, "complete")?;
        task.progress = 100;
        task.uploaded_bytes = task.size;
        task.eta_seconds = None;
        task.error = None;
        task.result_location = Some(result_location);
        task.completed_at = Some(Utc::now());
        Ok(old_state)
    }

    pub fn mark_failed(&mut self, id: &UploadId, reason: String) -> Result<UploadState> {
        let (task, old_state) = self.transition(id, UploadState::Error, "fail")?;
        task.error = Some(reason);
        task.speed = 0.0;
        task.eta_seconds = None;
        task.completed_at = Some(Utc::now());
        Ok(old_state)
    }

    pub fn mark_cancelled(&mut self, id: &UploadId, reason: String) -> Result<UploadState> {
        let (task, old_state) = self.transition(id, UploadState::Cancelled, "cancel")?;
        task.error = Some(reason);
        task.speed = 0.0;
        task.eta_seconds = None;
        task.completed_at = Some(Utc::now());
        Ok(old_state)
    }

    /// Error/Cancelled -> Pending, keeping the id.
    pub fn reset_for_retry(&mut self, id: &UploadId) -> Result<UploadState> {
        let state = self.get(id).ok_or(UploadError::NotFound(*id))?.state;
        if !state.is_retryable() {
            return Err(UploadError::invalid_state(*id, state, "retry"));
        }

        let (task, old_state) = self.transition(id, UploadState::Pending, "retry")?;
        task.clear_transfer_state();
        task.progress = 0;
        task.error = None;
        task.result_location = None;
        task.retry_count += 1;
        Ok(old_state)
    }

    pub fn remove(&mut self, id: &UploadId) -> Option<UploadTask> {
        let stored = self.tasks.remove(id)?;
        self.order.retain(|queued| queued != id);
        Some(stored.task)
    }

    pub fn ids_in_state(&self, state: UploadState) -> Vec<UploadId> {
        self.iter()
            .filter(|task| task.state == state)
            .map(|task| task.id)
            .collect()
    }

    pub fn stats(&self) -> UploadStats {
        let mut stats = UploadStats {
            total: self.tasks.len(),
            ..Default::default()
        };

        for stored in self.tasks.values() {
            match stored.task.state {
                UploadState::Pending => stats.pending += 1,
                UploadState::Uploading => stats.uploading += 1,
                UploadState::Completed => stats.completed += 1,
                UploadState::Error | UploadState::Cancelled => stats.failed += 1,
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use super::*;
    use crate::core::types::FileDescriptor;

    fn insert_task(store: &mut TaskStore, size: usize) -> UploadId {
        let file = FileDescriptor::from_bytes("a.png", "image/png", vec![0u8; size]);
        let id = UploadId::new();
        store.insert(UploadTask::new(id, &file), file.source.clone()).unwrap();
        id
    }

    #[test]
    fn full_lifecycle_with_retry() {
        let mut store = TaskStore::new();
        let id = insert_task(&mut store, 1_000);
        assert_eq!(store.get(&id).unwrap().state, UploadState::Pending);

        assert_eq!(store.mark_uploading(&id).unwrap(), UploadState::Pending);
        store.apply_progress(&id, &ProgressSnapshot::estimate(400, 1_000, Duration::from_secs(1)));
        assert_eq!(store.mark_failed(&id, "Upload failed due to network error".into()).unwrap(), UploadState::Uploading);

        let task = store.get(&id).unwrap();
        assert_eq!(task.state, UploadState::Error);
        assert_eq!(task.progress, 40);
        assert_eq!(task.error.as_deref(), Some("Upload failed due to network error"));

        assert_eq!(store.reset_for_retry(&id).unwrap(), UploadState::Error);
        let task = store.get(&id).unwrap();
        assert_eq!(task.state, UploadState::Pending);
        assert_eq!(task.progress, 0);
        assert_eq!(task.error, None);
        assert_eq!(task.retry_count, 1);

        store.mark_uploading(&id).unwrap();
        store.mark_completed(&id, "https://example.com/files/a.png".into()).unwrap();
        let task = store.get(&id).unwrap();
        assert_eq!(task.progress, 100);
        assert_eq!(task.uploaded_bytes, 1_000);
        assert!(task.result_location.is_some());
    }

    #[test]
    fn retry_from_completed_is_invalid_state() {
        let mut store = TaskStore::new();
        let id = insert_task(&mut store, 10);
        store.mark_uploading(&id).unwrap();
        store.mark_completed(&id, "done".into()).unwrap();

        let err = store.reset_for_retry(&id).unwrap_err();
        assert!(matches!(err, UploadError::InvalidState { state: UploadState::Completed, .. }));
        assert_eq!(store.get(&id).unwrap().state, UploadState::Completed);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let mut store = TaskStore::new();
        let err = store.reset_for_retry(&UploadId::new()).unwrap_err();
        assert!(matches!(err, UploadError::NotFound(_)));
    }

    #[test]
    fn progress_never_decreases_and_waits_for_completion_to_hit_100() {
        let mut store = TaskStore::new();
        let id = insert_task(&mut store, 1_000);
        store.mark_uploading(&id).unwrap();

        store.apply_progress(&id, &ProgressSnapshot::estimate(600, 1_000, Duration::from_secs(1)));
        let task = store.apply_progress(&id, &ProgressSnapshot::estimate(300, 1_000, Duration::from_secs(2))).unwrap();
        assert_eq!(task.progress, 60);
        assert_eq!(task.uploaded_bytes, 600);

        let task = store.apply_progress(&id, &ProgressSnapshot::estimate(1_000, 1_000, Duration::from_secs(3))).unwrap();
        assert_eq!(task.progress, 99);
    }

    #[test]
    fn progress_ignored_outside_uploading() {
        let mut store = TaskStore::new();
        let id = insert_task(&mut store, 1_000);

        let snapshot = ProgressSnapshot::estimate(500, 1_000, Duration::from_secs(1));
        assert!(store.apply_progress(&id, &snapshot).is_none());
        assert_eq!(store.get(&id).unwrap().progress, 0);
    }

    #[test]
    fn stats_and_order() {
        let mut store = TaskStore::new();
        let a = insert_task(&mut store, 1);
        let b = insert_task(&mut store, 1);
        let c = insert_task(&mut store, 1);

        store.mark_uploading(&a).unwrap();
        store.mark_uploading(&b).unwrap();
        store.mark_completed(&b, "x".into()).unwrap();
        store.mark_cancelled(&c, "Upload cancelled by user".into()).unwrap();

        let stats = store.stats();
        assert_eq!(stats, UploadStats { total: 3, pending: 0, uploading: 1, completed: 1, failed: 1 });

        let order: Vec<_> = store.iter().map(|task| task.id).collect();
        assert_eq!(order, vec![a, b, c]);

        assert_eq!(store.ids_in_state(UploadState::Completed), vec![b]);
        assert!(store.remove(&b).is_some());
        assert!(store.remove(&b).is_none());
        assert_eq!(store.len(), 2);
    }
}
