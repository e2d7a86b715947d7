use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use super::errors::Result;
use super::events::EventHub;
use super::progress::{ProgressSink, ProgressSnapshot, ProgressTick};
use super::queue::AdmissionQueue;
use super::store::TaskStore;
use super::task::UploadTask;
use super::traits::TransferEngine;
use super::types::{
    FileDescriptor, ManagerCommand, PolicyPatch, SubmitOutcome, TransferJob, UploadEvent, UploadId,
    UploadPolicy, UploadState,
};
use super::validator::{validate, Rejection};
use super::worker::{TransferOutcome, TransferWorker};

pub const CANCELLED_MESSAGE: &str = "Upload cancelled by user";

/// A dispatched attempt that has not settled yet.
struct ActiveTransfer {
    attempt: u32,
    started: Instant,
    cancellation_token: CancellationToken,
    cancel_requested: bool,
}

/// Single owner of the task store, the admission queue and the concurrency
/// budget. Runs as one task; transfers report back through channels.
pub(crate) struct Scheduler {
    engine: Arc<dyn TransferEngine>,
    policy: UploadPolicy,
    store: TaskStore,
    queue: AdmissionQueue,
    /// One entry per occupied slot, so `active.len()` is the active count.
    active: HashMap<UploadId, ActiveTransfer>,
    events: EventHub,

    progress_tx: mpsc::UnboundedSender<ProgressTick>,
    progress_rx: mpsc::UnboundedReceiver<ProgressTick>,
    outcome_tx: mpsc::UnboundedSender<TransferOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<TransferOutcome>,
}

impl Scheduler {
    pub(crate) fn new(engine: Arc<dyn TransferEngine>, policy: UploadPolicy, events: EventHub) -> Self {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        Self {
            engine,
            policy,
            store: TaskStore::new(),
            queue: AdmissionQueue::new(),
            active: HashMap::new(),
            events,
            progress_tx,
            progress_rx,
            outcome_tx,
            outcome_rx,
        }
    }

    pub(crate) async fn run(mut self, mut command_rx: mpsc::Receiver<ManagerCommand>) {
        info!(engine = self.engine.name(), max_concurrent = self.policy.max_concurrent_uploads, "upload scheduler started");

        // 主事件循环
        loop {
            tokio::select! {
                // Ticks drain before outcomes: a task's last ticks are always
                // sent before its outcome.
                biased;
                Some(tick) = self.progress_rx.recv() => {
                    self.handle_progress(tick);
                }
                Some(outcome) = self.outcome_rx.recv() => {
                    self.handle_outcome(outcome);
                }
                command = command_rx.recv() => match command {
                    Some(ManagerCommand::Shutdown { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown();
                        break;
                    }
                }
            }
        }

        info!("upload scheduler stopped");
    }

    fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Submit { files, reply } => {
                let outcome = self.submit(files);
                let _ = reply.send(outcome);
            }
            ManagerCommand::Retry { upload_id, reply } => {
                let result = self.retry(upload_id);
                let _ = reply.send(result);
            }
            ManagerCommand::Cancel { upload_id, reply } => {
                self.cancel(upload_id);
                let _ = reply.send(());
            }
            ManagerCommand::Remove { upload_id, reply } => {
                self.remove(upload_id);
                let _ = reply.send(());
            }
            ManagerCommand::GetTask { upload_id, reply } => {
                let _ = reply.send(self.store.get(&upload_id).cloned());
            }
            ManagerCommand::GetAllTasks { reply } => {
                let _ = reply.send(self.store.iter().cloned().collect());
            }
            ManagerCommand::Stats { reply } => {
                let _ = reply.send(self.store.stats());
            }
            ManagerCommand::ClearCompleted { reply } => {
                let _ = reply.send(self.clear_completed());
            }
            ManagerCommand::GetPolicy { reply } => {
                let _ = reply.send(self.policy.clone());
            }
            ManagerCommand::SetPolicy { patch, reply } => {
                let result = self.set_policy(patch);
                let _ = reply.send(result);
            }
            ManagerCommand::Shutdown { reply } => {
                // handled by the run loop
                let _ = reply.send(());
            }
        }
    }

    fn submit(&mut self, files: Vec<FileDescriptor>) -> SubmitOutcome {
        let mut outcome = SubmitOutcome::default();

        for file in files {
            let violations = validate(&file, &self.policy);
            if !violations.is_empty() {
                let rejection = Rejection { name: file.name, violations };
                warn!(file = %rejection.name, reason = %rejection.reason(), "file rejected");
                outcome.rejected.push(rejection);
                continue;
            }

            let upload_id = UploadId::new();
            let task = UploadTask::new(upload_id, &file);
            if let Err(err) = self.store.insert(task, file.source) {
                warn!(upload_id = %upload_id, error = %err, "failed to admit task");
                continue;
            }
            if let Err(err) = self.queue.enqueue(upload_id) {
                warn!(upload_id = %upload_id, error = %err, "failed to queue task");
                self.store.remove(&upload_id);
                continue;
            }

            debug!(upload_id = %upload_id, file = %file.name, size = file.size, "task admitted");
            if let Some(task) = self.store.get(&upload_id) {
                self.events.emit(UploadEvent::Added(task.clone()));
            }
            outcome.accepted.push(upload_id);
        }

        self.drain();
        outcome
    }

    fn retry(&mut self, upload_id: UploadId) -> Result<()> {
        let old_state = self.store.reset_for_retry(&upload_id)?;
        self.queue.enqueue(upload_id)?;

        info!(upload_id = %upload_id, from = %old_state, "task requeued for retry");
        self.emit_state_change(upload_id, old_state);
        self.drain();
        Ok(())
    }

    fn cancel(&mut self, upload_id: UploadId) {
        let Some(state) = self.store.get(&upload_id).map(|task| task.state) else {
            return;
        };

        match state {
            UploadState::Pending => {
                self.queue.remove(&upload_id);
                if let Ok(old_state) = self.store.mark_cancelled(&upload_id, CANCELLED_MESSAGE.to_string()) {
                    info!(upload_id = %upload_id, "pending task cancelled");
                    self.emit_state_change(upload_id, old_state);
                }
            }
            UploadState::Uploading => {
                // Recorded now, applied at settlement whatever the engine says.
                if let Some(active) = self.active.get_mut(&upload_id) {
                    active.cancel_requested = true;
                    active.cancellation_token.cancel();
                    info!(upload_id = %upload_id, "cancellation requested");
                }
            }
            UploadState::Completed | UploadState::Error | UploadState::Cancelled => {}
        }

        self.drain();
    }

    fn remove(&mut self, upload_id: UploadId) {
        self.queue.remove(&upload_id);

        // The slot stays occupied until the aborted transfer settles.
        if let Some(active) = self.active.get_mut(&upload_id) {
            active.cancel_requested = true;
            active.cancellation_token.cancel();
        }

        if self.store.remove(&upload_id).is_some() {
            debug!(upload_id = %upload_id, "task removed");
            self.events.emit(UploadEvent::Removed { upload_id });
        }
    }

    fn clear_completed(&mut self) -> usize {
        let completed = self.store.ids_in_state(UploadState::Completed);
        for upload_id in &completed {
            self.remove(*upload_id);
        }

        completed.len()
    }

    fn set_policy(&mut self, patch: PolicyPatch) -> Result<UploadPolicy> {
        let policy = self.policy.apply(patch)?;
        if policy != self.policy {
            info!(
                max_file_size = policy.max_file_size,
                max_concurrent = policy.max_concurrent_uploads,
                auto_compress = policy.auto_compress,
                "upload policy changed"
            );
            self.policy = policy.clone();
            self.events.emit(UploadEvent::PolicyChanged(policy.clone()));
        }

        self.drain();
        Ok(policy)
    }

    /// Fill free slots from the front of the queue.
    fn drain(&mut self) {
        loop {
            let available = self.policy.max_concurrent_uploads.saturating_sub(self.active.len());
            if available == 0 || self.queue.is_empty() {
                break;
            }

            for upload_id in self.queue.drain(available) {
                self.dispatch(upload_id);
            }
        }
    }

    fn dispatch(&mut self, upload_id: UploadId) {
        let Some(source) = self.store.source(&upload_id).cloned() else {
            return;
        };
        let old_state = match self.store.mark_uploading(&upload_id) {
            Ok(old_state) => old_state,
            Err(err) => {
                warn!(upload_id = %upload_id, error = %err, "skipping queued task");
                return;
            }
        };
        let Some(task) = self.store.get(&upload_id).cloned() else {
            return;
        };

        let cancellation_token = CancellationToken::new();
        let attempt = task.retry_count;
        self.active.insert(upload_id, ActiveTransfer {
            attempt,
            started: Instant::now(),
            cancellation_token: cancellation_token.clone(),
            cancel_requested: false,
        });

        let job = TransferJob {
            upload_id,
            name: task.name.clone(),
            size: task.size,
            mime_type: task.mime_type.clone(),
            source,
            auto_compress: self.policy.auto_compress,
        };
        let worker = TransferWorker {
            engine: self.engine.clone(),
            cancellation_token,
            progress: ProgressSink::new(upload_id, attempt, self.progress_tx.clone()),
        };

        let outcome_tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let result = worker.run(job).await;
            let _ = outcome_tx.send(TransferOutcome { upload_id, attempt, result });
        });

        info!(upload_id = %upload_id, file = %task.name, attempt, active = self.active.len(), "upload dispatched");
        self.emit_state_change(upload_id, old_state);
    }

    fn handle_progress(&mut self, tick: ProgressTick) {
        let Some(active) = self.active.get(&tick.upload_id) else {
            return;
        };
        if active.attempt != tick.attempt || active.cancel_requested {
            return;
        }
        // A short tick never rewinds the byte count, so estimate from the high-water mark.
        let Some((uploaded_bytes, total_bytes)) = self
            .store
            .get(&tick.upload_id)
            .map(|task| (task.uploaded_bytes.max(tick.uploaded_bytes), task.size))
        else {
            return;
        };

        let elapsed = tick.at.saturating_duration_since(active.started);
        let snapshot = ProgressSnapshot::estimate(uploaded_bytes, total_bytes, elapsed);

        if let Some(task) = self.store.apply_progress(&tick.upload_id, &snapshot) {
            let progress = ProgressSnapshot {
                progress: task.progress,
                ..snapshot
            };
            self.events.emit(UploadEvent::Progress {
                upload_id: tick.upload_id,
                progress,
            });
        }
    }

    fn handle_outcome(&mut self, outcome: TransferOutcome) {
        let TransferOutcome { upload_id, attempt, result } = outcome;

        let cancel_requested = match self.active.get(&upload_id) {
            Some(active) if active.attempt == attempt => active.cancel_requested,
            _ => {
                warn!(upload_id = %upload_id, attempt, "ignoring outcome of unknown transfer");
                return;
            }
        };
        self.active.remove(&upload_id);

        if self.store.contains(&upload_id) {
            let settled = match result {
                _ if cancel_requested => self.store.mark_cancelled(&upload_id, CANCELLED_MESSAGE.to_string()),
                Err(err) if err.is_aborted() => self.store.mark_cancelled(&upload_id, CANCELLED_MESSAGE.to_string()),
                Ok(result_location) => {
                    info!(upload_id = %upload_id, location = %result_location, "upload completed");
                    self.store.mark_completed(&upload_id, result_location)
                }
                Err(err) => {
                    warn!(upload_id = %upload_id, error = %err, "upload failed");
                    self.store.mark_failed(&upload_id, err.to_string())
                }
            };

            match settled {
                Ok(old_state) => self.emit_state_change(upload_id, old_state),
                Err(err) => warn!(upload_id = %upload_id, error = %err, "failed to settle task"),
            }
        }

        self.drain();
    }

    fn emit_state_change(&self, upload_id: UploadId, old_state: UploadState) {
        if let Some(task) = self.store.get(&upload_id) {
            self.events.emit(UploadEvent::StateChanged {
                upload_id,
                old_state,
                new_state: task.state,
                task: task.clone(),
            });
        }
    }

    fn shutdown(&mut self) {
        for (upload_id, active) in self.active.iter_mut() {
            debug!(upload_id = %upload_id, "aborting transfer for shutdown");
            active.cancel_requested = true;
            active.cancellation_token.cancel();
        }

        self.events.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use async_trait::async_trait;
    use super::*;
    use crate::core::errors::TransferError;
    use crate::core::types::FileSource;

    /// Never finishes on its own; outcomes are injected by the tests.
    struct IdleEngine;

    #[async_trait]
    impl TransferEngine for IdleEngine {
        async fn transfer(&self, _job: TransferJob, _progress: ProgressSink, abort: CancellationToken) -> Result<String, TransferError> {
            abort.cancelled().await;
            Err(TransferError::Aborted)
        }
    }

    fn scheduler(max_concurrent_uploads: usize) -> Scheduler {
        let policy = UploadPolicy {
            max_concurrent_uploads,
            ..UploadPolicy::default()
        };
        Scheduler::new(Arc::new(IdleEngine), policy, EventHub::new())
    }

    fn png(name: &str) -> FileDescriptor {
        FileDescriptor::new(name, 1_000, "image/png", FileSource::Memory(Default::default()))
    }

    fn state(scheduler: &Scheduler, upload_id: UploadId) -> UploadState {
        scheduler.store.get(&upload_id).unwrap().state
    }

    #[tokio::test]
    async fn late_success_after_cancel_settles_as_cancelled() {
        let mut scheduler = scheduler(1);
        let id = scheduler.submit(vec![png("a.png")]).accepted[0];
        assert_eq!(state(&scheduler, id), UploadState::Uploading);

        scheduler.cancel(id);
        assert_eq!(state(&scheduler, id), UploadState::Uploading);

        let attempt = scheduler.active[&id].attempt;
        scheduler.handle_outcome(TransferOutcome {
            upload_id: id,
            attempt,
            result: Ok("https://example.com/files/a.png".to_string()),
        });

        let task = scheduler.store.get(&id).unwrap();
        assert_eq!(task.state, UploadState::Cancelled);
        assert_eq!(task.error.as_deref(), Some(CANCELLED_MESSAGE));
        assert!(task.result_location.is_none());
        assert!(scheduler.active.is_empty());
    }

    #[tokio::test]
    async fn settlement_frees_slot_and_dispatches_next() {
        let mut scheduler = scheduler(1);
        let ids = scheduler.submit(vec![png("a.png"), png("b.png")]).accepted;
        assert_eq!(state(&scheduler, ids[1]), UploadState::Pending);

        scheduler.handle_outcome(TransferOutcome {
            upload_id: ids[0],
            attempt: 0,
            result: Err(TransferError::network("Upload failed due to network error")),
        });

        assert_eq!(state(&scheduler, ids[0]), UploadState::Error);
        assert_eq!(state(&scheduler, ids[1]), UploadState::Uploading);
        assert_eq!(scheduler.active.len(), 1);
    }

    #[tokio::test]
    async fn stale_progress_from_previous_attempt_is_ignored() {
        let mut scheduler = scheduler(1);
        let id = scheduler.submit(vec![png("a.png")]).accepted[0];
        scheduler.handle_outcome(TransferOutcome {
            upload_id: id,
            attempt: 0,
            result: Err(TransferError::network("boom")),
        });
        scheduler.retry(id).unwrap();
        assert_eq!(state(&scheduler, id), UploadState::Uploading);

        scheduler.handle_progress(ProgressTick {
            upload_id: id,
            attempt: 0,
            uploaded_bytes: 900,
            at: Instant::now(),
        });
        assert_eq!(scheduler.store.get(&id).unwrap().progress, 0);
    }

    #[tokio::test]
    async fn short_tick_reports_consistent_snapshot() {
        let mut scheduler = scheduler(1);
        let mut events = scheduler.events.subscribe();
        let id = scheduler.submit(vec![png("a.png")]).accepted[0];
        let started = scheduler.active[&id].started;

        for (uploaded_bytes, secs) in [(600, 1), (300, 2)] {
            scheduler.handle_progress(ProgressTick {
                upload_id: id,
                attempt: 0,
                uploaded_bytes,
                at: started + Duration::from_secs(secs),
            });
        }

        let mut reported = Vec::new();
        while reported.len() < 2 {
            if let Some(UploadEvent::Progress { progress, .. }) = events.recv().await {
                reported.push(progress);
            }
        }
        let last = reported[1];
        assert_eq!(last.uploaded_bytes, 600);
        assert_eq!(last.progress, 60);
        assert_eq!(last.speed, 300.0);
        assert_eq!(last.eta_seconds, Some(400.0 / 300.0));

        let task = scheduler.store.get(&id).unwrap();
        assert_eq!(task.speed, 300.0);
        assert_eq!(task.eta_seconds, last.eta_seconds);
    }

    #[tokio::test]
    async fn aborted_outcome_settles_as_cancelled() {
        let mut scheduler = scheduler(1);
        let id = scheduler.submit(vec![png("a.png")]).accepted[0];

        scheduler.handle_outcome(TransferOutcome { upload_id: id, attempt: 0, result: Err(TransferError::Aborted) });
        assert_eq!(state(&scheduler, id), UploadState::Cancelled);
    }

    #[tokio::test]
    async fn removed_uploading_task_keeps_slot_until_settled() {
        let mut scheduler = scheduler(1);
        let ids = scheduler.submit(vec![png("a.png"), png("b.png")]).accepted;

        scheduler.remove(ids[0]);
        assert!(scheduler.store.get(&ids[0]).is_none());
        assert_eq!(state(&scheduler, ids[1]), UploadState::Pending);

        scheduler.handle_outcome(TransferOutcome {
            upload_id: ids[0],
            attempt: 0,
            result: Err(TransferError::Aborted),
        });
        assert_eq!(state(&scheduler, ids[1]), UploadState::Uploading);
    }

    #[tokio::test]
    async fn lowering_budget_does_not_preempt() {
        let mut scheduler = scheduler(2);
        let ids = scheduler.submit(vec![png("a.png"), png("b.png"), png("c.png")]).accepted;

        scheduler
            .set_policy(PolicyPatch {
                max_concurrent_uploads: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(state(&scheduler, ids[0]), UploadState::Uploading);
        assert_eq!(state(&scheduler, ids[1]), UploadState::Uploading);

        scheduler.handle_outcome(TransferOutcome { upload_id: ids[0], attempt: 0, result: Ok("a".into()) });
        // one still running, budget is one
        assert_eq!(state(&scheduler, ids[2]), UploadState::Pending);

        scheduler.handle_outcome(TransferOutcome { upload_id: ids[1], attempt: 0, result: Ok("b".into()) });
        assert_eq!(state(&scheduler, ids[2]), UploadState::Uploading);
    }
}
