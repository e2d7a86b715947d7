use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use super::errors::{Result, UploadError};
use super::events::{EventHub, Subscription};
use super::scheduler::Scheduler;
use super::task::UploadTask;
use super::traits::TransferEngine;
use super::types::{
    FileDescriptor, ManagerCommand, PolicyPatch, SubmitOutcome, UploadId, UploadPolicy, UploadStats,
};

const COMMAND_BUFFER: usize = 100;

/// Cloneable front door to the scheduler. Every call is a message to the
/// single task that owns the state, so calls from many tasks serialize.
#[derive(Clone)]
pub struct UploadManager {
    command_tx: mpsc::Sender<ManagerCommand>,
    events: EventHub,
}

/// 上传管理器句柄 - 包含管理器和工作线程
pub struct UploadManagerHandle {
    pub manager: UploadManager,
    pub worker_handle: JoinHandle<()>,
}

impl UploadManagerHandle {
    /// Abort running transfers, end every subscription and wait for the
    /// scheduler to exit.
    pub async fn shutdown(self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .manager
            .command_tx
            .send(ManagerCommand::Shutdown { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }

        drop(self.manager);
        self.worker_handle
            .await
            .map_err(|err| UploadError::internal_error(format!("Worker panic: {}", err)))
    }
}

impl UploadManager {
    /// Spawn the scheduler on the current runtime.
    pub fn new(engine: Arc<dyn TransferEngine>, policy: UploadPolicy) -> Result<UploadManagerHandle> {
        policy.validate()?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let events = EventHub::new();

        let worker_handle = tokio::spawn(Scheduler::new(engine, policy, events.clone()).run(command_rx));

        let manager = Self { command_tx, events };

        Ok(UploadManagerHandle {
            manager,
            worker_handle,
        })
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| UploadError::ManagerShutdown)?;

        // 等待响应
        reply_rx.await.map_err(|_| UploadError::ManagerShutdown)
    }

    /// Validate and admit files. Accepted files are dispatched before this
    /// returns if there are free slots.
    pub async fn submit(&self, files: Vec<FileDescriptor>) -> Result<SubmitOutcome> {
        self.request(|reply| ManagerCommand::Submit { files, reply }).await
    }

    /// Requeue a task in Error or Cancelled.
    pub async fn retry(&self, upload_id: UploadId) -> Result<()> {
        self.request(|reply| ManagerCommand::Retry { upload_id, reply }).await?
    }

    /// No-op for unknown or already settled tasks.
    pub async fn cancel(&self, upload_id: UploadId) -> Result<()> {
        self.request(|reply| ManagerCommand::Cancel { upload_id, reply }).await
    }

    /// Forget a task, aborting it first if it is running.
    pub async fn remove(&self, upload_id: UploadId) -> Result<()> {
        self.request(|reply| ManagerCommand::Remove { upload_id, reply }).await
    }

    pub async fn get_task(&self, upload_id: UploadId) -> Result<Option<UploadTask>> {
        self.request(|reply| ManagerCommand::GetTask { upload_id, reply }).await
    }

    /// All tasks in submission order
    pub async fn get_all_tasks(&self) -> Result<Vec<UploadTask>> {
        self.request(|reply| ManagerCommand::GetAllTasks { reply }).await
    }

    pub async fn stats(&self) -> Result<UploadStats> {
        self.request(|reply| ManagerCommand::Stats { reply }).await
    }

    /// Returns how many completed tasks were removed.
    pub async fn clear_completed(&self) -> Result<usize> {
        self.request(|reply| ManagerCommand::ClearCompleted { reply }).await
    }

    pub async fn policy(&self) -> Result<UploadPolicy> {
        self.request(|reply| ManagerCommand::GetPolicy { reply }).await
    }

    /// Apply a partial policy update. Takes effect for the next admission
    /// and dispatch decision; running transfers are left alone.
    pub async fn set_policy(&self, patch: PolicyPatch) -> Result<UploadPolicy> {
        self.request(|reply| ManagerCommand::SetPolicy { patch, reply }).await?
    }

    /// 订阅事件
    ///
    /// 每个订阅者都会收到完整的事件副本，不会丢失事件
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }
}
