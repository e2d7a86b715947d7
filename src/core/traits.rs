use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use super::errors::{Result, TransferError};
use super::progress::ProgressSink;
use super::types::{TransferJob, UploadPolicy};

/// 传输引擎 - moves the bytes of one task
///
/// Implementations report cumulative bytes through `progress` and should
/// return `TransferError::Aborted` soon after `abort` fires. The scheduler
/// stops waiting on an aborted engine either way.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Returns the location of the uploaded file.
    async fn transfer(
        &self,
        job: TransferJob,
        progress: ProgressSink,
        abort: CancellationToken,
    ) -> Result<String, TransferError>;

    fn name(&self) -> &str {
        "engine"
    }
}

/// 设置存储 - loads and persists the upload policy
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> Result<UploadPolicy>;

    /// Persist `policy` and return what is now in effect.
    async fn save(&self, policy: &UploadPolicy) -> Result<UploadPolicy>;
}
