use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;
use super::errors::{Result, UploadError};
use super::progress::ProgressSnapshot;
use super::task::UploadTask;
use super::validator::Rejection;
use crate::utils::mime_from_path;

/// 上传任务唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct UploadId(Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 上传状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// 等待中（在队列中）
    Pending,
    /// 上传中
    Uploading,
    /// 已完成
    Completed,
    /// 失败
    Error,
    /// 已取消
    Cancelled,
}

impl UploadState {
    /// Whether the state machine allows `self -> next`. Removal is not a
    /// transition and is allowed from every state.
    pub fn can_transition_to(self, next: UploadState) -> bool {
        use UploadState::*;

        matches!(
            (self, next),
            (Pending, Uploading)
                | (Uploading, Completed)
                | (Uploading, Error)
                | (Uploading, Cancelled)
                | (Pending, Cancelled)
                | (Error, Pending)
                | (Cancelled, Pending)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Error | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission and dispatch policy, supplied from outside the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadPolicy {
    /// 单个文件最大字节数
    pub max_file_size: u64,
    /// 允许的 MIME 类型
    pub allowed_types: BTreeSet<String>,
    /// 最大并发数
    pub max_concurrent_uploads: usize,
    /// 只由传输引擎使用
    pub auto_compress: bool,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        let allowed_types = [
            "image/jpeg",
            "image/png",
            "image/gif",
            "image/webp",
            "application/pdf",
            "text/plain",
            "video/mp4",
            "audio/mpeg",
            "application/zip",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Self {
            max_file_size: 10 * 1024 * 1024, // 10MB
            allowed_types,
            max_concurrent_uploads: 3,
            auto_compress: false,
        }
    }
}

impl UploadPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_uploads == 0 {
            return Err(UploadError::InvalidPolicy(
                "max_concurrent_uploads must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn allows_type(&self, mime_type: &str) -> bool {
        self.allowed_types.contains(mime_type)
    }

    /// Overlay `patch` on a copy of this policy and validate the result.
    pub fn apply(&self, patch: PolicyPatch) -> Result<UploadPolicy> {
        let mut next = self.clone();

        if let Some(max_file_size) = patch.max_file_size {
            next.max_file_size = max_file_size;
        }
        if let Some(allowed_types) = patch.allowed_types {
            next.allowed_types = allowed_types;
        }
        if let Some(max_concurrent_uploads) = patch.max_concurrent_uploads {
            next.max_concurrent_uploads = max_concurrent_uploads;
        }
        if let Some(auto_compress) = patch.auto_compress {
            next.auto_compress = auto_compress;
        }

        next.validate()?;
        Ok(next)
    }
}

/// Partial policy update; `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyPatch {
    pub max_file_size: Option<u64>,
    pub allowed_types: Option<BTreeSet<String>>,
    pub max_concurrent_uploads: Option<usize>,
    pub auto_compress: Option<bool>,
}

impl PolicyPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Where the bytes of a submitted file live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    Path(PathBuf),
    Memory(Bytes),
}

/// A candidate file handed to `submit`.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub source: FileSource,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>, source: FileSource) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            source,
        }
    }

    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self::new(name, data.len() as u64, mime_type, FileSource::Memory(data))
    }

    /// Describe a file on disk. The MIME type is inferred from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a file", path.display()),
            ));
        }

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self::new(name, metadata.len(), mime_from_path(path), FileSource::Path(path.to_path_buf())))
    }
}

/// Everything an engine needs to move one task's bytes.
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub upload_id: UploadId,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub source: FileSource,
    pub auto_compress: bool,
}

/// Result of a `submit` call
#[derive(Debug, Clone, Default)]
pub struct SubmitOutcome {
    pub accepted: Vec<UploadId>,
    pub rejected: Vec<Rejection>,
}

/// 各状态任务数量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStats {
    pub total: usize,
    pub pending: usize,
    pub uploading: usize,
    pub completed: usize,
    /// error + cancelled
    pub failed: usize,
}

/// 上传事件
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// 任务已添加
    Added(UploadTask),

    /// 状态变更
    StateChanged {
        upload_id: UploadId,
        old_state: UploadState,
        new_state: UploadState,
        task: UploadTask,
    },

    /// 进度更新
    Progress {
        upload_id: UploadId,
        progress: ProgressSnapshot,
    },

    /// 任务已删除
    Removed {
        upload_id: UploadId,
    },

    /// 策略变更
    PolicyChanged(UploadPolicy),
}

impl UploadEvent {
    pub fn upload_id(&self) -> Option<UploadId> {
        match self {
            Self::Added(task) => Some(task.id),
            Self::StateChanged { upload_id, .. }
            | Self::Progress { upload_id, .. }
            | Self::Removed { upload_id } => Some(*upload_id),
            Self::PolicyChanged(_) => None,
        }
    }
}

/// 上传管理器命令
pub(crate) enum ManagerCommand {
    Submit {
        files: Vec<FileDescriptor>,
        reply: oneshot::Sender<SubmitOutcome>,
    },

    Retry {
        upload_id: UploadId,
        reply: oneshot::Sender<Result<()>>,
    },

    Cancel {
        upload_id: UploadId,
        reply: oneshot::Sender<()>,
    },

    Remove {
        upload_id: UploadId,
        reply: oneshot::Sender<()>,
    },

    GetTask {
        upload_id: UploadId,
        reply: oneshot::Sender<Option<UploadTask>>,
    },

    GetAllTasks {
        reply: oneshot::Sender<Vec<UploadTask>>,
    },

    Stats {
        reply: oneshot::Sender<UploadStats>,
    },

    /// 清除所有 Completed 状态的任务
    ClearCompleted {
        reply: oneshot::Sender<usize>,
    },

    GetPolicy {
        reply: oneshot::Sender<UploadPolicy>,
    },

    SetPolicy {
        patch: PolicyPatch,
        reply: oneshot::Sender<Result<UploadPolicy>>,
    },

    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// 静态断言确保类型是 Send 的
const _: fn() = || {
    fn assert_send<T: Send>() {}
    assert_send::<UploadTask>();
    assert_send::<UploadEvent>();
    assert_send::<ManagerCommand>();
};
