use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::types::{FileDescriptor, UploadId, UploadState};

/// 上传任务记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTask {
    pub id: UploadId,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub state: UploadState,
    /// 0..=100, 100 only once completed
    pub progress: u8,
    pub uploaded_bytes: u64,
    /// bytes/sec
    pub speed: f64,
    pub eta_seconds: Option<f64>,
    pub error: Option<String>,
    pub result_location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

impl UploadTask {
    pub(crate) fn new(id: UploadId, file: &FileDescriptor) -> Self {
        Self {
            id,
            name: file.name.clone(),
            size: file.size,
            mime_type: file.mime_type.clone(),
            state: UploadState::Pending,
            progress: 0,
            uploaded_bytes: 0,
            speed: 0.0,
            eta_seconds: None,
            error: None,
            result_location: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
        }
    }

    /// Drop working state derived from a transfer attempt.
    pub(crate) fn clear_transfer_state(&mut self) {
        self.uploaded_bytes = 0;
        self.speed = 0.0;
        self.eta_seconds = None;
        self.started_at = None;
        self.completed_at = None;
    }
}
