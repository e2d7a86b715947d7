use std::time::Duration;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;
use crate::core::{ProgressSink, Result, TransferEngine, TransferError, TransferJob, UploadId};

pub const DEFAULT_BASE_URL: &str = "https://example.com/files";
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(100);
pub const NETWORK_ERROR_MESSAGE: &str = "Upload failed due to network error";
const MIN_CHUNK_SIZE: u64 = 8192;
const CHUNKS_PER_FILE: u64 = 50;

/// 模拟上传器 - sends nothing, only paces progress chunk by chunk.
///
/// Deterministic: a fixed delay per chunk and an optional scripted failure,
/// so the same job always produces the same ticks.
#[derive(Debug, Clone)]
pub struct SimulatedEngine {
    chunk_delay: Duration,
    failure_after: Option<u64>,
    base_url: String,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self {
            chunk_delay: DEFAULT_CHUNK_DELAY,
            failure_after: None,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_chunk_delay(mut self, chunk_delay: Duration) -> Self {
        self.chunk_delay = chunk_delay;
        self
    }

    /// Fail every transfer once `chunks` chunks have been sent. Zero fails
    /// before the first chunk.
    pub fn with_failure_after(mut self, chunks: u64) -> Self {
        self.failure_after = Some(chunks);
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, TransferError> {
        let parsed = Url::parse(base_url)?;
        if parsed.cannot_be_a_base() {
            return Err(TransferError::Internal(format!("{} cannot be a base url", base_url)));
        }

        self.base_url = parsed.into();
        Ok(self)
    }

    /// At least 8KB, otherwise a fiftieth of the file.
    pub fn chunk_size(total_bytes: u64) -> u64 {
        (total_bytes / CHUNKS_PER_FILE).max(MIN_CHUNK_SIZE)
    }

    /// `{base}/{id}/{name}` with the name percent-encoded.
    pub fn result_location(&self, upload_id: UploadId, name: &str) -> Result<String, TransferError> {
        let mut location = Url::parse(&self.base_url)?;
        location
            .path_segments_mut()
            .map_err(|_| TransferError::Internal("base url cannot have path segments".to_string()))?
            .pop_if_empty()
            .push(&upload_id.to_string())
            .push(name);

        Ok(location.into())
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransferEngine for SimulatedEngine {
    async fn transfer(&self, job: TransferJob, progress: ProgressSink, abort: CancellationToken) -> Result<String, TransferError> {
        let total_bytes = job.size;
        let chunk_size = Self::chunk_size(total_bytes);
        let mut uploaded = 0u64;
        let mut chunks = 0u64;

        debug!(upload_id = %job.upload_id, total_bytes, chunk_size, "simulated upload started");

        if self.failure_after == Some(0) {
            return Err(TransferError::network(NETWORK_ERROR_MESSAGE));
        }

        while uploaded < total_bytes {
            tokio::select! {
                _ = abort.cancelled() => return Err(TransferError::Aborted),
                _ = tokio::time::sleep(self.chunk_delay) => {}
            }

            uploaded = (uploaded + chunk_size).min(total_bytes);
            chunks += 1;
            progress.report(uploaded);

            if self.failure_after == Some(chunks) {
                return Err(TransferError::network(NETWORK_ERROR_MESSAGE));
            }
        }

        self.result_location(job.upload_id, &job.name)
    }

    fn name(&self) -> &str {
        "simulated"
    }
}
