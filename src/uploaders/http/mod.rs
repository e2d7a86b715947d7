mod stream;

use std::time::Duration;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;
use crate::core::{ProgressSink, Result, TransferEngine, TransferError, TransferJob};

pub use stream::{source_stream, ProgressStream, MEMORY_CHUNK_SIZE};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// HTTP 上传器 - one multipart POST per task
pub struct HttpEngine {
    client: Client,
    endpoint: Url,
}

impl HttpEngine {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, TransferError> {
        let endpoint = Url::parse(endpoint)?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self { client, endpoint })
    }

    async fn send(&self, job: TransferJob, progress: ProgressSink) -> Result<String, TransferError> {
        let body = ProgressStream::new(source_stream(&job.source).await?, progress);

        let part = Part::stream_with_length(Body::wrap_stream(body), job.size)
            .file_name(job.name.clone())
            .mime_str(&job.mime_type)?;
        let form = Form::new()
            .text("autoCompress", job.auto_compress.to_string())
            .part("file", part);

        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await?;

        // 检查响应状态
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TransferError::server_error(status.as_u16(), message));
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        let body = match location {
            Some(_) => None,
            None => response.json::<serde_json::Value>().await.ok(),
        };

        Ok(resolve_location(location, body.as_ref(), &self.endpoint))
    }
}

/// `Location` header, else the body's `url` field, else the endpoint.
/// Relative references resolve against the endpoint.
fn resolve_location(location: Option<String>, body: Option<&serde_json::Value>, endpoint: &Url) -> String {
    location
        .or_else(|| {
            body.and_then(|body| body.get("url"))
                .and_then(|url| url.as_str())
                .map(String::from)
        })
        .map(|reference| match endpoint.join(&reference) {
            Ok(resolved) => resolved.to_string(),
            Err(_) => reference,
        })
        .unwrap_or_else(|| endpoint.to_string())
}

#[async_trait]
impl TransferEngine for HttpEngine {
    async fn transfer(&self, job: TransferJob, progress: ProgressSink, abort: CancellationToken) -> Result<String, TransferError> {
        debug!(upload_id = %job.upload_id, endpoint = %self.endpoint, size = job.size, "http upload started");

        tokio::select! {
            _ = abort.cancelled() => Err(TransferError::Aborted),
            result = self.send(job, progress) => result,
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
