use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use super::errors::{Result, TransferError};
use super::progress::ProgressSink;
use super::traits::TransferEngine;
use super::types::{TransferJob, UploadId};

/// Settlement of one dispatched attempt, sent back to the scheduler.
#[derive(Debug)]
pub(crate) struct TransferOutcome {
    pub upload_id: UploadId,
    pub attempt: u32,
    pub result: Result<String, TransferError>,
}

/// Runs one engine call for one task.
pub(crate) struct TransferWorker {
    pub(crate) engine: Arc<dyn TransferEngine>,
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) progress: ProgressSink,
}

impl TransferWorker {
    /// The engine runs on its own task so a panic settles as an error and an
    /// abort is honored even if the engine never looks at the token.
    pub(crate) async fn run(self, job: TransferJob) -> Result<String, TransferError> {
        let Self { engine, cancellation_token, progress } = self;

        let mut handle = tokio::spawn({
            let abort = cancellation_token.clone();
            async move { engine.transfer(job, progress, abort).await }
        });

        tokio::select! {
            biased;
            joined = &mut handle => match joined {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => Err(TransferError::Aborted),
                Err(err) => Err(TransferError::Internal(format!("Transfer task panicked: {}", err))),
            },
            _ = cancellation_token.cancelled() => {
                handle.abort();
                Err(TransferError::Aborted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use super::*;
    use crate::core::types::FileSource;

    struct StubbornEngine;

    #[async_trait]
    impl TransferEngine for StubbornEngine {
        async fn transfer(&self, _job: TransferJob, _progress: ProgressSink, _abort: CancellationToken) -> Result<String, TransferError> {
            // never looks at the token
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("too late".to_string())
        }
    }

    struct PanickingEngine;

    #[async_trait]
    impl TransferEngine for PanickingEngine {
        async fn transfer(&self, _job: TransferJob, _progress: ProgressSink, _abort: CancellationToken) -> Result<String, TransferError> {
            panic!("engine bug");
        }
    }

    fn job() -> TransferJob {
        TransferJob {
            upload_id: UploadId::new(),
            name: "a.png".to_string(),
            size: 0,
            mime_type: "image/png".to_string(),
            source: FileSource::Memory(Default::default()),
            auto_compress: false,
        }
    }

    fn worker(engine: Arc<dyn TransferEngine>, token: CancellationToken) -> TransferWorker {
        let (tx, _rx) = mpsc::unbounded_channel();
        TransferWorker {
            engine,
            cancellation_token: token,
            progress: ProgressSink::new(UploadId::new(), 0, tx),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn abort_wins_over_engine_that_ignores_token() {
        let token = CancellationToken::new();
        let run = tokio::spawn(worker(Arc::new(StubbornEngine), token.clone()).run(job()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();

        let result = run.await.unwrap();
        assert!(matches!(result, Err(TransferError::Aborted)));
    }

    #[tokio::test]
    async fn engine_panic_becomes_internal_error() {
        let result = worker(Arc::new(PanickingEngine), CancellationToken::new()).run(job()).await;

        match result {
            Err(TransferError::Internal(message)) => assert!(message.contains("panicked")),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
