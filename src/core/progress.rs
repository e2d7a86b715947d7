use std::time::Duration;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use super::types::UploadId;

/// Progress derived from one transfer tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    /// 完成百分比 (0..=100)
    pub progress: u8,
    /// bytes/sec
    pub speed: f64,
    /// `None` while the speed is still unknown
    pub eta_seconds: Option<f64>,
}

impl ProgressSnapshot {
    pub fn estimate(uploaded_bytes: u64, total_bytes: u64, elapsed: Duration) -> Self {
        let speed = calculate_speed(uploaded_bytes, elapsed);

        Self {
            uploaded_bytes,
            total_bytes,
            progress: calculate_percentage(uploaded_bytes, total_bytes),
            speed,
            eta_seconds: calculate_eta(uploaded_bytes, total_bytes, speed),
        }
    }
}

pub fn calculate_percentage(uploaded_bytes: u64, total_bytes: u64) -> u8 {
    if total_bytes == 0 {
        return 0;
    }

    let ratio = (uploaded_bytes as f64 / total_bytes as f64).min(1.0);
    (ratio * 100.0).round().clamp(0.0, 100.0) as u8
}

pub fn calculate_speed(uploaded_bytes: u64, elapsed: Duration) -> f64 {
    let elapsed = elapsed.as_secs_f64();
    if elapsed > 0.0 {
        uploaded_bytes as f64 / elapsed
    } else {
        0.0
    }
}

pub fn calculate_eta(uploaded_bytes: u64, total_bytes: u64, speed: f64) -> Option<f64> {
    if speed > 0.0 {
        let remaining = total_bytes.saturating_sub(uploaded_bytes);
        Some(remaining as f64 / speed)
    } else {
        None
    }
}

/// Raw report from an engine: cumulative bytes at an instant.
#[derive(Debug, Clone, Copy)]
pub struct ProgressTick {
    pub upload_id: UploadId,
    pub attempt: u32,
    pub uploaded_bytes: u64,
    pub at: Instant,
}

/// Handed to a transfer engine so it can report cumulative bytes for the
/// one task it is moving.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    upload_id: UploadId,
    attempt: u32,
    tx: mpsc::UnboundedSender<ProgressTick>,
}

impl ProgressSink {
    pub fn new(upload_id: UploadId, attempt: u32, tx: mpsc::UnboundedSender<ProgressTick>) -> Self {
        Self { upload_id, attempt, tx }
    }

    pub fn report(&self, uploaded_bytes: u64) {
        // The scheduler may already be gone during shutdown.
        let _ = self.tx.send(ProgressTick {
            upload_id: self.upload_id,
            attempt: self.attempt,
            uploaded_bytes,
            at: Instant::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halfway_after_two_seconds() {
        let snapshot = ProgressSnapshot::estimate(500_000, 1_000_000, Duration::from_secs(2));

        assert_eq!(snapshot.progress, 50);
        assert_eq!(snapshot.speed, 250_000.0);
        assert_eq!(snapshot.eta_seconds, Some(2.0));
    }

    #[test]
    fn zero_elapsed_means_unknown_eta() {
        let snapshot = ProgressSnapshot::estimate(100, 1_000, Duration::ZERO);

        assert_eq!(snapshot.speed, 0.0);
        assert_eq!(snapshot.eta_seconds, None);
        assert_eq!(snapshot.progress, 10);
    }

    #[test]
    fn percentage_is_rounded_and_clamped() {
        assert_eq!(calculate_percentage(1, 3), 33);
        assert_eq!(calculate_percentage(2, 3), 67);
        assert_eq!(calculate_percentage(5_000, 1_000), 100);
        assert_eq!(calculate_percentage(0, 0), 0);
    }

    #[test]
    fn finished_transfer_has_zero_eta() {
        let snapshot = ProgressSnapshot::estimate(1_000, 1_000, Duration::from_millis(500));
        assert_eq!(snapshot.eta_seconds, Some(0.0));
    }

    #[tokio::test]
    async fn sink_tags_ticks_with_task_and_attempt() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let upload_id = UploadId::new();
        let sink = ProgressSink::new(upload_id, 3, tx);

        sink.report(10);
        sink.report(20);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!((first.upload_id, first.attempt, first.uploaded_bytes), (upload_id, 3, 10));
        assert_eq!(second.uploaded_bytes, 20);
        assert!(second.at >= first.at);
    }
}
