use std::collections::VecDeque;
use super::errors::{Result, UploadError};
use super::types::UploadId;

/// FIFO backlog of tasks waiting for a dispatch slot.
///
/// Owned by the scheduler worker, so every `drain` runs under `&mut self`
/// and two drains can never hand out the same id.
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    pending: VecDeque<UploadId>,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, upload_id: UploadId) -> Result<()> {
        if self.contains(&upload_id) {
            return Err(UploadError::DuplicateTask(upload_id));
        }

        self.pending.push_back(upload_id);
        Ok(())
    }

    /// Take up to `n` ids from the front.
    pub fn drain(&mut self, n: usize) -> Vec<UploadId> {
        let count = n.min(self.pending.len());
        self.pending.drain(..count).collect()
    }

    /// Returns whether the id was queued.
    pub fn remove(&mut self, upload_id: &UploadId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|id| id != upload_id);
        self.pending.len() != before
    }

    pub fn contains(&self, upload_id: &UploadId) -> bool {
        self.pending.contains(upload_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_is_fifo_and_keeps_remainder_order() {
        let ids: Vec<_> = (0..5).map(|_| UploadId::new()).collect();
        let mut queue = AdmissionQueue::new();
        for id in &ids {
            queue.enqueue(*id).unwrap();
        }

        assert_eq!(queue.drain(2), ids[..2].to_vec());
        assert_eq!(queue.drain(10), ids[2..].to_vec());
        assert!(queue.is_empty());
        assert!(queue.drain(3).is_empty());
    }

    #[test]
    fn enqueue_rejects_duplicates() {
        let id = UploadId::new();
        let mut queue = AdmissionQueue::new();
        queue.enqueue(id).unwrap();

        let err = queue.enqueue(id).unwrap_err();
        assert!(matches!(err, UploadError::DuplicateTask(dup) if dup == id));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn remove_is_noop_when_absent() {
        let (a, b) = (UploadId::new(), UploadId::new());
        let mut queue = AdmissionQueue::new();
        queue.enqueue(a).unwrap();
        queue.enqueue(b).unwrap();

        assert!(queue.remove(&a));
        assert!(!queue.remove(&a));
        assert_eq!(queue.drain(1), vec![b]);

        // already dispatched
        assert!(!queue.remove(&b));
    }

    #[test]
    fn drained_id_can_be_enqueued_again() {
        let id = UploadId::new();
        let mut queue = AdmissionQueue::new();
        queue.enqueue(id).unwrap();
        queue.drain(1);

        queue.enqueue(id).unwrap();
        assert!(queue.contains(&id));
    }
}
