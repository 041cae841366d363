use std::sync::{Mutex, mpsc};

use crate::manager::LogicalImageId;

/// Mutation recorded off the GPU thread and applied by
/// [`SharedBackendManager::resolve_deferred`](crate::SharedBackendManager::resolve_deferred).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredOp {
    Dispose(LogicalImageId),
    MakeShared(LogicalImageId),
    EnsureNotShared(LogicalImageId),
}

/// Multi-producer queue drained in submission order at sync points.
#[derive(Debug)]
pub struct DeferredQueue<Op> {
    sender: mpsc::Sender<Op>,
    receiver: Mutex<mpsc::Receiver<Op>>,
}

impl<Op> Default for DeferredQueue<Op> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Op> DeferredQueue<Op> {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    pub fn enqueue(&self, operation: Op) {
        // The receiver lives as long as `self`, so sending cannot fail.
        let _ = self.sender.send(operation);
    }

    pub fn drain(&self) -> Vec<Op> {
        let mut operations = Vec::new();
        let receiver = self
            .receiver
            .lock()
            .expect("deferred queue receiver lock poisoned");
        loop {
            match receiver.try_recv() {
                Ok(operation) => operations.push(operation),
                Err(mpsc::TryRecvError::Empty) | Err(mpsc::TryRecvError::Disconnected) => break,
            }
        }
        operations
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn drain_preserves_submission_order() {
        let queue = DeferredQueue::new();
        for value in 0..5u32 {
            queue.enqueue(value);
        }
        assert_eq!(queue.drain(), vec![0, 1, 2, 3, 4]);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn enqueue_from_other_threads() {
        let queue = Arc::new(DeferredQueue::new());
        let workers: Vec<_> = (0..4u32)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for step in 0..8u32 {
                        queue.enqueue(worker * 100 + step);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker thread");
        }

        let mut drained = queue.drain();
        assert_eq!(drained.len(), 32);
        drained.sort_unstable();
        drained.dedup();
        assert_eq!(drained.len(), 32);
    }
}
