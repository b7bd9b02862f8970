//! Bounded drop-oldest intake queue between the caller and the worker.
//!
//! Capacity is deliberately tiny: the channel only ever delivers the
//! freshest frames, so holding more than two pending frames just adds
//! latency. When full, the oldest entry is evicted to admit the new one.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::types::VideoFrame;

/// Intake capacity. Two entries: the frame being superseded plus the
/// freshest arrival.
pub const INTAKE_CAPACITY: usize = 2;

/// A frame waiting for the worker, with its enqueue-time sequence number.
#[derive(Debug)]
pub(crate) struct PendingFrame {
    pub frame: VideoFrame,
    pub sequence: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    frames: VecDeque<PendingFrame>,
    stopping: bool,
}

/// Bounded queue with a drop-oldest admission policy and a condvar for the
/// worker to sleep on. `push` is O(1) and holds the lock only for the
/// append plus at most one eviction.
#[derive(Debug, Default)]
pub(crate) struct IntakeQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl IntakeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame, evicting the oldest when full.
    ///
    /// Returns the evicted frame (for accounting), or `None` when the
    /// queue had room. A stopped queue silently discards the frame.
    pub fn push(&self, pending: PendingFrame) -> Option<PendingFrame> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.stopping {
            return Some(pending);
        }
        let evicted = if state.frames.len() >= INTAKE_CAPACITY {
            state.frames.pop_front()
        } else {
            None
        };
        state.frames.push_back(pending);
        drop(state);
        self.available.notify_one();
        evicted
    }

    /// Block until a frame is available or the queue is stopped.
    ///
    /// Worker-side only. Returns `None` once stopped and drained.
    pub fn pop_wait(&self) -> Option<PendingFrame> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(frame) = state.frames.pop_front() {
                return Some(frame);
            }
            if state.stopping {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Stop the queue: wake the worker and discard anything still queued.
    pub fn stop(&self) -> usize {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.stopping = true;
        let drained = state.frames.len();
        state.frames.clear();
        drop(state);
        self.available.notify_all();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PixelFormat, Plane, SystemFrame};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    fn pending(seq: u64) -> PendingFrame {
        PendingFrame {
            frame: VideoFrame::System(SystemFrame {
                width: 16,
                height: 16,
                format: PixelFormat::Bgra8,
                planes: vec![Plane {
                    data: Bytes::from(vec![0u8; 16 * 16 * 4]),
                    stride: 64,
                }],
                timestamp_us: seq,
            }),
            sequence: seq,
        }
    }

    #[test]
    fn drop_oldest_keeps_latest() {
        let q = IntakeQueue::new();
        assert!(q.push(pending(1)).is_none());
        assert!(q.push(pending(2)).is_none());

        // Full: pushing 3 evicts 1.
        let evicted = q.push(pending(3)).unwrap();
        assert_eq!(evicted.sequence, 1);

        assert_eq!(q.pop_wait().unwrap().sequence, 2);
        assert_eq!(q.pop_wait().unwrap().sequence, 3);
    }

    #[test]
    fn stop_wakes_blocked_worker() {
        let q = Arc::new(IntakeQueue::new());
        let q2 = Arc::clone(&q);
        let worker = std::thread::spawn(move || q2.pop_wait());

        std::thread::sleep(Duration::from_millis(50));
        q.stop();
        assert!(worker.join().unwrap().is_none());
    }

    #[test]
    fn push_after_stop_discards() {
        let q = IntakeQueue::new();
        q.stop();
        assert!(q.push(pending(1)).is_some());
        assert!(q.pop_wait().is_none());
    }

    #[test]
    fn stop_reports_drained_count() {
        let q = IntakeQueue::new();
        q.push(pending(1));
        q.push(pending(2));
        assert_eq!(q.stop(), 2);
    }
}
