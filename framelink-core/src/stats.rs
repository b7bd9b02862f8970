//! Session counters shared between the caller thread and the worker.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for one `initialize`/`shutdown` cycle.
///
/// The caller thread bumps `attempted`/`queue_evicted`; everything else is
/// written only by the worker. All loads are relaxed — the counters are
/// diagnostics, not synchronization.
#[derive(Debug, Default)]
pub struct ShareStats {
    /// Frames handed to `queue_frame` while active.
    pub attempted: AtomicU64,
    /// Frames published through the shared channel.
    pub published: AtomicU64,
    /// Frames evicted from the intake queue by the drop-oldest policy.
    pub queue_evicted: AtomicU64,
    /// Frames skipped because conversion failed.
    pub convert_failures: AtomicU64,
    /// Frames that arrived resident in accelerator memory.
    pub hw_frames: AtomicU64,
    /// Device-to-host transfers that failed.
    pub hw_transfer_failures: AtomicU64,
    /// Channel slots overwritten while still marked ready (writer-side
    /// dropped-frame estimate, mirrored from the channel header).
    pub slot_overwrites: AtomicU64,
}

/// Plain-value copy of [`ShareStats`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub attempted: u64,
    pub published: u64,
    pub queue_evicted: u64,
    pub convert_failures: u64,
    pub hw_frames: u64,
    pub hw_transfer_failures: u64,
    pub slot_overwrites: u64,
}

impl ShareStats {
    /// Take a relaxed snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            attempted: self.attempted.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            queue_evicted: self.queue_evicted.load(Ordering::Relaxed),
            convert_failures: self.convert_failures.load(Ordering::Relaxed),
            hw_frames: self.hw_frames.load(Ordering::Relaxed),
            hw_transfer_failures: self.hw_transfer_failures.load(Ordering::Relaxed),
            slot_overwrites: self.slot_overwrites.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter (called on re-initialize).
    pub fn reset(&self) {
        self.attempted.store(0, Ordering::Relaxed);
        self.published.store(0, Ordering::Relaxed);
        self.queue_evicted.store(0, Ordering::Relaxed);
        self.convert_failures.store(0, Ordering::Relaxed);
        self.hw_frames.store(0, Ordering::Relaxed);
        self.hw_transfer_failures.store(0, Ordering::Relaxed);
        self.slot_overwrites.store(0, Ordering::Relaxed);
    }
}
