//! Publisher worker: drains the intake queue into the shared channel.
//!
//! One dedicated thread owns the channel, the resolver and the converter,
//! so no pixel work ever runs on the decode thread. Per-frame failures
//! skip the frame, bump a counter and log once per offending input shape;
//! nothing here tears the session down.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::channel::{SharedChannel, SlotDescriptor};
use crate::convert::PixelConverter;
use crate::layout::MIN_DIMENSION;
use crate::queue::{IntakeQueue, PendingFrame};
use crate::resolve::HardwareFrameResolver;
use crate::stats::ShareStats;

/// Handle to the running publisher thread.
#[derive(Debug)]
pub(crate) struct FramePipeline {
    queue: Arc<IntakeQueue>,
    handle: JoinHandle<()>,
}

impl FramePipeline {
    /// Spawn the worker. It takes ownership of the channel and runs until
    /// [`FramePipeline::stop`].
    pub fn start(
        channel: SharedChannel,
        queue: Arc<IntakeQueue>,
        stats: Arc<ShareStats>,
        publish_interval: Option<Duration>,
    ) -> Result<Self, crate::error::ShareError> {
        let worker_queue = Arc::clone(&queue);
        let handle = std::thread::Builder::new()
            .name("framelink-publisher".into())
            .spawn(move || {
                let mut worker = Worker {
                    channel,
                    resolver: HardwareFrameResolver::new(),
                    converter: PixelConverter::new(),
                    stats,
                    publish_interval,
                    logged_formats: HashSet::new(),
                    logged_bounds: HashSet::new(),
                    logged_hw_failure: false,
                };
                worker.run(&worker_queue);
            })?;
        Ok(Self { queue, handle })
    }

    /// Stop the worker and join it. Returns the number of frames the
    /// queue still held (they are discarded, not published).
    pub fn stop(self) -> usize {
        let drained = self.queue.stop();
        if self.handle.join().is_err() {
            error!("publisher thread panicked during shutdown");
        }
        drained
    }
}

// ── Worker ───────────────────────────────────────────────────────

struct Worker {
    channel: SharedChannel,
    resolver: HardwareFrameResolver,
    converter: PixelConverter,
    stats: Arc<ShareStats>,
    publish_interval: Option<Duration>,
    // Log-once bookkeeping so a broken stream cannot flood the log at
    // frame rate.
    logged_formats: HashSet<&'static str>,
    logged_bounds: HashSet<(u32, u32)>,
    logged_hw_failure: bool,
}

impl Worker {
    fn run(&mut self, queue: &IntakeQueue) {
        debug!(
            gpu = self.channel.is_gpu_mode(),
            format = ?self.channel.transport_format(),
            "publisher worker started"
        );
        while let Some(pending) = queue.pop_wait() {
            self.process(pending);
            if let Some(interval) = self.publish_interval {
                std::thread::sleep(interval);
            }
        }
        debug!("publisher worker stopped");
    }

    fn process(&mut self, pending: PendingFrame) {
        let (frame, was_hw) = match self.resolver.resolve(&pending.frame) {
            Ok(resolved) => resolved,
            Err(e) => {
                self.stats
                    .hw_transfer_failures
                    .fetch_add(1, Ordering::Relaxed);
                if !self.logged_hw_failure {
                    self.logged_hw_failure = true;
                    warn!(error = %e, "hardware frame readback failed, skipping such frames");
                }
                return;
            }
        };
        if was_hw {
            self.stats
                .hw_frames
                .fetch_add(1, Ordering::Relaxed);
        }

        let (max_w, max_h) = self.channel.max_dimensions();
        if frame.width < MIN_DIMENSION
            || frame.height < MIN_DIMENSION
            || frame.width > max_w
            || frame.height > max_h
        {
            self.stats
                .convert_failures
                .fetch_add(1, Ordering::Relaxed);
            if self.logged_bounds.insert((frame.width, frame.height)) {
                warn!(
                    width = frame.width,
                    height = frame.height,
                    max_width = max_w,
                    max_height = max_h,
                    "frame outside channel bounds, skipping"
                );
            }
            return;
        }

        let format = self.channel.transport_format();
        let stride = format.stride(frame.width);
        let desc = SlotDescriptor {
            width: frame.width,
            height: frame.height,
            stride,
            payload_len: format.payload_len(frame.width, frame.height),
            timestamp_us: frame.timestamp_us,
            sequence: pending.sequence,
        };

        let converter = &mut self.converter;
        let result = self.channel.publish(&desc, |buf| {
            converter.convert(&frame, buf, stride as usize, format)
        });
        match result {
            Ok(()) => {
                let published = self.stats.published.fetch_add(1, Ordering::Relaxed) + 1;
                self.stats.slot_overwrites.store(
                    self.channel.dropped_frames(),
                    Ordering::Relaxed,
                );
                if published % 300 == 0 {
                    debug!(
                        published,
                        slot_overwrites = self.channel.dropped_frames(),
                        "publisher progress"
                    );
                }
            }
            Err(e) => {
                self.stats
                    .convert_failures
                    .fetch_add(1, Ordering::Relaxed);
                let name = frame.format.name();
                if self.logged_formats.insert(name) {
                    warn!(
                        error = %e,
                        format = name,
                        width = frame.width,
                        height = frame.height,
                        "frame conversion failed, skipping this input shape"
                    );
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
