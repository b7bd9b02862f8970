//! Session facade: lifecycle and the frame intake entry point.
//!
//! [`FrameSharingSession`] is the one type embedders hold. It is safe to
//! share between a control thread (initialize/shutdown) and the decode
//! thread (queue_frame); `queue_frame` never blocks on pipeline work and
//! never fails the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::channel::SharedChannel;
use crate::config::ShareConfig;
use crate::error::ShareError;
use crate::layout::{MAX_DIMENSION, MIN_DIMENSION};
use crate::pipeline::FramePipeline;
use crate::queue::{IntakeQueue, PendingFrame};
use crate::stats::{ShareStats, StatsSnapshot};
use crate::types::VideoFrame;

/// A frame-sharing session: one channel, one publisher worker.
///
/// Starts inactive; [`initialize`](Self::initialize) brings the channel
/// up, [`shutdown`](Self::shutdown) tears it down. Both may be called
/// repeatedly; re-initializing an active session recreates the channel at
/// the new dimensions.
#[derive(Debug)]
pub struct FrameSharingSession {
    config: ShareConfig,
    stats: Arc<ShareStats>,
    /// Fast-path flag read by `queue_frame` without taking a lock.
    active: AtomicBool,
    /// Queue handle for the intake path; held only long enough to clone.
    intake: Mutex<Option<Arc<IntakeQueue>>>,
    /// Running pipeline; locked only by initialize/shutdown.
    runner: Mutex<Option<FramePipeline>>,
}

impl FrameSharingSession {
    pub fn new(config: ShareConfig) -> Self {
        Self {
            config,
            stats: Arc::new(ShareStats::default()),
            active: AtomicBool::new(false),
            intake: Mutex::new(None),
            runner: Mutex::new(None),
        }
    }

    /// Bring the channel up for frames up to `max_width` x `max_height`.
    ///
    /// Validates the dimensions before touching an already-active session,
    /// so a bad re-initialize leaves the previous channel running. On any
    /// later setup failure everything built so far is rolled back and the
    /// session stays inactive.
    pub fn initialize(&self, max_width: u32, max_height: u32) -> Result<(), ShareError> {
        if max_width < MIN_DIMENSION
            || max_height < MIN_DIMENSION
            || max_width > MAX_DIMENSION
            || max_height > MAX_DIMENSION
        {
            return Err(ShareError::InvalidDimensions {
                width: max_width,
                height: max_height,
                max: MAX_DIMENSION,
            });
        }

        if self.active.load(Ordering::Acquire) {
            info!("re-initializing active session");
            self.shutdown();
        }

        self.stats.reset();
        let channel = SharedChannel::create(&self.config, max_width, max_height)?;
        let gpu = channel.is_gpu_mode();
        let queue = Arc::new(IntakeQueue::new());
        let pipeline = FramePipeline::start(
            channel,
            Arc::clone(&queue),
            Arc::clone(&self.stats),
            self.config.publish_interval(),
        )?;

        *self.intake.lock().unwrap_or_else(|e| e.into_inner()) = Some(queue);
        *self.runner.lock().unwrap_or_else(|e| e.into_inner()) = Some(pipeline);
        self.active.store(true, Ordering::Release);
        info!(
            channel = %self.config.channel_name,
            max_width,
            max_height,
            gpu,
            "frame sharing active"
        );
        Ok(())
    }

    /// Tear the channel down and join the worker. Safe to call when
    /// already inactive; repeated calls are no-ops.
    pub fn shutdown(&self) {
        self.active.store(false, Ordering::Release);
        *self.intake.lock().unwrap_or_else(|e| e.into_inner()) = None;

        let pipeline = self
            .runner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(pipeline) = pipeline else {
            return;
        };
        let drained = pipeline.stop() as u64;
        if drained > 0 {
            self.stats
                .queue_evicted
                .fetch_add(drained, Ordering::Relaxed);
        }

        let snap = self.stats.snapshot();
        info!(
            attempted = snap.attempted,
            published = snap.published,
            queue_evicted = snap.queue_evicted,
            convert_failures = snap.convert_failures,
            hw_frames = snap.hw_frames,
            hw_transfer_failures = snap.hw_transfer_failures,
            slot_overwrites = snap.slot_overwrites,
            "frame sharing stopped"
        );
    }

    /// Hand one decoded frame to the publisher.
    ///
    /// Constant-time for the caller: a refcount bump and a bounded queue
    /// push. When the queue is full the oldest pending frame is evicted,
    /// never the caller delayed. Inactive sessions and payload-less
    /// frames are ignored.
    pub fn queue_frame(&self, frame: &VideoFrame) {
        if !self.active.load(Ordering::Acquire) || !frame.has_payload() {
            return;
        }
        // Sequence numbers start at 1 and are assigned at intake, so the
        // reader can detect gaps even for frames later dropped.
        let sequence = self.stats.attempted.fetch_add(1, Ordering::Relaxed) + 1;

        let queue = self
            .intake
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(queue) = queue else {
            return;
        };
        if queue
            .push(PendingFrame {
                frame: frame.clone(),
                sequence,
            })
            .is_some()
        {
            self.stats.queue_evicted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Whether the channel is currently up.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Current session counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The configuration this session was built with.
    pub fn config(&self) -> &ShareConfig {
        &self.config
    }
}

impl Drop for FrameSharingSession {
    fn drop(&mut self) {
        if self.active.load(Ordering::Acquire) {
            warn!("session dropped while active, shutting down");
            self.shutdown();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PixelFormat, Plane, SystemFrame};
    use bytes::Bytes;
    use std::time::{Duration, Instant};

    fn unique_cfg(tag: &str) -> ShareConfig {
        use std::sync::atomic::AtomicU32;
        static N: AtomicU32 = AtomicU32::new(0);
        let id = format!(
            "fl-sess-{tag}-{}-{}",
            std::process::id(),
            N.fetch_add(1, Ordering::Relaxed)
        );
        ShareConfig {
            channel_name: format!("{id}-m"),
            signal_name: format!("{id}-s"),
            gpu_texture: false,
            ..ShareConfig::default()
        }
    }

    fn bgra_frame(width: u32, height: u32, ts: u64) -> VideoFrame {
        VideoFrame::System(SystemFrame {
            width,
            height,
            format: PixelFormat::Bgra8,
            planes: vec![Plane {
                data: Bytes::from(vec![0x55; (width * 4 * height) as usize]),
                stride: (width * 4) as usize,
            }],
            timestamp_us: ts,
        })
    }

    #[test]
    fn lifecycle_round_trip() {
        let session = FrameSharingSession::new(unique_cfg("life"));
        assert!(!session.is_active());

        session.initialize(640, 480).unwrap();
        assert!(session.is_active());

        session.shutdown();
        assert!(!session.is_active());
        // Idempotent.
        session.shutdown();
    }

    #[test]
    fn invalid_dimensions_leave_session_untouched() {
        let session = FrameSharingSession::new(unique_cfg("dims"));
        assert!(matches!(
            session.initialize(0, 480),
            Err(ShareError::InvalidDimensions { .. })
        ));
        // A channel maximum below the per-frame minimum would never
        // publish anything; rejected at setup.
        assert!(matches!(
            session.initialize(8, 480),
            Err(ShareError::InvalidDimensions { .. })
        ));
        assert!(!session.is_active());

        // A bad re-initialize keeps the old channel alive.
        session.initialize(640, 480).unwrap();
        assert!(session.initialize(99_999, 480).is_err());
        assert!(session.is_active());
        session.shutdown();
    }

    #[test]
    fn frames_flow_end_to_end() {
        let session = FrameSharingSession::new(unique_cfg("flow"));
        session.initialize(640, 480).unwrap();

        for ts in 0..3 {
            session.queue_frame(&bgra_frame(64, 48, ts));
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        while session.stats().published < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        let snap = session.stats();
        assert_eq!(snap.attempted, 3);
        assert_eq!(snap.published, 3);
        session.shutdown();
    }

    #[test]
    fn inactive_session_ignores_frames() {
        let session = FrameSharingSession::new(unique_cfg("inactive"));
        session.queue_frame(&bgra_frame(64, 48, 0));
        assert_eq!(session.stats().attempted, 0);
    }

    #[test]
    fn payload_less_frame_ignored() {
        let session = FrameSharingSession::new(unique_cfg("empty"));
        session.initialize(640, 480).unwrap();

        let empty = VideoFrame::System(SystemFrame {
            width: 64,
            height: 48,
            format: PixelFormat::Bgra8,
            planes: vec![],
            timestamp_us: 0,
        });
        session.queue_frame(&empty);
        assert_eq!(session.stats().attempted, 0);
        session.shutdown();
    }

    #[test]
    fn reinitialize_resets_counters() {
        let session = FrameSharingSession::new(unique_cfg("reinit"));
        session.initialize(640, 480).unwrap();
        session.queue_frame(&bgra_frame(64, 48, 0));
        session.shutdown();
        assert!(session.stats().attempted >= 1);

        session.initialize(320, 240).unwrap();
        assert_eq!(session.stats().attempted, 0);
        session.shutdown();
    }
}
