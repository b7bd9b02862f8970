//! End-to-end tests: a full session publishing through the shared channel
//! to an attached receiver, the way an embedding client and an external
//! reader would run.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use framelink_core::{
    FrameReceiver, FrameSharingSession, PixelFormat, Plane, ShareConfig, ShareError, SystemFrame,
    TransportFormat, VideoFrame,
};

static CHANNEL_ID: AtomicU32 = AtomicU32::new(0);

fn unique_cfg(tag: &str) -> ShareConfig {
    let id = format!(
        "fl-e2e-{tag}-{}-{}",
        std::process::id(),
        CHANNEL_ID.fetch_add(1, Ordering::Relaxed)
    );
    ShareConfig {
        channel_name: format!("{id}-m"),
        signal_name: format!("{id}-s"),
        gpu_texture: false,
        ..ShareConfig::default()
    }
}

fn solid_frame(format: PixelFormat, width: u32, height: u32, px: [u8; 4], ts: u64) -> VideoFrame {
    let stride = (width * 4) as usize;
    let mut data = Vec::with_capacity(stride * height as usize);
    for _ in 0..width * height {
        data.extend_from_slice(&px);
    }
    VideoFrame::System(SystemFrame {
        width,
        height,
        format,
        planes: vec![Plane {
            data: Bytes::from(data),
            stride,
        }],
        timestamp_us: ts,
    })
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    done()
}

#[test]
fn initialize_rejects_bad_dimensions() {
    let session = FrameSharingSession::new(unique_cfg("dims"));
    for (w, h) in [(0, 1080), (1920, 0), (8192, 1080), (1920, 8192)] {
        assert!(
            matches!(
                session.initialize(w, h),
                Err(ShareError::InvalidDimensions { .. })
            ),
            "{w}x{h} should be rejected"
        );
    }
    assert!(!session.is_active());
}

#[test]
fn shutdown_is_idempotent() {
    let session = FrameSharingSession::new(unique_cfg("double"));
    session.initialize(640, 480).unwrap();
    session.shutdown();
    session.shutdown();
    assert!(!session.is_active());
}

#[test]
fn rgba_source_round_trips_as_bgra() {
    let cfg = unique_cfg("color");
    let session = FrameSharingSession::new(cfg.clone());
    session.initialize(640, 480).unwrap();
    let mut receiver = FrameReceiver::attach(&cfg).unwrap();
    assert_eq!(receiver.transport_format(), TransportFormat::Bgra32);

    // Pure red in RGBA order.
    session.queue_frame(&solid_frame(PixelFormat::Rgba8, 64, 48, [255, 0, 0, 255], 7));

    let deadline = Instant::now() + Duration::from_secs(2);
    let frame = loop {
        if let Some(frame) = receiver.wait_frame(Duration::from_millis(100)).unwrap() {
            break frame;
        }
        assert!(Instant::now() < deadline, "no frame arrived");
    };

    assert_eq!(frame.width, 64);
    assert_eq!(frame.height, 48);
    assert_eq!(frame.timestamp_us, 7);
    // Transport order is BGRA: blue 0, green 0, red 255, alpha 255.
    assert_eq!(&frame.payload[..4], &[0, 0, 255, 255]);
    session.shutdown();
}

#[test]
fn latest_enqueued_frame_is_the_last_published() {
    let cfg = unique_cfg("fresh");
    let session = FrameSharingSession::new(cfg.clone());
    session.initialize(640, 480).unwrap();
    let mut receiver = FrameReceiver::attach(&cfg).unwrap();

    let total = 10;
    for ts in 1..=total {
        session.queue_frame(&solid_frame(
            PixelFormat::Bgra8,
            64,
            48,
            [ts as u8; 4],
            ts,
        ));
    }

    // Wait for the pipeline to drain, then read the freshest frame.
    assert!(wait_until(Duration::from_secs(2), || {
        let snap = session.stats();
        snap.published + snap.queue_evicted + snap.convert_failures >= total
    }));
    let mut last = None;
    while let Some(frame) = receiver.try_latest().unwrap() {
        last = Some(frame);
    }
    let last = last.expect("at least one frame published");
    // Newest in wins: whatever was evicted, the final frame is never.
    assert_eq!(last.sequence, total);
    assert_eq!(last.timestamp_us, total);
    session.shutdown();
}

#[test]
fn queue_frame_stays_fast_under_slow_publisher() {
    let mut cfg = unique_cfg("latency");
    // Throttle the worker hard so the intake queue saturates.
    cfg.publish_interval_ms = 100;
    let session = FrameSharingSession::new(cfg);
    session.initialize(640, 480).unwrap();

    let mut worst = Duration::ZERO;
    for ts in 0..20 {
        let frame = solid_frame(PixelFormat::Bgra8, 64, 48, [1, 2, 3, 4], ts);
        let start = Instant::now();
        session.queue_frame(&frame);
        worst = worst.max(start.elapsed());
    }
    // Intake must never absorb the publisher's pacing.
    assert!(worst < Duration::from_millis(50), "worst {worst:?}");

    let snap = session.stats();
    assert_eq!(snap.attempted, 20);
    assert!(snap.queue_evicted > 0, "saturation should evict frames");
    session.shutdown();

    // Everything attempted is accounted for somewhere.
    let snap = session.stats();
    assert_eq!(
        snap.attempted,
        snap.published + snap.queue_evicted + snap.convert_failures
    );
}

#[test]
fn shutdown_removes_the_channel() {
    let cfg = unique_cfg("teardown");
    let session = FrameSharingSession::new(cfg.clone());
    session.initialize(640, 480).unwrap();
    assert!(FrameReceiver::attach(&cfg).is_ok());

    session.shutdown();
    assert!(FrameReceiver::attach(&cfg).is_err());
}

#[test]
fn reinitialize_replaces_the_channel() {
    let cfg = unique_cfg("reinit");
    let session = FrameSharingSession::new(cfg.clone());
    session.initialize(640, 480).unwrap();

    session.initialize(1280, 720).unwrap();
    assert!(session.is_active());

    let receiver = FrameReceiver::attach(&cfg).unwrap();
    assert_eq!(receiver.max_dimensions(), (1280, 720));
    session.shutdown();
}

#[test]
fn unconvertible_frames_do_not_stop_the_session() {
    let cfg = unique_cfg("contain");
    let mut share = ShareConfig {
        transport_format: TransportFormat::I420,
        ..cfg
    };
    share.gpu_texture = false;
    let session = FrameSharingSession::new(share.clone());
    session.initialize(640, 480).unwrap();

    // Odd dimensions cannot reach 4:2:0; skipped, cached, logged once.
    session.queue_frame(&solid_frame(PixelFormat::Bgra8, 63, 47, [9; 4], 1));
    assert!(wait_until(Duration::from_secs(2), || {
        session.stats().convert_failures == 1
    }));

    // The session still publishes well-formed frames afterwards.
    session.queue_frame(&solid_frame(PixelFormat::Bgra8, 64, 48, [9; 4], 2));
    assert!(wait_until(Duration::from_secs(2), || {
        session.stats().published == 1
    }));
    assert!(session.is_active());
    session.shutdown();
}
