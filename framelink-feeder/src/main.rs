//! framelink-feeder — synthetic frame producer.
//!
//! Drives a frame-sharing channel with generated test frames, standing in
//! for a real decoder so external readers can be developed and load-tested
//! without a live stream.
//!
//! ```text
//! framelink-feeder                    1280x720 color bars at 30 fps
//! framelink-feeder -w 1920 -H 1080    Custom geometry
//! framelink-feeder --count 300        Stop after 300 frames
//! framelink-feeder --config feeder.toml
//! framelink-feeder --gen-config       Write default config to stdout
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use framelink_core::{
    FrameSharingSession, PixelFormat, Plane, ShareConfig, SystemFrame, VideoFrame,
};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "framelink-feeder", about = "Synthetic frame producer for a framelink channel")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "framelink.toml")]
    config: PathBuf,

    /// Frame width in pixels.
    #[arg(short, long, default_value_t = 1280)]
    width: u32,

    /// Frame height in pixels.
    #[arg(short = 'H', long, default_value_t = 720)]
    height: u32,

    /// Frames per second to generate.
    #[arg(short, long, default_value_t = 30)]
    fps: u32,

    /// Number of frames to generate (0 = run until interrupted).
    #[arg(long, default_value_t = 0)]
    count: u64,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Config ───────────────────────────────────────────────────────

fn load_config(path: &PathBuf) -> ShareConfig {
    match std::fs::read_to_string(path) {
        Ok(text) => match toml::from_str(&text) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "bad config file, using defaults");
                ShareConfig::default()
            }
        },
        Err(_) => ShareConfig::default(),
    }
}

// ── Frame generation ─────────────────────────────────────────────

const BAR_COLORS: [[u8; 4]; 7] = [
    [255, 255, 255, 255], // white
    [0, 255, 255, 255],   // yellow
    [255, 255, 0, 255],   // cyan
    [0, 255, 0, 255],     // green
    [255, 0, 255, 255],   // magenta
    [0, 0, 255, 255],     // red
    [255, 0, 0, 255],     // blue
];

/// SMPTE-ish color bars (BGRA), scrolling one bar width per second.
fn color_bars(width: u32, height: u32, frame_index: u64, fps: u32) -> VideoFrame {
    let stride = (width * 4) as usize;
    let mut data = vec![0u8; stride * height as usize];
    let bar_width = (width / BAR_COLORS.len() as u32).max(1);
    let shift = (frame_index / fps.max(1) as u64) as u32;

    for y in 0..height {
        let row = &mut data[y as usize * stride..][..width as usize * 4];
        for x in 0..width {
            let bar = ((x / bar_width) + shift) as usize % BAR_COLORS.len();
            row[x as usize * 4..][..4].copy_from_slice(&BAR_COLORS[bar]);
        }
    }

    let timestamp_us = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64;
    VideoFrame::System(SystemFrame {
        width,
        height,
        format: PixelFormat::Bgra8,
        planes: vec![Plane {
            data: Bytes::from(data),
            stride,
        }],
        timestamp_us,
    })
}

// ── Main ─────────────────────────────────────────────────────────

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        println!("{}", toml::to_string_pretty(&ShareConfig::default())?);
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&cli.config);
    info!("framelink-feeder v{}", env!("CARGO_PKG_VERSION"));
    info!(
        channel = %config.channel_name,
        width = cli.width,
        height = cli.height,
        fps = cli.fps,
        "starting"
    );

    let session = FrameSharingSession::new(config);
    session.initialize(cli.width, cli.height)?;

    let interval = Duration::from_secs(1) / cli.fps.max(1);
    let mut next = Instant::now();
    let mut last_report = Instant::now();
    let mut frame_index = 0u64;

    while cli.count == 0 || frame_index < cli.count {
        session.queue_frame(&color_bars(cli.width, cli.height, frame_index, cli.fps));
        frame_index += 1;

        if last_report.elapsed() >= Duration::from_secs(5) {
            last_report = Instant::now();
            let snap = session.stats();
            info!(
                attempted = snap.attempted,
                published = snap.published,
                queue_evicted = snap.queue_evicted,
                slot_overwrites = snap.slot_overwrites,
                "progress"
            );
        }

        next += interval;
        let now = Instant::now();
        if next > now {
            std::thread::sleep(next - now);
        } else {
            // Generation fell behind; resynchronize instead of bursting.
            next = now;
        }
    }

    session.shutdown();
    let snap = session.stats();
    info!(
        attempted = snap.attempted,
        published = snap.published,
        queue_evicted = snap.queue_evicted,
        convert_failures = snap.convert_failures,
        "done"
    );
    Ok(())
}
