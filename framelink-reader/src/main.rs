//! framelink-reader — external frame consumer.
//!
//! Attaches to a live framelink channel the way any out-of-process reader
//! would and reports what it receives. Doubles as the integration check
//! for readers written in other languages: if this binary sees frames,
//! the channel layout and signalling are sound.
//!
//! ```text
//! framelink-reader                    Consume and report once per second
//! framelink-reader --count 100        Exit after 100 frames
//! framelink-reader --json             One JSON line per frame
//! framelink-reader --dump-dir shots   Save the first frames as PPM
//! framelink-reader --config reader.toml
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use framelink_core::{FrameReceiver, ReceivedFrame, ShareConfig, TransportFormat};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "framelink-reader", about = "External reader for a framelink channel")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "framelink.toml")]
    config: PathBuf,

    /// Number of frames to consume (0 = run until interrupted).
    #[arg(long, default_value_t = 0)]
    count: u64,

    /// Per-wait timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Give up when no frame arrives for this many seconds.
    #[arg(long, default_value_t = 10)]
    idle_limit_secs: u64,

    /// Emit one JSON line per received frame instead of periodic stats.
    #[arg(long)]
    json: bool,

    /// Directory to dump received frames into as PPM images.
    #[arg(long)]
    dump_dir: Option<PathBuf>,

    /// Maximum number of frames to dump.
    #[arg(long, default_value_t = 10)]
    dump_count: u64,
}

// ── JSON per-frame record ────────────────────────────────────────

#[derive(Serialize)]
struct FrameRecord {
    sequence: u64,
    width: u32,
    height: u32,
    stride: u32,
    payload_bytes: usize,
    timestamp_us: u64,
    in_texture: bool,
}

impl From<&ReceivedFrame> for FrameRecord {
    fn from(f: &ReceivedFrame) -> Self {
        Self {
            sequence: f.sequence,
            width: f.width,
            height: f.height,
            stride: f.stride,
            payload_bytes: f.payload.len(),
            timestamp_us: f.timestamp_us,
            in_texture: f.in_texture,
        }
    }
}

// ── PPM dump ─────────────────────────────────────────────────────

/// Write one BGRA frame as a binary PPM (P6).
fn dump_ppm(dir: &PathBuf, frame: &ReceivedFrame) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("frame-{:06}.ppm", frame.sequence));

    let mut out = Vec::with_capacity(
        32 + frame.width as usize * frame.height as usize * 3,
    );
    out.extend_from_slice(format!("P6\n{} {}\n255\n", frame.width, frame.height).as_bytes());
    for y in 0..frame.height as usize {
        let row = &frame.payload[y * frame.stride as usize..][..frame.width as usize * 4];
        for px in row.chunks_exact(4) {
            out.extend_from_slice(&[px[2], px[1], px[0]]);
        }
    }
    std::fs::write(&path, out)?;
    Ok(path)
}

// ── Main ─────────────────────────────────────────────────────────

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match std::fs::read_to_string(&cli.config) {
        Ok(text) => toml::from_str(&text)?,
        Err(_) => ShareConfig::default(),
    };
    info!("framelink-reader v{}", env!("CARGO_PKG_VERSION"));
    info!(channel = %config.channel_name, "attaching");

    // The producer may not be up yet; retry attachment briefly.
    let mut receiver = loop {
        match FrameReceiver::attach(&config) {
            Ok(r) => break r,
            Err(e) => {
                warn!(error = %e, "attach failed, retrying");
                std::thread::sleep(Duration::from_millis(500));
            }
        }
    };
    let (max_w, max_h) = receiver.max_dimensions();
    info!(
        format = ?receiver.transport_format(),
        max_width = max_w,
        max_height = max_h,
        gpu = receiver.is_gpu_channel(),
        "attached"
    );

    let timeout = Duration::from_millis(cli.timeout_ms.max(1));
    let idle_limit = Duration::from_secs(cli.idle_limit_secs.max(1));
    let mut received = 0u64;
    let mut dumped = 0u64;
    let mut last_frame = Instant::now();
    let mut last_report = Instant::now();
    let mut window_frames = 0u64;

    while cli.count == 0 || received < cli.count {
        let frame = match receiver.wait_frame(timeout)? {
            Some(frame) => frame,
            None => {
                if last_frame.elapsed() > idle_limit {
                    warn!("no frames for {}s, giving up", cli.idle_limit_secs);
                    break;
                }
                continue;
            }
        };
        last_frame = Instant::now();
        received += 1;
        window_frames += 1;

        if cli.json {
            println!("{}", serde_json::to_string(&FrameRecord::from(&frame))?);
        }

        if let Some(dir) = &cli.dump_dir {
            if dumped < cli.dump_count {
                if frame.in_texture {
                    warn!("frame is texture-resident, nothing to dump");
                } else if receiver.transport_format() != TransportFormat::Bgra32 {
                    warn!("ppm dump only supports the bgra32 transport");
                } else {
                    match dump_ppm(dir, &frame) {
                        Ok(path) => info!(path = %path.display(), "frame dumped"),
                        Err(e) => warn!(error = %e, "dump failed"),
                    }
                    dumped += 1;
                }
            }
        }

        if !cli.json && last_report.elapsed() >= Duration::from_secs(1) {
            let elapsed = last_report.elapsed().as_secs_f64();
            info!(
                fps = format!("{:.1}", window_frames as f64 / elapsed),
                total = received,
                missed = receiver.missed_frames(),
                writer_dropped = receiver.writer_dropped_frames(),
                last_sequence = frame.sequence,
                "receiving"
            );
            last_report = Instant::now();
            window_frames = 0;
        }
    }

    info!(
        total = received,
        missed = receiver.missed_frames(),
        writer_dropped = receiver.writer_dropped_frames(),
        "reader finished"
    );
    Ok(())
}
