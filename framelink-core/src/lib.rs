//! # framelink-core
//!
//! Cross-process frame sharing for a streaming client: decoded video
//! frames are published through a named shared-memory channel so an
//! external process (overlay, recorder, analysis tool) can consume them
//! at display latency without touching the decode loop.
//!
//! This crate contains:
//! - **Session**: `FrameSharingSession` — the embedder-facing lifecycle
//!   and intake facade
//! - **Channel**: `SharedChannel` — the producer endpoint over named
//!   shared memory plus a cross-process signal
//! - **Receiver**: `FrameReceiver` — the consumer endpoint, also the
//!   reference for readers in other languages
//! - **Pipeline**: the publisher worker thread draining the intake queue
//! - **Convert**: `PixelConverter` — CPU pixel-format conversion with
//!   known-bad caching
//! - **Resolve**: `HardwareFrameResolver` — device-to-host readback for
//!   accelerator-resident frames
//! - **Layout**: the versioned wire layout both processes map
//! - **Error**: `ShareError` — typed, `thiserror`-based error hierarchy
//!
//! The write path never blocks the frame producer: [`FrameSharingSession::queue_frame`]
//! is a refcount bump and a bounded queue push, and every per-frame
//! failure downstream skips that frame instead of failing the session.

pub mod channel;
pub mod config;
pub mod convert;
pub mod error;
pub mod layout;
pub mod receiver;
pub mod resolve;
pub mod session;
pub mod stats;
pub mod types;

mod pipeline;
mod queue;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use channel::{SharedChannel, SlotDescriptor};
pub use config::{ShareConfig, DEFAULT_CHANNEL_NAME, DEFAULT_SIGNAL_NAME};
pub use convert::PixelConverter;
pub use error::ShareError;
pub use layout::{ChannelFlags, CHANNEL_MAGIC, CHANNEL_VERSION, MAX_DIMENSION, SLOT_COUNT};
pub use receiver::{FrameReceiver, ReceivedFrame};
pub use resolve::HardwareFrameResolver;
pub use session::FrameSharingSession;
pub use stats::{ShareStats, StatsSnapshot};
pub use types::{PixelFormat, Plane, SystemFrame, TransportFormat, VideoFrame};

#[cfg(target_os = "windows")]
pub use types::GpuFrame;
