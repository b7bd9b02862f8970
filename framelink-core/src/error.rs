//! Domain-specific error types for the frame-sharing transport.
//!
//! All fallible operations return `Result<T, ShareError>`.
//! No panics on invalid input — every error is typed and recoverable.

use thiserror::Error;

/// The canonical error type for the frame-sharing transport.
#[derive(Debug, Error)]
pub enum ShareError {
    // ── Setup Errors ─────────────────────────────────────────────
    /// Requested channel dimensions are non-positive or exceed the limit.
    #[error("invalid dimensions: {width}x{height} (limit {max})")]
    InvalidDimensions { width: u32, height: u32, max: u32 },

    /// The OS rejected creation of the shared-memory mapping.
    #[error("shared memory setup failed: {0}")]
    Mapping(String),

    /// The OS rejected creation of the cross-process signal.
    #[error("cross-process signal setup failed: {0}")]
    Signal(String),

    /// The named channel does not exist (producer not running).
    #[error("channel {0:?} not found")]
    ChannelNotFound(String),

    // ── Protocol Errors ──────────────────────────────────────────
    /// The mapped region does not start with the channel magic.
    #[error("invalid channel magic: {0:#010x}")]
    InvalidMagic(u32),

    /// The channel header carries a layout version this build does not
    /// understand. Readers must reject rather than guess field offsets.
    #[error("unsupported channel version: {0}")]
    UnsupportedVersion(u32),

    /// The mapped region is smaller than the header demands.
    #[error("channel region truncated: {size} bytes (need {need})")]
    RegionTruncated { size: usize, need: usize },

    // ── Per-frame Errors ─────────────────────────────────────────
    /// The source pixel format (at these dimensions) cannot be converted
    /// to the transport format.
    #[error("unsupported source format {format} at {width}x{height}")]
    UnsupportedFormat {
        format: &'static str,
        width: u32,
        height: u32,
    },

    /// A frame's declared geometry does not match its plane data.
    #[error("frame geometry mismatch: {0}")]
    BadGeometry(&'static str),

    /// The conversion wrote fewer rows than the frame height.
    /// A partial write is never treated as success.
    #[error("partial conversion: {rows} of {expected} rows")]
    PartialConversion { rows: u32, expected: u32 },

    /// Frame dimensions fall outside the channel's negotiated bounds.
    #[error("frame {width}x{height} outside channel bounds {min}..={max_width}x{max_height}")]
    FrameOutOfBounds {
        width: u32,
        height: u32,
        min: u32,
        max_width: u32,
        max_height: u32,
    },

    /// Device-to-host transfer of an accelerator-resident frame failed.
    #[error("hardware frame transfer failed: {0}")]
    GpuTransfer(String),

    /// The zero-copy GPU delivery path is unavailable on this platform
    /// or failed to initialize.
    #[error("gpu texture path unavailable: {0}")]
    GpuUnavailable(String),

    // ── Lifecycle Errors ─────────────────────────────────────────
    /// The worker thread could not be spawned.
    #[error("worker spawn failed: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl From<String> for ShareError {
    fn from(s: String) -> Self {
        ShareError::Other(s)
    }
}

impl From<&str> for ShareError {
    fn from(s: &str) -> Self {
        ShareError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = ShareError::InvalidDimensions {
            width: 0,
            height: 1080,
            max: 4096,
        };
        assert!(e.to_string().contains("0x1080"));

        let e = ShareError::UnsupportedVersion(7);
        assert!(e.to_string().contains('7'));

        let e = ShareError::PartialConversion {
            rows: 100,
            expected: 720,
        };
        assert!(e.to_string().contains("100"));
        assert!(e.to_string().contains("720"));
    }

    #[test]
    fn from_string() {
        let e: ShareError = "something broke".into();
        assert!(matches!(e, ShareError::Other(_)));
    }
}
