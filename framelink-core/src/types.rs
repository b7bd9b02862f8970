//! Shared frame types for the sharing pipeline.
//!
//! These are **internal** representations passed between pipeline stages.
//! The cross-process wire layout lives in [`crate::layout`]; the types here
//! never cross a process boundary.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ShareError;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout of a decoded source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
    /// Planar 4:2:0 — separate Y, U, V planes.
    I420,
    /// Semi-planar 4:2:0 — Y plane plus interleaved UV plane.
    Nv12,
}

impl PixelFormat {
    /// Number of planes a frame of this format carries.
    pub const fn plane_count(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 1,
            PixelFormat::I420 => 3,
            PixelFormat::Nv12 => 2,
        }
    }

    /// Short stable name, used for log-once bookkeeping.
    pub const fn name(self) -> &'static str {
        match self {
            PixelFormat::Bgra8 => "bgra8",
            PixelFormat::Rgba8 => "rgba8",
            PixelFormat::I420 => "i420",
            PixelFormat::Nv12 => "nv12",
        }
    }
}

// ── TransportFormat ──────────────────────────────────────────────

/// Pixel layout frames are published in through the shared channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportFormat {
    /// Packed 32-bit BGRA, 4 bytes per pixel.
    Bgra32,
    /// Planar 4:2:0: Y plane followed by U then V at half resolution.
    I420,
}

impl TransportFormat {
    /// Wire discriminant stored in the channel header.
    pub const fn to_wire(self) -> u32 {
        match self {
            TransportFormat::Bgra32 => 0,
            TransportFormat::I420 => 1,
        }
    }

    /// Parse the wire discriminant.
    pub const fn from_wire(v: u32) -> Option<Self> {
        match v {
            0 => Some(TransportFormat::Bgra32),
            1 => Some(TransportFormat::I420),
            _ => None,
        }
    }

    /// Luma-row stride in bytes for a frame `width` pixels wide.
    ///
    /// For `Bgra32` this is the packed row stride. For `I420` it is the
    /// Y-plane stride; the chroma planes use half of it.
    pub const fn stride(self, width: u32) -> u32 {
        match self {
            TransportFormat::Bgra32 => width * 4,
            TransportFormat::I420 => width,
        }
    }

    /// Total payload bytes for a `width`x`height` frame.
    pub const fn payload_len(self, width: u32, height: u32) -> u32 {
        match self {
            TransportFormat::Bgra32 => width * 4 * height,
            // Y + U + V, chroma at quarter area. Dimensions must be even;
            // the converter rejects odd ones before this is used.
            TransportFormat::I420 => width * height + (width / 2) * (height / 2) * 2,
        }
    }
}

// ── SystemFrame ──────────────────────────────────────────────────

/// One plane of pixel data.
///
/// `data` is reference-counted, so cloning a plane (and therefore a frame)
/// is O(1) and never copies pixels.
#[derive(Debug, Clone)]
pub struct Plane {
    /// Plane bytes — at least `stride * rows` long.
    pub data: Bytes,
    /// Row pitch in bytes (may exceed the packed row width).
    pub stride: usize,
}

/// A decoded frame fully resident in system memory.
#[derive(Debug, Clone)]
pub struct SystemFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel layout of `planes`.
    pub format: PixelFormat,
    /// Plane data, `format.plane_count()` entries.
    pub planes: Vec<Plane>,
    /// Capture timestamp in microseconds since the Unix epoch.
    pub timestamp_us: u64,
}

impl SystemFrame {
    /// Verify that plane count and byte lengths match the declared
    /// geometry. Called once per frame on the worker thread.
    pub fn check_geometry(&self) -> Result<(), ShareError> {
        if self.width == 0 || self.height == 0 {
            return Err(ShareError::BadGeometry("zero dimension"));
        }
        if self.planes.len() != self.format.plane_count() {
            return Err(ShareError::BadGeometry("plane count mismatch"));
        }
        let (w, h) = (self.width as usize, self.height as usize);
        for (i, plane) in self.planes.iter().enumerate() {
            let rows = match (self.format, i) {
                (PixelFormat::I420, 1 | 2) => h.div_ceil(2),
                (PixelFormat::Nv12, 1) => h.div_ceil(2),
                _ => h,
            };
            let min_row = match (self.format, i) {
                (PixelFormat::Bgra8 | PixelFormat::Rgba8, _) => w * 4,
                (PixelFormat::I420, 1 | 2) => w.div_ceil(2),
                (PixelFormat::Nv12, 1) => w.div_ceil(2) * 2,
                _ => w,
            };
            if plane.stride < min_row {
                return Err(ShareError::BadGeometry("stride shorter than row"));
            }
            if plane.data.len() < plane.stride * (rows - 1) + min_row {
                return Err(ShareError::BadGeometry("plane shorter than geometry"));
            }
        }
        Ok(())
    }

    /// Whether the frame carries any pixel payload at all.
    pub fn has_payload(&self) -> bool {
        !self.planes.is_empty() && self.planes.iter().all(|p| !p.data.is_empty())
    }
}

// ── GpuFrame (Windows only) ──────────────────────────────────────

/// A decoded frame whose pixels live in accelerator memory.
///
/// Carries the texture plus the device context needed for readback. On
/// non-Windows builds the variant does not exist and every frame is a
/// [`SystemFrame`].
#[cfg(target_os = "windows")]
#[derive(Clone)]
pub struct GpuFrame {
    /// BGRA texture holding the decoded pixels.
    pub texture: windows::Win32::Graphics::Direct3D11::ID3D11Texture2D,
    /// Device that owns `texture`.
    pub device: windows::Win32::Graphics::Direct3D11::ID3D11Device,
    /// Immediate context used for the device-to-host copy.
    pub context: windows::Win32::Graphics::Direct3D11::ID3D11DeviceContext,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Capture timestamp in microseconds since the Unix epoch.
    pub timestamp_us: u64,
}

#[cfg(target_os = "windows")]
impl std::fmt::Debug for GpuFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp_us", &self.timestamp_us)
            .finish()
    }
}

// ── VideoFrame ───────────────────────────────────────────────────

/// Input to [`FrameSharingSession::queue_frame`](crate::FrameSharingSession::queue_frame).
///
/// Cloning is cheap in both variants (refcount bumps only), which is what
/// lets `queue_frame` return without retaining the caller's decode buffer.
#[derive(Debug, Clone)]
pub enum VideoFrame {
    /// Pixels in system memory.
    System(SystemFrame),
    /// Pixels resident on the GPU; resolved to system memory by the worker.
    #[cfg(target_os = "windows")]
    Gpu(GpuFrame),
}

impl VideoFrame {
    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        match self {
            VideoFrame::System(f) => f.width,
            #[cfg(target_os = "windows")]
            VideoFrame::Gpu(f) => f.width,
        }
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        match self {
            VideoFrame::System(f) => f.height,
            #[cfg(target_os = "windows")]
            VideoFrame::Gpu(f) => f.height,
        }
    }

    /// Capture timestamp in microseconds since the Unix epoch.
    pub fn timestamp_us(&self) -> u64 {
        match self {
            VideoFrame::System(f) => f.timestamp_us,
            #[cfg(target_os = "windows")]
            VideoFrame::Gpu(f) => f.timestamp_us,
        }
    }

    /// Whether the frame carries pixel data to publish.
    pub fn has_payload(&self) -> bool {
        match self {
            VideoFrame::System(f) => f.has_payload(),
            #[cfg(target_os = "windows")]
            VideoFrame::Gpu(_) => true,
        }
    }

    /// Source format name for log-once bookkeeping.
    pub fn format_name(&self) -> &'static str {
        match self {
            VideoFrame::System(f) => f.format.name(),
            #[cfg(target_os = "windows")]
            VideoFrame::Gpu(_) => "d3d11",
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn bgra_frame(w: u32, h: u32) -> SystemFrame {
        SystemFrame {
            width: w,
            height: h,
            format: PixelFormat::Bgra8,
            planes: vec![Plane {
                data: Bytes::from(vec![0u8; (w * 4 * h) as usize]),
                stride: (w * 4) as usize,
            }],
            timestamp_us: 0,
        }
    }

    #[test]
    fn transport_sizes() {
        assert_eq!(TransportFormat::Bgra32.stride(1920), 7680);
        assert_eq!(TransportFormat::Bgra32.payload_len(1920, 1080), 7680 * 1080);
        assert_eq!(TransportFormat::I420.stride(1920), 1920);
        assert_eq!(
            TransportFormat::I420.payload_len(1920, 1080),
            1920 * 1080 * 3 / 2
        );
    }

    #[test]
    fn transport_wire_roundtrip() {
        for fmt in [TransportFormat::Bgra32, TransportFormat::I420] {
            assert_eq!(TransportFormat::from_wire(fmt.to_wire()), Some(fmt));
        }
        assert_eq!(TransportFormat::from_wire(99), None);
    }

    #[test]
    fn geometry_accepts_valid_bgra() {
        assert!(bgra_frame(64, 48).check_geometry().is_ok());
    }

    #[test]
    fn geometry_rejects_short_plane() {
        let mut f = bgra_frame(64, 48);
        f.planes[0].data = Bytes::from(vec![0u8; 16]);
        assert!(f.check_geometry().is_err());
    }

    #[test]
    fn geometry_rejects_plane_count() {
        let mut f = bgra_frame(64, 48);
        f.format = PixelFormat::I420;
        assert!(matches!(
            f.check_geometry(),
            Err(ShareError::BadGeometry("plane count mismatch"))
        ));
    }

    #[test]
    fn i420_chroma_geometry() {
        let (w, h) = (64u32, 48u32);
        let f = SystemFrame {
            width: w,
            height: h,
            format: PixelFormat::I420,
            planes: vec![
                Plane {
                    data: Bytes::from(vec![0u8; (w * h) as usize]),
                    stride: w as usize,
                },
                Plane {
                    data: Bytes::from(vec![0u8; (w * h / 4) as usize]),
                    stride: (w / 2) as usize,
                },
                Plane {
                    data: Bytes::from(vec![0u8; (w * h / 4) as usize]),
                    stride: (w / 2) as usize,
                },
            ],
            timestamp_us: 0,
        };
        assert!(f.check_geometry().is_ok());
    }

    #[test]
    fn clone_is_shallow() {
        let f = bgra_frame(640, 480);
        let g = f.clone();
        // Bytes clones share the same backing allocation.
        assert_eq!(f.planes[0].data.as_ptr(), g.planes[0].data.as_ptr());
    }
}
