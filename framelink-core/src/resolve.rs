//! Hardware frame residency resolution.
//!
//! Frames decoded into accelerator memory must be brought into system
//! memory before pixel conversion. Frames already in system memory pass
//! through untouched (a refcount bump, no pixel copy).
//!
//! # Platform
//!
//! The device-to-host readback is **Windows-only** (D3D11 staging texture
//! + map). On other platforms every [`VideoFrame`] is already a
//! [`SystemFrame`] and this module is a passthrough.

use crate::error::ShareError;
use crate::types::{SystemFrame, VideoFrame};

/// Resolves accelerator-resident frames into system memory.
///
/// Keeps a reusable staging texture sized to the last GPU frame seen, so
/// the steady state does one GPU copy and one map per frame with no
/// allocation.
#[derive(Debug, Default)]
pub struct HardwareFrameResolver {
    #[cfg(target_os = "windows")]
    staging: Option<platform::StagingReadback>,
}

impl HardwareFrameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a system-memory view of `frame`.
    ///
    /// System-memory input is returned as a cheap clone. Accelerator input
    /// is copied device-to-host; a transfer failure surfaces as
    /// [`ShareError::GpuTransfer`] and the frame is skipped by the caller.
    /// The second return value is true when the frame was
    /// hardware-resident.
    pub fn resolve(&mut self, frame: &VideoFrame) -> Result<(SystemFrame, bool), ShareError> {
        match frame {
            VideoFrame::System(f) => Ok((f.clone(), false)),
            #[cfg(target_os = "windows")]
            VideoFrame::Gpu(f) => {
                let sys = self.readback(f)?;
                Ok((sys, true))
            }
        }
    }

    #[cfg(target_os = "windows")]
    fn readback(&mut self, frame: &crate::types::GpuFrame) -> Result<SystemFrame, ShareError> {
        // Recreate the staging texture when the frame geometry changes.
        let staging = match &mut self.staging {
            Some(s) if s.matches(frame.width, frame.height) => s,
            slot => slot.insert(platform::StagingReadback::new(
                &frame.device,
                frame.width,
                frame.height,
            )?),
        };
        staging.copy_out(frame)
    }
}

// ── Windows readback ─────────────────────────────────────────────

#[cfg(target_os = "windows")]
mod platform {
    use bytes::Bytes;
    use windows::Win32::Graphics::Direct3D11::{
        D3D11_CPU_ACCESS_READ, D3D11_MAP_READ, D3D11_MAPPED_SUBRESOURCE, D3D11_TEXTURE2D_DESC,
        D3D11_USAGE_STAGING, ID3D11Device, ID3D11Texture2D,
    };
    use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};

    use crate::error::ShareError;
    use crate::types::{GpuFrame, PixelFormat, Plane, SystemFrame};

    /// CPU-readable staging texture reused across frames of one geometry.
    #[derive(Debug)]
    pub(super) struct StagingReadback {
        texture: ID3D11Texture2D,
        width: u32,
        height: u32,
    }

    impl StagingReadback {
        pub fn new(device: &ID3D11Device, width: u32, height: u32) -> Result<Self, ShareError> {
            let desc = D3D11_TEXTURE2D_DESC {
                Width: width,
                Height: height,
                MipLevels: 1,
                ArraySize: 1,
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                Usage: D3D11_USAGE_STAGING,
                BindFlags: 0,
                CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
                MiscFlags: 0,
            };
            let mut texture = None;
            unsafe {
                device
                    .CreateTexture2D(&desc, None, Some(&mut texture))
                    .map_err(|e| ShareError::GpuTransfer(format!("staging texture: {e}")))?;
            }
            let texture =
                texture.ok_or_else(|| ShareError::GpuTransfer("staging texture is None".into()))?;
            Ok(Self {
                texture,
                width,
                height,
            })
        }

        pub fn matches(&self, width: u32, height: u32) -> bool {
            self.width == width && self.height == height
        }

        /// Copy the frame's texture through staging into system memory.
        pub fn copy_out(&mut self, frame: &GpuFrame) -> Result<SystemFrame, ShareError> {
            unsafe {
                frame.context.CopyResource(&self.texture, &frame.texture);

                let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
                frame
                    .context
                    .Map(&self.texture, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                    .map_err(|e| ShareError::GpuTransfer(format!("map failed: {e}")))?;

                let stride = mapped.RowPitch as usize;
                let len = stride * self.height as usize;
                let src = std::slice::from_raw_parts(mapped.pData as *const u8, len);
                let data = src.to_vec();

                frame.context.Unmap(&self.texture, 0);

                Ok(SystemFrame {
                    width: frame.width,
                    height: frame.height,
                    format: PixelFormat::Bgra8,
                    planes: vec![Plane {
                        data: Bytes::from(data),
                        stride,
                    }],
                    timestamp_us: frame.timestamp_us,
                })
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PixelFormat, Plane};
    use bytes::Bytes;

    #[test]
    fn system_frame_passes_through() {
        let mut resolver = HardwareFrameResolver::new();
        let frame = VideoFrame::System(SystemFrame {
            width: 32,
            height: 32,
            format: PixelFormat::Bgra8,
            planes: vec![Plane {
                data: Bytes::from(vec![1u8; 32 * 32 * 4]),
                stride: 128,
            }],
            timestamp_us: 42,
        });

        let (sys, was_hw) = resolver.resolve(&frame).unwrap();
        assert!(!was_hw);
        assert_eq!(sys.timestamp_us, 42);
        // Passthrough shares the source allocation.
        if let VideoFrame::System(orig) = &frame {
            assert_eq!(sys.planes[0].data.as_ptr(), orig.planes[0].data.as_ptr());
        }
    }
}
