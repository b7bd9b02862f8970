//! Pixel format conversion into the transport layout.
//!
//! Converts decoded source frames (BGRA/RGBA/I420/NV12) directly into the
//! caller-supplied destination — in memory mode that destination is the
//! mapped channel slot, so the steady-state path allocates nothing.
//!
//! YUV math is BT.709 limited range, integer fixed point. Conversion is
//! 1:1 at the source's native resolution; scaling is not performed, the
//! channel instead declares per-frame dimensions within its fixed maximum.

use std::collections::HashMap;

use crate::error::ShareError;
use crate::types::{PixelFormat, SystemFrame, TransportFormat};

// ── Plan cache ───────────────────────────────────────────────────

type PlanKey = (PixelFormat, u32, u32, TransportFormat);

/// Stateful converter with a cached support verdict per
/// `(source format, dimensions, target)` combination.
///
/// An unsupported combination fails exactly one full validation; repeats
/// hit the known-bad cache and fail immediately without re-diagnosing.
#[derive(Debug, Default)]
pub struct PixelConverter {
    verdicts: HashMap<PlanKey, bool>,
}

impl PixelConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert `src` into `dst` laid out as `target` with the given
    /// luma-row stride.
    ///
    /// `dst` must hold at least `target.payload_len(src.width, src.height)`
    /// bytes. Returns an error — and leaves `dst` unpublishable — if the
    /// combination is unsupported or fewer rows than `src.height` were
    /// produced.
    pub fn convert(
        &mut self,
        src: &SystemFrame,
        dst: &mut [u8],
        dst_stride: usize,
        target: TransportFormat,
    ) -> Result<(), ShareError> {
        let key = (src.format, src.width, src.height, target);
        match self.verdicts.get(&key) {
            Some(true) => {}
            Some(false) => {
                return Err(ShareError::UnsupportedFormat {
                    format: src.format.name(),
                    width: src.width,
                    height: src.height,
                });
            }
            None => {
                let supported = Self::supported(src.format, src.width, src.height, target);
                self.verdicts.insert(key, supported);
                if !supported {
                    return Err(ShareError::UnsupportedFormat {
                        format: src.format.name(),
                        width: src.width,
                        height: src.height,
                    });
                }
            }
        }

        src.check_geometry()?;
        let row_len = target.stride(src.width) as usize;
        if dst_stride < row_len {
            return Err(ShareError::BadGeometry("destination stride shorter than row"));
        }
        // The row loops index by dst_stride, so the buffer must cover the
        // strided extent, not just the packed payload length.
        let h = src.height as usize;
        let need = match target {
            TransportFormat::Bgra32 => (h - 1) * dst_stride + row_len,
            TransportFormat::I420 => {
                let (_, v_off) = i420_chroma_offsets(src.height, dst_stride);
                v_off + (h / 2 - 1) * (dst_stride / 2) + src.width as usize / 2
            }
        };
        if dst.len() < need {
            return Err(ShareError::BadGeometry("destination too small"));
        }

        let rows = match target {
            TransportFormat::Bgra32 => match src.format {
                PixelFormat::Bgra8 => copy_packed(src, dst, dst_stride, false),
                PixelFormat::Rgba8 => copy_packed(src, dst, dst_stride, true),
                PixelFormat::I420 => yuv420_to_bgra(src, dst, dst_stride, false),
                PixelFormat::Nv12 => yuv420_to_bgra(src, dst, dst_stride, true),
            },
            TransportFormat::I420 => match src.format {
                PixelFormat::I420 => planar_to_i420(src, dst, dst_stride),
                PixelFormat::Nv12 => nv12_to_i420(src, dst, dst_stride),
                PixelFormat::Bgra8 => rgb_to_i420(src, dst, dst_stride, false),
                PixelFormat::Rgba8 => rgb_to_i420(src, dst, dst_stride, true),
            },
        };

        if rows != src.height {
            return Err(ShareError::PartialConversion {
                rows,
                expected: src.height,
            });
        }
        Ok(())
    }

    /// Decide once whether a combination can be converted at all.
    fn supported(format: PixelFormat, width: u32, height: u32, target: TransportFormat) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        // 4:2:0 anywhere in the path requires even dimensions; no chroma
        // resampling is performed for odd sizes.
        let chroma_involved = matches!(format, PixelFormat::I420 | PixelFormat::Nv12)
            || target == TransportFormat::I420;
        if chroma_involved && (width % 2 != 0 || height % 2 != 0) {
            return false;
        }
        true
    }
}

// ── BT.709 limited-range coefficients (8-bit fixed point) ────────

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// One 2x2 luma block's worth of YUV→BGRA, shared chroma sample.
#[inline]
fn yuv_to_bgra_px(y: u8, u: u8, v: u8, out: &mut [u8]) {
    let c = 298 * (y as i32 - 16);
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    out[0] = clamp_u8((c + 541 * d + 128) >> 8); // B
    out[1] = clamp_u8((c - 55 * d - 136 * e + 128) >> 8); // G
    out[2] = clamp_u8((c + 459 * e + 128) >> 8); // R
    out[3] = 255;
}

#[inline]
fn rgb_to_y(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8(((47 * r + 157 * g + 16 * b + 128) >> 8) + 16)
}

#[inline]
fn rgb_to_u(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8(((-26 * r - 87 * g + 112 * b + 128) >> 8) + 128)
}

#[inline]
fn rgb_to_v(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8(((112 * r - 102 * g - 10 * b + 128) >> 8) + 128)
}

// ── Packed RGB sources → BGRA ────────────────────────────────────

fn copy_packed(src: &SystemFrame, dst: &mut [u8], dst_stride: usize, swizzle: bool) -> u32 {
    let plane = &src.planes[0];
    let row_len = src.width as usize * 4;
    let mut rows = 0u32;
    for y in 0..src.height as usize {
        let s = &plane.data[y * plane.stride..y * plane.stride + row_len];
        let d = &mut dst[y * dst_stride..y * dst_stride + row_len];
        if swizzle {
            // RGBA → BGRA
            for (sp, dp) in s.chunks_exact(4).zip(d.chunks_exact_mut(4)) {
                dp[0] = sp[2];
                dp[1] = sp[1];
                dp[2] = sp[0];
                dp[3] = sp[3];
            }
        } else {
            d.copy_from_slice(s);
        }
        rows += 1;
    }
    rows
}

// ── 4:2:0 sources → BGRA ─────────────────────────────────────────

fn yuv420_to_bgra(src: &SystemFrame, dst: &mut [u8], dst_stride: usize, semi: bool) -> u32 {
    let yp = &src.planes[0];
    let mut rows = 0u32;
    for y in 0..src.height as usize {
        let yrow = &yp.data[y * yp.stride..];
        let drow = &mut dst[y * dst_stride..y * dst_stride + src.width as usize * 4];
        let cy = y / 2;
        for x in 0..src.width as usize {
            let cx = x / 2;
            let (u, v) = if semi {
                let uv = &src.planes[1];
                let o = cy * uv.stride + cx * 2;
                (uv.data[o], uv.data[o + 1])
            } else {
                let up = &src.planes[1];
                let vp = &src.planes[2];
                (up.data[cy * up.stride + cx], vp.data[cy * vp.stride + cx])
            };
            yuv_to_bgra_px(yrow[x], u, v, &mut drow[x * 4..x * 4 + 4]);
        }
        rows += 1;
    }
    rows
}

// ── Sources → planar I420 transport ──────────────────────────────

/// Offsets of the U and V planes inside an I420 transport slot.
pub(crate) fn i420_chroma_offsets(height: u32, stride: usize) -> (usize, usize) {
    let y_len = stride * height as usize;
    let c_len = (stride / 2) * (height as usize / 2);
    (y_len, y_len + c_len)
}

fn planar_to_i420(src: &SystemFrame, dst: &mut [u8], dst_stride: usize) -> u32 {
    let (u_off, v_off) = i420_chroma_offsets(src.height, dst_stride);
    let w = src.width as usize;
    let ch = src.height as usize / 2;
    let cw = w / 2;
    let cs = dst_stride / 2;

    let mut rows = 0u32;
    let yp = &src.planes[0];
    for y in 0..src.height as usize {
        dst[y * dst_stride..y * dst_stride + w].copy_from_slice(&yp.data[y * yp.stride..y * yp.stride + w]);
        rows += 1;
    }
    let up = &src.planes[1];
    let vp = &src.planes[2];
    for y in 0..ch {
        dst[u_off + y * cs..u_off + y * cs + cw]
            .copy_from_slice(&up.data[y * up.stride..y * up.stride + cw]);
        dst[v_off + y * cs..v_off + y * cs + cw]
            .copy_from_slice(&vp.data[y * vp.stride..y * vp.stride + cw]);
    }
    rows
}

fn nv12_to_i420(src: &SystemFrame, dst: &mut [u8], dst_stride: usize) -> u32 {
    let (u_off, v_off) = i420_chroma_offsets(src.height, dst_stride);
    let w = src.width as usize;
    let ch = src.height as usize / 2;
    let cw = w / 2;
    let cs = dst_stride / 2;

    let mut rows = 0u32;
    let yp = &src.planes[0];
    for y in 0..src.height as usize {
        dst[y * dst_stride..y * dst_stride + w].copy_from_slice(&yp.data[y * yp.stride..y * yp.stride + w]);
        rows += 1;
    }
    let uv = &src.planes[1];
    for y in 0..ch {
        let srow = &uv.data[y * uv.stride..];
        for x in 0..cw {
            dst[u_off + y * cs + x] = srow[x * 2];
            dst[v_off + y * cs + x] = srow[x * 2 + 1];
        }
    }
    rows
}

fn rgb_to_i420(src: &SystemFrame, dst: &mut [u8], dst_stride: usize, rgba: bool) -> u32 {
    let (u_off, v_off) = i420_chroma_offsets(src.height, dst_stride);
    let plane = &src.planes[0];
    let w = src.width as usize;
    let cs = dst_stride / 2;
    let (ri, bi) = if rgba { (0, 2) } else { (2, 0) };

    let mut rows = 0u32;
    for y in 0..src.height as usize {
        let srow = &plane.data[y * plane.stride..];
        for x in 0..w {
            let px = &srow[x * 4..x * 4 + 4];
            let (r, g, b) = (px[ri] as i32, px[1] as i32, px[bi] as i32);
            dst[y * dst_stride + x] = rgb_to_y(r, g, b);
            // Chroma subsampled from the top-left pixel of each 2x2 block.
            if y % 2 == 0 && x % 2 == 0 {
                dst[u_off + (y / 2) * cs + x / 2] = rgb_to_u(r, g, b);
                dst[v_off + (y / 2) * cs + x / 2] = rgb_to_v(r, g, b);
            }
        }
        rows += 1;
    }
    rows
}

// ── Tests ────────────────────────────────────────────────────────
