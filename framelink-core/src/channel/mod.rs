//! Producer side of the cross-process frame channel.
//!
//! [`SharedChannel`] owns the named shared-memory region, the frame-ready
//! signal and (optionally) the shared GPU texture. It is the only writer;
//! external readers attach with [`crate::receiver::FrameReceiver`] or a
//! compatible implementation in another language.
//!
//! | Piece              | Unix                      | Windows                   |
//! |--------------------|---------------------------|---------------------------|
//! | Memory region      | `shm_open` + `mmap`       | `CreateFileMappingW`      |
//! | Frame-ready signal | named POSIX semaphore     | named auto-reset event    |
//! | Zero-copy texture  | unavailable               | D3D11 shared texture      |

#[cfg(target_os = "windows")]
mod gpu;
#[cfg(unix)]
mod platform_unix;
#[cfg(target_os = "windows")]
mod platform_windows;

#[cfg(unix)]
pub(crate) use platform_unix::{FrameSignal, SharedRegion};
#[cfg(target_os = "windows")]
pub(crate) use platform_windows::{FrameSignal, SharedRegion};

use std::sync::atomic::{fence, Ordering};

use tracing::debug;
#[cfg(target_os = "windows")]
use tracing::warn;

use crate::config::ShareConfig;
use crate::error::ShareError;
#[cfg(target_os = "windows")]
use crate::layout::LOCATION_TEXTURE;
use crate::layout::{
    self, ChannelFlags, ChannelHeader, CHANNEL_MAGIC, CHANNEL_VERSION, LOCATION_MEMORY,
    MAX_DIMENSION, MIN_DIMENSION, NO_SLOT, SLOT_COUNT,
};
use crate::types::TransportFormat;

/// Metadata for one frame being published, filled in by the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct SlotDescriptor {
    pub width: u32,
    pub height: u32,
    /// Luma-row stride of the payload the fill closure writes.
    pub stride: u32,
    pub payload_len: u32,
    pub timestamp_us: u64,
    pub sequence: u64,
}

/// The producer endpoint of a named frame channel.
///
/// Creation maps the region, initializes the header (magic last, so a
/// reader never observes a half-built header) and registers the signal.
/// Dropping the channel tears all of it down; on Unix the names are
/// unlinked so nothing stale survives the session.
#[derive(Debug)]
pub struct SharedChannel {
    region: SharedRegion,
    signal: FrameSignal,
    transport_format: TransportFormat,
    max_width: u32,
    max_height: u32,
    slot_size: usize,
    #[cfg(target_os = "windows")]
    gpu: Option<gpu::GpuBacking>,
    #[cfg(target_os = "windows")]
    staging_buf: Vec<u8>,
}

impl SharedChannel {
    /// Create the channel for frames up to `max_width` x `max_height`.
    ///
    /// When `cfg.gpu_texture` is set and the platform supports it, a
    /// shared texture is created as well; failure there degrades the
    /// channel to memory delivery instead of failing creation.
    pub fn create(cfg: &ShareConfig, max_width: u32, max_height: u32) -> Result<Self, ShareError> {
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

        let slot_size = layout::slot_size(cfg.transport_format, max_width, max_height);
        let size = layout::region_size(cfg.transport_format, max_width, max_height);
        let region = SharedRegion::create(&cfg.channel_name, size)?;
        let signal = FrameSignal::create(&cfg.signal_name)?;

        #[cfg(target_os = "windows")]
        let gpu = if cfg.gpu_texture && cfg.transport_format == TransportFormat::Bgra32 {
            match gpu::GpuBacking::new(max_width, max_height) {
                Ok(backing) => Some(backing),
                Err(e) => {
                    warn!(error = %e, "gpu texture path unavailable, using memory delivery");
                    None
                }
            }
        } else {
            None
        };
        #[cfg(not(target_os = "windows"))]
        if cfg.gpu_texture {
            debug!("gpu texture delivery not supported on this platform, using memory");
        }

        let channel = Self {
            region,
            signal,
            transport_format: cfg.transport_format,
            max_width,
            max_height,
            slot_size,
            #[cfg(target_os = "windows")]
            staging_buf: if gpu.is_some() {
                vec![0u8; slot_size]
            } else {
                Vec::new()
            },
            #[cfg(target_os = "windows")]
            gpu,
        };

        channel.init_header(cfg.transport_format);
        debug!(
            channel = %cfg.channel_name,
            region_bytes = size,
            gpu = channel.is_gpu_mode(),
            "shared channel created"
        );
        Ok(channel)
    }

    // The region arrives zeroed from the OS; only the non-zero fields need
    // stores. `magic` goes last with release ordering so a reader that sees
    // it sees a complete header.
    fn init_header(&self, format: TransportFormat) {
        let header = self.header();
        header.version.store(CHANNEL_VERSION, Ordering::Relaxed);
        header.max_width.store(self.max_width, Ordering::Relaxed);
        header.max_height.store(self.max_height, Ordering::Relaxed);
        header
            .slot_count
            .store(SLOT_COUNT as u32, Ordering::Relaxed);
        header
            .transport_format
            .store(format.to_wire(), Ordering::Relaxed);
        header
            .slot_size
            .store(self.slot_size as u32, Ordering::Relaxed);
        header
            .payload_offset
            .store(layout::PAYLOAD_OFFSET as u32, Ordering::Relaxed);
        let mut flags = ChannelFlags::empty();
        #[cfg(target_os = "windows")]
        if let Some(gpu) = &self.gpu {
            flags |= ChannelFlags::GPU_TEXTURE;
            header
                .shared_texture_handle
                .store(gpu.shared_handle(), Ordering::Relaxed);
        }
        header.flags.store(flags.bits(), Ordering::Relaxed);
        header.ready_slot.store(NO_SLOT, Ordering::Relaxed);
        header.magic.store(CHANNEL_MAGIC, Ordering::Release);
    }

    fn header(&self) -> &ChannelHeader {
        // SAFETY: the region is at least `region_size` bytes, page-aligned,
        // and owned by self.
        unsafe { layout::header_at(self.region.as_ptr()) }
    }

    /// Payload slice for slot `index`.
    ///
    /// Sound because self is the single writer and `publish` takes
    /// `&mut self`.
    fn slot_payload(&mut self, index: usize) -> &mut [u8] {
        let offset = layout::slot_offset(self.slot_size, index);
        // SAFETY: offset + slot_size <= region len by construction.
        unsafe {
            std::slice::from_raw_parts_mut(self.region.as_ptr().add(offset), self.slot_size)
        }
    }

    /// Whether frames are delivered through the shared GPU texture.
    pub fn is_gpu_mode(&self) -> bool {
        #[cfg(target_os = "windows")]
        {
            self.gpu.is_some()
        }
        #[cfg(not(target_os = "windows"))]
        {
            false
        }
    }

    pub fn transport_format(&self) -> TransportFormat {
        self.transport_format
    }

    pub fn max_dimensions(&self) -> (u32, u32) {
        (self.max_width, self.max_height)
    }

    /// Writer-side dropped-frame estimate from the header.
    pub fn dropped_frames(&self) -> u64 {
        self.header().dropped_frames.load(Ordering::Relaxed)
    }

    /// Publish one frame: let `fill` write the payload, then flip the slot
    /// ready and raise the signal.
    ///
    /// Overwriting a slot still flagged ready counts one dropped frame.
    /// If `fill` fails the slot stays not-ready and nothing is signalled;
    /// the next publish reuses the same slot.
    pub fn publish<F>(&mut self, desc: &SlotDescriptor, fill: F) -> Result<(), ShareError>
    where
        F: FnOnce(&mut [u8]) -> Result<(), ShareError>,
    {
        if desc.payload_len as usize > self.slot_size {
            return Err(ShareError::FrameOutOfBounds {
                width: desc.width,
                height: desc.height,
                min: MIN_DIMENSION,
                max_width: self.max_width,
                max_height: self.max_height,
            });
        }

        let slot = self.header().write_slot.load(Ordering::Relaxed) as usize % SLOT_COUNT;

        // The slot's previous contents are about to be destroyed. If the
        // reader had not consumed them yet, that frame is lost.
        if self.header().ready[slot].swap(0, Ordering::AcqRel) == 1 {
            self.header().dropped_frames.fetch_add(1, Ordering::Relaxed);
        }

        let location = self.write_payload(slot, desc, fill)?;

        let meta = &self.header().slots[slot];
        meta.width.store(desc.width, Ordering::Relaxed);
        meta.height.store(desc.height, Ordering::Relaxed);
        meta.stride.store(desc.stride, Ordering::Relaxed);
        meta.payload_len.store(desc.payload_len, Ordering::Relaxed);
        meta.location.store(location, Ordering::Relaxed);
        meta.timestamp_us.store(desc.timestamp_us, Ordering::Relaxed);
        meta.sequence.store(desc.sequence, Ordering::Relaxed);

        // Payload and metadata must be visible before the ready marker.
        fence(Ordering::Release);
        self.header().ready[slot].store(1, Ordering::Release);
        self.header()
            .ready_slot
            .store(slot as u32, Ordering::Release);

        self.header()
            .write_slot
            .store(((slot + 1) % SLOT_COUNT) as u32, Ordering::Release);
        self.signal.raise();
        Ok(())
    }

    /// Route the payload to the texture or the memory slot. A texture
    /// upload failure degrades this one frame to memory delivery.
    fn write_payload<F>(
        &mut self,
        slot: usize,
        desc: &SlotDescriptor,
        fill: F,
    ) -> Result<u32, ShareError>
    where
        F: FnOnce(&mut [u8]) -> Result<(), ShareError>,
    {
        let len = desc.payload_len as usize;

        #[cfg(target_os = "windows")]
        if let Some(gpu) = &self.gpu {
            fill(&mut self.staging_buf[..len])?;
            match gpu.upload(
                &self.staging_buf[..len],
                desc.stride as usize,
                desc.width,
                desc.height,
            ) {
                Ok(()) => return Ok(LOCATION_TEXTURE),
                Err(e) => {
                    warn!(
                        error = %e,
                        sequence = desc.sequence,
                        "texture upload failed, frame degraded to memory"
                    );
                    let staged = std::mem::take(&mut self.staging_buf);
                    self.slot_payload(slot)[..len].copy_from_slice(&staged[..len]);
                    self.staging_buf = staged;
                    return Ok(LOCATION_MEMORY);
                }
            }
        }

        fill(&mut self.slot_payload(slot)[..len])?;
        Ok(LOCATION_MEMORY)
    }
}

// SAFETY: the channel moves to the worker thread whole; the mapped region
// and signal are process-global OS objects.
unsafe impl Send for SharedChannel {}

// ── Tests ────────────────────────────────────────────────────────
