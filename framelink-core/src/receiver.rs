//! Consumer side of the cross-process frame channel.
//!
//! [`FrameReceiver`] is the in-process counterpart to external readers:
//! it attaches to a live channel by name, validates the header, and hands
//! out the freshest published frame. It exists for the reader binary and
//! for end-to-end tests; an external process in another language follows
//! the same steps against the same layout.
//!
//! Freshness over completeness: `try_latest` returns the most recent
//! ready slot and never walks backwards. Frames overwritten before the
//! reader got to them surface only in the gap counter.

use std::sync::atomic::{fence, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::channel::{FrameSignal, SharedRegion};
use crate::config::ShareConfig;
use crate::error::ShareError;
use crate::layout::{
    self, ChannelFlags, ChannelHeader, CHANNEL_MAGIC, CHANNEL_VERSION, LOCATION_TEXTURE, NO_SLOT,
};
use crate::types::TransportFormat;

/// How many torn-read retries `try_latest` makes before giving up. The
/// writer outpacing the reader three times in one call means the reader
/// will be woken again immediately anyway.
const TORN_READ_RETRIES: usize = 3;

/// One frame as read from the channel.
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub width: u32,
    pub height: u32,
    /// Luma-row stride of `payload` in bytes.
    pub stride: u32,
    /// Payload bytes; empty when `in_texture` is set.
    pub payload: Bytes,
    pub timestamp_us: u64,
    pub sequence: u64,
    /// Pixels live in the shared GPU texture, not in `payload`.
    pub in_texture: bool,
}

/// Attached consumer endpoint of a named frame channel.
#[derive(Debug)]
pub struct FrameReceiver {
    region: SharedRegion,
    signal: FrameSignal,
    transport_format: TransportFormat,
    slot_count: usize,
    slot_size: usize,
    payload_offset: usize,
    /// Sequence of the last frame handed out; 0 before the first.
    last_sequence: u64,
    /// Frames the sequence numbering says we never saw.
    missed: u64,
}

impl FrameReceiver {
    /// Attach to the channel named in `cfg`.
    ///
    /// Fails if the channel does not exist, carries the wrong magic, a
    /// layout version this build does not know, or a region too small for
    /// what its own header declares.
    pub fn attach(cfg: &ShareConfig) -> Result<Self, ShareError> {
        let region = SharedRegion::open(&cfg.channel_name)?;
        if region.len() < layout::HEADER_SIZE {
            return Err(ShareError::RegionTruncated {
                size: region.len(),
                need: layout::HEADER_SIZE,
            });
        }

        // SAFETY: region is at least HEADER_SIZE bytes and page-aligned.
        let header = unsafe { layout::header_at(region.as_ptr()) };

        let magic = header.magic.load(Ordering::Acquire);
        if magic != CHANNEL_MAGIC {
            return Err(ShareError::InvalidMagic(magic));
        }
        let version = header.version.load(Ordering::Relaxed);
        if version != CHANNEL_VERSION {
            return Err(ShareError::UnsupportedVersion(version));
        }
        let transport_format = TransportFormat::from_wire(
            header.transport_format.load(Ordering::Relaxed),
        )
        .ok_or_else(|| {
            ShareError::Other(format!(
                "unknown transport format {}",
                header.transport_format.load(Ordering::Relaxed)
            ))
        })?;

        let slot_count = header.slot_count.load(Ordering::Relaxed) as usize;
        let slot_size = header.slot_size.load(Ordering::Relaxed) as usize;
        let payload_offset = header.payload_offset.load(Ordering::Relaxed) as usize;
        let need = payload_offset + slot_count * slot_size;
        if slot_count == 0 || slot_count > layout::SLOT_COUNT || region.len() < need {
            return Err(ShareError::RegionTruncated {
                size: region.len(),
                need,
            });
        }

        let signal = FrameSignal::open(&cfg.signal_name)?;
        debug!(
            channel = %cfg.channel_name,
            format = ?transport_format,
            slots = slot_count,
            "attached to frame channel"
        );
        Ok(Self {
            region,
            signal,
            transport_format,
            slot_count,
            slot_size,
            payload_offset,
            last_sequence: 0,
            missed: 0,
        })
    }

    fn header(&self) -> &ChannelHeader {
        // SAFETY: validated in attach.
        unsafe { layout::header_at(self.region.as_ptr()) }
    }

    pub fn transport_format(&self) -> TransportFormat {
        self.transport_format
    }

    /// Negotiated maximum frame dimensions.
    pub fn max_dimensions(&self) -> (u32, u32) {
        let header = self.header();
        (
            header.max_width.load(Ordering::Relaxed),
            header.max_height.load(Ordering::Relaxed),
        )
    }

    /// Whether the producer delivers pixels through a shared GPU texture.
    pub fn is_gpu_channel(&self) -> bool {
        ChannelFlags::from_bits_truncate(self.header().flags.load(Ordering::Relaxed))
            .contains(ChannelFlags::GPU_TEXTURE)
    }

    /// Opaque shareable texture handle, 0 on memory-only channels.
    pub fn shared_texture_handle(&self) -> u64 {
        self.header().shared_texture_handle.load(Ordering::Relaxed)
    }

    /// Producer-side dropped-frame estimate.
    pub fn writer_dropped_frames(&self) -> u64 {
        self.header().dropped_frames.load(Ordering::Relaxed)
    }

    /// Frames this receiver never saw, inferred from sequence gaps.
    pub fn missed_frames(&self) -> u64 {
        self.missed
    }

    /// Block up to `timeout` for a frame signal, then fetch the freshest
    /// frame. `Ok(None)` on timeout, or when the signalled frame was
    /// already overwritten or already delivered.
    pub fn wait_frame(&mut self, timeout: Duration) -> Result<Option<ReceivedFrame>, ShareError> {
        if !self.signal.wait(timeout)? {
            return Ok(None);
        }
        self.try_latest()
    }

    /// Fetch the freshest published frame without waiting.
    ///
    /// Returns `Ok(None)` when nothing new is available. A frame being
    /// overwritten mid-copy is detected by re-checking its sequence and
    /// retried against the newer slot.
    pub fn try_latest(&mut self) -> Result<Option<ReceivedFrame>, ShareError> {
        for _ in 0..=TORN_READ_RETRIES {
            let slot = self.header().ready_slot.load(Ordering::Acquire);
            if slot == NO_SLOT {
                return Ok(None);
            }
            let slot = slot as usize;
            if slot >= self.slot_count {
                return Ok(None);
            }
            match self.read_slot(slot)? {
                ReadOutcome::Frame(frame) => {
                    if frame.sequence <= self.last_sequence {
                        return Ok(None);
                    }
                    if self.last_sequence != 0 {
                        self.missed += frame.sequence - self.last_sequence - 1;
                    }
                    self.last_sequence = frame.sequence;
                    return Ok(Some(frame));
                }
                ReadOutcome::Torn => continue,
            }
        }
        Ok(None)
    }

    fn read_slot(&self, slot: usize) -> Result<ReadOutcome, ShareError> {
        let header = self.header();
        if header.ready[slot].load(Ordering::Acquire) != 1 {
            return Ok(ReadOutcome::Torn);
        }
        let meta = &header.slots[slot];
        let sequence = meta.sequence.load(Ordering::Acquire);
        let width = meta.width.load(Ordering::Relaxed);
        let height = meta.height.load(Ordering::Relaxed);
        let stride = meta.stride.load(Ordering::Relaxed);
        let payload_len = meta.payload_len.load(Ordering::Relaxed) as usize;
        let location = meta.location.load(Ordering::Relaxed);
        let timestamp_us = meta.timestamp_us.load(Ordering::Relaxed);

        if payload_len > self.slot_size {
            return Err(ShareError::RegionTruncated {
                size: self.slot_size,
                need: payload_len,
            });
        }

        let payload = if location == LOCATION_TEXTURE {
            Bytes::new()
        } else {
            let offset = self.payload_offset + slot * self.slot_size;
            // SAFETY: offset + payload_len <= region len, checked above
            // against the slot size validated in attach.
            let src = unsafe {
                std::slice::from_raw_parts(self.region.as_ptr().add(offset), payload_len)
            };
            let copied = src.to_vec();
            // The copy must complete before the staleness re-check.
            fence(Ordering::Acquire);
            if meta.sequence.load(Ordering::Acquire) != sequence
                || header.ready[slot].load(Ordering::Acquire) != 1
            {
                return Ok(ReadOutcome::Torn);
            }
            Bytes::from(copied)
        };

        Ok(ReadOutcome::Frame(ReceivedFrame {
            width,
            height,
            stride,
            payload,
            timestamp_us,
            sequence,
            in_texture: location == LOCATION_TEXTURE,
        }))
    }
}

enum ReadOutcome {
    Frame(ReceivedFrame),
    Torn,
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{SharedChannel, SlotDescriptor};

    fn unique_cfg(tag: &str) -> ShareConfig {
        use std::sync::atomic::AtomicU32;
        static N: AtomicU32 = AtomicU32::new(0);
        let id = format!(
            "fl-recv-{tag}-{}-{}",
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

    fn publish_solid(channel: &mut SharedChannel, value: u8, sequence: u64) {
        let desc = SlotDescriptor {
            width: 64,
            height: 48,
            stride: 64 * 4,
            payload_len: 64 * 4 * 48,
            timestamp_us: 100 + sequence,
            sequence,
        };
        channel
            .publish(&desc, |buf| {
                buf.fill(value);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn attach_requires_existing_channel() {
        let cfg = unique_cfg("absent");
        assert!(matches!(
            FrameReceiver::attach(&cfg),
            Err(ShareError::ChannelNotFound(_))
        ));
    }

    #[test]
    fn attach_rejects_uninitialized_region() {
        let cfg = unique_cfg("raw");
        let _region = SharedRegion::create(&cfg.channel_name, 4096).unwrap();
        assert!(matches!(
            FrameReceiver::attach(&cfg),
            Err(ShareError::InvalidMagic(0))
        ));
    }

    #[test]
    fn attach_rejects_unknown_version() {
        let cfg = unique_cfg("version");
        let channel = SharedChannel::create(&cfg, 64, 48).unwrap();
        let view = SharedRegion::open(&cfg.channel_name).unwrap();
        // SAFETY: live channel region.
        let header = unsafe { layout::header_at(view.as_ptr()) };
        header.version.store(99, Ordering::Relaxed);

        assert!(matches!(
            FrameReceiver::attach(&cfg),
            Err(ShareError::UnsupportedVersion(99))
        ));
        drop(channel);
    }

    #[test]
    fn waits_then_reads_published_frame() {
        let cfg = unique_cfg("read");
        let mut channel = SharedChannel::create(&cfg, 64, 48).unwrap();
        let mut receiver = FrameReceiver::attach(&cfg).unwrap();

        publish_solid(&mut channel, 0x5A, 1);
        let frame = receiver
            .wait_frame(Duration::from_millis(500))
            .unwrap()
            .unwrap();
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.timestamp_us, 101);
        assert!(!frame.in_texture);
        assert_eq!(frame.payload.len(), 64 * 4 * 48);
        assert!(frame.payload.iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn same_frame_not_delivered_twice() {
        let cfg = unique_cfg("dedupe");
        let mut channel = SharedChannel::create(&cfg, 64, 48).unwrap();
        let mut receiver = FrameReceiver::attach(&cfg).unwrap();

        publish_solid(&mut channel, 1, 1);
        assert!(receiver.try_latest().unwrap().is_some());
        assert!(receiver.try_latest().unwrap().is_none());
    }

    #[test]
    fn sequence_gaps_count_missed_frames() {
        let cfg = unique_cfg("gaps");
        let mut channel = SharedChannel::create(&cfg, 64, 48).unwrap();
        let mut receiver = FrameReceiver::attach(&cfg).unwrap();

        publish_solid(&mut channel, 1, 1);
        assert!(receiver.try_latest().unwrap().is_some());

        // Publishes 2..=5 land while the reader is away; it resumes at 5.
        for seq in 2..=5 {
            publish_solid(&mut channel, seq as u8, seq);
        }
        let frame = receiver.try_latest().unwrap().unwrap();
        assert_eq!(frame.sequence, 5);
        assert_eq!(receiver.missed_frames(), 3);
    }

    #[test]
    fn freshest_frame_wins() {
        let cfg = unique_cfg("fresh");
        let mut channel = SharedChannel::create(&cfg, 64, 48).unwrap();
        let mut receiver = FrameReceiver::attach(&cfg).unwrap();

        publish_solid(&mut channel, 0x01, 1);
        publish_solid(&mut channel, 0x02, 2);
        let frame = receiver.try_latest().unwrap().unwrap();
        assert_eq!(frame.sequence, 2);
        assert!(frame.payload.iter().all(|&b| b == 0x02));
    }

    #[test]
    fn writer_drop_estimate_visible_to_reader() {
        let cfg = unique_cfg("drops");
        let mut channel = SharedChannel::create(&cfg, 64, 48).unwrap();
        let receiver = FrameReceiver::attach(&cfg).unwrap();

        for seq in 1..=5 {
            publish_solid(&mut channel, seq as u8, seq);
        }
        assert_eq!(receiver.writer_dropped_frames(), 2);
    }
}
