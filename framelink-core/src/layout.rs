//! Cross-process channel header layout.
//!
//! A [`ChannelHeader`] sits at offset 0 of the mapped region, followed by
//! `SLOT_COUNT` fixed-size frame slots starting at [`PAYLOAD_OFFSET`].
//! Both processes map the same bytes, so the layout is `#[repr(C)]` with a
//! compile-time size assertion, every mutable field is an explicit atomic,
//! and all multi-byte values are little-endian native (the channel is
//! same-machine only).
//!
//! Write protocol (producer side):
//!
//! 1. pick the target slot, clear its ready flag (dropped accounting),
//! 2. write payload bytes, then slot metadata,
//! 3. release fence, set the slot ready flag and `ready_slot`,
//! 4. fence, advance `write_slot`, raise the signal.
//!
//! A reader that acquire-loads a ready flag therefore observes fully
//! written metadata and payload. Torn payload reads during a concurrent
//! overwrite are detected by re-checking the slot sequence after copying.

use std::sync::atomic::{AtomicU32, AtomicU64};

use bitflags::bitflags;

use crate::types::TransportFormat;

// ── Constants ────────────────────────────────────────────────────

/// `b"FLNK"`, little-endian.
pub const CHANNEL_MAGIC: u32 = u32::from_le_bytes(*b"FLNK");

/// Current (and only supported) header layout version. Any layout change
/// bumps this; readers reject versions they do not know.
pub const CHANNEL_VERSION: u32 = 3;

/// Number of frame slots in the payload area.
pub const SLOT_COUNT: usize = 3;

/// `ready_slot` value before the first publish.
pub const NO_SLOT: u32 = u32::MAX;

/// Offset of slot 0 from the mapping base. Leaves headroom between the
/// header and the payload area.
pub const PAYLOAD_OFFSET: usize = 256;

/// Upper bound on either channel axis.
pub const MAX_DIMENSION: u32 = 4096;

/// Sanity lower bound on either frame axis.
pub const MIN_DIMENSION: u32 = 16;

bitflags! {
    /// Channel capability bits stored in [`ChannelHeader::flags`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChannelFlags: u32 {
        /// Pixel payload is delivered through the shared GPU texture;
        /// the memory slots carry metadata only for such frames.
        const GPU_TEXTURE = 1 << 0;
    }
}

/// `SlotMeta::location` value: payload bytes are in the memory slot.
pub const LOCATION_MEMORY: u32 = 0;
/// `SlotMeta::location` value: payload is in the shared GPU texture.
pub const LOCATION_TEXTURE: u32 = 1;

// ── SlotMeta ─────────────────────────────────────────────────────

/// Per-slot metadata, 40 bytes.
///
/// Written only by the producer, before the slot's ready flag. All fields
/// are atomics so the reader side never performs a torn load.
#[repr(C)]
#[derive(Debug)]
pub struct SlotMeta {
    /// Declared frame width (≤ `max_width`).
    pub width: AtomicU32,
    /// Declared frame height (≤ `max_height`).
    pub height: AtomicU32,
    /// Luma-row stride in bytes.
    pub stride: AtomicU32,
    /// Payload bytes actually written into the slot.
    pub payload_len: AtomicU32,
    /// [`LOCATION_MEMORY`] or [`LOCATION_TEXTURE`].
    pub location: AtomicU32,
    pub _pad: u32,
    /// Capture timestamp, microseconds since the Unix epoch.
    pub timestamp_us: AtomicU64,
    /// Monotonically increasing publish sequence number (starts at 1).
    pub sequence: AtomicU64,
}

// ── ChannelHeader ────────────────────────────────────────────────

/// The fixed header at offset 0 of the mapped region, 200 bytes.
///
/// Immutable fields (`version` through `flags`) are stored once during
/// creation, before the release-store of `magic`; a reader that observes
/// the magic therefore observes them all.
#[repr(C)]
#[derive(Debug)]
pub struct ChannelHeader {
    /// [`CHANNEL_MAGIC`]; stored last during initialization.
    pub magic: AtomicU32,
    /// [`CHANNEL_VERSION`].
    pub version: AtomicU32,
    /// Maximum frame width negotiated at open time.
    pub max_width: AtomicU32,
    /// Maximum frame height negotiated at open time.
    pub max_height: AtomicU32,
    /// Number of payload slots ([`SLOT_COUNT`]).
    pub slot_count: AtomicU32,
    /// [`TransportFormat::to_wire`] discriminant.
    pub transport_format: AtomicU32,
    /// Fixed byte size of one payload slot.
    pub slot_size: AtomicU32,
    /// Offset of slot 0 from the mapping base ([`PAYLOAD_OFFSET`]).
    pub payload_offset: AtomicU32,
    /// [`ChannelFlags`] bits.
    pub flags: AtomicU32,
    pub _pad0: u32,
    /// Opaque shareable texture handle (0 when memory-only).
    pub shared_texture_handle: AtomicU64,
    /// Slot the producer will write next.
    pub write_slot: AtomicU32,
    /// Most recently completed slot, [`NO_SLOT`] before the first publish.
    pub ready_slot: AtomicU32,
    /// Writer-side dropped-frame estimate (slot-overwrite heuristic).
    pub dropped_frames: AtomicU64,
    /// Per-slot ready flags (1 = contents complete and consumable).
    pub ready: [AtomicU32; SLOT_COUNT],
    pub _pad1: u32,
    /// Per-slot frame metadata.
    pub slots: [SlotMeta; SLOT_COUNT],
}

/// Header byte size; must stay within [`PAYLOAD_OFFSET`].
pub const HEADER_SIZE: usize = std::mem::size_of::<ChannelHeader>();

const _: () = assert!(HEADER_SIZE == 200);
const _: () = assert!(HEADER_SIZE <= PAYLOAD_OFFSET);
const _: () = assert!(std::mem::size_of::<SlotMeta>() == 40);

// ── Region sizing ────────────────────────────────────────────────

/// Byte size of one payload slot for the given maximum dimensions.
pub const fn slot_size(format: TransportFormat, max_width: u32, max_height: u32) -> usize {
    format.payload_len(max_width, max_height) as usize
}

/// Total mapped-region size: header area plus `SLOT_COUNT` slots.
pub const fn region_size(format: TransportFormat, max_width: u32, max_height: u32) -> usize {
    PAYLOAD_OFFSET + SLOT_COUNT * slot_size(format, max_width, max_height)
}

/// Byte offset of slot `index` from the mapping base.
pub fn slot_offset(slot_size: usize, index: usize) -> usize {
    PAYLOAD_OFFSET + index * slot_size
}

// ── Mapped view ──────────────────────────────────────────────────

/// Reinterpret the start of a mapped region as a [`ChannelHeader`].
///
/// # Safety
///
/// `base` must point to a mapping of at least [`HEADER_SIZE`] readable and
/// writable bytes, properly aligned (OS page mappings always are), and the
/// mapping must outlive the returned reference.
pub(crate) unsafe fn header_at<'a>(base: *const u8) -> &'a ChannelHeader {
    unsafe { &*(base as *const ChannelHeader) }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;
    use std::sync::atomic::Ordering;

    // The reader side depends on these exact offsets; pin them the way the
    // wire document states them.
    #[test]
    fn header_field_offsets() {
        assert_eq!(offset_of!(ChannelHeader, magic), 0);
        assert_eq!(offset_of!(ChannelHeader, version), 4);
        assert_eq!(offset_of!(ChannelHeader, max_width), 8);
        assert_eq!(offset_of!(ChannelHeader, max_height), 12);
        assert_eq!(offset_of!(ChannelHeader, slot_count), 16);
        assert_eq!(offset_of!(ChannelHeader, transport_format), 20);
        assert_eq!(offset_of!(ChannelHeader, slot_size), 24);
        assert_eq!(offset_of!(ChannelHeader, payload_offset), 28);
        assert_eq!(offset_of!(ChannelHeader, flags), 32);
        assert_eq!(offset_of!(ChannelHeader, shared_texture_handle), 40);
        assert_eq!(offset_of!(ChannelHeader, write_slot), 48);
        assert_eq!(offset_of!(ChannelHeader, ready_slot), 52);
        assert_eq!(offset_of!(ChannelHeader, dropped_frames), 56);
        assert_eq!(offset_of!(ChannelHeader, ready), 64);
        assert_eq!(offset_of!(ChannelHeader, slots), 80);
    }

    #[test]
    fn slot_meta_offsets() {
        assert_eq!(offset_of!(SlotMeta, width), 0);
        assert_eq!(offset_of!(SlotMeta, height), 4);
        assert_eq!(offset_of!(SlotMeta, stride), 8);
        assert_eq!(offset_of!(SlotMeta, payload_len), 12);
        assert_eq!(offset_of!(SlotMeta, location), 16);
        assert_eq!(offset_of!(SlotMeta, timestamp_us), 24);
        assert_eq!(offset_of!(SlotMeta, sequence), 32);
    }

    #[test]
    fn region_sizes() {
        // 1920x1080 BGRA: 3 slots of ~8 MB plus the header area.
        let size = region_size(TransportFormat::Bgra32, 1920, 1080);
        assert_eq!(size, PAYLOAD_OFFSET + 3 * 1920 * 4 * 1080);

        let size = region_size(TransportFormat::I420, 1280, 720);
        assert_eq!(size, PAYLOAD_OFFSET + 3 * (1280 * 720 * 3 / 2));
    }

    #[test]
    fn slot_offsets_are_disjoint() {
        let s = slot_size(TransportFormat::Bgra32, 640, 480);
        assert_eq!(slot_offset(s, 0), PAYLOAD_OFFSET);
        assert_eq!(slot_offset(s, 1), PAYLOAD_OFFSET + s);
        assert_eq!(slot_offset(s, 2), PAYLOAD_OFFSET + 2 * s);
    }

    #[test]
    fn header_view_over_buffer() {
        // Page-aligned enough for the test: Vec<u64> guarantees 8-byte
        // alignment, which is all the atomics need.
        let buf = vec![0u64; HEADER_SIZE / 8];
        let header = unsafe { header_at(buf.as_ptr() as *const u8) };
        header.magic.store(CHANNEL_MAGIC, Ordering::Release);
        header.ready_slot.store(NO_SLOT, Ordering::Relaxed);
        assert_eq!(header.magic.load(Ordering::Acquire), CHANNEL_MAGIC);
        assert_eq!(header.ready_slot.load(Ordering::Relaxed), NO_SLOT);
    }
}
