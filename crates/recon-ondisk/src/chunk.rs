//! The superblock's bootstrap chunk map.
//!
//! `sys_chunk_array` is a packed run of `(btrfs_disk_key, btrfs_chunk)`
//! pairs, each chunk carrying `num_stripes` trailing stripe descriptors. The
//! array is what lets a reader locate the chunk tree before any tree has
//! been read.

use crate::ident::encode_uuid;
use crate::key::DiskKey;
use crate::layout::{Decode, Encode, FieldSpec, StructDecoder, layout_is_contiguous};
use bitflags::bitflags;
use recon_types::{ByteCursor, ByteOrder, ByteWriter, DecodeError, FieldError};
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

pub const STRIPE_LAYOUT: &[FieldSpec] = &[
    FieldSpec::new("devid", 0x00, 8),
    FieldSpec::new("offset", 0x08, 8),
    FieldSpec::new("dev_uuid", 0x10, 16),
];

/// Fixed header of `btrfs_chunk`; the stripes follow it.
pub const CHUNK_ITEM_LAYOUT: &[FieldSpec] = &[
    FieldSpec::new("length", 0x00, 8),
    FieldSpec::new("owner", 0x08, 8),
    FieldSpec::new("stripe_len", 0x10, 8),
    FieldSpec::new("chunk_type", 0x18, 8),
    FieldSpec::new("io_align", 0x20, 4),
    FieldSpec::new("io_width", 0x24, 4),
    FieldSpec::new("sector_size", 0x28, 4),
    FieldSpec::new("num_stripes", 0x2C, 2),
    FieldSpec::new("sub_stripes", 0x2E, 2),
];

const _: () = assert!(layout_is_contiguous(STRIPE_LAYOUT));
const _: () = assert!(layout_is_contiguous(CHUNK_ITEM_LAYOUT));

bitflags! {
    /// Block group type and RAID profile bits of `btrfs_chunk::type`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BlockGroupFlags: u64 {
        const DATA = 1 << 0;
        const SYSTEM = 1 << 1;
        const METADATA = 1 << 2;
        const RAID0 = 1 << 3;
        const RAID1 = 1 << 4;
        const DUP = 1 << 5;
        const RAID10 = 1 << 6;
        const RAID5 = 1 << 7;
        const RAID6 = 1 << 8;
        const RAID1C3 = 1 << 9;
        const RAID1C4 = 1 << 10;
    }
}

impl BlockGroupFlags {
    /// Human-readable profile name, `"single"` when no RAID bit is set.
    #[must_use]
    pub fn profile(self) -> &'static str {
        const PROFILES: &[(BlockGroupFlags, &str)] = &[
            (BlockGroupFlags::RAID0, "raid0"),
            (BlockGroupFlags::RAID1, "raid1"),
            (BlockGroupFlags::DUP, "dup"),
            (BlockGroupFlags::RAID10, "raid10"),
            (BlockGroupFlags::RAID5, "raid5"),
            (BlockGroupFlags::RAID6, "raid6"),
            (BlockGroupFlags::RAID1C3, "raid1c3"),
            (BlockGroupFlags::RAID1C4, "raid1c4"),
        ];
        PROFILES
            .iter()
            .find(|(bit, _)| self.contains(*bit))
            .map_or("single", |(_, name)| name)
    }
}

/// One device extent backing a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stripe {
    pub devid: u64,
    /// Physical byte offset on `devid`.
    pub offset: u64,
    pub dev_uuid: Uuid,
}

impl Decode for Stripe {
    const NAME: &'static str = "stripe";
    const LAYOUT: &'static [FieldSpec] = STRIPE_LAYOUT;

    fn decode_from(cursor: &mut ByteCursor<'_>) -> Result<Self, FieldError> {
        let mut d = StructDecoder::new(Self::LAYOUT, cursor);
        let stripe = Self {
            devid: d.u64("devid")?,
            offset: d.u64("offset")?,
            dev_uuid: d.uuid("dev_uuid")?,
        };
        d.finish()?;
        Ok(stripe)
    }
}

impl Encode for Stripe {
    fn encode_into(&self, out: &mut ByteWriter) {
        out.put_u64(self.devid);
        out.put_u64(self.offset);
        encode_uuid(out, &self.dev_uuid);
    }
}

/// `btrfs_chunk`: a logical range and the stripes that store it.
///
/// [`Decode::SIZE`] covers only the fixed header; the encoded size is
/// [`ChunkItem::encoded_len`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkItem {
    pub length: u64,
    /// Tree that owns the chunk (the extent tree, objectid 2, in practice).
    pub owner: u64,
    pub stripe_len: u64,
    pub chunk_type: u64,
    pub io_align: u32,
    pub io_width: u32,
    pub sector_size: u32,
    pub num_stripes: u16,
    pub sub_stripes: u16,
    pub stripes: Vec<Stripe>,
}

impl ChunkItem {
    /// Typed view of `chunk_type`. Unknown bits are dropped.
    #[must_use]
    pub fn flags(&self) -> BlockGroupFlags {
        BlockGroupFlags::from_bits_truncate(self.chunk_type)
    }

    #[must_use]
    pub fn encoded_len(&self) -> usize {
        Self::SIZE + self.stripes.len() * Stripe::SIZE
    }

    /// Map a byte offset inside the chunk to the stripe that stores it.
    ///
    /// RAID0 and RAID10 rotate `stripe_len` units across the stripes (RAID10
    /// across groups of `sub_stripes` mirrors). Single, DUP and RAID1* land
    /// on the first copy. Parity profiles, a zero `stripe_len` on a striped
    /// profile, a missing stripe or an overflowing physical offset yield
    /// `None`.
    #[must_use]
    pub fn map_offset(&self, offset: u64) -> Option<PhysicalMapping> {
        let flags = self.flags();
        if flags.intersects(BlockGroupFlags::RAID5 | BlockGroupFlags::RAID6) {
            return None;
        }

        let (stripe, within) =
            if flags.intersects(BlockGroupFlags::RAID0 | BlockGroupFlags::RAID10) {
                let copies = if flags.contains(BlockGroupFlags::RAID10) {
                    u64::from(self.sub_stripes).max(1)
                } else {
                    1
                };
                let groups = u64::try_from(self.stripes.len()).ok()? / copies;
                if groups == 0 || self.stripe_len == 0 {
                    return None;
                }
                let unit = offset / self.stripe_len;
                let index = usize::try_from(unit % groups * copies).ok()?;
                // Never exceeds `offset`.
                let within = unit / groups * self.stripe_len + offset % self.stripe_len;
                (self.stripes.get(index)?, within)
            } else {
                (self.stripes.first()?, offset)
            };

        Some(PhysicalMapping {
            devid: stripe.devid,
            physical: stripe.offset.checked_add(within)?,
        })
    }
}

impl Decode for ChunkItem {
    const NAME: &'static str = "chunk_item";
    const LAYOUT: &'static [FieldSpec] = CHUNK_ITEM_LAYOUT;

    fn decode_from(cursor: &mut ByteCursor<'_>) -> Result<Self, FieldError> {
        let mut probe = *cursor;
        let mut d = StructDecoder::new(Self::LAYOUT, &mut probe);
        let length = d.u64("length")?;
        let owner = d.u64("owner")?;
        let stripe_len = d.u64("stripe_len")?;
        let chunk_type = d.u64("chunk_type")?;
        let io_align = d.u32("io_align")?;
        let io_width = d.u32("io_width")?;
        let sector_size = d.u32("sector_size")?;
        let num_stripes = d.u16("num_stripes")?;
        let sub_stripes = d.u16("sub_stripes")?;
        d.finish()?;

        // Never trust num_stripes for the allocation size.
        let fits = probe.remaining() / Stripe::SIZE;
        let mut stripes = Vec::with_capacity(usize::from(num_stripes).min(fits));
        for _ in 0..num_stripes {
            stripes.push(Stripe::decode_from(&mut probe).map_err(|err| err.within("stripes"))?);
        }

        *cursor = probe;
        Ok(Self {
            length,
            owner,
            stripe_len,
            chunk_type,
            io_align,
            io_width,
            sector_size,
            num_stripes,
            sub_stripes,
            stripes,
        })
    }
}

impl Encode for ChunkItem {
    fn encode_into(&self, out: &mut ByteWriter) {
        out.put_u64(self.length);
        out.put_u64(self.owner);
        out.put_u64(self.stripe_len);
        out.put_u64(self.chunk_type);
        out.put_u32(self.io_align);
        out.put_u32(self.io_width);
        out.put_u32(self.sector_size);
        out.put_u16(self.num_stripes);
        out.put_u16(self.sub_stripes);
        for stripe in &self.stripes {
            stripe.encode_into(out);
        }
    }
}

/// One entry of the system chunk array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysChunk {
    pub key: DiskKey,
    pub chunk: ChunkItem,
}

impl SysChunk {
    /// First logical byte covered (the key offset).
    #[must_use]
    pub fn logical_start(&self) -> u64 {
        self.key.offset
    }

    /// One past the last logical byte, `None` if the range overflows.
    #[must_use]
    pub fn logical_end(&self) -> Option<u64> {
        self.key.offset.checked_add(self.chunk.length)
    }

    #[must_use]
    pub fn encoded_len(&self) -> usize {
        DiskKey::SIZE + self.chunk.encoded_len()
    }
}

impl Encode for SysChunk {
    fn encode_into(&self, out: &mut ByteWriter) {
        self.key.encode_into(out);
        self.chunk.encode_into(out);
    }
}

/// Walk a system chunk array span entry by entry until it is exhausted.
///
/// Never reads past `span`. An entry that starts inside the span but does
/// not fit in it fails with [`DecodeError::TruncatedChunkEntry`]; `needed`
/// is the number of bytes, counted from the entry start, the entry required
/// to get past the field that ran out.
pub fn decode_sys_chunk_array(span: &[u8], order: ByteOrder) -> Result<Vec<SysChunk>, DecodeError> {
    let mut cursor = ByteCursor::new(span, order);
    let mut entries = Vec::new();

    while !cursor.is_empty() {
        let index = entries.len();
        let start = cursor.position();
        let entry = decode_entry(&mut cursor).map_err(|err| match err.kind {
            DecodeError::OutOfBounds { needed, offset, .. } => DecodeError::TruncatedChunkEntry {
                index,
                offset: start,
                needed: offset + needed - start,
                remaining: span.len() - start,
            },
            other => other,
        })?;
        trace!(
            target: "recon::chunk",
            index,
            offset = start,
            key = %entry.key,
            length = entry.chunk.length,
            num_stripes = entry.chunk.num_stripes,
            "sys_chunk_entry"
        );
        entries.push(entry);
    }

    Ok(entries)
}

fn decode_entry(cursor: &mut ByteCursor<'_>) -> Result<SysChunk, FieldError> {
    let mut probe = *cursor;
    let key = DiskKey::decode_from(&mut probe).map_err(|err| err.within("key"))?;
    let chunk = ChunkItem::decode_from(&mut probe).map_err(|err| err.within("chunk"))?;
    *cursor = probe;
    Ok(SysChunk { key, chunk })
}

/// Result of a logical-to-physical bytenr mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalMapping {
    pub devid: u64,
    pub physical: u64,
}

/// Map a logical byte address through the bootstrap chunks.
///
/// Chunks whose logical range overflows are treated as not covering the
/// address. See [`ChunkItem::map_offset`] for how the covering chunk picks
/// a device.
#[must_use]
pub fn map_logical(chunks: &[SysChunk], logical: u64) -> Option<PhysicalMapping> {
    chunks.iter().find_map(|entry| {
        let start = entry.logical_start();
        let end = entry.logical_end()?;
        if !(start..end).contains(&logical) {
            return None;
        }
        entry.chunk.map_offset(logical - start)
    })
}
