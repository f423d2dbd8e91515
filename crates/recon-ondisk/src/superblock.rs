//! The btrfs superblock (`btrfs_super_block`).
//!
//! Decoding is purely structural and runs in two phases. The fixed part
//! (bytes `0x000..0x32B`) is walked through [`SUPERBLOCK_LAYOUT`]. The
//! trailing system chunk array is then taken as an opaque span whose length
//! is the `sys_chunk_array_size` decoded in phase one; its entries are only
//! decoded on request by [`Superblock::sys_chunks`].
//!
//! Magic, checksum and flags are never validated here. Callers that care
//! use [`Superblock::has_valid_magic`] and the typed views.

use crate::chunk::{SysChunk, decode_sys_chunk_array};
use crate::dev_item::DevItem;
use crate::ident::{FixedString, encode_uuid};
use crate::layout::{Decode, Encode, FieldSpec, StructDecoder, layout_is_contiguous};
use bitflags::bitflags;
use recon_types::{
    BTRFS_CSUM_TYPE_BLAKE2B, BTRFS_CSUM_TYPE_CRC32C, BTRFS_CSUM_TYPE_SHA256,
    BTRFS_CSUM_TYPE_XXHASH64, BTRFS_LABEL_SIZE, BTRFS_MAGIC, BTRFS_SUPER_INFO_SIZE, ByteCursor,
    ByteOrder, ByteWriter, DecodeError, FieldError, SuperblockMirror,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;
use uuid::Uuid;

/// Offset of `sys_chunk_array` within the superblock.
pub const SYS_CHUNK_ARRAY_OFFSET: usize = 0x32B;
/// Width of the `reserved` padding before the chunk array (28 × u64).
pub const RESERVED_SIZE: usize = 224;

pub const SUPERBLOCK_LAYOUT: &[FieldSpec] = &[
    FieldSpec::new("csum", 0x000, 32),
    FieldSpec::new("fsid", 0x020, 16),
    FieldSpec::new("bytenr", 0x030, 8),
    FieldSpec::new("flags", 0x038, 8),
    FieldSpec::new("magic", 0x040, 8),
    FieldSpec::new("generation", 0x048, 8),
    FieldSpec::new("root", 0x050, 8),
    FieldSpec::new("chunk_root", 0x058, 8),
    FieldSpec::new("log_root", 0x060, 8),
    FieldSpec::new("log_root_transid", 0x068, 8),
    FieldSpec::new("total_bytes", 0x070, 8),
    FieldSpec::new("bytes_used", 0x078, 8),
    FieldSpec::new("root_dir_objectid", 0x080, 8),
    FieldSpec::new("num_devices", 0x088, 8),
    FieldSpec::new("sector_size", 0x090, 4),
    FieldSpec::new("node_size", 0x094, 4),
    FieldSpec::new("leafsize", 0x098, 4),
    FieldSpec::new("stripesize", 0x09C, 4),
    FieldSpec::new("sys_chunk_array_size", 0x0A0, 4),
    FieldSpec::new("chunk_root_generation", 0x0A4, 8),
    FieldSpec::new("compat_flags", 0x0AC, 8),
    FieldSpec::new("compat_ro_flags", 0x0B4, 8),
    FieldSpec::new("incompat_flags", 0x0BC, 8),
    FieldSpec::new("csum_type", 0x0C4, 2),
    FieldSpec::new("root_level", 0x0C6, 1),
    FieldSpec::new("chunk_root_level", 0x0C7, 1),
    FieldSpec::new("log_root_level", 0x0C8, 1),
    FieldSpec::new("dev_item", 0x0C9, 0x62),
    FieldSpec::new("label", 0x12B, BTRFS_LABEL_SIZE),
    FieldSpec::new("cache_generation", 0x22B, 8),
    FieldSpec::new("uuid_tree_generation", 0x233, 8),
    FieldSpec::new("metadata_uuid", 0x23B, 16),
    FieldSpec::new("reserved", 0x24B, RESERVED_SIZE),
];

const _: () = assert!(layout_is_contiguous(SUPERBLOCK_LAYOUT));

bitflags! {
    /// Bits of the superblock `flags` field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SuperblockFlags: u64 {
        const ERROR = 1 << 2;
        const SEEDING = 1 << 32;
        const METADUMP = 1 << 33;
        const METADUMP_V2 = 1 << 34;
        const CHANGING_FSID = 1 << 35;
        const CHANGING_FSID_V2 = 1 << 36;
    }
}

/// Checksum algorithm named by `csum_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    Crc32c,
    Xxhash64,
    Sha256,
    Blake2b,
}

impl ChecksumType {
    #[must_use]
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            BTRFS_CSUM_TYPE_CRC32C => Some(Self::Crc32c),
            BTRFS_CSUM_TYPE_XXHASH64 => Some(Self::Xxhash64),
            BTRFS_CSUM_TYPE_SHA256 => Some(Self::Sha256),
            BTRFS_CSUM_TYPE_BLAKE2B => Some(Self::Blake2b),
            _ => None,
        }
    }

    /// Significant bytes at the front of the 32-byte `csum` field.
    #[must_use]
    pub fn digest_len(self) -> usize {
        match self {
            Self::Crc32c => 4,
            Self::Xxhash64 => 8,
            Self::Sha256 | Self::Blake2b => 32,
        }
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Crc32c => "crc32c",
            Self::Xxhash64 => "xxhash64",
            Self::Sha256 => "sha256",
            Self::Blake2b => "blake2b",
        })
    }
}

/// Knobs for [`Superblock::decode_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    pub byte_order: ByteOrder,
}

impl DecodeOptions {
    #[must_use]
    pub fn big_endian() -> Self {
        Self {
            byte_order: ByteOrder::Big,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub csum: [u8; 32],
    pub fsid: Uuid,
    /// Physical address of this copy.
    pub bytenr: u64,
    pub flags: u64,
    /// Raw magic bytes; `_BHRfS_M` on a real filesystem.
    pub magic: [u8; 8],
    pub generation: u64,
    /// Logical address of the root tree root.
    pub root: u64,
    /// Logical address of the chunk tree root.
    pub chunk_root: u64,
    /// Logical address of the log tree root.
    pub log_root: u64,
    pub log_root_transid: u64,
    pub total_bytes: u64,
    pub bytes_used: u64,
    pub root_dir_objectid: u64,
    pub num_devices: u64,
    pub sector_size: u32,
    pub node_size: u32,
    /// Unused; mkfs writes `node_size` here.
    pub leafsize: u32,
    pub stripesize: u32,
    pub sys_chunk_array_size: u32,
    pub chunk_root_generation: u64,
    pub compat_flags: u64,
    pub compat_ro_flags: u64,
    pub incompat_flags: u64,
    pub csum_type: u16,
    pub root_level: u8,
    pub chunk_root_level: u8,
    pub log_root_level: u8,
    pub dev_item: DevItem,
    pub label: FixedString<BTRFS_LABEL_SIZE>,
    pub cache_generation: u64,
    pub uuid_tree_generation: u64,
    pub metadata_uuid: Uuid,
    /// Exactly `sys_chunk_array_size` raw bytes.
    pub sys_chunk_array: Vec<u8>,
}

impl Superblock {
    /// Decode a superblock from the start of `bytes` using `options`.
    /// Same result as [`Decode::decode`] with `options.byte_order`.
    ///
    /// `bytes` is usually the 4096-byte superblock region but only needs to
    /// cover the fixed part plus `sys_chunk_array_size` bytes. Anything after
    /// that is ignored.
    pub fn decode_with(bytes: &[u8], options: &DecodeOptions) -> Result<Self, FieldError> {
        Self::decode_from(&mut ByteCursor::new(bytes, options.byte_order))
    }

    /// Decode the copy stored at `mirror` within a whole-device image.
    ///
    /// At most the 4096-byte superblock region is looked at. An image that
    /// ends before the mirror fails with [`DecodeError::OutOfBounds`] on the
    /// first field.
    pub fn decode_from_image(
        image: &[u8],
        mirror: SuperblockMirror,
        options: &DecodeOptions,
    ) -> Result<Self, FieldError> {
        let start = usize::try_from(mirror.byte_offset())
            .ok()
            .filter(|start| *start <= image.len())
            .ok_or_else(|| {
                FieldError::new(
                    "csum",
                    DecodeError::OutOfBounds {
                        needed: BTRFS_SUPER_INFO_SIZE,
                        offset: 0,
                        remaining: 0,
                    },
                )
            })?;
        let end = image.len().min(start.saturating_add(BTRFS_SUPER_INFO_SIZE));
        Self::decode_with(&image[start..end], options)
    }

    #[must_use]
    pub fn has_valid_magic(&self) -> bool {
        self.magic == BTRFS_MAGIC
    }

    /// `None` for a `csum_type` this decoder does not know.
    #[must_use]
    pub fn checksum_type(&self) -> Option<ChecksumType> {
        ChecksumType::from_raw(self.csum_type)
    }

    /// Typed view of `flags`. Unknown bits are dropped.
    #[must_use]
    pub fn flags(&self) -> SuperblockFlags {
        SuperblockFlags::from_bits_truncate(self.flags)
    }

    /// The significant prefix of `csum`, or all 32 bytes for an unknown type.
    #[must_use]
    pub fn checksum_bytes(&self) -> &[u8] {
        let len = self
            .checksum_type()
            .map_or(self.csum.len(), ChecksumType::digest_len);
        &self.csum[..len]
    }

    /// Decode the entries of the system chunk array.
    ///
    /// `order` must be the byte order the superblock itself was decoded with.
    pub fn sys_chunks(&self, order: ByteOrder) -> Result<Vec<SysChunk>, DecodeError> {
        decode_sys_chunk_array(&self.sys_chunk_array, order)
    }

    /// Bytes the decoded structure spans: the fixed part plus the array.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        Self::SIZE + self.sys_chunk_array.len()
    }
}

impl Decode for Superblock {
    const NAME: &'static str = "superblock";
    const LAYOUT: &'static [FieldSpec] = SUPERBLOCK_LAYOUT;

    fn decode_from(cursor: &mut ByteCursor<'_>) -> Result<Self, FieldError> {
        let start = cursor.position();
        let mut probe = *cursor;
        let mut d = StructDecoder::new(Self::LAYOUT, &mut probe);
        let csum = d.bytes::<32>("csum")?;
        let fsid = d.uuid("fsid")?;
        let bytenr = d.u64("bytenr")?;
        let flags = d.u64("flags")?;
        let magic = d.bytes::<8>("magic")?;
        let generation = d.u64("generation")?;
        let root = d.u64("root")?;
        let chunk_root = d.u64("chunk_root")?;
        let log_root = d.u64("log_root")?;
        let log_root_transid = d.u64("log_root_transid")?;
        let total_bytes = d.u64("total_bytes")?;
        let bytes_used = d.u64("bytes_used")?;
        let root_dir_objectid = d.u64("root_dir_objectid")?;
        let num_devices = d.u64("num_devices")?;
        let sector_size = d.u32("sector_size")?;
        let node_size = d.u32("node_size")?;
        let leafsize = d.u32("leafsize")?;
        let stripesize = d.u32("stripesize")?;
        let sys_chunk_array_size = d.u32("sys_chunk_array_size")?;
        let chunk_root_generation = d.u64("chunk_root_generation")?;
        let compat_flags = d.u64("compat_flags")?;
        let compat_ro_flags = d.u64("compat_ro_flags")?;
        let incompat_flags = d.u64("incompat_flags")?;
        let csum_type = d.u16("csum_type")?;
        let root_level = d.u8("root_level")?;
        let chunk_root_level = d.u8("chunk_root_level")?;
        let log_root_level = d.u8("log_root_level")?;
        let dev_item = d.nested("dev_item", DevItem::decode_from)?;
        let label = d.string::<BTRFS_LABEL_SIZE>("label")?;
        let cache_generation = d.u64("cache_generation")?;
        let uuid_tree_generation = d.u64("uuid_tree_generation")?;
        let metadata_uuid = d.uuid("metadata_uuid")?;
        d.skip("reserved")?;
        d.finish()?;

        // Phase two: the array length is only known now.
        let array_len = usize::try_from(sys_chunk_array_size).unwrap_or(usize::MAX);
        let sys_chunk_array = probe
            .advance(array_len)
            .map_err(|kind| FieldError::new("sys_chunk_array", kind))?
            .to_vec();

        *cursor = probe;
        trace!(
            target: "recon::superblock",
            offset = start,
            generation,
            bytenr,
            sys_chunk_array_size,
            "superblock_decoded"
        );

        Ok(Self {
            csum,
            fsid,
            bytenr,
            flags,
            magic,
            generation,
            root,
            chunk_root,
            log_root,
            log_root_transid,
            total_bytes,
            bytes_used,
            root_dir_objectid,
            num_devices,
            sector_size,
            node_size,
            leafsize,
            stripesize,
            sys_chunk_array_size,
            chunk_root_generation,
            compat_flags,
            compat_ro_flags,
            incompat_flags,
            csum_type,
            root_level,
            chunk_root_level,
            log_root_level,
            dev_item,
            label,
            cache_generation,
            uuid_tree_generation,
            metadata_uuid,
            sys_chunk_array,
        })
    }
}

impl Encode for Superblock {
    /// The reserved region is written as zeros.
    fn encode_into(&self, out: &mut ByteWriter) {
        out.put_bytes(&self.csum);
        encode_uuid(out, &self.fsid);
        out.put_u64(self.bytenr);
        out.put_u64(self.flags);
        out.put_bytes(&self.magic);
        out.put_u64(self.generation);
        out.put_u64(self.root);
        out.put_u64(self.chunk_root);
        out.put_u64(self.log_root);
        out.put_u64(self.log_root_transid);
        out.put_u64(self.total_bytes);
        out.put_u64(self.bytes_used);
        out.put_u64(self.root_dir_objectid);
        out.put_u64(self.num_devices);
        out.put_u32(self.sector_size);
        out.put_u32(self.node_size);
        out.put_u32(self.leafsize);
        out.put_u32(self.stripesize);
        out.put_u32(self.sys_chunk_array_size);
        out.put_u64(self.chunk_root_generation);
        out.put_u64(self.compat_flags);
        out.put_u64(self.compat_ro_flags);
        out.put_u64(self.incompat_flags);
        out.put_u16(self.csum_type);
        out.put_u8(self.root_level);
        out.put_u8(self.chunk_root_level);
        out.put_u8(self.log_root_level);
        self.dev_item.encode_into(out);
        self.label.encode_into(out);
        out.put_u64(self.cache_generation);
        out.put_u64(self.uuid_tree_generation);
        encode_uuid(out, &self.metadata_uuid);
        out.put_zeros(RESERVED_SIZE);
        out.put_bytes(&self.sys_chunk_array);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyType;
    use recon_types::{BTRFS_SUPER_INFO_OFFSET, BTRFS_SUPER_INFO_SIZE};

    const LABEL: usize = 0x12B;
    const DEV_ITEM: usize = 0xC9;

    fn region() -> Vec<u8> {
        let mut sb = vec![0_u8; BTRFS_SUPER_INFO_SIZE];
        sb[0x00..0x04].copy_from_slice(&0x01E6_0F03_u32.to_le_bytes());
        sb[0x20..0x30].copy_from_slice(&[
            0xbb, 0xa6, 0x92, 0xf7, 0x5b, 0xe7, 0x41, 0x73, 0xbc, 0x27, 0xbb, 0x3e, 0x21, 0x64,
            0x47, 0x39,
        ]);
        sb[0x30..0x38].copy_from_slice(&(BTRFS_SUPER_INFO_OFFSET as u64).to_le_bytes());
        sb[0x40..0x48].copy_from_slice(&BTRFS_MAGIC);
        sb[0x48..0x50].copy_from_slice(&2_907_003_u64.to_le_bytes());
        sb[0x50..0x58].copy_from_slice(&257_423_802_368_u64.to_le_bytes());
        sb[0x58..0x60].copy_from_slice(&4_585_107_275_776_u64.to_le_bytes());
        sb[0x70..0x78].copy_from_slice(&2_000_407_977_984_u64.to_le_bytes());
        sb[0x80..0x88].copy_from_slice(&6_u64.to_le_bytes());
        sb[0x88..0x90].copy_from_slice(&2_u64.to_le_bytes());
        sb[0x90..0x94].copy_from_slice(&4096_u32.to_le_bytes());
        sb[0x94..0x98].copy_from_slice(&16384_u32.to_le_bytes());
        sb[0x98..0x9C].copy_from_slice(&16384_u32.to_le_bytes());
        sb[0x9C..0xA0].copy_from_slice(&4096_u32.to_le_bytes());
        sb[0xBC..0xC4].copy_from_slice(&353_u64.to_le_bytes());
        sb[0xC6] = 1;
        sb[0xC7] = 1;
        sb[DEV_ITEM..DEV_ITEM + 8].copy_from_slice(&1_u64.to_le_bytes());
        sb[DEV_ITEM + 0x42..DEV_ITEM + 0x52].copy_from_slice(&[0x11; 16]);
        sb[LABEL..LABEL + 8].copy_from_slice(b"yakbtrfs");
        sb[0x22B..0x233].copy_from_slice(&2_907_003_u64.to_le_bytes());
        sb
    }

    /// Append one single-stripe SYSTEM chunk to the array of `sb`.
    fn with_system_chunk(mut sb: Vec<u8>) -> Vec<u8> {
        sb[0xA0..0xA4].copy_from_slice(&97_u32.to_le_bytes());
        let base = SYS_CHUNK_ARRAY_OFFSET;
        sb[base..base + 8].copy_from_slice(&256_u64.to_le_bytes());
        sb[base + 8] = 228;
        sb[base + 9..base + 17].copy_from_slice(&0x150_0000_u64.to_le_bytes());
        let c = base + 17;
        sb[c..c + 8].copy_from_slice(&(8 * 1024 * 1024_u64).to_le_bytes());
        sb[c + 8..c + 16].copy_from_slice(&2_u64.to_le_bytes());
        sb[c + 16..c + 24].copy_from_slice(&(64 * 1024_u64).to_le_bytes());
        sb[c + 24..c + 32].copy_from_slice(&2_u64.to_le_bytes()); // type=SYSTEM
        sb[c + 44..c + 46].copy_from_slice(&1_u16.to_le_bytes()); // num_stripes=1
        let s = c + 48;
        sb[s..s + 8].copy_from_slice(&1_u64.to_le_bytes());
        sb[s + 8..s + 16].copy_from_slice(&0x150_0000_u64.to_le_bytes());
        sb
    }

    #[test]
    fn fixed_part_ends_at_chunk_array() {
        assert_eq!(Superblock::SIZE, SYS_CHUNK_ARRAY_OFFSET);
    }

    #[test]
    fn decode_superblock_fields() {
        let sb = region();
        let parsed = Superblock::decode_with(&sb, &DecodeOptions::default()).expect("superblock");
        assert!(parsed.has_valid_magic());
        assert_eq!(
            parsed.fsid.to_string(),
            "bba692f7-5be7-4173-bc27-bb3e21644739"
        );
        assert_eq!(parsed.bytenr, 65536);
        assert_eq!(parsed.generation, 2_907_003);
        assert_eq!(parsed.root, 257_423_802_368);
        assert_eq!(parsed.chunk_root, 4_585_107_275_776);
        assert_eq!(parsed.num_devices, 2);
        assert_eq!(parsed.sector_size, 4096);
        assert_eq!(parsed.node_size, 16384);
        assert_eq!(parsed.incompat_flags, 353);
        assert_eq!(parsed.root_level, 1);
        assert_eq!(parsed.dev_item.devid, 1);
        assert_eq!(parsed.dev_item.uuid, Uuid::from_bytes([0x11; 16]));
        assert_eq!(parsed.label, "yakbtrfs");
        assert_eq!(parsed.cache_generation, 2_907_003);
        assert!(parsed.metadata_uuid.is_nil());
        assert_eq!(parsed.checksum_type(), Some(ChecksumType::Crc32c));
        assert_eq!(parsed.checksum_bytes(), &[0x03, 0x0f, 0xe6, 0x01]);
        assert!(parsed.sys_chunk_array.is_empty());
    }

    #[test]
    fn zeroed_region_with_magic_has_no_chunks() {
        let mut sb = vec![0_u8; BTRFS_SUPER_INFO_SIZE];
        sb[0x40..0x48].copy_from_slice(&BTRFS_MAGIC);
        let parsed = Superblock::decode_with(&sb, &DecodeOptions::default()).expect("superblock");
        assert_eq!(&parsed.magic, b"_BHRfS_M");
        assert_eq!(parsed.generation, 0);
        assert_eq!(parsed.sys_chunk_array_size, 0);
        assert!(parsed.label.is_empty());
        let chunks = parsed.sys_chunks(ByteOrder::Little).expect("chunks");
        assert!(chunks.is_empty());
    }

    #[test]
    fn magic_is_not_validated() {
        let sb = vec![0_u8; BTRFS_SUPER_INFO_SIZE];
        let parsed = Superblock::decode_with(&sb, &DecodeOptions::default()).expect("superblock");
        assert!(!parsed.has_valid_magic());
    }

    #[test]
    fn short_buffer_is_out_of_bounds() {
        let sb = region();
        for len in [0, 0x40, 0x100, SYS_CHUNK_ARRAY_OFFSET - 1] {
            let err = Superblock::decode_with(&sb[..len], &DecodeOptions::default()).unwrap_err();
            assert!(
                matches!(err.kind, DecodeError::OutOfBounds { .. }),
                "expected out of bounds for {len} bytes, got: {err:?}"
            );
        }
    }

    #[test]
    fn fixed_part_alone_is_enough_without_array() {
        let sb = region();
        let parsed = Superblock::decode_with(&sb[..SYS_CHUNK_ARRAY_OFFSET], &DecodeOptions::default())
            .expect("superblock");
        assert_eq!(parsed.encoded_len(), SYS_CHUNK_ARRAY_OFFSET);
    }

    #[test]
    fn truncated_dev_item_names_nested_field() {
        let sb = region();
        let err = Superblock::decode_with(&sb[..DEV_ITEM + 0x50], &DecodeOptions::default()).unwrap_err();
        assert_eq!(err.path(), "dev_item.uuid");
        assert_eq!(err.to_string().split(':').next(), Some("dev_item.uuid"));
    }

    #[test]
    fn array_longer_than_buffer_fails_on_array() {
        let mut sb = region();
        sb[0xA0..0xA4].copy_from_slice(&4000_u32.to_le_bytes());
        let err = Superblock::decode_with(&sb, &DecodeOptions::default()).unwrap_err();
        assert_eq!(err.path(), "sys_chunk_array");
        assert!(matches!(
            err.kind,
            DecodeError::OutOfBounds {
                needed: 4000,
                offset: SYS_CHUNK_ARRAY_OFFSET,
                ..
            }
        ));
    }

    #[test]
    fn sys_chunk_array_is_decoded_on_request() {
        let sb = with_system_chunk(region());
        let parsed = Superblock::decode_with(&sb, &DecodeOptions::default()).expect("superblock");
        assert_eq!(parsed.sys_chunk_array.len(), 97);
        let chunks = parsed.sys_chunks(ByteOrder::Little).expect("chunks");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].key.item_type, KeyType::CHUNK_ITEM);
        assert_eq!(chunks[0].chunk.stripes[0].offset, 0x150_0000);
    }

    #[test]
    fn array_with_partial_entry_is_truncated() {
        let mut sb = with_system_chunk(region());
        sb[0xA0..0xA4].copy_from_slice(&90_u32.to_le_bytes());
        let parsed = Superblock::decode_with(&sb, &DecodeOptions::default()).expect("superblock");
        assert_eq!(parsed.sys_chunk_array.len(), 90);
        let err = parsed.sys_chunks(ByteOrder::Little).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::TruncatedChunkEntry {
                index: 0,
                offset: 0,
                remaining: 90,
                ..
            }
        ));
    }

    #[test]
    fn reencode_matches_except_reserved() {
        let mut sb = with_system_chunk(region());
        sb[0x24B..0x24B + 8].copy_from_slice(&[0xEE; 8]);
        let parsed = Superblock::decode_with(&sb, &DecodeOptions::default()).expect("superblock");
        let encoded = parsed.to_bytes(ByteOrder::Little);
        assert_eq!(encoded.len(), SYS_CHUNK_ARRAY_OFFSET + 97);
        assert_eq!(encoded[..0x24B], sb[..0x24B]);
        assert!(encoded[0x24B..SYS_CHUNK_ARRAY_OFFSET].iter().all(|b| *b == 0));
        assert_eq!(
            encoded[SYS_CHUNK_ARRAY_OFFSET..],
            sb[SYS_CHUNK_ARRAY_OFFSET..SYS_CHUNK_ARRAY_OFFSET + 97]
        );
    }

    #[test]
    fn big_endian_decode_and_reencode() {
        let sb = region();
        let le = Superblock::decode_with(&sb, &DecodeOptions::default()).expect("superblock");
        let be_bytes = le.to_bytes(ByteOrder::Big);
        assert_eq!(be_bytes[0x48..0x50], 2_907_003_u64.to_be_bytes());
        let be = Superblock::decode_with(&be_bytes, &DecodeOptions::big_endian()).expect("superblock");
        assert_eq!(be, le);
        assert!(be.has_valid_magic());
    }

    #[test]
    fn decode_from_image_mirrors() {
        let mut image = vec![0_u8; BTRFS_SUPER_INFO_OFFSET + BTRFS_SUPER_INFO_SIZE];
        image[BTRFS_SUPER_INFO_OFFSET..].copy_from_slice(&region());
        let parsed =
            Superblock::decode_from_image(&image, SuperblockMirror::Primary, &DecodeOptions::default())
                .expect("primary");
        assert_eq!(parsed.generation, 2_907_003);

        let err = Superblock::decode_from_image(
            &image,
            SuperblockMirror::Secondary,
            &DecodeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err.kind, DecodeError::OutOfBounds { .. }));
    }

    #[test]
    fn typed_views() {
        let mut sb = region();
        sb[0x38..0x40].copy_from_slice(&((1_u64 << 32) | (1 << 2) | (1 << 50)).to_le_bytes());
        sb[0xC4..0xC6].copy_from_slice(&9_u16.to_le_bytes());
        let parsed = Superblock::decode_with(&sb, &DecodeOptions::default()).expect("superblock");
        assert_eq!(
            parsed.flags(),
            SuperblockFlags::SEEDING | SuperblockFlags::ERROR
        );
        assert_eq!(parsed.checksum_type(), None);
        assert_eq!(parsed.checksum_bytes().len(), 32);
    }

    #[test]
    fn serializes_label_as_text() {
        let parsed = Superblock::decode_with(&region(), &DecodeOptions::default()).expect("superblock");
        let json = serde_json::to_value(&parsed).expect("serialize");
        assert_eq!(json["label"], "yakbtrfs");
        assert_eq!(json["fsid"], "bba692f7-5be7-4173-bc27-bb3e21644739");
    }

    #[test]
    fn decode_with_options_matches_trait_decode() {
        let sb = with_system_chunk(region());
        let via_options =
            Superblock::decode_with(&sb, &DecodeOptions::default()).expect("superblock");
        let via_trait = <Superblock as Decode>::decode(&sb, ByteOrder::Little).expect("superblock");
        assert_eq!(via_options, via_trait);
        assert_eq!(via_trait.sys_chunk_array.len(), 97);
    }
}
