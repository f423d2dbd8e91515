#![forbid(unsafe_code)]
//! Shared vocabulary for btrfs-recon: on-disk constants, the byte cursor
//! every decoder draws from, the matching writer used for re-encoding, and
//! the structural decode errors.
//!
//! Nothing here interprets filesystem semantics. A [`ByteCursor`] only knows
//! how many bytes remain and which byte order to apply.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const BTRFS_SUPER_INFO_OFFSET: usize = 64 * 1024;
pub const BTRFS_SUPER_INFO_SIZE: usize = 4096;
/// `_BHRfS_M` as it appears on disk.
pub const BTRFS_MAGIC: [u8; 8] = *b"_BHRfS_M";
/// The magic read as a little-endian u64.
pub const BTRFS_MAGIC_U64: u64 = 0x4D5F_5366_5248_425F;

pub const BTRFS_CSUM_SIZE: usize = 32;
pub const BTRFS_UUID_SIZE: usize = 16;
pub const BTRFS_FSID_SIZE: usize = 16;
pub const BTRFS_LABEL_SIZE: usize = 256;
/// Upper bound the kernel places on `sys_chunk_array_size`.
pub const BTRFS_SYSTEM_CHUNK_ARRAY_SIZE: usize = 2048;

/// btrfs checksum algorithm types (stored in superblock `csum_type` field).
pub const BTRFS_CSUM_TYPE_CRC32C: u16 = 0;
pub const BTRFS_CSUM_TYPE_XXHASH64: u16 = 1;
pub const BTRFS_CSUM_TYPE_SHA256: u16 = 2;
pub const BTRFS_CSUM_TYPE_BLAKE2B: u16 = 3;

// ── Superblock mirrors ──────────────────────────────────────────────────────

/// One of the fixed locations a btrfs superblock copy may live at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuperblockMirror {
    /// 64 KiB.
    Primary,
    /// 64 MiB.
    Secondary,
    /// 256 GiB.
    Tertiary,
}

impl SuperblockMirror {
    pub const ALL: [Self; 3] = [Self::Primary, Self::Secondary, Self::Tertiary];

    /// Byte offset of this copy on the device.
    #[must_use]
    pub fn byte_offset(self) -> u64 {
        match self {
            Self::Primary => 0x1_0000,
            Self::Secondary => 0x400_0000,
            Self::Tertiary => 0x40_0000_0000,
        }
    }

    /// Mirror index as used by `btrfs inspect-internal dump-super -s`.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Secondary => 1,
            Self::Tertiary => 2,
        }
    }

    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for SuperblockMirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mirror {} @ {:#x}", self.index(), self.byte_offset())
    }
}

// ── Byte order ──────────────────────────────────────────────────────────────

/// Byte order applied by a cursor to every multi-byte integer it decodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// btrfs stores everything little-endian.
    #[default]
    Little,
    Big,
}

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("out of bounds: need {needed} bytes at offset {offset}, {remaining} remaining")]
    OutOfBounds {
        needed: usize,
        offset: usize,
        remaining: usize,
    },
    #[error("malformed identifier at offset {offset}")]
    MalformedIdentifier { offset: usize },
    #[error(
        "truncated chunk entry #{index} at offset {offset}: need {needed} bytes, {remaining} remaining"
    )]
    TruncatedChunkEntry {
        index: usize,
        offset: usize,
        needed: usize,
        remaining: usize,
    },
    /// The decoder and its field table disagree. Always a programming error.
    #[error("layout mismatch at `{field}`: {reason} (declared {expected:#x}, actual {actual:#x})")]
    LayoutMismatch {
        field: &'static str,
        reason: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// A [`DecodeError`] attributed to the field it happened in.
///
/// `path` runs outermost-first, so a bad device UUID inside the superblock
/// reads `dev_item.uuid`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{}: {kind}", .path.join("."))]
pub struct FieldError {
    pub path: Vec<&'static str>,
    pub kind: DecodeError,
}

impl FieldError {
    #[must_use]
    pub fn new(field: &'static str, kind: DecodeError) -> Self {
        Self {
            path: vec![field],
            kind,
        }
    }

    /// Prefix the path with the enclosing field name.
    #[must_use]
    pub fn within(mut self, parent: &'static str) -> Self {
        self.path.insert(0, parent);
        self
    }

    /// Dotted field path, e.g. `dev_item.uuid`.
    #[must_use]
    pub fn path(&self) -> String {
        self.path.join(".")
    }

    /// Innermost field name.
    #[must_use]
    pub fn field(&self) -> &'static str {
        self.path.last().copied().unwrap_or("")
    }
}

// ── Cursor ──────────────────────────────────────────────────────────────────

/// Forward-only view over a borrowed buffer.
///
/// Reads either return exactly the requested width and advance, or fail with
/// [`DecodeError::OutOfBounds`] and leave the position untouched. The cursor
/// is `Copy`, so a decoder can work on a copy and only commit on success.
#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

impl<'a> ByteCursor<'a> {
    #[must_use]
    pub fn new(data: &'a [u8], order: ByteOrder) -> Self {
        Self {
            data,
            pos: 0,
            order,
        }
    }

    #[must_use]
    pub fn little_endian(data: &'a [u8]) -> Self {
        Self::new(data, ByteOrder::Little)
    }

    /// Start at `offset` within `data`.
    pub fn at(data: &'a [u8], offset: usize, order: ByteOrder) -> Result<Self, DecodeError> {
        if offset > data.len() {
            return Err(DecodeError::OutOfBounds {
                needed: offset,
                offset: 0,
                remaining: data.len(),
            });
        }
        Ok(Self {
            data,
            pos: offset,
            order,
        })
    }

    #[must_use]
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Return the next `n` bytes and move past them.
    pub fn advance(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let Some(end) = self.pos.checked_add(n).filter(|end| *end <= self.data.len()) else {
            return Err(DecodeError::OutOfBounds {
                needed: n,
                offset: self.pos,
                remaining: self.remaining(),
            });
        };
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Consume `n` bytes without looking at them.
    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.advance(n).map(|_| ())
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let bytes = self.advance(N)?;
        let mut out = [0_u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let [byte] = self.read_array::<1>()?;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_array::<2>()?;
        Ok(match self.order {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        })
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_array::<4>()?;
        Ok(match self.order {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        })
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.read_array::<8>()?;
        Ok(match self.order {
            ByteOrder::Little => u64::from_le_bytes(bytes),
            ByteOrder::Big => u64::from_be_bytes(bytes),
        })
    }
}

// ── Writer ──────────────────────────────────────────────────────────────────

/// Append-only counterpart of [`ByteCursor`], used to re-encode records.
#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
    order: ByteOrder,
}

impl ByteWriter {
    #[must_use]
    pub fn new(order: ByteOrder) -> Self {
        Self {
            buf: Vec::new(),
            order,
        }
    }

    #[must_use]
    pub fn with_capacity(order: ByteOrder, capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            order,
        }
    }

    #[must_use]
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_zeros(&mut self, n: usize) {
        self.buf.resize(self.buf.len() + n, 0);
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        match self.order {
            ByteOrder::Little => self.put_bytes(&value.to_le_bytes()),
            ByteOrder::Big => self.put_bytes(&value.to_be_bytes()),
        }
    }

    pub fn put_u32(&mut self, value: u32) {
        match self.order {
            ByteOrder::Little => self.put_bytes(&value.to_le_bytes()),
            ByteOrder::Big => self.put_bytes(&value.to_be_bytes()),
        }
    }

    pub fn put_u64(&mut self, value: u64) {
        match self.order {
            ByteOrder::Little => self.put_bytes(&value.to_le_bytes()),
            ByteOrder::Big => self.put_bytes(&value.to_be_bytes()),
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cursor_reads_little_endian() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C];
        let mut cur = ByteCursor::little_endian(&data);
        assert_eq!(cur.read_u8().expect("u8"), 0x01);
        assert_eq!(cur.read_u16().expect("u16"), 0x0302);
        assert_eq!(cur.read_u8().expect("u8"), 0x04);
        assert_eq!(cur.read_u64().expect("u64"), 0x0C0B_0A09_0807_0605);
        assert!(cur.is_empty());
    }

    #[test]
    fn cursor_reads_big_endian() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC];
        let mut cur = ByteCursor::new(&data, ByteOrder::Big);
        assert_eq!(cur.read_u32().expect("u32"), 0x1234_5678);
        assert_eq!(cur.read_u16().expect("u16"), 0x9ABC);
    }

    #[test]
    fn short_read_fails_without_moving() {
        let data = [0_u8; 5];
        let mut cur = ByteCursor::little_endian(&data);
        cur.skip(2).expect("skip");
        let err = cur.read_u32().unwrap_err();
        assert_eq!(
            err,
            DecodeError::OutOfBounds {
                needed: 4,
                offset: 2,
                remaining: 3,
            }
        );
        assert_eq!(cur.position(), 2);
        assert_eq!(cur.remaining(), 3);
    }

    #[test]
    fn advance_does_not_overflow_on_huge_lengths() {
        let data = [0_u8; 4];
        let mut cur = ByteCursor::little_endian(&data);
        cur.skip(1).expect("skip");
        assert!(matches!(
            cur.advance(usize::MAX),
            Err(DecodeError::OutOfBounds { offset: 1, .. })
        ));
    }

    #[test]
    fn cursor_at_rejects_offset_past_end() {
        let data = [0_u8; 8];
        assert!(ByteCursor::at(&data, 8, ByteOrder::Little).is_ok());
        assert!(ByteCursor::at(&data, 9, ByteOrder::Little).is_err());
    }

    #[test]
    fn writer_mirrors_cursor_byte_order() {
        let mut w = ByteWriter::new(ByteOrder::Big);
        w.put_u16(0xBEEF);
        w.put_u32(7);
        w.put_zeros(2);
        assert_eq!(w.as_slice(), &[0xBE, 0xEF, 0, 0, 0, 7, 0, 0]);
    }

    #[test]
    fn field_error_path_nests_outermost_first() {
        let err = FieldError::new("uuid", DecodeError::MalformedIdentifier { offset: 0xE7 })
            .within("dev_item");
        assert_eq!(err.path(), "dev_item.uuid");
        assert_eq!(err.field(), "uuid");
        assert_eq!(
            err.to_string(),
            "dev_item.uuid: malformed identifier at offset 231"
        );
    }

    #[test]
    fn mirror_offsets_match_on_disk_format() {
        assert_eq!(
            SuperblockMirror::Primary.byte_offset(),
            BTRFS_SUPER_INFO_OFFSET as u64
        );
        assert_eq!(SuperblockMirror::Secondary.byte_offset(), 64 << 20);
        assert_eq!(SuperblockMirror::Tertiary.byte_offset(), 256 << 30);
        assert_eq!(SuperblockMirror::from_index(2), Some(SuperblockMirror::Tertiary));
        assert_eq!(SuperblockMirror::from_index(3), None);
    }

    #[test]
    fn magic_constants_agree() {
        assert_eq!(u64::from_le_bytes(BTRFS_MAGIC), BTRFS_MAGIC_U64);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn u64_write_then_read_is_identity(value in any::<u64>(), big in any::<bool>()) {
            let order = if big { ByteOrder::Big } else { ByteOrder::Little };
            let mut w = ByteWriter::new(order);
            w.put_u64(value);
            let bytes = w.into_inner();
            let mut cur = ByteCursor::new(&bytes, order);
            prop_assert_eq!(cur.read_u64().expect("u64"), value);
            prop_assert!(cur.is_empty());
        }

        #[test]
        fn cursor_never_passes_end(len in 0_usize..64, reads in proptest::collection::vec(0_usize..16, 0..16)) {
            let data = vec![0xA5_u8; len];
            let mut cur = ByteCursor::little_endian(&data);
            for n in reads {
                let before = cur.position();
                match cur.advance(n) {
                    Ok(bytes) => prop_assert_eq!(bytes.len(), n),
                    Err(_) => prop_assert_eq!(cur.position(), before),
                }
                prop_assert!(cur.position() <= len);
            }
        }
    }
}
