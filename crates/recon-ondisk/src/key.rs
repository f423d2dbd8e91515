use crate::layout::{Decode, Encode, FieldSpec, StructDecoder};
use recon_types::{ByteCursor, ByteWriter, FieldError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Object id of the chunk tree's items (`BTRFS_FIRST_CHUNK_TREE_OBJECTID`).
pub const FIRST_CHUNK_TREE_OBJECTID: u64 = 256;

pub const DISK_KEY_LAYOUT: &[FieldSpec] = &[
    FieldSpec::new("objectid", 0x00, 8),
    FieldSpec::new("item_type", 0x08, 1),
    FieldSpec::new("offset", 0x09, 8),
];

/// Item type byte of a btrfs key.
///
/// Only a newtype: unknown values are kept verbatim, since the decoder does
/// not judge what a key means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyType(pub u8);

impl KeyType {
    pub const INODE_ITEM: Self = Self(1);
    pub const INODE_REF: Self = Self(12);
    pub const DIR_ITEM: Self = Self(84);
    pub const DIR_INDEX: Self = Self(96);
    pub const EXTENT_DATA: Self = Self(108);
    pub const ROOT_ITEM: Self = Self(132);
    pub const EXTENT_ITEM: Self = Self(168);
    pub const METADATA_ITEM: Self = Self(169);
    pub const BLOCK_GROUP_ITEM: Self = Self(192);
    pub const DEV_EXTENT: Self = Self(204);
    pub const DEV_ITEM: Self = Self(216);
    pub const CHUNK_ITEM: Self = Self(228);

    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::INODE_ITEM => "INODE_ITEM",
            Self::INODE_REF => "INODE_REF",
            Self::DIR_ITEM => "DIR_ITEM",
            Self::DIR_INDEX => "DIR_INDEX",
            Self::EXTENT_DATA => "EXTENT_DATA",
            Self::ROOT_ITEM => "ROOT_ITEM",
            Self::EXTENT_ITEM => "EXTENT_ITEM",
            Self::METADATA_ITEM => "METADATA_ITEM",
            Self::BLOCK_GROUP_ITEM => "BLOCK_GROUP_ITEM",
            Self::DEV_EXTENT => "DEV_EXTENT",
            Self::DEV_ITEM => "DEV_ITEM",
            Self::CHUNK_ITEM => "CHUNK_ITEM",
            _ => return None,
        })
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "UNKNOWN({})", self.0),
        }
    }
}

/// `btrfs_disk_key`: (objectid, type, offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DiskKey {
    pub objectid: u64,
    pub item_type: KeyType,
    pub offset: u64,
}

impl Decode for DiskKey {
    const NAME: &'static str = "disk_key";
    const LAYOUT: &'static [FieldSpec] = DISK_KEY_LAYOUT;

    fn decode_from(cursor: &mut ByteCursor<'_>) -> Result<Self, FieldError> {
        let mut d = StructDecoder::new(Self::LAYOUT, cursor);
        let key = Self {
            objectid: d.u64("objectid")?,
            item_type: KeyType(d.u8("item_type")?),
            offset: d.u64("offset")?,
        };
        d.finish()?;
        Ok(key)
    }
}

impl Encode for DiskKey {
    fn encode_into(&self, out: &mut ByteWriter) {
        out.put_u64(self.objectid);
        out.put_u8(self.item_type.0);
        out.put_u64(self.offset);
    }
}

impl fmt::Display for DiskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {} {})", self.objectid, self.item_type, self.offset)
    }
}

const _: () = assert!(crate::layout::layout_is_contiguous(DISK_KEY_LAYOUT));
