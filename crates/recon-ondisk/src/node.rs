//! Tree block headers and the item tables that follow them.
//!
//! A tree block starts with a 0x65-byte `btrfs_header`. Leaves (level 0)
//! continue with `nritems` item descriptors whose payloads are addressed
//! relative to the end of the header; internal nodes continue with
//! `nritems` key pointers to child blocks.

use crate::ident::encode_uuid;
use crate::key::DiskKey;
use crate::layout::{Decode, Encode, FieldSpec, StructDecoder, layout_is_contiguous};
use recon_types::{ByteCursor, ByteOrder, ByteWriter, DecodeError, FieldError};
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

/// `btrfs_header`, 0x65 bytes.
pub const HEADER_LAYOUT: &[FieldSpec] = &[
    FieldSpec::new("csum", 0x00, 32),
    FieldSpec::new("fsid", 0x20, 16),
    FieldSpec::new("bytenr", 0x30, 8),
    FieldSpec::new("flags", 0x38, 8),
    FieldSpec::new("chunk_tree_uuid", 0x40, 16),
    FieldSpec::new("generation", 0x50, 8),
    FieldSpec::new("owner", 0x58, 8),
    FieldSpec::new("nritems", 0x60, 4),
    FieldSpec::new("level", 0x64, 1),
];

/// `btrfs_item`: leaf item descriptor.
pub const ITEM_LAYOUT: &[FieldSpec] = &[
    FieldSpec::new("key", 0x00, 17),
    FieldSpec::new("offset", 0x11, 4),
    FieldSpec::new("size", 0x15, 4),
];

/// `btrfs_key_ptr`: internal node child pointer.
pub const KEY_PTR_LAYOUT: &[FieldSpec] = &[
    FieldSpec::new("key", 0x00, 17),
    FieldSpec::new("blockptr", 0x11, 8),
    FieldSpec::new("generation", 0x19, 8),
];

const _: () = assert!(layout_is_contiguous(HEADER_LAYOUT));
const _: () = assert!(layout_is_contiguous(ITEM_LAYOUT));
const _: () = assert!(layout_is_contiguous(KEY_PTR_LAYOUT));

/// Common header of every tree block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub csum: [u8; 32],
    pub fsid: Uuid,
    /// Logical address this block claims to live at.
    pub bytenr: u64,
    pub flags: u64,
    pub chunk_tree_uuid: Uuid,
    pub generation: u64,
    /// Objectid of the tree this block belongs to.
    pub owner: u64,
    pub nritems: u32,
    /// 0 for leaves.
    pub level: u8,
}

impl Header {
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }
}

impl Decode for Header {
    const NAME: &'static str = "header";
    const LAYOUT: &'static [FieldSpec] = HEADER_LAYOUT;

    fn decode_from(cursor: &mut ByteCursor<'_>) -> Result<Self, FieldError> {
        let mut d = StructDecoder::new(Self::LAYOUT, cursor);
        let header = Self {
            csum: d.bytes::<32>("csum")?,
            fsid: d.uuid("fsid")?,
            bytenr: d.u64("bytenr")?,
            flags: d.u64("flags")?,
            chunk_tree_uuid: d.uuid("chunk_tree_uuid")?,
            generation: d.u64("generation")?,
            owner: d.u64("owner")?,
            nritems: d.u32("nritems")?,
            level: d.u8("level")?,
        };
        d.finish()?;
        Ok(header)
    }
}

impl Encode for Header {
    fn encode_into(&self, out: &mut ByteWriter) {
        out.put_bytes(&self.csum);
        encode_uuid(out, &self.fsid);
        out.put_u64(self.bytenr);
        out.put_u64(self.flags);
        encode_uuid(out, &self.chunk_tree_uuid);
        out.put_u64(self.generation);
        out.put_u64(self.owner);
        out.put_u32(self.nritems);
        out.put_u8(self.level);
    }
}

/// Leaf item descriptor. The payload lives at `Header::SIZE + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub key: DiskKey,
    pub offset: u32,
    pub size: u32,
}

impl Item {
    /// Byte range of the payload within the whole block, `None` on overflow.
    #[must_use]
    pub fn data_range(&self) -> Option<std::ops::Range<usize>> {
        let start = Header::SIZE.checked_add(usize::try_from(self.offset).ok()?)?;
        let end = start.checked_add(usize::try_from(self.size).ok()?)?;
        Some(start..end)
    }

    /// The payload bytes, `None` if they do not lie inside `block`.
    #[must_use]
    pub fn data<'a>(&self, block: &'a [u8]) -> Option<&'a [u8]> {
        block.get(self.data_range()?)
    }
}

impl Decode for Item {
    const NAME: &'static str = "item";
    const LAYOUT: &'static [FieldSpec] = ITEM_LAYOUT;

    fn decode_from(cursor: &mut ByteCursor<'_>) -> Result<Self, FieldError> {
        let mut d = StructDecoder::new(Self::LAYOUT, cursor);
        let item = Self {
            key: d.nested("key", DiskKey::decode_from)?,
            offset: d.u32("offset")?,
            size: d.u32("size")?,
        };
        d.finish()?;
        Ok(item)
    }
}

impl Encode for Item {
    fn encode_into(&self, out: &mut ByteWriter) {
        self.key.encode_into(out);
        out.put_u32(self.offset);
        out.put_u32(self.size);
    }
}

/// Internal node entry: the lowest key under `blockptr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPtr {
    pub key: DiskKey,
    pub blockptr: u64,
    pub generation: u64,
}

impl Decode for KeyPtr {
    const NAME: &'static str = "key_ptr";
    const LAYOUT: &'static [FieldSpec] = KEY_PTR_LAYOUT;

    fn decode_from(cursor: &mut ByteCursor<'_>) -> Result<Self, FieldError> {
        let mut d = StructDecoder::new(Self::LAYOUT, cursor);
        let ptr = Self {
            key: d.nested("key", DiskKey::decode_from)?,
            blockptr: d.u64("blockptr")?,
            generation: d.u64("generation")?,
        };
        d.finish()?;
        Ok(ptr)
    }
}

impl Encode for KeyPtr {
    fn encode_into(&self, out: &mut ByteWriter) {
        self.key.encode_into(out);
        out.put_u64(self.blockptr);
        out.put_u64(self.generation);
    }
}

/// The table after the header, shaped by `level`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeItems {
    Leaf(Vec<Item>),
    Internal(Vec<KeyPtr>),
}

impl NodeItems {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Leaf(items) => items.len(),
            Self::Internal(ptrs) => ptrs.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A decoded tree block: header plus its item table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub header: Header,
    pub items: NodeItems,
}

/// Decode a tree block's header and item table.
///
/// Never reads past `block`. An `nritems` that does not fit fails at the
/// first entry that runs out, with the path under `items` (leaves) or
/// `key_ptrs` (internal nodes). Every leaf payload must also lie inside the
/// block; one that does not fails as `items.offset`. Checksums, `bytenr`
/// and key order are not judged.
pub fn decode_node(block: &[u8], order: ByteOrder) -> Result<Node, FieldError> {
    let mut cursor = ByteCursor::new(block, order);
    let header = Header::decode_from(&mut cursor)?;
    let count = usize::try_from(header.nritems).unwrap_or(usize::MAX);

    let items = if header.is_leaf() {
        let fits = cursor.remaining() / Item::SIZE;
        let mut items = Vec::with_capacity(count.min(fits));
        for _ in 0..count {
            let item = Item::decode_from(&mut cursor).map_err(|err| err.within("items"))?;
            check_payload(&item, block.len())?;
            items.push(item);
        }
        NodeItems::Leaf(items)
    } else {
        let fits = cursor.remaining() / KeyPtr::SIZE;
        let mut ptrs = Vec::with_capacity(count.min(fits));
        for _ in 0..count {
            ptrs.push(KeyPtr::decode_from(&mut cursor).map_err(|err| err.within("key_ptrs"))?);
        }
        NodeItems::Internal(ptrs)
    };

    trace!(
        target: "recon::node",
        bytenr = header.bytenr,
        level = header.level,
        owner = header.owner,
        nritems = header.nritems,
        "tree_block"
    );
    Ok(Node { header, items })
}

fn check_payload(item: &Item, block_len: usize) -> Result<(), FieldError> {
    let start = Header::SIZE.saturating_add(usize::try_from(item.offset).unwrap_or(usize::MAX));
    let needed = usize::try_from(item.size).unwrap_or(usize::MAX);
    match item.data_range() {
        Some(range) if range.end <= block_len => Ok(()),
        _ => Err(FieldError::new(
            "offset",
            DecodeError::OutOfBounds {
                needed,
                offset: start,
                remaining: block_len.saturating_sub(start),
            },
        )
        .within("items")),
    }
}
