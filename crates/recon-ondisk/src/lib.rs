#![forbid(unsafe_code)]
//! Structural decoders for btrfs on-disk metadata.
//!
//! Pure decoding crate: no I/O, no side effects. Byte slices go in, typed
//! records come out. Each record declares a `'static` field table
//! ([`layout::FieldSpec`]) and decodes through a [`layout::StructDecoder`],
//! so every failure names the field it happened in (`dev_item.uuid`).
//!
//! Decoding never judges meaning. A superblock with the wrong magic, an
//! unknown checksum type, or a zero-stripe chunk decodes fine; the typed
//! views ([`SuperblockFlags`], [`BlockGroupFlags`], [`ChecksumType`],
//! [`KeyType`]) are for callers that want to judge.

pub mod chunk;
pub mod dev_item;
pub mod ident;
pub mod key;
pub mod layout;
pub mod node;
pub mod superblock;

pub use chunk::{
    BlockGroupFlags, ChunkItem, PhysicalMapping, Stripe, SysChunk, decode_sys_chunk_array,
    map_logical,
};
pub use dev_item::DevItem;
pub use ident::{FixedString, decode_uuid, encode_uuid};
pub use key::{DiskKey, FIRST_CHUNK_TREE_OBJECTID, KeyType};
pub use layout::{Decode, Encode, FieldSpec, StructDecoder};
pub use node::{Header, Item, KeyPtr, Node, NodeItems, decode_node};
pub use superblock::{
    ChecksumType, DecodeOptions, SYS_CHUNK_ARRAY_OFFSET, Superblock, SuperblockFlags,
};
