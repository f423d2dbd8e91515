#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use recon_block::{ByteDevice, read_superblock_region};
use recon_ondisk::{DecodeOptions, Superblock, SysChunk, map_logical};
use recon_types::{ByteOrder, SuperblockMirror};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Zero runs longer than this split a fixture into separate writes.
pub const SPARSE_GAP: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseFixture {
    pub size: usize,
    pub writes: Vec<FixtureWrite>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureWrite {
    pub offset: usize,
    pub hex: String,
}

impl SparseFixture {
    /// Encode `bytes` as runs of non-zero data.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut writes = Vec::new();
        let mut index = 0_usize;
        while index < bytes.len() {
            if bytes[index] == 0 {
                index += 1;
                continue;
            }
            let start = index;
            let mut last = index;
            while index < bytes.len() {
                if bytes[index] != 0 {
                    last = index;
                } else if index - last > SPARSE_GAP {
                    break;
                }
                index += 1;
            }
            writes.push(FixtureWrite {
                offset: start,
                hex: hex::encode(&bytes[start..=last]),
            });
            index = last + 1;
        }

        Self {
            size: bytes.len(),
            writes,
        }
    }

    /// Expand the fixture back into a zero-filled buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![0_u8; self.size];
        for write in &self.writes {
            let payload = hex::decode(&write.hex)
                .with_context(|| format!("invalid hex at offset {}", write.offset))?;

            let end = write
                .offset
                .checked_add(payload.len())
                .context("fixture offset overflow")?;
            if end > bytes.len() {
                bail!(
                    "fixture write out of bounds: offset={} payload={} size={}",
                    write.offset,
                    payload.len(),
                    bytes.len()
                );
            }

            bytes[write.offset..end].copy_from_slice(&payload);
        }
        Ok(bytes)
    }
}

pub fn load_sparse_fixture(path: &Path) -> Result<Vec<u8>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    let fixture: SparseFixture = serde_json::from_str(&text)
        .with_context(|| format!("invalid fixture json {}", path.display()))?;
    fixture.to_bytes()
}

/// Decode a superblock fixture and require the btrfs magic.
pub fn validate_superblock_fixture(path: &Path) -> Result<Superblock> {
    let data = load_sparse_fixture(path)?;
    let sb = Superblock::decode_with(&data, &DecodeOptions::default())
        .with_context(|| format!("failed superblock decode for fixture {}", path.display()))?;
    if !sb.has_valid_magic() {
        bail!("fixture {} has no btrfs magic", path.display());
    }
    Ok(sb)
}

/// Validate a superblock fixture that carries a system chunk array, decode
/// the array, and check that the chunk root maps through it.
pub fn validate_chunk_fixture(path: &Path) -> Result<(Superblock, Vec<SysChunk>)> {
    let sb = validate_superblock_fixture(path)?;
    let chunks = sb
        .sys_chunks(ByteOrder::Little)
        .with_context(|| format!("failed chunk decode for fixture {}", path.display()))?;
    if sb.chunk_root != 0 && map_logical(&chunks, sb.chunk_root).is_none() {
        bail!(
            "chunk_root {:#x} is not covered by the system chunks of fixture {}",
            sb.chunk_root,
            path.display()
        );
    }
    Ok((sb, chunks))
}

/// Extract the superblock region of `mirror` as a fixture. The region must
/// decode and carry the btrfs magic.
pub fn extract_superblock_fixture(
    dev: &dyn ByteDevice,
    mirror: SuperblockMirror,
) -> Result<SparseFixture> {
    let region = read_superblock_region(dev, mirror).with_context(|| format!("reading {mirror}"))?;
    let sb = Superblock::decode_with(&region, &DecodeOptions::default())
        .with_context(|| format!("decoding {mirror}"))?;
    if !sb.has_valid_magic() {
        bail!("{mirror} is not a btrfs superblock");
    }
    Ok(SparseFixture::from_bytes(&region))
}

/// Extract an arbitrary byte range as a fixture.
pub fn extract_region(dev: &dyn ByteDevice, offset: u64, len: usize) -> Result<SparseFixture> {
    let mut buf = vec![0_u8; len];
    dev.read_exact_at(offset, &mut buf)
        .with_context(|| format!("reading {len} bytes at {offset:#x}"))?;
    Ok(SparseFixture::from_bytes(&buf))
}
