#![forbid(unsafe_code)]
//! Read-only device access for btrfs-recon.
//!
//! Provides the `ByteDevice` trait, a file-backed and an in-memory device,
//! and the superblock mirror readers built on top of them. Nothing here
//! writes to a device.

use recon_error::{ReconError, Result};
use recon_ondisk::{DecodeOptions, Superblock};
use recon_types::{BTRFS_SUPER_INFO_SIZE, SuperblockMirror};
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Byte-addressed device for fixed-offset reads (pread semantics).
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

/// Check that `needed` bytes at `offset` lie within a device of `len` bytes.
fn check_range(offset: u64, needed: usize, len: u64) -> Result<()> {
    let fits = u64::try_from(needed)
        .ok()
        .and_then(|needed| offset.checked_add(needed))
        .is_some_and(|end| end <= len);
    if fits {
        Ok(())
    } else {
        Err(ReconError::Truncated {
            offset,
            needed,
            len,
        })
    }
}

/// File-backed byte device using `pread` style I/O.
///
/// This uses `std::os::unix::fs::FileExt`, which is thread-safe and does not
/// require a shared seek position. An optional base offset makes a window
/// into a larger image, e.g. a partition inside a whole-disk dump.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    base: u64,
    len: u64,
}

impl FileByteDevice {
    /// Open `path` read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        debug!(path = %path.as_ref().display(), len, "opened image");
        Ok(Self {
            file: Arc::new(file),
            base: 0,
            len,
        })
    }

    /// Treat byte `base` of the current view as byte 0.
    pub fn with_base(self, base: u64) -> Result<Self> {
        if base > self.len {
            return Err(ReconError::Truncated {
                offset: base,
                needed: 0,
                len: self.len,
            });
        }
        Ok(Self {
            file: self.file,
            base: self.base + base,
            len: self.len - base,
        })
    }

    #[must_use]
    pub fn base(&self) -> u64 {
        self.base
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, self.base + offset)?;
        Ok(())
    }
}

/// Device backed by an owned buffer. Used for fixtures and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryByteDevice {
    bytes: Vec<u8>,
}

impl MemoryByteDevice {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0_u8; len])
    }

    /// Overwrite bytes at `offset`, growing the buffer as needed.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let Some(end) = offset.checked_add(data.len()) else {
            return Err(ReconError::Truncated {
                offset: u64::try_from(offset).unwrap_or(u64::MAX),
                needed: data.len(),
                len: self.len_bytes(),
            });
        };
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }
        self.bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl ByteDevice for MemoryByteDevice {
    fn len_bytes(&self) -> u64 {
        u64::try_from(self.bytes.len()).unwrap_or(u64::MAX)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len_bytes())?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let src = self
            .bytes
            .get(start..start.saturating_add(buf.len()))
            .ok_or(ReconError::Truncated {
                offset,
                needed: buf.len(),
                len: self.len_bytes(),
            })?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

/// Read the 4096-byte superblock region of `mirror`.
pub fn read_superblock_region(
    dev: &dyn ByteDevice,
    mirror: SuperblockMirror,
) -> Result<[u8; BTRFS_SUPER_INFO_SIZE]> {
    let mut buf = [0_u8; BTRFS_SUPER_INFO_SIZE];
    dev.read_exact_at(mirror.byte_offset(), &mut buf)?;
    Ok(buf)
}

/// Read and decode the superblock copy at `mirror`. Magic is not checked.
pub fn read_superblock(
    dev: &dyn ByteDevice,
    mirror: SuperblockMirror,
    options: &DecodeOptions,
) -> Result<Superblock> {
    let region = read_superblock_region(dev, mirror)?;
    Ok(Superblock::decode_with(&region, options)?)
}

/// Knobs for [`probe_superblocks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Mirrors to try, in order.
    pub mirrors: Vec<SuperblockMirror>,
    /// Drop copies whose magic is not `_BHRfS_M`.
    pub require_magic: bool,
    pub decode: DecodeOptions,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            mirrors: SuperblockMirror::ALL.to_vec(),
            require_magic: true,
            decode: DecodeOptions::default(),
        }
    }
}

/// A superblock copy found by [`probe_superblocks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedSuperblock {
    pub mirror: SuperblockMirror,
    pub superblock: Superblock,
}

/// Try every configured mirror and return the usable copies, newest
/// generation first. Copies with equal generation keep mirror order.
///
/// Mirrors past the end of the device are skipped silently; copies that
/// fail to decode or lack the magic are skipped with a warning. Fails with
/// [`ReconError::NotFound`] when nothing usable remains.
pub fn probe_superblocks(
    dev: &dyn ByteDevice,
    options: &ProbeOptions,
) -> Result<Vec<ProbedSuperblock>> {
    let mut found = Vec::with_capacity(options.mirrors.len());

    for &mirror in &options.mirrors {
        let region = match read_superblock_region(dev, mirror) {
            Ok(region) => region,
            Err(ReconError::Truncated { .. }) => {
                debug!(%mirror, len = dev.len_bytes(), "mirror beyond end of device");
                continue;
            }
            Err(err) => return Err(err),
        };
        let superblock = match Superblock::decode_with(&region, &options.decode) {
            Ok(sb) => sb,
            Err(err) => {
                warn!(%mirror, error = %err, "superblock copy failed to decode");
                continue;
            }
        };
        if options.require_magic && !superblock.has_valid_magic() {
            warn!(%mirror, magic = ?superblock.magic, "superblock copy has bad magic");
            continue;
        }
        debug!(
            %mirror,
            generation = superblock.generation,
            bytenr = superblock.bytenr,
            "superblock copy usable"
        );
        found.push(ProbedSuperblock { mirror, superblock });
    }

    if found.is_empty() {
        return Err(ReconError::NotFound(format!(
            "no usable superblock among {} mirror(s)",
            options.mirrors.len()
        )));
    }
    found.sort_by(|a, b| b.superblock.generation.cmp(&a.superblock.generation));
    Ok(found)
}
