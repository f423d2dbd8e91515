#![forbid(unsafe_code)]
//! Error types for btrfs-recon.
//!
//! # Error Taxonomy
//!
//! btrfs-recon uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Decoding | `DecodeError`, `FieldError` | `recon-types` | Structural violations found while unpacking bytes |
//! | Device | `ReconError` | `recon-error` (this crate) | Errors surfaced by device access, probing and the CLI |
//!
//! ## Mapping Policy: decode errors → ReconError
//!
//! | Source | ReconError Variant | Rationale |
//! |--------|--------------------|-----------|
//! | `FieldError` from a superblock decode | `Decode` | Keeps the failing field path (`dev_item.uuid`) |
//! | `DecodeError` from the system chunk array | `ChunkArray` | Array errors carry an entry index, not a field path |
//! | Read past the end of a device | `Truncated` | The image is shorter than the mirror it was asked for |
//! | Wrong magic with `require_magic` set | `Format` | Not a btrfs superblock; not corruption |
//!
//! The decoders themselves never see `ReconError`. They return the
//! structural errors and the boundary converts them.
//!
//! ## Exit Codes
//!
//! Every variant maps to exactly one `sysexits.h` code via
//! [`ReconError::exit_code`]. The mapping is exhaustive (no wildcard arms).
//!
//! | Variant | Code | Constant |
//! |---------|------|----------|
//! | `Io` | 74 | `EX_IOERR` |
//! | `Truncated` | 65 | `EX_DATAERR` |
//! | `Decode` | 65 | `EX_DATAERR` |
//! | `ChunkArray` | 65 | `EX_DATAERR` |
//! | `Format` | 65 | `EX_DATAERR` |
//! | `NotFound` | 66 | `EX_NOINPUT` |

use recon_types::{DecodeError, FieldError};
use thiserror::Error;

pub const EX_DATAERR: i32 = 65;
pub const EX_NOINPUT: i32 = 66;
pub const EX_IOERR: i32 = 74;

/// Unified error type for device-facing btrfs-recon operations.
#[derive(Debug, Error)]
pub enum ReconError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A read would run past the end of the device.
    #[error("device too short: need {needed} bytes at offset {offset:#x}, device is {len} bytes")]
    Truncated { offset: u64, needed: usize, len: u64 },

    /// A superblock field failed to decode.
    #[error("superblock decode failed at {0}")]
    Decode(#[from] FieldError),

    /// The system chunk array failed to decode.
    #[error("system chunk array: {0}")]
    ChunkArray(#[from] DecodeError),

    /// Bytes decoded fine but are not a btrfs superblock.
    #[error("invalid on-disk format: {0}")]
    Format(String),

    /// No usable superblock or requested object was found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl ReconError {
    /// Process exit status for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io(_) => EX_IOERR,
            Self::Truncated { .. } | Self::Decode(_) | Self::ChunkArray(_) | Self::Format(_) => {
                EX_DATAERR
            }
            Self::NotFound(_) => EX_NOINPUT,
        }
    }
}

/// Result alias using `ReconError`.
pub type Result<T> = std::result::Result<T, ReconError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_mapping_covers_all_variants() {
        let cases: Vec<(ReconError, i32)> = vec![
            (ReconError::Io(std::io::Error::other("test")), EX_IOERR),
            (
                ReconError::Truncated {
                    offset: 0x400_0000,
                    needed: 4096,
                    len: 8192,
                },
                EX_DATAERR,
            ),
            (
                ReconError::Decode(FieldError::new(
                    "csum",
                    DecodeError::OutOfBounds {
                        needed: 32,
                        offset: 0,
                        remaining: 0,
                    },
                )),
                EX_DATAERR,
            ),
            (
                ReconError::ChunkArray(DecodeError::TruncatedChunkEntry {
                    index: 0,
                    offset: 0,
                    needed: 17,
                    remaining: 3,
                }),
                EX_DATAERR,
            ),
            (ReconError::Format("bad magic".into()), EX_DATAERR),
            (ReconError::NotFound("superblock".into()), EX_NOINPUT),
        ];

        for (error, expected) in &cases {
            assert_eq!(error.exit_code(), *expected, "wrong exit code for {error:?}");
        }
    }

    #[test]
    fn display_formatting() {
        let err = ReconError::Truncated {
            offset: 0x1_0000,
            needed: 4096,
            len: 100,
        };
        assert_eq!(
            err.to_string(),
            "device too short: need 4096 bytes at offset 0x10000, device is 100 bytes"
        );

        let decode: ReconError = FieldError::new(
            "uuid",
            DecodeError::OutOfBounds {
                needed: 16,
                offset: 0x10B,
                remaining: 4,
            },
        )
        .within("dev_item")
        .into();
        assert!(decode.to_string().starts_with("superblock decode failed at dev_item.uuid:"));

        let missing = ReconError::NotFound("no valid superblock mirror".into());
        assert_eq!(missing.to_string(), "not found: no valid superblock mirror");
    }
}
