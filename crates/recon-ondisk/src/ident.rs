//! 128-bit identifiers and fixed-width text fields.

use recon_types::{BTRFS_UUID_SIZE, ByteCursor, ByteWriter, DecodeError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use uuid::Uuid;

/// Read 16 raw bytes as a UUID.
///
/// The bytes are taken as an opaque blob in on-disk order; byte order of the
/// cursor does not apply. The cursor only advances on success.
pub fn decode_uuid(cursor: &mut ByteCursor<'_>) -> Result<Uuid, DecodeError> {
    let offset = cursor.position();
    let mut probe = *cursor;
    let bytes = probe.advance(BTRFS_UUID_SIZE)?;
    let id = Uuid::from_slice(bytes).map_err(|_| DecodeError::MalformedIdentifier { offset })?;
    *cursor = probe;
    Ok(id)
}

pub fn encode_uuid(out: &mut ByteWriter, id: &Uuid) {
    out.put_bytes(id.as_bytes());
}

/// A NUL-terminated text field occupying exactly `N` bytes on disk.
///
/// The decoded text is everything before the first zero byte, or all `N`
/// bytes when there is none. The raw bytes are kept, so re-encoding is exact
/// even when garbage follows the terminator.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedString<const N: usize> {
    raw: [u8; N],
}

impl<const N: usize> FixedString<N> {
    pub fn decode(cursor: &mut ByteCursor<'_>) -> Result<Self, DecodeError> {
        cursor.read_array::<N>().map(Self::from_raw)
    }

    #[must_use]
    pub fn from_raw(raw: [u8; N]) -> Self {
        Self { raw }
    }

    /// Zero-padded field holding `text`. `None` if `text` is longer than `N`
    /// bytes or contains a NUL.
    #[must_use]
    pub fn from_text(text: &str) -> Option<Self> {
        let bytes = text.as_bytes();
        if bytes.len() > N || bytes.contains(&0) {
            return None;
        }
        let mut raw = [0_u8; N];
        raw[..bytes.len()].copy_from_slice(bytes);
        Some(Self { raw })
    }

    #[must_use]
    pub fn raw(&self) -> &[u8; N] {
        &self.raw
    }

    /// Bytes before the terminator.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        let end = self.raw.iter().position(|b| *b == 0).unwrap_or(N);
        &self.raw[..end]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.first().is_none_or(|b| *b == 0)
    }

    #[must_use]
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    pub fn encode_into(&self, out: &mut ByteWriter) {
        out.put_bytes(&self.raw);
    }
}

impl<const N: usize> fmt::Display for FixedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl<const N: usize> fmt::Debug for FixedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedString<{N}>({:?})", self.to_string_lossy())
    }
}

impl<const N: usize> PartialEq<str> for FixedString<N> {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl<const N: usize> PartialEq<&str> for FixedString<N> {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl<const N: usize> Serialize for FixedString<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string_lossy())
    }
}

impl<'de, const N: usize> Deserialize<'de> for FixedString<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_text(&text).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "label `{text}` does not fit a {N}-byte NUL-padded field"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use recon_types::ByteOrder;

    #[test]
    fn uuid_reads_sixteen_bytes_in_disk_order() {
        let mut data = [0_u8; 20];
        data[..16].copy_from_slice(&[
            0xbb, 0xa6, 0x92, 0xf7, 0x5b, 0xe7, 0x41, 0x73, 0xbc, 0x27, 0xbb, 0x3e, 0x21, 0x64,
            0x47, 0x39,
        ]);
        let mut cur = ByteCursor::new(&data, ByteOrder::Big);
        let id = decode_uuid(&mut cur).expect("uuid");
        assert_eq!(id.to_string(), "bba692f7-5be7-4173-bc27-bb3e21644739");
        assert_eq!(cur.position(), 16);
    }

    #[test]
    fn uuid_short_buffer_is_out_of_bounds() {
        let data = [0_u8; 15];
        let mut cur = ByteCursor::little_endian(&data);
        let err = decode_uuid(&mut cur).unwrap_err();
        assert_eq!(
            err,
            DecodeError::OutOfBounds {
                needed: 16,
                offset: 0,
                remaining: 15,
            }
        );
        assert_eq!(cur.position(), 0);
    }

    #[test]
    fn label_stops_at_first_nul() {
        let mut raw = [0_u8; 16];
        raw[..4].copy_from_slice(b"data");
        raw[5..8].copy_from_slice(b"xyz");
        let label = FixedString::from_raw(raw);
        assert_eq!(label, "data");
        assert_eq!(label.len(), 4);
        assert_eq!(label.raw(), &raw);
    }

    #[test]
    fn label_without_nul_uses_full_width() {
        let label = FixedString::<4>::from_raw(*b"abcd");
        assert_eq!(label.len(), 4);
        assert_eq!(label.to_string(), "abcd");
    }

    #[test]
    fn label_keeps_non_utf8_bytes() {
        let label = FixedString::<4>::from_raw([0xFF, 0xFE, 0, 0]);
        assert_eq!(label.as_bytes(), &[0xFF, 0xFE]);
        assert_eq!(label.to_string_lossy(), "\u{FFFD}\u{FFFD}");
    }

    #[test]
    fn label_short_buffer_is_out_of_bounds() {
        let data = [b'a'; 255];
        let mut cur = ByteCursor::little_endian(&data);
        assert!(matches!(
            FixedString::<256>::decode(&mut cur),
            Err(DecodeError::OutOfBounds { needed: 256, .. })
        ));
    }

    #[test]
    fn from_text_rejects_oversize_and_embedded_nul() {
        assert!(FixedString::<3>::from_text("abcd").is_none());
        assert!(FixedString::<8>::from_text("a\0b").is_none());
        assert!(FixedString::<3>::from_text("").expect("empty").is_empty());
    }

    #[test]
    fn label_serializes_as_text() {
        let label = FixedString::<8>::from_text("yak").expect("fits");
        let json = serde_json::to_string(&label).expect("serialize");
        assert_eq!(json, "\"yak\"");
        let back: FixedString<8> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, label);
    }

    proptest! {
        #[test]
        fn uuid_reencodes_exactly(bytes in any::<[u8; 16]>()) {
            let mut cur = ByteCursor::little_endian(&bytes);
            let id = decode_uuid(&mut cur).expect("uuid");
            let mut out = ByteWriter::new(ByteOrder::Little);
            encode_uuid(&mut out, &id);
            prop_assert_eq!(out.as_slice(), &bytes[..]);
        }

        #[test]
        fn label_length_is_terminator_position(
            mut raw in any::<[u8; 32]>(),
            cut in proptest::option::of(0_usize..32),
        ) {
            for b in &mut raw {
                if *b == 0 {
                    *b = 1;
                }
            }
            if let Some(k) = cut {
                raw[k] = 0;
            }
            let mut cur = ByteCursor::little_endian(&raw);
            let label = FixedString::<32>::decode(&mut cur).expect("label");
            prop_assert_eq!(label.len(), cut.unwrap_or(32));
            prop_assert_eq!(cur.position(), 32);
        }
    }
}
