//! Field tables and the struct decoder that walks them.
//!
//! Every fixed-layout record declares a `'static` table of [`FieldSpec`]s.
//! The record's decoder then issues one typed read per field, in order,
//! through a [`StructDecoder`]. The decoder checks each read against the
//! table (name, offset, width), so a decoder that drifts from the declared
//! layout fails loudly instead of silently shifting every later field.

use crate::ident::{FixedString, decode_uuid};
use recon_types::{ByteCursor, ByteOrder, ByteWriter, DecodeError, FieldError};
use uuid::Uuid;

/// One entry of a record's on-disk layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    /// Offset relative to the start of the record.
    pub offset: usize,
    pub width: usize,
}

impl FieldSpec {
    #[must_use]
    pub const fn new(name: &'static str, offset: usize, width: usize) -> Self {
        Self {
            name,
            offset,
            width,
        }
    }
}

/// Total byte size covered by `layout`.
#[must_use]
pub const fn layout_size(layout: &[FieldSpec]) -> usize {
    match layout.last() {
        Some(last) => last.offset + last.width,
        None => 0,
    }
}

/// Whether `layout` starts at zero and has no gaps or overlaps.
#[must_use]
pub const fn layout_is_contiguous(layout: &[FieldSpec]) -> bool {
    let mut expected = 0;
    let mut i = 0;
    while i < layout.len() {
        if layout[i].offset != expected || layout[i].width == 0 {
            return false;
        }
        expected += layout[i].width;
        i += 1;
    }
    true
}

/// A record with a fixed on-disk layout.
pub trait Decode: Sized {
    /// Record name used in trace output.
    const NAME: &'static str;
    const LAYOUT: &'static [FieldSpec];
    const SIZE: usize = layout_size(Self::LAYOUT);

    /// Decode from the cursor's current position. On failure the cursor is
    /// left where it was.
    fn decode_from(cursor: &mut ByteCursor<'_>) -> Result<Self, FieldError>;

    /// Decode from the start of `bytes`. Trailing bytes are ignored.
    fn decode(bytes: &[u8], order: ByteOrder) -> Result<Self, FieldError> {
        Self::decode_from(&mut ByteCursor::new(bytes, order))
    }
}

/// Inverse of [`Decode`]: writes the record back in declared field order.
pub trait Encode {
    fn encode_into(&self, out: &mut ByteWriter);

    fn to_bytes(&self, order: ByteOrder) -> Vec<u8> {
        let mut out = ByteWriter::new(order);
        self.encode_into(&mut out);
        out.into_inner()
    }
}

/// Threads one cursor through a record's field table.
///
/// Works on a private copy of the caller's cursor; [`finish`](Self::finish)
/// commits the advanced position back only once every field decoded.
pub struct StructDecoder<'c, 'a> {
    outer: &'c mut ByteCursor<'a>,
    cursor: ByteCursor<'a>,
    layout: &'static [FieldSpec],
    base: usize,
    next: usize,
}

impl<'c, 'a> StructDecoder<'c, 'a> {
    pub fn new(layout: &'static [FieldSpec], cursor: &'c mut ByteCursor<'a>) -> Self {
        let local = *cursor;
        Self {
            outer: cursor,
            cursor: local,
            layout,
            base: local.position(),
            next: 0,
        }
    }

    /// Decode the next declared field with a primitive decoder.
    pub fn field<T>(
        &mut self,
        name: &'static str,
        decode: impl FnOnce(&mut ByteCursor<'a>) -> Result<T, DecodeError>,
    ) -> Result<T, FieldError> {
        let spec = self.enter(name)?;
        let value = decode(&mut self.cursor).map_err(|kind| FieldError::new(name, kind))?;
        self.leave(spec)?;
        Ok(value)
    }

    /// Decode the next declared field with a nested record decoder.
    pub fn nested<T>(
        &mut self,
        name: &'static str,
        decode: impl FnOnce(&mut ByteCursor<'a>) -> Result<T, FieldError>,
    ) -> Result<T, FieldError> {
        let spec = self.enter(name)?;
        let value = decode(&mut self.cursor).map_err(|err| err.within(name))?;
        self.leave(spec)?;
        Ok(value)
    }

    /// Consume the next declared field without interpreting it.
    pub fn skip(&mut self, name: &'static str) -> Result<(), FieldError> {
        let spec = self.enter(name)?;
        self.cursor
            .skip(spec.width)
            .map_err(|kind| FieldError::new(name, kind))?;
        self.leave(spec)
    }

    pub fn u8(&mut self, name: &'static str) -> Result<u8, FieldError> {
        self.field(name, ByteCursor::read_u8)
    }

    pub fn u16(&mut self, name: &'static str) -> Result<u16, FieldError> {
        self.field(name, ByteCursor::read_u16)
    }

    pub fn u32(&mut self, name: &'static str) -> Result<u32, FieldError> {
        self.field(name, ByteCursor::read_u32)
    }

    pub fn u64(&mut self, name: &'static str) -> Result<u64, FieldError> {
        self.field(name, ByteCursor::read_u64)
    }

    pub fn bytes<const N: usize>(&mut self, name: &'static str) -> Result<[u8; N], FieldError> {
        self.field(name, ByteCursor::read_array::<N>)
    }

    pub fn uuid(&mut self, name: &'static str) -> Result<Uuid, FieldError> {
        self.field(name, decode_uuid)
    }

    pub fn string<const N: usize>(
        &mut self,
        name: &'static str,
    ) -> Result<FixedString<N>, FieldError> {
        self.field(name, FixedString::<N>::decode)
    }

    /// Check that every declared field was decoded and commit the cursor.
    pub fn finish(self) -> Result<(), FieldError> {
        if let Some(missing) = self.layout.get(self.next) {
            return Err(FieldError::new(
                missing.name,
                DecodeError::LayoutMismatch {
                    field: missing.name,
                    reason: "declared field was never decoded",
                    expected: missing.offset,
                    actual: self.cursor.position() - self.base,
                },
            ));
        }
        *self.outer = self.cursor;
        Ok(())
    }

    fn enter(&mut self, name: &'static str) -> Result<FieldSpec, FieldError> {
        let relative = self.cursor.position() - self.base;
        let Some(spec) = self.layout.get(self.next).copied() else {
            return Err(FieldError::new(
                name,
                DecodeError::LayoutMismatch {
                    field: name,
                    reason: "field is not in the declared layout",
                    expected: layout_size(self.layout),
                    actual: relative,
                },
            ));
        };
        if spec.name != name {
            return Err(FieldError::new(
                name,
                DecodeError::LayoutMismatch {
                    field: name,
                    reason: "decoded out of declared order",
                    expected: spec.offset,
                    actual: relative,
                },
            ));
        }
        if spec.offset != relative {
            return Err(FieldError::new(
                name,
                DecodeError::LayoutMismatch {
                    field: name,
                    reason: "cursor is not at the declared offset",
                    expected: spec.offset,
                    actual: relative,
                },
            ));
        }
        self.next += 1;
        Ok(spec)
    }

    fn leave(&self, spec: FieldSpec) -> Result<(), FieldError> {
        let consumed = self.cursor.position() - self.base - spec.offset;
        if consumed != spec.width {
            return Err(FieldError::new(
                spec.name,
                DecodeError::LayoutMismatch {
                    field: spec.name,
                    reason: "decoder consumed a different width than declared",
                    expected: spec.width,
                    actual: consumed,
                },
            ));
        }
        Ok(())
    }
}
