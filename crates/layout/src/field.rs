//! Declarative description of fixed-offset binary structures.
//!
//! A header is a plain struct whose on-disk shape is given by a [`Layout`]:
//! a table of [`Span`]s, one per field. Three kinds of field exist:
//!
//! - [`Field<T>`]: a big-endian integer at a fixed offset.
//! - [`Magic`]: a constant byte string, checked on read and written verbatim.
//! - [`Placeholder`]: reserved bytes that are never read or written.
//!
//! Overlap between fields is a property of the header type, not of any
//! instance, so layouts are checked once with [`Layout::check`] (usually in a
//! `const` assertion next to the header definition).

use std::marker::PhantomData;

use thiserror::Error;

use crate::codec::{decode_be, encode_be, BeInt};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("invalid magic value in {field}: expected {expected:02x?}, found {found:02x?}")]
    BadMagic {
        field: &'static str,
        expected: &'static [u8],
        found: Vec<u8>,
    },
    #[error("fields {first} and {second} overlap in {layout}")]
    Overlap {
        layout: &'static str,
        first: &'static str,
        second: &'static str,
    },
    #[error("buffer of {len} bytes is too short for field {field} ending at byte {end}")]
    ShortBuffer {
        field: &'static str,
        end: usize,
        len: usize,
    },
}

/// The bytes a field occupies inside its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub name: &'static str,
    pub offset: usize,
    pub size: usize,
}

impl Span {
    pub const fn end(&self) -> usize {
        self.offset + self.size
    }

    const fn overlaps(&self, other: &Span) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }

    fn slice<'a>(&self, buf: &'a [u8]) -> Result<&'a [u8], LayoutError> {
        buf.get(self.offset..self.end())
            .ok_or(LayoutError::ShortBuffer {
                field: self.name,
                end: self.end(),
                len: buf.len(),
            })
    }
}

/// Destination of header writes: a raw buffer, or a backend at some file
/// offset (implemented by the backend crate).
///
/// `put` receives offsets relative to the start of the header.
pub trait FieldSink {
    type Error;

    fn put(&mut self, offset: usize, bytes: &[u8]) -> Result<(), Self::Error>;
}

impl FieldSink for [u8] {
    type Error = LayoutError;

    fn put(&mut self, offset: usize, bytes: &[u8]) -> Result<(), LayoutError> {
        let len = self.len();
        let end = offset + bytes.len();
        self.get_mut(offset..end)
            .ok_or(LayoutError::ShortBuffer {
                field: "<sink>",
                end,
                len,
            })?
            .copy_from_slice(bytes);
        Ok(())
    }
}

/// A big-endian integer of type `T` at a fixed offset.
#[derive(Debug)]
pub struct Field<T> {
    name: &'static str,
    offset: usize,
    _ty: PhantomData<fn() -> T>,
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Field<T> {}

impl<T: BeInt> Field<T> {
    pub const fn new(name: &'static str, offset: usize) -> Self {
        Self {
            name,
            offset,
            _ty: PhantomData,
        }
    }

    pub const fn offset(&self) -> usize {
        self.offset
    }

    pub const fn span(&self) -> Span {
        Span {
            name: self.name,
            offset: self.offset,
            size: T::WIDTH,
        }
    }

    /// Reads the field out of a header-sized buffer.
    pub fn read(&self, buf: &[u8]) -> Result<T, LayoutError> {
        self.span().slice(buf).map(decode_be::<T>)
    }

    pub fn write<S: FieldSink + ?Sized>(&self, sink: &mut S, value: T) -> Result<(), S::Error> {
        sink.put(self.offset, encode_be(value).as_ref())
    }
}

/// A constant byte string identifying the format.
#[derive(Debug, Clone, Copy)]
pub struct Magic {
    name: &'static str,
    offset: usize,
    bytes: &'static [u8],
}

impl Magic {
    pub const fn new(name: &'static str, offset: usize, bytes: &'static [u8]) -> Self {
        Self {
            name,
            offset,
            bytes,
        }
    }

    pub const fn bytes(&self) -> &'static [u8] {
        self.bytes
    }

    pub const fn span(&self) -> Span {
        Span {
            name: self.name,
            offset: self.offset,
            size: self.bytes.len(),
        }
    }

    /// Fails with [`LayoutError::BadMagic`] unless `buf` carries the magic.
    pub fn check(&self, buf: &[u8]) -> Result<(), LayoutError> {
        let found = self.span().slice(buf)?;
        if found != self.bytes {
            return Err(LayoutError::BadMagic {
                field: self.name,
                expected: self.bytes,
                found: found.to_vec(),
            });
        }
        Ok(())
    }

    pub fn write<S: FieldSink + ?Sized>(&self, sink: &mut S) -> Result<(), S::Error> {
        sink.put(self.offset, self.bytes)
    }
}

/// Reserved bytes. They take part in the layout size and overlap checks but
/// are neither read nor written, so whatever the destination already holds
/// (zeroes on a freshly extended file) stays in place.
#[derive(Debug, Clone, Copy)]
pub struct Placeholder {
    name: &'static str,
    offset: usize,
    size: usize,
}

impl Placeholder {
    pub const fn new(name: &'static str, offset: usize, size: usize) -> Self {
        Self { name, offset, size }
    }

    pub const fn span(&self) -> Span {
        Span {
            name: self.name,
            offset: self.offset,
            size: self.size,
        }
    }
}

/// The full field table of one header type.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    name: &'static str,
    spans: &'static [Span],
}

impl Layout {
    pub const fn new(name: &'static str, spans: &'static [Span]) -> Self {
        Self { name, spans }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn spans(&self) -> &'static [Span] {
        self.spans
    }

    /// Encoded size: the furthest end of any field.
    pub const fn size(&self) -> usize {
        let mut size = 0;
        let mut i = 0;
        while i < self.spans.len() {
            let end = self.spans[i].end();
            if end > size {
                size = end;
            }
            i += 1;
        }
        size
    }

    /// Indices of the first pair of overlapping fields, if any.
    pub const fn first_overlap(&self) -> Option<(usize, usize)> {
        let mut i = 0;
        while i < self.spans.len() {
            let mut j = i + 1;
            while j < self.spans.len() {
                if self.spans[i].overlaps(&self.spans[j]) {
                    return Some((i, j));
                }
                j += 1;
            }
            i += 1;
        }
        None
    }

    pub fn check(&self) -> Result<(), LayoutError> {
        match self.first_overlap() {
            Some((i, j)) => Err(LayoutError::Overlap {
                layout: self.name,
                first: self.spans[i].name,
                second: self.spans[j].name,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORD: Field<u32> = Field::new("word", 4);
    const MAGIC: Magic = Magic::new("magic", 2, b"magic");

    // -------------------- Integer fields --------------------

    #[test]
    fn field_reads_at_its_offset() {
        let data = [0x00, 0x00, 0x00, 0x00, 0x12, 0x34, 0x56, 0x78];
        assert_eq!(WORD.read(&data).unwrap(), 0x1234_5678);
    }

    #[test]
    fn field_write_touches_only_its_bytes() {
        let mut data = [0x01, 0x02, 0x03, 0x04, 0x12, 0x34, 0x56, 0x78];
        WORD.write(&mut data[..], 0x4321_1234).unwrap();
        assert_eq!(data, [0x01, 0x02, 0x03, 0x04, 0x43, 0x21, 0x12, 0x34]);
    }

    #[test]
    fn field_read_short_buffer() {
        let err = WORD.read(&[0u8; 6]).unwrap_err();
        assert_eq!(
            err,
            LayoutError::ShortBuffer {
                field: "word",
                end: 8,
                len: 6
            }
        );
    }

    // -------------------- Magic values --------------------

    #[test]
    fn magic_write_buffer() {
        let mut data = [0u8; 8];
        MAGIC.write(&mut data[..]).unwrap();
        assert_eq!(data, [0, 0, b'm', b'a', b'g', b'i', b'c', 0]);
    }

    #[test]
    fn magic_read_buffer() {
        let data = [0, 0, b'm', b'a', b'g', b'i', b'c', 0];
        assert!(MAGIC.check(&data).is_ok());
    }

    #[test]
    fn magic_read_buffer_invalid() {
        let data = [0, 0, b'w', b'r', b'o', b'n', b'g', 0];
        assert!(matches!(
            MAGIC.check(&data),
            Err(LayoutError::BadMagic { field: "magic", .. })
        ));
    }

    #[test]
    fn magic_rejects_every_single_byte_flip() {
        let good = [0, 0, b'm', b'a', b'g', b'i', b'c', 0];
        for i in 2..7 {
            let mut data = good;
            data[i] ^= 0x20;
            assert!(MAGIC.check(&data).is_err(), "flip at byte {i} accepted");
        }
    }

    // -------------------- Layout checks --------------------

    const DISJOINT: [Span; 3] = [
        MAGIC.span(),
        Span {
            name: "tail",
            offset: 7,
            size: 1,
        },
        Placeholder::new("gap", 0, 2).span(),
    ];

    const OVERLAPPING: [Span; 2] = [
        WORD.span(),
        Span {
            name: "wide",
            offset: 6,
            size: 4,
        },
    ];

    #[test]
    fn layout_size_is_furthest_end() {
        assert_eq!(Layout::new("disjoint", &DISJOINT).size(), 8);
        assert_eq!(Layout::new("empty", &[]).size(), 0);
    }

    #[test]
    fn disjoint_layout_passes() {
        assert!(Layout::new("disjoint", &DISJOINT).check().is_ok());
    }

    #[test]
    fn overlapping_layout_is_rejected() {
        let err = Layout::new("overlapping", &OVERLAPPING).check().unwrap_err();
        assert_eq!(
            err,
            LayoutError::Overlap {
                layout: "overlapping",
                first: "word",
                second: "wide"
            }
        );
    }

    #[test]
    fn adjacent_fields_do_not_overlap() {
        let a = Span {
            name: "a",
            offset: 0,
            size: 4,
        };
        let b = Span {
            name: "b",
            offset: 4,
            size: 4,
        };
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn buffer_sink_rejects_out_of_range() {
        let mut data = [0u8; 4];
        assert!(data[..].put(2, &[1, 2, 3]).is_err());
        assert_eq!(data, [0; 4]);
    }
}
