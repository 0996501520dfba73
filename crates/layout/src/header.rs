//! The file header and the reduced keyframe header.

use crate::field::{Field, FieldSink, Layout, LayoutError, Magic, Placeholder, Span};
use crate::{KeyframeId, Offset};

/// A fixed-size binary header described by a [`Layout`].
pub trait Header: Sized {
    const LAYOUT: Layout;
    const SIZE: usize = Self::LAYOUT.size();

    /// Parses a header from the first [`Header::SIZE`] bytes of `buf`.
    fn decode(buf: &[u8]) -> Result<Self, LayoutError>;

    /// Writes every non-placeholder field to `sink`.
    fn encode<S: FieldSink + ?Sized>(&self, sink: &mut S) -> Result<(), S::Error>;
}

/// Number of forward links stored in every keyframe header.
pub const SKIPLIST_HEIGHT: usize = 10;

/// The header at offset 0 of every protostream file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileHeader {
    pub file_size: u64,
    pub proto_header_offset: Offset,
    pub kf0_offset: Offset,
    pub keyframe_count: u64,
    pub frame_count: u64,
    pub frames_per_kf: u32,
}

impl FileHeader {
    pub const MAGIC: Magic = Magic::new("magic", 0, b"PROTOSTR");
    pub const FILE_SIZE: Field<u64> = Field::new("file_size", 8);
    pub const PROTO_HEADER_OFFSET: Field<u64> = Field::new("proto_header_offset", 8 * 2);
    pub const KF0_OFFSET: Field<u64> = Field::new("kf0_offset", 8 * 3);
    pub const KEYFRAME_COUNT: Field<u64> = Field::new("keyframe_count", 8 * 4);
    pub const FRAME_COUNT: Field<u64> = Field::new("frame_count", 8 * 5);
    pub const FRAMES_PER_KF: Field<u32> = Field::new("frames_per_kf", 8 * 6);
    pub const RESERVED: Placeholder = Placeholder::new("reserved", 8 * 6 + 4, 4);
}

const FILE_HEADER_SPANS: [Span; 8] = [
    FileHeader::MAGIC.span(),
    FileHeader::FILE_SIZE.span(),
    FileHeader::PROTO_HEADER_OFFSET.span(),
    FileHeader::KF0_OFFSET.span(),
    FileHeader::KEYFRAME_COUNT.span(),
    FileHeader::FRAME_COUNT.span(),
    FileHeader::FRAMES_PER_KF.span(),
    FileHeader::RESERVED.span(),
];

const _: () = assert!(
    FileHeader::LAYOUT.first_overlap().is_none(),
    "file header fields overlap"
);

impl Header for FileHeader {
    const LAYOUT: Layout = Layout::new("file header", &FILE_HEADER_SPANS);

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Self::MAGIC.check(buf)?;
        Ok(Self {
            file_size: Self::FILE_SIZE.read(buf)?,
            proto_header_offset: Self::PROTO_HEADER_OFFSET.read(buf)?,
            kf0_offset: Self::KF0_OFFSET.read(buf)?,
            keyframe_count: Self::KEYFRAME_COUNT.read(buf)?,
            frame_count: Self::FRAME_COUNT.read(buf)?,
            frames_per_kf: Self::FRAMES_PER_KF.read(buf)?,
        })
    }

    fn encode<S: FieldSink + ?Sized>(&self, sink: &mut S) -> Result<(), S::Error> {
        Self::MAGIC.write(sink)?;
        Self::FILE_SIZE.write(sink, self.file_size)?;
        Self::PROTO_HEADER_OFFSET.write(sink, self.proto_header_offset)?;
        Self::KF0_OFFSET.write(sink, self.kf0_offset)?;
        Self::KEYFRAME_COUNT.write(sink, self.keyframe_count)?;
        Self::FRAME_COUNT.write(sink, self.frame_count)?;
        Self::FRAMES_PER_KF.write(sink, self.frames_per_kf)
    }
}

/// The metadata block in front of every keyframe payload.
///
/// The skiplist is a placeholder here: it is patched in place as later
/// keyframes arrive, so it is read separately (see [`KeyframeHeader::skiplist_entry`])
/// and never written by [`Header::encode`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyframeHeader {
    pub kf_num: KeyframeId,
    pub delta_offset: Offset,
    pub kf_size: u32,
}

impl KeyframeHeader {
    pub const KF_NUM: Field<u64> = Field::new("kf_num", 0);
    pub const DELTA_OFFSET: Field<u64> = Field::new("delta_offset", 8);
    pub const SKIPLIST: Placeholder = Placeholder::new("skiplist", 8 * 2, 8 * SKIPLIST_HEIGHT);
    pub const KF_SIZE: Field<u32> = Field::new("kf_size", 8 * 2 + 8 * SKIPLIST_HEIGHT);

    /// Offset of the skiplist relative to the start of the header.
    pub const fn skiplist_offset(level: usize) -> usize {
        8 * 2 + 8 * level
    }

    /// The `level`th skiplist link as a field of its own.
    ///
    /// # Panics
    ///
    /// Panics if `level >= SKIPLIST_HEIGHT`.
    pub const fn skiplist_entry(level: usize) -> Field<u64> {
        assert!(level < SKIPLIST_HEIGHT, "skiplist level out of range");
        Field::new("skiplist", Self::skiplist_offset(level))
    }
}

const KEYFRAME_HEADER_SPANS: [Span; 4] = [
    KeyframeHeader::KF_NUM.span(),
    KeyframeHeader::DELTA_OFFSET.span(),
    KeyframeHeader::SKIPLIST.span(),
    KeyframeHeader::KF_SIZE.span(),
];

const _: () = assert!(
    KeyframeHeader::LAYOUT.first_overlap().is_none(),
    "keyframe header fields overlap"
);

impl Header for KeyframeHeader {
    const LAYOUT: Layout = Layout::new("keyframe header", &KEYFRAME_HEADER_SPANS);

    fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        Ok(Self {
            kf_num: Self::KF_NUM.read(buf)?,
            delta_offset: Self::DELTA_OFFSET.read(buf)?,
            kf_size: Self::KF_SIZE.read(buf)?,
        })
    }

    fn encode<S: FieldSink + ?Sized>(&self, sink: &mut S) -> Result<(), S::Error> {
        Self::KF_NUM.write(sink, self.kf_num)?;
        Self::DELTA_OFFSET.write(sink, self.delta_offset)?;
        Self::KF_SIZE.write(sink, self.kf_size)
    }
}
