use std::borrow::Cow;
use std::fmt;
use std::path::Path;

use backend::{Backend, BackendMut};
use layout::{
    DeltaSize, FileHeader, Header, KeyframeHeader, KeyframeId, Offset, NO_KEYFRAME, SKIPLIST_HEIGHT,
};
use tracing::{debug, trace};

use crate::cache::{Cache, FullCache};
use crate::error::{FormatError, Result, StreamError};
use crate::factory::Factory;
use crate::iter::{Keyframe, KeyframeCursor, Keyframes, DELTA_PREFIX};

const FILE_HEADER_SIZE: u64 = FileHeader::SIZE as u64;
const KEYFRAME_HEADER_SIZE: u64 = KeyframeHeader::SIZE as u64;

/// An open protostream file.
///
/// Owns the backend, the lookup cache and the in-memory copy of the file
/// header. The header is rewritten after every append, so the file on disk
/// is always self-describing.
///
/// Appends follow a fixed rhythm: every `frames_per_kf`th frame (starting
/// with the first) is a keyframe, the others are deltas.
pub struct Stream<B, C = FullCache> {
    cache: C,
    header: FileHeader,
    // last, so it is dropped after everything that might borrow it
    backend: B,
}

impl<B, C> fmt::Debug for Stream<B, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl<B: Backend, C: Cache> Stream<B, C> {
    /// Opens and validates an existing file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_backend(B::open(path)?)
    }

    /// Validates the file behind an already opened backend.
    pub fn from_backend(backend: B) -> Result<Self> {
        let header = read_file_header(&backend)?;
        debug!(
            file_size = header.file_size,
            keyframes = header.keyframe_count,
            frames = header.frame_count,
            frames_per_kf = header.frames_per_kf,
            "opened stream"
        );
        Ok(Self {
            cache: C::default(),
            header,
            backend,
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn frame_count(&self) -> u64 {
        self.header.frame_count
    }

    pub fn keyframe_count(&self) -> u64 {
        self.header.keyframe_count
    }

    pub fn frames_per_keyframe(&self) -> u32 {
        self.header.frames_per_kf
    }

    pub fn file_size(&self) -> u64 {
        self.header.file_size
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// The opaque bytes between the file header and the first keyframe.
    pub fn proto_header(&self) -> Result<Cow<'_, [u8]>> {
        let len = self.header.kf0_offset - self.header.proto_header_offset;
        Ok(self.backend.read(self.header.proto_header_offset, len as usize)?)
    }

    pub fn proto_header_as<F: Factory>(&self) -> Result<F::Output> {
        Ok(F::build(&self.proto_header()?))
    }

    /// Cursor on the first keyframe, or [`end`](Self::end) for an empty stream.
    pub fn begin(&self) -> KeyframeCursor<'_, B, C> {
        let offset = if self.header.keyframe_count == 0 {
            NO_KEYFRAME
        } else {
            self.header.kf0_offset
        };
        KeyframeCursor::new(self, offset)
    }

    pub fn end(&self) -> KeyframeCursor<'_, B, C> {
        KeyframeCursor::new(self, NO_KEYFRAME)
    }

    pub fn keyframes(&self) -> Keyframes<'_, B, C> {
        Keyframes::new(self.begin())
    }

    /// Keyframe number `id`, found through the skiplist.
    pub fn keyframe(&self, id: KeyframeId) -> Result<Option<Keyframe<'_, B, C>>> {
        Ok(self.begin().advanced(id)?.keyframe())
    }

    pub fn offset_of_keyframe(&self, id: KeyframeId) -> Result<Option<Offset>> {
        Ok(self.keyframe(id)?.map(|kf| kf.offset()))
    }
}

impl<B: BackendMut, C: Cache> Stream<B, C> {
    /// Creates a new file holding only the file header and `proto_header`.
    ///
    /// # Panics
    ///
    /// Panics if `frames_per_kf` is zero.
    pub fn create<P: AsRef<Path>>(path: P, frames_per_kf: u32, proto_header: &[u8]) -> Result<Self> {
        Self::create_in(B::create(path)?, frames_per_kf, proto_header)
    }

    /// Like [`create`](Self::create), on a freshly created backend.
    pub fn create_in(mut backend: B, frames_per_kf: u32, proto_header: &[u8]) -> Result<Self> {
        assert!(frames_per_kf > 0, "frames per keyframe must be positive");

        let end = FILE_HEADER_SIZE + proto_header.len() as u64;
        let header = FileHeader {
            file_size: end,
            proto_header_offset: FILE_HEADER_SIZE,
            kf0_offset: end,
            keyframe_count: 0,
            frame_count: 0,
            frames_per_kf,
        };
        // whole image, so the reserved bytes exist on disk
        let mut image = [0u8; FileHeader::SIZE];
        header.encode(&mut image[..])?;
        backend.write(0, &image)?;
        backend.write(FILE_HEADER_SIZE, proto_header)?;
        debug!(frames_per_kf, proto_header_len = proto_header.len(), "created stream");

        Ok(Self {
            cache: C::default(),
            header,
            backend,
        })
    }

    /// Appends a keyframe and links it into the skiplist.
    ///
    /// # Panics
    ///
    /// Panics unless the stream is at a keyframe boundary, i.e. the previous
    /// keyframe already has its `frames_per_kf - 1` deltas.
    pub fn append_keyframe(&mut self, data: &[u8]) -> Result<()> {
        assert!(
            self.header.frame_count % u64::from(self.header.frames_per_kf) == 0,
            "append_keyframe at frame {}: {} frames per keyframe, a delta is due",
            self.header.frame_count,
            self.header.frames_per_kf,
        );
        let kf_size = u32::try_from(data.len()).map_err(|_| StreamError::PayloadTooLarge {
            len: data.len(),
            max: u32::MAX as usize,
        })?;

        let offset = self.backend.size()?;
        let id = self.header.keyframe_count;
        let len = data.len() as u64;
        let header = KeyframeHeader {
            kf_num: id,
            delta_offset: offset + KEYFRAME_HEADER_SIZE + len,
            kf_size,
        };
        header.encode(&mut self.backend.at(offset))?;
        self.backend.write(offset + KEYFRAME_HEADER_SIZE, data)?;
        self.update_links_to(id, offset)?;

        self.header.frame_count += 1;
        self.header.keyframe_count += 1;
        self.header.file_size += KEYFRAME_HEADER_SIZE + len;
        self.write_header()?;
        trace!(id, offset, size = kf_size, "appended keyframe");
        Ok(())
    }

    /// Appends a delta to the current keyframe.
    ///
    /// # Panics
    ///
    /// Panics when a keyframe is due instead, including on an empty stream.
    pub fn append_delta(&mut self, data: &[u8]) -> Result<()> {
        assert!(
            self.header.frame_count % u64::from(self.header.frames_per_kf) != 0,
            "append_delta at frame {}: {} frames per keyframe, a keyframe is due",
            self.header.frame_count,
            self.header.frames_per_kf,
        );
        let size = DeltaSize::try_from(data.len()).map_err(|_| StreamError::PayloadTooLarge {
            len: data.len(),
            max: DeltaSize::MAX as usize,
        })?;

        let offset = self.backend.size()?;
        self.backend.write_num(offset, size)?;
        self.backend.write(offset + DELTA_PREFIX, data)?;

        self.header.frame_count += 1;
        self.header.file_size += DELTA_PREFIX + u64::from(size);
        self.write_header()?;
        trace!(frame = self.header.frame_count - 1, offset, size, "appended delta");
        Ok(())
    }

    /// Flushes the backend to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        Ok(self.backend.sync()?)
    }

    /// Points every existing link that should reach keyframe `id` at
    /// `offset`.
    ///
    /// Keyframe `id - 2^L` links to `id` at level `L`. Walking from the
    /// highest such keyframe and stepping 2^l for each lower level visits
    /// all of them. The walk only uses links that do not end at `id`, so the
    /// targets can be collected before any write.
    fn update_links_to(&mut self, id: KeyframeId, offset: Offset) -> Result<()> {
        let Some(top) = (0..SKIPLIST_HEIGHT).rev().find(|&level| id >= 1 << level) else {
            return Ok(());
        };

        let mut writes = Vec::with_capacity(top + 1);
        let mut cursor = self.begin();
        cursor.advance(id - (1 << top))?;
        writes.push((cursor.offset(), top));
        for level in (0..top).rev() {
            cursor.advance(1 << level)?;
            writes.push((cursor.offset(), level));
        }

        for (source, level) in writes {
            debug_assert_ne!(source, NO_KEYFRAME, "keyframe {id} has a missing predecessor");
            let slot = source + KeyframeHeader::skiplist_offset(level) as Offset;
            self.backend.write_num(slot, offset)?;
        }
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        let header = self.header;
        header.encode(&mut self.backend.at(0))?;
        Ok(())
    }
}

fn read_file_header<B: Backend>(backend: &B) -> Result<FileHeader> {
    let size = backend.size()?;
    if size < FILE_HEADER_SIZE {
        return Err(FormatError::FileTooSmall {
            size,
            needed: FILE_HEADER_SIZE,
        }
        .into());
    }

    let header = FileHeader::decode(&backend.read(0, FileHeader::SIZE)?)?;
    if header.file_size != size {
        return Err(FormatError::SizeMismatch {
            declared: header.file_size,
            actual: size,
        }
        .into());
    }
    if header.proto_header_offset > size - FILE_HEADER_SIZE {
        return Err(FormatError::ProtoHeaderOffset {
            offset: header.proto_header_offset,
            file_size: size,
        }
        .into());
    }
    if header.kf0_offset > size - FILE_HEADER_SIZE {
        return Err(FormatError::Kf0Offset {
            offset: header.kf0_offset,
            file_size: size,
        }
        .into());
    }
    if header.proto_header_offset > header.kf0_offset {
        return Err(FormatError::ProtoHeaderAfterKf0 {
            proto_header_offset: header.proto_header_offset,
            kf0_offset: header.kf0_offset,
        }
        .into());
    }
    if header.frames_per_kf == 0 {
        return Err(FormatError::ZeroFramesPerKeyframe.into());
    }
    Ok(header)
}
