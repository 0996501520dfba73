//! Views over keyframes and deltas.
//!
//! All views borrow the stream immutably, so none of them can be held across
//! an append.

use std::borrow::Cow;
use std::cmp;
use std::fmt;
use std::ptr;

use backend::Backend;
use layout::{DeltaSize, Header, KeyframeHeader, KeyframeId, Offset, NO_KEYFRAME, SKIPLIST_HEIGHT};

use crate::cache::Cache;
use crate::error::{Result, StreamError};
use crate::factory::Factory;
use crate::stream::Stream;

/// A position in the keyframe sequence: a keyframe, or the end.
///
/// Two cursors are equal when they refer to the same stream and offset.
pub struct KeyframeCursor<'s, B, C> {
    stream: &'s Stream<B, C>,
    offset: Offset,
}

impl<'s, B: Backend, C: Cache> KeyframeCursor<'s, B, C> {
    pub(crate) fn new(stream: &'s Stream<B, C>, offset: Offset) -> Self {
        Self { stream, offset }
    }

    pub fn offset(&self) -> Offset {
        self.offset
    }

    pub fn is_end(&self) -> bool {
        self.offset == NO_KEYFRAME
    }

    /// The keyframe under the cursor, `None` at the end.
    pub fn keyframe(&self) -> Option<Keyframe<'s, B, C>> {
        (!self.is_end()).then(|| Keyframe::new(self.stream, self.offset))
    }

    /// Moves to the next keyframe.
    ///
    /// # Panics
    ///
    /// Panics at the end position.
    pub fn step(&mut self) -> Result<()> {
        self.offset = self.link(0)?;
        Ok(())
    }

    /// Moves `n` keyframes forward, landing on the end when that runs past
    /// the last keyframe. Advancing the end position is a no-op.
    ///
    /// A memoized target is reached without touching the backend; otherwise
    /// the skiplist is walked greedily from the highest level, taking at
    /// most 2^(level) per link.
    pub fn advance(&mut self, n: u64) -> Result<()> {
        if n == 0 || self.is_end() {
            return Ok(());
        }

        let id = self.stream.cache().header_at(self.stream.backend(), self.offset)?.kf_num;
        if id >= self.stream.keyframe_count() {
            return Err(StreamError::CorruptKeyframe {
                offset: self.offset,
                kf_num: id,
            });
        }
        let target = match id.checked_add(n) {
            Some(target) if target < self.stream.keyframe_count() => target,
            _ => {
                self.offset = NO_KEYFRAME;
                return Ok(());
            }
        };
        if let Some(offset) = self.stream.cache().offset_of(target) {
            self.offset = offset;
            return Ok(());
        }

        let mut remaining = n;
        for level in (0..SKIPLIST_HEIGHT).rev() {
            let stride = 1u64 << level;
            while remaining >= stride {
                remaining -= stride;
                self.offset = self.link(level)?;
                if self.is_end() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// The cursor `n` keyframes further on.
    pub fn advanced(mut self, n: u64) -> Result<Self> {
        self.advance(n)?;
        Ok(self)
    }

    fn link(&self, level: usize) -> Result<Offset> {
        self.stream
            .cache()
            .link_at(self.stream.backend(), self.offset, level)
    }
}

impl<B, C> Clone for KeyframeCursor<'_, B, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B, C> Copy for KeyframeCursor<'_, B, C> {}

impl<B, C> PartialEq for KeyframeCursor<'_, B, C> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.stream, other.stream) && self.offset == other.offset
    }
}

impl<B, C> Eq for KeyframeCursor<'_, B, C> {}

impl<B, C> fmt::Debug for KeyframeCursor<'_, B, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyframeCursor")
            .field("offset", &self.offset)
            .finish()
    }
}

/// One keyframe of a stream.
pub struct Keyframe<'s, B, C> {
    stream: &'s Stream<B, C>,
    offset: Offset,
}

impl<'s, B: Backend, C: Cache> Keyframe<'s, B, C> {
    fn new(stream: &'s Stream<B, C>, offset: Offset) -> Self {
        Self { stream, offset }
    }

    /// File offset of the keyframe header.
    pub fn offset(&self) -> Offset {
        self.offset
    }

    pub fn header(&self) -> Result<KeyframeHeader> {
        self.stream.cache().header_at(self.stream.backend(), self.offset)
    }

    pub fn id(&self) -> Result<KeyframeId> {
        Ok(self.header()?.kf_num)
    }

    pub fn size(&self) -> Result<u32> {
        Ok(self.header()?.kf_size)
    }

    /// The payload bytes, borrowed from the backend when it allows.
    pub fn raw(&self) -> Result<Cow<'s, [u8]>> {
        let size = self.size()?;
        let backend = self.stream.backend();
        Ok(backend.read(self.offset + KeyframeHeader::SIZE as Offset, size as usize)?)
    }

    pub fn get<F: Factory>(&self) -> Result<F::Output> {
        Ok(F::build(&self.raw()?))
    }

    /// The deltas following this keyframe, in frame order.
    pub fn deltas(&self) -> Result<Deltas<'s, B, C>> {
        let header = self.header()?;
        let per_kf = u64::from(self.stream.frames_per_keyframe());
        let first = header
            .kf_num
            .checked_mul(per_kf)
            .filter(|first| first.checked_add(per_kf).is_some())
            .ok_or(StreamError::CorruptKeyframe {
                offset: self.offset,
                kf_num: header.kf_num,
            })?;
        Ok(Deltas {
            stream: self.stream,
            offset: header.delta_offset,
            frame_id: first + 1,
            end: cmp::min(self.stream.frame_count(), first + per_kf),
        })
    }
}

impl<B, C> Clone for Keyframe<'_, B, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B, C> Copy for Keyframe<'_, B, C> {}

impl<B, C> fmt::Debug for Keyframe<'_, B, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyframe").field("offset", &self.offset).finish()
    }
}

/// Iterator over keyframes in ascending order.
///
/// After an error the iterator is exhausted.
pub struct Keyframes<'s, B, C> {
    cursor: KeyframeCursor<'s, B, C>,
    started: bool,
}

impl<'s, B: Backend, C: Cache> Keyframes<'s, B, C> {
    pub(crate) fn new(cursor: KeyframeCursor<'s, B, C>) -> Self {
        Self {
            cursor,
            started: false,
        }
    }
}

impl<'s, B: Backend, C: Cache> Iterator for Keyframes<'s, B, C> {
    type Item = Result<Keyframe<'s, B, C>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_end() {
            return None;
        }
        if self.started {
            if let Err(err) = self.cursor.step() {
                self.cursor.offset = NO_KEYFRAME;
                return Some(Err(err));
            }
        }
        self.started = true;
        self.cursor.keyframe().map(Ok)
    }
}

impl<B, C> fmt::Debug for Keyframes<'_, B, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyframes")
            .field("cursor", &self.cursor)
            .field("started", &self.started)
            .finish()
    }
}

/// One delta frame.
pub struct Delta<'s, B, C> {
    stream: &'s Stream<B, C>,
    offset: Offset,
    frame_id: u64,
    size: DeltaSize,
}

impl<'s, B: Backend, C: Cache> Delta<'s, B, C> {
    /// File offset of the length prefix.
    pub fn offset(&self) -> Offset {
        self.offset
    }

    /// Position of this frame among all frames of the stream.
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn size(&self) -> DeltaSize {
        self.size
    }

    pub fn raw(&self) -> Result<Cow<'s, [u8]>> {
        let backend = self.stream.backend();
        Ok(backend.read(self.offset + DELTA_PREFIX, usize::from(self.size))?)
    }

    pub fn get<F: Factory>(&self) -> Result<F::Output> {
        Ok(F::build(&self.raw()?))
    }
}

impl<B, C> fmt::Debug for Delta<'_, B, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delta")
            .field("offset", &self.offset)
            .field("frame_id", &self.frame_id)
            .field("size", &self.size)
            .finish()
    }
}

/// Width of the length prefix in front of every delta.
pub(crate) const DELTA_PREFIX: Offset = std::mem::size_of::<DeltaSize>() as Offset;

/// Iterator over the deltas of one keyframe.
///
/// After an error the iterator is exhausted.
pub struct Deltas<'s, B, C> {
    stream: &'s Stream<B, C>,
    offset: Offset,
    frame_id: u64,
    end: u64,
}

impl<B, C> fmt::Debug for Deltas<'_, B, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deltas")
            .field("offset", &self.offset)
            .field("frame_id", &self.frame_id)
            .field("end", &self.end)
            .finish()
    }
}

impl<'s, B: Backend, C: Cache> Iterator for Deltas<'s, B, C> {
    type Item = Result<Delta<'s, B, C>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.frame_id >= self.end {
            return None;
        }
        let size = match self.stream.backend().read_num::<DeltaSize>(self.offset) {
            Ok(size) => size,
            Err(err) => {
                self.frame_id = self.end;
                return Some(Err(err.into()));
            }
        };
        let delta = Delta {
            stream: self.stream,
            offset: self.offset,
            frame_id: self.frame_id,
            size,
        };
        self.offset += DELTA_PREFIX + Offset::from(size);
        self.frame_id += 1;
        Some(Ok(delta))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = usize::try_from(self.end.saturating_sub(self.frame_id)).ok();
        (0, left)
    }
}
