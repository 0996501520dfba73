//! Memoization of keyframe lookups.
//!
//! Every skiplist link that is read is remembered as "keyframe N lives at
//! offset X", so a later `advance` to N is a map lookup. [`FullCache`]
//! additionally keeps every decoded keyframe header.
//!
//! Caches are filled through `&self`: reading never needs a mutable stream.

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use backend::Backend;
use layout::{decode_be, Header, KeyframeHeader, KeyframeId, Offset, NO_KEYFRAME, SKIPLIST_HEIGHT};
use tracing::warn;

use crate::error::{Result, StreamError};

/// Keyframe number to file offset, filled as links are discovered.
#[derive(Debug, Default)]
pub struct OffsetMap {
    map: RefCell<HashMap<KeyframeId, Offset>>,
}

impl OffsetMap {
    pub fn get(&self, id: KeyframeId) -> Option<Offset> {
        self.map.borrow().get(&id).copied()
    }

    /// Records `id -> offset` unless `id` is already known.
    pub fn insert(&self, id: KeyframeId, offset: Offset) {
        self.map.borrow_mut().entry(id).or_insert(offset);
    }

    pub fn len(&self) -> usize {
        self.map.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lookup strategy for keyframe headers and skiplist links.
pub trait Cache: Default {
    fn offsets(&self) -> &OffsetMap;

    /// The keyframe header stored at `offset`.
    fn header_at<B: Backend>(&self, backend: &B, offset: Offset) -> Result<KeyframeHeader>;

    /// Offset of keyframe `id`, if it has been seen.
    fn offset_of(&self, id: KeyframeId) -> Option<Offset> {
        self.offsets().get(id)
    }

    /// The `level`th link of the keyframe at `offset`: the offset of keyframe
    /// `kf_num + 2^level`, or [`NO_KEYFRAME`].
    ///
    /// On a miss the whole skiplist is read at once and all its links are
    /// memoized. A link that does not point forward is reported as
    /// [`StreamError::BackLink`].
    ///
    /// # Panics
    ///
    /// Panics if `offset` is [`NO_KEYFRAME`] or `level >= SKIPLIST_HEIGHT`.
    fn link_at<B: Backend>(&self, backend: &B, offset: Offset, level: usize) -> Result<Offset> {
        assert!(level < SKIPLIST_HEIGHT, "skiplist level {level} out of range");
        assert_ne!(offset, NO_KEYFRAME, "link_at called on the end position");

        let kf_num = self.header_at(backend, offset)?.kf_num;
        // the furthest link must be representable
        if kf_num.checked_add(1 << (SKIPLIST_HEIGHT - 1)).is_none() {
            warn!(offset, kf_num, "keyframe number out of range");
            return Err(StreamError::CorruptKeyframe { offset, kf_num });
        }
        let offsets = self.offsets();
        if let Some(target) = offsets.get(kf_num + (1 << level)) {
            return Ok(target);
        }

        offsets.insert(kf_num, offset);
        let links = backend.read(
            offset + KeyframeHeader::skiplist_offset(0) as Offset,
            8 * SKIPLIST_HEIGHT,
        )?;
        let mut found = NO_KEYFRAME;
        for (i, raw) in links.chunks_exact(8).enumerate() {
            let target: Offset = decode_be(raw);
            if target == NO_KEYFRAME {
                continue;
            }
            if target <= offset {
                warn!(offset, level = i, target, "skiplist link points backwards");
                return Err(StreamError::BackLink {
                    offset,
                    level: i,
                    target,
                });
            }
            offsets.insert(kf_num + (1 << i), target);
            if i == level {
                found = target;
            }
        }
        Ok(found)
    }
}

/// Memoizes offsets only; headers are re-read on every access.
#[derive(Debug, Default)]
pub struct OffsetsOnlyCache {
    offsets: OffsetMap,
}

impl Cache for OffsetsOnlyCache {
    fn offsets(&self) -> &OffsetMap {
        &self.offsets
    }

    fn header_at<B: Backend>(&self, backend: &B, offset: Offset) -> Result<KeyframeHeader> {
        read_keyframe_header(backend, offset)
    }
}

/// Memoizes offsets and every keyframe header read.
#[derive(Debug, Default)]
pub struct FullCache {
    offsets: OffsetMap,
    headers: RefCell<HashMap<Offset, KeyframeHeader>>,
}

impl FullCache {
    pub fn cached_headers(&self) -> usize {
        self.headers.borrow().len()
    }
}

impl Cache for FullCache {
    fn offsets(&self) -> &OffsetMap {
        &self.offsets
    }

    fn header_at<B: Backend>(&self, backend: &B, offset: Offset) -> Result<KeyframeHeader> {
        if let Some(header) = self.headers.borrow().get(&offset) {
            return Ok(*header);
        }
        let header = read_keyframe_header(backend, offset)?;
        match self.headers.borrow_mut().entry(offset) {
            Entry::Occupied(e) => Ok(*e.get()),
            Entry::Vacant(e) => Ok(*e.insert(header)),
        }
    }
}

fn read_keyframe_header<B: Backend>(backend: &B, offset: Offset) -> Result<KeyframeHeader> {
    let raw = backend.read(offset, KeyframeHeader::SIZE)?;
    Ok(KeyframeHeader::decode(&raw)?)
}
