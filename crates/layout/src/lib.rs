//! # Layout: fixed binary headers of the protostream format
//!
//! A protostream file is an append-only sequence of keyframes, each followed
//! by a run of small deltas. This crate describes the two fixed-size headers
//! of the format and the big-endian codec underneath them.
//!
//! ## File layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ FILE HEADER (56 bytes, offset 0)                             │
//! │                                                              │
//! │ "PROTOSTR" | file_size (u64) | proto_header_offset (u64)     │
//! │ kf0_offset (u64) | keyframe_count (u64) | frame_count (u64)  │
//! │ frames_per_kf (u32) | reserved (4 bytes)                     │
//! ├──────────────────────────────────────────────────────────────┤
//! │ PROTO HEADER (opaque, proto_header_offset..kf0_offset)       │
//! ├──────────────────────────────────────────────────────────────┤
//! │ KEYFRAME HEADER (100 bytes)                                  │
//! │                                                              │
//! │ kf_num (u64) | delta_offset (u64) | skiplist[10] (u64 each)  │
//! │ kf_size (u32)                                                │
//! ├──────────────────────────────────────────────────────────────┤
//! │ KEYFRAME PAYLOAD (kf_size bytes)                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ DELTA: len (u16) | payload                                   │
//! │ ... frames_per_kf - 1 deltas ...                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ ... next keyframe ...                                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian. `skiplist[i]` holds the offset of keyframe
//! `kf_num + 2^i`, or [`NO_KEYFRAME`] if that keyframe does not exist yet.

mod codec;
mod field;
mod header;

pub use codec::{decode_be, decode_be_aligned, encode_be, encode_be_aligned, BeInt};
pub use field::{Field, FieldSink, Layout, LayoutError, Magic, Placeholder, Span};
pub use header::{FileHeader, Header, KeyframeHeader, SKIPLIST_HEIGHT};

/// Byte offset inside a protostream file.
pub type Offset = u64;

/// Sequence number of a keyframe, starting at 0.
pub type KeyframeId = u64;

/// Length prefix of a delta record.
pub type DeltaSize = u16;

/// Skiplist sentinel: the linked keyframe does not exist (yet).
///
/// Offset 0 always holds the file header, so no keyframe can live there.
pub const NO_KEYFRAME: Offset = 0;
