//! # Protostream: append-only keyframe/delta files
//!
//! A protostream file holds a sequence of frames. Every `frames_per_kf`th
//! frame is a self-contained keyframe, the frames in between are small deltas
//! against it:
//!
//! ```text
//! [file header][proto header][kf 0][d][d]...[kf 1][d][d]...[kf n][d]...
//! ```
//!
//! Each keyframe header carries a 10-level skiplist of forward links
//! (level `i` points at keyframe `id + 2^i`), which gives logarithmic access
//! to any keyframe by number. Links are filled in as later keyframes are
//! appended.
//!
//! [`Stream`] is generic over the I/O strategy (see the `backend` crate) and
//! over the lookup [`Cache`]. The common combinations have aliases:
//!
//! ```ignore
//! use protostream::{MmapReader, SyscallWriter, StringFactory};
//!
//! let mut writer = SyscallWriter::create("frames.ps", 2, b"schema v1")?;
//! writer.append_keyframe(b"full frame")?;
//! writer.append_delta(b"small change")?;
//! drop(writer);
//!
//! let reader = MmapReader::open("frames.ps")?;
//! for keyframe in reader.keyframes() {
//!     let keyframe = keyframe?;
//!     println!("{}", keyframe.get::<StringFactory>()?);
//!     for delta in keyframe.deltas()? {
//!         println!("  {}", delta?.get::<StringFactory>()?);
//!     }
//! }
//! ```

use backend::{MmapBackend, ReadAppend, ReadOnly, SyscallBackend};

mod cache;
mod error;
mod factory;
mod iter;
mod stream;
#[cfg(test)]
mod testing;

pub use cache::{Cache, FullCache, OffsetMap, OffsetsOnlyCache};
pub use error::{FormatError, Result, StreamError};
pub use factory::{Factory, RawFactory, StringFactory};
pub use iter::{Delta, Deltas, Keyframe, KeyframeCursor, Keyframes};
pub use stream::Stream;

/// Mapped writer. The mapping already avoids syscalls, so only offsets are
/// cached.
pub type MmapWriter = Stream<MmapBackend<ReadAppend>, OffsetsOnlyCache>;
pub type MmapReader = Stream<MmapBackend<ReadOnly>, OffsetsOnlyCache>;
/// Syscall writer. Every header read is a `pread`, so headers are cached too.
pub type SyscallWriter = Stream<SyscallBackend<ReadAppend>, FullCache>;
pub type SyscallReader = Stream<SyscallBackend<ReadOnly>, FullCache>;
