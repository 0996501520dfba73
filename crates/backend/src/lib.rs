//! # Backend: byte-addressable storage for protostream files
//!
//! Everything above this crate talks to a file through the [`Backend`]
//! contract: read `len` bytes at an offset, write bytes at an offset, query
//! the logical size. Two strategies implement it:
//!
//! - [`SyscallBackend`]: one `pread`/`pwrite` per access, a fresh buffer per read.
//! - [`MmapBackend`]: the file is mapped; reads borrow straight from the
//!   mapping and writes past the end grow file and mapping in
//!   granularity-sized steps.
//!
//! Read-only instantiations (`Mode = ReadOnly`) do not implement
//! [`BackendMut`], so writing to them is a compile error.
//!
//! ```ignore
//! use backend::{Backend, BackendMut, MmapBackend, ReadAppend};
//!
//! let mut backend = MmapBackend::<ReadAppend>::create("frames.ps")?;
//! backend.write(0, b"PROTOSTR")?;
//! backend.write_num::<u64>(8, 42)?;
//! assert_eq!(backend.read_num::<u64>(8)?, 42);
//! ```

use std::borrow::Cow;
use std::path::Path;

use layout::{decode_be, encode_be, BeInt, FieldSink, Offset};

mod error;
mod file;
mod mmap;
mod syscall;

pub use error::IoError;
pub use file::{FileHandle, Mode, ReadAppend, ReadOnly};
pub use mmap::{MmapBackend, DEFAULT_EXPANSION_GRANULARITY};
pub use syscall::SyscallBackend;

/// Read access to a file as a flat byte array.
pub trait Backend: Sized {
    /// Opens an existing file.
    fn open<P: AsRef<Path>>(path: P) -> Result<Self, IoError>;

    /// Reads `len` bytes at `offset`.
    ///
    /// Borrowed views point into a live mapping and cannot outlive the next
    /// mutating call.
    fn read(&self, offset: Offset, len: usize) -> Result<Cow<'_, [u8]>, IoError>;

    /// Reads the raw (still big-endian) bytes of one integer.
    fn read_small<T: BeInt>(&self, offset: Offset) -> Result<T::Bytes, IoError>;

    /// Logical size: the end of the valid data.
    fn size(&self) -> Result<u64, IoError>;

    fn read_num<T: BeInt>(&self, offset: Offset) -> Result<T, IoError> {
        self.read_small::<T>(offset)
            .map(|bytes| decode_be(bytes.as_ref()))
    }
}

/// Write access, only implemented for `ReadAppend` backends.
pub trait BackendMut: Backend {
    /// Creates a new file. Fails if it already exists.
    fn create<P: AsRef<Path>>(path: P) -> Result<Self, IoError>;

    /// Writes `bytes` at `offset`, extending the file if needed.
    fn write(&mut self, offset: Offset, bytes: &[u8]) -> Result<(), IoError>;

    /// Writes the raw (already big-endian) bytes of one integer.
    fn write_small<T: BeInt>(&mut self, offset: Offset, bytes: T::Bytes) -> Result<(), IoError>;

    /// Flushes written data to stable storage.
    fn sync(&mut self) -> Result<(), IoError>;

    fn write_num<T: BeInt>(&mut self, offset: Offset, value: T) -> Result<(), IoError> {
        self.write_small::<T>(offset, encode_be(value))
    }

    /// A header sink writing field by field at `base`.
    fn at(&mut self, base: Offset) -> At<'_, Self> {
        At {
            backend: self,
            base,
        }
    }
}

/// A [`BackendMut`] positioned at a header's file offset.
pub struct At<'a, B> {
    backend: &'a mut B,
    base: Offset,
}

impl<B: BackendMut> FieldSink for At<'_, B> {
    type Error = IoError;

    fn put(&mut self, offset: usize, bytes: &[u8]) -> Result<(), IoError> {
        self.backend.write(self.base + offset as Offset, bytes)
    }
}
