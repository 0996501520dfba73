//! RAII wrapper around one open file.
//!
//! The open mode is part of the type: [`FileHandle<ReadOnly>`] has no write,
//! growth or truncation methods at all.

use std::fs::{File, OpenOptions};
use std::io;
use std::marker::PhantomData;
use std::ops::Deref;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut, MmapOptions};
use tracing::debug;

use crate::error::IoError;

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::ReadOnly {}
    impl Sealed for super::ReadAppend {}
}

/// How a file is opened, and what a mapping of it looks like.
pub trait Mode: sealed::Sealed + 'static {
    const WRITABLE: bool;

    /// A live mapping of the file.
    type Map: Deref<Target = [u8]>;

    fn open_options() -> OpenOptions;

    /// Maps the first `len` bytes of `file`. `len` must be non-zero.
    fn map(file: &File, len: usize) -> io::Result<Self::Map>;
}

/// Opened for reading only; mappings are read-only.
#[derive(Debug)]
pub enum ReadOnly {}

/// Opened for reading and appending; mappings are shared and writable.
#[derive(Debug)]
pub enum ReadAppend {}

impl Mode for ReadOnly {
    const WRITABLE: bool = false;
    type Map = Mmap;

    fn open_options() -> OpenOptions {
        let mut options = OpenOptions::new();
        options.read(true);
        options
    }

    fn map(file: &File, len: usize) -> io::Result<Mmap> {
        // SAFETY: single-writer model; nothing truncates the file while mapped.
        unsafe { MmapOptions::new().len(len).map(file) }
    }
}

impl Mode for ReadAppend {
    const WRITABLE: bool = true;
    type Map = MmapMut;

    fn open_options() -> OpenOptions {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        options
    }

    fn map(file: &File, len: usize) -> io::Result<MmapMut> {
        // SAFETY: see ReadOnly::map; this handle is the only writer.
        unsafe { MmapOptions::new().len(len).map_mut(file) }
    }
}

/// Owns exactly one file descriptor, closed on drop.
#[derive(Debug)]
pub struct FileHandle<M: Mode> {
    file: File,
    path: PathBuf,
    _mode: PhantomData<M>,
}

impl<M: Mode> FileHandle<M> {
    /// Opens an existing file. Never creates one.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let file = M::open_options()
            .open(&path)
            .map_err(|e| IoError::new("open", e))?;
        debug!(path = %path.display(), writable = M::WRITABLE, "opened file");
        Ok(Self {
            file,
            path,
            _mode: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fills `into` with the bytes starting at `offset`, looping over short
    /// reads. Hitting end of file first is an `UnexpectedEof` error.
    pub fn read_at(&self, offset: u64, into: &mut [u8]) -> Result<(), IoError> {
        let mut done = 0;
        while done < into.len() {
            match self.file.read_at(&mut into[done..], offset + done as u64) {
                Ok(0) => return Err(IoError::eof("pread", offset, into.len())),
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(IoError::new("pread", e)),
            }
        }
        Ok(())
    }

    pub fn size(&self) -> Result<u64, IoError> {
        self.file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|e| IoError::new("fstat", e))
    }

    /// Maps the first `len` bytes. An empty file has no mapping.
    pub fn mmap(&self, len: usize) -> Result<Option<M::Map>, IoError> {
        if len == 0 {
            return Ok(None);
        }
        M::map(&self.file, len)
            .map(Some)
            .map_err(|e| IoError::new("mmap", e))
    }

    pub(crate) fn set_len(&self, new_size: u64) -> Result<(), IoError> {
        self.file
            .set_len(new_size)
            .map_err(|e| IoError::new("ftruncate", e))
    }
}

impl FileHandle<ReadAppend> {
    /// Creates a new file. Fails if `path` already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| IoError::new("open", e))?;
        debug!(path = %path.display(), "created file");
        Ok(Self {
            file,
            path,
            _mode: PhantomData,
        })
    }

    /// Writes all of `from` at `offset`, looping over short writes. Writing
    /// past the end leaves a zero-filled gap.
    pub fn write_at(&mut self, offset: u64, from: &[u8]) -> Result<(), IoError> {
        let mut done = 0;
        while done < from.len() {
            match self.file.write_at(&from[done..], offset + done as u64) {
                Ok(0) => {
                    return Err(IoError::new(
                        "pwrite",
                        io::Error::from(io::ErrorKind::WriteZero),
                    ))
                }
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(IoError::new("pwrite", e)),
            }
        }
        Ok(())
    }

    /// Resizes `map` from `old_len` to `new_len` bytes.
    ///
    /// Uses `mremap` where the platform has it; elsewhere the old mapping is
    /// dropped and the file mapped again. Either way every slice borrowed from
    /// the old mapping is gone by the time this returns.
    pub fn mremap(
        &self,
        map: &mut Option<MmapMut>,
        old_len: usize,
        new_len: usize,
    ) -> Result<(), IoError> {
        debug_assert_eq!(map.as_ref().map_or(0, |m| m.len()), old_len);

        #[cfg(target_os = "linux")]
        if let Some(mapping) = map.as_mut() {
            use memmap2::RemapOptions;

            // SAFETY: the mapping is exclusively borrowed, so no slice into it
            // is alive across the move.
            return unsafe { mapping.remap(new_len, RemapOptions::new().may_move(true)) }
                .map_err(|e| IoError::new("mremap", e));
        }

        *map = None;
        *map = self.mmap(new_len)?;
        Ok(())
    }

    /// Grows the file from `current_size` by `extra` bytes of zeroes.
    pub fn expand(&mut self, current_size: u64, extra: u64) -> Result<(), IoError> {
        if extra == 0 {
            return Ok(());
        }
        self.allocate(current_size, extra)
    }

    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    fn allocate(&mut self, current_size: u64, extra: u64) -> Result<(), IoError> {
        use std::os::fd::AsRawFd;

        let (offset, len) = match (
            libc::off_t::try_from(current_size),
            libc::off_t::try_from(extra),
        ) {
            (Ok(offset), Ok(len)) => (offset, len),
            _ => return Err(IoError::new("fallocate", io::Error::from(io::ErrorKind::InvalidInput))),
        };
        // SAFETY: the descriptor is owned by `self.file` and open for writing.
        let ret = unsafe { libc::posix_fallocate(self.file.as_raw_fd(), offset, len) };
        if ret != 0 {
            return Err(IoError::new("fallocate", io::Error::from_raw_os_error(ret)));
        }
        Ok(())
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    fn allocate(&mut self, current_size: u64, extra: u64) -> Result<(), IoError> {
        self.write_at(current_size + extra - 1, &[0])
    }

    pub fn truncate(&mut self, new_size: u64) -> Result<(), IoError> {
        self.set_len(new_size)
    }

    pub fn sync(&self) -> Result<(), IoError> {
        self.file.sync_all().map_err(|e| IoError::new("fsync", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs;
    use tempfile::tempdir;

    fn make_file(dir: &Path, payload: &[u8]) -> PathBuf {
        let path = dir.join("payload.bin");
        fs::write(&path, payload).unwrap();
        path
    }

    // -------------------- Open / create --------------------

    #[test]
    fn open_missing_file_fails() {
        let dir = tempdir().unwrap();
        let err = FileHandle::<ReadOnly>::open(dir.path().join("missing")).unwrap_err();
        assert_eq!(err.op(), "open");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn open_append_does_not_create() {
        let dir = tempdir().unwrap();
        assert!(FileHandle::<ReadAppend>::open(dir.path().join("missing")).is_err());
    }

    #[test]
    fn create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = make_file(dir.path(), b"keep me");

        let err = FileHandle::create(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&path).unwrap(), b"keep me");
    }

    // -------------------- Read / write --------------------

    #[test]
    fn write_past_end_leaves_zero_gap() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("gap.bin");
        let mut handle = FileHandle::create(&path)?;

        handle.write_at(42, b"proto")?;

        let contents = fs::read(&path)?;
        assert_eq!(contents.len(), 47);
        assert!(contents[..42].iter().all(|&b| b == 0));
        assert_eq!(&contents[42..], b"proto");
        Ok(())
    }

    #[test]
    fn size_and_read() -> Result<()> {
        let dir = tempdir()?;
        let path = make_file(dir.path(), b"Hello world");
        let handle = FileHandle::<ReadOnly>::open(&path)?;

        assert_eq!(handle.size()?, 11);

        let mut buf = [0u8; 6];
        handle.read_at(3, &mut buf)?;
        assert_eq!(&buf, b"lo wor");
        Ok(())
    }

    #[test]
    fn read_past_end_is_unexpected_eof() -> Result<()> {
        let dir = tempdir()?;
        let path = make_file(dir.path(), b"short");
        let handle = FileHandle::<ReadOnly>::open(&path)?;

        let mut buf = [0u8; 8];
        let err = handle.read_at(2, &mut buf).unwrap_err();
        assert_eq!(err.op(), "pread");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        Ok(())
    }

    // -------------------- Mapping --------------------

    #[test]
    fn mmap_read() -> Result<()> {
        let dir = tempdir()?;
        let path = make_file(dir.path(), b"Hello world");
        let handle = FileHandle::<ReadOnly>::open(&path)?;

        let map = handle.mmap(handle.size()? as usize)?.expect("non-empty file");
        assert_eq!(&map[..], b"Hello world");
        Ok(())
    }

    #[test]
    fn mmap_empty_file_is_none() -> Result<()> {
        let dir = tempdir()?;
        let path = make_file(dir.path(), b"");
        let handle = FileHandle::<ReadOnly>::open(&path)?;
        assert!(handle.mmap(0)?.is_none());
        Ok(())
    }

    #[test]
    fn expand_then_mremap_keeps_contents() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("grow.bin");
        let mut handle = FileHandle::create(&path)?;
        handle.write_at(0, b"abcd")?;

        let mut map = handle.mmap(4)?;
        handle.expand(4, 4092)?;
        assert_eq!(handle.size()?, 4096);

        handle.mremap(&mut map, 4, 4096)?;
        let map = map.expect("mapping survives remap");
        assert_eq!(map.len(), 4096);
        assert_eq!(&map[..4], b"abcd");
        assert!(map[4..].iter().all(|&b| b == 0));
        Ok(())
    }

    #[test]
    fn mremap_from_nothing_maps() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("fresh.bin");
        let mut handle = FileHandle::create(&path)?;
        handle.expand(0, 16)?;

        let mut map = None;
        handle.mremap(&mut map, 0, 16)?;
        assert_eq!(map.map(|m| m.len()), Some(16));
        Ok(())
    }

    #[test]
    fn truncate_shrinks() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("trim.bin");
        let mut handle = FileHandle::create(&path)?;
        handle.write_at(0, &[7u8; 100])?;

        handle.truncate(10)?;
        handle.sync()?;
        assert_eq!(fs::read(&path)?, vec![7u8; 10]);
        Ok(())
    }
}
