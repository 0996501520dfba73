use std::borrow::Cow;
use std::path::Path;

use layout::{BeInt, Offset};

use crate::error::IoError;
use crate::file::{FileHandle, Mode, ReadAppend};
use crate::{Backend, BackendMut};

/// A backend doing one positioned syscall per access.
///
/// Nothing is cached: every [`read`](Backend::read) allocates a fresh buffer
/// and every [`size`](Backend::size) asks the OS.
#[derive(Debug)]
pub struct SyscallBackend<M: Mode> {
    file: FileHandle<M>,
}

impl<M: Mode> SyscallBackend<M> {
    pub fn file(&self) -> &FileHandle<M> {
        &self.file
    }
}

impl<M: Mode> Backend for SyscallBackend<M> {
    fn open<P: AsRef<Path>>(path: P) -> Result<Self, IoError> {
        Ok(Self {
            file: FileHandle::open(path)?,
        })
    }

    fn read(&self, offset: Offset, len: usize) -> Result<Cow<'_, [u8]>, IoError> {
        // bounds first: a corrupt length must not size the buffer
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.file.size()? => {}
            _ => return Err(IoError::eof("pread", offset, len)),
        }
        let mut buf = vec![0u8; len];
        self.file.read_at(offset, &mut buf)?;
        Ok(Cow::Owned(buf))
    }

    fn read_small<T: BeInt>(&self, offset: Offset) -> Result<T::Bytes, IoError> {
        let mut bytes = T::Bytes::default();
        self.file.read_at(offset, bytes.as_mut())?;
        Ok(bytes)
    }

    fn size(&self) -> Result<u64, IoError> {
        self.file.size()
    }
}

impl BackendMut for SyscallBackend<ReadAppend> {
    fn create<P: AsRef<Path>>(path: P) -> Result<Self, IoError> {
        Ok(Self {
            file: FileHandle::create(path)?,
        })
    }

    fn write(&mut self, offset: Offset, bytes: &[u8]) -> Result<(), IoError> {
        self.file.write_at(offset, bytes)
    }

    fn write_small<T: BeInt>(&mut self, offset: Offset, bytes: T::Bytes) -> Result<(), IoError> {
        self.file.write_at(offset, bytes.as_ref())
    }

    fn sync(&mut self) -> Result<(), IoError> {
        self.file.sync()
    }
}
