//! Test helpers shared by the unit tests.

use std::borrow::Cow;
use std::cell::Cell;
use std::path::Path;

use backend::{Backend, BackendMut, IoError};
use layout::{BeInt, Offset};

/// Wraps a backend and counts read calls.
pub struct CountingBackend<B> {
    inner: B,
    reads: Cell<usize>,
}

impl<B> CountingBackend<B> {
    pub fn reads(&self) -> usize {
        self.reads.get()
    }

    fn hit(&self) {
        self.reads.set(self.reads.get() + 1);
    }
}

impl<B: Backend> Backend for CountingBackend<B> {
    fn open<P: AsRef<Path>>(path: P) -> Result<Self, IoError> {
        Ok(Self {
            inner: B::open(path)?,
            reads: Cell::new(0),
        })
    }

    fn read(&self, offset: Offset, len: usize) -> Result<Cow<'_, [u8]>, IoError> {
        self.hit();
        self.inner.read(offset, len)
    }

    fn read_small<T: BeInt>(&self, offset: Offset) -> Result<T::Bytes, IoError> {
        self.hit();
        self.inner.read_small::<T>(offset)
    }

    fn size(&self) -> Result<u64, IoError> {
        self.inner.size()
    }
}

impl<B: BackendMut> BackendMut for CountingBackend<B> {
    fn create<P: AsRef<Path>>(path: P) -> Result<Self, IoError> {
        Ok(Self {
            inner: B::create(path)?,
            reads: Cell::new(0),
        })
    }

    fn write(&mut self, offset: Offset, bytes: &[u8]) -> Result<(), IoError> {
        self.inner.write(offset, bytes)
    }

    fn write_small<T: BeInt>(&mut self, offset: Offset, bytes: T::Bytes) -> Result<(), IoError> {
        self.inner.write_small::<T>(offset, bytes)
    }

    fn sync(&mut self) -> Result<(), IoError> {
        self.inner.sync()
    }
}
