use std::borrow::Cow;
use std::io;
use std::path::Path;

use layout::{BeInt, Offset};
use tracing::{debug, error};

use crate::error::{to_usize, IoError};
use crate::file::{FileHandle, Mode, ReadAppend};
use crate::{Backend, BackendMut};

/// Default step by which a growing mapping is extended.
pub const DEFAULT_EXPANSION_GRANULARITY: u64 = 1024 * 1024;

/// A backend reading and writing through a live mapping of the whole file.
///
/// Two sizes are tracked: `used_size` is the end of valid data, `file_size`
/// the length of the file and of the mapping. A write past `file_size`
/// grows both by a multiple of the expansion granularity, so most appends
/// are plain memory copies. When a `ReadAppend` backend is dropped the file
/// is truncated back to `used_size`.
///
/// Reads borrow from the mapping. Growing may move it, which is why every
/// write takes `&mut self`: no borrowed view survives a write.
#[derive(Debug)]
pub struct MmapBackend<M: Mode> {
    map: Option<M::Map>,
    file: FileHandle<M>,
    used_size: u64,
    file_size: u64,
    granularity: u64,
}

impl<M: Mode> MmapBackend<M> {
    /// Opens an existing file, growing in steps of `granularity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `granularity` is zero.
    pub fn open_with_granularity<P: AsRef<Path>>(path: P, granularity: u64) -> Result<Self, IoError> {
        assert!(granularity > 0, "expansion granularity must be positive");
        let file = FileHandle::<M>::open(path)?;
        let file_size = file.size()?;
        let map = file.mmap(to_usize("mmap", file_size)?)?;
        debug!(path = %file.path().display(), file_size, "mapped file");
        Ok(Self {
            map,
            file,
            used_size: file_size,
            file_size,
            granularity,
        })
    }

    /// Length of the file and of the mapping, slack included.
    pub fn mapped_size(&self) -> u64 {
        self.file_size
    }

    pub fn granularity(&self) -> u64 {
        self.granularity
    }

    fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    fn range(&self, offset: Offset, len: usize) -> Result<(usize, usize), IoError> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.used_size => Ok((offset as usize, end as usize)),
            _ => Err(IoError::eof("read", offset, len)),
        }
    }
}

impl MmapBackend<ReadAppend> {
    /// Creates a new file, growing in steps of `granularity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `granularity` is zero.
    pub fn create_with_granularity<P: AsRef<Path>>(path: P, granularity: u64) -> Result<Self, IoError> {
        assert!(granularity > 0, "expansion granularity must be positive");
        Ok(Self {
            map: None,
            file: FileHandle::create(path)?,
            used_size: 0,
            file_size: 0,
            granularity,
        })
    }

    /// Makes `[0, new_end)` writable and marks it as used.
    fn check_expand(&mut self, new_end: u64) -> Result<(), IoError> {
        if new_end <= self.file_size {
            self.used_size = self.used_size.max(new_end);
            return Ok(());
        }

        let extra = round_up(new_end - self.file_size, self.granularity);
        let new_size = self.file_size + extra;
        self.file.expand(self.file_size, extra)?;
        self.file.mremap(
            &mut self.map,
            to_usize("mremap", self.file_size)?,
            to_usize("mremap", new_size)?,
        )?;
        debug!(
            path = %self.file.path().display(),
            from = self.file_size,
            to = new_size,
            "grew mapping"
        );
        self.file_size = new_size;
        self.used_size = new_end;
        Ok(())
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self.map.as_deref_mut().unwrap_or(&mut [])
    }
}

impl<M: Mode> Backend for MmapBackend<M> {
    fn open<P: AsRef<Path>>(path: P) -> Result<Self, IoError> {
        Self::open_with_granularity(path, DEFAULT_EXPANSION_GRANULARITY)
    }

    fn read(&self, offset: Offset, len: usize) -> Result<Cow<'_, [u8]>, IoError> {
        let (start, end) = self.range(offset, len)?;
        Ok(Cow::Borrowed(&self.bytes()[start..end]))
    }

    fn read_small<T: BeInt>(&self, offset: Offset) -> Result<T::Bytes, IoError> {
        let (start, end) = self.range(offset, T::WIDTH)?;
        let mut bytes = T::Bytes::default();
        bytes.as_mut().copy_from_slice(&self.bytes()[start..end]);
        Ok(bytes)
    }

    fn size(&self) -> Result<u64, IoError> {
        Ok(self.used_size)
    }
}

impl BackendMut for MmapBackend<ReadAppend> {
    fn create<P: AsRef<Path>>(path: P) -> Result<Self, IoError> {
        Self::create_with_granularity(path, DEFAULT_EXPANSION_GRANULARITY)
    }

    fn write(&mut self, offset: Offset, bytes: &[u8]) -> Result<(), IoError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let end = offset.checked_add(bytes.len() as u64).ok_or_else(|| {
            IoError::new("write", io::Error::from(io::ErrorKind::InvalidInput))
        })?;
        self.check_expand(end)?;
        self.bytes_mut()[offset as usize..end as usize].copy_from_slice(bytes);
        Ok(())
    }

    fn write_small<T: BeInt>(&mut self, offset: Offset, bytes: T::Bytes) -> Result<(), IoError> {
        self.write(offset, bytes.as_ref())
    }

    fn sync(&mut self) -> Result<(), IoError> {
        if let Some(map) = &self.map {
            map.flush().map_err(|e| IoError::new("msync", e))?;
        }
        self.file.sync()
    }
}

impl<M: Mode> Drop for MmapBackend<M> {
    fn drop(&mut self) {
        self.map = None;
        if M::WRITABLE && self.used_size < self.file_size {
            debug!(
                path = %self.file.path().display(),
                used = self.used_size,
                mapped = self.file_size,
                "trimming mapping slack"
            );
            if let Err(err) = self.file.set_len(self.used_size) {
                error!(path = %self.file.path().display(), %err, "failed to trim file");
            }
        }
    }
}

/// Rounds `value` up to the next multiple of `granularity`.
fn round_up(value: u64, granularity: u64) -> u64 {
    value.div_ceil(granularity) * granularity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::ReadOnly;
    use anyhow::Result;
    use std::fs;
    use tempfile::tempdir;

    // -------------------- Rounding --------------------

    #[test]
    fn round_up_to_granularity() {
        assert_eq!(round_up(1, 1024), 1024);
        assert_eq!(round_up(1024, 1024), 1024);
        assert_eq!(round_up(1025, 1024), 2048);
        assert_eq!(round_up(7, 1), 7);
    }

    // -------------------- Growth --------------------

    #[test]
    fn first_write_maps_one_granule() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("grow.bin");

        let mut backend = MmapBackend::create_with_granularity(&path, 4096)?;
        assert_eq!(backend.mapped_size(), 0);

        backend.write(0, b"abc")?;
        assert_eq!(backend.size()?, 3);
        assert_eq!(backend.mapped_size(), 4096);
        assert_eq!(fs::metadata(&path)?.len(), 4096);
        Ok(())
    }

    #[test]
    fn writes_inside_slack_do_not_grow() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("slack.bin");

        let mut backend = MmapBackend::create_with_granularity(&path, 4096)?;
        backend.write(0, &[1; 100])?;
        backend.write(100, &[2; 3996])?;
        assert_eq!(backend.size()?, 4096);
        assert_eq!(backend.mapped_size(), 4096);
        Ok(())
    }

    #[test]
    fn write_across_several_granules() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("big.bin");
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let mut backend = MmapBackend::create_with_granularity(&path, 4096)?;
        backend.write(0, b"x")?;
        backend.write(1, &payload)?;
        assert_eq!(backend.mapped_size(), 12_288);
        assert_eq!(&*backend.read(1, payload.len())?, &payload[..]);
        Ok(())
    }

    #[test]
    fn growth_preserves_earlier_bytes() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("keep.bin");

        let mut backend = MmapBackend::create_with_granularity(&path, 64)?;
        for i in 0..100u8 {
            backend.write(u64::from(i) * 10, &[i; 10])?;
        }
        for i in 0..100u8 {
            assert_eq!(&*backend.read(u64::from(i) * 10, 10)?, &[i; 10]);
        }
        Ok(())
    }

    // -------------------- Drop --------------------

    #[test]
    fn drop_truncates_slack() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("trim.bin");

        {
            let mut backend = MmapBackend::<ReadAppend>::create(&path)?;
            backend.write(0, b"protostream")?;
            assert_eq!(backend.mapped_size(), DEFAULT_EXPANSION_GRANULARITY);
        }
        assert_eq!(fs::read(&path)?, b"protostream");
        Ok(())
    }

    #[test]
    fn read_only_never_resizes() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("ro.bin");
        fs::write(&path, b"fixed")?;

        {
            let backend = MmapBackend::<ReadOnly>::open(&path)?;
            assert!(matches!(backend.read(0, 5)?, Cow::Borrowed(b"fixed")));
            assert_eq!(backend.mapped_size(), 5);
        }
        assert_eq!(fs::read(&path)?, b"fixed");
        Ok(())
    }

    #[test]
    fn open_empty_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("empty.bin");
        fs::write(&path, b"")?;

        let backend = MmapBackend::<ReadOnly>::open(&path)?;
        assert_eq!(backend.size()?, 0);
        assert_eq!(backend.read(0, 0)?.len(), 0);
        assert!(backend.read(0, 1).is_err());
        Ok(())
    }

    #[test]
    fn reopen_and_append() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("reopen.bin");

        {
            let mut backend = MmapBackend::<ReadAppend>::create(&path)?;
            backend.write(0, b"first")?;
        }
        {
            let mut backend = MmapBackend::<ReadAppend>::open_with_granularity(&path, 16)?;
            assert_eq!(backend.size()?, 5);
            backend.write(5, b"+second")?;
            backend.sync()?;
        }
        assert_eq!(fs::read(&path)?, b"first+second");
        Ok(())
    }
}
