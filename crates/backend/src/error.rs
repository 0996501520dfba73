use std::io;

use thiserror::Error;

/// An OS-level failure, tagged with the call that produced it.
#[derive(Debug, Error)]
#[error("{op} failed: {source}")]
pub struct IoError {
    op: &'static str,
    #[source]
    source: io::Error,
}

impl IoError {
    pub fn new(op: &'static str, source: io::Error) -> Self {
        Self { op, source }
    }

    /// The failing call (`pread`, `mremap`, `fallocate`, ...).
    pub fn op(&self) -> &'static str {
        self.op
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }

    /// The OS error code, when the failure came from the OS.
    pub fn raw_os_error(&self) -> Option<i32> {
        self.source.raw_os_error()
    }

    pub(crate) fn eof(op: &'static str, offset: u64, len: usize) -> Self {
        Self::new(
            op,
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("premature end of file reading {len} bytes at offset {offset}"),
            ),
        )
    }
}

/// Converts a file offset or length to `usize` for slicing and mapping.
pub(crate) fn to_usize(op: &'static str, value: u64) -> Result<usize, IoError> {
    usize::try_from(value).map_err(|_| {
        IoError::new(
            op,
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{value} does not fit in the address space"),
            ),
        )
    })
}
