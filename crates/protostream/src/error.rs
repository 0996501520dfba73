use backend::IoError;
use layout::{LayoutError, Offset};
use thiserror::Error;

/// The file is not a well-formed protostream file. Detected at open.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("file too small: {size} bytes, the file header alone needs {needed}")]
    FileTooSmall { size: u64, needed: u64 },
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("file size {actual} not consistent with the {declared} bytes declared in the header")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("invalid proto header offset {offset} in a file of {file_size} bytes")]
    ProtoHeaderOffset { offset: Offset, file_size: u64 },
    #[error("invalid keyframe 0 offset {offset} in a file of {file_size} bytes")]
    Kf0Offset { offset: Offset, file_size: u64 },
    #[error("proto header at {proto_header_offset} is placed after keyframe 0 at {kf0_offset}")]
    ProtoHeaderAfterKf0 {
        proto_header_offset: Offset,
        kf0_offset: Offset,
    },
    #[error("frames per keyframe is zero")]
    ZeroFramesPerKeyframe,
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("format error: {0}")]
    Format(#[from] FormatError),
    #[error(transparent)]
    Io(#[from] IoError),
    #[error("back link found: keyframe at {offset} links level {level} back to {target}")]
    BackLink {
        offset: Offset,
        level: usize,
        target: Offset,
    },
    #[error("corrupt keyframe at {offset}: keyframe number {kf_num} is out of range")]
    CorruptKeyframe { offset: Offset, kf_num: u64 },
    #[error("payload of {len} bytes exceeds the limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },
}

impl From<LayoutError> for StreamError {
    fn from(err: LayoutError) -> Self {
        StreamError::Format(FormatError::Layout(err))
    }
}

pub type Result<T, E = StreamError> = std::result::Result<T, E>;
