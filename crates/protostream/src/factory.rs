//! Materializing payload bytes into caller types.
//!
//! The stream never interprets keyframe, delta or proto header payloads. The
//! `raw()` accessors hand out a byte view; `get::<F>()` passes that view
//! through a [`Factory`].

/// Builds a value out of a payload.
pub trait Factory {
    type Output;

    fn build(raw: &[u8]) -> Self::Output;
}

/// Copies the payload into an owned buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawFactory;

impl Factory for RawFactory {
    type Output = Vec<u8>;

    fn build(raw: &[u8]) -> Vec<u8> {
        raw.to_vec()
    }
}

/// Decodes the payload as UTF-8, replacing invalid sequences.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringFactory;

impl Factory for StringFactory {
    type Output = String;

    fn build(raw: &[u8]) -> String {
        String::from_utf8_lossy(raw).into_owned()
    }
}
