//! Error types for table compilation and remapping

use crate::frame::ImageSize;

/// Errors raised by the IPM core.
///
/// Out-of-view and singular destination pixels are not errors: they end up
/// as unmapped entries in the table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IpmError {
    /// An image dimension is zero or otherwise unusable
    #[error("invalid {what} dimensions {size}: {reason}")]
    InvalidDimension {
        what: &'static str,
        size: ImageSize,
        reason: &'static str,
    },

    /// A frame or table was paired with buffers of a different size
    #[error("{what} size mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: ImageSize,
        actual: ImageSize,
    },

    /// A table entry points outside the source image
    #[error("table entry {index} references source pixel {entry}, outside 0..{limit}")]
    EntryOutOfRange {
        index: usize,
        entry: i32,
        limit: usize,
    },

    /// Raw pixel data does not match the declared frame size
    #[error("buffer length ({actual}) does not match frame size {size} ({expected} bytes)")]
    InvalidBufferLength {
        size: ImageSize,
        expected: usize,
        actual: usize,
    },
}
