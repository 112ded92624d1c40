//! Protocol error types.

use thiserror::Error;

/// A frame that does not decode to a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The frame ended before a field was complete
    #[error("Truncated frame: {field} needs {needed} bytes, {available} available")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    /// A string field declared a negative length
    #[error("Negative length {len} for {field}")]
    NegativeLength { field: &'static str, len: i32 },
}

/// Byte-stream violations detected while assembling frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// More bytes were reported than the current phase asked for
    #[error("Received {received} bytes but only {expected} were expected")]
    Overflow { expected: usize, received: usize },

    /// Chunk length cannot hold a command tag
    #[error("Invalid chunk length: {len}")]
    InvalidChunkLength { len: i32 },

    /// Chunk length exceeds the configured maximum
    #[error("Chunk of {len} bytes exceeds maximum of {max}")]
    ChunkTooLarge { len: usize, max: usize },
}
