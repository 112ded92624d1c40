//! memscope protocol - binary wire format between instrumented processes
//! and the memscope daemon
//!
//! Everything is little-endian. A connection sends an 8-byte challenge key,
//! then length-prefixed chunks, each holding one [`Command`].
//!
//! This crate does no I/O; see [`FrameAssembler`] for the sans-IO reader.

pub mod command;
pub mod error;
pub mod frame;
pub mod wire;

pub use command::Command;
pub use error::{DecodeError, FramingError};
pub use frame::{
    encode_challenge, encode_chunk, FrameAssembler, FrameEvent, IoState, CHALLENGE_LEN,
    DEFAULT_MAX_CHUNK_LEN, MIN_CHUNK_LEN,
};
pub use wire::{WireReader, WireWriter};
