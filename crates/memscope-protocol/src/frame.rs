//! Connection byte-stream framing.
//!
//! A connection starts with an 8-byte challenge key, then carries chunks of
//! `[i32 length][length bytes]`, each chunk being one command frame.
//!
//! [`FrameAssembler`] does no I/O. The caller reads into
//! [`FrameAssembler::remaining_mut`] and reports the byte count through
//! [`FrameAssembler::advance`]; the assembler tells it when a challenge or a
//! whole frame has arrived.

use crate::command::Command;
use crate::error::FramingError;

/// Size of the challenge key sent first on every connection.
pub const CHALLENGE_LEN: usize = 8;

/// Size of a chunk length prefix.
pub const CHUNK_HEADER_LEN: usize = 4;

/// Smallest chunk that can carry a command tag.
pub const MIN_CHUNK_LEN: usize = 4;

/// Default upper bound for one chunk; matches the client's scratch buffer.
pub const DEFAULT_MAX_CHUNK_LEN: usize = 256 * 1024;

/// Phase of the per-connection read state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoState {
    AwaitChallenge,
    AwaitChunkSize,
    AwaitChunkBody,
}

/// Something complete enough to hand to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// The 8-byte challenge key the client sent
    Challenge(u64),
    /// One complete command frame
    Frame(Vec<u8>),
}

/// Sans-IO assembler for the challenge and chunked frames.
#[derive(Debug)]
pub struct FrameAssembler {
    state: IoState,
    buf: Vec<u8>,
    received: usize,
    max_chunk_len: usize,
}

impl FrameAssembler {
    /// Creates an assembler waiting for the challenge.
    pub fn new(max_chunk_len: usize) -> Self {
        Self {
            state: IoState::AwaitChallenge,
            buf: vec![0; CHALLENGE_LEN],
            received: 0,
            max_chunk_len,
        }
    }

    pub fn state(&self) -> IoState {
        self.state
    }

    /// Number of bytes the current phase still needs.
    pub fn expected(&self) -> usize {
        self.buf.len().saturating_sub(self.received)
    }

    /// Writable tail of the buffer for the current phase.
    pub fn remaining_mut(&mut self) -> &mut [u8] {
        let received = self.received;
        self.buf.get_mut(received..).unwrap_or_default()
    }

    /// Accounts for `n` bytes written into [`Self::remaining_mut`].
    ///
    /// Advances to the next phase once the current one is complete.
    pub fn advance(&mut self, n: usize) -> Result<Option<FrameEvent>, FramingError> {
        let expected = self.expected();
        if n > expected {
            return Err(FramingError::Overflow {
                expected,
                received: n,
            });
        }

        self.received += n;
        if self.received < self.buf.len() {
            return Ok(None);
        }

        match self.state {
            IoState::AwaitChallenge => {
                let key = u64::from_le_bytes(self.header()?);
                self.rearm(IoState::AwaitChunkSize, CHUNK_HEADER_LEN);
                Ok(Some(FrameEvent::Challenge(key)))
            }
            IoState::AwaitChunkSize => {
                let len = i32::from_le_bytes(self.header()?);
                let size = usize::try_from(len)
                    .ok()
                    .filter(|size| *size >= MIN_CHUNK_LEN)
                    .ok_or(FramingError::InvalidChunkLength { len })?;
                if size > self.max_chunk_len {
                    return Err(FramingError::ChunkTooLarge {
                        len: size,
                        max: self.max_chunk_len,
                    });
                }
                self.rearm(IoState::AwaitChunkBody, size);
                Ok(None)
            }
            IoState::AwaitChunkBody => {
                let frame = std::mem::take(&mut self.buf);
                self.rearm(IoState::AwaitChunkSize, CHUNK_HEADER_LEN);
                Ok(Some(FrameEvent::Frame(frame)))
            }
        }
    }

    /// Feeds a slice of received bytes, returning every completed event.
    pub fn push(&mut self, mut bytes: &[u8]) -> Result<Vec<FrameEvent>, FramingError> {
        let mut events = Vec::new();

        while !bytes.is_empty() {
            let tail = self.remaining_mut();
            let n = tail.len().min(bytes.len());
            let (now, later) = bytes.split_at(n);
            if let Some(dst) = tail.get_mut(..n) {
                dst.copy_from_slice(now);
            }
            bytes = later;

            if let Some(event) = self.advance(n)? {
                events.push(event);
            }
        }

        Ok(events)
    }

    fn header<const N: usize>(&self) -> Result<[u8; N], FramingError> {
        <[u8; N]>::try_from(self.buf.as_slice()).map_err(|_| FramingError::Overflow {
            expected: N,
            received: self.buf.len(),
        })
    }

    fn rearm(&mut self, state: IoState, len: usize) {
        self.state = state;
        self.buf = vec![0; len];
        self.received = 0;
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK_LEN)
    }
}

/// Encodes the challenge a client sends first.
pub fn encode_challenge(key: u64) -> [u8; CHALLENGE_LEN] {
    key.to_le_bytes()
}

/// Encodes a command as one length-prefixed chunk.
pub fn encode_chunk(command: &Command) -> Vec<u8> {
    let frame = command.encode();
    let mut chunk = Vec::with_capacity(CHUNK_HEADER_LEN + frame.len());
    chunk.extend_from_slice(&(frame.len() as i32).to_le_bytes());
    chunk.extend_from_slice(&frame);
    chunk
}
