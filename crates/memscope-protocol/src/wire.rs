//! Little-endian primitives shared by the command codec and the framer.

use crate::error::DecodeError;

/// Cursor over a received frame.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], DecodeError> {
        let bytes = self.take_slice(N, field)?;
        <[u8; N]>::try_from(bytes).map_err(|_| DecodeError::Truncated {
            field,
            needed: N,
            available: bytes.len(),
        })
    }

    fn take_slice(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let available = self.remaining();
        let end = self.pos.checked_add(len).filter(|_| len <= available);
        let slice = end
            .and_then(|end| self.buf.get(self.pos..end))
            .ok_or(DecodeError::Truncated {
                field,
                needed: len,
                available,
            })?;
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        self.take(field).map(u32::from_le_bytes)
    }

    pub fn read_i32(&mut self, field: &'static str) -> Result<i32, DecodeError> {
        self.take(field).map(i32::from_le_bytes)
    }

    pub fn read_u64(&mut self, field: &'static str) -> Result<u64, DecodeError> {
        self.take(field).map(u64::from_le_bytes)
    }

    /// Reads a length-prefixed ASCII string. Non-ASCII bytes become `?`.
    pub fn read_string(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let len = self.read_i32(field)?;
        let len = usize::try_from(len).map_err(|_| DecodeError::NegativeLength { field, len })?;
        let bytes = self.take_slice(len, field)?;

        Ok(bytes
            .iter()
            .map(|&b| if b.is_ascii() { char::from(b) } else { '?' })
            .collect())
    }
}

/// Append-only builder for an outgoing frame.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Writes a length-prefixed ASCII string. Non-ASCII chars become `?`.
    pub fn put_string(&mut self, value: &str) -> &mut Self {
        let mut bytes: Vec<u8> = value
            .chars()
            .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
            .collect();
        bytes.truncate(i32::MAX as usize);

        self.put_i32(bytes.len() as i32);
        self.buf.extend_from_slice(&bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_string_replaces_non_ascii() {
        let mut frame = 3i32.to_le_bytes().to_vec();
        frame.extend_from_slice(&[b'a', 0xc3, b'z']);

        let mut reader = WireReader::new(&frame);
        assert_eq!(reader.read_string("name").unwrap(), "a?z");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_zero_length_string() {
        let frame = 0i32.to_le_bytes();
        let mut reader = WireReader::new(&frame);
        assert_eq!(reader.read_string("name").unwrap(), "");
    }

    #[test]
    fn test_negative_length_rejected() {
        let frame = (-1i32).to_le_bytes();
        let mut reader = WireReader::new(&frame);
        assert_eq!(
            reader.read_string("name"),
            Err(DecodeError::NegativeLength {
                field: "name",
                len: -1
            })
        );
    }

    #[test]
    fn test_string_longer_than_frame() {
        let mut frame = 10i32.to_le_bytes().to_vec();
        frame.extend_from_slice(b"abc");
        let mut reader = WireReader::new(&frame);
        assert_eq!(
            reader.read_string("message"),
            Err(DecodeError::Truncated {
                field: "message",
                needed: 10,
                available: 3
            })
        );
    }

    #[test]
    fn test_writer_layout() {
        let mut writer = WireWriter::new();
        writer.put_u32(1).put_string("hé").put_u64(0x0102);
        assert_eq!(
            writer.into_bytes(),
            vec![1, 0, 0, 0, 2, 0, 0, 0, b'h', b'?', 2, 1, 0, 0, 0, 0, 0, 0]
        );
    }
}
