//! Order-preserving byte encoding of primitives.
//!
//! Every encoding is self-delimiting, so fields can be concatenated and the
//! concatenation still sorts like the tuple of fields. Descending output is
//! the bytewise complement of ascending output.
//!
//! ## Layout
//!
//! - Bytes and strings: payload with `0x00 → 0x00 0xFF` and
//!   `0xFF → 0xFF 0x00`, terminated by the separator `0x00 0x01`.
//! - Numbers: one length byte followed by the significant bytes of the
//!   ordered IEEE 754 bit pattern.
//! - Infinity: `0xFF 0xFF`, greater than every other encoding.

use crate::error::{CodecError, CodecResult};

const ESCAPE1: u8 = 0x00;
const NULL_BYTE: u8 = 0xff;
const SEPARATOR: u8 = 0x01;

const ESCAPE2: u8 = 0xff;
const INFINITY: u8 = 0xff;
const FF_BYTE: u8 = 0x00;

const SIGN_BIT: u64 = 1 << 63;

/// Maps a double onto a `u64` whose unsigned order matches numeric order.
#[must_use]
pub fn ordered_bits(value: f64) -> u64 {
    let bits = value.to_bits();
    if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits ^ SIGN_BIT
    }
}

/// Inverse of [`ordered_bits`].
#[must_use]
pub fn from_ordered_bits(ordered: u64) -> f64 {
    if ordered & SIGN_BIT != 0 {
        f64::from_bits(ordered ^ SIGN_BIT)
    } else {
        f64::from_bits(!ordered)
    }
}

fn significant_len(value: u64) -> usize {
    (64 - value.leading_zeros() as usize).div_ceil(8)
}

/// Appends order-preserving encodings to a growable buffer.
#[derive(Debug, Clone, Default)]
pub struct OrderedCodeWriter {
    buffer: Vec<u8>,
}

impl OrderedCodeWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes bytes in ascending order, followed by a separator.
    pub fn write_bytes_ascending(&mut self, value: &[u8]) {
        for &b in value {
            self.write_byte_ascending(b);
        }
        self.write_separator_ascending();
    }

    /// Writes bytes in descending order, followed by a separator.
    pub fn write_bytes_descending(&mut self, value: &[u8]) {
        for &b in value {
            self.write_byte_descending(b);
        }
        self.write_separator_descending();
    }

    /// Writes a string's UTF-8 bytes in ascending order.
    pub fn write_utf8_ascending(&mut self, value: &str) {
        self.write_bytes_ascending(value.as_bytes());
    }

    /// Writes a string's UTF-8 bytes in descending order.
    pub fn write_utf8_descending(&mut self, value: &str) {
        self.write_bytes_descending(value.as_bytes());
    }

    /// Writes a double in ascending order.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_number_ascending(&mut self, value: f64) {
        let bits = ordered_bits(value);
        let len = significant_len(bits);
        self.buffer.push(len as u8);
        self.buffer
            .extend_from_slice(&bits.to_be_bytes()[8 - len..]);
    }

    /// Writes a double in descending order.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_number_descending(&mut self, value: f64) {
        let bits = ordered_bits(value);
        let len = significant_len(bits);
        self.buffer.push(!(len as u8));
        self.buffer
            .extend(bits.to_be_bytes()[8 - len..].iter().map(|b| !b));
    }

    /// Writes a marker that sorts after every other ascending encoding.
    pub fn write_infinity_ascending(&mut self) {
        self.buffer.push(ESCAPE2);
        self.buffer.push(INFINITY);
    }

    /// Writes a marker that sorts before every other descending encoding.
    pub fn write_infinity_descending(&mut self) {
        self.buffer.push(!ESCAPE2);
        self.buffer.push(!INFINITY);
    }

    /// Replaces the buffer contents with previously encoded bytes.
    pub fn seed(&mut self, encoded: &[u8]) {
        self.buffer.clear();
        self.buffer.extend_from_slice(encoded);
    }

    /// Clears the buffer, keeping its allocation.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Returns the bytes written so far.
    #[must_use]
    pub fn encoded_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the writer, returning its buffer.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    fn write_byte_ascending(&mut self, b: u8) {
        match b {
            ESCAPE1 => self.buffer.extend_from_slice(&[ESCAPE1, NULL_BYTE]),
            ESCAPE2 => self.buffer.extend_from_slice(&[ESCAPE2, FF_BYTE]),
            _ => self.buffer.push(b),
        }
    }

    fn write_byte_descending(&mut self, b: u8) {
        match b {
            ESCAPE1 => self.buffer.extend_from_slice(&[!ESCAPE1, !NULL_BYTE]),
            ESCAPE2 => self.buffer.extend_from_slice(&[!ESCAPE2, !FF_BYTE]),
            _ => self.buffer.push(!b),
        }
    }

    fn write_separator_ascending(&mut self) {
        self.buffer.extend_from_slice(&[ESCAPE1, SEPARATOR]);
    }

    fn write_separator_descending(&mut self) {
        self.buffer.extend_from_slice(&[!ESCAPE1, !SEPARATOR]);
    }
}

/// Reads fields written by [`OrderedCodeWriter`].
///
/// Each read consumes exactly one field. Malformed or truncated input yields
/// an error and leaves the reader position unspecified.
#[derive(Debug, Clone)]
pub struct OrderedCodeReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> OrderedCodeReader<'a> {
    /// Creates a reader over encoded bytes.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Returns the current offset.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns true when all input has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Reads an ascending byte field.
    pub fn read_bytes_ascending(&mut self) -> CodecResult<Vec<u8>> {
        self.read_escaped(false)
    }

    /// Reads a descending byte field.
    pub fn read_bytes_descending(&mut self) -> CodecResult<Vec<u8>> {
        self.read_escaped(true)
    }

    /// Reads an ascending string field.
    pub fn read_utf8_ascending(&mut self) -> CodecResult<String> {
        String::from_utf8(self.read_bytes_ascending()?).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Reads a descending string field.
    pub fn read_utf8_descending(&mut self) -> CodecResult<String> {
        String::from_utf8(self.read_bytes_descending()?).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Reads an ascending number field.
    pub fn read_number_ascending(&mut self) -> CodecResult<f64> {
        self.read_number(false)
    }

    /// Reads a descending number field.
    pub fn read_number_descending(&mut self) -> CodecResult<f64> {
        self.read_number(true)
    }

    /// Consumes an ascending infinity marker if one is next.
    pub fn read_infinity_ascending(&mut self) -> bool {
        self.read_marker([ESCAPE2, INFINITY])
    }

    /// Consumes a descending infinity marker if one is next.
    pub fn read_infinity_descending(&mut self) -> bool {
        self.read_marker([!ESCAPE2, !INFINITY])
    }

    fn read_marker(&mut self, marker: [u8; 2]) -> bool {
        if self.bytes.get(self.pos..self.pos + 2) == Some(&marker[..]) {
            self.pos += 2;
            true
        } else {
            false
        }
    }

    fn next_byte(&mut self, descending: bool) -> CodecResult<u8> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or(CodecError::UnexpectedEof { offset: self.pos })?;
        self.pos += 1;
        Ok(if descending { !b } else { b })
    }

    fn read_escaped(&mut self, descending: bool) -> CodecResult<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let offset = self.pos;
            let b = self.next_byte(descending)?;
            match b {
                ESCAPE1 => match self.next_byte(descending)? {
                    NULL_BYTE => out.push(0x00),
                    SEPARATOR => return Ok(out),
                    second => {
                        return Err(CodecError::InvalidEscape {
                            first: b,
                            second,
                            offset,
                        })
                    }
                },
                ESCAPE2 => match self.next_byte(descending)? {
                    FF_BYTE => out.push(0xff),
                    second => {
                        return Err(CodecError::InvalidEscape {
                            first: b,
                            second,
                            offset,
                        })
                    }
                },
                _ => out.push(b),
            }
        }
    }

    fn read_number(&mut self, descending: bool) -> CodecResult<f64> {
        let offset = self.pos;
        let len = usize::from(self.next_byte(descending)?);
        if len > 8 {
            return Err(CodecError::InvalidNumberLength {
                length: len,
                offset,
            });
        }
        let mut ordered = 0u64;
        for _ in 0..len {
            ordered = (ordered << 8) | u64::from(self.next_byte(descending)?);
        }
        Ok(from_ordered_bits(ordered))
    }
}
