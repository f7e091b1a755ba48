//! Little-endian, packed encoding helpers.
//!
//! Every value is written in little-endian byte order with no padding between fields.
//! Fixed-layout structs go through [`bytemuck::Pod`], so their in-memory layout is the
//! wire layout. Strings are prefixed with their UTF-8 byte length as an `i32`.

use bytemuck::Pod;
use thiserror::Error;

#[cfg(target_endian = "big")]
compile_error!("the wire format is little-endian; big-endian targets are not supported");

/// Errors produced while decoding wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The buffer ended before the value was complete.
    #[error("unexpected end of data: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof {
        /// Bytes required by the read.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },
    /// A length prefix was negative.
    #[error("invalid length prefix {0}")]
    InvalidLength(i32),
    /// A string was not valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    /// A string exceeded its maximum character count.
    #[error("string length of {len} exceeds maximum ({max} characters)")]
    StringTooLong {
        /// Character count of the string.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },
    /// An enum discriminant had no matching variant.
    #[error("invalid {name} value {value}")]
    InvalidEnum {
        /// Enum type name.
        name: &'static str,
        /// Discriminant that was read.
        value: i64,
    },
    /// A fixed-size record was followed by unexpected bytes.
    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),
    /// A seek target lay outside the buffer.
    #[error("seek to {target} is outside a buffer of {len} bytes")]
    SeekOutOfRange {
        /// Requested position.
        target: usize,
        /// Buffer length.
        len: usize,
    },
}

/// Marshalled size of a fixed-layout struct.
///
/// Resolved at compile time, so callers can size buffers without re-measuring.
pub const fn wire_size<T: Pod>() -> usize {
    std::mem::size_of::<T>()
}

/// Append-only encoder over a byte vector.
pub trait WireWriter {
    /// Write raw bytes without a prefix.
    fn write_bytes(&mut self, bytes: &[u8]);

    /// Write a fixed-layout struct.
    fn write_struct<T: Pod>(&mut self, value: &T) {
        self.write_bytes(bytemuck::bytes_of(value));
    }

    /// Write a single byte.
    fn write_u8(&mut self, value: u8) {
        self.write_bytes(&[value]);
    }

    /// Write a `u16`.
    fn write_u16(&mut self, value: u16) {
        self.write_bytes(&value.to_le_bytes());
    }

    /// Write an `i32`.
    fn write_i32(&mut self, value: i32) {
        self.write_bytes(&value.to_le_bytes());
    }

    /// Write a `bool` as one byte.
    fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    /// Write bytes prefixed with their length as an `i32`.
    fn write_len_prefixed(&mut self, bytes: &[u8]) {
        self.write_i32(bytes.len() as i32);
        self.write_bytes(bytes);
    }

    /// Write a length-prefixed UTF-8 string.
    fn write_string(&mut self, value: &str) {
        self.write_len_prefixed(value.as_bytes());
    }
}

impl WireWriter for Vec<u8> {
    fn write_bytes(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> WireReader<'a> {
    /// Start reading at the beginning of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Current read offset.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Total length of the underlying buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the underlying buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left after the current position.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Move the cursor to an absolute offset (the end of the buffer is allowed).
    pub fn seek(&mut self, target: usize) -> Result<(), WireError> {
        if target > self.data.len() {
            return Err(WireError::SeekOutOfRange {
                target,
                len: self.data.len(),
            });
        }
        self.position = target;
        Ok(())
    }

    /// Borrow the next `count` bytes and advance past them.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], WireError> {
        if count > self.remaining() {
            return Err(WireError::UnexpectedEof {
                needed: count,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(bytes)
    }

    /// Borrow everything after the current position and move to the end.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.position..];
        self.position = self.data.len();
        rest
    }

    /// Read a fixed-layout struct.
    pub fn read_struct<T: Pod>(&mut self) -> Result<T, WireError> {
        let bytes = self.read_bytes(wire_size::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a `u16`.
    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read an `i32`.
    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        self.read_struct::<i32>()
    }

    /// Read a `bool` written as one byte; any non-zero value is `true`.
    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read an `i32` length prefix followed by that many bytes.
    pub fn read_len_prefixed(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.read_i32()?;
        let len = usize::try_from(len).map_err(|_| WireError::InvalidLength(len))?;
        self.read_bytes(len)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, WireError> {
        let bytes = self.read_len_prefixed()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| WireError::InvalidUtf8)
    }

    /// Fail unless every byte has been consumed.
    pub fn finish(&self) -> Result<(), WireError> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(WireError::TrailingBytes(extra)),
        }
    }

    /// Read a string and reject it if it has more than `max_chars` characters.
    pub fn read_bounded_string(&mut self, max_chars: usize) -> Result<String, WireError> {
        let value = self.read_string()?;
        check_string_length(&value, max_chars)?;
        Ok(value)
    }
}

/// Validate that `value` fits in `max_chars` characters.
pub fn check_string_length(value: &str, max_chars: usize) -> Result<(), WireError> {
    let len = value.chars().count();
    if len > max_chars {
        return Err(WireError::StringTooLong {
            len,
            max: max_chars,
        });
    }
    Ok(())
}
