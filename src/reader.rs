//! A position-tracked cursor over a single DWARF section buffer.
//!
//! This is the byte-level primitive every other module builds on: fixed
//! width integer reads honour the target's endianness, LEB128 reads decode
//! the DWARF variable-length integer encoding, and every read fails with
//! [`ReadError::Eof`] if it would cross the end of the bound buffer.

use std::fmt;
use std::str;

use scroll::{Endian as ScrollEndian, Pread};
use thiserror::Error;

/// Target byte order, bound once per section via [`Cursor::enter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl From<Endian> for ScrollEndian {
    fn from(e: Endian) -> ScrollEndian {
        match e {
            Endian::Little => ScrollEndian::Little,
            Endian::Big => ScrollEndian::Big,
        }
    }
}

/// Error kind for [`ReadError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReadErrorKind {
    /// A read would cross the end of the bound section.
    Eof,
    /// A NUL-terminated string was not valid UTF-8.
    InvalidString,
    /// An address or integer width outside the set this cursor knows how to
    /// decode (a malformed unit header's `address_size`, typically).
    UnsupportedWidth,
}

impl fmt::Display for ReadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eof => write!(f, "unexpected end of section"),
            Self::InvalidString => write!(f, "string is not valid utf-8"),
            Self::UnsupportedWidth => write!(f, "unsupported address or integer width"),
        }
    }
}

/// An error reading from a [`Cursor`].
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct ReadError {
    kind: ReadErrorKind,
}

impl ReadError {
    fn new(kind: ReadErrorKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> ReadErrorKind {
        self.kind
    }
}

pub type ReadResult<T> = Result<T, ReadError>;

/// A cursor over one section's bytes.
///
/// Holds the current section, position and endianness as an ordinary value
/// rather than process-wide globals swapped in and out by an enter/exit
/// pair: entering a different section just means constructing a new
/// `Cursor`, and there is nothing to "exit".
#[derive(Clone, Copy)]
pub struct Cursor<'data> {
    data: &'data [u8],
    pos: usize,
    endian: Endian,
    /// Size in bytes of a target address (2, 4 or 8); used by [`Cursor::read_address`].
    address_size: u8,
}

impl fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("pos", &self.pos)
            .field("len", &self.data.len())
            .field("endian", &self.endian)
            .field("address_size", &self.address_size)
            .finish()
    }
}

impl<'data> Cursor<'data> {
    /// Binds a cursor to `data`, starting at `offset`.
    pub fn new(data: &'data [u8], offset: usize, endian: Endian, address_size: u8) -> Self {
        Cursor {
            data,
            pos: offset,
            endian,
            address_size,
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn set_address_size(&mut self, size: u8) {
        self.address_size = size;
    }

    /// Moves the cursor by `n` bytes without reading them.
    pub fn skip(&mut self, n: usize) -> ReadResult<()> {
        let new_pos = self.pos.checked_add(n).ok_or_else(|| ReadError::new(ReadErrorKind::Eof))?;
        if new_pos > self.data.len() {
            return Err(ReadError::new(ReadErrorKind::Eof));
        }
        self.pos = new_pos;
        Ok(())
    }

    /// Jumps the cursor to an absolute offset within the section.
    pub fn seek(&mut self, pos: usize) -> ReadResult<()> {
        if pos > self.data.len() {
            return Err(ReadError::new(ReadErrorKind::Eof));
        }
        self.pos = pos;
        Ok(())
    }

    /// Returns the bytes consumed since `start`, for callers that decoded a
    /// fixed-width value but also want a view of its raw encoding.
    pub fn consumed_since(&self, start: usize) -> &'data [u8] {
        &self.data[start..self.pos]
    }

    /// Reads exactly `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> ReadResult<&'data [u8]> {
        let end = self.pos.checked_add(n).ok_or_else(|| ReadError::new(ReadErrorKind::Eof))?;
        if end > self.data.len() {
            return Err(ReadError::new(ReadErrorKind::Eof));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> ReadResult<u8> {
        let b = *self.data.get(self.pos).ok_or_else(|| ReadError::new(ReadErrorKind::Eof))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_i8(&mut self) -> ReadResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> ReadResult<u16> {
        let end = self.pos.checked_add(2).ok_or_else(|| ReadError::new(ReadErrorKind::Eof))?;
        if end > self.data.len() {
            return Err(ReadError::new(ReadErrorKind::Eof));
        }
        let value = self
            .data
            .pread_with::<u16>(self.pos, ScrollEndian::from(self.endian))
            .map_err(|_| ReadError::new(ReadErrorKind::Eof))?;
        self.pos = end;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> ReadResult<u32> {
        let end = self.pos.checked_add(4).ok_or_else(|| ReadError::new(ReadErrorKind::Eof))?;
        if end > self.data.len() {
            return Err(ReadError::new(ReadErrorKind::Eof));
        }
        let value = self
            .data
            .pread_with::<u32>(self.pos, ScrollEndian::from(self.endian))
            .map_err(|_| ReadError::new(ReadErrorKind::Eof))?;
        self.pos = end;
        Ok(value)
    }

    pub fn read_u64(&mut self) -> ReadResult<u64> {
        let end = self.pos.checked_add(8).ok_or_else(|| ReadError::new(ReadErrorKind::Eof))?;
        if end > self.data.len() {
            return Err(ReadError::new(ReadErrorKind::Eof));
        }
        let value = self
            .data
            .pread_with::<u64>(self.pos, ScrollEndian::from(self.endian))
            .map_err(|_| ReadError::new(ReadErrorKind::Eof))?;
        self.pos = end;
        Ok(value)
    }

    /// Reads an address-sized integer, per the unit's `address_size`.
    pub fn read_address(&mut self) -> ReadResult<u64> {
        match self.address_size {
            2 => self.read_u16().map(u64::from),
            4 => self.read_u32().map(u64::from),
            8 => self.read_u64(),
            _ => Err(ReadError::new(ReadErrorKind::UnsupportedWidth)),
        }
    }

    /// Reads an unsigned integer of the given byte width (2, 4 or 8), used
    /// for the DWARF64 initial-length escape and for `REF_ADDR`/`STRP`
    /// offsets whose width depends on unit 64-bitness.
    pub fn read_uint(&mut self, size: u8) -> ReadResult<u64> {
        match size {
            1 => self.read_u8().map(u64::from),
            2 => self.read_u16().map(u64::from),
            4 => self.read_u32().map(u64::from),
            8 => self.read_u64(),
            _ => Err(ReadError::new(ReadErrorKind::UnsupportedWidth)),
        }
    }

    /// Reads an unsigned LEB128 value, truncated to 32 bits (used for IDs,
    /// tags, attrs, forms and other small fields).
    pub fn read_uleb128_u32(&mut self) -> ReadResult<u32> {
        Ok(self.read_uleb128_u64()? as u32)
    }

    /// Reads a full-width unsigned LEB128 value.
    pub fn read_uleb128_u64(&mut self) -> ReadResult<u64> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift < 64 {
                result |= u64::from(byte & 0x7f) << shift;
            }
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok(result)
    }

    /// Reads a signed LEB128 value, sign-extending from bit 6 of the final
    /// septet, truncated to 32 bits.
    pub fn read_sleb128_i32(&mut self) -> ReadResult<i32> {
        Ok(self.read_sleb128_i64()? as i32)
    }

    /// Reads a full-width signed LEB128 value.
    pub fn read_sleb128_i64(&mut self) -> ReadResult<i64> {
        let mut result: i64 = 0;
        let mut shift = 0u32;
        let mut byte;
        loop {
            byte = self.read_u8()?;
            if shift < 64 {
                result |= i64::from(byte & 0x7f) << shift;
            }
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }
        if shift < 64 && (byte & 0x40) != 0 {
            result |= -1i64 << shift;
        }
        Ok(result)
    }

    /// Reads a NUL-terminated string as a non-owning view into the section.
    pub fn read_cstr(&mut self) -> ReadResult<&'data str> {
        let start = self.pos;
        loop {
            let b = self.read_u8()?;
            if b == 0 {
                break;
            }
        }
        let bytes = &self.data[start..self.pos - 1];
        str::from_utf8(bytes).map_err(|_| ReadError::new(ReadErrorKind::InvalidString))
    }
}
