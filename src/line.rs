//! Line-number program interpreter.
//!
//! Parses a `.debug_line` unit header and runs its state machine, yielding
//! one [`LineRow`] per `DW_LNS_copy`/special opcode/`end_sequence`, a direct
//! translation of the DWARF line-number state machine.

use std::fmt;

use thiserror::Error;

use crate::consts::*;
use crate::reader::{Cursor, Endian, ReadError};

/// A directory or file entry declared in the line program header.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    /// 1-based index into the header's directory list, `0` for "no directory".
    pub dir: u64,
    pub mod_time: u64,
    pub size: u64,
}

/// One emitted row of the line-number matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRow {
    pub address: u64,
    pub file: u64,
    pub line: u64,
    pub column: u64,
    pub is_stmt: bool,
    pub basic_block: bool,
    pub end_sequence: bool,
    pub prologue_end: bool,
    pub epilogue_begin: bool,
    pub isa: u64,
}

#[derive(Clone, Copy)]
struct Registers {
    address: u64,
    file: u64,
    line: i64,
    column: u64,
    is_stmt: bool,
    basic_block: bool,
    end_sequence: bool,
    prologue_end: bool,
    epilogue_begin: bool,
    isa: u64,
}

impl Registers {
    fn initial(is_stmt_default: bool) -> Self {
        Registers {
            address: 0,
            file: 1,
            line: 1,
            column: 0,
            is_stmt: is_stmt_default,
            basic_block: false,
            end_sequence: false,
            prologue_end: false,
            epilogue_begin: false,
            isa: 0,
        }
    }

    fn to_row(self) -> LineRow {
        LineRow {
            address: self.address,
            file: self.file,
            line: self.line.max(0) as u64,
            column: self.column,
            is_stmt: self.is_stmt,
            basic_block: self.basic_block,
            end_sequence: self.end_sequence,
            prologue_end: self.prologue_end,
            epilogue_begin: self.epilogue_begin,
            isa: self.isa,
        }
    }
}

/// A fully parsed line-number program: its file/directory tables and the
/// rows its state machine produced.
#[derive(Debug, Clone, Default)]
pub struct LineProgram {
    pub directories: Vec<String>,
    pub files: Vec<FileEntry>,
    pub rows: Vec<LineRow>,
}

/// Error kind for [`LineError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum LineErrorKind {
    InvalidHeader,
    InvalidOpcodeSize,
    UnknownOpcode,
    Truncated,
}

impl fmt::Display for LineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHeader => write!(f, "line number program header is inconsistent"),
            Self::InvalidOpcodeSize => write!(f, "extended opcode consumed the wrong number of bytes"),
            Self::UnknownOpcode => write!(f, "unknown standard line number opcode"),
            Self::Truncated => write!(f, "truncated line number program"),
        }
    }
}

#[derive(Debug, Error)]
#[error("{kind}")]
pub struct LineError {
    kind: LineErrorKind,
    #[source]
    source: Option<ReadError>,
}

impl LineError {
    fn new(kind: LineErrorKind) -> Self {
        Self { kind, source: None }
    }

    pub fn kind(&self) -> LineErrorKind {
        self.kind
    }
}

impl From<ReadError> for LineError {
    fn from(e: ReadError) -> Self {
        Self {
            kind: LineErrorKind::Truncated,
            source: Some(e),
        }
    }
}

pub type LineResult<T> = Result<T, LineError>;

/// Parses and runs the line-number program starting at `offset` in
/// `.debug_line`
pub fn load_line_numbers(data: &[u8], offset: usize, endian: Endian) -> LineResult<LineProgram> {
    let mut cursor = Cursor::new(data, offset, endian, 8);

    let mut raw_len = cursor.read_u32()? as u64;
    let is_64bit = raw_len == 0xFFFF_FFFF;
    let unit_size = if is_64bit {
        raw_len = cursor.read_u64()?;
        raw_len + 12
    } else {
        raw_len + 4
    };
    let _version = cursor.read_u16()?;
    let header_size = if is_64bit {
        cursor.read_u64()?
    } else {
        cursor.read_u32()? as u64
    };
    let header_pos = cursor.pos() as u64;

    let min_instruction_length = cursor.read_u8()?;
    let is_stmt_default = cursor.read_u8()? != 0;
    let line_base = cursor.read_i8()?;
    let line_range = cursor.read_u8()?;
    let opcode_base = cursor.read_u8()?;
    if opcode_base == 0 {
        return Err(LineError::new(LineErrorKind::InvalidHeader));
    }
    let mut opcode_lengths = vec![0u8; opcode_base as usize];
    for slot in opcode_lengths.iter_mut().skip(1) {
        *slot = cursor.read_u8()?;
    }

    let mut directories = Vec::new();
    loop {
        let name = cursor.read_cstr()?;
        if name.is_empty() {
            break;
        }
        directories.push(name.to_owned());
    }

    let mut files = Vec::new();
    loop {
        let name = cursor.read_cstr()?;
        if name.is_empty() {
            break;
        }
        let dir = cursor.read_uleb128_u64()?;
        let mod_time = cursor.read_uleb128_u64()?;
        let size = cursor.read_uleb128_u64()?;
        files.push(FileEntry {
            name: name.to_owned(),
            dir,
            mod_time,
            size,
        });
    }

    if header_pos + header_size != cursor.pos() as u64 {
        return Err(LineError::new(LineErrorKind::InvalidHeader));
    }

    let mut rows = Vec::new();
    let mut regs = Registers::initial(is_stmt_default);
    let program_end = offset as u64 + unit_size;

    while (cursor.pos() as u64) < program_end {
        let opcode = cursor.read_u8()?;
        if opcode >= opcode_base {
            let adjusted = (opcode - opcode_base) as i64;
            regs.line += (adjusted % line_range as i64) + line_base as i64;
            regs.address += (adjusted / line_range as i64) as u64 * min_instruction_length as u64;
            rows.push(regs.to_row());
            regs.basic_block = false;
            regs.prologue_end = false;
            regs.epilogue_begin = false;
        } else if opcode == 0 {
            let op_size = cursor.read_uleb128_u64()?;
            let op_pos = cursor.pos() as u64;
            let sub_opcode = cursor.read_u8()?;
            match sub_opcode {
                LNE_DEFINE_FILE => {
                    let name = cursor.read_cstr()?.to_owned();
                    let dir = cursor.read_uleb128_u64()?;
                    let mod_time = cursor.read_uleb128_u64()?;
                    let size = cursor.read_uleb128_u64()?;
                    files.push(FileEntry {
                        name,
                        dir,
                        mod_time,
                        size,
                    });
                }
                LNE_END_SEQUENCE => {
                    regs.end_sequence = true;
                    rows.push(regs.to_row());
                    regs = Registers::initial(is_stmt_default);
                }
                LNE_SET_ADDRESS => {
                    regs.address = cursor.read_address()?;
                }
                _ => {
                    cursor.skip((op_size - 1) as usize)?;
                }
            }
            if cursor.pos() as u64 != op_pos + op_size {
                return Err(LineError::new(LineErrorKind::InvalidOpcodeSize));
            }
        } else {
            match opcode {
                LNS_COPY => {
                    rows.push(regs.to_row());
                    regs.basic_block = false;
                    regs.prologue_end = false;
                    regs.epilogue_begin = false;
                }
                LNS_ADVANCE_PC => {
                    let advance = cursor.read_uleb128_u64()?;
                    regs.address += advance * min_instruction_length as u64;
                }
                LNS_ADVANCE_LINE => {
                    regs.line += cursor.read_sleb128_i64()?;
                }
                LNS_SET_FILE => {
                    regs.file = cursor.read_uleb128_u64()?;
                }
                LNS_SET_COLUMN => {
                    regs.column = cursor.read_uleb128_u64()?;
                }
                LNS_NEGATE_STMT => {
                    regs.is_stmt = !regs.is_stmt;
                }
                LNS_SET_BASIC_BLOCK => {
                    regs.basic_block = true;
                }
                LNS_CONST_ADD_PC => {
                    let adjusted = (255 - opcode_base) as i64;
                    regs.address += (adjusted / line_range as i64) as u64 * min_instruction_length as u64;
                }
                LNS_FIXED_ADVANCE_PC => {
                    regs.address += cursor.read_u16()? as u64;
                }
                LNS_SET_PROLOGUE_END => {
                    regs.prologue_end = true;
                }
                LNS_SET_EPILOGUE_BEGIN => {
                    regs.epilogue_begin = true;
                }
                LNS_SET_ISA => {
                    regs.isa = cursor.read_uleb128_u64()?;
                }
                _ => return Err(LineError::new(LineErrorKind::UnknownOpcode)),
            }
        }
    }

    Ok(LineProgram {
        directories,
        files,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uleb(v: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut v = v;
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            buf.push(byte);
            if v == 0 {
                break;
            }
        }
        buf
    }

    /// Builds a minimal header (no dirs/files) followed by `body`.
    fn build_program(body: &[u8]) -> Vec<u8> {
        let opcode_base = 13u8;
        let mut header_tail = Vec::new();
        header_tail.push(1u8); // min_instruction_length
        header_tail.push(1u8); // default_is_stmt
        header_tail.push(0xfbu8); // line_base = -5
        header_tail.push(14u8); // line_range
        header_tail.push(opcode_base);
        header_tail.extend(std::iter::repeat(1u8).take(opcode_base as usize - 1));
        header_tail.push(0); // directories terminator
        header_tail.push(0); // files terminator
        header_tail.extend_from_slice(body);

        let header_size = header_tail.len() as u32 - body.len() as u32;
        let mut unit = Vec::new();
        unit.extend(2u16.to_le_bytes()); // version
        unit.extend(header_size.to_le_bytes());
        unit.extend(header_tail);

        let mut full = Vec::new();
        full.extend((unit.len() as u32).to_le_bytes());
        full.extend(unit);
        full
    }

    #[test]
    fn special_opcode_emits_one_row() {
        // opcode_base=13, line_base=-5, line_range=14: opcode 13 yields
        // line_delta = -5, address_delta = 0.
        let data = build_program(&[13u8]);
        let program = load_line_numbers(&data, 0, Endian::Little).unwrap();
        assert_eq!(program.rows.len(), 1);
        assert_eq!(program.rows[0].line, 1u64.saturating_sub(5).max(0));
    }

    #[test]
    fn end_sequence_resets_state() {
        let mut body = vec![LNS_COPY];
        body.push(0);
        body.push(1);
        body.push(LNE_END_SEQUENCE);
        let data = build_program(&body);
        let program = load_line_numbers(&data, 0, Endian::Little).unwrap();
        assert_eq!(program.rows.len(), 2);
        assert!(program.rows[1].end_sequence);
        assert!(program.rows[1].is_stmt);
    }
}
