//! `.debug_abbrev` parsing.
//!
//! An abbreviation table is a sequence of `(id, tag, has_children, (attr,
//! form)*)` entries terminated by an `id == 0` entry; several tables share
//! one section, each addressed by its starting offset. A compilation unit
//! points at "its" table via that offset.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::consts::FORM_INDIRECT;
use crate::reader::{Cursor, ReadError};

/// One `(attr, form)` pair of a [`AbbrevDecl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbbrevAttr {
    pub attr: u16,
    pub form: u16,
}

/// A single abbreviation: the schema shared by every DIE with this code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbbrevDecl {
    pub tag: u16,
    pub has_children: bool,
    pub attrs: Vec<AbbrevAttr>,
}

/// One `.debug_abbrev` table, indexed by abbreviation code.
#[derive(Debug, Default)]
pub struct AbbrevTable {
    decls: HashMap<u32, AbbrevDecl>,
}

impl AbbrevTable {
    pub fn get(&self, code: u32) -> Option<&AbbrevDecl> {
        self.decls.get(&code)
    }
}

/// Error kind for [`AbbrevError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum AbbrevErrorKind {
    /// The abbreviation id, attribute, or form code exceeded its maximum
    /// allowed value (`id >= 2^24`, `attr/form >= 2^16`).
    ValueOutOfRange,
    /// `.debug_abbrev` is missing from the object.
    MissingSection,
    /// More than one `.debug_abbrev` section was found.
    DuplicateSection,
    /// A compilation unit referenced a table offset with no matching table.
    UnknownTable,
    /// The section ended before a table's terminating entry.
    Truncated,
}

impl fmt::Display for AbbrevErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValueOutOfRange => write!(f, "abbreviation id, attribute or form out of range"),
            Self::MissingSection => write!(f, ".debug_abbrev section not found"),
            Self::DuplicateSection => write!(f, "more than one .debug_abbrev section"),
            Self::UnknownTable => write!(f, "no abbreviation table at the requested offset"),
            Self::Truncated => write!(f, "truncated abbreviation table"),
        }
    }
}

#[derive(Debug, Error)]
#[error("{kind}")]
pub struct AbbrevError {
    kind: AbbrevErrorKind,
    #[source]
    source: Option<ReadError>,
}

impl AbbrevError {
    fn new(kind: AbbrevErrorKind) -> Self {
        Self { kind, source: None }
    }

    pub fn kind(&self) -> AbbrevErrorKind {
        self.kind
    }
}

impl From<ReadError> for AbbrevError {
    fn from(e: ReadError) -> Self {
        Self {
            kind: AbbrevErrorKind::Truncated,
            source: Some(e),
        }
    }
}

pub type AbbrevResult<T> = Result<T, AbbrevError>;

const MAX_ID: u32 = 1 << 24;
const MAX_ATTR_FORM: u32 = 1 << 16;

/// All abbreviation tables of one object file, keyed by their starting
/// offset within `.debug_abbrev`.
#[derive(Debug, Default)]
pub struct AbbrevCache {
    tables: HashMap<u64, Arc<AbbrevTable>>,
}

impl AbbrevCache {
    /// Parses every table out of a whole `.debug_abbrev` section.
    pub fn load(data: &[u8], endian: crate::reader::Endian) -> AbbrevResult<Self> {
        let mut cache = AbbrevCache::default();
        let mut cursor = Cursor::new(data, 0, endian, 8);
        while !cursor.at_end() {
            let offset = cursor.pos() as u64;
            let table = parse_table(&mut cursor)?;
            cache.tables.insert(offset, Arc::new(table));
        }
        Ok(cache)
    }

    /// Looks up the table starting at `offset`; lookup is an exact match on
    /// offset, no range search.
    pub fn table_at(&self, offset: u64) -> AbbrevResult<Arc<AbbrevTable>> {
        self.tables
            .get(&offset)
            .cloned()
            .ok_or_else(|| AbbrevError::new(AbbrevErrorKind::UnknownTable))
    }
}

fn parse_table(cursor: &mut Cursor<'_>) -> AbbrevResult<AbbrevTable> {
    let mut table = AbbrevTable::default();
    loop {
        let id = cursor.read_uleb128_u32()?;
        if id == 0 {
            break;
        }
        if id >= MAX_ID {
            return Err(AbbrevError::new(AbbrevErrorKind::ValueOutOfRange));
        }
        let tag = cursor.read_uleb128_u32()?;
        let has_children = cursor.read_u8()? != 0;
        let mut attrs = Vec::new();
        loop {
            let attr = cursor.read_uleb128_u32()?;
            let form = cursor.read_uleb128_u32()?;
            if attr >= MAX_ATTR_FORM || form >= MAX_ATTR_FORM {
                return Err(AbbrevError::new(AbbrevErrorKind::ValueOutOfRange));
            }
            if attr == 0 && form == 0 {
                break;
            }
            attrs.push(AbbrevAttr {
                attr: attr as u16,
                form: form as u16,
            });
        }
        table.decls.insert(
            id,
            AbbrevDecl {
                tag: tag as u16,
                has_children,
                attrs,
            },
        );
    }
    Ok(table)
}

/// Resolves `FORM_INDIRECT` by reading the real form code at decode time,
/// not when the abbreviation table itself was loaded.
pub fn resolve_form(cursor: &mut Cursor<'_>, form: u16) -> Result<u16, ReadError> {
    if form == FORM_INDIRECT {
        Ok(cursor.read_uleb128_u32()? as u16)
    } else {
        Ok(form)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Endian;

    fn uleb(v: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut v = v as u64;
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

    #[test]
    fn single_table_single_entry() {
        let mut data = Vec::new();
        data.extend(uleb(1)); // id
        data.extend(uleb(0x11)); // tag = compile_unit
        data.push(1); // has_children
        data.extend(uleb(0x03)); // AT_name
        data.extend(uleb(0x08)); // FORM_string
        data.extend(uleb(0));
        data.extend(uleb(0));
        data.extend(uleb(0)); // terminator id

        let cache = AbbrevCache::load(&data, Endian::Little).unwrap();
        let table = cache.table_at(0).unwrap();
        let decl = table.get(1).unwrap();
        assert_eq!(decl.tag, 0x11);
        assert!(decl.has_children);
        assert_eq!(decl.attrs.len(), 1);
        assert_eq!(decl.attrs[0].attr, 0x03);
    }

    #[test]
    fn unknown_offset_is_error() {
        let cache = AbbrevCache::load(&[0], Endian::Little).unwrap();
        assert!(cache.table_at(100).is_err());
    }

    #[test]
    fn indirect_form_reads_the_real_form_code() {
        use crate::consts::FORM_UDATA;
        let mut data = uleb(FORM_UDATA as u32);
        data.extend(uleb(7));
        let mut cursor = Cursor::new(&data, 0, Endian::Little, 4);
        let form = resolve_form(&mut cursor, FORM_INDIRECT).unwrap();
        assert_eq!(form, FORM_UDATA);
        assert_eq!(cursor.read_uleb128_u32().unwrap(), 7);
    }

    #[test]
    fn non_indirect_form_passes_through_unread() {
        use crate::consts::FORM_STRING;
        let data: [u8; 0] = [];
        let mut cursor = Cursor::new(&data, 0, Endian::Little, 4);
        assert_eq!(resolve_form(&mut cursor, FORM_STRING).unwrap(), FORM_STRING);
    }
}
