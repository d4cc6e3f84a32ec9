//! The unit/entry walker.
//!
//! Iterates compilation units and DIEs, driving a caller-supplied visitor
//! with one [`EntryEvent`] per tag/attribute instead of the begin/attribute/
//! end sentinel triples a callback-style walker would use: `Begin`,
//! `Attribute` and `End` are distinct variants, so there's no `attr == 0`
//! magic value to misread.

use std::fmt;

use thiserror::Error;

use crate::abbrev::{resolve_form, AbbrevCache, AbbrevError};
use crate::consts::*;
use crate::reader::{Cursor, Endian, ReadError};

/// The tagged sum replacing shared `formRef`/`formData`/`formDataAddr`/
/// `formDataSize` globals. Carries exactly the payload a FORM produces.
#[derive(Debug, Clone, Copy)]
pub enum AttributeValue<'data> {
    /// `ADDR`, absolute `REF`/`REF_ADDR`/`REFn`/`REF_UDATA` (already resolved
    /// to a section-absolute offset).
    Reference(u64),
    /// `BLOCKn`/`BLOCK`: raw, caller-interpreted bytes, plus the absolute
    /// section offset the block starts at (needed by v1 `mod_fund_type`/
    /// `mod_u_d_type` blocks, whose nested modifier bytes are identified by
    /// their own file offset rather than an explicit reference form).
    Block { bytes: &'data [u8], offset: u64 },
    /// `DATAn`/`FLAG`: fixed-width unsigned scalar, plus a view into the raw
    /// bytes in place and their absolute section offset (mirrors
    /// `formDataAddr` pointing at the in-buffer bytes for these forms; v1's
    /// `AT_fund_type` identifies its synthetic base-type object by this
    /// offset rather than by an explicit reference).
    Data {
        value: u64,
        raw: &'data [u8],
        offset: u64,
    },
    /// `SDATA`: signed LEB128 scalar.
    SignedData(i64),
    /// `UDATA`: unsigned LEB128 scalar.
    UnsignedData(u64),
    /// `STRING`/`STRP`: a string view, either inline or into `.debug_str`.
    Str(&'data str),
}

/// One step of a DIE walk: a begin/attribute/end triple expressed as enum
/// variants instead of sentinel calls.
#[derive(Debug, Clone, Copy)]
pub enum EntryEvent<'data> {
    /// A new DIE starts, at absolute section offset `offset`. `has_children`
    /// tells the caller whether a run of child DIEs (terminated by
    /// [`EntryEvent::EndOfChildren`]) follows once this DIE's attributes end.
    Begin {
        tag: u16,
        offset: u64,
        has_children: bool,
    },
    /// One attribute of the DIE currently being visited.
    Attribute {
        attr: u16,
        form: u16,
        value: AttributeValue<'data>,
    },
    /// The DIE currently being visited has no more attributes.
    End,
    /// The null entry terminating a run of children (v2+ abbrev code `0`).
    /// Never produced for v1 units, which have no nesting marker of their
    /// own and are walked as a flat sequence.
    EndOfChildren,
}

/// Error kind for [`WalkError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum WalkErrorKind {
    UnknownForm,
    InvalidAbbrevCode,
    RefOutOfRange,
    MissingCompileUnitSize,
    StrpOutOfRange,
}

impl fmt::Display for WalkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownForm => write!(f, "unknown attribute FORM"),
            Self::InvalidAbbrevCode => write!(f, "entry references an unknown abbreviation code"),
            Self::RefOutOfRange => write!(f, "REF attribute value is outside the unit"),
            Self::MissingCompileUnitSize => write!(
                f,
                "v1 compile unit has neither a unit-size prefix nor a sibling attribute"
            ),
            Self::StrpOutOfRange => write!(f, "STRP offset is outside .debug_str"),
        }
    }
}

#[derive(Debug, Error)]
#[error("{kind}")]
pub struct WalkError {
    kind: WalkErrorKind,
    #[source]
    source: Option<ReadError>,
}

impl WalkError {
    fn new(kind: WalkErrorKind) -> Self {
        Self { kind, source: None }
    }

    pub fn kind(&self) -> WalkErrorKind {
        self.kind
    }
}

impl From<ReadError> for WalkError {
    fn from(e: ReadError) -> Self {
        Self {
            kind: WalkErrorKind::UnknownForm,
            source: Some(e),
        }
    }
}

impl From<AbbrevError> for WalkError {
    fn from(e: AbbrevError) -> Self {
        tracing::trace!(error = %e, "entry references an abbreviation that failed to resolve");
        Self::new(WalkErrorKind::InvalidAbbrevCode)
    }
}

pub type WalkResult<T> = Result<T, WalkError>;

/// Identity and framing of one compilation unit header.
#[derive(Debug, Clone, Copy)]
pub struct UnitDescriptor {
    pub version: u16,
    pub address_size: u8,
    pub is_64bit: bool,
    pub abbrev_table_offset: u64,
    /// Absolute offset of the unit header.
    pub unit_offset: u64,
    /// Total size of the unit, including its header; `0` if not yet known
    /// (only possible transiently for a v1 unit before its `AT_sibling` is
    /// seen).
    pub unit_size: u64,
}

impl UnitDescriptor {
    fn end(&self) -> u64 {
        self.unit_offset + self.unit_size
    }
}

/// Drives [`EntryEvent`]s for one section (`.debug`/`.debug_info`) over a
/// cursor bound to that section, given the file's endianness, base address,
/// abbreviation cache and (for `STRP`) the `.debug_str` bytes.
pub struct Walker<'data> {
    pub section_addr: u64,
    pub endian: Endian,
    pub abbrevs: &'data AbbrevCache,
    pub debug_str: Option<&'data [u8]>,
    pub is_legacy_debug_section: bool,
}

impl<'data> Walker<'data> {
    /// Reads one compilation unit, invoking `visitor` for every `EntryEvent`.
    pub fn read_unit(
        &self,
        cursor: &mut Cursor<'data>,
        visitor: &mut dyn FnMut(&UnitDescriptor, EntryEvent<'data>) -> WalkResult<()>,
    ) -> WalkResult<UnitDescriptor> {
        let unit_offset = cursor.pos() as u64;
        let mut desc = if self.is_legacy_debug_section {
            UnitDescriptor {
                version: 1,
                address_size: 4,
                is_64bit: false,
                abbrev_table_offset: 0,
                unit_offset,
                unit_size: 0,
            }
        } else {
            let mut raw_len = cursor.read_u32()? as u64;
            let is_64bit = raw_len == 0xFFFF_FFFF;
            let unit_size = if is_64bit {
                raw_len = cursor.read_u64()?;
                raw_len + 12
            } else {
                raw_len + 4
            };
            let version = cursor.read_u16()?;
            let abbrev_table_offset = if is_64bit {
                cursor.read_u64()?
            } else {
                cursor.read_u32()? as u64
            };
            let address_size = cursor.read_u8()?;
            UnitDescriptor {
                version,
                address_size,
                is_64bit,
                abbrev_table_offset,
                unit_offset,
                unit_size,
            }
        };
        cursor.set_address_size(desc.address_size);

        loop {
            if desc.unit_size != 0 && cursor.pos() as u64 >= desc.end() {
                break;
            }
            if desc.unit_size == 0 && cursor.at_end() {
                break;
            }
            let continues = self.read_entry(cursor, &mut desc, visitor)?;
            if !continues && desc.unit_size == 0 {
                // Legacy v1 unit with no way to know when to stop; section
                // end is the only terminator.
                if cursor.at_end() {
                    break;
                }
            }
        }
        Ok(desc)
    }

    /// Reads one DIE. Returns `Ok(true)` as long as more entries may follow
    /// in this unit. Exposed at crate visibility so a property lookup can
    /// re-enter a unit at a single DIE's offset instead of replaying the
    /// whole walk.
    pub(crate) fn read_entry(
        &self,
        cursor: &mut Cursor<'data>,
        desc: &mut UnitDescriptor,
        visitor: &mut dyn FnMut(&UnitDescriptor, EntryEvent<'data>) -> WalkResult<()>,
    ) -> WalkResult<bool> {
        let entry_pos = cursor.pos() as u64;

        if desc.version >= 2 {
            let abbrev_code = cursor.read_uleb128_u32()?;
            if abbrev_code == 0 {
                visitor(desc, EntryEvent::EndOfChildren)?;
                return Ok(true);
            }
            let table = self.abbrevs.table_at(desc.abbrev_table_offset)?;
            let decl = table
                .get(abbrev_code)
                .ok_or_else(|| WalkError::new(WalkErrorKind::InvalidAbbrevCode))?
                .clone();

            visitor(
                desc,
                EntryEvent::Begin {
                    tag: decl.tag,
                    offset: self.section_addr + entry_pos,
                    has_children: decl.has_children,
                },
            )?;

            for a in &decl.attrs {
                let form = resolve_form(cursor, a.form)?;
                let value = self.read_attribute_value(cursor, desc, form)?;
                self.check_v1_sibling(desc, decl.tag, a.attr, value);
                visitor(
                    desc,
                    EntryEvent::Attribute {
                        attr: a.attr,
                        form,
                        value,
                    },
                )?;
            }
            visitor(desc, EntryEvent::End)?;
            Ok(true)
        } else {
            let entry_size = cursor.read_u32()? as u64;
            if entry_size < 8 {
                cursor.skip((entry_size.saturating_sub(4)) as usize)?;
                return Ok(true);
            }
            let tag = cursor.read_u16()?;
            visitor(
                desc,
                EntryEvent::Begin {
                    tag,
                    offset: self.section_addr + entry_pos,
                    has_children: false,
                },
            )?;
            while (cursor.pos() as u64) < entry_pos + entry_size {
                let word = cursor.read_u16()?;
                let form = word & 0xF;
                let attr = (word & 0xfff0) >> 4;
                let value = self.read_attribute_value(cursor, desc, form)?;
                self.check_v1_sibling(desc, tag, attr, value);
                visitor(desc, EntryEvent::Attribute { attr, form, value })?;
            }
            visitor(desc, EntryEvent::End)?;
            if desc.unit_size == 0 && cursor.at_end() {
                return Err(WalkError::new(WalkErrorKind::MissingCompileUnitSize));
            }
            Ok(true)
        }
    }

    /// The v1 heuristic: within a `TAG_compile_unit`, the first `AT_sibling`
    /// fixes the unit's total size.
    fn check_v1_sibling(
        &self,
        desc: &mut UnitDescriptor,
        tag: u16,
        attr: u16,
        value: AttributeValue<'_>,
    ) {
        if desc.version == 1 && tag == TAG_COMPILE_UNIT && attr == AT_SIBLING && desc.unit_size == 0 {
            if let AttributeValue::Reference(target) = value {
                desc.unit_size = target - self.section_addr - desc.unit_offset;
            }
        }
    }

    fn read_attribute_value(
        &self,
        cursor: &mut Cursor<'data>,
        desc: &UnitDescriptor,
        form: u16,
    ) -> WalkResult<AttributeValue<'data>> {
        Ok(match form {
            FORM_ADDR => AttributeValue::Reference(cursor.read_address()?),
            FORM_REF => AttributeValue::Reference(cursor.read_u32()? as u64),
            FORM_REF_ADDR => {
                let size = if desc.version >= 3 {
                    if desc.is_64bit {
                        8
                    } else {
                        4
                    }
                } else {
                    desc.address_size
                };
                AttributeValue::Reference(cursor.read_uint(size)?)
            }
            FORM_REF1 => {
                let v = cursor.read_u8()? as u64;
                self.rel_ref(cursor, desc, v)?
            }
            FORM_REF2 => {
                let v = cursor.read_u16()? as u64;
                self.rel_ref(cursor, desc, v)?
            }
            FORM_REF4 => {
                let v = cursor.read_u32()? as u64;
                self.rel_ref(cursor, desc, v)?
            }
            FORM_REF8 => {
                let v = cursor.read_u64()?;
                self.rel_ref(cursor, desc, v)?
            }
            FORM_REF_UDATA => {
                let v = cursor.read_uleb128_u64()?;
                self.rel_ref(cursor, desc, v)?
            }
            FORM_BLOCK1 => {
                let len = cursor.read_u8()? as usize;
                let offset = self.section_addr + cursor.pos() as u64;
                AttributeValue::Block {
                    bytes: cursor.read_bytes(len)?,
                    offset,
                }
            }
            FORM_BLOCK2 => {
                let len = cursor.read_u16()? as usize;
                let offset = self.section_addr + cursor.pos() as u64;
                AttributeValue::Block {
                    bytes: cursor.read_bytes(len)?,
                    offset,
                }
            }
            FORM_BLOCK4 => {
                let len = cursor.read_u32()? as usize;
                let offset = self.section_addr + cursor.pos() as u64;
                AttributeValue::Block {
                    bytes: cursor.read_bytes(len)?,
                    offset,
                }
            }
            FORM_BLOCK => {
                let len = cursor.read_uleb128_u64()? as usize;
                let offset = self.section_addr + cursor.pos() as u64;
                AttributeValue::Block {
                    bytes: cursor.read_bytes(len)?,
                    offset,
                }
            }
            FORM_DATA1 => {
                let start = cursor.pos();
                let v = cursor.read_u8()? as u64;
                AttributeValue::Data {
                    value: v,
                    raw: cursor.consumed_since(start),
                    offset: self.section_addr + start as u64,
                }
            }
            FORM_DATA2 => {
                let start = cursor.pos();
                let v = cursor.read_u16()? as u64;
                AttributeValue::Data {
                    value: v,
                    raw: cursor.consumed_since(start),
                    offset: self.section_addr + start as u64,
                }
            }
            FORM_DATA4 => {
                let start = cursor.pos();
                let v = cursor.read_u32()? as u64;
                AttributeValue::Data {
                    value: v,
                    raw: cursor.consumed_since(start),
                    offset: self.section_addr + start as u64,
                }
            }
            FORM_DATA8 => {
                let start = cursor.pos();
                let v = cursor.read_u64()?;
                AttributeValue::Data {
                    value: v,
                    raw: cursor.consumed_since(start),
                    offset: self.section_addr + start as u64,
                }
            }
            FORM_FLAG => {
                let start = cursor.pos();
                let v = cursor.read_u8()? as u64;
                AttributeValue::Data {
                    value: v,
                    raw: cursor.consumed_since(start),
                    offset: self.section_addr + start as u64,
                }
            }
            FORM_SDATA => AttributeValue::SignedData(cursor.read_sleb128_i64()?),
            FORM_UDATA => AttributeValue::UnsignedData(cursor.read_uleb128_u64()?),
            FORM_STRING => AttributeValue::Str(cursor.read_cstr()?),
            FORM_STRP => {
                let size = if desc.is_64bit { 8 } else { 4 };
                let offset = cursor.read_uint(size)? as usize;
                let str_data = self
                    .debug_str
                    .ok_or_else(|| WalkError::new(WalkErrorKind::StrpOutOfRange))?;
                let mut str_cursor = Cursor::new(str_data, offset, self.endian, desc.address_size);
                let s = str_cursor
                    .read_cstr()
                    .map_err(|_| WalkError::new(WalkErrorKind::StrpOutOfRange))?;
                AttributeValue::Str(s)
            }
            _ => return Err(WalkError::new(WalkErrorKind::UnknownForm)),
        })
    }

    /// Resolves a unit-relative `REFn`/`REF_UDATA` offset to a
    /// section-absolute one, rejecting offsets past the unit's end (when
    /// known).
    fn rel_ref(
        &self,
        _cursor: &Cursor<'data>,
        desc: &UnitDescriptor,
        offset: u64,
    ) -> WalkResult<AttributeValue<'data>> {
        if desc.unit_size != 0 && offset >= desc.unit_size {
            return Err(WalkError::new(WalkErrorKind::RefOutOfRange));
        }
        Ok(AttributeValue::Reference(
            self.section_addr + desc.unit_offset + offset,
        ))
    }
}
