//! Cache builder.
//!
//! Two-pass: an [`AbbrevCache`] load over `.debug_abbrev`, then a single walk
//! of `.debug_info` (or the legacy `.debug` section, for v1) that materializes
//! every DIE into an arena and stitches parent/sibling/type edges as it goes.
//! Objects are addressed and deduplicated by absolute file offset, the same
//! identity `find_object_info`/`find_comp_unit` key on.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use thiserror::Error;

use crate::abbrev::{AbbrevCache, AbbrevError};
use crate::consts::*;
use crate::elf::{ElfError, ElfObjectFile, ObjectFile};
use crate::entry::{AttributeValue, EntryEvent, UnitDescriptor, WalkError, Walker};
use crate::line::{LineError, LineProgram};
use crate::reader::{Cursor, Endian};
use crate::symtab::{self, SymbolSection};

/// An index into [`DwarfCache::objects`]; arena-relative so the whole graph
/// can be freed as one `Vec` instead of needing a pointer-chasing sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjIdx(u32);

/// One DIE, materialized from its begin/attribute events.
#[derive(Debug, Clone, Default)]
pub struct ObjectInfo {
    pub id: u64,
    pub tag: u16,
    pub comp_unit: Option<usize>,
    pub parent: Option<ObjIdx>,
    pub sibling: Option<ObjIdx>,
    pub children: Option<ObjIdx>,
    pub ty: Option<ObjIdx>,
    pub encoding: u16,
    pub low_pc: u64,
    pub high_pc: u64,
    pub name: Option<String>,
    pub byte_size: Option<u64>,
    pub const_value: Option<i64>,
    pub data_member_location: Option<i64>,
}

/// A single compilation unit, linking the top-level object tree it owns.
#[derive(Debug, Clone, Default)]
pub struct CompUnit {
    pub id: u64,
    pub low_pc: u64,
    pub high_pc: u64,
    pub debug_ranges_offset: Option<u64>,
    pub name: Option<String>,
    pub comp_dir: Option<String>,
    pub line_info_offset: Option<u64>,
    pub base_types: Option<usize>,
    pub children: Option<ObjIdx>,
    /// The unit header's framing, captured from the [`UnitDescriptor`] seen
    /// while walking it. Lets a property lookup reconstruct a [`Walker`] and
    /// re-enter the unit at an arbitrary DIE's offset later.
    pub version: u16,
    pub address_size: u8,
    pub is_64bit: bool,
    pub abbrev_table_offset: u64,
    pub unit_offset: u64,
    pub unit_size: u64,
}

/// The fully materialized cache for one object file: the DIE/type graph,
/// symbol tables, and the handles needed to run the line program lazily.
pub struct DwarfCache<'data> {
    pub objects: Vec<ObjectInfo>,
    pub comp_units: Vec<CompUnit>,
    pub sym_sections: Vec<SymbolSection>,
    /// `(symbol-section index, symbol index)`, ascending by address.
    pub sorted_symbols: Vec<(usize, usize)>,
    /// Mirrors [`Builder::objects_by_offset`], carried over so offset lookup
    /// stays O(1) after the build finishes instead of falling back to a scan
    /// of `objects`.
    objects_by_offset: HashMap<u64, ObjIdx>,
    debug_info: &'data [u8],
    debug_line: Option<&'data [u8]>,
    debug_str: Option<&'data [u8]>,
    abbrevs: Arc<AbbrevCache>,
    is_legacy: bool,
    section_addr: u64,
    endian: Endian,
}

impl<'data> DwarfCache<'data> {
    pub fn object(&self, idx: ObjIdx) -> &ObjectInfo {
        &self.objects[idx.0 as usize]
    }

    /// Looks up the object at absolute section offset `offset`, if any DIE
    /// was materialized there.
    pub fn find_object(&self, offset: u64) -> Option<ObjIdx> {
        self.objects_by_offset.get(&offset).copied()
    }

    /// Runs `unit`'s line-number program, if it declares one.
    pub fn line_program(&self, unit: &CompUnit) -> Option<Result<LineProgram, LineError>> {
        let offset = unit.line_info_offset?;
        let data = self.debug_line?;
        Some(crate::line::load_line_numbers(data, offset as usize, self.endian))
    }

    /// The object file's byte order, used to interpret property values read
    /// as raw bytes rather than through a FORM that already carries a sign.
    pub fn is_big_endian(&self) -> bool {
        matches!(self.endian, Endian::Big)
    }

    /// Re-enters the walker at `object`'s own DIE offset with a
    /// single-attribute latching visitor, mirroring a fresh entry read
    /// limited to the one attribute a property lookup cares about. Returns
    /// the attribute's form alongside its value so the caller can dispatch
    /// on it without re-deriving it from `object`'s already-materialized
    /// fields.
    pub(crate) fn read_attribute(
        &self,
        object: &ObjectInfo,
        attr: u16,
    ) -> CacheResult<Option<(u16, AttributeValue<'_>)>> {
        let unit_idx = object
            .comp_unit
            .ok_or_else(|| CacheError::new(CacheErrorKind::MalformedEntry))?;
        let unit = &self.comp_units[unit_idx];

        let mut desc = UnitDescriptor {
            version: unit.version,
            address_size: unit.address_size,
            is_64bit: unit.is_64bit,
            abbrev_table_offset: unit.abbrev_table_offset,
            unit_offset: unit.unit_offset,
            unit_size: unit.unit_size,
        };

        let walker = Walker {
            section_addr: self.section_addr,
            endian: self.endian,
            abbrevs: self.abbrevs.as_ref(),
            debug_str: self.debug_str,
            is_legacy_debug_section: self.is_legacy,
        };

        let local_offset = (object.id - self.section_addr) as usize;
        let mut cursor = Cursor::new(self.debug_info, local_offset, self.endian, unit.address_size);

        let mut found = None;
        walker.read_entry(&mut cursor, &mut desc, &mut |_desc, event| {
            if let EntryEvent::Attribute { attr: a, form, value } = event {
                if a == attr && found.is_none() {
                    found = Some((form, value));
                }
            }
            Ok(())
        })?;
        Ok(found)
    }
}

/// Error kind for [`CacheError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum CacheErrorKind {
    InvalidElf,
    MissingDebugInfo,
    MissingAbbrev,
    MalformedAbbrev,
    MalformedEntry,
    MissingSibling,
    DuplicateSection,
}

impl fmt::Display for CacheErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidElf => write!(f, "not a valid ELF object"),
            Self::MissingDebugInfo => write!(f, "no .debug_info or .debug section"),
            Self::MissingAbbrev => write!(f, "no .debug_abbrev section"),
            Self::MalformedAbbrev => write!(f, "malformed .debug_abbrev section"),
            Self::MalformedEntry => write!(f, "malformed debug info entry"),
            Self::MissingSibling => {
                write!(f, "v1 compile unit has neither unit size nor sibling attribute")
            }
            Self::DuplicateSection => write!(f, "object has more than one section of the same name"),
        }
    }
}

#[derive(Debug, Error)]
#[error("{kind}")]
pub struct CacheError {
    kind: CacheErrorKind,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl CacheError {
    fn new(kind: CacheErrorKind) -> Self {
        Self { kind, source: None }
    }

    fn with(kind: CacheErrorKind, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> CacheErrorKind {
        self.kind
    }
}

impl From<ElfError> for CacheError {
    fn from(e: ElfError) -> Self {
        CacheError::with(CacheErrorKind::InvalidElf, e)
    }
}

impl From<AbbrevError> for CacheError {
    fn from(e: AbbrevError) -> Self {
        CacheError::with(CacheErrorKind::MalformedAbbrev, e)
    }
}

impl From<WalkError> for CacheError {
    fn from(e: WalkError) -> Self {
        use crate::entry::WalkErrorKind;
        let kind = match e.kind() {
            WalkErrorKind::MissingCompileUnitSize => CacheErrorKind::MissingSibling,
            _ => CacheErrorKind::MalformedEntry,
        };
        CacheError::with(kind, e)
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Scan-local mutable state for one cache build, replacing what a
/// callback-style walker would otherwise thread through process-wide
/// statics. One `Builder` lives for exactly one [`build`] call and is
/// dropped at the end of it.
struct Builder {
    objects: Vec<ObjectInfo>,
    objects_by_offset: HashMap<u64, ObjIdx>,
    comp_units: Vec<CompUnit>,
    comp_units_by_id: HashMap<u64, usize>,
    endian: Endian,
    section_addr: u64,
}

/// One tree level's bookkeeping while walking a unit's entries: the parent
/// object (`None` at the unit's top level), the previous sibling seen at
/// this level, and when this level should be popped.
struct Level {
    parent: Option<ObjIdx>,
    prev_sibling: Option<ObjIdx>,
    /// For v1 units (no explicit nesting marker): pop once the next entry's
    /// offset reaches this absolute position. `None` for v2+ units, which
    /// pop on an explicit [`EntryEvent::EndOfChildren`] instead.
    pop_at: Option<u64>,
}

impl Builder {
    fn find_object(&mut self, offset: u64) -> ObjIdx {
        if let Some(&idx) = self.objects_by_offset.get(&offset) {
            return idx;
        }
        let idx = ObjIdx(self.objects.len() as u32);
        self.objects.push(ObjectInfo {
            id: offset,
            ..Default::default()
        });
        self.objects_by_offset.insert(offset, idx);
        idx
    }

    fn find_comp_unit(&mut self, id: u64) -> usize {
        if let Some(&idx) = self.comp_units_by_id.get(&id) {
            return idx;
        }
        let idx = self.comp_units.len();
        self.comp_units.push(CompUnit {
            id,
            ..Default::default()
        });
        self.comp_units_by_id.insert(id, idx);
        idx
    }

    fn set(&mut self, idx: ObjIdx) -> &mut ObjectInfo {
        &mut self.objects[idx.0 as usize]
    }

    /// Expands a v1 `mod_fund_type`/`mod_u_d_type` modifier block, per
    /// `read_mod_fund_type`/`read_mod_user_def_type`: the block's tail
    /// identifies (or for `mod_fund_type`, *is*) the base type, and earlier
    /// bytes are modifier codes applied right-to-left, each one synthesizing
    /// a new pointer/reference-to object keyed by its own offset in the block.
    fn expand_modifier_block(
        &mut self,
        comp_unit: usize,
        bytes: &[u8],
        block_offset: u64,
        base: ObjIdx,
        modifier_start: usize,
    ) -> ObjIdx {
        let mut ty = base;
        let mut pos = modifier_start;
        while pos > 0 {
            pos -= 1;
            let tag = match bytes[pos] {
                MOD_POINTER_TO => TAG_POINTER_TYPE,
                MOD_REFERENCE_TO => TAG_REFERENCE_TYPE,
                MOD_CONST | MOD_VOLATILE => continue,
                _ => continue,
            };
            let mod_idx = self.find_object(block_offset + pos as u64);
            let modded = self.set(mod_idx);
            modded.tag = tag;
            modded.comp_unit = Some(comp_unit);
            modded.ty = Some(ty);
            ty = mod_idx;
        }
        ty
    }
}

/// Builds a [`DwarfCache`] from an ELF object.
pub fn build<'data>(object: &'data ElfObjectFile<'data>) -> CacheResult<DwarfCache<'data>> {
    let endian = object.endian();
    let (debug_info_section, is_legacy) = match object.section(".debug_info") {
        Some(s) => (s, false),
        None => match object.section(".debug") {
            Some(s) => (s, true),
            None => return Err(CacheError::new(CacheErrorKind::MissingDebugInfo)),
        },
    };
    if object.section_count(".debug_abbrev") > 1 {
        return Err(CacheError::new(CacheErrorKind::DuplicateSection));
    }
    let abbrev_section = object
        .section(".debug_abbrev")
        .ok_or_else(|| CacheError::new(CacheErrorKind::MissingAbbrev))?;
    let abbrevs = Arc::new(AbbrevCache::load(abbrev_section.data, endian)?);
    if object.section_count(".debug_str") > 1 {
        return Err(CacheError::new(CacheErrorKind::DuplicateSection));
    }
    let debug_str = object.section(".debug_str").map(|s| s.data);

    let mut builder = Builder {
        objects: Vec::new(),
        objects_by_offset: HashMap::new(),
        comp_units: Vec::new(),
        comp_units_by_id: HashMap::new(),
        endian,
        section_addr: debug_info_section.addr,
    };

    let walker = Walker {
        section_addr: debug_info_section.addr,
        endian,
        abbrevs: abbrevs.as_ref(),
        debug_str,
        is_legacy_debug_section: is_legacy,
    };

    let mut cursor = Cursor::new(debug_info_section.data, 0, endian, 4);
    while !cursor.at_end() {
        let mut current_unit: Option<usize> = None;
        let mut current_object: Option<ObjIdx> = None;
        let mut levels: Vec<Level> = vec![Level {
            parent: None,
            prev_sibling: None,
            pop_at: None,
        }];
        let mut pending_sibling: Option<u64> = None;

        walker.read_unit(&mut cursor, &mut |desc, event| {
            handle_event(
                &mut builder,
                desc,
                event,
                &mut current_unit,
                &mut current_object,
                &mut levels,
                &mut pending_sibling,
            )
        })?;
    }

    let (sym_sections, sorted_symbols) = symtab::load_symbol_tables(object.elf());

    Ok(DwarfCache {
        objects: builder.objects,
        comp_units: builder.comp_units,
        sym_sections,
        sorted_symbols,
        objects_by_offset: builder.objects_by_offset,
        debug_info: debug_info_section.data,
        debug_line: object.section(".debug_line").map(|s| s.data),
        debug_str,
        abbrevs,
        is_legacy,
        section_addr: debug_info_section.addr,
        endian,
    })
}

#[allow(clippy::too_many_arguments)]
fn handle_event(
    builder: &mut Builder,
    desc: &UnitDescriptor,
    event: EntryEvent<'_>,
    current_unit: &mut Option<usize>,
    current_object: &mut Option<ObjIdx>,
    levels: &mut Vec<Level>,
    pending_sibling: &mut Option<u64>,
) -> Result<(), WalkError> {
    // A v1 unit's final size is only known once its AT_sibling is seen, so
    // the stored framing is refreshed on every event rather than just once
    // at Begin.
    if let Some(unit_idx) = *current_unit {
        let unit = &mut builder.comp_units[unit_idx];
        unit.version = desc.version;
        unit.address_size = desc.address_size;
        unit.is_64bit = desc.is_64bit;
        unit.abbrev_table_offset = desc.abbrev_table_offset;
        unit.unit_offset = desc.unit_offset;
        unit.unit_size = desc.unit_size;
    }

    match event {
        EntryEvent::Begin {
            tag,
            offset,
            has_children,
        } => {
            if tag == TAG_COMPILE_UNIT && current_unit.is_none() {
                let unit_idx = builder.find_comp_unit(offset);
                *current_unit = Some(unit_idx);
                *current_object = None;
                return Ok(());
            }

            if let Some(unit_idx) = *current_unit {
                pop_v1_levels(levels, offset);
                let idx = builder.find_object(offset);
                {
                    let info = builder.set(idx);
                    info.tag = tag;
                    info.comp_unit = Some(unit_idx);
                }
                let level = levels.last_mut().expect("root level always present");
                builder.set(idx).parent = level.parent;
                if let Some(prev) = level.prev_sibling {
                    builder.set(prev).sibling = Some(idx);
                } else if let Some(parent) = level.parent {
                    builder.set(parent).children = Some(idx);
                } else {
                    builder.comp_units[unit_idx].children = Some(idx);
                }
                level.prev_sibling = Some(idx);
                *current_object = Some(idx);
                *pending_sibling = None;

                if has_children {
                    levels.push(Level {
                        parent: Some(idx),
                        prev_sibling: None,
                        pop_at: None,
                    });
                }
            }
        }
        EntryEvent::EndOfChildren => {
            if levels.len() > 1 {
                levels.pop();
            }
        }
        EntryEvent::Attribute { attr, form: _, value } => {
            if current_object.is_none() && current_unit.is_some() {
                apply_comp_unit_attribute(builder, current_unit.expect("checked above"), attr, value);
                return Ok(());
            }
            if let (Some(idx), Some(unit_idx)) = (*current_object, *current_unit) {
                apply_object_attribute(builder, idx, unit_idx, attr, value, pending_sibling)?;
            }
        }
        EntryEvent::End => {
            if let Some(idx) = *current_object {
                let info = builder.set(idx);
                if info.tag == TAG_ENUMERATOR && info.ty.is_none() {
                    info.ty = info.parent;
                }
            }
            if current_object.is_none() {
                // End of the compile_unit DIE's own attributes; nothing to close.
            } else if let Some(target) = pending_sibling.take() {
                if let Some(level) = levels.last_mut() {
                    level.pop_at = Some(target);
                }
            }
        }
    }
    Ok(())
}

fn pop_v1_levels(levels: &mut Vec<Level>, offset: u64) {
    while levels.len() > 1 {
        let pop_at = levels.last().and_then(|l| l.pop_at);
        match pop_at {
            Some(target) if offset >= target => {
                levels.pop();
            }
            _ => break,
        }
    }
}

fn apply_comp_unit_attribute(builder: &mut Builder, unit_idx: usize, attr: u16, value: AttributeValue<'_>) {
    let unit = &mut builder.comp_units[unit_idx];
    match attr {
        AT_LOW_PC => {
            if let AttributeValue::Reference(v) = value {
                unit.low_pc = v;
            }
        }
        AT_HIGH_PC => {
            if let AttributeValue::Reference(v) = value {
                unit.high_pc = v;
            }
        }
        AT_RANGES => {
            if let Some(v) = numeric_value(value) {
                unit.debug_ranges_offset = Some(v as u64);
            }
        }
        AT_NAME => {
            if let AttributeValue::Str(s) = value {
                unit.name = Some(s.to_owned());
            }
        }
        AT_COMP_DIR => {
            if let AttributeValue::Str(s) = value {
                unit.comp_dir = Some(s.to_owned());
            }
        }
        AT_STMT_LIST => {
            if let Some(v) = numeric_value(value) {
                unit.line_info_offset = Some(v as u64);
            }
        }
        AT_BASE_TYPES => {
            if let AttributeValue::Reference(v) = value {
                let base_idx = builder.find_comp_unit(v);
                builder.comp_units[unit_idx].base_types = Some(base_idx);
            }
        }
        _ => {}
    }
}

fn apply_object_attribute(
    builder: &mut Builder,
    idx: ObjIdx,
    unit_idx: usize,
    attr: u16,
    value: AttributeValue<'_>,
    pending_sibling: &mut Option<u64>,
) -> Result<(), WalkError> {
    match attr {
        AT_SIBLING => {
            if let AttributeValue::Reference(v) = value {
                *pending_sibling = Some(v);
            }
        }
        AT_TYPE => {
            if let AttributeValue::Reference(v) = value {
                let ty_idx = builder.find_object(v);
                builder.set(idx).ty = Some(ty_idx);
            }
        }
        V1_AT_FUND_TYPE => {
            if let AttributeValue::Data { value: enc, offset, .. } = value {
                let ty_idx = builder.find_object(offset);
                {
                    let ty = builder.set(ty_idx);
                    ty.tag = TAG_LO_USER;
                    ty.comp_unit = Some(unit_idx);
                    ty.encoding = enc as u16;
                }
                builder.set(idx).ty = Some(ty_idx);
            }
        }
        V1_AT_USER_DEF_TYPE => {
            if let AttributeValue::Reference(v) = value {
                let ty_idx = builder.find_object(v);
                builder.set(idx).ty = Some(ty_idx);
            }
        }
        V1_AT_MOD_FUND_TYPE => {
            if let AttributeValue::Block { bytes, offset } = value {
                if let Some((&encoding, modifiers)) = bytes.split_last() {
                    let base_offset = offset + bytes.len() as u64 - 1;
                    let base_idx = builder.find_object(base_offset);
                    {
                        let base = builder.set(base_idx);
                        base.tag = TAG_LO_USER;
                        base.comp_unit = Some(unit_idx);
                        base.encoding = encoding as u16;
                    }
                    let ty = builder.expand_modifier_block(
                        unit_idx,
                        bytes,
                        offset,
                        base_idx,
                        modifiers.len(),
                    );
                    builder.set(idx).ty = Some(ty);
                }
            }
        }
        V1_AT_MOD_U_D_TYPE => {
            if let AttributeValue::Block { bytes, offset } = value {
                if bytes.len() >= 4 {
                    let tail = &bytes[bytes.len() - 4..];
                    let big_endian = matches!(builder.endian, Endian::Big);
                    let mut ref_offset: u32 = 0;
                    for (i, &b) in tail.iter().enumerate() {
                        let shift = if big_endian { 3 - i } else { i };
                        ref_offset |= (b as u32) << (shift * 8);
                    }
                    let base_offset = builder.section_addr + ref_offset as u64;
                    let base_idx = builder.find_object(base_offset);
                    let ty = builder.expand_modifier_block(
                        unit_idx,
                        bytes,
                        offset,
                        base_idx,
                        bytes.len() - 4,
                    );
                    builder.set(idx).ty = Some(ty);
                }
            }
        }
        AT_ENCODING => {
            if let Some(v) = numeric_value(value) {
                builder.set(idx).encoding = v as u16;
            }
        }
        AT_LOW_PC => {
            if let AttributeValue::Reference(v) = value {
                builder.set(idx).low_pc = v;
            }
        }
        AT_HIGH_PC => {
            if let AttributeValue::Reference(v) = value {
                builder.set(idx).high_pc = v;
            }
        }
        AT_NAME => {
            if let AttributeValue::Str(s) = value {
                builder.set(idx).name = Some(s.to_owned());
            }
        }
        AT_BYTE_SIZE => {
            if let Some(v) = numeric_value(value) {
                builder.set(idx).byte_size = Some(v as u64);
            }
        }
        AT_CONST_VALUE => {
            if let Some(v) = numeric_value(value) {
                builder.set(idx).const_value = Some(v);
            }
        }
        AT_DATA_MEMBER_LOCATION => {
            if let Some(v) = numeric_value(value) {
                builder.set(idx).data_member_location = Some(v);
            }
        }
        _ => {}
    }
    Ok(())
}

fn numeric_value(value: AttributeValue<'_>) -> Option<i64> {
    match value {
        AttributeValue::Data { value, .. } => Some(value as i64),
        AttributeValue::UnsignedData(v) => Some(v as i64),
        AttributeValue::SignedData(v) => Some(v),
        AttributeValue::Reference(v) => Some(v as i64),
        _ => None,
    }
}

/// Lazily built, sticky cache for one object's worth of debug info: built
/// once on first access, with build failures cached and replayed rather than
/// retried.
#[derive(Default)]
pub struct DwarfCacheCell<'data> {
    cell: OnceLock<Result<Arc<DwarfCache<'data>>, Arc<CacheError>>>,
}

impl<'data> DwarfCacheCell<'data> {
    pub fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    pub fn get_or_build(
        &self,
        object: &'data ElfObjectFile<'data>,
    ) -> Result<Arc<DwarfCache<'data>>, Arc<CacheError>> {
        self.cell
            .get_or_init(|| build(object).map(Arc::new).map_err(Arc::new))
            .clone()
    }
}

/// Test-only fixture builder, used by other modules' unit tests that need a
/// [`DwarfCache`] with a hand-picked object graph but no real `.debug_info`
/// bytes behind it.
#[cfg(test)]
pub(crate) fn test_cache_with_objects(objects: Vec<ObjectInfo>) -> DwarfCache<'static> {
    let objects_by_offset = objects
        .iter()
        .enumerate()
        .map(|(i, o)| (o.id, ObjIdx(i as u32)))
        .collect();
    DwarfCache {
        objects,
        comp_units: Vec::new(),
        sym_sections: Vec::new(),
        sorted_symbols: Vec::new(),
        objects_by_offset,
        debug_info: &[],
        debug_line: None,
        debug_str: None,
        abbrevs: Arc::new(AbbrevCache::default()),
        is_legacy: false,
        section_addr: 0,
        endian: Endian::Little,
    }
}
