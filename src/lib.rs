//! A cache over DWARF (v1-v3) debug information and ELF symbol tables.
//!
//! This crate turns the `.debug_info`/`.debug_abbrev`/`.debug_line` sections
//! of an ELF object into an in-memory graph of debugging information entries
//! (DIEs) plus their line-number programs, built once per object and shared
//! behind an [`Arc`](std::sync::Arc) from then on. It covers three DWARF
//! generations: the pre-standard v1 format (legacy `.debug` section, packed
//! attribute/form words, `MOD_*` type-modifier bytecode), and the v2/v3
//! header-based format most toolchains still emit.
//!
//! The entry points are:
//!
//!  - [`get_dwarf_cache`] builds (or returns a cached) [`DwarfCache`] for an
//!    [`ElfObjectFile`].
//!  - [`DwarfCache::object`] and the `find_*` helpers on [`cache`] walk the
//!    resulting DIE graph.
//!  - [`load_line_numbers`] runs a compilation unit's line-number program.
//!  - [`calc_symbol_name_hash`] and [`SymbolSection::find_by_name`] look up
//!    ELF symbols by name.
//!  - [`read_dwarf_object_property`] and [`get_numeric_property_value`]
//!    evaluate an object's attributes into caller-usable values.
//!
//! # Background
//!
//! Earlier DWARF producers (notably pre-DWARF2 compilers) emit debug
//! information in an undocumented but widely-deployed v1 shape: no
//! initial-length/version header, a `.debug` section name instead of
//! `.debug_info`, and attributes packed as `(attr << 4) | form` 16-bit words
//! instead of separate ULEB128-coded attribute and form fields. This crate
//! normalizes both shapes into one event stream ([`EntryEvent`]) before any
//! of the rest of the cache-building logic has to care which DWARF
//! generation it's looking at.

#![warn(missing_docs)]

mod abbrev;
mod cache;
mod consts;
mod elf;
mod entry;
mod line;
mod property;
mod reader;
mod symtab;

pub use crate::abbrev::{AbbrevCache, AbbrevError, AbbrevErrorKind};
pub use crate::cache::{
    CacheError, CacheErrorKind, CompUnit, DwarfCache, DwarfCacheCell, ObjIdx, ObjectInfo,
};
pub use crate::elf::{ElfError, ElfErrorKind, ElfObjectFile, ObjectFile, Section};
pub use crate::entry::{AttributeValue, EntryEvent, WalkError, WalkErrorKind};
pub use crate::line::{FileEntry, LineError, LineErrorKind, LineProgram, LineRow};
pub use crate::property::{
    read_and_evaluate_dwarf_object_property, read_dwarf_object_property, unit_of,
    BreakpointObserver, LocationExpressionEvaluator, PropertyError, PropertyErrorKind,
    PropertyValue, TargetMemory,
};
pub use crate::reader::{Endian, ReadError, ReadErrorKind};
pub use crate::symtab::{name_hash as calc_symbol_name_hash, SymbolSection};

use std::sync::Arc;

/// Builds (or returns the already-built) [`DwarfCache`] for `object`,
/// via `cell`. Equivalent to calling [`DwarfCacheCell::get_or_build`]
/// directly; kept as a free function since that's the facade callers are
/// expected to reach for first.
pub fn get_dwarf_cache<'data>(
    cell: &DwarfCacheCell<'data>,
    object: &'data ElfObjectFile<'data>,
) -> Result<Arc<DwarfCache<'data>>, Arc<CacheError>> {
    cell.get_or_build(object)
}

/// Looks up `object`'s numeric const-value/data-member-location property.
pub fn get_numeric_property_value(
    cache: &DwarfCache<'_>,
    object: &ObjectInfo,
    attr: u16,
) -> Result<i64, PropertyError> {
    crate::property::get_numeric_property_value(cache, object, attr)
}
