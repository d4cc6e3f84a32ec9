//! Attribute evaluation facade.
//!
//! Resolves a DIE's attribute to a caller-usable value. Most attributes are
//! immediate scalars already captured on [`ObjectInfo`] during the cache
//! build, but a few (object location, array bounds, union members) need to
//! re-enter the walker at the DIE's own offset, read a raw FORM, and either
//! hand it back as bytes or run a location expression against target memory.
//! The real memory/breakpoint/expression collaborators are out of scope
//! here, so this module is driven through three small traits instead of
//! calling into them directly.

use std::fmt;

use thiserror::Error;

use crate::cache::{CompUnit, DwarfCache, ObjectInfo};
use crate::consts::*;
use crate::entry::AttributeValue;

/// The narrow view of inferior memory a location expression evaluator needs.
pub trait TargetMemory {
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), PropertyError>;
}

/// Lets a location-expression evaluation honor active breakpoints set on
/// the memory it reads.
pub trait BreakpointObserver {
    fn on_memory_read(&self, address: u64, len: usize);
}

/// Stands in for `dwarf_evaluate_expression`: evaluates a DWARF location
/// expression block against target memory, producing either an address
/// (the location of the value) or the value itself. `base` is the object
/// address a member-location expression is relative to (`DW_OP_push_object_address`);
/// callers resolving a top-level location pass `0`.
pub trait LocationExpressionEvaluator {
    fn evaluate(
        &self,
        expr: &[u8],
        base: u64,
        memory: &dyn TargetMemory,
        breakpoints: Option<&dyn BreakpointObserver>,
    ) -> Result<PropertyValue<'static>, PropertyError>;
}

/// A resolved property value.
#[derive(Debug, Clone, Copy)]
pub enum PropertyValue<'a> {
    /// An address: the object's own PC, or a reference target's location.
    Address(u64),
    /// A view into the DIE's own attribute bytes (`DATA*`/`BLOCK*`/`FLAG`
    /// forms), plus the form it came from and the unit's byte order.
    Bytes {
        bytes: &'a [u8],
        form: u16,
        big_endian: bool,
    },
    /// Bytes freshly read from target memory while resolving a `REF*`
    /// target's value: 1-8 bytes, per the target's `AT_byte_size`.
    MemoryBytes {
        bytes: [u8; 8],
        len: u8,
        big_endian: bool,
    },
    /// `SDATA`/`UDATA`: the scalar itself.
    Scalar(i64),
}

/// Error kind for [`PropertyError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum PropertyErrorKind {
    /// The attribute isn't present on this DIE (`ENOENT`).
    AttributeNotFound,
    /// A reference-resolved value's size wasn't in `1..=8` bytes.
    InvalidDataType,
    MemoryReadFailed,
    EvaluationFailed,
}

impl fmt::Display for PropertyErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttributeNotFound => write!(f, "attribute not present on this object"),
            Self::InvalidDataType => write!(f, "referenced value has an unsupported byte size"),
            Self::MemoryReadFailed => write!(f, "failed to read target memory"),
            Self::EvaluationFailed => write!(f, "location expression evaluation failed"),
        }
    }
}

#[derive(Debug, Error)]
#[error("{kind}")]
pub struct PropertyError {
    kind: PropertyErrorKind,
}

impl PropertyError {
    pub fn new(kind: PropertyErrorKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> PropertyErrorKind {
        self.kind
    }
}

impl From<crate::cache::CacheError> for PropertyError {
    fn from(_: crate::cache::CacheError) -> Self {
        PropertyError::new(PropertyErrorKind::EvaluationFailed)
    }
}

pub type PropertyResult<T> = Result<T, PropertyError>;

fn is_ref_form(form: u16) -> bool {
    matches!(
        form,
        FORM_REF | FORM_REF_ADDR | FORM_REF1 | FORM_REF2 | FORM_REF4 | FORM_REF8 | FORM_REF_UDATA
    )
}

fn is_data_or_block_form(form: u16) -> bool {
    matches!(
        form,
        FORM_DATA1
            | FORM_DATA2
            | FORM_DATA4
            | FORM_DATA8
            | FORM_FLAG
            | FORM_BLOCK1
            | FORM_BLOCK2
            | FORM_BLOCK4
            | FORM_BLOCK
    )
}

fn is_block_form(form: u16) -> bool {
    matches!(form, FORM_BLOCK1 | FORM_BLOCK2 | FORM_BLOCK4 | FORM_BLOCK)
}

/// Resolves `object`'s `attr` to a value.
///
/// Shortcut: for `AT_location`, an object with a nonzero `low_pc` of its own
/// returns that PC directly, with no attribute read or expression
/// evaluation at all (an entry's PC acts as its location).
///
/// Otherwise re-enters the walker at `object`'s own DIE offset to read
/// `attr`'s raw form:
///  - a reference form (`REF*`) resolves the target DIE, recursively
///    evaluates its `AT_location`, reads the target's `AT_byte_size` bytes
///    from target memory at that address, notifies `breakpoints`, and
///    returns those bytes;
///  - `DATA*`/`BLOCK*`/`FLAG` return a view into the attribute's own bytes;
///  - `SDATA`/`UDATA` return the scalar;
///  - anything else (including the attribute being absent) is `ENOENT`.
pub fn read_dwarf_object_property<'c>(
    cache: &'c DwarfCache<'_>,
    object: &ObjectInfo,
    attr: u16,
    memory: &dyn TargetMemory,
    breakpoints: Option<&dyn BreakpointObserver>,
    evaluator: Option<&dyn LocationExpressionEvaluator>,
) -> PropertyResult<PropertyValue<'c>> {
    if attr == AT_LOCATION && object.low_pc != 0 {
        return Ok(PropertyValue::Address(object.low_pc));
    }

    let big_endian = cache.is_big_endian();

    let (form, value) = cache
        .read_attribute(object, attr)?
        .ok_or_else(|| PropertyError::new(PropertyErrorKind::AttributeNotFound))?;

    if is_ref_form(form) {
        let target_offset = match value {
            AttributeValue::Reference(v) => v,
            _ => return Err(PropertyError::new(PropertyErrorKind::EvaluationFailed)),
        };
        let target_idx = cache
            .find_object(target_offset)
            .ok_or_else(|| PropertyError::new(PropertyErrorKind::EvaluationFailed))?;
        let target = cache.object(target_idx);

        let addr_value = read_and_evaluate_dwarf_object_property(
            cache,
            target,
            AT_LOCATION,
            0,
            memory,
            breakpoints,
            evaluator,
        )?;
        let addr = numeric_value_of(&addr_value).ok_or_else(|| PropertyError::new(PropertyErrorKind::EvaluationFailed))?;

        let size_value = read_and_evaluate_dwarf_object_property(
            cache,
            target,
            AT_BYTE_SIZE,
            addr,
            memory,
            breakpoints,
            evaluator,
        )?;
        let size = numeric_value_of(&size_value).ok_or_else(|| PropertyError::new(PropertyErrorKind::EvaluationFailed))?;
        if !(1..=8).contains(&size) {
            return Err(PropertyError::new(PropertyErrorKind::InvalidDataType));
        }
        let size = size as usize;

        let mut bytes = [0u8; 8];
        memory.read(addr, &mut bytes[..size])?;
        if let Some(observer) = breakpoints {
            observer.on_memory_read(addr, size);
        }
        return Ok(PropertyValue::MemoryBytes {
            bytes,
            len: size as u8,
            big_endian,
        });
    }

    if is_data_or_block_form(form) {
        let bytes = match value {
            AttributeValue::Data { raw, .. } => raw,
            AttributeValue::Block { bytes, .. } => bytes,
            _ => return Err(PropertyError::new(PropertyErrorKind::EvaluationFailed)),
        };
        return Ok(PropertyValue::Bytes {
            bytes,
            form,
            big_endian,
        });
    }

    match value {
        AttributeValue::SignedData(v) => Ok(PropertyValue::Scalar(v)),
        AttributeValue::UnsignedData(v) => Ok(PropertyValue::Scalar(v as i64)),
        _ => Err(PropertyError::new(PropertyErrorKind::AttributeNotFound)),
    }
}

/// Wraps [`read_dwarf_object_property`]:
///
///  - `ENOENT` on `AT_data_member_location` for a `TAG_member` whose parent
///    is a `TAG_union_type` synthesizes offset `0` (every member of a union
///    starts at the union's own address).
///  - for location-family attributes (`AT_location`, `AT_data_member_location`,
///    `AT_frame_base`) whose raw form is a block, or a 4/8-byte data form
///    when the attribute is `AT_location`, the attribute bytes are a
///    location expression: delegate to `evaluator`.
///  - for size-family attributes (`AT_count`, `AT_byte_size`,
///    `AT_lower_bound`, `AT_upper_bound`), only a block form is delegated;
///    scalar forms are already the answer.
///  - anything else is returned as resolved by `read_dwarf_object_property`.
#[allow(clippy::too_many_arguments)]
pub fn read_and_evaluate_dwarf_object_property<'c>(
    cache: &'c DwarfCache<'_>,
    object: &ObjectInfo,
    attr: u16,
    base: u64,
    memory: &dyn TargetMemory,
    breakpoints: Option<&dyn BreakpointObserver>,
    evaluator: Option<&dyn LocationExpressionEvaluator>,
) -> PropertyResult<PropertyValue<'c>> {
    let value = match read_dwarf_object_property(cache, object, attr, memory, breakpoints, evaluator) {
        Ok(v) => v,
        Err(e) if e.kind() == PropertyErrorKind::AttributeNotFound && is_union_member_shortcut(cache, object, attr) => {
            return Ok(PropertyValue::Scalar(0));
        }
        Err(e) => return Err(e),
    };

    let is_location_family = matches!(attr, AT_LOCATION | AT_DATA_MEMBER_LOCATION | AT_FRAME_BASE);
    let is_size_family = matches!(attr, AT_COUNT | AT_BYTE_SIZE | AT_LOWER_BOUND | AT_UPPER_BOUND);

    let expr = match value {
        PropertyValue::Bytes { bytes, form, .. } => {
            let delegate = (is_location_family && (is_block_form(form) || matches!(form, FORM_DATA4 | FORM_DATA8)))
                || (is_size_family && is_block_form(form));
            if delegate {
                Some(bytes)
            } else {
                None
            }
        }
        _ => None,
    };

    match expr {
        Some(expr) => {
            let evaluator = evaluator.ok_or_else(|| PropertyError::new(PropertyErrorKind::EvaluationFailed))?;
            evaluator.evaluate(expr, base, memory, breakpoints)
        }
        None => Ok(value),
    }
}

/// Interprets any resolved [`PropertyValue`] as an unsigned integer,
/// mirroring the general mAddr/mSize/mBigEndian-or-mValue conversion used to
/// turn a reference target's `AT_location`/`AT_byte_size` into plain numbers.
fn numeric_value_of(value: &PropertyValue<'_>) -> Option<u64> {
    match *value {
        PropertyValue::Address(a) => Some(a),
        PropertyValue::Scalar(v) => Some(v as u64),
        PropertyValue::Bytes { bytes, big_endian, .. } => Some(read_unsigned(bytes, big_endian)),
        PropertyValue::MemoryBytes { bytes, len, big_endian } => {
            Some(read_unsigned(&bytes[..len as usize], big_endian))
        }
    }
}

fn read_unsigned(bytes: &[u8], big_endian: bool) -> u64 {
    let bytes = &bytes[..bytes.len().min(8)];
    let mut v: u64 = 0;
    if big_endian {
        for &b in bytes {
            v = (v << 8) | b as u64;
        }
    } else {
        for (i, &b) in bytes.iter().enumerate() {
            v |= (b as u64) << (8 * i);
        }
    }
    v
}

fn is_union_member_shortcut(cache: &DwarfCache<'_>, object: &ObjectInfo, attr: u16) -> bool {
    attr == AT_DATA_MEMBER_LOCATION
        && object.tag == TAG_MEMBER
        && object
            .parent
            .map(|parent| cache.object(parent).tag == TAG_UNION_TYPE)
            .unwrap_or(false)
}

/// Resolves a numeric property of `object` without touching target memory:
/// `AT_const_value` directly, or `AT_data_member_location` either from its
/// already-materialized field or (for a union member with none recorded)
/// the same offset-zero shortcut as [`read_and_evaluate_dwarf_object_property`].
pub fn get_numeric_property_value(cache: &DwarfCache<'_>, object: &ObjectInfo, attr: u16) -> PropertyResult<i64> {
    if attr == AT_DATA_MEMBER_LOCATION {
        if let Some(v) = object.data_member_location {
            return Ok(v);
        }
        if is_union_member_shortcut(cache, object, attr) {
            return Ok(0);
        }
        return Err(PropertyError::new(PropertyErrorKind::AttributeNotFound));
    }
    object
        .const_value
        .ok_or_else(|| PropertyError::new(PropertyErrorKind::AttributeNotFound))
}

/// Looks up `object`'s owning unit in `cache`, the common precondition for
/// every property accessor above.
pub fn unit_of<'a>(cache: &'a DwarfCache<'_>, object: &ObjectInfo) -> Option<&'a CompUnit> {
    object.comp_unit.map(|idx| &cache.comp_units[idx])
}
