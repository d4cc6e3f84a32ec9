//! DWARF tag, attribute, form and line-program opcode constants.
//!
//! Values for DWARF versions 2 and 3 match the published DWARF standard.
//! Values prefixed with `V1_` are the pre-standard DWARF v1 attribute codes
//! (`AT_fund_type`, `AT_mod_fund_type`, `AT_user_def_type`, `AT_mod_u_d_type`)
//! and the `MOD_*` modifier-block byte codes; they are part of the on-disk
//! contract for `.debug` sections and must not be renumbered.

#![allow(dead_code)]

// --- Tags -------------------------------------------------------------

pub const TAG_ARRAY_TYPE: u16 = 0x0001;
pub const TAG_CLASS_TYPE: u16 = 0x0002;
pub const TAG_ENTRY_POINT: u16 = 0x0003;
pub const TAG_ENUMERATION_TYPE: u16 = 0x0004;
pub const TAG_FORMAL_PARAMETER: u16 = 0x0005;
pub const TAG_LABEL: u16 = 0x000a;
pub const TAG_LEXICAL_BLOCK: u16 = 0x000b;
pub const TAG_MEMBER: u16 = 0x000d;
pub const TAG_POINTER_TYPE: u16 = 0x000f;
pub const TAG_REFERENCE_TYPE: u16 = 0x0010;
pub const TAG_COMPILE_UNIT: u16 = 0x0011;
pub const TAG_STRING_TYPE: u16 = 0x0012;
pub const TAG_STRUCTURE_TYPE: u16 = 0x0013;
pub const TAG_SUBROUTINE_TYPE: u16 = 0x0015;
pub const TAG_TYPEDEF: u16 = 0x0016;
pub const TAG_UNION_TYPE: u16 = 0x0017;
pub const TAG_VARIANT: u16 = 0x0019;
pub const TAG_INHERITANCE: u16 = 0x001c;
pub const TAG_BASE_TYPE: u16 = 0x0024;
pub const TAG_CONST_TYPE: u16 = 0x0026;
pub const TAG_ENUMERATOR: u16 = 0x0028;
pub const TAG_SUBPROGRAM: u16 = 0x002e;
pub const TAG_VARIABLE: u16 = 0x0034;
pub const TAG_VOLATILE_TYPE: u16 = 0x0035;
pub const TAG_NAMESPACE: u16 = 0x0039;

/// Start of the vendor/implementation-defined tag range; also used by the
/// cache builder to tag synthetic "fundamental type" objects that have no
/// real DIE of their own (`AT_fund_type`, the base of a `mod_fund_type`
/// chain).
pub const TAG_LO_USER: u16 = 0x4080;

// --- Attributes (DWARF 2/3) --------------------------------------------

pub const AT_SIBLING: u16 = 0x01;
pub const AT_LOCATION: u16 = 0x02;
pub const AT_NAME: u16 = 0x03;
pub const AT_BYTE_SIZE: u16 = 0x0b;
pub const AT_STMT_LIST: u16 = 0x10;
pub const AT_LOW_PC: u16 = 0x11;
pub const AT_HIGH_PC: u16 = 0x12;
pub const AT_COMP_DIR: u16 = 0x1b;
pub const AT_CONST_VALUE: u16 = 0x1c;
pub const AT_LOWER_BOUND: u16 = 0x22;
pub const AT_UPPER_BOUND: u16 = 0x2f;
pub const AT_BASE_TYPES: u16 = 0x35;
pub const AT_COUNT: u16 = 0x37;
pub const AT_DATA_MEMBER_LOCATION: u16 = 0x38;
pub const AT_FRAME_BASE: u16 = 0x40;
pub const AT_ENCODING: u16 = 0x3e;
pub const AT_TYPE: u16 = 0x49;
pub const AT_RANGES: u16 = 0x55;

/// Pre-standard DWARF v1 attributes. `AT_sibling`, `AT_location` and
/// `AT_name` keep the same numbering under v1, but these four only ever
/// occur in a `.debug` (not `.debug_info`) section walked in v1 mode, where
/// the packed `attr<<4|form` entry layout yields a 12-bit attribute id.
pub const V1_AT_FUND_TYPE: u16 = 0x004;
pub const V1_AT_MOD_FUND_TYPE: u16 = 0x005;
pub const V1_AT_USER_DEF_TYPE: u16 = 0x006;
pub const V1_AT_MOD_U_D_TYPE: u16 = 0x007;

// --- Forms --------------------------------------------------------------

pub const FORM_ADDR: u16 = 0x01;
pub const FORM_BLOCK2: u16 = 0x03;
pub const FORM_BLOCK4: u16 = 0x04;
pub const FORM_DATA2: u16 = 0x05;
pub const FORM_DATA4: u16 = 0x06;
pub const FORM_DATA8: u16 = 0x07;
pub const FORM_STRING: u16 = 0x08;
pub const FORM_BLOCK: u16 = 0x09;
pub const FORM_BLOCK1: u16 = 0x0a;
pub const FORM_DATA1: u16 = 0x0b;
pub const FORM_FLAG: u16 = 0x0c;
pub const FORM_SDATA: u16 = 0x0d;
pub const FORM_STRP: u16 = 0x0e;
pub const FORM_UDATA: u16 = 0x0f;
pub const FORM_REF_ADDR: u16 = 0x10;
pub const FORM_REF1: u16 = 0x11;
pub const FORM_REF2: u16 = 0x12;
pub const FORM_REF4: u16 = 0x13;
pub const FORM_REF8: u16 = 0x14;
pub const FORM_REF_UDATA: u16 = 0x15;
pub const FORM_INDIRECT: u16 = 0x16;

/// DWARF v1's absolute 4-byte reference form. v1 reuses the v2/v3 form
/// numbering for every other form; only `REF` has a distinct v1 meaning
/// (absolute offset instead of unit-relative).
pub const FORM_REF: u16 = 0x02;

// --- Pre-standard v1 modifier-block byte codes --------------------------

pub const MOD_POINTER_TO: u8 = 0x01;
pub const MOD_REFERENCE_TO: u8 = 0x02;
pub const MOD_CONST: u8 = 0x03;
pub const MOD_VOLATILE: u8 = 0x04;

// --- Line number program standard opcodes -------------------------------

pub const LNS_COPY: u8 = 0x01;
pub const LNS_ADVANCE_PC: u8 = 0x02;
pub const LNS_ADVANCE_LINE: u8 = 0x03;
pub const LNS_SET_FILE: u8 = 0x04;
pub const LNS_SET_COLUMN: u8 = 0x05;
pub const LNS_NEGATE_STMT: u8 = 0x06;
pub const LNS_SET_BASIC_BLOCK: u8 = 0x07;
pub const LNS_CONST_ADD_PC: u8 = 0x08;
pub const LNS_FIXED_ADVANCE_PC: u8 = 0x09;
pub const LNS_SET_PROLOGUE_END: u8 = 0x0a;
pub const LNS_SET_EPILOGUE_BEGIN: u8 = 0x0b;
pub const LNS_SET_ISA: u8 = 0x0c;

// --- Line number program extended opcodes -------------------------------

pub const LNE_END_SEQUENCE: u8 = 0x01;
pub const LNE_SET_ADDRESS: u8 = 0x02;
pub const LNE_DEFINE_FILE: u8 = 0x03;

// --- ELF symbol types (subset this crate cares about) --------------------

pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;

/// Size of the per-symbol-section chained name hash (`SYM_HASH_SIZE`).
pub const SYM_HASH_SIZE: u32 = 1024;
