//! End-to-end cache-build scenarios, driven against hand-built ELF objects
//! rather than compiled fixture binaries.

mod support;

use std::sync::Arc;

use dwarfcache::{
    calc_symbol_name_hash, read_dwarf_object_property, CacheErrorKind, ElfObjectFile, PropertyError,
    PropertyValue, TargetMemory,
};

use support::{cstr, uleb, ElfBuilder, Endian};

// --- DWARF constants this test file needs on the wire ----------------------
// (mirrors src/consts.rs; duplicated here because that module is private)

const TAG_COMPILE_UNIT: u16 = 0x0011;
const TAG_SUBPROGRAM: u16 = 0x002e;
const TAG_POINTER_TYPE: u16 = 0x000f;
const TAG_VARIABLE: u16 = 0x0034;

const AT_LOCATION: u16 = 0x02;
const AT_NAME: u16 = 0x03;
const AT_STMT_LIST: u16 = 0x10;
const AT_LOW_PC: u16 = 0x11;
const AT_HIGH_PC: u16 = 0x12;
const AT_SIBLING: u16 = 0x01;

const V1_AT_MOD_FUND_TYPE: u16 = 0x005;

const FORM_ADDR: u16 = 0x01;
const FORM_REF: u16 = 0x02; // v1's absolute 4-byte reference form
const FORM_STRING: u16 = 0x08;
const FORM_BLOCK: u16 = 0x09;
const FORM_DATA4: u16 = 0x06;

const MOD_POINTER_TO: u8 = 0x01;
const MOD_CONST: u8 = 0x03;
const ATE_SIGNED: u8 = 0x05;

fn abbrev_entry(id: u32, tag: u16, has_children: bool, attrs: &[(u16, u16)]) -> Vec<u8> {
    let mut buf = Vec::new();
    uleb(&mut buf, id as u64);
    uleb(&mut buf, tag as u64);
    buf.push(has_children as u8);
    for &(attr, form) in attrs {
        uleb(&mut buf, attr as u64);
        uleb(&mut buf, form as u64);
    }
    uleb(&mut buf, 0);
    uleb(&mut buf, 0);
    buf
}

fn abbrev_table(entries: Vec<Vec<u8>>) -> Vec<u8> {
    let mut buf = Vec::new();
    for e in entries {
        buf.extend(e);
    }
    uleb(&mut buf, 0); // table terminator
    buf
}

/// Wraps a unit body (everything after the initial length) in a 64-bit DWARF
/// framing prefix.
fn wrap_unit_64bit(body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(0xFFFF_FFFFu32.to_le_bytes());
    out.extend((body.len() as u64).to_le_bytes());
    out.extend(body);
    out
}

/// Wraps a unit body in 32-bit DWARF framing.
fn wrap_unit_32bit(body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend((body.len() as u32).to_le_bytes());
    out.extend(body);
    out
}

#[test]
fn empty_debug_info_builds_an_empty_cache() {
    let elf_bytes = ElfBuilder::new(Endian::Little)
        .section(".debug_info", &[])
        .section(".debug_abbrev", &[])
        .build();
    let object = ElfObjectFile::parse(&elf_bytes).unwrap();
    let cell = dwarfcache::DwarfCacheCell::new();
    let cache = dwarfcache::get_dwarf_cache(&cell, &object).unwrap();

    assert!(cache.objects.is_empty());
    assert!(cache.comp_units.is_empty());
    assert!(cache.find_object(0).is_none());
}

#[test]
fn subprogram_children_and_low_pc_shortcut() {
    // One compile unit (with its own low_pc/high_pc) containing a single
    // TAG_subprogram with a name and an address range.
    let abbrevs = abbrev_table(vec![
        abbrev_entry(1, TAG_COMPILE_UNIT, true, &[(AT_LOW_PC, FORM_ADDR), (AT_HIGH_PC, FORM_ADDR)]),
        abbrev_entry(
            2,
            TAG_SUBPROGRAM,
            false,
            &[(AT_NAME, FORM_STRING), (AT_LOW_PC, FORM_ADDR), (AT_HIGH_PC, FORM_ADDR)],
        ),
    ]);

    let mut body = Vec::new();
    body.extend(3u16.to_le_bytes()); // version
    body.extend(0u64.to_le_bytes()); // abbrev_table_offset (64-bit wide)
    body.push(8); // address_size

    uleb(&mut body, 1); // compile_unit abbrev code
    body.extend(0x1000u64.to_le_bytes()); // AT_low_pc
    body.extend(0x1040u64.to_le_bytes()); // AT_high_pc

    uleb(&mut body, 2); // subprogram abbrev code
    cstr(&mut body, "f");
    body.extend(0x1000u64.to_le_bytes());
    body.extend(0x1040u64.to_le_bytes());

    uleb(&mut body, 0); // end of compile_unit's children

    let debug_info = wrap_unit_64bit(body);

    let elf_bytes = ElfBuilder::new(Endian::Little)
        .section(".debug_info", &debug_info)
        .section(".debug_abbrev", &abbrevs)
        .build();
    let object = ElfObjectFile::parse(&elf_bytes).unwrap();
    let cell = dwarfcache::DwarfCacheCell::new();
    let cache = dwarfcache::get_dwarf_cache(&cell, &object).unwrap();

    assert_eq!(cache.comp_units.len(), 1);
    let unit = &cache.comp_units[0];
    assert_eq!(unit.low_pc, 0x1000);

    let child = unit.children.expect("exactly one child object");
    let subprogram = cache.object(child);
    assert_eq!(subprogram.tag, TAG_SUBPROGRAM);
    assert_eq!(subprogram.name.as_deref(), Some("f"));
    assert!(subprogram.sibling.is_none());

    // The subprogram's own low_pc is returned directly, without reading
    // AT_location or touching target memory at all.
    struct NoMemory;
    impl TargetMemory for NoMemory {
        fn read(&self, _address: u64, _buf: &mut [u8]) -> Result<(), PropertyError> {
            panic!("low_pc shortcut should not read target memory");
        }
    }
    let value = read_dwarf_object_property(&cache, subprogram, AT_LOCATION, &NoMemory, None, None).unwrap();
    assert!(matches!(value, PropertyValue::Address(0x1000)));
}

#[test]
fn v1_mod_fund_type_chain_skips_const_and_resolves_pointers() {
    // Legacy .debug section: a compile_unit entry (closed by AT_sibling) with
    // one child DIE carrying a mod_fund_type block: pointer_to, pointer_to,
    // const, then the fundamental type's encoding byte.
    let mut data = Vec::new();

    let entry_b_offset = 12u32; // right after the compile_unit entry
    let block = [MOD_POINTER_TO, MOD_POINTER_TO, MOD_CONST, ATE_SIGNED];
    let entry_b_size = 4 + 2 + 2 + 1 + block.len() as u32; // size+tag+word+uleb_len+bytes
    let sibling_target = entry_b_offset + entry_b_size;

    data.extend(12u32.to_le_bytes()); // compile_unit entry_size
    data.extend(TAG_COMPILE_UNIT.to_le_bytes());
    let sibling_word: u16 = (AT_SIBLING << 4) | FORM_REF;
    data.extend(sibling_word.to_le_bytes());
    data.extend(sibling_target.to_le_bytes());
    assert_eq!(data.len() as u32, entry_b_offset);

    data.extend(entry_b_size.to_le_bytes());
    data.extend(TAG_VARIABLE.to_le_bytes());
    let mod_word: u16 = (V1_AT_MOD_FUND_TYPE << 4) | FORM_BLOCK;
    data.extend(mod_word.to_le_bytes());
    uleb(&mut data, block.len() as u64);
    data.extend(block);

    let elf_bytes = ElfBuilder::new(Endian::Little)
        .section(".debug", &data)
        .section(".debug_abbrev", &[])
        .build();
    let object = ElfObjectFile::parse(&elf_bytes).unwrap();
    let cell = dwarfcache::DwarfCacheCell::new();
    let cache = dwarfcache::get_dwarf_cache(&cell, &object).unwrap();

    assert_eq!(cache.comp_units.len(), 1);
    let unit = &cache.comp_units[0];
    let variable_idx = unit.children.expect("one child under the compile_unit");
    let variable = cache.object(variable_idx);

    let first_ptr = cache.object(variable.ty.expect("first pointer"));
    assert_eq!(first_ptr.tag, TAG_POINTER_TYPE);
    let second_ptr = cache.object(first_ptr.ty.expect("second pointer"));
    assert_eq!(second_ptr.tag, TAG_POINTER_TYPE);
    let fundamental = cache.object(second_ptr.ty.expect("fundamental base"));
    assert_eq!(fundamental.encoding, ATE_SIGNED as u16);
}

#[test]
fn line_program_special_opcode_computes_address_and_line() {
    let abbrevs = abbrev_table(vec![abbrev_entry(
        1,
        TAG_COMPILE_UNIT,
        false,
        &[(AT_STMT_LIST, FORM_DATA4)],
    )]);

    let mut cu_body = Vec::new();
    cu_body.extend(2u16.to_le_bytes()); // version
    cu_body.extend(0u32.to_le_bytes()); // abbrev_table_offset
    cu_body.push(4); // address_size
    uleb(&mut cu_body, 1);
    cu_body.extend(0u32.to_le_bytes()); // AT_stmt_list -> offset 0 in .debug_line

    let debug_info = wrap_unit_32bit(cu_body);

    // line_base = -1, line_range = 4, min_instruction_length = 1:
    // special opcode (opcode_base + line_range + 2) advances line by 2 and
    // address by 1.
    let opcode_base = 13u8;
    let mut header_tail = Vec::new();
    header_tail.push(1u8); // min_instruction_length
    header_tail.push(1u8); // default_is_stmt
    header_tail.push((-1i8) as u8); // line_base
    header_tail.push(4u8); // line_range
    header_tail.push(opcode_base);
    header_tail.extend(std::iter::repeat(1u8).take(opcode_base as usize - 1));
    header_tail.push(0); // directories terminator
    header_tail.push(0); // files terminator

    let mut body = Vec::new();
    body.push(0x00); // extended opcode marker
    uleb(&mut body, 9); // op_size: 1 (sub-opcode) + 8 (address)
    body.push(0x02); // DW_LNE_set_address
    body.extend(0x2000u64.to_le_bytes());
    body.push(opcode_base + 4 + 2); // special opcode

    let header_size = header_tail.len() as u32;
    let mut unit = Vec::new();
    unit.extend(2u16.to_le_bytes()); // version
    unit.extend(header_size.to_le_bytes());
    unit.extend(header_tail);
    unit.extend(body);

    let mut debug_line = Vec::new();
    debug_line.extend((unit.len() as u32).to_le_bytes());
    debug_line.extend(unit);

    let elf_bytes = ElfBuilder::new(Endian::Little)
        .section(".debug_info", &debug_info)
        .section(".debug_abbrev", &abbrevs)
        .section(".debug_line", &debug_line)
        .build();
    let object = ElfObjectFile::parse(&elf_bytes).unwrap();
    let cell = dwarfcache::DwarfCacheCell::new();
    let cache = dwarfcache::get_dwarf_cache(&cell, &object).unwrap();

    assert_eq!(cache.comp_units.len(), 1);
    let unit = &cache.comp_units[0];
    let program = cache.line_program(unit).expect("a line program").unwrap();
    assert_eq!(program.rows.len(), 1);
    assert_eq!(program.rows[0].address, 0x2001);
    assert_eq!(program.rows[0].line, 2);
}

#[test]
fn symbol_name_hash_is_stable_and_bounded() {
    let a = calc_symbol_name_hash("main");
    let b = calc_symbol_name_hash("main");
    assert_eq!(a, b);
    assert!((a as usize) < 1024);
}

#[test]
fn duplicate_debug_str_sections_are_a_sticky_error() {
    let elf_bytes = ElfBuilder::new(Endian::Little)
        .section(".debug_info", &[])
        .section(".debug_abbrev", &[])
        .section(".debug_str", b"a\0")
        .section(".debug_str", b"b\0")
        .build();
    let object = ElfObjectFile::parse(&elf_bytes).unwrap();

    let cell = dwarfcache::DwarfCacheCell::new();
    let first = dwarfcache::get_dwarf_cache(&cell, &object).unwrap_err();
    assert_eq!(first.kind(), CacheErrorKind::DuplicateSection);

    let second = dwarfcache::get_dwarf_cache(&cell, &object).unwrap_err();
    assert!(Arc::ptr_eq(&first, &second));
}
