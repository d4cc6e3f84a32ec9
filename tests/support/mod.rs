//! Hand-rolled minimal ELF64 object builder, so integration tests can drive
//! [`dwarfcache::ElfObjectFile::parse`] against exact, hand-chosen DWARF
//! bytes instead of a compiled fixture binary.

pub const EM_X86_64: u16 = 62;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

struct Section {
    name: String,
    sh_type: u32,
    addr: u64,
    data: Vec<u8>,
}

pub struct ElfBuilder {
    endian: Endian,
    sections: Vec<Section>,
}

impl ElfBuilder {
    pub fn new(endian: Endian) -> Self {
        ElfBuilder {
            endian,
            sections: Vec::new(),
        }
    }

    /// Adds a `SHT_PROGBITS` section at load address `0`.
    pub fn section(self, name: &str, data: &[u8]) -> Self {
        self.section_with_addr(name, 0, data)
    }

    pub fn section_with_addr(mut self, name: &str, addr: u64, data: &[u8]) -> Self {
        self.sections.push(Section {
            name: name.to_owned(),
            sh_type: 1, // SHT_PROGBITS
            addr,
            data: data.to_vec(),
        });
        self
    }

    fn u16(&self, v: u16) -> [u8; 2] {
        match self.endian {
            Endian::Little => v.to_le_bytes(),
            Endian::Big => v.to_be_bytes(),
        }
    }

    fn u32(&self, v: u32) -> [u8; 4] {
        match self.endian {
            Endian::Little => v.to_le_bytes(),
            Endian::Big => v.to_be_bytes(),
        }
    }

    fn u64(&self, v: u64) -> [u8; 8] {
        match self.endian {
            Endian::Little => v.to_le_bytes(),
            Endian::Big => v.to_be_bytes(),
        }
    }

    /// Assembles the object: ELF header, section data, `.shstrtab`, then the
    /// section header table, matching the layout order real linkers use
    /// (headers first, data and string tables last).
    pub fn build(self) -> Vec<u8> {
        let mut out = vec![0u8; 64]; // ELF64_Ehdr, filled in at the end.

        // Section header 0 is the reserved SHT_NULL entry, then one header
        // per added section, then .shstrtab's own header last. The string
        // table itself holds each section's name in that same order, with
        // .shstrtab's own name appended at the end.
        let mut shstrtab = vec![0u8]; // index 0 is the empty name.
        let mut name_offsets = Vec::new();
        for s in &self.sections {
            name_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(s.name.as_bytes());
            shstrtab.push(0);
        }
        let shstrtab_name_offset = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab\0");

        let mut data_offsets = Vec::new();
        for s in &self.sections {
            // 8-byte align each section's data for tidiness; not required
            // for goblin to parse it.
            while out.len() % 8 != 0 {
                out.push(0);
            }
            data_offsets.push(out.len() as u64);
            out.extend_from_slice(&s.data);
        }
        while out.len() % 8 != 0 {
            out.push(0);
        }
        let shstrtab_offset = out.len() as u64;
        out.extend_from_slice(&shstrtab);

        while out.len() % 8 != 0 {
            out.push(0);
        }
        let shoff = out.len() as u64;

        // Section header 0: SHT_NULL, all zero.
        out.extend_from_slice(&[0u8; 64]);

        for (i, s) in self.sections.iter().enumerate() {
            out.extend_from_slice(&self.u32(name_offsets[i])); // sh_name
            out.extend_from_slice(&self.u32(s.sh_type)); // sh_type
            out.extend_from_slice(&self.u64(0)); // sh_flags
            out.extend_from_slice(&self.u64(s.addr)); // sh_addr
            out.extend_from_slice(&self.u64(data_offsets[i])); // sh_offset
            out.extend_from_slice(&self.u64(s.data.len() as u64)); // sh_size
            out.extend_from_slice(&self.u32(0)); // sh_link
            out.extend_from_slice(&self.u32(0)); // sh_info
            out.extend_from_slice(&self.u64(1)); // sh_addralign
            out.extend_from_slice(&self.u64(0)); // sh_entsize
        }

        // .shstrtab's own section header, the last entry.
        out.extend_from_slice(&self.u32(shstrtab_name_offset));
        out.extend_from_slice(&self.u32(3)); // SHT_STRTAB
        out.extend_from_slice(&self.u64(0));
        out.extend_from_slice(&self.u64(0));
        out.extend_from_slice(&self.u64(shstrtab_offset));
        out.extend_from_slice(&self.u64(shstrtab.len() as u64));
        out.extend_from_slice(&self.u32(0));
        out.extend_from_slice(&self.u32(0));
        out.extend_from_slice(&self.u64(1));
        out.extend_from_slice(&self.u64(0));

        let shnum = (self.sections.len() + 2) as u16; // +null +shstrtab
        let shstrndx = (self.sections.len() + 1) as u16;

        // Now fill in the ELF header.
        out[0] = 0x7f;
        out[1] = b'E';
        out[2] = b'L';
        out[3] = b'F';
        out[4] = 2; // ELFCLASS64
        out[5] = match self.endian {
            Endian::Little => 1, // ELFDATA2LSB
            Endian::Big => 2,    // ELFDATA2MSB
        };
        out[6] = 1; // EI_VERSION
        // out[7..16] (EI_OSABI, EI_ABIVERSION, EI_PAD) stay zero.

        out[16..18].copy_from_slice(&self.u16(1)); // e_type = ET_REL
        out[18..20].copy_from_slice(&self.u16(EM_X86_64));
        out[20..24].copy_from_slice(&self.u32(1)); // e_version
        out[24..32].copy_from_slice(&self.u64(0)); // e_entry
        out[32..40].copy_from_slice(&self.u64(0)); // e_phoff
        out[40..48].copy_from_slice(&self.u64(shoff)); // e_shoff
        out[48..52].copy_from_slice(&self.u32(0)); // e_flags
        out[52..54].copy_from_slice(&self.u16(64)); // e_ehsize
        out[54..56].copy_from_slice(&self.u16(0)); // e_phentsize
        out[56..58].copy_from_slice(&self.u16(0)); // e_phnum
        out[58..60].copy_from_slice(&self.u16(64)); // e_shentsize
        out[60..62].copy_from_slice(&self.u16(shnum));
        out[62..64].copy_from_slice(&self.u16(shstrndx));

        out
    }
}

/// Appends a ULEB128 encoding of `v` to `buf`.
pub fn uleb(buf: &mut Vec<u8>, mut v: u64) {
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
}

/// Appends a NUL-terminated string to `buf`.
pub fn cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}
