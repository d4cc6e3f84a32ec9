//! ELF symbol table loading.
//!
//! Builds a per-`SHT_SYMTAB`-section name hash and a global array of
//! symbols sorted by address, for address-to-symbol lookup. Only symbols
//! with a non-zero address and a `STT_OBJECT`/`STT_FUNC` type are kept.

use goblin::elf::{sym::Sym, Elf};

use crate::consts::{STT_FUNC, STT_OBJECT, SYM_HASH_SIZE};

/// One `SHT_SYMTAB` section's symbols plus a chained name hash over them.
pub struct SymbolSection {
    pub symbols: Vec<Sym>,
    pub names: Vec<String>,
    hash_heads: Vec<u32>,
    hash_next: Vec<u32>,
}

impl SymbolSection {
    /// Every symbol index whose name hashes to the same bucket as `name`,
    /// in reverse insertion order (as the chained hash naturally yields).
    pub fn find_by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = usize> + 'a {
        let mut next = self.hash_heads[name_hash(name) as usize];
        std::iter::from_fn(move || {
            if next == u32::MAX {
                return None;
            }
            let idx = next as usize;
            next = self.hash_next[idx];
            Some(idx)
        })
        .filter(move |&idx| self.names[idx] == name)
    }
}

/// PJW-style hash used for symbol names (`calc_symbol_name_hash`).
pub fn name_hash(name: &str) -> u32 {
    let mut h: u32 = 0;
    for b in name.bytes() {
        h = (h << 4).wrapping_add(u32::from(b));
        let g = h & 0xf000_0000;
        if g != 0 {
            h ^= g >> 24;
        }
        h &= !g;
    }
    h % SYM_HASH_SIZE
}

fn symbol_address(sym: &Sym) -> u64 {
    sym.st_value
}

fn is_tracked_symbol(sym: &Sym) -> bool {
    let ty = sym.st_type();
    ty == STT_OBJECT || ty == STT_FUNC
}

/// Loads the object's symbol table(s), returning the per-table tables and
/// the global address-sorted symbol list (table index, symbol index) for
/// symbols with `STT_OBJECT`/`STT_FUNC` type and nonzero address.
///
/// `goblin::elf::Elf` already normalizes `.symtab` and `.dynsym` into two
/// fields rather than requiring a manual `SHT_SYMTAB` section-header scan,
/// so this builds at most two [`SymbolSection`]s instead of one per
/// matching section header.
pub fn load_symbol_tables(elf: &Elf<'_>) -> (Vec<SymbolSection>, Vec<(usize, usize)>) {
    let mut sections = Vec::new();

    for (symtab, strtab) in [(&elf.syms, &elf.strtab), (&elf.dynsyms, &elf.dynstrtab)] {
        if symtab.is_empty() {
            continue;
        }
        let symtab: Vec<Sym> = symtab.iter().collect();

        let names: Vec<String> = symtab
            .iter()
            .map(|s| strtab.get_at(s.st_name).unwrap_or_default().to_owned())
            .collect();

        let mut hash_heads = vec![u32::MAX; SYM_HASH_SIZE as usize];
        let mut hash_next = vec![u32::MAX; symtab.len()];
        for (i, name) in names.iter().enumerate() {
            if name.is_empty() {
                continue;
            }
            let bucket = name_hash(name) as usize;
            hash_next[i] = hash_heads[bucket];
            hash_heads[bucket] = i as u32;
        }

        sections.push(SymbolSection {
            symbols: symtab,
            names,
            hash_heads,
            hash_next,
        });
    }

    let mut sorted = Vec::new();
    for (sec_idx, tbl) in sections.iter().enumerate() {
        for (sym_idx, sym) in tbl.symbols.iter().enumerate() {
            if is_tracked_symbol(sym) && symbol_address(sym) != 0 {
                sorted.push((sec_idx, sym_idx));
            }
        }
    }
    sorted.sort_by_key(|&(sec_idx, sym_idx)| symbol_address(&sections[sec_idx].symbols[sym_idx]));

    (sections, sorted)
}
