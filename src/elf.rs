//! ELF object file access.
//!
//! Wraps `goblin::elf::Elf` to answer the two questions the rest of the
//! crate needs of an object file: "give me the bytes of section X" and
//! "what is this file's endianness/address width". This is the trait the
//! cache builder drives instead of calling directly into a real loader.

use std::fmt;

use goblin::elf::Elf;
use thiserror::Error;

use crate::reader::Endian;

/// Error kind for [`ElfError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ElfErrorKind {
    /// `goblin` rejected the file as malformed.
    InvalidElf,
    /// A section's `sh_offset`/`sh_size` run past the file.
    SectionOutOfBounds,
}

impl fmt::Display for ElfErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidElf => write!(f, "not a valid ELF file"),
            Self::SectionOutOfBounds => write!(f, "section data runs past end of file"),
        }
    }
}

#[derive(Debug, Error)]
#[error("{kind}")]
pub struct ElfError {
    kind: ElfErrorKind,
    #[source]
    source: Option<goblin::error::Error>,
}

impl ElfError {
    fn new(kind: ElfErrorKind) -> Self {
        Self { kind, source: None }
    }

    pub fn kind(&self) -> ElfErrorKind {
        self.kind
    }
}

/// A named section's file-backed bytes and load address.
#[derive(Debug, Clone, Copy)]
pub struct Section<'data> {
    pub data: &'data [u8],
    pub addr: u64,
}

/// A parsed ELF object, answering section lookups by name.
///
/// The trait boundary described by [`ObjectFile`] exists so the cache
/// builder never depends on `goblin` directly; `ObjectFile` (this type) is
/// simply the one implementation this crate ships.
pub struct ElfObjectFile<'data> {
    data: &'data [u8],
    elf: Elf<'data>,
}

impl<'data> ElfObjectFile<'data> {
    pub fn parse(data: &'data [u8]) -> Result<Self, ElfError> {
        let elf = Elf::parse(data).map_err(|e| ElfError {
            kind: ElfErrorKind::InvalidElf,
            source: Some(e),
        })?;
        Ok(ElfObjectFile { data, elf })
    }
}

impl<'data> ObjectFile<'data> for ElfObjectFile<'data> {
    fn section(&self, name: &str) -> Option<Section<'data>> {
        for shdr in &self.elf.section_headers {
            let header_name = self.elf.shdr_strtab.get_at(shdr.sh_name)?;
            if header_name != name {
                continue;
            }
            let start = shdr.sh_offset as usize;
            let end = start.checked_add(shdr.sh_size as usize)?;
            let data = self.data.get(start..end)?;
            return Some(Section {
                data,
                addr: shdr.sh_addr,
            });
        }
        None
    }

    fn is_64(&self) -> bool {
        self.elf.is_64
    }

    fn endian(&self) -> Endian {
        if self.elf.little_endian {
            Endian::Little
        } else {
            Endian::Big
        }
    }
}

impl<'data> ElfObjectFile<'data> {
    /// Exposes the parsed `goblin::elf::Elf` for the symbol table loader,
    /// which needs the full symbol and string table rather than a single
    /// named section's bytes.
    pub fn elf(&self) -> &Elf<'data> {
        &self.elf
    }

    /// Counts section headers named `name`. A well-formed object has at
    /// most one of any DWARF section; more than one is a malformed file,
    /// not a lookup ambiguity [`ObjectFile::section`] should paper over.
    pub fn section_count(&self, name: &str) -> usize {
        self.elf
            .section_headers
            .iter()
            .filter(|shdr| self.elf.shdr_strtab.get_at(shdr.sh_name) == Some(name))
            .count()
    }
}

/// The narrow surface the cache builder needs from an object file, so it
/// can be driven by anything that can answer "bytes of section X" without
/// depending on `goblin` directly.
pub trait ObjectFile<'data> {
    fn section(&self, name: &str) -> Option<Section<'data>>;
    fn is_64(&self) -> bool;
    fn endian(&self) -> Endian;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_garbage() {
        let err = ElfObjectFile::parse(&[0u8; 16]).unwrap_err();
        assert_eq!(err.kind(), ElfErrorKind::InvalidElf);
    }
}
