//! ELF32 executable headers.
//!
//! Only what `exec` needs: the file header, the program headers, and
//! the acceptance rules. Little-endian ELF32 of type EXEC, loading
//! nothing but `PT_LOAD` segments.

use crate::error::{KernelError, KernelResult};
use crate::fs::{read_u16, read_u32};

/// "\x7FELF" read as a little-endian word.
pub const ELF_MAGIC: u32 = 0x464C_457F;

const CLASS_32: u8 = 1;
const TYPE_EXEC: u16 = 2;

/// A loadable program header.
pub const PT_LOAD: u32 = 1;

/// On-disk size of the ELF32 file header.
pub const EHDR_SIZE: usize = 52;

/// On-disk size of one ELF32 program header.
pub const PHDR_SIZE: usize = 32;

/// ELF32 file header, decoded.
#[derive(Debug, Clone, Copy)]
pub struct ElfHeader {
    pub entry: u32,
    pub phoff: u32,
    pub phentsize: u16,
    pub phnum: u16,
}

impl ElfHeader {
    /// Decode and validate: wrong magic, class or type rejects the
    /// image.
    pub fn parse(raw: &[u8; EHDR_SIZE]) -> KernelResult<Self> {
        if read_u32(raw, 0) != ELF_MAGIC {
            return Err(KernelError::InvalidExecutable { reason: "bad magic" });
        }
        if raw[4] != CLASS_32 {
            return Err(KernelError::InvalidExecutable { reason: "not ELF32" });
        }
        if read_u16(raw, 16) != TYPE_EXEC {
            return Err(KernelError::InvalidExecutable { reason: "not an executable" });
        }
        Ok(Self {
            entry: read_u32(raw, 24),
            phoff: read_u32(raw, 28),
            phentsize: read_u16(raw, 42),
            phnum: read_u16(raw, 44),
        })
    }
}

/// ELF32 program header, decoded.
#[derive(Debug, Clone, Copy)]
pub struct ProgHeader {
    pub ptype: u32,
    pub off: u32,
    pub vaddr: u32,
    pub filesz: u32,
    pub memsz: u32,
}

impl ProgHeader {
    pub fn parse(raw: &[u8; PHDR_SIZE]) -> Self {
        Self {
            ptype: read_u32(raw, 0),
            off: read_u32(raw, 4),
            vaddr: read_u32(raw, 8),
            filesz: read_u32(raw, 16),
            memsz: read_u32(raw, 20),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_ehdr() -> [u8; EHDR_SIZE] {
        let mut raw = [0u8; EHDR_SIZE];
        raw[0..4].copy_from_slice(&ELF_MAGIC.to_le_bytes());
        raw[4] = CLASS_32;
        raw[16..18].copy_from_slice(&TYPE_EXEC.to_le_bytes());
        raw[24..28].copy_from_slice(&0x1000u32.to_le_bytes()); // entry
        raw[28..32].copy_from_slice(&52u32.to_le_bytes()); // phoff
        raw[42..44].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        raw[44..46].copy_from_slice(&1u16.to_le_bytes());
        raw
    }

    #[test]
    fn a_wellformed_header_parses() {
        let eh = ElfHeader::parse(&minimal_ehdr()).unwrap();
        assert_eq!(eh.entry, 0x1000);
        assert_eq!(eh.phoff, 52);
        assert_eq!(eh.phnum, 1);
    }

    #[test]
    fn bad_magic_class_and_type_all_reject() {
        let mut raw = minimal_ehdr();
        raw[0] = 0;
        assert!(ElfHeader::parse(&raw).is_err());

        let mut raw = minimal_ehdr();
        raw[4] = 2; // ELF64
        assert!(ElfHeader::parse(&raw).is_err());

        let mut raw = minimal_ehdr();
        raw[16] = 3; // ET_DYN
        assert!(ElfHeader::parse(&raw).is_err());
    }

    #[test]
    fn program_headers_decode_the_load_fields() {
        let mut raw = [0u8; PHDR_SIZE];
        raw[0..4].copy_from_slice(&PT_LOAD.to_le_bytes());
        raw[4..8].copy_from_slice(&0x200u32.to_le_bytes());
        raw[8..12].copy_from_slice(&0x1000u32.to_le_bytes());
        raw[16..20].copy_from_slice(&0x300u32.to_le_bytes());
        raw[20..24].copy_from_slice(&0x400u32.to_le_bytes());

        let ph = ProgHeader::parse(&raw);
        assert_eq!(ph.ptype, PT_LOAD);
        assert_eq!(ph.off, 0x200);
        assert_eq!(ph.vaddr, 0x1000);
        assert_eq!(ph.filesz, 0x300);
        assert_eq!(ph.memsz, 0x400);
    }
}
