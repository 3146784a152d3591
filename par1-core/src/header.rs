//! The PAR v1.0 on-disk layout: 96-byte fixed file header, variable-length
//! file-list entries, and the set-hash binding that ties every volume of
//! a set together. Packing is manual (`to_le_bytes`/`from_le_bytes`)
//! rather than a serde derive, because the layout must be reproduced
//! byte-for-byte — see `DESIGN.md`.

use crate::error::{ParError, Result};
use crate::fingerprint::Fingerprint;

pub const IDENTIFIER: [u8; 8] = *b"PAR\0\0\0\0\0";
pub const VERSION_1_0: u32 = 0x0001_0000;
pub const HEADER_SIZE: u64 = 0x60;
pub const FILE_ENTRY_FIXED_SIZE: u64 = 0x38;

/// High byte of the generator tag. `0xFF` marks this implementation;
/// `0x00..=0x03` and `0xFE` are historical creators, accepted on read.
pub const GENERATOR_SELF: u8 = 0xFF;
const RESERVED_GENERATORS: [u8; 5] = [0x00, 0x01, 0x02, 0x03, 0xFE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Unknown,
    Valid,
    Corrupt,
    Missing,
    Misnamed,
    Error,
}

impl FileStatus {
    pub fn status_str(&self) -> &'static str {
        match self {
            FileStatus::Unknown => "Unknown",
            FileStatus::Valid => "Valid",
            FileStatus::Corrupt => "Corrupt",
            FileStatus::Missing => "Missing",
            FileStatus::Misnamed => "Misnamed",
            FileStatus::Error => "Error",
        }
    }
}

/// The fixed 96-byte file header, common to volume 0 (index-only) and
/// parity volumes >= 1.
#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    pub version: u32,
    pub generator: u32,
    pub body_hash: Fingerprint,
    pub set_hash: Fingerprint,
    pub volume_number: u64,
    pub file_count: u64,
    pub file_list_offset: u64,
    pub file_list_size: u64,
    pub data_offset: u64,
    pub data_size: u64,
}

impl FileHeader {
    pub fn generator_tag(version: &str) -> u32 {
        let parts: Vec<u32> = version
            .split('.')
            .filter_map(|p| p.parse::<u32>().ok())
            .collect();
        let (major, minor, patch) = (
            *parts.first().unwrap_or(&0),
            *parts.get(1).unwrap_or(&0),
            *parts.get(2).unwrap_or(&0),
        );
        ((GENERATOR_SELF as u32) << 24) | ((major & 0xFF) << 16) | ((minor & 0xFF) << 8) | (patch & 0xFF)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0x00..0x08].copy_from_slice(&IDENTIFIER);
        buf[0x08..0x0C].copy_from_slice(&self.version.to_le_bytes());
        buf[0x0C..0x10].copy_from_slice(&self.generator.to_le_bytes());
        buf[0x10..0x20].copy_from_slice(self.body_hash.as_bytes());
        buf[0x20..0x30].copy_from_slice(self.set_hash.as_bytes());
        write_u64_split(&mut buf[0x30..0x38], self.volume_number);
        write_u64_split(&mut buf[0x38..0x40], self.file_count);
        write_u64_split(&mut buf[0x40..0x48], self.file_list_offset);
        write_u64_split(&mut buf[0x48..0x50], self.file_list_size);
        write_u64_split(&mut buf[0x50..0x58], self.data_offset);
        write_u64_split(&mut buf[0x58..0x60], self.data_size);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE as usize {
            return Err(ParError::format("header shorter than 96 bytes"));
        }
        if buf[0x00..0x08] != IDENTIFIER {
            return Err(ParError::format("bad PAR identifier"));
        }
        let version = u32::from_le_bytes(buf[0x08..0x0C].try_into().unwrap());
        let generator = u32::from_le_bytes(buf[0x0C..0x10].try_into().unwrap());
        let mut body_hash = [0u8; 16];
        body_hash.copy_from_slice(&buf[0x10..0x20]);
        let mut set_hash = [0u8; 16];
        set_hash.copy_from_slice(&buf[0x20..0x30]);

        let volume_number = read_u64_split_checked(&buf[0x30..0x38])?;
        let file_count = read_u64_split_checked(&buf[0x38..0x40])?;
        let file_list_offset = read_u64_split_checked(&buf[0x40..0x48])?;
        let file_list_size = read_u64_split_checked(&buf[0x48..0x50])?;
        let data_offset = read_u64_split_checked(&buf[0x50..0x58])?;
        let data_size = read_u64_split_checked(&buf[0x58..0x60])?;

        if file_list_offset != HEADER_SIZE {
            return Err(ParError::format(format!(
                "file-list offset {:#x} != {:#x}",
                file_list_offset, HEADER_SIZE
            )));
        }

        let generator_high = (generator >> 24) as u8;
        if generator_high != GENERATOR_SELF && !RESERVED_GENERATORS.contains(&generator_high) {
            // Unknown creators are accepted; the tag is purely cosmetic.
        }

        Ok(FileHeader {
            version,
            generator,
            body_hash: Fingerprint(body_hash),
            set_hash: Fingerprint(set_hash),
            volume_number,
            file_count,
            file_list_offset,
            file_list_size,
            data_offset,
            data_size,
        })
    }

    /// Cheap "is from set" probe: read only the first 0x30 bytes, check
    /// identifier and compare set_hash — callers use this to test
    /// candidate sibling files without reading their full file list.
    pub fn probe_set_hash(buf: &[u8]) -> Result<Fingerprint> {
        if buf.len() < 0x30 {
            return Err(ParError::format("too short for set-hash probe"));
        }
        if buf[0x00..0x03] != *b"PAR" {
            return Err(ParError::format("bad PAR identifier"));
        }
        let mut set_hash = [0u8; 16];
        set_hash.copy_from_slice(&buf[0x20..0x30]);
        Ok(Fingerprint(set_hash))
    }
}

fn write_u64_split(dst: &mut [u8], value: u64) {
    dst[0..4].copy_from_slice(&(value as u32).to_le_bytes());
    dst[4..8].copy_from_slice(&((value >> 32) as u32).to_le_bytes());
}

fn read_u64_split_checked(src: &[u8]) -> Result<u64> {
    let low = u32::from_le_bytes(src[0..4].try_into().unwrap());
    let high = u32::from_le_bytes(src[4..8].try_into().unwrap());
    if high != 0 {
        return Err(ParError::input(
            "32-bit overflow in a high length field: this PAR file claims sizes beyond what this implementation supports",
        ));
    }
    Ok(low as u64)
}

/// One file-list entry: fixed 0x38-byte prefix plus a variable-length
/// UTF-16 (OEM-transcoded) name with no terminator.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub recoverable: bool,
    pub unknown_status_bits: u32,
    pub size: u64,
    pub full_hash: Fingerprint,
    pub prefix_hash: Fingerprint,
    /// The exact on-disk UTF-16 code units, used for byte-equality name
    /// comparisons (see SPEC_FULL.md Open Question #2).
    pub name_utf16: Vec<u16>,
    /// Lossy display form, derived from `name_utf16` for paths/printing.
    pub name: String,
}

impl FileEntry {
    pub fn new(name: &str, size: u64, recoverable: bool, full_hash: Fingerprint, prefix_hash: Fingerprint) -> Self {
        let name_utf16: Vec<u16> = name.encode_utf16().collect();
        FileEntry {
            recoverable,
            unknown_status_bits: 0,
            size,
            full_hash,
            prefix_hash,
            name_utf16,
            name: name.to_string(),
        }
    }

    pub fn entry_size(&self) -> u64 {
        FILE_ENTRY_FIXED_SIZE + (self.name_utf16.len() as u64) * 2
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.entry_size() as usize];
        write_u64_split(&mut out[0x00..0x08], self.entry_size());
        let status: u32 = if self.recoverable { 1 } else { 0 } | self.unknown_status_bits;
        write_u64_split(&mut out[0x08..0x10], status as u64);
        write_u64_split(&mut out[0x10..0x18], self.size);
        out[0x18..0x28].copy_from_slice(self.full_hash.as_bytes());
        out[0x28..0x38].copy_from_slice(self.prefix_hash.as_bytes());
        for (i, unit) in self.name_utf16.iter().enumerate() {
            out[0x38 + i * 2..0x38 + i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        out
    }

    /// Parse one entry starting at `buf[0]`; returns the entry and the
    /// number of bytes consumed.
    pub fn from_bytes(buf: &[u8], warn_unknown_bits: &mut dyn FnMut()) -> Result<(Self, usize)> {
        if buf.len() < FILE_ENTRY_FIXED_SIZE as usize {
            return Err(ParError::format("file entry shorter than fixed prefix"));
        }
        let entry_size = read_u64_split_checked(&buf[0x00..0x08])?;
        // Only the low dword of the status field is defined; unlike the
        // entry-size and file-size fields, an overflowing high dword here
        // is not itself an input error (mirrors the original loader, which
        // never inspected `statusFieldHigh`).
        let status_raw = u32::from_le_bytes(buf[0x08..0x0C].try_into().unwrap());
        let size = read_u64_split_checked(&buf[0x10..0x18])?;

        if entry_size < FILE_ENTRY_FIXED_SIZE {
            return Err(ParError::input("file entry size smaller than fixed prefix"));
        }
        let name_len_bytes = (entry_size - FILE_ENTRY_FIXED_SIZE) as usize;
        if buf.len() < FILE_ENTRY_FIXED_SIZE as usize + name_len_bytes {
            return Err(ParError::input("file name length exceeds available buffer"));
        }

        let mut full_hash = [0u8; 16];
        full_hash.copy_from_slice(&buf[0x18..0x28]);
        let mut prefix_hash = [0u8; 16];
        prefix_hash.copy_from_slice(&buf[0x28..0x38]);

        if status_raw & !1 != 0 {
            warn_unknown_bits();
        }
        let recoverable = status_raw & 1 != 0;

        let name_bytes = &buf[0x38..0x38 + name_len_bytes];
        let mut name_utf16 = Vec::with_capacity(name_len_bytes / 2);
        for chunk in name_bytes.chunks_exact(2) {
            name_utf16.push(u16::from_le_bytes([chunk[0], chunk[1]]));
        }
        let name = String::from_utf16_lossy(&name_utf16);

        Ok((
            FileEntry {
                recoverable,
                unknown_status_bits: status_raw & !1,
                size,
                full_hash: Fingerprint(full_hash),
                prefix_hash: Fingerprint(prefix_hash),
                name_utf16,
                name,
            },
            entry_size as usize,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::digest;

    #[test]
    fn header_roundtrip_byte_identical() {
        let header = FileHeader {
            version: VERSION_1_0,
            generator: FileHeader::generator_tag("0.1.0"),
            body_hash: digest(b"body"),
            set_hash: digest(b"set"),
            volume_number: 0,
            file_count: 3,
            file_list_offset: HEADER_SIZE,
            file_list_size: 100,
            data_offset: HEADER_SIZE + 100,
            data_size: 0,
        };
        let bytes = header.to_bytes();
        let parsed = FileHeader::from_bytes(&bytes).unwrap();
        let reencoded = parsed.to_bytes();
        assert_eq!(bytes.to_vec(), reencoded.to_vec());
        assert_eq!(parsed.file_count, 3);
        assert_eq!(parsed.volume_number, 0);
    }

    #[test]
    fn rejects_high_dword_overflow() {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0x00..0x08].copy_from_slice(&IDENTIFIER);
        buf[0x40..0x48].copy_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        // Poison the high dword of volume_number.
        buf[0x34..0x38].copy_from_slice(&1u32.to_le_bytes());
        assert!(FileHeader::from_bytes(&buf).is_err());
    }

    #[test]
    fn file_entry_roundtrip() {
        let entry = FileEntry::new("readme.txt", 1234, true, digest(b"a"), digest(b"a"));
        let bytes = entry.to_bytes();
        let mut warned = false;
        let (parsed, consumed) = FileEntry::from_bytes(&bytes, &mut || warned = true).unwrap();
        assert_eq!(consumed, bytes.len());
        assert!(!warned);
        assert_eq!(parsed.name, "readme.txt");
        assert_eq!(parsed.size, 1234);
        assert!(parsed.recoverable);
    }

    #[test]
    fn unknown_status_bits_are_masked_and_warned() {
        let mut entry = FileEntry::new("a.bin", 10, true, digest(b"a"), digest(b"a"));
        entry.unknown_status_bits = 0b10;
        let bytes = entry.to_bytes();
        let mut warned = false;
        let (parsed, _) = FileEntry::from_bytes(&bytes, &mut || warned = true).unwrap();
        assert!(warned);
        assert!(parsed.recoverable);
    }
}
