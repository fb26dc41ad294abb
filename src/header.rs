//! Fixed-layout container header and the record/name table walk.
//!
//! All binary fields are little-endian.  The 512-byte header struct is
//! followed (inside the same encrypted region, up to `data_offset`) by two
//! parallel tables: 16-byte record slots carrying `(size, offset, crc)`
//! and 8-byte name slots carrying a flag byte plus a 7-byte filename
//! fragment.  Slot *i* of each table describes the same sub-block.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read};

/// Raw first four bytes of every encrypted container region — the fixed
/// header key's keystream XORed over the start of the signature.
pub const CONTAINER_MAGIC: u32 = 0x57cb4295;

/// Size of the fixed header struct.  `data_offset` may exceed this when
/// the tables spill past the struct; it may not fall below the checksummed
/// region's start.
pub const HEADER_SIZE: usize = 0x200;

/// Offset where the header checksum's coverage begins (everything after
/// the signature, `data_offset`, and checksum fields themselves).
pub const CHECKSUM_START: usize = 0x18;

const RECORD_SLOT: usize = 16;
const NAME_SLOT: usize = 8;

/// Decoded fixed-layout container header.
#[derive(Debug, Clone)]
pub struct ContainerHeader {
    pub signature: [u8; 16],
    /// End of the header+tables region; data blocks start here.
    pub data_offset: u32,
    /// Stored checksum over the decrypted `[0x18, data_offset)` region.
    pub header_checksum: u32,
    pub name_offset: u32,
    pub name_table_offset: u32,
    pub record_table_offset: u32,
    /// Human-readable container name (NUL-padded ASCII on disk).
    pub name: String,
    pub subname: String,
    pub unpacked_files: u8,
    pub packed_files: u8,
    pub of_num: u8,
    pub files_here: u8,
}

impl ContainerHeader {
    /// Decode the fixed fields from a decrypted header region.
    pub fn read<R: Read>(mut r: R) -> io::Result<Self> {
        let mut signature = [0u8; 16];
        r.read_exact(&mut signature)?;
        let data_offset = r.read_u32::<LittleEndian>()?;
        let header_checksum = r.read_u32::<LittleEndian>()?;
        let name_offset = r.read_u32::<LittleEndian>()?;
        let name_table_offset = r.read_u32::<LittleEndian>()?;
        let record_table_offset = r.read_u32::<LittleEndian>()?;
        let mut reserved = [0u8; 12];
        r.read_exact(&mut reserved)?;
        let mut name = [0u8; 32];
        r.read_exact(&mut name)?;
        let mut subname = [0u8; 4];
        r.read_exact(&mut subname)?;
        let unpacked_files = r.read_u8()?;
        let packed_files = r.read_u8()?;
        let of_num = r.read_u8()?;
        let files_here = r.read_u8()?;
        Ok(Self {
            signature,
            data_offset,
            header_checksum,
            name_offset,
            name_table_offset,
            record_table_offset,
            name: sanitize_name(&name, "unnamed"),
            subname: sanitize_name(&subname, ""),
            unpacked_files,
            packed_files,
            of_num,
            files_here,
        })
    }
}

/// One sub-block referenced by a container: the zip of a record slot and
/// its parallel name slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    pub crc: u32,
}

/// Walk the record and name tables in lockstep over the decrypted header
/// region (`region` is `[0, data_offset)` plaintext).
///
/// An all-zero size+offset pair terminates the table; a slot with exactly
/// one zero field is skipped but the walk continues.  Slots whose record
/// would cross `data_offset` end the walk.
pub fn walk_tables(region: &[u8], hdr: &ContainerHeader) -> Vec<BlockEntry> {
    let mut entries = Vec::new();
    let mut rec = hdr.record_table_offset as usize;
    let mut name_slot = hdr.name_table_offset as usize;
    let mut index = 0usize;

    while rec + RECORD_SLOT <= region.len() {
        let (Some(size), Some(offset), Some(crc)) = (
            read_u32_le(region, rec),
            read_u32_le(region, rec + 4),
            read_u32_le(region, rec + 8),
        ) else {
            break;
        };
        if size == 0 && offset == 0 {
            break;
        }
        if size != 0 && offset != 0 {
            let name = region
                .get(name_slot + 1..name_slot + NAME_SLOT)
                .map(|frag| sanitize_name(frag, ""))
                .unwrap_or_default();
            let name = if name.is_empty() {
                format!("block{index}")
            } else {
                name
            };
            entries.push(BlockEntry {
                name,
                offset,
                size,
                crc,
            });
        }
        rec += RECORD_SLOT;
        name_slot += NAME_SLOT;
        index += 1;
    }
    entries
}

fn read_u32_le(buf: &[u8], pos: usize) -> Option<u32> {
    let bytes = buf.get(pos..pos + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// NUL-trimmed, filesystem-safe rendering of an on-disk name field.
fn sanitize_name(raw: &[u8], fallback: &str) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let cleaned: String = raw[..end]
        .iter()
        .map(|&b| match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'_' | b'-' => b as char,
            _ => '_',
        })
        .collect();
    if cleaned.is_empty() {
        fallback.to_owned()
    } else {
        cleaned
    }
}
