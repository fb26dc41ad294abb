//! Recursive container parsing over a bounds-checked byte-range view.
//!
//! # Structure
//! A firmware container is an encrypted header region (fixed struct plus
//! record/name tables, see `header.rs`) followed by data blocks.  Each
//! referenced block is either a nested container — its first four raw
//! bytes equal [`CONTAINER_MAGIC`] — or a leaf payload encrypted under a
//! per-block key recoverable from known plaintext.
//!
//! # Failure policy
//! Header-level problems (bad signature, bad header checksum, unreachable
//! `data_offset`) abort that container's parse and surface as the `Err`
//! outcome.  Per-entry problems (entry CRC mismatch, unrecoverable key,
//! out-of-range slice) are recorded in the [`ParseReport`] and siblings
//! continue — real update packages ship with damaged blocks and the
//! format tolerates them.  Nothing is retried: the algorithm is
//! deterministic and a retry would reproduce the same failure.

use serde::Serialize;
use std::io;
use thiserror::Error;

use crate::checksum::checksum;
use crate::cipher::{decrypt, has_signature, recover_key, CipherState, HEADER_KEY, SIGNATURE};
use crate::header::{walk_tables, ContainerHeader, CHECKSUM_START, CONTAINER_MAGIC, HEADER_SIZE};

/// Leaf blocks are decrypted in fixed chunks of this size, with one
/// carried [`CipherState`]; the final chunk shrinks to the remainder.
pub const CHUNK_SIZE: usize = 0x1000;

/// Guard against malformed self-referential offsets.  Real images nest at
/// most two deep.
pub const MAX_DEPTH: usize = 16;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ParseError {
    /// Decrypted bytes do not match the known plaintext — wrong key, wrong
    /// offset, or not a firmware container at all.
    #[error("decrypted signature mismatch (wrong key, offset, or not a firmware container)")]
    InvalidSignature,
    /// Declared checksum disagrees with the computed value.
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    /// A table entry references bytes outside its container.
    #[error("range {offset:#x}+{size:#x} exceeds block of {len} bytes")]
    OutOfBounds { offset: u32, size: u32, len: usize },
    /// The recovered key failed the signature self-check for one leaf.
    #[error("recovered key failed signature check for block '{name}'")]
    InvalidKey { name: String },
    /// Container nesting exceeded [`MAX_DEPTH`].
    #[error("container nesting exceeds {max} levels")]
    RecursionLimit { max: usize },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Serialize for ParseError {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

// ── RawBlock ──────────────────────────────────────────────────────────────────

/// Immutable, bounds-known view into the source buffer.
///
/// Never owns memory and never mutates the source; every sub-range is
/// validated before access because the on-disk format carries no bounds
/// guarantee of its own.
#[derive(Debug, Clone, Copy)]
pub struct RawBlock<'a> {
    data: &'a [u8],
}

impl<'a> RawBlock<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Sub-view `[offset, offset + size)`, rejecting out-of-range access.
    pub fn slice(&self, offset: u32, size: u32) -> Result<RawBlock<'a>, ParseError> {
        let start = offset as usize;
        let end = start.checked_add(size as usize);
        match end {
            Some(end) if end <= self.data.len() => Ok(RawBlock {
                data: &self.data[start..end],
            }),
            _ => Err(ParseError::OutOfBounds {
                offset,
                size,
                len: self.data.len(),
            }),
        }
    }

    /// True when the first four raw bytes carry the container magic.
    pub fn starts_with_magic(&self) -> bool {
        self.data.len() >= 4
            && u32::from_le_bytes([self.data[0], self.data[1], self.data[2], self.data[3]])
                == CONTAINER_MAGIC
    }
}

// ── Output sink ───────────────────────────────────────────────────────────────

/// Receiver for decoded output: one call per decoded header region and one
/// per decoded leaf block.  Logical names are `<container>.hdr` and
/// `<container>.<block>`; the orchestrator maps them to files.
pub trait BlockSink {
    fn emit(&mut self, name: &str, bytes: &[u8]) -> io::Result<()>;
}

/// Sink that collects everything in memory; used by `list`/`verify` and
/// by tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub blocks: Vec<(String, Vec<u8>)>,
}

impl BlockSink for MemorySink {
    fn emit(&mut self, name: &str, bytes: &[u8]) -> io::Result<()> {
        self.blocks.push((name.to_owned(), bytes.to_vec()));
        Ok(())
    }
}

// ── Reports ───────────────────────────────────────────────────────────────────

/// A per-entry failure that did not abort the container.
#[derive(Debug, Serialize)]
pub struct BlockFailure {
    pub name: String,
    pub offset: u32,
    pub error: ParseError,
}

/// Aggregated outcome of one top-level parse, nested containers included.
#[derive(Debug, Default, Serialize)]
pub struct ParseReport {
    /// Name of the outermost container.
    pub container: String,
    /// Logical names emitted to the sink, in emission order.
    pub outputs: Vec<String>,
    /// Entry-level failures that were skipped over.
    pub failures: Vec<BlockFailure>,
}

impl ParseReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

/// Parse one container block, emitting decoded output to `sink`.
///
/// Returns the aggregated [`ParseReport`] on success; `Err` means this
/// container's own header could not be validated (per-entry failures do
/// not produce `Err` — they are collected in the report).
pub fn parse(block: RawBlock, sink: &mut dyn BlockSink) -> Result<ParseReport, ParseError> {
    let mut report = ParseReport::default();
    parse_at(block, sink, &mut report, 0)?;
    Ok(report)
}

fn parse_at(
    block: RawBlock,
    sink: &mut dyn BlockSink,
    report: &mut ParseReport,
    depth: usize,
) -> Result<(), ParseError> {
    if depth >= MAX_DEPTH {
        return Err(ParseError::RecursionLimit { max: MAX_DEPTH });
    }
    if block.len() < HEADER_SIZE {
        return Err(ParseError::OutOfBounds {
            offset: 0,
            size: HEADER_SIZE as u32,
            len: block.len(),
        });
    }

    // One cipher state covers the whole header+tables region; it keeps
    // running past the fixed struct when data_offset extends beyond it.
    let mut state = CipherState::new();
    let mut plain = decrypt(&block.bytes()[..HEADER_SIZE], &HEADER_KEY, &mut state);
    if !has_signature(&plain) {
        return Err(ParseError::InvalidSignature);
    }
    let hdr = ContainerHeader::read(&plain[..])?;

    let data_offset = hdr.data_offset as usize;
    if data_offset <= CHECKSUM_START || data_offset > block.len() {
        return Err(ParseError::OutOfBounds {
            offset: hdr.data_offset,
            size: 0,
            len: block.len(),
        });
    }
    if data_offset > HEADER_SIZE {
        plain.extend(decrypt(
            &block.bytes()[HEADER_SIZE..data_offset],
            &HEADER_KEY,
            &mut state,
        ));
    } else {
        plain.truncate(data_offset);
    }

    let computed = checksum(&plain[CHECKSUM_START..]);
    if computed != hdr.header_checksum {
        return Err(ParseError::ChecksumMismatch {
            stored: hdr.header_checksum,
            computed,
        });
    }

    if report.container.is_empty() {
        report.container = hdr.name.clone();
    }

    let logical = format!("{}.hdr", hdr.name);
    sink.emit(&logical, &plain)?;
    report.outputs.push(logical);

    for entry in walk_tables(&plain, &hdr) {
        let raw = match block.slice(entry.offset, entry.size) {
            Ok(r) => r,
            Err(error) => {
                report.failures.push(BlockFailure {
                    name: entry.name,
                    offset: entry.offset,
                    error,
                });
                continue;
            }
        };

        // Entry CRCs cover the raw, still-encrypted bytes.
        let computed = checksum(raw.bytes());
        if computed != entry.crc {
            report.failures.push(BlockFailure {
                name: entry.name,
                offset: entry.offset,
                error: ParseError::ChecksumMismatch {
                    stored: entry.crc,
                    computed,
                },
            });
            continue;
        }

        if raw.starts_with_magic() {
            // Nested container: its header-level failure is this entry's
            // failure, not the parent's.
            if let Err(error) = parse_at(raw, sink, report, depth + 1) {
                report.failures.push(BlockFailure {
                    name: entry.name,
                    offset: entry.offset,
                    error,
                });
            }
            continue;
        }

        match decode_leaf(raw, sink, &hdr.name, &entry.name) {
            Ok(logical) => report.outputs.push(logical),
            Err(error) => report.failures.push(BlockFailure {
                name: entry.name,
                offset: entry.offset,
                error,
            }),
        }
    }

    Ok(())
}

/// Decrypt one leaf block in [`CHUNK_SIZE`] chunks under its recovered
/// key, verify the signature at the start of the first chunk, strip it,
/// and emit the payload.
fn decode_leaf(
    raw: RawBlock,
    sink: &mut dyn BlockSink,
    container: &str,
    name: &str,
) -> Result<String, ParseError> {
    let src = raw.bytes();
    if src.len() < SIGNATURE.len() {
        // Too small to carry the signature, so no key can be recovered.
        return Err(ParseError::InvalidKey {
            name: name.to_owned(),
        });
    }

    let mut first16 = [0u8; 16];
    first16.copy_from_slice(&src[..16]);
    let key = recover_key(&first16);

    let mut state = CipherState::new();
    let mut plain = Vec::with_capacity(src.len() - SIGNATURE.len());
    let mut consumed = 0usize;
    while consumed < src.len() {
        let take = CHUNK_SIZE.min(src.len() - consumed);
        let chunk = decrypt(&src[consumed..consumed + take], &key, &mut state);
        if consumed == 0 {
            // The signature is a marker, not payload: check it once on the
            // first chunk, then discard it.
            if !has_signature(&chunk) {
                return Err(ParseError::InvalidKey {
                    name: name.to_owned(),
                });
            }
            plain.extend_from_slice(&chunk[SIGNATURE.len()..]);
        } else {
            plain.extend_from_slice(&chunk);
        }
        consumed += take;
    }

    let logical = format!("{container}.{name}");
    sink.emit(&logical, &plain)?;
    Ok(logical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_bounds_are_enforced() {
        let data = [0u8; 64];
        let block = RawBlock::new(&data);
        assert_eq!(block.slice(0, 64).unwrap().len(), 64);
        assert_eq!(block.slice(60, 4).unwrap().len(), 4);
        assert!(matches!(
            block.slice(60, 5),
            Err(ParseError::OutOfBounds { offset: 60, size: 5, len: 64 })
        ));
        assert!(matches!(
            block.slice(u32::MAX, u32::MAX),
            Err(ParseError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn magic_detection() {
        let raw = CONTAINER_MAGIC.to_le_bytes();
        assert!(RawBlock::new(&raw).starts_with_magic());
        assert!(!RawBlock::new(&raw[..3]).starts_with_magic());
        assert!(!RawBlock::new(&[0u8; 8]).starts_with_magic());
    }

    #[test]
    fn undersized_block_is_rejected() {
        let data = vec![0u8; 16];
        let mut sink = MemorySink::default();
        let err = parse(RawBlock::new(&data), &mut sink).unwrap_err();
        assert!(matches!(err, ParseError::OutOfBounds { .. }));
    }

    #[test]
    fn garbage_block_fails_signature() {
        let data = vec![0xa5u8; HEADER_SIZE];
        let mut sink = MemorySink::default();
        let err = parse(RawBlock::new(&data), &mut sink).unwrap_err();
        assert!(matches!(err, ParseError::InvalidSignature));
    }
}
