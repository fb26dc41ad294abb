//! Filesystem orchestration around the pure parser: input discovery,
//! output naming, and batch extraction.
//!
//! Inputs are firmware files matching `*.of?` — the trailing character of
//! the extension is the firmware slot number `N`.  Decoded blocks land in
//! the target directory as `of<N>.<container>.hdr` and
//! `of<N>.<container>.<block>`.  A batch run never aborts on one bad
//! file; every input produces an [`ExtractReport`].

use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::cipher::{decrypt, has_signature, CipherState, HEADER_KEY, SIGNATURE};
use crate::container::{parse, BlockFailure, BlockSink, ParseError, RawBlock};
use crate::header::{CONTAINER_MAGIC, HEADER_SIZE};

/// Offset at which `.of0` stub files carry the container magic.
const STUB_MAGIC_OFFSET: usize = 0x10;

/// Default output directory name, created under the input directory.
pub const DEFAULT_OUTPUT_DIR: &str = "extracted";

// ── Discovery ─────────────────────────────────────────────────────────────────

/// One discovered firmware input.
#[derive(Debug, Clone, Serialize)]
pub struct FirmwareInput {
    pub path: PathBuf,
    /// Slot number parsed from the trailing extension character
    /// (non-digit trailers map to 0).
    pub of_num: u32,
}

/// Slot number for a firmware file name, when it matches `*.of?`.
pub fn of_number(path: &Path) -> Option<u32> {
    let ext = path.extension()?.to_str()?;
    let trailer = ext.strip_prefix("of")?;
    let mut chars = trailer.chars();
    let c = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    Some(c.to_digit(10).unwrap_or(0))
}

/// Find all `*.of?` firmware files directly under `dir`, sorted by name.
pub fn discover(dir: &Path) -> io::Result<Vec<FirmwareInput>> {
    let mut inputs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if let Some(of_num) = of_number(&path) {
            inputs.push(FirmwareInput { path, of_num });
        }
    }
    inputs.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(inputs)
}

// ── Output naming ─────────────────────────────────────────────────────────────

/// File name for one decoded block, e.g. `of3.MAINFW.boot`.
pub fn output_name(of_num: u32, logical: &str) -> String {
    format!("of{of_num}.{logical}")
}

/// Sink that writes each decoded block to `dir/of<N>.<logical>`.
#[derive(Debug)]
pub struct DirSink {
    dir: PathBuf,
    of_num: u32,
    pub written: Vec<PathBuf>,
}

impl DirSink {
    pub fn new(dir: &Path, of_num: u32) -> Self {
        Self {
            dir: dir.to_owned(),
            of_num,
            written: Vec::new(),
        }
    }
}

impl BlockSink for DirSink {
    fn emit(&mut self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.dir.join(output_name(self.of_num, name));
        fs::write(&path, bytes)?;
        self.written.push(path);
        Ok(())
    }
}

// ── Per-file extraction ───────────────────────────────────────────────────────

/// Outcome of extracting one input file.
#[derive(Debug, Serialize)]
pub struct ExtractReport {
    pub input: PathBuf,
    pub of_num: u32,
    /// Outermost container name, when a container header was decoded.
    pub container: Option<String>,
    /// Output files written, in emission order.
    pub outputs: Vec<PathBuf>,
    /// Entry-level failures that were skipped over.
    pub failures: Vec<BlockFailure>,
    /// Whole-file failure (unreadable input, bad header, not the format).
    pub error: Option<String>,
}

impl ExtractReport {
    fn failed(input: &Path, of_num: u32, error: impl ToString) -> Self {
        Self {
            input: input.to_owned(),
            of_num,
            container: None,
            outputs: Vec::new(),
            failures: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Decode one firmware file into `outdir`.
///
/// Never returns `Err`: every outcome, including an unreadable or
/// malformed input, is encoded in the report so a batch can continue.
pub fn extract_file(path: &Path, of_num: u32, outdir: &Path) -> ExtractReport {
    let data = match fs::read(path) {
        Ok(d) => d,
        Err(e) => return ExtractReport::failed(path, of_num, e),
    };

    let block = RawBlock::new(&data);
    if block.starts_with_magic() {
        let mut sink = DirSink::new(outdir, of_num);
        match parse(block, &mut sink) {
            Ok(report) => ExtractReport {
                input: path.to_owned(),
                of_num,
                container: Some(report.container),
                outputs: sink.written,
                failures: report.failures,
                error: None,
            },
            Err(e) => ExtractReport::failed(path, of_num, e),
        }
    } else if let Some(plain) = decode_stub(&data) {
        // The signature marker is stripped; the stub has no inner name.
        let out = outdir.join(format!("of{of_num}"));
        match fs::write(&out, &plain) {
            Ok(()) => ExtractReport {
                input: path.to_owned(),
                of_num,
                container: None,
                outputs: vec![out],
                failures: Vec::new(),
                error: None,
            },
            Err(e) => ExtractReport::failed(path, of_num, e),
        }
    } else {
        ExtractReport::failed(path, of_num, ParseError::InvalidSignature)
    }
}

/// Decode a `.of0` stub: a sub-512-byte file carrying the container magic
/// at offset 0x10 instead of 0 is a bare stream-encrypted blob under the
/// fixed header key, with no container structure of its own.
///
/// Returns `None` for anything else, containers included, so callers can
/// probe with this before handing a file to the container parser.
pub fn decode_stub(data: &[u8]) -> Option<Vec<u8>> {
    if data.len() >= HEADER_SIZE || data.len() < STUB_MAGIC_OFFSET + SIGNATURE.len() {
        return None;
    }
    let at = &data[STUB_MAGIC_OFFSET..STUB_MAGIC_OFFSET + 4];
    if u32::from_le_bytes([at[0], at[1], at[2], at[3]]) != CONTAINER_MAGIC {
        return None;
    }
    let mut state = CipherState::new();
    let plain = decrypt(&data[STUB_MAGIC_OFFSET..], &HEADER_KEY, &mut state);
    if !has_signature(&plain) {
        return None;
    }
    Some(plain[SIGNATURE.len()..].to_vec())
}

// ── Batch extraction ──────────────────────────────────────────────────────────

/// Discover and decode every firmware file under `dir` into `outdir`,
/// creating `outdir` if necessary.
///
/// With the `parallel` feature, independent input files are decoded on
/// the rayon pool; outputs are distinct per slot number so no further
/// serialization is needed.
pub fn extract_dir(dir: &Path, outdir: &Path) -> io::Result<Vec<ExtractReport>> {
    let inputs = discover(dir)?;
    fs::create_dir_all(outdir)?;
    Ok(run_all(&inputs, outdir))
}

#[cfg(feature = "parallel")]
fn run_all(inputs: &[FirmwareInput], outdir: &Path) -> Vec<ExtractReport> {
    use rayon::prelude::*;
    inputs
        .par_iter()
        .map(|inp| extract_file(&inp.path, inp.of_num, outdir))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn run_all(inputs: &[FirmwareInput], outdir: &Path) -> Vec<ExtractReport> {
    inputs
        .iter()
        .map(|inp| extract_file(&inp.path, inp.of_num, outdir))
        .collect()
}
