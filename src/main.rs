use clap::{Parser, Subcommand};
use ofw::container::{parse, MemorySink, RawBlock};
use ofw::extract::{decode_stub, extract_dir, DEFAULT_OUTPUT_DIR};
use ofw::header::{ContainerHeader, HEADER_SIZE};
use ofw::{decrypt, has_signature, CipherState, HEADER_KEY};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ofw", about = "Decoder for the Onkyo .of firmware container format")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decrypt every *.of? firmware file in a directory
    Extract {
        /// Directory to search for firmware files
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// Output directory (default: <dir>/extracted)
        #[arg(short = 'C', long)]
        output_dir: Option<PathBuf>,
        /// Emit the batch report as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Decode one firmware file in memory and list its blocks
    List {
        input: PathBuf,
    },
    /// Decode one firmware file and report per-block verdicts
    Verify {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Show the decrypted top-level container header fields
    Info {
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {
        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { dir, output_dir, json } => {
            let outdir = output_dir.unwrap_or_else(|| dir.join(DEFAULT_OUTPUT_DIR));
            let reports = extract_dir(&dir, &outdir)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
                return Ok(());
            }
            if reports.is_empty() {
                println!("No *.of? firmware files found in {}", dir.display());
                return Ok(());
            }
            for r in &reports {
                println!("Processing {}", r.input.display());
                match &r.error {
                    Some(e) => println!("  error: {e}"),
                    None => {
                        for out in &r.outputs {
                            println!("  wrote {}", out.display());
                        }
                        for f in &r.failures {
                            println!("  skipped '{}' at {:#x}: {}", f.name, f.offset, f.error);
                        }
                    }
                }
            }
            println!("Done.");
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input } => {
            let data = std::fs::read(&input)?;
            if let Some(plain) = decode_stub(&data) {
                println!("Stub file (bare encrypted stream, no container structure)");
                println!("{:<26} {:>12}  Leading bytes", "Block", "Size");
                let preview = hex::encode(&plain[..plain.len().min(8)]);
                println!("{:<26} {:>12}  {}", "(stub)", plain.len(), preview);
                return Ok(());
            }
            let mut sink = MemorySink::default();
            let report = parse(RawBlock::new(&data), &mut sink)?;
            println!("Container: {}", report.container);
            println!("{:<26} {:>12}  Leading bytes", "Block", "Size");
            for (name, bytes) in &sink.blocks {
                let preview = hex::encode(&bytes[..bytes.len().min(8)]);
                println!("{:<26} {:>12}  {}", name, bytes.len(), preview);
            }
            for f in &report.failures {
                println!("skipped '{}' at {:#x}: {}", f.name, f.offset, f.error);
            }
        }

        // ── Verify ───────────────────────────────────────────────────────────
        Commands::Verify { input, json } => {
            let data = std::fs::read(&input)?;
            if let Some(plain) = decode_stub(&data) {
                if json {
                    println!(
                        "{}",
                        serde_json::json!({ "stub": true, "payload_bytes": plain.len() })
                    );
                } else {
                    println!("Stub file: {} payload bytes, signature OK", plain.len());
                }
                return Ok(());
            }
            let mut sink = MemorySink::default();
            let report = parse(RawBlock::new(&data), &mut sink)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Container: {}", report.container);
                println!("  decoded blocks: {}", report.outputs.len());
                println!("  failed entries: {}", report.failures.len());
                for f in &report.failures {
                    println!("  '{}' at {:#x}: {}", f.name, f.offset, f.error);
                }
            }
            if !report.is_clean() {
                std::process::exit(1);
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let data = std::fs::read(&input)?;
            if let Some(plain) = decode_stub(&data) {
                println!("── .of stub ─────────────────────────────────────────────");
                println!("  Path            {}", input.display());
                println!("  Payload bytes   {}", plain.len());
                return Ok(());
            }
            if data.len() < HEADER_SIZE {
                return Err(format!("{} is too small to be a firmware container", input.display()).into());
            }
            let mut state = CipherState::new();
            let plain = decrypt(&data[..HEADER_SIZE], &HEADER_KEY, &mut state);
            if !has_signature(&plain) {
                return Err(format!("{} is not a firmware container", input.display()).into());
            }
            let hdr = ContainerHeader::read(&plain[..])?;
            println!("── .of container ────────────────────────────────────────");
            println!("  Path            {}", input.display());
            println!("  Name            {}", hdr.name);
            println!("  Subname         {}", hdr.subname);
            println!("  Data offset     {:#x}", hdr.data_offset);
            println!("  Header checksum {:#010x}", hdr.header_checksum);
            println!("  Name table      {:#x}", hdr.name_table_offset);
            println!("  Record table    {:#x}", hdr.record_table_offset);
            println!("  Unpacked files  {}", hdr.unpacked_files);
            println!("  Packed files    {}", hdr.packed_files);
            println!("  Slot number     {}", hdr.of_num);
            println!("  Files here      {}", hdr.files_here);
        }
    }

    Ok(())
}
