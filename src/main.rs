use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use gxport::codec::CodecId;
use gxport::exporter::{BlockCompositeExporter, BufferedTransformExporter, ChunkFraming, Exporter};
use gxport::extract::{extract_all, preview};
use gxport::sink::{WriteBuffer, DEFAULT_WRITE_BUFFER};
use gxport::{
    Backing, BlockTable, ExporterSpec, ExtractOptions, Manifest, ResourceEntry,
};

#[derive(Parser)]
#[command(name = "gxport", about = "Extract and repack game archive resources")]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the resources of a manifest
    List {
        manifest: PathBuf,
    },
    /// Extract every resource of a manifest
    Extract {
        manifest: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        /// Record a BLAKE3 digest of every extracted resource
        #[arg(long)]
        verify: bool,
        /// Print the extraction report as JSON
        #[arg(long)]
        json: bool,
        /// Worst-case expansion factor for buffered resources
        #[arg(long)]
        expansion: Option<u32>,
    },
    /// Hex preview of the start of one resource
    Peek {
        manifest: PathBuf,
        name:     String,
        #[arg(short = 'n', long, default_value = "256")]
        bytes:    usize,
    },
    /// Compress a raw file into an exporter's stored form
    Pack {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Codec: zstd (default), zlib, deflate, lz4, brotli, lzma, rle, lz77, none
        #[arg(short, long, default_value = "zstd")]
        codec: String,
        #[arg(short, long, default_value = "6")]
        level: i32,
        #[arg(long, value_enum, default_value = "whole")]
        framing: Framing,
        /// Record alignment for size-prefixed framing
        #[arg(long, default_value = "1")]
        align: u32,
        /// Split into independent blocks of this many KiB
        #[arg(long)]
        block_size: Option<usize>,
        /// Where to write the block table (JSON) when splitting
        #[arg(long)]
        table: Option<PathBuf>,
        /// Write a one-resource manifest describing the packed output
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Framing {
    Whole,
    LengthPrefixed,
    SizePrefixed,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { manifest } => {
            let m = Manifest::load(&manifest)?;
            println!("Manifest: {}", manifest.display());
            println!("{:<32} {:<9} {:>12} {:>12} {:>12}", "Name", "Exporter", "Offset", "Length", "Decoded");
            for r in &m.resources {
                let decoded = r.descriptor.decompressed_length
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "-".into());
                println!("{:<32} {:<9} {:>12} {:>12} {:>12}",
                    r.name, r.exporter.kind(), r.descriptor.offset, r.descriptor.length, decoded);
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { manifest, output_dir, verify, json, expansion } => {
            let m = Manifest::load(&manifest)?;
            let opts = ExtractOptions { verify, default_expansion: expansion, ..ExtractOptions::default() };
            let report = extract_all(&m, &output_dir, &opts)?;

            if json {
                println!("{}", report.to_json()?);
            } else {
                for o in &report.outcomes {
                    let status = match &o.error {
                        None    => "ok".to_string(),
                        Some(e) => format!("FAILED: {e}"),
                    };
                    let digest = o.digest.as_deref().map(|d| &d[..16]).unwrap_or("");
                    println!("  {:<32} {:>12}  {:<16}  {}", o.name, o.bytes, digest, status);
                }
                println!("Extracted {} resource(s), {} bytes to {}",
                    report.outcomes.len() - report.failed(), report.total_bytes(), output_dir.display());
            }
            if report.failed() > 0 {
                return Err(format!("{} of {} resources failed", report.failed(), report.outcomes.len()).into());
            }
        }

        // ── Peek ─────────────────────────────────────────────────────────────
        Commands::Peek { manifest, name, bytes } => {
            let m = Manifest::load(&manifest)?;
            let entry = m.get(&name).ok_or_else(|| format!("no resource named '{name}'"))?;
            let (data, failure) = preview(entry, bytes, &ExtractOptions::default());
            for (i, line) in data.chunks(16).enumerate() {
                let ascii: String = line.iter()
                    .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
                    .collect();
                println!("{:08x}  {:<32}  {}", i * 16, hex::encode(line), ascii);
            }
            if let Some(e) = failure {
                eprintln!("stream ended early: {e}");
            }
        }

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { input, output, codec, level, framing, align, block_size, table, manifest } => {
            let codec_id = parse_codec(&codec);
            let framing = match framing {
                Framing::Whole          => ChunkFraming::Whole,
                Framing::LengthPrefixed => ChunkFraming::LengthPrefixed,
                Framing::SizePrefixed   => ChunkFraming::SizePrefixed { align },
            };
            let buffered = BufferedTransformExporter::new(codec_id, framing).with_level(level);
            let mut exporter: Box<dyn Exporter> = match block_size {
                Some(kib) => Box::new(
                    BlockCompositeExporter::new(Arc::new(BlockTable::default()), Box::new(buffered))
                        .with_pack_block_size(kib * 1024),
                ),
                None => Box::new(buffered),
            };

            let mut src = BufReader::new(File::open(&input)?);
            let mut dst = WriteBuffer::new(File::create(&output)?, DEFAULT_WRITE_BUFFER);
            let summary = exporter.pack(&mut src, &mut dst)?;
            dst.into_inner()?;

            if summary.fallback.is_some() {
                eprintln!("codec '{codec_id}' cannot encode; fallback {:?} applied", summary.fallback);
            }
            if let (Some(blocks), Some(path)) = (&summary.blocks, &table) {
                std::fs::write(path, blocks.to_bytes()?)?;
                println!("  table   {} ({} blocks)", path.display(), blocks.len());
            }
            if let Some(path) = &manifest {
                let spec = ExporterSpec::Buffered { codec: codec_id, framing, expansion: None, level: Some(level) };
                let name = input
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "resource.bin".into());
                let entry = ResourceEntry::packed(name, Backing::file(output.canonicalize()?), spec, &summary);
                let m = Manifest { resources: vec![entry] };
                std::fs::write(path, m.to_bytes()?)?;
                println!("  manifest {}", path.display());
            }
            println!("Packed {} → {} ({} → {} bytes)",
                input.display(), output.display(), summary.bytes_in, summary.bytes_out);
            println!("  decompressed_length {}", summary.bytes_in);
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn parse_codec(s: &str) -> CodecId {
    CodecId::from_name(s).unwrap_or_else(|| {
        eprintln!("Unknown codec '{}', defaulting to zstd", s);
        CodecId::Zstd
    })
}
