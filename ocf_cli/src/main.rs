use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use ocf_codecs::{codec_by_name, codec_with_level};
use ocf_core::format::{META_CODEC, META_SCHEMA};
use ocf_core::{read_header, DirectBlockWriter, Reader};

mod config;
mod frames;

use config::PackConfig;
use frames::FrameReader;

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "ocf",
    about = "Object Container Files: pack pre-encoded records without re-encoding, inspect block layout",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack length-prefixed pre-encoded records into a container file
    ///
    /// Input frames are a 4-byte big-endian length followed by one record
    /// already encoded with the given schema. Records are copied into blocks
    /// byte for byte.
    Pack {
        /// Framed input ("-" reads stdin)
        input: PathBuf,
        /// Destination container file
        output: PathBuf,
        /// Schema JSON file the records were encoded with
        #[arg(short, long)]
        schema: PathBuf,
        /// TOML file with codec, deflate_level, sync_interval, [metadata]
        #[arg(long)]
        config: Option<PathBuf>,
        /// Codec to use: null | deflate
        #[arg(short, long)]
        codec: Option<String>,
        /// Deflate level (0–9, only used with --codec deflate)
        #[arg(long)]
        deflate_level: Option<u32>,
        /// Records per block
        #[arg(short = 'n', long)]
        sync_interval: Option<u64>,
        /// Extra header metadata, repeatable: --meta key=value
        #[arg(long = "meta")]
        meta: Vec<String>,
    },
    /// Print header metadata and block statistics
    Inspect {
        /// Container file to inspect
        file: PathBuf,
        /// Print per-block details
        #[arg(long)]
        blocks: bool,
    },
    /// Print the default pack configuration as TOML
    DefaultConfig,
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();
}

// ── Subcommand implementations ─────────────────────────────────────────────

struct PackArgs {
    input: PathBuf,
    output: PathBuf,
    schema: PathBuf,
    config: Option<PathBuf>,
    codec: Option<String>,
    deflate_level: Option<u32>,
    sync_interval: Option<u64>,
    meta: Vec<String>,
}

fn resolve_pack_config(args: &PackArgs) -> anyhow::Result<PackConfig> {
    let mut config = match &args.config {
        Some(path) => PackConfig::load(path)?,
        None => PackConfig::default(),
    };
    if let Some(codec) = &args.codec {
        config.codec = codec.clone();
    }
    if let Some(level) = args.deflate_level {
        config.deflate_level = level;
    }
    if let Some(interval) = args.sync_interval {
        config.sync_interval = interval;
    }
    config.add_metadata_pairs(&args.meta)?;
    config.validate()?;
    Ok(config)
}

fn run_pack(args: PackArgs) -> anyhow::Result<()> {
    let config = resolve_pack_config(&args)?;
    let schema = std::fs::read_to_string(&args.schema)
        .with_context(|| format!("reading schema file {:?}", args.schema))?;
    if schema.trim().is_empty() {
        anyhow::bail!("schema file {:?} is empty", args.schema);
    }

    // Resolve the codec before the output file exists.
    let codec = codec_with_level(&config.codec, config.deflate_level)?;

    let source: Box<dyn Read> = if args.input.to_str() == Some("-") {
        Box::new(io::stdin().lock())
    } else {
        Box::new(BufReader::new(
            File::open(&args.input)
                .with_context(|| format!("opening input file {:?}", args.input))?,
        ))
    };
    let sink = BufWriter::new(
        File::create(&args.output)
            .with_context(|| format!("creating output file {:?}", args.output))?,
    );

    let mut writer = DirectBlockWriter::new(sink, &schema, codec);
    writer.set_sync_interval(config.sync_interval)?;
    for (key, value) in &config.metadata {
        writer.set_metadata(key, value.as_str())?;
    }

    tracing::info!(
        codec = %config.codec,
        sync_interval = config.sync_interval,
        output = ?args.output,
        "packing pre-encoded records"
    );

    let t0 = Instant::now();
    let mut frames = FrameReader::new(source);
    let mut raw_bytes = 0u64;
    while let Some(record) = frames.next_frame()? {
        raw_bytes += record.len() as u64;
        writer
            .append(&record)
            .with_context(|| format!("appending record {}", frames.frames_read() - 1))?;
    }
    writer.flush()?;
    let stats = writer.stats().unwrap_or_default();
    writer.close()?;
    let elapsed = t0.elapsed();

    tracing::info!(
        records = stats.records_written,
        blocks = stats.blocks_written,
        "pack complete"
    );
    eprintln!("  codec       : {}", config.codec);
    eprintln!("  interval    : {} records/block", config.sync_interval);
    eprintln!("  records     : {}", stats.records_written);
    eprintln!("  blocks      : {}", stats.blocks_written);
    eprintln!("  record data : {}", human_bytes(raw_bytes));
    eprintln!("  file size   : {}", human_bytes(stats.bytes_written));
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_inspect(file: PathBuf, show_blocks: bool) -> anyhow::Result<()> {
    // Read the header first to pick the codec.
    let header = read_header(&file).with_context(|| format!("reading header of {:?}", file))?;
    let codec = codec_by_name(header.codec_name()?)?;
    let mut reader = Reader::open(&file, codec)?;
    let file_size = std::fs::metadata(&file)?.len();

    println!("=== Container File: {:?} ===", file);
    println!();
    println!("  codec          : {}", reader.codec_name());
    println!("  sync marker    : {}", reader.sync_marker());
    println!("  file on disk   : {}", human_bytes(file_size));
    for (key, value) in &reader.header().metadata {
        if key == META_CODEC || key == META_SCHEMA {
            continue;
        }
        println!("  meta {:<9} : {}", key, String::from_utf8_lossy(value));
    }
    println!("  schema         : {}", reader.schema().unwrap_or("<missing>"));

    if show_blocks {
        println!();
        println!(
            "  {:>8}  {:>10}  {:>12}  {:>12}",
            "block", "records", "stored", "raw"
        );
        println!("  {}", "-".repeat(50));
    }

    let (mut records, mut stored, mut raw) = (0u64, 0u64, 0u64);
    let mut idx = 0u64;
    while let Some(block) = reader.next_block()? {
        if show_blocks {
            println!(
                "  {:>8}  {:>10}  {:>12}  {:>12}",
                idx,
                block.count,
                human_bytes(block.stored_len),
                human_bytes(block.payload.len() as u64)
            );
        }
        records += block.count;
        stored += block.stored_len;
        raw += block.payload.len() as u64;
        idx += 1;
    }

    println!();
    println!("  block count    : {}", reader.blocks_read());
    println!("  record count   : {}", records);
    println!("  raw size       : {}", human_bytes(raw));
    println!("  stored size    : {}", human_bytes(stored));
    if stored > 0 {
        println!("  ratio          : {:.2}x", raw as f64 / stored as f64);
    }
    Ok(())
}

fn run_default_config() -> anyhow::Result<()> {
    print!("{}", PackConfig::default().to_toml()?);
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Pack {
            input,
            output,
            schema,
            config,
            codec,
            deflate_level,
            sync_interval,
            meta,
        } => run_pack(PackArgs {
            input,
            output,
            schema,
            config,
            codec,
            deflate_level,
            sync_interval,
            meta,
        }),
        Commands::Inspect { file, blocks } => run_inspect(file, blocks),
        Commands::DefaultConfig => run_default_config(),
    }
}
