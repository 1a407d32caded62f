//! nxtree CLI: write NeXus trees described in JSON and inspect the result.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_possible_truncation,
    clippy::module_name_repetitions
)]

mod manifest;

use clap::{Args, Parser, Subcommand};
use log::info;
use manifest::Manifest;
use nxtree_io::{CompressionPolicy, MemoryApi, NexusApi, NexusWriter, Op, WriterConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    NxtreeIo(#[from] nxtree_io::Error),

    #[error("Manifest parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Manifest error: {0}")]
    Manifest(String),
}

/// Deferred-write NeXus tree writer.
#[derive(Parser)]
#[command(name = "nxtree")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a tree from a JSON manifest and write it
    Write(WriteArgs),

    /// List the groups and datasets of a NeXus file
    Inspect {
        /// Input NeXus/HDF5 file
        input: PathBuf,
    },
}

#[derive(Args)]
struct WriteArgs {
    /// JSON manifest describing the tree
    manifest: PathBuf,

    /// Output file path; appended to when it exists
    #[arg(short, long, required_unless_present = "dry_run")]
    output: Option<PathBuf>,

    /// Elements per bounded write (overrides NXTREE_SLAB_SIZE)
    #[arg(long)]
    slab_size: Option<i64>,

    /// Deflate level for eligible datasets
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=9))]
    compress: Option<u8>,

    /// Cap one slab to this fraction of available memory
    #[arg(long)]
    memory_fraction: Option<f64>,

    /// Commit into an in-memory file and report the calls made
    #[arg(long)]
    dry_run: bool,
}

impl WriteArgs {
    fn config(&self) -> WriterConfig {
        let mut config = WriterConfig::from_env();
        if let Some(slab_size) = self.slab_size {
            config = config.with_slab_budget(slab_size);
        }
        if let Some(level) = self.compress {
            config = config.with_compression(CompressionPolicy::Deflate(level));
        }
        if let Some(fraction) = self.memory_fraction {
            config = config.with_memory_fraction(fraction);
        }
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let outcome = match cli.command {
        Commands::Write(args) => write(&args),
        Commands::Inspect { input } => inspect(&input).map(|()| true),
    };
    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::from(2)
        }
    }
}

/// Returns false when the write finished with recorded errors.
fn write(args: &WriteArgs) -> Result<bool> {
    let text = std::fs::read_to_string(&args.manifest)?;
    let manifest = Manifest::from_json(&text)?;
    let config = args.config();

    if args.dry_run {
        let mut writer = NexusWriter::with_api(MemoryApi::new(), config)?;
        let outcome = commit(&mut writer, &manifest);
        let api = writer.close()?;
        let message = outcome?;
        println!("Groups created: {}", api.calls(Op::MakeGroup));
        println!("Datasets created: {}", api.calls(Op::MakeData));
        println!("Whole writes: {}", api.calls(Op::PutData));
        println!("Slab writes: {}", api.calls(Op::PutSlab));
        println!("Links: {}", api.calls(Op::MakeLink));
        return Ok(report(&message));
    }

    let Some(output) = &args.output else {
        return Err(CliError::Manifest("no output file given".to_string()));
    };
    let mut writer = NexusWriter::open(output, config)?;
    info!(
        "writing {} (slab budget {})",
        output.display(),
        writer.slab_budget()
    );
    let outcome = commit(&mut writer, &manifest);
    let closed = writer.close();
    let message = outcome?;
    closed?;
    println!("Wrote {}", output.display());
    Ok(report(&message))
}

/// Builds the manifest's tree and writes it from the root. Returns the
/// error text collected during the write.
fn commit<A: NexusApi>(writer: &mut NexusWriter<A>, manifest: &Manifest) -> Result<String> {
    let created = manifest.build(writer)?;
    info!("built {} nodes", created);
    let root = writer.root();
    writer.write(root)?;
    Ok(writer.take_error_message(root)?)
}

fn report(message: &str) -> bool {
    if message.is_empty() {
        return true;
    }
    eprintln!("Write finished with errors:");
    for part in message.split(';').filter(|p| !p.is_empty()) {
        eprintln!("  {}", part);
    }
    false
}

fn inspect(input: &std::path::Path) -> Result<()> {
    println!("File: {}", input.display());
    for object in nxtree_io::describe(input)? {
        println!("{}", object);
    }
    Ok(())
}
