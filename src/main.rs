use std::{
    fs,
    io::Write,
    path::{self, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{LevelFilter, debug, error};

use kopare::{
    config::{DEFAULT_PARAMETER_FILE, load_parameters},
    enums::SortBy,
    runner::{Kopare, resolve_output_dir, validate_input_dir},
};

/// Process input DICOM files (in input directory) using parameters from a
/// JSON file and write results to an output directory.
#[derive(Parser, Debug)]
#[command(name = "kopare", version)]
struct Cli {
    /// Directory containing input DICOM files
    #[arg(short, long)]
    input_dir: PathBuf,

    /// Path to JSON parameter file
    #[arg(short, long, default_value = DEFAULT_PARAMETER_FILE)]
    parameter_file: PathBuf,

    /// Output directory (default: parent of the input directory)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Slice ordering used to stack the series
    #[arg(long, value_enum, default_value_t = SliceOrder::Position)]
    sort_by: SliceOrder,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SliceOrder {
    Position,
    Table,
    Instance,
    None,
}

impl From<SliceOrder> for SortBy {
    fn from(order: SliceOrder) -> Self {
        match order {
            SliceOrder::Position => SortBy::ImagePositionPatient,
            SliceOrder::Table => SortBy::TablePosition,
            SliceOrder::Instance => SortBy::InstanceNumber,
            SliceOrder::None => SortBy::None,
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} | {} | {} | {}",
                buf.timestamp_millis(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let input_dir = path::absolute(&cli.input_dir).context("resolving input directory")?;
    let parameter_file = path::absolute(&cli.parameter_file).context("resolving parameter file")?;

    validate_input_dir(&input_dir)?;
    let output_dir = resolve_output_dir(cli.output_dir.as_deref(), &input_dir)?;
    let output_dir = path::absolute(&output_dir).context("resolving output directory")?;
    let parameters = load_parameters(&parameter_file)?;
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;

    let summary = Kopare::new(input_dir, output_dir, parameters)
        .with_sort_by(cli.sort_by.into())
        .run()?;
    debug!("{} voxels masked as external air", summary.masked_voxels);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("ERROR: {err:#}");
            ExitCode::FAILURE
        }
    }
}
