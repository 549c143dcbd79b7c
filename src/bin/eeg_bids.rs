use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use eeg_bids_pipeline::compare::run_compare;
use eeg_bids_pipeline::complete::run_complete;
use eeg_bids_pipeline::config::{ConfigLoader, PipelineConfig};
use eeg_bids_pipeline::convert::run_convert;
use eeg_bids_pipeline::domain::TargetFormat;
use eeg_bids_pipeline::error::PipelineError;
use eeg_bids_pipeline::metadata::run_rewrite;
use eeg_bids_pipeline::output::{print_compare_summary, print_stage_summary, JsonOutput, OutputMode};

#[derive(Parser)]
#[command(name = "eeg-bids")]
#[command(about = "Convert, resample and verify EEG-BIDS datasets across SET/EDF/BDF")]
#[command(version, author)]
struct Cli {
    /// Optional JSON config file (defaults to ./eeg-bids.json when present).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Worker count for per-file stages; overrides the config file.
    #[arg(long, global = true)]
    jobs: Option<usize>,

    /// Print machine-readable JSON reports instead of the summary.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Convert SET recordings into an interchange format")]
    Convert(ConvertArgs),
    #[command(about = "Rewrite sidecars and events tables for a resampled tree")]
    RewriteMetadata(RewriteArgs),
    #[command(about = "Fill missing dataset-level files in a converted tree")]
    Complete(CompleteArgs),
    #[command(about = "Compare converted recordings against their originals")]
    Compare(CompareArgs),
}

#[derive(Args)]
struct ConvertArgs {
    input_dir: String,
    output_dir: String,

    /// Target interchange format.
    #[arg(long, value_enum)]
    format: TargetFormat,
}

#[derive(Args)]
struct RewriteArgs {
    input_dir: String,
    output_dir: String,

    /// Target sample rate in Hz; overrides the config file.
    #[arg(long)]
    rate: Option<f64>,
}

#[derive(Args)]
struct CompleteArgs {
    input_dir: String,
    output_dir: String,

    /// Format label recorded in the dataset description.
    #[arg(long, value_enum)]
    format: TargetFormat,
}

#[derive(Args)]
struct CompareArgs {
    original_dir: String,

    /// One or more converted dataset roots.
    #[arg(required = true)]
    converted_dirs: Vec<String>,

    /// Report and plot directory.
    #[arg(long, default_value = "signal_comparison_results")]
    out: String,

    /// Bound on compared recordings; overrides the config file.
    #[arg(long)]
    max_files: Option<usize>,

    /// Skip SVG artifacts, write only the JSON report.
    #[arg(long)]
    no_plots: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(pipeline) = report.downcast_ref::<PipelineError>() {
            return ExitCode::from(map_exit_code(pipeline));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PipelineError) -> u8 {
    match error {
        PipelineError::MissingInputDir(_)
        | PipelineError::NoRecordings(_, _)
        | PipelineError::ConfigRead(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.config.as_deref()).into_diagnostic()?;
    if let Some(jobs) = cli.jobs {
        config.jobs = jobs.max(1);
    }
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    match cli.command {
        Commands::Convert(args) => run_convert_command(args, &config, output_mode),
        Commands::RewriteMetadata(args) => run_rewrite_command(args, &config, output_mode),
        Commands::Complete(args) => run_complete_command(args, output_mode),
        Commands::Compare(args) => run_compare_command(args, config, output_mode),
    }
}

fn run_convert_command(
    args: ConvertArgs,
    config: &PipelineConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let input = Utf8PathBuf::from(args.input_dir);
    let output = Utf8PathBuf::from(args.output_dir);
    let report = run_convert(config, &input, &output, args.format.into()).into_diagnostic()?;
    report.save(&output).into_diagnostic()?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_stage(&report).into_diagnostic()?,
        OutputMode::Human => print_stage_summary(&report),
    }
    Ok(())
}

fn run_rewrite_command(
    args: RewriteArgs,
    config: &PipelineConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let input = Utf8PathBuf::from(args.input_dir);
    let output = Utf8PathBuf::from(args.output_dir);
    let rate = args.rate.unwrap_or(config.target_rate);
    let report = run_rewrite(&input, &output, rate).into_diagnostic()?;
    report.save(&output).into_diagnostic()?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_stage(&report).into_diagnostic()?,
        OutputMode::Human => print_stage_summary(&report),
    }
    Ok(())
}

fn run_complete_command(args: CompleteArgs, output_mode: OutputMode) -> miette::Result<()> {
    let input = Utf8PathBuf::from(args.input_dir);
    let output = Utf8PathBuf::from(args.output_dir);
    let report = run_complete(&input, &output, args.format.into()).into_diagnostic()?;
    report.save(&output).into_diagnostic()?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_stage(&report).into_diagnostic()?,
        OutputMode::Human => print_stage_summary(&report),
    }
    Ok(())
}

fn run_compare_command(
    args: CompareArgs,
    mut config: PipelineConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    if let Some(max_files) = args.max_files {
        config.max_compare_files = max_files;
    }
    if args.no_plots {
        config.plots = false;
    }
    let original = Utf8PathBuf::from(args.original_dir);
    let converted: Vec<Utf8PathBuf> = args
        .converted_dirs
        .into_iter()
        .map(Utf8PathBuf::from)
        .collect();
    let out_dir = Utf8PathBuf::from(args.out);
    let report = run_compare(&config, &original, &converted, &out_dir).into_diagnostic()?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_compare(&report).into_diagnostic()?,
        OutputMode::Human => print_compare_summary(&report),
    }
    Ok(())
}
