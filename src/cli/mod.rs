//! Command-line interface for the completion pipeline.
//!
//! The model itself runs elsewhere, so completion is split in two:
//! `preprocess` writes the model input plus a params sidecar, and `restore`
//! brings the model output back into the original frame.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::loaders::read_point_cloud;
use crate::core::writers::write_point_cloud;
use crate::pipeline::batch::{downsample_file, downsample_folder, job_rng, BatchSummary, JobOptions};
use crate::pipeline::stages::{self, sidecar_path};
use crate::processors::sampling::SamplingMethod;
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "completion-pipeline")]
#[command(about = "Point cloud preparation and restoration for shape completion", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample point clouds without normalizing or filtering
    Downsample {
        /// Input file or directory
        input_path: PathBuf,
        /// Output file or directory
        output_path: PathBuf,
        /// Number of points to keep
        #[arg(short, long)]
        target_points: Option<usize>,
        /// Sampling method (random, fps, voxel)
        #[arg(short, long)]
        method: Option<String>,
        /// Process entire directory (batch mode)
        #[arg(long)]
        batch: bool,
        /// File names to copy through unchanged (batch mode)
        #[arg(long = "skip")]
        skip_files: Vec<String>,
    },

    /// Normalize, sample and filter a cloud for the model, writing a params sidecar
    Preprocess {
        /// Input point cloud
        input: PathBuf,
        /// Output point cloud (model input)
        output: PathBuf,
        /// Number of points to sample
        #[arg(short, long)]
        target_points: Option<usize>,
        /// Sampling method (random, fps, voxel)
        #[arg(short, long)]
        method: Option<String>,
    },

    /// Restore a completed cloud to its original frame and filter it
    Restore {
        /// Completed point cloud from the model
        input: PathBuf,
        /// Output point cloud
        output: PathBuf,
        /// Params sidecar written by `preprocess`
        #[arg(short, long)]
        params: PathBuf,
    },

    /// Write the default configuration to a YAML file
    InitConfig {
        /// Destination path
        #[arg(default_value = "pipeline.yaml")]
        output: PathBuf,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<60} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 37 {
            let head: String = value.chars().take(34).collect();
            format!("{}...", head)
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<37} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

fn print_failures(summary: &BatchSummary) {
    for failed in summary.failed() {
        println!(
            "  FAILED {}: {}",
            failed.file,
            failed.error.as_deref().unwrap_or("unknown error")
        );
    }
}

/// Merge command-line sampling overrides into the configured defaults.
fn job_options(
    config: &PipelineConfig,
    target_points: Option<usize>,
    method: Option<&str>,
) -> Result<JobOptions> {
    let target_points = target_points.unwrap_or(config.sampling.target_points);
    if target_points == 0 {
        bail!("target points must be greater than zero");
    }
    let method = match method {
        Some(name) => SamplingMethod::from_name(name, config.sampling.voxel_size)?,
        None => config.sampling.method()?,
    };
    Ok(JobOptions::new(target_points, method))
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match PipelineConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("Failed to load config from {}: {}, using defaults", path.display(), e);
                PipelineConfig::default()
            }
        },
        None => PipelineConfig::default(),
    };

    let result = match cli.command {
        Commands::Downsample {
            input_path,
            output_path,
            target_points,
            method,
            batch,
            skip_files,
        } => cmd_downsample(
            &input_path,
            &output_path,
            target_points,
            method.as_deref(),
            batch,
            skip_files,
            &config,
        ),
        Commands::Preprocess {
            input,
            output,
            target_points,
            method,
        } => cmd_preprocess(&input, &output, target_points, method.as_deref(), &config),
        Commands::Restore {
            input,
            output,
            params,
        } => cmd_restore(&input, &output, &params, &config),
        Commands::InitConfig { output } => cmd_init_config(&output, &config),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn cmd_downsample(
    input_path: &Path,
    output_path: &Path,
    target_points: Option<usize>,
    method: Option<&str>,
    batch: bool,
    skip_files: Vec<String>,
    config: &PipelineConfig,
) -> Result<()> {
    let start = Instant::now();
    let options = job_options(config, target_points, method)?;

    if batch {
        println!("Downsampling files in batch mode...");
        println!("Input directory: {}", input_path.display());
        println!("Output directory: {}", output_path.display());

        let skip_files = if skip_files.is_empty() {
            config.batch.skip_files.clone()
        } else {
            skip_files
        };

        let spinner = create_spinner("Sampling point clouds...");
        let summary = downsample_folder(input_path, output_path, &options, config, &skip_files);
        spinner.finish_and_clear();
        let summary = summary.context("batch downsampling failed")?;

        print_summary(
            "Batch Downsampling Complete",
            &[
                ("Input directory", input_path.display().to_string()),
                ("Output directory", output_path.display().to_string()),
                ("Method", options.method.to_string()),
                ("Target points", options.target_points.to_string()),
                (
                    "Successful",
                    format!("{}/{}", summary.successful, summary.total_files),
                ),
                ("Copied", summary.copied_files.to_string()),
                ("Duration", format!("{:.2?}", start.elapsed())),
            ],
        );
        print_failures(&summary);
    } else {
        let spinner = create_spinner("Sampling point cloud...");
        let points = downsample_file(input_path, output_path, &options, config.sampling.seed);
        spinner.finish_and_clear();
        let points = points
            .with_context(|| format!("failed to downsample {}", input_path.display()))?;

        print_summary(
            "Downsampling Complete",
            &[
                ("Input file", input_path.display().to_string()),
                ("Output file", output_path.display().to_string()),
                ("Method", options.method.to_string()),
                ("Points kept", points.to_string()),
                ("Duration", format!("{:.2?}", start.elapsed())),
            ],
        );
    }

    Ok(())
}

fn cmd_preprocess(
    input: &Path,
    output: &Path,
    target_points: Option<usize>,
    method: Option<&str>,
    config: &PipelineConfig,
) -> Result<()> {
    let start = Instant::now();
    let options = job_options(config, target_points, method)?;

    let spinner = create_spinner("Normalizing and sampling...");
    let cloud = read_point_cloud(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let mut rng = job_rng(config.sampling.seed, 0);
    let prepared = stages::preprocess(
        &cloud,
        options.target_points,
        &options.method,
        &config.outliers.pre,
        &mut rng,
    );
    spinner.finish_and_clear();
    let prepared =
        prepared.with_context(|| format!("failed to preprocess {}", input.display()))?;

    write_point_cloud(output, &prepared.cloud)
        .with_context(|| format!("failed to write {}", output.display()))?;
    let sidecar = sidecar_path(output);
    stages::write_params(&sidecar, &prepared.params)?;

    print_summary(
        "Preprocessing Complete",
        &[
            ("Input file", input.display().to_string()),
            ("Output file", output.display().to_string()),
            ("Params file", sidecar.display().to_string()),
            ("Input points", cloud.len().to_string()),
            ("Output points", prepared.cloud.len().to_string()),
            ("Scale", format!("{:.6}", prepared.params.scale)),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );

    Ok(())
}

fn cmd_restore(input: &Path, output: &Path, params: &Path, config: &PipelineConfig) -> Result<()> {
    let start = Instant::now();

    let params = stages::read_params(params)?;
    let spinner = create_spinner("Restoring original frame...");
    let completed = read_point_cloud(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let restored = stages::postprocess(&completed, &params, &config.outliers.post);
    spinner.finish_and_clear();
    let restored = restored.with_context(|| format!("failed to restore {}", input.display()))?;

    write_point_cloud(output, &restored)
        .with_context(|| format!("failed to write {}", output.display()))?;

    print_summary(
        "Restoration Complete",
        &[
            ("Input file", input.display().to_string()),
            ("Output file", output.display().to_string()),
            ("Completed points", completed.len().to_string()),
            ("Kept points", restored.len().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );

    Ok(())
}

fn cmd_init_config(output: &Path, config: &PipelineConfig) -> Result<()> {
    if output.exists() {
        bail!("{} already exists", output.display());
    }
    config
        .to_yaml(output)
        .map_err(|e| anyhow::anyhow!("failed to write {}: {}", output.display(), e))?;
    println!("Wrote configuration to {}", output.display());
    Ok(())
}
