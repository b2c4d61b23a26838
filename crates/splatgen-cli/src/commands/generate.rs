//! Generate command - turn one image into a splat scene.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use splatgen_core::{
    CancellationFlag, ComputeMode, GenerationRequest, OutputQuality, ProgressCallback, SplatConfig,
    SplatError,
};

use super::{build_pipeline, load_config};

/// Options shared by `generate` and `batch`.
#[derive(Args, Clone)]
pub struct GenerationOptions {
    /// Output directory for scene files
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Disparity factor passed to the model
    #[arg(long)]
    disparity: Option<f32>,

    /// Execution backend: auto, neural-engine-and-cpu, all-available, cpu-only
    #[arg(long)]
    compute: Option<ComputeMode>,

    /// Output quality: full, balanced, low
    #[arg(long)]
    quality: Option<OutputQuality>,

    /// Maximum number of points written
    #[arg(long)]
    max_points: Option<usize>,

    /// Run even below the device memory threshold
    #[arg(long)]
    allow_low_memory: bool,

    /// Write ASCII PLY instead of binary
    #[arg(long)]
    ascii: bool,

    /// Model cache directory
    #[arg(short, long)]
    model_dir: Option<PathBuf>,
}

impl GenerationOptions {
    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut SplatConfig) {
        if let Some(dir) = &self.output_dir {
            config.generation.output_dir = dir.clone();
        }
        if let Some(disparity) = self.disparity {
            config.generation.disparity_factor = disparity;
        }
        if let Some(compute) = self.compute {
            config.generation.compute = compute;
        }
        if let Some(quality) = self.quality {
            config.generation.quality = quality;
        }
        if self.max_points.is_some() {
            config.generation.max_output_points = self.max_points;
        }
        if self.allow_low_memory {
            config.device.allow_low_memory = true;
        }
        if self.ascii {
            config.generation.binary = false;
        }
        if let Some(dir) = &self.model_dir {
            config.model.model_dir = dir.clone();
        }
    }
}

/// Arguments for the generate command.
#[derive(Args)]
pub struct GenerateArgs {
    /// Input image (PNG, JPEG, ...)
    #[arg(required = true)]
    input: PathBuf,

    #[command(flatten)]
    options: GenerationOptions,
}

pub async fn run(args: GenerateArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = load_config(config_path)?;
    args.options.apply(&mut config);

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }
    let image_bytes = fs::read(&args.input)?;
    info!("Generating scene for {}", args.input.display());

    let cancel = CancellationFlag::new();
    cancel_on_ctrl_c(cancel.clone());

    let request = GenerationRequest::new(image_bytes)
        .with_disparity_factor(config.generation.disparity_factor)
        .with_cancellation(cancel);
    let mut pipeline = build_pipeline(config);

    let pb = progress_bar();
    let result = pipeline
        .generate(request, Some(progress_callback(&pb)))
        .await;

    let result = match result {
        Ok(result) => {
            pb.finish_with_message("Done");
            result
        }
        Err(SplatError::Cancelled) => {
            pb.abandon_with_message("Cancelled");
            anyhow::bail!("Generation cancelled");
        }
        Err(e) => {
            pb.abandon_with_message("Failed");
            return Err(e.into());
        }
    };

    println!(
        "{} Scene written to {}",
        style("✓").green(),
        result.scene_path.display()
    );
    println!(
        "{} {} points ({} predicted) on {} in {}ms",
        style("ℹ").blue(),
        result.point_count,
        result.source_point_count,
        result
            .backend
            .map_or_else(|| "unknown backend".to_string(), |b| b.to_string()),
        result.elapsed_ms
    );

    debug!("Total time: {:?}", start.elapsed());
    Ok(())
}

/// Set `cancel` on the first Ctrl-C.
pub fn cancel_on_ctrl_c(cancel: CancellationFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancelling after the current batch");
            cancel.cancel();
        }
    });
}

pub fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {percent:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    pb
}

/// Forward pipeline progress to `pb`.
pub fn progress_callback(pb: &ProgressBar) -> ProgressCallback {
    let pb = pb.clone();
    Arc::new(move |value: f64| {
        pb.set_position((value * 100.0).round() as u64);
        pb.set_message(stage(value));
    })
}

fn stage(progress: f64) -> &'static str {
    match progress {
        p if p < 0.20 => "Preparing model...",
        p if p < 0.25 => "Loading model...",
        p if p < 0.35 => "Running model...",
        p if p < 1.0 => "Writing scene...",
        _ => "Done",
    }
}
