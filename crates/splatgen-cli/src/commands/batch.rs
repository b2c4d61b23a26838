//! Batch command - generate scenes for many images with one loaded model.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{error, warn};

use splatgen_core::{CancellationFlag, GenerationRequest, SplatError};

use super::generate::{cancel_on_ctrl_c, progress_bar, progress_callback, GenerationOptions};
use super::{build_pipeline, load_config};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "tif", "tiff"];

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Input glob pattern (e.g. "photos/*.jpg")
    #[arg(required = true)]
    input: String,

    /// Continue on error
    #[arg(long)]
    continue_on_error: bool,

    /// Write a summary.json next to the scenes
    #[arg(long)]
    summary: bool,

    #[command(flatten)]
    options: GenerationOptions,
}

/// Outcome for one input image.
#[derive(Serialize)]
struct BatchEntry {
    input: PathBuf,
    scene: Option<PathBuf>,
    points: Option<usize>,
    error: Option<String>,
    processing_time_ms: u64,
}

pub async fn run(args: BatchArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = load_config(config_path)?;
    args.options.apply(&mut config);

    // Expand glob pattern
    let files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| {
            let ext = p.extension().and_then(|e| e.to_str()).unwrap_or("");
            IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
        })
        .collect();

    if files.is_empty() {
        anyhow::bail!("No matching images found for pattern: {}", args.input);
    }

    println!(
        "{} Found {} images to process",
        style("ℹ").blue(),
        files.len()
    );

    let output_dir = config.generation.output_dir.clone();
    let disparity = config.generation.disparity_factor;
    let mut pipeline = build_pipeline(config);

    let cancel = CancellationFlag::new();
    cancel_on_ctrl_c(cancel.clone());

    let multi_progress = MultiProgress::new();
    let overall_pb = multi_progress.add(ProgressBar::new(files.len() as u64));
    overall_pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} images")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );

    // One pipeline keeps the session loaded across images.
    let mut entries = Vec::with_capacity(files.len());
    for path in files {
        if cancel.is_cancelled() {
            break;
        }

        let file_start = Instant::now();
        let item_pb = multi_progress.add(progress_bar());

        let result = match fs::read(&path) {
            Ok(bytes) => {
                let request = GenerationRequest::new(bytes)
                    .with_disparity_factor(disparity)
                    .with_cancellation(cancel.clone());
                pipeline.generate(request, Some(progress_callback(&item_pb))).await
            }
            Err(e) => Err(SplatError::Io(e)),
        };
        item_pb.finish_and_clear();
        overall_pb.inc(1);

        let processing_time_ms = file_start.elapsed().as_millis() as u64;
        match result {
            Ok(generated) => entries.push(BatchEntry {
                input: path,
                scene: Some(generated.scene_path),
                points: Some(generated.point_count),
                error: None,
                processing_time_ms,
            }),
            Err(SplatError::Cancelled) => {
                warn!("Batch cancelled at {}", path.display());
                break;
            }
            Err(e) => {
                let error_msg = e.to_string();
                if !args.continue_on_error {
                    error!("Failed to process {}: {}", path.display(), error_msg);
                    anyhow::bail!("Generation failed for {}: {}", path.display(), error_msg);
                }
                warn!("Failed to process {}: {}", path.display(), error_msg);
                entries.push(BatchEntry {
                    input: path,
                    scene: None,
                    points: None,
                    error: Some(error_msg),
                    processing_time_ms,
                });
            }
        }
    }

    overall_pb.finish_with_message("Done");
    pipeline.unload();

    let succeeded = entries.iter().filter(|e| e.error.is_none()).count();
    let failed = entries.len() - succeeded;

    if args.summary {
        fs::create_dir_all(&output_dir)?;
        let summary_path = output_dir.join("summary.json");
        fs::write(&summary_path, serde_json::to_string_pretty(&entries)?)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    println!();
    println!(
        "{} {} succeeded, {} failed in {:.1}s",
        if failed == 0 {
            style("✓").green()
        } else {
            style("⚠").yellow()
        },
        succeeded,
        failed,
        start.elapsed().as_secs_f64()
    );

    for entry in entries.iter().filter(|e| e.error.is_some()) {
        println!(
            "  {} {}: {}",
            style("✗").red(),
            entry.input.display(),
            entry.error.as_deref().unwrap_or_default()
        );
    }

    if cancel.is_cancelled() {
        anyhow::bail!("Batch cancelled");
    }
    Ok(())
}
