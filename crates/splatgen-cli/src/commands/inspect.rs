//! Inspect command - print metadata of a scene file.

use std::path::PathBuf;

use clap::Args;
use console::style;

use splatgen_core::scene::metadata::DEFAULT_SAMPLE_COUNT;
use splatgen_core::scene::ForwardAxis;
use splatgen_core::SplatMetadata;

/// Arguments for the inspect command.
#[derive(Args)]
pub struct InspectArgs {
    /// Scene file (.ply)
    #[arg(required = true)]
    input: PathBuf,

    /// Vertices averaged for the forward-axis hint
    #[arg(long, default_value_t = DEFAULT_SAMPLE_COUNT)]
    samples: usize,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

pub fn run(args: InspectArgs) -> anyhow::Result<()> {
    if !args.input.exists() {
        anyhow::bail!("Scene file not found: {}", args.input.display());
    }

    let metadata = SplatMetadata::read(&args.input, args.samples)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    println!("{}", style(args.input.display()).bold());
    println!("  Format:      {:?}", metadata.format);
    println!("  Points:      {}", metadata.vertex_count);
    println!("  Properties:  {}", metadata.vertex_properties.join(" "));

    match metadata.sampled_mean_z {
        Some(z) => println!("  Mean z:      {:.4}", z),
        None => println!("  Mean z:      -"),
    }
    let axis = match metadata.forward_axis {
        ForwardAxis::PositiveZ => "+Z",
        ForwardAxis::NegativeZ => "-Z",
        ForwardAxis::Unknown => "unknown",
    };
    println!("  Forward:     {}", axis);

    let camera = &metadata.camera;
    if let Some([w, h]) = camera.image_size {
        println!("  Image size:  {}x{}", w, h);
    }
    if let Some(k) = camera.intrinsic {
        println!("  Intrinsic:   fx={:.2} fy={:.2} cx={:.2} cy={:.2}", k[0], k[4], k[2], k[5]);
    }
    if camera.extrinsic.is_some() {
        println!("  Extrinsic:   present");
    }

    Ok(())
}
