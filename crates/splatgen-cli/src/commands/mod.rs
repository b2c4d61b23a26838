//! Subcommands and the helpers they share.

pub mod batch;
pub mod config;
pub mod generate;
pub mod inspect;
pub mod models;

use std::path::Path;
use std::sync::Arc;

use splatgen_core::{DeviceProbe, GenerationPipeline, OrtLoader, SplatConfig, SystemProbe};
use tracing::debug;

use models::RemoteModelProvider;

/// Load `path`, else the default config file when present, else defaults.
pub fn load_config(path: Option<&str>) -> anyhow::Result<SplatConfig> {
    if let Some(path) = path {
        return Ok(SplatConfig::from_file(Path::new(path))?);
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        debug!("Using config {}", default_path.display());
        Ok(SplatConfig::from_file(&default_path)?)
    } else {
        Ok(SplatConfig::default())
    }
}

/// Probe for the configured device class.
pub fn system_probe(config: &SplatConfig) -> Arc<dyn DeviceProbe> {
    Arc::new(SystemProbe::new(config.device_class()))
}

/// Pipeline running ONNX Runtime over the configured model cache.
pub fn build_pipeline(config: SplatConfig) -> GenerationPipeline<RemoteModelProvider> {
    let probe = system_probe(&config);
    let provider = RemoteModelProvider::from_config(&config, Arc::clone(&probe));

    GenerationPipeline::builder(provider, Arc::new(OrtLoader))
        .with_probe(probe)
        .with_config(config)
        .build()
}

pub fn format_size(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.1}GB", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:.1}MB", bytes as f64 / 1_000_000.0)
    } else if bytes >= 1_000 {
        format!("{:.1}KB", bytes as f64 / 1_000.0)
    } else {
        format!("{}B", bytes)
    }
}
