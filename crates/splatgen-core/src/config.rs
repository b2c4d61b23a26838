//! Configuration structures for the generation pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::device::{DeviceClass, OutputQuality, GIB};
use crate::fallback::ComputeMode;

/// Main configuration for splatgen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SplatConfig {
    /// Model resource configuration.
    pub model: ModelConfig,

    /// Generation configuration.
    pub generation: GenerationConfig,

    /// Device gating configuration.
    pub device: DeviceConfig,
}

/// Where the model lives and where it can be fetched from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory holding the cached model.
    pub model_dir: PathBuf,

    /// Model file name inside `model_dir`.
    pub model_file: String,

    /// Local file to import into the cache when the cache is empty.
    pub source_path: Option<PathBuf>,

    /// Remote URL to download the model from when the cache is empty.
    pub url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            model_file: "sharp.onnx".to_string(),
            source_path: None,
            url: None,
        }
    }
}

/// Scene generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Directory generated scenes are written to.
    pub output_dir: PathBuf,

    /// Points per streamed batch.
    pub batch_size: usize,

    /// Disparity factor fed to models that declare one.
    pub disparity_factor: f32,

    /// Execution backend selection.
    pub compute: ComputeMode,

    /// Output point budget.
    pub quality: OutputQuality,

    /// Hard cap on written points, applied on top of `quality`.
    pub max_output_points: Option<usize>,

    /// Write binary little-endian PLY (ASCII otherwise).
    pub binary: bool,

    /// Input edge length used when the model does not declare one.
    pub default_input_size: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("scenes"),
            batch_size: 2048,
            disparity_factor: 1.0,
            compute: ComputeMode::Auto,
            quality: OutputQuality::Balanced,
            max_output_points: None,
            binary: true,
            default_input_size: 1536,
        }
    }
}

/// Host capability thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device class override (detected from the target OS when unset).
    pub class: Option<DeviceClass>,

    /// Physical memory required for local generation on constrained devices.
    pub memory_threshold_bytes: u64,

    /// Free disk space required before provisioning the model.
    pub disk_threshold_bytes: u64,

    /// Run even when the memory gate fails.
    pub allow_low_memory: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            class: None,
            memory_threshold_bytes: 8 * GIB,
            disk_threshold_bytes: 6 * GIB,
            allow_low_memory: false,
        }
    }
}

impl SplatConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        std::fs::write(path, content)
    }

    /// Full path of the cached model.
    pub fn model_path(&self) -> PathBuf {
        self.model.model_dir.join(&self.model.model_file)
    }

    /// Device class from configuration, or the one the target OS implies.
    pub fn device_class(&self) -> DeviceClass {
        self.device.class.unwrap_or_else(DeviceClass::for_target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = SplatConfig::default();
        assert_eq!(config.generation.batch_size, 2048);
        assert_eq!(config.device.memory_threshold_bytes, 8 * 1024 * 1024 * 1024);
        assert_eq!(config.device.disk_threshold_bytes, 6 * 1024 * 1024 * 1024);
        assert_eq!(config.model_path(), PathBuf::from("models/sharp.onnx"));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{ "generation": { "compute": "cpu-only", "quality": "low" } }"#;
        let config: SplatConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.generation.compute, ComputeMode::CpuOnly);
        assert_eq!(config.generation.quality, OutputQuality::Low);
        assert_eq!(config.generation.batch_size, 2048);
        assert!(config.generation.binary);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = SplatConfig::default();
        config.device.class = Some(DeviceClass::MemoryConstrained);
        config.generation.max_output_points = Some(1000);
        config.save(&path).unwrap();

        let loaded = SplatConfig::from_file(&path).unwrap();
        assert_eq!(loaded.device.class, Some(DeviceClass::MemoryConstrained));
        assert_eq!(loaded.generation.max_output_points, Some(1000));
        assert_eq!(loaded.device_class(), DeviceClass::MemoryConstrained);
    }
}
