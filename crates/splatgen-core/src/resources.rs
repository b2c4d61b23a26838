//! Model provisioning.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::SplatConfig;
use crate::device::DeviceProbe;
use crate::error::ResourceError;

/// Makes the model available on local disk.
pub trait ModelProvider: Send + Sync {
    /// Return the local model path, provisioning it first if needed.
    ///
    /// `progress` receives values in `[0, 1]`.
    fn ensure_available(
        &self,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> impl Future<Output = Result<PathBuf, ResourceError>> + Send;
}

/// Fail when the volume holding `path` has less than `required` free bytes.
///
/// Volumes whose free space cannot be determined pass.
pub fn ensure_disk_space(
    probe: &dyn DeviceProbe,
    path: &Path,
    required: u64,
) -> Result<(), ResourceError> {
    match probe.available_disk_space(path) {
        Some(available) if available < required => {
            Err(ResourceError::InsufficientDiskSpace {
                required,
                available,
            })
        }
        Some(available) => {
            debug!("{} bytes free at {}", available, path.display());
            Ok(())
        }
        None => {
            debug!("Free space at {} unknown, skipping check", path.display());
            Ok(())
        }
    }
}

/// Keeps the model in a cache directory, importing it from a local file.
#[derive(Clone)]
pub struct LocalModelProvider {
    cache_dir: PathBuf,
    model_file: String,
    source: Option<PathBuf>,
    disk_threshold: u64,
    probe: Arc<dyn DeviceProbe>,
}

impl LocalModelProvider {
    pub fn new(cache_dir: impl Into<PathBuf>, model_file: impl Into<String>, probe: Arc<dyn DeviceProbe>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            model_file: model_file.into(),
            source: None,
            disk_threshold: 0,
            probe,
        }
    }

    /// Build from configuration.
    pub fn from_config(config: &SplatConfig, probe: Arc<dyn DeviceProbe>) -> Self {
        let mut provider = Self::new(&config.model.model_dir, &config.model.model_file, probe)
            .with_disk_threshold(config.device.disk_threshold_bytes);
        if let Some(source) = &config.model.source_path {
            provider = provider.with_source(source);
        }
        provider
    }

    /// File to import when the cache is empty.
    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Free bytes required before importing.
    pub fn with_disk_threshold(mut self, bytes: u64) -> Self {
        self.disk_threshold = bytes;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Configured import source, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Path of the cached model.
    pub fn model_path(&self) -> PathBuf {
        self.cache_dir.join(&self.model_file)
    }

    pub fn cached_model_exists(&self) -> bool {
        self.model_path().is_file()
    }

    /// Remove the cached model. Missing files are not an error.
    pub fn delete_cached(&self) -> Result<(), ResourceError> {
        let path = self.model_path();
        if path.exists() {
            std::fs::remove_file(&path)?;
            info!("Removed cached model {}", path.display());
        }
        Ok(())
    }

    /// Create the cache directory after checking free space.
    pub async fn prepare_cache(&self) -> Result<(), ResourceError> {
        ensure_disk_space(self.probe.as_ref(), &self.cache_dir, self.disk_threshold)?;
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|_| ResourceError::CannotCreateCacheDirectory(self.cache_dir.clone()))
    }

    /// Move a fully written temporary file into the cache slot.
    pub async fn install(&self, tmp: &Path) -> Result<PathBuf, ResourceError> {
        let target = self.model_path();
        tokio::fs::rename(tmp, &target).await?;
        info!("Model installed at {}", target.display());
        Ok(target)
    }

    /// Temporary path used while a model is being written.
    pub fn temp_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{}.tmp", self.model_file))
    }
}

impl ModelProvider for LocalModelProvider {
    async fn ensure_available(
        &self,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<PathBuf, ResourceError> {
        let target = self.model_path();
        if target.is_file() {
            debug!("Using cached model {}", target.display());
            progress(1.0);
            return Ok(target);
        }

        progress(0.0);
        let source = self
            .source
            .as_ref()
            .filter(|s| s.is_file())
            .ok_or_else(|| ResourceError::MissingResource(target.clone()))?;

        self.prepare_cache().await?;
        progress(0.2);

        info!("Importing model from {}", source.display());
        let tmp = self.temp_path();
        if let Err(e) = tokio::fs::copy(source, &tmp).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        progress(0.85);

        let installed = self.install(&tmp).await?;
        progress(1.0);
        Ok(installed)
    }
}
