//! Models command - download and manage the generation model.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use console::style;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use splatgen_core::{
    DeviceProbe, LocalModelProvider, ModelProvider, ProgressReporter, ResourceError, SplatConfig,
};

use super::{format_size, load_config, system_probe};

/// Arguments for the models command.
#[derive(Args)]
pub struct ModelsArgs {
    #[command(subcommand)]
    command: ModelsCommand,
}

#[derive(Subcommand)]
enum ModelsCommand {
    /// Check model status
    Status,

    /// Download or import the model into the cache
    Download(DownloadArgs),

    /// Remove the cached model
    Clean,

    /// Print the cached model path
    Path,
}

#[derive(Args)]
struct DownloadArgs {
    /// URL to download from (overrides config)
    #[arg(long)]
    url: Option<String>,

    /// Local model file to import instead of downloading
    #[arg(long, conflicts_with = "url")]
    from: Option<PathBuf>,

    /// Model cache directory
    #[arg(short, long)]
    model_dir: Option<PathBuf>,

    /// Force re-download even if the model is cached
    #[arg(long)]
    force: bool,
}

/// Provider that imports a local source file or downloads from a URL.
///
/// A configured source file that exists wins over the URL.
#[derive(Clone)]
pub struct RemoteModelProvider {
    local: LocalModelProvider,
    url: Option<String>,
    client: reqwest::Client,
}

impl RemoteModelProvider {
    pub fn from_config(config: &SplatConfig, probe: Arc<dyn DeviceProbe>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("splatgen-cli/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            local: LocalModelProvider::from_config(config, probe),
            url: config.model.url.clone(),
            client,
        }
    }

    pub fn local(&self) -> &LocalModelProvider {
        &self.local
    }

    async fn download(
        &self,
        url: &str,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<PathBuf, ResourceError> {
        progress(0.0);
        self.local.prepare_cache().await?;

        info!("Downloading model from {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResourceError::Download(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ResourceError::Download(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let tmp = self.local.temp_path();
        if let Err(e) = write_body(response, &tmp, progress).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }

        let installed = self.local.install(&tmp).await?;
        progress(1.0);
        Ok(installed)
    }
}

impl ModelProvider for RemoteModelProvider {
    async fn ensure_available(
        &self,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<PathBuf, ResourceError> {
        let has_source = self.local.source().is_some_and(Path::is_file);
        match &self.url {
            Some(url) if !self.local.cached_model_exists() && !has_source => {
                self.download(url, progress).await
            }
            _ => self.local.ensure_available(progress).await,
        }
    }
}

/// Stream the response body into `tmp`, reporting up to 0.95.
async fn write_body(
    response: reqwest::Response,
    tmp: &Path,
    progress: &(dyn Fn(f64) + Send + Sync),
) -> Result<(), ResourceError> {
    let total = response.content_length().filter(|&len| len > 0);
    let mut file = tokio::fs::File::create(tmp).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ResourceError::Download(e.to_string()))?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        if let Some(total) = total {
            progress(0.95 * (downloaded as f64 / total as f64).min(1.0));
        }
    }

    file.flush().await?;
    debug!("Downloaded {} bytes to {}", downloaded, tmp.display());
    Ok(())
}

pub async fn run(args: ModelsArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    match args.command {
        ModelsCommand::Status => check_status(&config),
        ModelsCommand::Download(download_args) => download_model(download_args, config).await,
        ModelsCommand::Clean => clean_model(&config),
        ModelsCommand::Path => {
            println!("{}", config.model_path().display());
            Ok(())
        }
    }
}

fn check_status(config: &SplatConfig) -> anyhow::Result<()> {
    let path = config.model_path();

    println!("{}", style("Model Status").bold());
    println!("Cache directory: {}", config.model.model_dir.display());

    if path.is_file() {
        let size = fs::metadata(&path)?.len();
        println!(
            "    {} {:<25} {:>10}",
            style("✓").green(),
            config.model.model_file,
            format_size(size)
        );
    } else {
        println!(
            "    {} {:<25} {:>10}",
            style("✗").red(),
            config.model.model_file,
            "missing"
        );
        match (&config.model.source_path, &config.model.url) {
            (Some(source), _) => println!("    Will import from {}", source.display()),
            (None, Some(url)) => println!("    Will download from {}", url),
            (None, None) => println!(
                "    {} Run 'splatgen models download --url <URL>' or set model.url",
                style("⚠").yellow()
            ),
        }
    }

    Ok(())
}

async fn download_model(args: DownloadArgs, mut config: SplatConfig) -> anyhow::Result<()> {
    if let Some(dir) = args.model_dir {
        config.model.model_dir = dir;
    }
    if let Some(url) = args.url {
        config.model.url = Some(url);
        config.model.source_path = None;
    }
    if let Some(from) = args.from {
        if !from.is_file() {
            anyhow::bail!("Model file not found: {}", from.display());
        }
        config.model.source_path = Some(from);
    }
    if config.model.url.is_none() && config.model.source_path.is_none() {
        anyhow::bail!("No model source configured. Pass --url or --from, or set model.url.");
    }

    let provider = RemoteModelProvider::from_config(&config, system_probe(&config));
    if args.force {
        provider.local().delete_cached()?;
    } else if provider.local().cached_model_exists() {
        println!(
            "{} Model already cached at {}",
            style("✓").green(),
            provider.local().model_path().display()
        );
        return Ok(());
    }

    println!(
        "{} Fetching model into {}",
        style("ℹ").blue(),
        config.model.model_dir.display()
    );

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.green} [{bar:25.cyan/blue}] {percent:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );

    let bar = pb.clone();
    let reporter = ProgressReporter::new(Some(Arc::new(move |value: f64| {
        bar.set_position((value * 100.0).round() as u64);
    })));
    let report = |value: f64| reporter.report(value);

    match provider.ensure_available(&report).await {
        Ok(path) => {
            pb.finish_and_clear();
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            println!(
                "{} Model ready at {} ({})",
                style("✓").green(),
                path.display(),
                format_size(size)
            );
            Ok(())
        }
        Err(e) => {
            pb.abandon();
            Err(e.into())
        }
    }
}

fn clean_model(config: &SplatConfig) -> anyhow::Result<()> {
    let path = config.model_path();
    let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

    let provider = LocalModelProvider::from_config(config, system_probe(config));
    let existed = provider.cached_model_exists();
    provider.delete_cached()?;

    // Also remove any interrupted downloads
    let tmp = provider.temp_path();
    if tmp.exists() {
        fs::remove_file(&tmp)?;
    }

    if existed {
        println!(
            "{} Removed {}, freed {}",
            style("✓").green(),
            path.display(),
            format_size(size)
        );
    } else {
        println!("{} No cached model to remove.", style("ℹ").blue());
    }

    Ok(())
}
