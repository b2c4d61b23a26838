//! End-to-end generation: image bytes in, splat scene file out.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use splatgen_inference::{BackendPreference, InferenceError, NamedInputs, NamedOutputs, SessionLoader};
use tokio::task::{spawn_blocking, JoinError};
use tracing::{debug, info, warn};

use crate::config::SplatConfig;
use crate::device::{check_memory, point_cap, strided_index, DeviceProbe, SystemProbe};
use crate::error::{Result, SplatError};
use crate::fallback::BackendFallbackController;
use crate::preprocessing::ImagePreprocessor;
use crate::progress::{CancellationFlag, ProgressCallback, ProgressReporter};
use crate::resources::ModelProvider;
use crate::scene::{PlyWriter, PointAssembler, SampleExtractor, SceneSink};
use crate::schema::{infer_input_size, SchemaResolver, SemanticSchema};

/// Progress once the model is available.
const PROVISIONED: f64 = 0.20;
/// Progress once inputs are built.
const INPUTS_READY: f64 = 0.25;
/// Progress once prediction finished; streaming covers the rest.
const PREDICTED: f64 = 0.35;

/// One generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Encoded source image (PNG, JPEG, ...).
    pub image_bytes: Vec<u8>,
    pub disparity_factor: f32,
    /// Run even when the memory gate fails.
    pub allow_low_memory_override: bool,
    /// Overrides the configured point cap.
    pub max_output_points: Option<usize>,
    pub cancel: CancellationFlag,
}

impl GenerationRequest {
    pub fn new(image_bytes: Vec<u8>) -> Self {
        Self {
            image_bytes,
            disparity_factor: 1.0,
            allow_low_memory_override: false,
            max_output_points: None,
            cancel: CancellationFlag::new(),
        }
    }

    pub fn with_disparity_factor(mut self, factor: f32) -> Self {
        self.disparity_factor = factor;
        self
    }

    pub fn with_low_memory_override(mut self, allow: bool) -> Self {
        self.allow_low_memory_override = allow;
        self
    }

    pub fn with_max_output_points(mut self, max: Option<usize>) -> Self {
        self.max_output_points = max;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Outcome of a successful generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub scene_path: PathBuf,
    /// Points written to the scene.
    pub point_count: usize,
    /// Points the model produced before any cap.
    pub source_point_count: usize,
    pub backend: Option<BackendPreference>,
    pub elapsed_ms: u64,
}

/// How points are streamed into a sink.
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub batch_size: usize,
    pub binary: bool,
    pub sh_degree: u8,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            batch_size: 2048,
            binary: true,
            sh_degree: 0,
        }
    }
}

/// Stream `kept` points from `extractor` into `sink` in batches.
///
/// When `kept` is below the extractor's point count, points are picked by
/// uniform stride. Progress runs from 0.35 to 1.0; 1.0 is reported only after
/// the sink closed. Cancellation is checked before every batch.
pub fn stream_scene(
    extractor: &SampleExtractor<'_>,
    assembler: &PointAssembler,
    sink: &mut dyn SceneSink,
    kept: usize,
    options: StreamOptions,
    reporter: &ProgressReporter,
    cancel: &CancellationFlag,
) -> Result<usize> {
    let total = extractor.point_count();
    let kept = kept.min(total);
    let batch_size = options.batch_size.max(1);

    sink.start(options.sh_degree, options.binary, kept)?;

    let mut written = 0;
    while written < kept {
        if cancel.is_cancelled() {
            return Err(SplatError::Cancelled);
        }

        let end = (written + batch_size).min(kept);
        let mut batch = Vec::with_capacity(end - written);
        for i in written..end {
            let sample = extractor.extract(strided_index(i, total, kept))?;
            batch.push(assembler.assemble(&sample));
        }
        sink.write(batch)?;
        written = end;

        if written < kept {
            reporter.report_within(PREDICTED, 1.0, written as f64 / kept as f64);
        }
    }

    sink.close()?;
    reporter.report(1.0);
    Ok(written)
}

/// Builder for [`GenerationPipeline`].
pub struct GenerationPipelineBuilder<P: ModelProvider> {
    provider: P,
    loader: Arc<dyn SessionLoader>,
    probe: Option<Arc<dyn DeviceProbe>>,
    preprocessor: ImagePreprocessor,
    config: SplatConfig,
}

impl<P: ModelProvider> GenerationPipelineBuilder<P> {
    /// Set the device probe. Defaults to [`SystemProbe`].
    pub fn with_probe(mut self, probe: Arc<dyn DeviceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Set the image preprocessor.
    pub fn with_preprocessor(mut self, preprocessor: ImagePreprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    /// Set configuration.
    pub fn with_config(mut self, config: SplatConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> GenerationPipeline<P> {
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(SystemProbe::new(self.config.device_class())));

        GenerationPipeline {
            provider: self.provider,
            controller: BackendFallbackController::new(self.loader),
            probe,
            resolver: SchemaResolver::new(),
            assembler: PointAssembler::new(),
            preprocessor: self.preprocessor,
            config: self.config,
            sequence: 0,
        }
    }
}

/// Runs generations one at a time, keeping the loaded session between them.
pub struct GenerationPipeline<P: ModelProvider> {
    provider: P,
    controller: BackendFallbackController,
    probe: Arc<dyn DeviceProbe>,
    resolver: SchemaResolver,
    assembler: PointAssembler,
    preprocessor: ImagePreprocessor,
    config: SplatConfig,
    sequence: u64,
}

impl<P: ModelProvider> GenerationPipeline<P> {
    /// Create a builder.
    pub fn builder(provider: P, loader: Arc<dyn SessionLoader>) -> GenerationPipelineBuilder<P> {
        GenerationPipelineBuilder {
            provider,
            loader,
            probe: None,
            preprocessor: ImagePreprocessor::new(),
            config: SplatConfig::default(),
        }
    }

    pub fn config(&self) -> &SplatConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn controller(&self) -> &BackendFallbackController {
        &self.controller
    }

    /// Release the loaded session.
    pub fn unload(&mut self) {
        self.controller.unload();
    }

    /// Generate a scene file for `request`.
    pub async fn generate(
        &mut self,
        request: GenerationRequest,
        progress: Option<ProgressCallback>,
    ) -> Result<GenerationResult> {
        let start = Instant::now();
        let reporter = ProgressReporter::new(progress);
        let GenerationRequest {
            image_bytes,
            disparity_factor,
            allow_low_memory_override,
            max_output_points,
            cancel,
        } = request;

        let class = self.probe.device_class();
        let memory = self.probe.physical_memory();
        check_memory(
            class,
            memory,
            self.config.device.memory_threshold_bytes,
            allow_low_memory_override || self.config.device.allow_low_memory,
        )?;

        let model_path = self
            .provider
            .ensure_available(&|p| reporter.report_within(0.0, PROVISIONED, p))
            .await?;
        reporter.report(PROVISIONED);
        self.check_cancelled(&cancel)?;

        let candidates = self.config.generation.compute.candidates(class);
        let (first, schema) = self.load_schema(&model_path, &candidates).await?;

        let fallback = self.config.generation.default_input_size;
        let size = infer_input_size(&schema.image_input).unwrap_or((fallback, fallback));
        let inputs = self
            .build_inputs(schema, image_bytes, size, disparity_factor)
            .await?;
        reporter.report(INPUTS_READY);
        self.check_cancelled(&cancel)?;

        let outputs = self
            .controller
            .predict(&model_path, &candidates[first..], Arc::new(inputs))
            .await?;
        let schema = self.resolve_loaded()?;
        reporter.report(PREDICTED);
        self.check_cancelled(&cancel)?;

        let cap = point_cap(
            class,
            self.config.generation.quality,
            memory,
            max_output_points.or(self.config.generation.max_output_points),
        );
        let scene_path = self.next_scene_path()?;
        let options = StreamOptions {
            batch_size: self.config.generation.batch_size,
            binary: self.config.generation.binary,
            sh_degree: 0,
        };

        let job = SceneJob {
            path: scene_path.clone(),
            schema,
            outputs,
            cap,
            options,
            assembler: self.assembler,
        };
        let written = spawn_blocking(move || job.run(&reporter, &cancel))
            .await
            .map_err(worker_failed)?;

        let (point_count, source_point_count) = match written {
            Ok(counts) => counts,
            Err(SplatError::Cancelled) => {
                info!("Generation cancelled, releasing session");
                self.controller.unload();
                return Err(SplatError::Cancelled);
            }
            Err(e) => return Err(e),
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            "Wrote {} points to {} in {}ms",
            point_count,
            scene_path.display(),
            elapsed_ms
        );

        Ok(GenerationResult {
            scene_path,
            point_count,
            source_point_count,
            backend: self.controller.loaded_backend(),
            elapsed_ms,
        })
    }

    fn check_cancelled(&mut self, cancel: &CancellationFlag) -> Result<()> {
        if cancel.is_cancelled() {
            info!("Generation cancelled, releasing session");
            self.controller.unload();
            return Err(SplatError::Cancelled);
        }
        Ok(())
    }

    /// Load the first candidate that loads and resolve its schema.
    ///
    /// A session already loaded for one of the candidates is kept, so a
    /// backend that needed a fallback is not retried on every request.
    async fn load_schema(
        &mut self,
        model_path: &Path,
        candidates: &[BackendPreference],
    ) -> Result<(usize, SemanticSchema)> {
        let start = self
            .controller
            .loaded_backend()
            .and_then(|loaded| candidates.iter().position(|&c| c == loaded))
            .unwrap_or(0);

        let mut attempts = Vec::new();
        let mut last_error = InferenceError::NoBackendCandidates;

        for (index, &backend) in candidates.iter().enumerate().skip(start) {
            attempts.push(backend);
            match self.controller.ensure_loaded(model_path, backend).await {
                Ok(session) => {
                    let schema = self.resolver.resolve(session.inputs(), session.outputs())?;
                    return Ok((index, schema));
                }
                Err(e) => {
                    warn!("Could not load model with {}: {}", backend, e);
                    last_error = e;
                }
            }
        }

        Err(SplatError::PredictionFailed {
            attempts,
            source: last_error,
        })
    }

    /// Schema of the session that produced the last prediction.
    fn resolve_loaded(&self) -> Result<SemanticSchema> {
        let session = self.controller.session().ok_or_else(|| {
            InferenceError::SessionCreate("no session after prediction".into())
        })?;
        Ok(self.resolver.resolve(session.inputs(), session.outputs())?)
    }

    async fn build_inputs(
        &self,
        schema: SemanticSchema,
        image_bytes: Vec<u8>,
        size: (u32, u32),
        disparity_factor: f32,
    ) -> Result<NamedInputs> {
        let preprocessor = self.preprocessor;
        spawn_blocking(move || {
            preprocessor.build_inputs(&schema, &image_bytes, size, disparity_factor)
        })
        .await
        .map_err(worker_failed)?
    }

    /// Fresh scene path inside the output directory.
    fn next_scene_path(&mut self) -> Result<PathBuf> {
        let dir = &self.config.generation.output_dir;
        std::fs::create_dir_all(dir)?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        loop {
            self.sequence += 1;
            let path = dir.join(format!("scene-{stamp}-{:04}.ply", self.sequence));
            if !path.exists() {
                return Ok(path);
            }
        }
    }
}

/// Everything the blocking scene writer needs.
struct SceneJob {
    path: PathBuf,
    schema: SemanticSchema,
    outputs: NamedOutputs,
    cap: Option<usize>,
    options: StreamOptions,
    assembler: PointAssembler,
}

impl SceneJob {
    /// Write the scene, returning (written, produced) point counts.
    ///
    /// The file is removed on any failure after it was created.
    fn run(self, reporter: &ProgressReporter, cancel: &CancellationFlag) -> Result<(usize, usize)> {
        let extractor = SampleExtractor::bind(&self.schema, &self.outputs)?;
        let total = extractor.point_count();
        let kept = self.cap.map_or(total, |cap| cap.min(total));
        if kept < total {
            info!("Keeping {} of {} points", kept, total);
        }

        let mut writer = PlyWriter::create(&self.path)?;
        let result = stream_scene(
            &extractor,
            &self.assembler,
            &mut writer,
            kept,
            self.options,
            reporter,
            cancel,
        );
        drop(writer);

        match result {
            Ok(written) => Ok((written, total)),
            Err(e) => {
                debug!("Removing partial scene {}", self.path.display());
                if let Err(remove) = std::fs::remove_file(&self.path) {
                    warn!("Could not remove {}: {}", self.path.display(), remove);
                }
                Err(e)
            }
        }
    }
}

fn worker_failed(e: JoinError) -> SplatError {
    SplatError::Io(std::io::Error::other(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceClass, GIB};
    use crate::error::ResourceError;
    use crate::scene::{ScenePoint, SplatMetadata};
    use crate::testing::{canonical_descriptors, canonical_outputs, Outcome, ScriptedLoader, INPUT_SIZE};
    use image::{DynamicImage, ImageFormat, RgbImage};
    use pretty_assertions::assert_eq;
    use splatgen_inference::{FeatureDescriptor, FeatureKind};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use BackendPreference::{AllAvailable, CpuOnly};

    struct FixedProbe {
        class: DeviceClass,
        memory: u64,
    }

    impl DeviceProbe for FixedProbe {
        fn physical_memory(&self) -> u64 {
            self.memory
        }

        fn available_disk_space(&self, _path: &Path) -> Option<u64> {
            None
        }

        fn device_class(&self) -> DeviceClass {
            self.class
        }
    }

    struct StaticProvider {
        path: PathBuf,
        calls: AtomicUsize,
    }

    impl ModelProvider for StaticProvider {
        async fn ensure_available(
            &self,
            progress: &(dyn Fn(f64) + Send + Sync),
        ) -> std::result::Result<PathBuf, ResourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            progress(0.5);
            progress(1.0);
            Ok(self.path.clone())
        }
    }

    fn png() -> Vec<u8> {
        let img = RgbImage::from_fn(16, 12, |x, y| image::Rgb([(x * 10) as u8, (y * 10) as u8, 128]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn pipeline(
        loader: Arc<ScriptedLoader>,
        output_dir: &Path,
        class: DeviceClass,
        memory: u64,
    ) -> GenerationPipeline<StaticProvider> {
        let mut config = SplatConfig::default();
        config.generation.output_dir = output_dir.to_path_buf();

        let provider = StaticProvider {
            path: PathBuf::from("model.onnx"),
            calls: AtomicUsize::new(0),
        };
        GenerationPipeline::builder(provider, loader)
            .with_probe(Arc::new(FixedProbe { class, memory }))
            .with_config(config)
            .build()
    }

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<f64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (Arc::new(move |v| sink.lock().unwrap().push(v)), seen)
    }

    fn scenes_in(dir: &Path) -> Vec<PathBuf> {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_generate_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let loader = Arc::new(ScriptedLoader::new(10));
        let mut pipeline = pipeline(loader.clone(), dir.path(), DeviceClass::Desktop, 16 * GIB);
        let (callback, seen) = recorder();

        let result = pipeline
            .generate(GenerationRequest::new(png()), Some(callback))
            .await
            .unwrap();

        assert_eq!(result.point_count, 10);
        assert_eq!(result.source_point_count, 10);
        assert_eq!(result.backend, Some(AllAvailable));
        assert!(result.scene_path.starts_with(dir.path()));
        let name = result.scene_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("scene-") && name.ends_with(".ply"));

        let metadata = SplatMetadata::read(&result.scene_path, 100).unwrap();
        assert_eq!(metadata.vertex_count, 10);
        assert_eq!(metadata.sampled_mean_z, Some(-1.0));

        assert_eq!(
            loader.seen_inputs(),
            vec![
                ("image".to_string(), vec![1, 3, INPUT_SIZE, INPUT_SIZE]),
                ("disparity_factor".to_string(), vec![1]),
            ]
        );

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.contains(&0.1));
        assert!(seen.contains(&INPUTS_READY));
        assert!(seen.contains(&PREDICTED));
        assert_eq!(seen.last(), Some(&1.0));
    }

    struct RecordingSink {
        reporter: ProgressReporter,
        batches: Vec<usize>,
        progress_at_write: Vec<f64>,
        progress_at_close: Option<f64>,
        started: Option<(u8, bool, usize)>,
    }

    impl SceneSink for RecordingSink {
        fn start(
            &mut self,
            sh_degree: u8,
            binary: bool,
            expected_points: usize,
        ) -> std::result::Result<(), crate::error::SceneWriteError> {
            self.started = Some((sh_degree, binary, expected_points));
            Ok(())
        }

        fn write(&mut self, batch: Vec<ScenePoint>) -> std::result::Result<(), crate::error::SceneWriteError> {
            self.batches.push(batch.len());
            self.progress_at_write.push(self.reporter.last());
            Ok(())
        }

        fn close(&mut self) -> std::result::Result<(), crate::error::SceneWriteError> {
            self.progress_at_close = Some(self.reporter.last());
            Ok(())
        }
    }

    #[test]
    fn test_stream_batches_and_progress() {
        let outputs = canonical_outputs(5000);
        let schema = SchemaResolver::new()
            .resolve(
                &[FeatureDescriptor::scalar("image", FeatureKind::MultiArray)],
                &canonical_descriptors(5000),
            )
            .unwrap();
        let extractor = SampleExtractor::bind(&schema, &outputs).unwrap();

        let reporter = ProgressReporter::new(None);
        reporter.report(PREDICTED);
        let mut sink = RecordingSink {
            reporter: reporter.clone(),
            batches: Vec::new(),
            progress_at_write: Vec::new(),
            progress_at_close: None,
            started: None,
        };

        let written = stream_scene(
            &extractor,
            &PointAssembler::new(),
            &mut sink,
            5000,
            StreamOptions::default(),
            &reporter,
            &CancellationFlag::new(),
        )
        .unwrap();

        assert_eq!(written, 5000);
        assert_eq!(sink.started, Some((0, true, 5000)));
        assert_eq!(sink.batches, vec![2048, 2048, 904]);

        let after_first = 0.35 + 0.65 * 2048.0 / 5000.0;
        let after_second = 0.35 + 0.65 * 4096.0 / 5000.0;
        let at_write = &sink.progress_at_write;
        assert_eq!(at_write[0], PREDICTED);
        assert!((at_write[1] - after_first).abs() < 1e-9);
        assert!((at_write[2] - after_second).abs() < 1e-9);

        let at_close = sink.progress_at_close.unwrap();
        assert!(at_close < 1.0);
        assert!((at_close - after_second).abs() < 1e-9);
        assert_eq!(reporter.last(), 1.0);
    }

    #[test]
    fn test_stream_subsamples_in_order() {
        let outputs = canonical_outputs(10);
        let schema = SchemaResolver::new()
            .resolve(
                &[FeatureDescriptor::scalar("image", FeatureKind::MultiArray)],
                &canonical_descriptors(10),
            )
            .unwrap();
        let extractor = SampleExtractor::bind(&schema, &outputs).unwrap();

        struct Collect(Vec<ScenePoint>);
        impl SceneSink for Collect {
            fn start(&mut self, _: u8, _: bool, _: usize) -> std::result::Result<(), crate::error::SceneWriteError> {
                Ok(())
            }
            fn write(&mut self, batch: Vec<ScenePoint>) -> std::result::Result<(), crate::error::SceneWriteError> {
                self.0.extend(batch);
                Ok(())
            }
            fn close(&mut self) -> std::result::Result<(), crate::error::SceneWriteError> {
                Ok(())
            }
        }

        let mut sink = Collect(Vec::new());
        let options = StreamOptions {
            batch_size: 3,
            ..StreamOptions::default()
        };
        stream_scene(
            &extractor,
            &PointAssembler::new(),
            &mut sink,
            4,
            options,
            &ProgressReporter::default(),
            &CancellationFlag::new(),
        )
        .unwrap();

        let xs: Vec<f32> = sink.0.iter().map(|p| p.position[0]).collect();
        assert_eq!(xs, vec![0.0, 2.0, 5.0, 7.0]);
    }

    #[tokio::test]
    async fn test_memory_gate_runs_before_provisioning() {
        let dir = tempfile::tempdir().unwrap();
        let loader = Arc::new(ScriptedLoader::new(4));
        let mut pipeline = pipeline(loader.clone(), dir.path(), DeviceClass::MemoryConstrained, 6 * GIB);

        let err = pipeline
            .generate(GenerationRequest::new(png()), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SplatError::InsufficientDeviceMemory {
                required,
                available
            } if required == 8 * GIB && available == 6 * GIB
        ));
        assert_eq!(pipeline.provider().calls.load(Ordering::SeqCst), 0);
        assert!(loader.loads().is_empty());

        let result = pipeline
            .generate(GenerationRequest::new(png()).with_low_memory_override(true), None)
            .await
            .unwrap();
        assert_eq!(result.point_count, 4);
    }

    #[tokio::test]
    async fn test_cancellation_removes_partial_scene() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("scenes");
        let loader = Arc::new(ScriptedLoader::new(5000));
        let mut pipeline = pipeline(loader.clone(), &out, DeviceClass::Desktop, 16 * GIB);

        let cancel = CancellationFlag::new();
        let trigger = cancel.clone();
        let callback: ProgressCallback = Arc::new(move |v| {
            if v > PREDICTED {
                trigger.cancel();
            }
        });

        let err = pipeline
            .generate(GenerationRequest::new(png()).with_cancellation(cancel), Some(callback))
            .await
            .unwrap_err();

        assert!(matches!(err, SplatError::Cancelled));
        assert!(scenes_in(&out).is_empty());
        assert!(pipeline.controller().session().is_none());
        assert_eq!(loader.dropped(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let loader = Arc::new(ScriptedLoader::new(4));
        let mut pipeline = pipeline(loader.clone(), dir.path(), DeviceClass::Desktop, 16 * GIB);

        let cancel = CancellationFlag::new();
        cancel.cancel();
        let err = pipeline
            .generate(GenerationRequest::new(png()).with_cancellation(cancel), None)
            .await
            .unwrap_err();

        assert!(matches!(err, SplatError::Cancelled));
        assert!(loader.predictions().is_empty());
        assert!(scenes_in(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_fallback_backend_kept_between_requests() {
        let dir = tempfile::tempdir().unwrap();
        let loader = Arc::new(ScriptedLoader::new(6).with(AllAvailable, Outcome::FailPredict));
        let mut pipeline = pipeline(loader.clone(), dir.path(), DeviceClass::Desktop, 16 * GIB);

        let first = pipeline.generate(GenerationRequest::new(png()), None).await.unwrap();
        assert_eq!(first.backend, Some(CpuOnly));
        assert_eq!(loader.predictions(), vec![AllAvailable, CpuOnly]);

        let second = pipeline.generate(GenerationRequest::new(png()), None).await.unwrap();
        assert_eq!(second.point_count, 6);
        assert_ne!(first.scene_path, second.scene_path);
        assert_eq!(loader.loads(), vec![AllAvailable, CpuOnly]);
        assert_eq!(loader.predictions(), vec![AllAvailable, CpuOnly, CpuOnly]);

        pipeline.unload();
        assert!(pipeline.controller().session().is_none());
    }

    #[tokio::test]
    async fn test_load_failure_moves_to_next_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let loader = Arc::new(ScriptedLoader::new(3).with(AllAvailable, Outcome::FailLoad));
        let mut pipeline = pipeline(loader.clone(), dir.path(), DeviceClass::Desktop, 16 * GIB);

        let result = pipeline.generate(GenerationRequest::new(png()), None).await.unwrap();
        assert_eq!(result.backend, Some(CpuOnly));
        assert_eq!(loader.loads(), vec![AllAvailable, CpuOnly]);
    }

    #[tokio::test]
    async fn test_point_cap_from_request() {
        let dir = tempfile::tempdir().unwrap();
        let loader = Arc::new(ScriptedLoader::new(10));
        let mut pipeline = pipeline(loader, dir.path(), DeviceClass::Desktop, 16 * GIB);

        let result = pipeline
            .generate(GenerationRequest::new(png()).with_max_output_points(Some(4)), None)
            .await
            .unwrap();
        assert_eq!(result.point_count, 4);
        assert_eq!(result.source_point_count, 10);
        assert_eq!(SplatMetadata::read(&result.scene_path, 10).unwrap().vertex_count, 4);
    }

    #[tokio::test]
    async fn test_unsupported_image_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let loader = Arc::new(ScriptedLoader::new(4));
        let mut pipeline = pipeline(loader.clone(), dir.path(), DeviceClass::Desktop, 16 * GIB);

        let err = pipeline
            .generate(GenerationRequest::new(b"definitely not a png".to_vec()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SplatError::UnsupportedImage(_)));
        assert!(loader.predictions().is_empty());
        assert!(scenes_in(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_image_kind_input_gets_nhwc_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let loader = Arc::new(ScriptedLoader::new(3).with_inputs(vec![
            FeatureDescriptor {
                name: "photo".into(),
                kind: FeatureKind::Image { width: 6, height: 4 },
                shape: None,
                dtype: None,
            },
            FeatureDescriptor::scalar("disparity_scale", FeatureKind::Int64),
        ]));

        let mut config = SplatConfig::default();
        config.generation.output_dir = dir.path().to_path_buf();
        let provider = StaticProvider {
            path: PathBuf::from("model.onnx"),
            calls: AtomicUsize::new(0),
        };
        let mut pipeline = GenerationPipeline::builder(provider, loader.clone())
            .with_probe(Arc::new(FixedProbe {
                class: DeviceClass::Desktop,
                memory: 16 * GIB,
            }))
            .with_preprocessor(ImagePreprocessor::new().with_filter(image::imageops::FilterType::Nearest))
            .with_config(config)
            .build();

        let result = pipeline.generate(GenerationRequest::new(png()), None).await.unwrap();

        assert_eq!(result.point_count, 3);
        assert_eq!(
            loader.seen_inputs(),
            vec![
                ("photo".to_string(), vec![1, 4, 6, 3]),
                ("disparity_scale".to_string(), vec![1]),
            ]
        );
    }
}
