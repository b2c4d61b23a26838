//! Core library for single-image Gaussian splat generation.
//!
//! This crate provides:
//! - Stride-aware tensor views over float16/32/64 model outputs
//! - Schema resolution from a model's declared features to splat roles
//! - Backend fallback around an inference session
//! - Streaming per-point assembly into 3D Gaussian splatting PLY files
//! - Model provisioning, device gating and PLY metadata inspection

pub mod config;
pub mod device;
pub mod error;
pub mod fallback;
pub mod pipeline;
pub mod preprocessing;
pub mod progress;
pub mod resources;
pub mod scene;
pub mod schema;
pub mod tensor;

#[cfg(test)]
mod testing;

pub use config::{DeviceConfig, GenerationConfig, ModelConfig, SplatConfig};
pub use device::{DeviceClass, DeviceProbe, OutputQuality, SystemProbe};
pub use error::{
    MetadataError, ResourceError, Result, SceneWriteError, SchemaError, SplatError, TensorError,
};
pub use fallback::{BackendFallbackController, ComputeMode, FallbackState};
pub use pipeline::{GenerationPipeline, GenerationRequest, GenerationResult, StreamOptions};
pub use progress::{CancellationFlag, ProgressCallback, ProgressReporter};
pub use resources::{ensure_disk_space, LocalModelProvider, ModelProvider};
pub use scene::{PlyWriter, PointAssembler, SceneSink, ScenePoint, SplatMetadata};
pub use schema::{SchemaResolver, SemanticSchema};

/// Re-export inference types.
pub use splatgen_inference::{
    BackendPreference, FeatureDescriptor, FeatureKind, InferenceError, InferenceSession,
    OutputTensor, SessionLoader,
};

#[cfg(feature = "native")]
pub use splatgen_inference::OrtLoader;
