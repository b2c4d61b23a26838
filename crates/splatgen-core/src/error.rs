//! Error types for the splatgen-core library.

use std::path::PathBuf;

use splatgen_inference::{BackendPreference, InferenceError, TensorType};
use thiserror::Error;

/// Main error type for the splatgen library.
#[derive(Error, Debug)]
pub enum SplatError {
    /// Tensor decoding error.
    #[error("tensor error: {0}")]
    Tensor(#[from] TensorError),

    /// The session schema could not be mapped to semantic roles.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Model provisioning error.
    #[error("model resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Scene output error.
    #[error("scene write error: {0}")]
    SceneWrite(#[from] SceneWriteError),

    /// Scene metadata error.
    #[error("scene metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Inference error outside the backend fallback loop.
    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),

    /// The source image could not be decoded or resized.
    #[error("unsupported image: {0}")]
    UnsupportedImage(String),

    /// Physical memory is below the local-generation threshold.
    #[error(
        "insufficient device memory: {required} bytes required, {available} bytes available \
         (set allow_low_memory to override)"
    )]
    InsufficientDeviceMemory { required: u64, available: u64 },

    /// Every backend candidate failed.
    #[error("prediction failed after trying {}: {source}", format_attempts(.attempts))]
    PredictionFailed {
        attempts: Vec<BackendPreference>,
        #[source]
        source: InferenceError,
    },

    /// I/O failure.
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// The request was cancelled by the caller.
    #[error("generation cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

fn format_attempts(attempts: &[BackendPreference]) -> String {
    if attempts.is_empty() {
        return "no backends".to_string();
    }
    attempts
        .iter()
        .map(|b| b.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors raised while reading numeric tensor buffers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
    /// The buffer element type is not a supported floating-point encoding.
    #[error("unsupported tensor data type: {0}")]
    UnsupportedDType(TensorType),

    /// A computed offset falls outside the buffer.
    #[error("index out of bounds: offset {offset} in buffer of {len} elements")]
    IndexOutOfBounds { offset: usize, len: usize },

    /// The tensor shape does not fit the requested addressing scheme.
    #[error("invalid tensor shape: {0}")]
    InvalidShape(String),
}

/// Errors related to mapping declared features onto semantic roles.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// No usable image input was declared.
    #[error("unsupported model inputs: {}", .0.join(", "))]
    UnresolvedInputs(Vec<String>),

    /// One or more of the five point outputs could not be bound.
    #[error("unsupported model outputs: {}", .0.join(", "))]
    UnresolvedOutputs(Vec<String>),

    /// Bound outputs disagree on the number of points.
    #[error("output '{name}' has {actual} points, expected {expected}")]
    PointCountMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
}

/// Errors related to model provisioning.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The model is neither cached nor available from a source.
    #[error("model resource not found: {}", .0.display())]
    MissingResource(PathBuf),

    /// Not enough free disk space to provision the model.
    #[error(
        "insufficient disk space: {required} bytes required, {available} bytes available"
    )]
    InsufficientDiskSpace { required: u64, available: u64 },

    /// The model cache directory could not be created.
    #[error("could not create model cache directory at {}", .0.display())]
    CannotCreateCacheDirectory(PathBuf),

    /// Remote download failed.
    #[error("download failed: {0}")]
    Download(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by scene sinks.
#[derive(Error, Debug)]
pub enum SceneWriteError {
    /// The number of written points differs from the declared count.
    #[error("point count mismatch: declared {expected}, wrote {written}")]
    CountMismatch { expected: usize, written: usize },

    /// A call arrived in the wrong writer state.
    #[error("invalid writer state: {0}")]
    InvalidState(&'static str),

    /// Spherical-harmonic degree outside 0..=3.
    #[error("unsupported spherical harmonic degree: {0}")]
    UnsupportedDegree(u8),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while reading scene metadata.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// No `end_header` line within the header search window.
    #[error("end_header not found")]
    HeaderNotFound,

    /// The header uses a layout the reader does not support.
    #[error("unsupported header: {0}")]
    UnsupportedHeader(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for the splatgen library.
pub type Result<T> = std::result::Result<T, SplatError>;
