//! Inference session abstraction for splatgen.
//!
//! This crate describes what a prediction session looks like to the rest of
//! the workspace:
//! - declared input/output features with optional shape constraints
//! - owned input and output tensors (including raw float16 outputs)
//! - the `InferenceSession` / `SessionLoader` traits and execution-backend
//!   preferences
//! - an ONNX Runtime implementation behind the `native` feature

mod backend;
mod error;
mod tensor;

pub use backend::{BackendPreference, InferenceSession, NamedInputs, NamedOutputs, SessionLoader};
pub use error::InferenceError;
pub use tensor::{
    contiguous_strides, FeatureDescriptor, FeatureKind, InputTensor, OutputTensor, TensorType,
};

#[cfg(feature = "native")]
pub use backend::ort::{OrtLoader, OrtSession};

/// Result type for inference operations.
pub type Result<T> = std::result::Result<T, InferenceError>;
