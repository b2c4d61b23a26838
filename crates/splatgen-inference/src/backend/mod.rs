//! Inference session implementations.

#[cfg(feature = "native")]
pub mod ort;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{FeatureDescriptor, InputTensor, OutputTensor, Result};

/// Named input tensors, in the order they are fed to the session.
pub type NamedInputs = Vec<(String, InputTensor)>;

/// Named output tensors as returned by a prediction.
pub type NamedOutputs = Vec<(String, OutputTensor)>;

/// Execution configuration requested when loading a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendPreference {
    /// Neural accelerator first, CPU for unsupported ops.
    NeuralEngineAndCpu,
    /// Every accelerator the runtime can find.
    AllAvailable,
    /// Plain CPU execution.
    CpuOnly,
}

impl BackendPreference {
    /// Stable configuration name.
    pub fn as_str(self) -> &'static str {
        match self {
            BackendPreference::NeuralEngineAndCpu => "neural-engine-and-cpu",
            BackendPreference::AllAvailable => "all-available",
            BackendPreference::CpuOnly => "cpu-only",
        }
    }
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loaded prediction session.
///
/// Implementations expose the features the model declares and a single
/// blocking prediction call. Callers run `predict` off the async executor.
pub trait InferenceSession: Send + Sync {
    /// Backend the session was loaded with.
    fn backend(&self) -> BackendPreference;

    /// Declared input features.
    fn inputs(&self) -> &[FeatureDescriptor];

    /// Declared output features.
    fn outputs(&self) -> &[FeatureDescriptor];

    /// Run a prediction.
    ///
    /// # Arguments
    /// * `inputs` - Named input tensors
    ///
    /// # Returns
    /// Named output tensors from the model
    fn predict(&self, inputs: &[(String, InputTensor)]) -> Result<NamedOutputs>;
}

/// Loads sessions for a model artifact under a given backend.
pub trait SessionLoader: Send + Sync {
    /// Load the model at `model_path` configured for `backend`.
    fn load(&self, model_path: &Path, backend: BackendPreference) -> Result<Box<dyn InferenceSession>>;
}
