//! Scripted inference sessions for unit tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use splatgen_inference::{
    BackendPreference, FeatureDescriptor, FeatureKind, InferenceError, InferenceSession,
    InputTensor, NamedOutputs, OutputTensor, SessionLoader, TensorType,
};

use crate::schema::OutputRole;

/// Side length of the scripted image input.
pub const INPUT_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeed,
    FailLoad,
    FailPredict,
}

/// Canonical outputs for `n` points. Point `i` sits at `(i, 2i, -1)`.
pub fn canonical_outputs(n: usize) -> NamedOutputs {
    let positions: Vec<f32> = (0..n)
        .flat_map(|i| [i as f32, 2.0 * i as f32, -1.0])
        .collect();

    vec![
        (
            OutputRole::Positions.canonical_name().to_string(),
            OutputTensor::from_f32(positions, &[1, n, 3]).unwrap(),
        ),
        (
            OutputRole::Scales.canonical_name().to_string(),
            OutputTensor::from_f32(vec![0.01; n * 3], &[1, n, 3]).unwrap(),
        ),
        (
            OutputRole::Rotations.canonical_name().to_string(),
            OutputTensor::from_f32([1.0, 0.0, 0.0, 0.0].repeat(n), &[1, n, 4]).unwrap(),
        ),
        (
            OutputRole::Colors.canonical_name().to_string(),
            OutputTensor::from_f32(vec![0.5; n * 3], &[1, n, 3]).unwrap(),
        ),
        (
            OutputRole::Opacities.canonical_name().to_string(),
            OutputTensor::from_f32(vec![0.5; n], &[1, n]).unwrap(),
        ),
    ]
}

/// Output descriptors matching [`canonical_outputs`].
pub fn canonical_descriptors(n: usize) -> Vec<FeatureDescriptor> {
    let shape = |k: usize| if k == 1 { vec![1, n] } else { vec![1, n, k] };
    [
        (OutputRole::Positions, 3),
        (OutputRole::Scales, 3),
        (OutputRole::Rotations, 4),
        (OutputRole::Colors, 3),
        (OutputRole::Opacities, 1),
    ]
    .into_iter()
    .map(|(role, k)| FeatureDescriptor::multi_array(role.canonical_name(), &shape(k), TensorType::Float32))
    .collect()
}

fn default_inputs() -> Vec<FeatureDescriptor> {
    vec![
        FeatureDescriptor::multi_array(
            "image",
            &[1, 3, INPUT_SIZE, INPUT_SIZE],
            TensorType::Float32,
        ),
        FeatureDescriptor::scalar("disparity_factor", FeatureKind::Double),
    ]
}

/// Loader whose sessions succeed or fail per backend as scripted.
pub struct ScriptedLoader {
    points: usize,
    plan: HashMap<BackendPreference, Outcome>,
    inputs: Vec<FeatureDescriptor>,
    loads: Mutex<Vec<BackendPreference>>,
    predictions: Arc<Mutex<Vec<BackendPreference>>>,
    seen_inputs: Arc<Mutex<Vec<(String, Vec<usize>)>>>,
    dropped: Arc<AtomicUsize>,
}

impl ScriptedLoader {
    pub fn new(points: usize) -> Self {
        Self {
            points,
            plan: HashMap::new(),
            inputs: default_inputs(),
            loads: Mutex::new(Vec::new()),
            predictions: Arc::new(Mutex::new(Vec::new())),
            seen_inputs: Arc::new(Mutex::new(Vec::new())),
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with(mut self, backend: BackendPreference, outcome: Outcome) -> Self {
        self.plan.insert(backend, outcome);
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<FeatureDescriptor>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn loads(&self) -> Vec<BackendPreference> {
        self.loads.lock().unwrap().clone()
    }

    pub fn predictions(&self) -> Vec<BackendPreference> {
        self.predictions.lock().unwrap().clone()
    }

    /// Names and shapes of the inputs of the last prediction.
    pub fn seen_inputs(&self) -> Vec<(String, Vec<usize>)> {
        self.seen_inputs.lock().unwrap().clone()
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

impl SessionLoader for ScriptedLoader {
    fn load(
        &self,
        _model_path: &Path,
        backend: BackendPreference,
    ) -> Result<Box<dyn InferenceSession>, InferenceError> {
        self.loads.lock().unwrap().push(backend);
        let outcome = self.plan.get(&backend).copied().unwrap_or(Outcome::Succeed);

        if outcome == Outcome::FailLoad {
            return Err(InferenceError::ModelLoad(format!("scripted load failure on {backend}")));
        }

        Ok(Box::new(ScriptedSession {
            backend,
            outcome,
            points: self.points,
            inputs: self.inputs.clone(),
            outputs: canonical_descriptors(self.points),
            predictions: Arc::clone(&self.predictions),
            seen_inputs: Arc::clone(&self.seen_inputs),
            dropped: Arc::clone(&self.dropped),
        }))
    }
}

struct ScriptedSession {
    backend: BackendPreference,
    outcome: Outcome,
    points: usize,
    inputs: Vec<FeatureDescriptor>,
    outputs: Vec<FeatureDescriptor>,
    predictions: Arc<Mutex<Vec<BackendPreference>>>,
    seen_inputs: Arc<Mutex<Vec<(String, Vec<usize>)>>>,
    dropped: Arc<AtomicUsize>,
}

impl InferenceSession for ScriptedSession {
    fn backend(&self) -> BackendPreference {
        self.backend
    }

    fn inputs(&self) -> &[FeatureDescriptor] {
        &self.inputs
    }

    fn outputs(&self) -> &[FeatureDescriptor] {
        &self.outputs
    }

    fn predict(&self, inputs: &[(String, InputTensor)]) -> Result<NamedOutputs, InferenceError> {
        self.predictions.lock().unwrap().push(self.backend);
        *self.seen_inputs.lock().unwrap() = inputs
            .iter()
            .map(|(name, tensor)| (name.clone(), tensor.shape().to_vec()))
            .collect();

        if self.outcome == Outcome::FailPredict {
            return Err(InferenceError::InferenceFailed(format!(
                "scripted prediction failure on {}",
                self.backend
            )));
        }
        Ok(canonical_outputs(self.points))
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}
