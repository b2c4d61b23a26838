//! ONNX Runtime (ort) session for native platforms.

use std::path::Path;
use std::sync::Mutex;

use ndarray::ArrayD;
use ort::ep::{CoreML, ExecutionProviderDispatch, XNNPACK};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::{Tensor, ValueType};
use tracing::debug;

use crate::error::InferenceError;
use crate::tensor::{FeatureDescriptor, FeatureKind, InputTensor, OutputTensor, TensorType};
use crate::{BackendPreference, InferenceSession, NamedOutputs, Result, SessionLoader};

/// Session backed by ONNX Runtime.
pub struct OrtSession {
    session: Mutex<Session>,
    backend: BackendPreference,
    inputs: Vec<FeatureDescriptor>,
    outputs: Vec<FeatureDescriptor>,
}

impl OrtSession {
    /// Load a model from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P, backend: BackendPreference) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading ONNX model from: {} ({})", path.display(), backend);

        let bytes = std::fs::read(path)?;

        Self::from_bytes(&bytes, backend)
    }

    /// Load a model from bytes.
    pub fn from_bytes(bytes: &[u8], backend: BackendPreference) -> Result<Self> {
        debug!("Loading ONNX model from {} bytes", bytes.len());

        let session = Session::builder()
            .map_err(|e| InferenceError::SessionCreate(e.to_string()))?
            .with_execution_providers(execution_providers(backend))
            .map_err(|e| InferenceError::SessionCreate(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| InferenceError::SessionCreate(e.to_string()))?
            .with_intra_threads(4)
            .map_err(|e| InferenceError::SessionCreate(e.to_string()))?
            .commit_from_memory(bytes)
            .map_err(|e| InferenceError::ModelLoad(e.to_string()))?;

        let inputs: Vec<FeatureDescriptor> = session
            .inputs()
            .iter()
            .map(|i| describe(i.name(), i.dtype()))
            .collect();

        let outputs: Vec<FeatureDescriptor> = session
            .outputs()
            .iter()
            .map(|o| describe(o.name(), o.dtype()))
            .collect();

        debug!("Model inputs: {:?}", inputs);
        debug!("Model outputs: {:?}", outputs);

        Ok(Self {
            session: Mutex::new(session),
            backend,
            inputs,
            outputs,
        })
    }

    fn convert_input(&self, tensor: &InputTensor) -> Result<ort::session::SessionInputValue<'static>> {
        match tensor {
            InputTensor::Float32(arr) => to_session_value(arr),
            InputTensor::Float64(arr) => to_session_value(arr),
            InputTensor::Int32(arr) => to_session_value(arr),
            InputTensor::Int64(arr) => to_session_value(arr),
            InputTensor::Uint8(arr) => to_session_value(arr),
        }
    }
}

fn to_session_value<T>(arr: &ArrayD<T>) -> Result<ort::session::SessionInputValue<'static>>
where
    T: ort::tensor::PrimitiveTensorElementType + Clone + std::fmt::Debug + 'static,
{
    let shape: Vec<i64> = arr.shape().iter().map(|&s| s as i64).collect();
    let data: Vec<T> = arr.iter().cloned().collect();
    Tensor::from_array((shape, data))
        .map(Into::into)
        .map_err(|e| InferenceError::InvalidInput(e.to_string()))
}

fn execution_providers(backend: BackendPreference) -> Vec<ExecutionProviderDispatch> {
    let apple = cfg!(target_vendor = "apple");
    match backend {
        BackendPreference::CpuOnly => Vec::new(),
        BackendPreference::NeuralEngineAndCpu if apple => vec![CoreML::default().build()],
        BackendPreference::NeuralEngineAndCpu => vec![XNNPACK::default().build()],
        BackendPreference::AllAvailable if apple => {
            vec![CoreML::default().build(), XNNPACK::default().build()]
        }
        BackendPreference::AllAvailable => vec![XNNPACK::default().build()],
    }
}

fn describe(name: &str, value_type: &ValueType) -> FeatureDescriptor {
    match value_type {
        ValueType::Tensor { ty, shape, .. } => FeatureDescriptor {
            name: name.to_string(),
            kind: FeatureKind::MultiArray,
            // Symbolic dimensions come back as -1.
            shape: Some(shape.iter().map(|&d| if d > 0 { d as usize } else { 0 }).collect()),
            dtype: element_type(*ty),
        },
        _ => FeatureDescriptor {
            name: name.to_string(),
            kind: FeatureKind::Other,
            shape: None,
            dtype: None,
        },
    }
}

fn element_type(ty: TensorElementType) -> Option<TensorType> {
    match ty {
        TensorElementType::Float16 => Some(TensorType::Float16),
        TensorElementType::Float32 => Some(TensorType::Float32),
        TensorElementType::Float64 => Some(TensorType::Float64),
        TensorElementType::Int32 => Some(TensorType::Int32),
        TensorElementType::Int64 => Some(TensorType::Int64),
        TensorElementType::Uint8 => Some(TensorType::Uint8),
        _ => None,
    }
}

fn to_array<T: Clone>(shape: &[i64], data: &[T]) -> Result<ArrayD<T>> {
    let shape: Vec<usize> = shape.iter().map(|&s| s as usize).collect();
    ArrayD::from_shape_vec(ndarray::IxDyn(&shape), data.to_vec())
        .map_err(|e| InferenceError::OutputExtraction(e.to_string()))
}

impl InferenceSession for OrtSession {
    fn backend(&self) -> BackendPreference {
        self.backend
    }

    fn inputs(&self) -> &[FeatureDescriptor] {
        &self.inputs
    }

    fn outputs(&self) -> &[FeatureDescriptor] {
        &self.outputs
    }

    fn predict(&self, inputs: &[(String, InputTensor)]) -> Result<NamedOutputs> {
        let ort_inputs: Vec<(&str, ort::session::SessionInputValue<'static>)> = inputs
            .iter()
            .map(|(name, tensor)| {
                let value = self.convert_input(tensor)?;
                Ok((name.as_str(), value))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut session = self.session.lock()
            .map_err(|e| InferenceError::InferenceFailed(format!("Failed to lock session: {}", e)))?;

        let outputs = session
            .run(ort_inputs)
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?;

        let mut results = Vec::with_capacity(outputs.len());

        for (name, value) in outputs.iter() {
            let tensor = if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
                OutputTensor::Float32(to_array(shape, data)?)
            } else if let Ok((shape, data)) = value.try_extract_tensor::<half::f16>() {
                let bits: Vec<u16> = data.iter().map(|h| h.to_bits()).collect();
                OutputTensor::Float16(to_array(shape, &bits)?)
            } else if let Ok((shape, data)) = value.try_extract_tensor::<f64>() {
                OutputTensor::Float64(to_array(shape, data)?)
            } else if let Ok((shape, data)) = value.try_extract_tensor::<i64>() {
                OutputTensor::Int64(to_array(shape, data)?)
            } else if let Ok((shape, data)) = value.try_extract_tensor::<i32>() {
                OutputTensor::Int32(to_array(shape, data)?)
            } else if let Ok((shape, data)) = value.try_extract_tensor::<u8>() {
                OutputTensor::Uint8(to_array(shape, data)?)
            } else {
                return Err(InferenceError::OutputExtraction(
                    format!("unsupported output type for '{}'", name),
                ));
            };

            results.push((name.to_string(), tensor));
        }

        Ok(results)
    }
}

/// Loads [`OrtSession`]s from `.onnx` files.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrtLoader;

impl SessionLoader for OrtLoader {
    fn load(&self, model_path: &Path, backend: BackendPreference) -> Result<Box<dyn InferenceSession>> {
        Ok(Box::new(OrtSession::from_file(model_path, backend)?))
    }
}
