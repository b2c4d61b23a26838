//! Tensor types for inference input/output.

use std::fmt;

use ndarray::{ArrayD, IxDyn};

use crate::error::InferenceError;
use crate::Result;

/// Numeric element encodings a session can declare or return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorType {
    Float16,
    Float32,
    Float64,
    Int32,
    Int64,
    Uint8,
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TensorType::Float16 => "float16",
            TensorType::Float32 => "float32",
            TensorType::Float64 => "float64",
            TensorType::Int32 => "int32",
            TensorType::Int64 => "int64",
            TensorType::Uint8 => "uint8",
        };
        f.write_str(name)
    }
}

/// Kind of value a declared feature accepts or produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    /// A pixel image with a fixed size constraint.
    Image { width: u32, height: u32 },
    /// An n-dimensional numeric array.
    MultiArray,
    /// A scalar double.
    Double,
    /// A scalar 64-bit integer.
    Int64,
    /// Anything the pipeline does not know how to feed or read.
    Other,
}

/// A feature as declared by an inference session.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureDescriptor {
    /// Declared feature name.
    pub name: String,
    /// Kind of value.
    pub kind: FeatureKind,
    /// Declared shape constraint. Dynamic dimensions are recorded as 0.
    pub shape: Option<Vec<usize>>,
    /// Declared element type, when the kind is numeric.
    pub dtype: Option<TensorType>,
}

impl FeatureDescriptor {
    /// Describe a multi-array feature with a fixed shape.
    pub fn multi_array(name: impl Into<String>, shape: &[usize], dtype: TensorType) -> Self {
        Self {
            name: name.into(),
            kind: FeatureKind::MultiArray,
            shape: Some(shape.to_vec()),
            dtype: Some(dtype),
        }
    }

    /// Describe a scalar feature of the given kind.
    pub fn scalar(name: impl Into<String>, kind: FeatureKind) -> Self {
        let dtype = match kind {
            FeatureKind::Double => Some(TensorType::Float64),
            FeatureKind::Int64 => Some(TensorType::Int64),
            _ => None,
        };
        Self {
            name: name.into(),
            kind,
            shape: None,
            dtype,
        }
    }

    /// Rank of the declared shape, if known.
    pub fn rank(&self) -> Option<usize> {
        self.shape.as_ref().map(|s| s.len())
    }

    /// Last declared dimension, if known.
    pub fn last_dim(&self) -> Option<usize> {
        self.shape.as_ref().and_then(|s| s.last().copied())
    }
}

/// Input tensor for inference.
#[derive(Debug, Clone)]
pub enum InputTensor {
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    Uint8(ArrayD<u8>),
}

impl InputTensor {
    /// Get the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        match self {
            InputTensor::Float32(arr) => arr.shape(),
            InputTensor::Float64(arr) => arr.shape(),
            InputTensor::Int32(arr) => arr.shape(),
            InputTensor::Int64(arr) => arr.shape(),
            InputTensor::Uint8(arr) => arr.shape(),
        }
    }

    /// Get the data type of the tensor.
    pub fn dtype(&self) -> TensorType {
        match self {
            InputTensor::Float32(_) => TensorType::Float32,
            InputTensor::Float64(_) => TensorType::Float64,
            InputTensor::Int32(_) => TensorType::Int32,
            InputTensor::Int64(_) => TensorType::Int64,
            InputTensor::Uint8(_) => TensorType::Uint8,
        }
    }

    /// Create a Float32 tensor from raw data and shape.
    pub fn from_f32(data: Vec<f32>, shape: Vec<usize>) -> Result<Self> {
        ArrayD::from_shape_vec(IxDyn(&shape), data)
            .map(InputTensor::Float32)
            .map_err(|e| InferenceError::InvalidInput(e.to_string()))
    }

    /// Create a Uint8 tensor from raw data and shape.
    pub fn from_u8(data: Vec<u8>, shape: Vec<usize>) -> Result<Self> {
        ArrayD::from_shape_vec(IxDyn(&shape), data)
            .map(InputTensor::Uint8)
            .map_err(|e| InferenceError::InvalidInput(e.to_string()))
    }
}

/// Output tensor from inference.
///
/// `Float16` holds raw IEEE-754 binary16 bit patterns; decoding is left to
/// the reader so that no native half type is required.
#[derive(Debug, Clone)]
pub enum OutputTensor {
    Float16(ArrayD<u16>),
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    Uint8(ArrayD<u8>),
}

impl OutputTensor {
    /// Get the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        match self {
            OutputTensor::Float16(arr) => arr.shape(),
            OutputTensor::Float32(arr) => arr.shape(),
            OutputTensor::Float64(arr) => arr.shape(),
            OutputTensor::Int32(arr) => arr.shape(),
            OutputTensor::Int64(arr) => arr.shape(),
            OutputTensor::Uint8(arr) => arr.shape(),
        }
    }

    /// Element strides (in elements, not bytes).
    pub fn strides(&self) -> &[isize] {
        match self {
            OutputTensor::Float16(arr) => arr.strides(),
            OutputTensor::Float32(arr) => arr.strides(),
            OutputTensor::Float64(arr) => arr.strides(),
            OutputTensor::Int32(arr) => arr.strides(),
            OutputTensor::Int64(arr) => arr.strides(),
            OutputTensor::Uint8(arr) => arr.strides(),
        }
    }

    /// Get the data type of the tensor.
    pub fn dtype(&self) -> TensorType {
        match self {
            OutputTensor::Float16(_) => TensorType::Float16,
            OutputTensor::Float32(_) => TensorType::Float32,
            OutputTensor::Float64(_) => TensorType::Float64,
            OutputTensor::Int32(_) => TensorType::Int32,
            OutputTensor::Int64(_) => TensorType::Int64,
            OutputTensor::Uint8(_) => TensorType::Uint8,
        }
    }

    /// Create a Float32 tensor from raw data and shape.
    pub fn from_f32(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(OutputTensor::Float32)
            .map_err(|e| InferenceError::OutputExtraction(e.to_string()))
    }

    /// Create a Float16 tensor from binary16 bit patterns and shape.
    pub fn from_f16_bits(data: Vec<u16>, shape: &[usize]) -> Result<Self> {
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(OutputTensor::Float16)
            .map_err(|e| InferenceError::OutputExtraction(e.to_string()))
    }

    /// Create a Float64 tensor from raw data and shape.
    pub fn from_f64(data: Vec<f64>, shape: &[usize]) -> Result<Self> {
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(OutputTensor::Float64)
            .map_err(|e| InferenceError::OutputExtraction(e.to_string()))
    }
}

/// Row-major element strides for a shape.
pub fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1].max(1);
    }
    strides
}
