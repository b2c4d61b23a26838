//! Dtype-agnostic element reader over a flat tensor buffer.

use splatgen_inference::{OutputTensor, TensorType};

use super::half;
use crate::error::TensorError;

/// Borrowed flat buffer tagged with its element encoding.
#[derive(Debug, Clone, Copy)]
pub enum TensorBuffer<'a> {
    /// binary16 bit patterns.
    Float16(&'a [u16]),
    Float32(&'a [f32]),
    Float64(&'a [f64]),
    Int32(&'a [i32]),
    Int64(&'a [i64]),
    Uint8(&'a [u8]),
}

impl TensorBuffer<'_> {
    /// Element encoding of the buffer.
    pub fn dtype(&self) -> TensorType {
        match self {
            TensorBuffer::Float16(_) => TensorType::Float16,
            TensorBuffer::Float32(_) => TensorType::Float32,
            TensorBuffer::Float64(_) => TensorType::Float64,
            TensorBuffer::Int32(_) => TensorType::Int32,
            TensorBuffer::Int64(_) => TensorType::Int64,
            TensorBuffer::Uint8(_) => TensorType::Uint8,
        }
    }

    /// Number of elements in the buffer.
    pub fn len(&self) -> usize {
        match self {
            TensorBuffer::Float16(b) => b.len(),
            TensorBuffer::Float32(b) => b.len(),
            TensorBuffer::Float64(b) => b.len(),
            TensorBuffer::Int32(b) => b.len(),
            TensorBuffer::Int64(b) => b.len(),
            TensorBuffer::Uint8(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shape, element strides and encoding of a bound output tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDescriptor {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: TensorType,
    /// Element strides, one per dimension.
    pub strides: Vec<usize>,
}

/// Read-only view over a floating-point tensor.
///
/// Offsets are element counts. Every read is bounds-checked against the
/// underlying buffer.
#[derive(Debug, Clone)]
pub struct TensorView<'a> {
    buffer: TensorBuffer<'a>,
    shape: Vec<usize>,
    strides: Vec<usize>,
}

impl<'a> TensorView<'a> {
    /// Create a view over `buffer` with the given shape and element strides.
    ///
    /// Only float16, float32 and float64 buffers are readable.
    pub fn new(
        buffer: TensorBuffer<'a>,
        shape: Vec<usize>,
        strides: Vec<usize>,
    ) -> Result<Self, TensorError> {
        match buffer.dtype() {
            TensorType::Float16 | TensorType::Float32 | TensorType::Float64 => {}
            other => return Err(TensorError::UnsupportedDType(other)),
        }

        if shape.len() != strides.len() {
            return Err(TensorError::InvalidShape(format!(
                "{} dimensions but {} strides",
                shape.len(),
                strides.len()
            )));
        }

        Ok(Self {
            buffer,
            shape,
            strides,
        })
    }

    /// Create a view over a session output, keeping its memory layout.
    pub fn from_output(output: &'a OutputTensor) -> Result<Self, TensorError> {
        let shape = output.shape().to_vec();

        let mut strides = Vec::with_capacity(shape.len());
        for &stride in output.strides() {
            let stride = usize::try_from(stride).map_err(|_| {
                TensorError::InvalidShape(format!("negative stride {stride}"))
            })?;
            strides.push(stride);
        }

        let buffer = match output {
            OutputTensor::Float16(arr) => arr.as_slice_memory_order().map(TensorBuffer::Float16),
            OutputTensor::Float32(arr) => arr.as_slice_memory_order().map(TensorBuffer::Float32),
            OutputTensor::Float64(arr) => arr.as_slice_memory_order().map(TensorBuffer::Float64),
            OutputTensor::Int32(_) | OutputTensor::Int64(_) | OutputTensor::Uint8(_) => {
                return Err(TensorError::UnsupportedDType(output.dtype()));
            }
        }
        .ok_or_else(|| TensorError::InvalidShape("output is not contiguous in memory".into()))?;

        Self::new(buffer, shape, strides)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn dtype(&self) -> TensorType {
        self.buffer.dtype()
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements in the backing buffer.
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Describe the view under the given output name.
    pub fn describe(&self, name: &str) -> TensorDescriptor {
        TensorDescriptor {
            name: name.to_string(),
            shape: self.shape.clone(),
            dtype: self.dtype(),
            strides: self.strides.clone(),
        }
    }

    /// Read the element at a multi-dimensional index.
    pub fn read(&self, index: &[usize]) -> Result<f32, TensorError> {
        let in_shape = index.len() == self.shape.len()
            && index.iter().zip(&self.shape).all(|(i, d)| i < d);
        let offset = element_offset(index, &self.strides);

        match offset {
            Some(offset) if in_shape => self.read_linear(offset),
            _ => Err(TensorError::IndexOutOfBounds {
                offset: offset.unwrap_or(usize::MAX),
                len: self.buffer.len(),
            }),
        }
    }

    /// Read the element at a flat element offset.
    pub fn read_linear(&self, offset: usize) -> Result<f32, TensorError> {
        let oob = || TensorError::IndexOutOfBounds {
            offset,
            len: self.buffer.len(),
        };

        match self.buffer {
            TensorBuffer::Float32(b) => b.get(offset).copied().ok_or_else(oob),
            TensorBuffer::Float64(b) => b.get(offset).map(|&v| v as f32).ok_or_else(oob),
            TensorBuffer::Float16(b) => b.get(offset).map(|&v| half::decode(v)).ok_or_else(oob),
            _ => Err(TensorError::UnsupportedDType(self.buffer.dtype())),
        }
    }
}

/// Dot product of `index` and `strides`, or `None` on overflow.
pub(crate) fn element_offset(index: &[usize], strides: &[usize]) -> Option<usize> {
    index
        .iter()
        .zip(strides)
        .try_fold(0usize, |acc, (&i, &s)| acc.checked_add(i.checked_mul(s)?))
}
