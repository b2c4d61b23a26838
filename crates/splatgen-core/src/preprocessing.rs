//! Image decoding and model input preparation.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array4, ArrayD, IxDyn};
use splatgen_inference::{FeatureDescriptor, FeatureKind, InputTensor, NamedInputs};
use tracing::debug;

use crate::error::{Result, SchemaError, SplatError};
use crate::schema::SemanticSchema;

/// Turns source image bytes into model inputs.
#[derive(Debug, Clone, Copy)]
pub struct ImagePreprocessor {
    filter: FilterType,
}

impl ImagePreprocessor {
    /// Create a preprocessor with Lanczos resampling.
    pub fn new() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }

    /// Set the resampling filter.
    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    /// Decode an encoded image (PNG, JPEG, ...).
    pub fn decode(&self, bytes: &[u8]) -> Result<DynamicImage> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| SplatError::UnsupportedImage(e.to_string()))?;
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(SplatError::UnsupportedImage("image has no pixels".into()));
        }
        Ok(image)
    }

    /// Resize to exactly `size` (width, height), ignoring aspect ratio.
    pub fn resize(&self, image: &DynamicImage, size: (u32, u32)) -> Result<RgbImage> {
        let (width, height) = size;
        if width == 0 || height == 0 {
            return Err(SplatError::UnsupportedImage(format!(
                "invalid target size {width}x{height}"
            )));
        }

        debug!(
            "Resizing {}x{} -> {}x{}",
            image.width(),
            image.height(),
            width,
            height
        );
        Ok(image.resize_exact(width, height, self.filter).to_rgb8())
    }

    /// Image tensor matching the declared image input.
    ///
    /// Multi-array inputs get float32 NCHW in `[0, 1]`; image inputs get
    /// uint8 NHWC.
    pub fn image_tensor(&self, rgb: &RgbImage, desc: &FeatureDescriptor) -> Result<InputTensor> {
        let (width, height) = rgb.dimensions();
        let (w, h) = (width as usize, height as usize);

        match desc.kind {
            FeatureKind::MultiArray => {
                if let Some(shape) = &desc.shape {
                    let fits = shape.len() == 4
                        && [1, 3, h, w]
                            .iter()
                            .zip(shape)
                            .all(|(want, got)| *got == 0 || got == want);
                    if !fits {
                        return Err(SchemaError::UnresolvedInputs(vec![desc.name.clone()]).into());
                    }
                }

                let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
                for (x, y, pixel) in rgb.enumerate_pixels() {
                    for c in 0..3 {
                        tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
                    }
                }
                Ok(InputTensor::Float32(tensor.into_dyn()))
            }
            FeatureKind::Image { .. } => {
                Ok(InputTensor::from_u8(rgb.as_raw().clone(), vec![1, h, w, 3])?)
            }
            _ => Err(SchemaError::UnresolvedInputs(vec![desc.name.clone()]).into()),
        }
    }

    /// Disparity scalar in the representation the input declares.
    pub fn disparity_tensor(&self, desc: &FeatureDescriptor, value: f32) -> Result<InputTensor> {
        let tensor = match desc.kind {
            FeatureKind::Int64 => InputTensor::Int64(scalar_array(value as i64)?),
            FeatureKind::MultiArray => {
                let shape: Vec<usize> = match &desc.shape {
                    Some(s) if !s.is_empty() => s.iter().map(|&d| d.max(1)).collect(),
                    _ => vec![1],
                };
                let len = shape.iter().product();
                InputTensor::from_f32(vec![value; len], shape)?
            }
            _ => InputTensor::Float64(scalar_array(f64::from(value))?),
        };
        Ok(tensor)
    }

    /// Decode, resize and convert `image_bytes` into the model's input set.
    pub fn build_inputs(
        &self,
        schema: &SemanticSchema,
        image_bytes: &[u8],
        size: (u32, u32),
        disparity_factor: f32,
    ) -> Result<NamedInputs> {
        let image = self.decode(image_bytes)?;
        let resized = self.resize(&image, size)?;

        let mut inputs = vec![(
            schema.image_input.name.clone(),
            self.image_tensor(&resized, &schema.image_input)?,
        )];
        if let Some(desc) = &schema.disparity_input {
            inputs.push((desc.name.clone(), self.disparity_tensor(desc, disparity_factor)?));
        }
        Ok(inputs)
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

fn scalar_array<T>(value: T) -> Result<ArrayD<T>> {
    ArrayD::from_shape_vec(IxDyn(&[1]), vec![value])
        .map_err(|e| SplatError::Config(format!("scalar input: {e}")))
}
