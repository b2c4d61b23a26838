//! Typed per-point reads over bound session outputs.

use splatgen_inference::OutputTensor;
use tracing::debug;

use crate::error::{SchemaError, SplatError, TensorError};
use crate::schema::{OutputRole, SemanticSchema};
use crate::tensor::{QuatView, ScalarPerPointView, TensorView, Vec3View};

/// Raw per-point values as the model produced them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointSample {
    pub position: [f32; 3],
    pub scale: [f32; 3],
    /// w, x, y, z.
    pub rotation: [f32; 4],
    pub color_linear: [f32; 3],
    pub opacity: f32,
}

/// Reads [`PointSample`]s from the five bound output tensors.
#[derive(Debug)]
pub struct SampleExtractor<'a> {
    positions: Vec3View<'a>,
    scales: Vec3View<'a>,
    rotations: QuatView<'a>,
    colors: Vec3View<'a>,
    opacities: ScalarPerPointView<'a>,
}

impl<'a> SampleExtractor<'a> {
    /// Bind the schema's output roles to the tensors of a prediction.
    ///
    /// Every role must be present and all roles must agree on the point
    /// count.
    pub fn bind(
        schema: &SemanticSchema,
        outputs: &'a [(String, OutputTensor)],
    ) -> Result<Self, SplatError> {
        let positions = Vec3View::new(role_view(schema, outputs, OutputRole::Positions)?)?;
        let scales = Vec3View::new(role_view(schema, outputs, OutputRole::Scales)?)?;
        let rotations = QuatView::new(role_view(schema, outputs, OutputRole::Rotations)?)?;
        let colors = Vec3View::new(role_view(schema, outputs, OutputRole::Colors)?)?;
        let opacities = ScalarPerPointView::new(role_view(schema, outputs, OutputRole::Opacities)?)?;

        let expected = positions.point_count();
        let counts = [
            (OutputRole::Scales, scales.point_count()),
            (OutputRole::Rotations, rotations.point_count()),
            (OutputRole::Colors, colors.point_count()),
            (OutputRole::Opacities, opacities.point_count()),
        ];
        for (role, actual) in counts {
            if actual != expected {
                return Err(SchemaError::PointCountMismatch {
                    name: schema.output(role).name.clone(),
                    expected,
                    actual,
                }
                .into());
            }
        }

        debug!(
            "Bound {} points: {:?}",
            expected,
            positions.tensor().describe(&schema.positions.name)
        );

        Ok(Self {
            positions,
            scales,
            rotations,
            colors,
            opacities,
        })
    }

    pub fn point_count(&self) -> usize {
        self.positions.point_count()
    }

    /// Read the sample at `index`.
    pub fn extract(&self, index: usize) -> Result<PointSample, TensorError> {
        Ok(PointSample {
            position: self.positions.read(index)?,
            scale: self.scales.read(index)?,
            rotation: self.rotations.read(index)?,
            color_linear: self.colors.read(index)?,
            opacity: self.opacities.read(index)?,
        })
    }
}

fn role_view<'a>(
    schema: &SemanticSchema,
    outputs: &'a [(String, OutputTensor)],
    role: OutputRole,
) -> Result<TensorView<'a>, SplatError> {
    let name = &schema.output(role).name;
    let tensor = outputs
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, t)| t)
        .ok_or_else(|| SchemaError::UnresolvedOutputs(vec![name.clone()]))?;
    Ok(TensorView::from_output(tensor)?)
}
