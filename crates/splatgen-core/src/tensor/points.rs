//! Point-major typed views.
//!
//! Each view resolves its tensor layout once into a point count, a point
//! stride and a component stride, so per-point reads never branch on shape.

use super::view::TensorView;
use crate::error::TensorError;

/// View over a `[1, N, K]` or `[N, K]` tensor yielding `K` components per point.
#[derive(Debug, Clone)]
pub struct PointMajorView<'a, const K: usize> {
    view: TensorView<'a>,
    count: usize,
    point_stride: usize,
    component_stride: usize,
}

/// Three components per point (positions, scales, colors).
pub type Vec3View<'a> = PointMajorView<'a, 3>;

/// Quaternion per point, stored w, x, y, z.
pub type QuatView<'a> = PointMajorView<'a, 4>;

impl<'a, const K: usize> PointMajorView<'a, K> {
    pub fn new(view: TensorView<'a>) -> Result<Self, TensorError> {
        let shape = view.shape();
        let strides = view.strides();

        let (count, point_stride, component_stride) = match shape {
            [1, n, k] if *k == K => (*n, strides[1], strides[2]),
            [n, k] if *k == K => (*n, strides[0], strides[1]),
            _ => {
                return Err(TensorError::InvalidShape(format!(
                    "expected [1, N, {K}] or [N, {K}], got {shape:?}"
                )));
            }
        };

        let last = last_offset(count, point_stride, &[(K, component_stride)])?;
        ensure_in_buffer(last, view.buffer_len())?;

        Ok(Self {
            view,
            count,
            point_stride,
            component_stride,
        })
    }

    pub fn point_count(&self) -> usize {
        self.count
    }

    /// Read all components of point `index`.
    pub fn read(&self, index: usize) -> Result<[f32; K], TensorError> {
        if index >= self.count {
            return Err(TensorError::IndexOutOfBounds {
                offset: index,
                len: self.count,
            });
        }

        let base = index * self.point_stride;
        let mut out = [0.0f32; K];
        for (c, slot) in out.iter_mut().enumerate() {
            *slot = self.view.read_linear(base + c * self.component_stride)?;
        }
        Ok(out)
    }

    /// Underlying element view.
    pub fn tensor(&self) -> &TensorView<'a> {
        &self.view
    }
}

/// One scalar per point from `[N]`, `[N, 1]` or `[1, N]`.
///
/// A rank-2 shape is read as `[1, N]` only when the first dimension is 1 and
/// the second is not; every other rank-2 shape is read as `[N, 1]`. No model
/// metadata backs this choice, so a transposed opacity tensor with both
/// dimensions above 1 would be misread.
#[derive(Debug, Clone)]
pub struct ScalarPerPointView<'a> {
    view: TensorView<'a>,
    count: usize,
    point_stride: usize,
}

impl<'a> ScalarPerPointView<'a> {
    pub fn new(view: TensorView<'a>) -> Result<Self, TensorError> {
        let shape = view.shape();
        let strides = view.strides();

        let (count, point_stride) = match shape {
            [n] => (*n, strides[0]),
            [1, n] if *n != 1 => (*n, strides[1]),
            [n, _] => (*n, strides[0]),
            _ => {
                return Err(TensorError::InvalidShape(format!(
                    "expected [N], [N, 1] or [1, N], got {shape:?}"
                )));
            }
        };

        let last = last_offset(count, point_stride, &[])?;
        ensure_in_buffer(last, view.buffer_len())?;

        Ok(Self {
            view,
            count,
            point_stride,
        })
    }

    pub fn point_count(&self) -> usize {
        self.count
    }

    pub fn read(&self, index: usize) -> Result<f32, TensorError> {
        if index >= self.count {
            return Err(TensorError::IndexOutOfBounds {
                offset: index,
                len: self.count,
            });
        }
        self.view.read_linear(index * self.point_stride)
    }

    pub fn tensor(&self) -> &TensorView<'a> {
        &self.view
    }
}

/// Offset of the last addressable element, or `None` when there are no points.
///
/// Layouts whose last offset does not fit in `usize` are rejected.
fn last_offset(
    count: usize,
    point_stride: usize,
    components: &[(usize, usize)],
) -> Result<Option<usize>, TensorError> {
    if count == 0 {
        return Ok(None);
    }
    let overflow = || TensorError::InvalidShape(format!("{count} points overflow the address space"));

    let tail = components.iter().try_fold(0usize, |acc, &(width, stride)| {
        acc.checked_add((width - 1).checked_mul(stride)?)
    });
    (count - 1)
        .checked_mul(point_stride)
        .zip(tail)
        .and_then(|(head, tail)| head.checked_add(tail))
        .map(Some)
        .ok_or_else(overflow)
}

fn ensure_in_buffer(last: Option<usize>, len: usize) -> Result<(), TensorError> {
    match last {
        Some(offset) if offset >= len => Err(TensorError::IndexOutOfBounds { offset, len }),
        _ => Ok(()),
    }
}
