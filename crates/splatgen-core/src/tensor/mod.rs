//! Stride-aware readers over model output tensors.
//!
//! [`TensorView`] reads single elements from a flat buffer of any supported
//! floating-point encoding. The typed views in [`points`] resolve the
//! point-major layout of an output once and then read whole per-point
//! vectors.

pub mod half;
pub mod points;
pub mod view;

pub use points::{PointMajorView, QuatView, ScalarPerPointView, Vec3View};
pub use view::{TensorBuffer, TensorDescriptor, TensorView};
