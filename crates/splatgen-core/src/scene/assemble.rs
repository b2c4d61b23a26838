//! Conversion of raw samples into serializable scene points.

use super::sample::PointSample;

/// Smallest scale written for any axis.
pub const SCALE_FLOOR: f32 = 1e-8;

/// Distance kept from fully transparent and fully opaque.
pub const OPACITY_EPSILON: f32 = 1e-6;

/// Zeroth real spherical harmonic, `1 / (2 * sqrt(pi))`.
pub const SH_C0: f32 = 0.282_094_791_773_878_14;

/// Upper end of the linear segment of the sRGB transfer function.
pub const SRGB_LINEAR_THRESHOLD: f32 = 0.003_130_8;

/// A point ready for the scene sink.
///
/// Opacity and scale are kept linear; sinks apply their own on-disk encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenePoint {
    pub position: [f32; 3],
    /// Spherical-harmonic DC coefficient per color channel.
    pub sh_dc: [f32; 3],
    /// Linear opacity in `[OPACITY_EPSILON, 1 - OPACITY_EPSILON]`.
    pub opacity: f32,
    /// Linear scale, each axis at least [`SCALE_FLOOR`].
    pub scale: [f32; 3],
    /// Unit quaternion, w, x, y, z.
    pub rotation: [f32; 4],
}

/// Turns [`PointSample`]s into [`ScenePoint`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct PointAssembler;

impl PointAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Clamp, normalize and encode one sample.
    ///
    /// Every component is clamped before any transform so that NaN or
    /// negative model outputs never reach the color transfer function.
    pub fn assemble(&self, sample: &PointSample) -> ScenePoint {
        let scale = sample.scale.map(floor_scale);
        let rotation = normalize_quat(sample.rotation);
        let srgb = sample.color_linear.map(|c| linear_to_srgb(clamp_unit(c)));
        let opacity = clamp_opacity(sample.opacity);
        let sh_dc = srgb.map(|c| (c - 0.5) / SH_C0);

        ScenePoint {
            position: sample.position,
            sh_dc,
            opacity,
            scale,
            rotation,
        }
    }
}

/// Standard sRGB transfer function for a linear value in `[0, 1]`.
pub fn linear_to_srgb(linear: f32) -> f32 {
    if linear <= SRGB_LINEAR_THRESHOLD {
        linear * 12.92
    } else {
        1.055 * linear.powf(1.0 / 2.4) - 0.055
    }
}

fn floor_scale(s: f32) -> f32 {
    // f32::max returns the non-NaN operand.
    s.max(SCALE_FLOOR)
}

fn clamp_unit(c: f32) -> f32 {
    if c.is_nan() { 0.0 } else { c.clamp(0.0, 1.0) }
}

fn clamp_opacity(a: f32) -> f32 {
    if a.is_nan() {
        OPACITY_EPSILON
    } else {
        a.clamp(OPACITY_EPSILON, 1.0 - OPACITY_EPSILON)
    }
}

fn normalize_quat(q: [f32; 4]) -> [f32; 4] {
    let norm = q.iter().map(|v| v * v).sum::<f32>().sqrt();
    if !norm.is_finite() || norm <= f32::EPSILON {
        return [1.0, 0.0, 0.0, 0.0];
    }
    q.map(|v| v / norm)
}
