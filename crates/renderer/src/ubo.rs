//! Uniform buffer object definitions for shaders.
//!
//! These structures must match the GLSL uniform block layouts exactly.
//! All structures use `#[repr(C)]` for predictable memory layout and implement
//! `Pod` and `Zeroable` for safe byte casting.

use std::time::Duration;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Rotation speed of the model, in degrees per second.
pub const ROTATION_DEGREES_PER_SECOND: f32 = 90.0;

/// Camera position the view matrix looks from.
pub const EYE: Vec3 = Vec3::new(2.0, 2.0, 2.0);

/// Vertical field of view, in degrees.
pub const FOV_Y_DEGREES: f32 = 45.0;

pub const Z_NEAR: f32 = 0.1;
pub const Z_FAR: f32 = 10.0;

/// Per-frame transform data.
///
/// This structure matches the `UniformBufferObject` block (set 0, binding 0)
/// of the vertex shader.
///
/// # Memory Layout
///
/// - Offset 0: model matrix (64 bytes)
/// - Offset 64: view matrix (64 bytes)
/// - Offset 128: projection matrix (64 bytes)
/// - Total size: 192 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TransformUbo {
    /// Model matrix (object to world space).
    pub model: Mat4,
    /// View matrix (world to view space).
    pub view: Mat4,
    /// Projection matrix (view to Vulkan clip space).
    pub proj: Mat4,
}

impl TransformUbo {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Transform `elapsed` after start, rendered into `extent`.
    ///
    /// A pure function of its inputs: the model spins about +Z, the camera
    /// looks at the origin from [`EYE`] with +Z up, and the projection has
    /// its Y axis flipped for Vulkan's clip space.
    pub fn at(elapsed: Duration, extent: vk::Extent2D) -> Self {
        // Wrapped to one turn in f64 so the angle keeps full f32 precision
        // however long the process runs.
        let turn_secs = 360.0 / f64::from(ROTATION_DEGREES_PER_SECOND);
        let secs = elapsed.as_secs_f64().rem_euclid(turn_secs) as f32;
        let model = Mat4::from_rotation_z(secs * ROTATION_DEGREES_PER_SECOND.to_radians());
        let view = Mat4::look_at_rh(EYE, Vec3::ZERO, Vec3::Z);

        // A minimized window can report a zero height.
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let mut proj = Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, Z_NEAR, Z_FAR);
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn secs(s: f32) -> Duration {
        Duration::from_secs_f32(s)
    }

    #[test]
    fn test_transform_ubo_size() {
        // 3 Mat4 (3 * 64) = 192 bytes
        assert_eq!(TransformUbo::SIZE, 192);
    }

    #[test]
    fn test_transform_ubo_alignment() {
        // Mat4 requires 16-byte alignment
        assert_eq!(std::mem::align_of::<TransformUbo>(), 16);
    }

    #[test]
    fn test_model_starts_at_identity() {
        let ubo = TransformUbo::at(secs(0.0), extent(800, 600));
        assert!(ubo.model.abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn test_model_quarter_turn_per_second() {
        let ubo = TransformUbo::at(secs(1.0), extent(800, 600));
        let x = ubo.model * Vec4::new(1.0, 0.0, 0.0, 1.0);

        assert!((x.x).abs() < 1e-5);
        assert!((x.y - 1.0).abs() < 1e-5);
        assert!((x.z).abs() < 1e-5);
    }

    #[test]
    fn test_view_looks_at_origin() {
        let ubo = TransformUbo::at(secs(0.0), extent(800, 600));
        let origin = ubo.view * Vec4::new(0.0, 0.0, 0.0, 1.0);

        // The origin lies straight ahead on the -Z view axis.
        assert!(origin.x.abs() < 1e-5);
        assert!(origin.y.abs() < 1e-5);
        assert!((origin.z + EYE.length()).abs() < 1e-5);
    }

    #[test]
    fn test_projection_flips_y_and_uses_aspect() {
        let ubo = TransformUbo::at(secs(0.0), extent(800, 600));
        let expected =
            Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), 800.0 / 600.0, Z_NEAR, Z_FAR);

        assert_eq!(ubo.proj.y_axis.y, -expected.y_axis.y);
        assert_eq!(ubo.proj.x_axis.x, expected.x_axis.x);
        assert!(ubo.proj.y_axis.y < 0.0);
    }

    #[test]
    fn test_zero_height_does_not_produce_nan() {
        let ubo = TransformUbo::at(secs(0.5), extent(800, 0));
        assert!(!ubo.proj.is_nan());
    }

    #[test]
    fn test_transform_is_pure() {
        let a = TransformUbo::at(secs(2.25), extent(1024, 768));
        let b = TransformUbo::at(secs(2.25), extent(1024, 768));
        assert_eq!(a, b);
    }

    #[test]
    fn test_ubo_pod_zeroable() {
        let ubo = TransformUbo::at(secs(0.0), extent(800, 600));
        let bytes: &[u8] = bytemuck::bytes_of(&ubo);
        assert_eq!(bytes.len(), TransformUbo::SIZE);
    }

    #[test]
    fn test_rotation_wraps_every_full_turn() {
        let start = TransformUbo::at(Duration::from_secs(1), extent(800, 600));
        let later = TransformUbo::at(Duration::from_secs(1 + 4 * 250_000), extent(800, 600));
        assert_eq!(start.model, later.model);
    }

    #[test]
    fn test_rotation_keeps_precision_after_hours() {
        // 10 hours and half a second: an eighth of a turn past the last wrap.
        let ubo = TransformUbo::at(Duration::from_millis(36_000_500), extent(800, 600));
        let expected = Mat4::from_rotation_z(45f32.to_radians());
        assert!(ubo.model.abs_diff_eq(expected, 1e-6));
    }
}
