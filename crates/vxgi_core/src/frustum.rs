//! Voxelization frustum.
//!
//! An orthographic box that exactly bounds the voxel volume. It is a plain
//! value: culling and the three per-axis projections are computed from it
//! directly instead of going through a scene camera.

use bevy::prelude::*;

use crate::volume::VoxelVolumeState;

/// Principal axis a voxelization draw projects along.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProjectionAxis {
    X,
    Y,
    Z,
}

impl ProjectionAxis {
    pub const ALL: [ProjectionAxis; 3] = [ProjectionAxis::X, ProjectionAxis::Y, ProjectionAxis::Z];

    /// Axis a triangle with `normal` is rasterized along.
    pub fn dominant(normal: Vec3) -> Self {
        let n = normal.abs();
        if n.x >= n.y && n.x >= n.z {
            ProjectionAxis::X
        } else if n.y >= n.z {
            ProjectionAxis::Y
        } else {
            ProjectionAxis::Z
        }
    }
}

/// Orthographic box around the voxel volume.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoxelizationFrustum {
    /// Grid-aligned center the box is placed at
    pub center: Vec3,
    /// World-space corner of voxel (0, 0, 0)
    pub origin: Vec3,
    /// World-space edge length covered by the voxels
    pub extent: f32,
}

impl VoxelizationFrustum {
    /// Build the frustum for `state`, `None` when it would be degenerate.
    pub fn new(state: &VoxelVolumeState) -> Option<Self> {
        let extent = state.voxel_size * state.resolution as f32;
        let valid = state.resolution > 0
            && state.bound.is_finite()
            && state.bound > 0.0
            && extent.is_finite()
            && extent > 0.0
            && state.center.is_finite();
        if !valid {
            return None;
        }
        Some(Self {
            center: state.center,
            origin: state.origin(),
            extent,
        })
    }

    pub fn min(&self) -> Vec3 {
        self.origin
    }

    pub fn max(&self) -> Vec3 {
        self.origin + Vec3::splat(self.extent)
    }

    /// Box overlap test against a world-space AABB.
    pub fn intersects_aabb(&self, min: Vec3, max: Vec3) -> bool {
        let (lo, hi) = (self.min(), self.max());
        min.cmple(hi).all() && max.cmpge(lo).all()
    }

    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        let closest = center.clamp(self.min(), self.max());
        closest.distance_squared(center) <= radius * radius
    }

    /// Maps world space to clip space for a draw projected along `axis`.
    ///
    /// The volume fills the whole viewport, and clip depth runs from 0 to 1
    /// through the volume along the projection axis.
    pub fn clip_from_world(&self, axis: ProjectionAxis) -> Mat4 {
        let to_unit = Mat4::from_scale(Vec3::splat(1.0 / self.extent))
            * Mat4::from_translation(-self.origin);
        let swizzle = match axis {
            ProjectionAxis::X => Mat4::from_cols(Vec4::Z, Vec4::Y, Vec4::X, Vec4::W),
            ProjectionAxis::Y => Mat4::from_cols(Vec4::X, Vec4::Z, Vec4::Y, Vec4::W),
            ProjectionAxis::Z => Mat4::IDENTITY,
        };
        let bias = Mat4::from_cols(
            Vec4::new(2.0, 0.0, 0.0, 0.0),
            Vec4::new(0.0, 2.0, 0.0, 0.0),
            Vec4::Z,
            Vec4::new(-1.0, -1.0, 0.0, 1.0),
        );
        bias * swizzle * to_unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VxgiConfig;

    fn frustum() -> VoxelizationFrustum {
        VoxelizationFrustum::new(&VoxelVolumeState::from_config(&VxgiConfig::default())).unwrap()
    }

    #[test]
    fn test_bounds_the_volume() {
        let f = frustum();
        assert!((f.extent - 10.0).abs() < 1e-5);
        assert!(f.min().abs_diff_eq(Vec3::splat(-5.0), 1e-5));
        assert!(f.max().abs_diff_eq(Vec3::splat(5.0), 1e-5));
    }

    #[test]
    fn test_degenerate_volume_has_no_frustum() {
        let mut state = VoxelVolumeState::from_config(&VxgiConfig::default());
        state.center = Vec3::new(f32::NAN, 0.0, 0.0);
        assert!(VoxelizationFrustum::new(&state).is_none());

        let mut state = VoxelVolumeState::from_config(&VxgiConfig::default());
        state.bound = 0.0;
        assert!(VoxelizationFrustum::new(&state).is_none());
    }

    #[test]
    fn test_culling() {
        let f = frustum();
        assert!(f.intersects_aabb(Vec3::splat(4.0), Vec3::splat(6.0)));
        assert!(!f.intersects_aabb(Vec3::splat(5.5), Vec3::splat(6.0)));
        assert!(f.intersects_sphere(Vec3::new(6.0, 0.0, 0.0), 1.5));
        assert!(!f.intersects_sphere(Vec3::new(7.0, 0.0, 0.0), 1.5));
    }

    #[test]
    fn test_clip_from_world_covers_viewport() {
        let f = frustum();
        for axis in ProjectionAxis::ALL {
            let m = f.clip_from_world(axis);
            let lo = m.project_point3(f.min());
            let hi = m.project_point3(f.max());
            assert!(lo.abs_diff_eq(Vec3::new(-1.0, -1.0, 0.0), 1e-5));
            assert!(hi.abs_diff_eq(Vec3::new(1.0, 1.0, 1.0), 1e-5));
        }
        // Depth follows the projection axis
        let m = f.clip_from_world(ProjectionAxis::X);
        let p = m.project_point3(Vec3::new(5.0, -5.0, -5.0));
        assert!(p.abs_diff_eq(Vec3::new(-1.0, -1.0, 1.0), 1e-5));
    }

    #[test]
    fn test_dominant_axis() {
        assert_eq!(ProjectionAxis::dominant(Vec3::new(-0.9, 0.3, 0.1)), ProjectionAxis::X);
        assert_eq!(ProjectionAxis::dominant(Vec3::new(0.1, 0.2, -0.95)), ProjectionAxis::Z);
        assert_eq!(ProjectionAxis::dominant(Vec3::Y), ProjectionAxis::Y);
    }
}
