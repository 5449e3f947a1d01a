//! Voxel volume placement and refresh bookkeeping.

use bevy::prelude::*;

use crate::config::VxgiConfig;

/// Snap a world-space point down to the voxel grid.
pub fn snap_to_grid(point: Vec3, voxel_size: f32) -> Vec3 {
    (point / voxel_size).floor() * voxel_size
}

/// Whole-voxel displacement between two grid-aligned centers.
pub fn voxel_displacement(from: Vec3, to: Vec3, voxel_size: f32) -> IVec3 {
    ((to - from) / voxel_size).round().as_ivec3()
}

/// Placement and refresh history of the voxel volume.
///
/// Lives in the main world. `last_center` and `last_refresh` advance when a
/// refresh is planned. Backends measure the shift they apply from the volume
/// they last published (see [`crate::refresh::RefreshPlan::rebased`]), so a
/// planned refresh that never ran loses no movement.
#[derive(Resource, Clone, Debug, Default)]
pub struct VoxelVolumeState {
    /// Effective resolution the state was built for
    pub resolution: u32,
    pub bound: f32,
    pub voxel_size: f32,
    /// Grid-aligned world-space center of the volume
    pub center: Vec3,
    /// Center at the last planned refresh
    pub last_center: Vec3,
    /// Elapsed seconds at the last planned refresh, `None` before the first
    pub last_refresh: Option<f64>,
    pub refresh_count: u64,
}

impl VoxelVolumeState {
    pub fn from_config(config: &VxgiConfig) -> Self {
        let voxel_size = config.voxel_size();
        let center = snap_to_grid(config.center, voxel_size);
        Self {
            resolution: config.effective_resolution(),
            bound: config.bound,
            voxel_size,
            center,
            last_center: center,
            last_refresh: None,
            refresh_count: 0,
        }
    }

    /// Whether the layout derived from `config` differs from this state.
    /// A layout change discards all history.
    pub fn layout_changed(&self, config: &VxgiConfig) -> bool {
        self.resolution != config.effective_resolution() || self.bound != config.bound
    }

    /// Move the volume to `target`, snapped to the grid.
    pub fn set_center(&mut self, target: Vec3) {
        self.center = snap_to_grid(target, self.voxel_size);
    }

    /// World-space corner of voxel (0, 0, 0).
    pub fn origin(&self) -> Vec3 {
        self.center - Vec3::splat(0.5 * self.bound)
    }

    pub fn voxel_to_world(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(
            Vec3::splat(self.voxel_size),
            Quat::IDENTITY,
            self.origin(),
        )
    }

    pub fn world_to_voxel(&self) -> Mat4 {
        self.voxel_to_world().inverse()
    }

    /// World-space box covered by the volume.
    pub fn world_bounds(&self) -> (Vec3, Vec3) {
        let origin = self.origin();
        (origin, origin + Vec3::splat(self.voxel_size * self.resolution as f32))
    }

    /// Displacement, in voxels, since the last planned refresh.
    pub fn displacement(&self) -> IVec3 {
        voxel_displacement(self.last_center, self.center, self.voxel_size)
    }

    /// Refresh gate. With an interval, a refresh is due once at least that many
    /// seconds passed since the last one. The very first refresh is always due.
    pub fn is_refresh_due(&self, now: f64, interval: Option<f64>) -> bool {
        match (interval, self.last_refresh) {
            (Some(interval), Some(last)) => now - last >= interval,
            _ => true,
        }
    }

    /// Record a planned refresh.
    pub fn mark_refreshed(&mut self, now: f64) {
        self.last_center = self.center;
        self.last_refresh = Some(now);
        self.refresh_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> VoxelVolumeState {
        VoxelVolumeState::from_config(&VxgiConfig::default())
    }

    #[test]
    fn test_snap_to_grid_floors() {
        assert_eq!(snap_to_grid(Vec3::new(0.3, -0.1, 0.5), 0.25), Vec3::new(0.25, -0.25, 0.5));
    }

    #[test]
    fn test_voxel_to_world_maps_corners() {
        let state = state();
        let m = state.voxel_to_world();
        assert!(m.transform_point3(Vec3::ZERO).abs_diff_eq(Vec3::splat(-5.0), 1e-5));
        assert!(m.transform_point3(Vec3::splat(64.0)).abs_diff_eq(Vec3::splat(5.0), 1e-5));
        let back = state.world_to_voxel().transform_point3(Vec3::splat(5.0));
        assert!(back.abs_diff_eq(Vec3::splat(64.0), 1e-4));
    }

    #[test]
    fn test_displacement_rounds_to_whole_voxels() {
        let mut state = state();
        let size = state.voxel_size;
        state.set_center(Vec3::new(size * 1.2, 0.0, -size * 2.0));
        assert_eq!(state.displacement(), IVec3::new(1, 0, -2));

        state.mark_refreshed(0.0);
        assert_eq!(state.displacement(), IVec3::ZERO);
    }

    #[test]
    fn test_refresh_gate() {
        let mut state = state();
        let interval = Some(1.0 / 30.0);
        assert!(state.is_refresh_due(0.0, interval));
        state.mark_refreshed(0.0);

        assert!(!state.is_refresh_due(0.010, interval));
        assert!(state.is_refresh_due(0.034, interval));
        assert!(state.is_refresh_due(0.010, None));
    }

    #[test]
    fn test_layout_change_detection() {
        let state = state();
        let mut config = VxgiConfig::default();
        assert!(!state.layout_changed(&config));
        config.mipmap_filter_mode = crate::config::MipmapFilterMode::Gaussian3x3x3;
        assert!(state.layout_changed(&config));
    }
}
