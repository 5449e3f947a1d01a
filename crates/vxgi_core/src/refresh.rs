//! Refresh orchestration.
//!
//! Each frame the volume is either left alone or fully refreshed:
//!
//! ```text
//! Idle ─ due? ─► [Shift + Filter if moved] ─► Voxelize ─► Shade ─► Filter ─► Publish
//! ```
//!
//! [`plan_refresh`] makes the per-frame decision. [`run_refresh`] drives a
//! [`RefreshStages`] implementation through the sequence; the GPU encoder and
//! the CPU reference volume both implement it.

use bevy::prelude::*;

use crate::config::VxgiConfig;
use crate::frustum::VoxelizationFrustum;
use crate::volume::{voxel_displacement, VoxelVolumeState};

/// One stage of a refresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshStep {
    /// Move level 0 by a voxel displacement, then rebuild the mips
    Shift(IVec3),
    Voxelize,
    Shade,
    Filter,
    Publish,
}

/// Everything needed to run one refresh.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RefreshPlan {
    pub displacement: IVec3,
    pub frustum: VoxelizationFrustum,
    pub resolution: u32,
    pub voxel_size: f32,
    pub voxel_to_world: Mat4,
    pub world_to_voxel: Mat4,
}

/// Where the pyramid of a published refresh sits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumePlacement {
    pub resolution: u32,
    pub voxel_size: f32,
    /// Grid-aligned world-space center
    pub center: Vec3,
}

impl RefreshPlan {
    pub fn placement(&self) -> VolumePlacement {
        VolumePlacement {
            resolution: self.resolution,
            voxel_size: self.voxel_size,
            center: self.frustum.center,
        }
    }

    /// Measure the displacement from the volume that was last published
    /// instead of the last planned one.
    ///
    /// A planned refresh that never ran leaves its movement to the next one
    /// that does. Without a published volume of the same layout there is
    /// nothing to move and the displacement is zero.
    pub fn rebased(mut self, published: Option<VolumePlacement>) -> Self {
        self.displacement = match published {
            Some(p) if p.resolution == self.resolution && p.voxel_size == self.voxel_size => {
                voxel_displacement(p.center, self.frustum.center, self.voxel_size)
            }
            _ => IVec3::ZERO,
        };
        self
    }

    pub fn steps(&self) -> Vec<RefreshStep> {
        let mut steps = Vec::with_capacity(5);
        if self.displacement != IVec3::ZERO {
            steps.push(RefreshStep::Shift(self.displacement));
        }
        steps.extend([
            RefreshStep::Voxelize,
            RefreshStep::Shade,
            RefreshStep::Filter,
            RefreshStep::Publish,
        ]);
        steps
    }
}

/// Backend executing the refresh stages, in call order.
pub trait RefreshStages {
    /// Move level 0 so that `new[v] = old[v + displacement]`. Voxels sourced
    /// from outside the volume become zero.
    fn shift(&mut self, displacement: IVec3);
    /// Rasterize the scene into voxel fragments.
    fn voxelize(&mut self);
    /// Clear, shade the fragments and aggregate into level 0.
    fn shade(&mut self);
    /// Rebuild levels 1.. from level 0.
    fn filter(&mut self);
    /// Make the pyramid and lights visible to lighting.
    fn publish(&mut self);
}

/// Run every step of `plan` against `stages`.
pub fn run_refresh<S: RefreshStages + ?Sized>(stages: &mut S, plan: &RefreshPlan) {
    for step in plan.steps() {
        match step {
            RefreshStep::Shift(displacement) => {
                stages.shift(displacement);
                stages.filter();
            }
            RefreshStep::Voxelize => stages.voxelize(),
            RefreshStep::Shade => stages.shade(),
            RefreshStep::Filter => stages.filter(),
            RefreshStep::Publish => stages.publish(),
        }
    }
}

/// Decide whether to refresh this frame and update `state` when it does.
///
/// A layout change (resolution, +1 addressing or bound) resets the state so
/// the next refresh starts from scratch without a shift. `follow_target`
/// overrides the configured center. Returns `None` when the refresh is not
/// due or the frustum is degenerate; in both cases `state` keeps its last
/// refresh time and center.
pub fn plan_refresh(
    state: &mut VoxelVolumeState,
    config: &VxgiConfig,
    now: f64,
    follow_target: Option<Vec3>,
) -> Option<RefreshPlan> {
    if state.layout_changed(config) {
        debug!(
            "VXGI volume layout changed to {}^3 over {}",
            config.effective_resolution(),
            config.bound
        );
        *state = VoxelVolumeState::from_config(config);
    }

    let target = match (config.follow_camera, follow_target) {
        (true, Some(target)) => target,
        _ => config.center,
    };
    state.set_center(target);

    if !state.is_refresh_due(now, config.refresh_interval()) {
        return None;
    }

    let Some(frustum) = VoxelizationFrustum::new(state) else {
        debug!("VXGI voxelization frustum is degenerate, skipping refresh");
        return None;
    };

    let plan = RefreshPlan {
        displacement: state.displacement(),
        frustum,
        resolution: state.resolution,
        voxel_size: state.voxel_size,
        voxel_to_world: state.voxel_to_world(),
        world_to_voxel: state.world_to_voxel(),
    };
    state.mark_refreshed(now);
    Some(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<&'static str>);

    impl RefreshStages for Recorder {
        fn shift(&mut self, _: IVec3) {
            self.0.push("shift");
        }
        fn voxelize(&mut self) {
            self.0.push("voxelize");
        }
        fn shade(&mut self) {
            self.0.push("shade");
        }
        fn filter(&mut self) {
            self.0.push("filter");
        }
        fn publish(&mut self) {
            self.0.push("publish");
        }
    }

    fn plan_at(state: &mut VoxelVolumeState, config: &VxgiConfig, now: f64) -> Option<RefreshPlan> {
        plan_refresh(state, config, now, None)
    }

    #[test]
    fn test_static_refresh_skips_shift() {
        let config = VxgiConfig::default();
        let mut state = VoxelVolumeState::from_config(&config);
        let plan = plan_at(&mut state, &config, 0.0).unwrap();

        let mut recorder = Recorder::default();
        run_refresh(&mut recorder, &plan);
        assert_eq!(recorder.0, vec!["voxelize", "shade", "filter", "publish"]);
    }

    #[test]
    fn test_moved_refresh_shifts_then_filters_first() {
        let mut config = VxgiConfig::default();
        let mut state = VoxelVolumeState::from_config(&config);
        plan_at(&mut state, &config, 0.0).unwrap();

        config.center.x += config.voxel_size();
        let plan = plan_at(&mut state, &config, 1.0).unwrap();
        assert_eq!(plan.displacement, IVec3::X);

        let mut recorder = Recorder::default();
        run_refresh(&mut recorder, &plan);
        assert_eq!(
            recorder.0,
            vec!["shift", "filter", "voxelize", "shade", "filter", "publish"]
        );
    }

    #[test]
    fn test_rate_limit_gates_refresh() {
        let config = VxgiConfig {
            limit_refresh_rate: true,
            refresh_rate: 30.0,
            ..default()
        };
        let mut state = VoxelVolumeState::from_config(&config);
        assert!(plan_at(&mut state, &config, 0.0).is_some());
        assert!(plan_at(&mut state, &config, 0.010).is_none());
        assert!(plan_at(&mut state, &config, 0.040).is_some());
        assert_eq!(state.refresh_count, 2);
    }

    #[test]
    fn test_follow_target_overrides_center() {
        let config = VxgiConfig {
            follow_camera: true,
            ..default()
        };
        let mut state = VoxelVolumeState::from_config(&config);
        plan_refresh(&mut state, &config, 0.0, Some(Vec3::ZERO)).unwrap();

        let step = config.voxel_size() * 3.0;
        let plan = plan_refresh(&mut state, &config, 1.0, Some(Vec3::new(0.0, step, 0.0))).unwrap();
        assert_eq!(plan.displacement, IVec3::new(0, 3, 0));
    }

    #[test]
    fn test_degenerate_frustum_keeps_state() {
        let config = VxgiConfig::default();
        let mut state = VoxelVolumeState::from_config(&config);
        plan_at(&mut state, &config, 0.0).unwrap();
        let before = state.clone();

        let broken = VxgiConfig {
            follow_camera: true,
            ..default()
        };
        let plan = plan_refresh(&mut state, &broken, 1.0, Some(Vec3::splat(f32::INFINITY)));
        assert!(plan.is_none());
        assert_eq!(state.last_refresh, before.last_refresh);
        assert_eq!(state.last_center, before.last_center);
        assert_eq!(state.refresh_count, 1);
    }

    #[test]
    fn test_rebase_accumulates_unpublished_moves() {
        let mut config = VxgiConfig::default();
        let mut state = VoxelVolumeState::from_config(&config);
        let published = plan_at(&mut state, &config, 0.0).unwrap().placement();

        // Planned but never run
        config.center.x += config.voxel_size();
        plan_at(&mut state, &config, 1.0).unwrap();

        config.center.x += config.voxel_size();
        let plan = plan_at(&mut state, &config, 2.0).unwrap();
        assert_eq!(plan.displacement, IVec3::X);
        assert_eq!(plan.rebased(Some(published)).displacement, IVec3::new(2, 0, 0));
    }

    #[test]
    fn test_rebase_without_matching_volume_does_not_shift() {
        let mut config = VxgiConfig::default();
        let mut state = VoxelVolumeState::from_config(&config);
        plan_at(&mut state, &config, 0.0).unwrap();
        config.center.y -= 2.0 * config.voxel_size();
        let plan = plan_at(&mut state, &config, 1.0).unwrap();
        assert_eq!(plan.rebased(None).displacement, IVec3::ZERO);

        let other = VolumePlacement {
            resolution: plan.resolution * 2,
            ..plan.placement()
        };
        assert_eq!(plan.rebased(Some(other)).displacement, IVec3::ZERO);
    }

    #[test]
    fn test_layout_change_resets_without_shift() {
        let mut config = VxgiConfig::default();
        let mut state = VoxelVolumeState::from_config(&config);
        plan_at(&mut state, &config, 0.0).unwrap();

        config.resolution = crate::config::VoxelResolution::High;
        config.center = Vec3::splat(3.0);
        let plan = plan_at(&mut state, &config, 1.0).unwrap();
        assert_eq!(plan.resolution, 128);
        assert_eq!(plan.displacement, IVec3::ZERO);
    }
}
