//! CPU reference of the voxel pipeline.
//!
//! [`CpuVoxelVolume`] runs the same stages as the GPU programs (fragment
//! append with a capacity, fixed-point accumulation, aggregate, filters and
//! shift) over a scene of axis-aligned boxes. It backs the pipeline tests and
//! is handy for inspecting radiance without a GPU.

use bevy::prelude::*;

use crate::config::{MipmapFilterMode, VxgiConfig};
use crate::fragment::{linear_index, voxel_from_index, VoxelFragment};
use crate::frustum::ProjectionAxis;
use crate::light::{collect_light_sources, LightKind, LightSource, VisibleLight};
use crate::pyramid::PyramidLayout;
use crate::refresh::{run_refresh, RefreshPlan, RefreshStages, VolumePlacement};

/// Fixed-point scale of the radiance accumulators.
pub const ACCUMULATOR_SCALE: f32 = 256.0;

/// Largest single-fragment channel value the accumulators accept.
pub const MAX_FRAGMENT_RADIANCE: f32 = 65535.0;

/// Longest shadow march, in voxels.
pub const MAX_SHADOW_STEPS: u32 = 128;

/// Dense RGBA volume. Alpha is occupancy.
#[derive(Clone, Debug, PartialEq)]
pub struct RadianceVolume {
    size: u32,
    data: Vec<Vec4>,
}

impl RadianceVolume {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            data: vec![Vec4::ZERO; (size * size * size) as usize],
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn get(&self, voxel: UVec3) -> Vec4 {
        self.data[linear_index(voxel, self.size) as usize]
    }

    /// `None` outside the volume.
    pub fn try_get(&self, voxel: IVec3) -> Option<Vec4> {
        let size = self.size as i32;
        if voxel.cmplt(IVec3::ZERO).any() || voxel.cmpge(IVec3::splat(size)).any() {
            return None;
        }
        Some(self.get(voxel.as_uvec3()))
    }

    pub fn set(&mut self, voxel: UVec3, value: Vec4) {
        let index = linear_index(voxel, self.size) as usize;
        self.data[index] = value;
    }

    pub fn voxels(&self) -> impl Iterator<Item = UVec3> + '_ {
        (0..self.data.len() as u32).map(|i| voxel_from_index(i, self.size))
    }

    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|v| *v == Vec4::ZERO)
    }
}

/// Per-axis taps `(offset from 2 * target, weight)` of a filter kernel.
pub fn filter_taps(mode: MipmapFilterMode) -> &'static [(i32, f32)] {
    match mode {
        MipmapFilterMode::Box => &[(0, 1.0), (1, 1.0)],
        MipmapFilterMode::Gaussian3x3x3 => &[(-1, 1.0), (0, 2.0), (1, 1.0)],
        MipmapFilterMode::Gaussian4x4x4 => &[(-1, 1.0), (0, 3.0), (1, 3.0), (2, 1.0)],
    }
}

/// Downsample `source` into a volume of `target_size`.
///
/// Taps outside the source are skipped and the remaining weights
/// renormalized.
pub fn filter_level(mode: MipmapFilterMode, source: &RadianceVolume, target_size: u32) -> RadianceVolume {
    let taps = filter_taps(mode);
    let mut target = RadianceVolume::new(target_size);

    for index in 0..target_size.pow(3) {
        let voxel = voxel_from_index(index, target_size);
        let base = voxel.as_ivec3() * 2;
        let mut sum = Vec4::ZERO;
        let mut weight = 0.0;
        for &(oz, wz) in taps {
            for &(oy, wy) in taps {
                for &(ox, wx) in taps {
                    if let Some(value) = source.try_get(base + IVec3::new(ox, oy, oz)) {
                        let w = wx * wy * wz;
                        sum += value * w;
                        weight += w;
                    }
                }
            }
        }
        if weight > 0.0 {
            target.set(voxel, sum / weight);
        }
    }

    target
}

/// Move contents so that `new[v] = old[v + displacement]`, zero outside.
pub fn shift_volume(source: &RadianceVolume, displacement: IVec3) -> RadianceVolume {
    let mut target = RadianceVolume::new(source.size());
    for voxel in source.voxels() {
        if let Some(value) = source.try_get(voxel.as_ivec3() + displacement) {
            target.set(voxel, value);
        }
    }
    target
}

/// Direct light reaching a surface point, before albedo.
///
/// `occupancy` returns the opacity of a voxel-space point, used to shadow
/// the light.
pub fn direct_light(
    light: &LightSource,
    position: Vec3,
    normal: Vec3,
    voxel_size: f32,
    occupancy: impl Fn(Vec3) -> f32,
) -> Vec3 {
    let color = Vec3::from_array(light.color);
    let direction = Vec3::from_array(light.direction);

    let (to_light, distance, attenuation) = if light.kind == LightKind::Directional.gpu_kind() {
        (-direction, MAX_SHADOW_STEPS as f32, 1.0)
    } else {
        let offset = Vec3::from_array(light.position) - position;
        let distance = offset.length();
        if distance >= light.range || distance <= 0.0 {
            return Vec3::ZERO;
        }
        let falloff = (1.0 - (distance / light.range).powi(2)).clamp(0.0, 1.0);
        let world_distance = distance * voxel_size;
        let mut attenuation = falloff * falloff / (world_distance * world_distance).max(1e-4);
        let to_light = offset / distance;
        if light.kind == LightKind::Spot.gpu_kind() && direction.dot(-to_light) < light.spot_cos {
            attenuation = 0.0;
        }
        (to_light, distance, attenuation)
    };

    let n_dot_l = normal.dot(to_light).max(0.0);
    if n_dot_l <= 0.0 || attenuation <= 0.0 {
        return Vec3::ZERO;
    }

    // March from one voxel off the surface towards the light.
    let mut visibility = 1.0;
    let steps = (distance.floor() as u32).min(MAX_SHADOW_STEPS);
    for step in 1..steps {
        let sample = position + normal + to_light * step as f32;
        visibility *= 1.0 - occupancy(sample).clamp(0.0, 1.0);
        if visibility < 0.01 {
            return Vec3::ZERO;
        }
    }

    color * n_dot_l * attenuation * visibility
}

/// Axis-aligned box of the reference scene.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneBox {
    pub min: Vec3,
    pub max: Vec3,
    pub albedo: Vec4,
    pub emission: Vec3,
}

/// Reference scene: boxes and lights in world space.
#[derive(Clone, Debug, Default)]
pub struct CpuScene {
    pub boxes: Vec<SceneBox>,
    pub lights: Vec<VisibleLight>,
}

/// CPU implementation of the refresh stages.
#[derive(Clone, Debug)]
pub struct CpuVoxelVolume {
    pub scene: CpuScene,
    mode: MipmapFilterMode,
    samples: u32,
    capacity: u32,
    layout: PyramidLayout,
    plan: Option<RefreshPlan>,
    /// Append buffer contents, at most `capacity` entries
    pub fragments: Vec<VoxelFragment>,
    /// Append counter, may run past `capacity`
    pub counter: u32,
    pub lights: Vec<LightSource>,
    accum_rg: Vec<u32>,
    accum_ba: Vec<u32>,
    accum_count: Vec<u32>,
    pub pyramid: Vec<RadianceVolume>,
    /// Pyramid as last published
    pub published: Option<Vec<RadianceVolume>>,
    /// Lights of the last published refresh
    pub published_lights: Vec<LightSource>,
    placement: Option<VolumePlacement>,
}

impl CpuVoxelVolume {
    pub fn new(config: &VxgiConfig, scene: CpuScene) -> Self {
        let layout = PyramidLayout::new(config.effective_resolution());
        let pyramid = layout.sizes().iter().map(|&s| RadianceVolume::new(s)).collect();
        Self {
            scene,
            mode: config.mipmap_filter_mode,
            samples: config.anti_aliasing.samples(),
            capacity: config.fragment_capacity(),
            layout,
            plan: None,
            fragments: Vec::new(),
            counter: 0,
            lights: Vec::new(),
            accum_rg: Vec::new(),
            accum_ba: Vec::new(),
            accum_count: Vec::new(),
            pyramid,
            published: None,
            published_lights: Vec::new(),
            placement: None,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn resolution(&self) -> u32 {
        self.layout.resolution()
    }

    /// Where the published pyramid sits, `None` before the first publish.
    pub fn placement(&self) -> Option<VolumePlacement> {
        self.placement
    }

    /// Run the whole sequence of `plan`, shifting from the published volume.
    pub fn refresh(&mut self, plan: &RefreshPlan) {
        debug_assert_eq!(plan.resolution, self.resolution());
        let plan = plan.rebased(self.placement);
        self.plan = Some(plan);
        run_refresh(self, &plan);
    }

    fn append(&mut self, fragment: VoxelFragment) {
        if self.counter < self.capacity {
            self.fragments.push(fragment);
        }
        self.counter += 1;
    }

    fn voxelize_box(&mut self, scene_box: &SceneBox, plan: &RefreshPlan) {
        let r = self.resolution();
        let lo = plan.world_to_voxel.transform_point3(scene_box.min);
        let hi = plan.world_to_voxel.transform_point3(scene_box.max);

        for axis in ProjectionAxis::ALL {
            let (a, u, v) = match axis {
                ProjectionAxis::X => (0, 2, 1),
                ProjectionAxis::Y => (1, 0, 2),
                ProjectionAxis::Z => (2, 0, 1),
            };
            for (depth, sign) in [(lo[a], -1.0), (hi[a], 1.0)] {
                // Depth clipping against the volume slab
                if !(0.0..=r as f32).contains(&depth) {
                    continue;
                }
                let layer = (depth.floor() as u32).min(r - 1);
                let mut normal = Vec3::ZERO;
                normal[a] = sign;

                for pu in 0..r {
                    let cu = pu as f32 + 0.5;
                    if cu < lo[u] || cu >= hi[u] {
                        continue;
                    }
                    for pv in 0..r {
                        let cv = pv as f32 + 0.5;
                        if cv < lo[v] || cv >= hi[v] {
                            continue;
                        }
                        let mut voxel = UVec3::ZERO;
                        voxel[a] = layer;
                        voxel[u] = pu;
                        voxel[v] = pv;
                        let fragment = VoxelFragment::new(
                            voxel,
                            r,
                            scene_box.albedo,
                            normal,
                            scene_box.emission,
                        );
                        for _ in 0..self.samples {
                            self.append(fragment);
                        }
                    }
                }
            }
        }
    }
}

impl RefreshStages for CpuVoxelVolume {
    fn shift(&mut self, displacement: IVec3) {
        self.pyramid[0] = shift_volume(&self.pyramid[0], displacement);
    }

    fn voxelize(&mut self) {
        let Some(plan) = self.plan else {
            return;
        };
        self.counter = 0;
        self.fragments.clear();

        let frustum = plan.frustum;
        let visible: Vec<VisibleLight> = self
            .scene
            .lights
            .iter()
            .filter(|l| l.kind == LightKind::Directional || frustum.intersects_sphere(l.position, l.range))
            .copied()
            .collect();
        self.lights = collect_light_sources(&visible, plan.world_to_voxel, plan.voxel_size);

        let boxes: Vec<SceneBox> = self
            .scene
            .boxes
            .iter()
            .filter(|b| frustum.intersects_aabb(b.min, b.max))
            .copied()
            .collect();
        for scene_box in &boxes {
            self.voxelize_box(scene_box, &plan);
        }
    }

    fn shade(&mut self) {
        let Some(plan) = self.plan else {
            return;
        };
        let r = self.resolution();
        let volume = (r * r * r) as usize;

        // Clear
        self.accum_rg = vec![0; volume * 2];
        self.accum_ba = vec![0; volume * 2];
        self.accum_count = vec![0; volume];

        // Render
        let previous = &self.pyramid[0];
        let occupancy = |p: Vec3| previous.try_get(p.floor().as_ivec3()).map_or(0.0, |v| v.w);
        let live = self.counter.min(self.capacity) as usize;
        for fragment in &self.fragments[..live] {
            let voxel = voxel_from_index(fragment.voxel_index, r);
            let position = voxel.as_vec3() + Vec3::splat(0.5);
            let normal = fragment.normal();
            let albedo = fragment.albedo();

            let mut radiance = Vec3::from_array(fragment.emission);
            for light in &self.lights {
                radiance += albedo.truncate()
                    * direct_light(light, position, normal, plan.voxel_size, occupancy);
            }
            let radiance = radiance.extend(1.0).min(Vec4::splat(MAX_FRAGMENT_RADIANCE));
            let fixed = (radiance * ACCUMULATOR_SCALE).round().as_uvec4();

            let i = fragment.voxel_index as usize;
            self.accum_rg[i * 2] = self.accum_rg[i * 2].wrapping_add(fixed.x);
            self.accum_rg[i * 2 + 1] = self.accum_rg[i * 2 + 1].wrapping_add(fixed.y);
            self.accum_ba[i * 2] = self.accum_ba[i * 2].wrapping_add(fixed.z);
            self.accum_ba[i * 2 + 1] = self.accum_ba[i * 2 + 1].wrapping_add(fixed.w);
            self.accum_count[i] += 1;
        }

        // Aggregate
        let mut level0 = RadianceVolume::new(r);
        for (i, &count) in self.accum_count.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let sum = UVec4::new(
                self.accum_rg[i * 2],
                self.accum_rg[i * 2 + 1],
                self.accum_ba[i * 2],
                self.accum_ba[i * 2 + 1],
            );
            level0.set(
                voxel_from_index(i as u32, r),
                sum.as_vec4() / (ACCUMULATOR_SCALE * count as f32),
            );
        }
        self.pyramid[0] = level0;
    }

    fn filter(&mut self) {
        for level in 1..self.layout.len() {
            let target = filter_level(self.mode, &self.pyramid[level - 1], self.layout.size(level));
            self.pyramid[level] = target;
        }
    }

    fn publish(&mut self) {
        self.published = Some(self.pyramid.clone());
        self.published_lights = self.lights.clone();
        self.placement = self.plan.map(|plan| plan.placement());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AntiAliasing, VoxelResolution};
    use crate::refresh::plan_refresh;
    use crate::volume::VoxelVolumeState;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn cornell_scene() -> CpuScene {
        CpuScene {
            boxes: vec![
                // Floor
                SceneBox {
                    min: Vec3::new(-4.0, -4.0, -4.0),
                    max: Vec3::new(4.0, -3.5, 4.0),
                    albedo: Vec4::new(0.8, 0.8, 0.8, 1.0),
                    emission: Vec3::ZERO,
                },
                // Red wall
                SceneBox {
                    min: Vec3::new(-4.0, -4.0, -4.0),
                    max: Vec3::new(-3.5, 4.0, 4.0),
                    albedo: Vec4::new(0.9, 0.1, 0.1, 1.0),
                    emission: Vec3::ZERO,
                },
                // Emissive block
                SceneBox {
                    min: Vec3::new(-1.0, -3.5, -1.0),
                    max: Vec3::new(1.0, -1.5, 1.0),
                    albedo: Vec4::ONE,
                    emission: Vec3::new(2.0, 1.5, 1.0),
                },
            ],
            lights: vec![VisibleLight {
                kind: LightKind::Point,
                position: Vec3::new(0.0, 3.0, 0.0),
                direction: Vec3::NEG_Y,
                color: Vec3::new(40.0, 40.0, 40.0),
                range: 12.0,
                spot_angle: 0.0,
            }],
        }
    }

    fn refresh(
        volume: &mut CpuVoxelVolume,
        state: &mut VoxelVolumeState,
        config: &VxgiConfig,
        now: f64,
    ) -> RefreshPlan {
        let plan = plan_refresh(state, config, now, None).expect("refresh due");
        volume.refresh(&plan);
        plan
    }

    #[test]
    fn test_shift_zero_then_filter_matches_filter() {
        let config = VxgiConfig::default();
        let mut state = VoxelVolumeState::from_config(&config);
        let mut volume = CpuVoxelVolume::new(&config, cornell_scene());
        refresh(&mut volume, &mut state, &config, 0.0);

        let mut filtered = volume.clone();
        filtered.filter();

        let mut shifted = volume.clone();
        shifted.shift(IVec3::ZERO);
        shifted.filter();

        assert_eq!(shifted.pyramid, filtered.pyramid);
    }

    #[test]
    fn test_static_scene_does_not_drift() {
        let config = VxgiConfig::default();
        assert_eq!(config.effective_resolution(), 64);
        assert_eq!(config.bound, 10.0);

        // Emission only: the first two refreshes already agree.
        let mut scene = cornell_scene();
        scene.lights.clear();
        let mut state = VoxelVolumeState::from_config(&config);
        let mut volume = CpuVoxelVolume::new(&config, scene);
        refresh(&mut volume, &mut state, &config, 0.0);
        let first = volume.published.clone().unwrap();
        refresh(&mut volume, &mut state, &config, 1.0);
        assert_eq!(volume.published.clone().unwrap(), first);

        // Lit: the first refresh primes occupancy for shadows, after which
        // every refresh reproduces the same pyramid.
        let mut state = VoxelVolumeState::from_config(&config);
        let mut volume = CpuVoxelVolume::new(&config, cornell_scene());
        refresh(&mut volume, &mut state, &config, 0.0);
        refresh(&mut volume, &mut state, &config, 1.0);
        let second = volume.published.clone().unwrap();
        refresh(&mut volume, &mut state, &config, 2.0);
        assert_eq!(volume.published.clone().unwrap(), second);
        assert!(!second[0].is_empty());
    }

    /// Stages that stop after the shift so the shifted level 0 can be read.
    struct ShiftOnly<'a>(&'a mut CpuVoxelVolume);

    impl RefreshStages for ShiftOnly<'_> {
        fn shift(&mut self, displacement: IVec3) {
            self.0.shift(displacement);
        }
        fn voxelize(&mut self) {}
        fn shade(&mut self) {}
        fn filter(&mut self) {
            self.0.filter();
        }
        fn publish(&mut self) {}
    }

    #[test]
    fn test_one_voxel_move_shifts_then_matches_fresh_volume() {
        // Power-of-two voxels keep voxel-space coordinates exact, so the
        // moved and fresh volumes can be compared bit for bit.
        let mut config = VxgiConfig {
            bound: 16.0,
            ..default()
        };
        let mut state = VoxelVolumeState::from_config(&config);
        let mut volume = CpuVoxelVolume::new(&config, cornell_scene());
        refresh(&mut volume, &mut state, &config, 0.0);
        refresh(&mut volume, &mut state, &config, 1.0);
        let before = volume.pyramid[0].clone();

        config.center.x += config.voxel_size();
        let plan = plan_refresh(&mut state, &config, 2.0, None).unwrap();
        assert_eq!(plan.displacement, IVec3::X);

        // Shift alone: translated by one voxel, exposed x = max slice zeroed
        let mut shifted = volume.clone();
        run_refresh(&mut ShiftOnly(&mut shifted), &plan);
        let level0 = &shifted.pyramid[0];
        let max = level0.size() - 1;
        for voxel in level0.voxels() {
            if voxel.x == max {
                assert_eq!(level0.get(voxel), Vec4::ZERO);
            } else {
                assert_eq!(level0.get(voxel), before.get(voxel + UVec3::X));
            }
        }

        // Full refresh: identical to a volume built from scratch at the new
        // center once that one has primed its shadow occupancy.
        volume.refresh(&plan);

        let mut fresh_state = VoxelVolumeState::from_config(&config);
        let mut fresh = CpuVoxelVolume::new(&config, cornell_scene());
        refresh(&mut fresh, &mut fresh_state, &config, 0.0);
        refresh(&mut fresh, &mut fresh_state, &config, 1.0);
        assert_eq!(volume.pyramid, fresh.pyramid);
    }

    #[test]
    fn test_skipped_refresh_keeps_its_shift() {
        let mut config = VxgiConfig {
            bound: 16.0,
            ..default()
        };
        let mut state = VoxelVolumeState::from_config(&config);
        let mut volume = CpuVoxelVolume::new(&config, cornell_scene());
        refresh(&mut volume, &mut state, &config, 0.0);
        refresh(&mut volume, &mut state, &config, 1.0);
        let before = volume.pyramid[0].clone();

        // First move is planned but never reaches the volume.
        config.center.x += config.voxel_size();
        plan_refresh(&mut state, &config, 2.0, None).unwrap();
        config.center.x += config.voxel_size();
        let plan = plan_refresh(&mut state, &config, 3.0, None).unwrap();
        assert_eq!(plan.displacement, IVec3::X);

        let rebased = plan.rebased(volume.placement());
        assert_eq!(rebased.displacement, IVec3::new(2, 0, 0));
        let mut shifted = volume.clone();
        run_refresh(&mut ShiftOnly(&mut shifted), &rebased);
        let level0 = &shifted.pyramid[0];
        for voxel in level0.voxels().filter(|v| v.x + 2 < level0.size()) {
            assert_eq!(level0.get(voxel), before.get(voxel + UVec3::new(2, 0, 0)));
        }

        volume.refresh(&plan);
        let mut fresh_state = VoxelVolumeState::from_config(&config);
        let mut fresh = CpuVoxelVolume::new(&config, cornell_scene());
        refresh(&mut fresh, &mut fresh_state, &config, 0.0);
        refresh(&mut fresh, &mut fresh_state, &config, 1.0);
        assert_eq!(volume.pyramid, fresh.pyramid);
        assert_eq!(volume.placement(), Some(plan.placement()));
    }

    #[test]
    fn test_publish_exposes_lights_of_the_refresh() {
        let config = VxgiConfig::default();
        let mut state = VoxelVolumeState::from_config(&config);
        let mut volume = CpuVoxelVolume::new(&config, cornell_scene());
        assert!(volume.published_lights.is_empty());
        refresh(&mut volume, &mut state, &config, 0.0);
        assert_eq!(volume.published_lights.len(), 1);
        assert_eq!(volume.published_lights, volume.lights);
    }

    #[test]
    fn test_black_light_is_not_uploaded() {
        let config = VxgiConfig::default();
        let mut scene = cornell_scene();
        scene.lights[0].color = Vec3::ZERO;
        let mut state = VoxelVolumeState::from_config(&config);
        let mut volume = CpuVoxelVolume::new(&config, scene);
        refresh(&mut volume, &mut state, &config, 0.0);
        assert!(volume.lights.is_empty());
    }

    #[test]
    fn test_empty_voxels_have_zero_radiance() {
        let config = VxgiConfig::default();
        let mut state = VoxelVolumeState::from_config(&config);
        let mut volume = CpuVoxelVolume::new(&config, CpuScene::default());
        refresh(&mut volume, &mut state, &config, 0.0);
        assert_eq!(volume.counter, 0);
        assert!(volume.pyramid.iter().all(RadianceVolume::is_empty));
    }

    #[test]
    fn test_filters_preserve_constant_volumes() {
        for (mode, size) in [
            (MipmapFilterMode::Box, 8),
            (MipmapFilterMode::Gaussian3x3x3, 9),
            (MipmapFilterMode::Gaussian4x4x4, 8),
        ] {
            let mut source = RadianceVolume::new(size);
            for voxel in RadianceVolume::new(size).voxels() {
                source.set(voxel, Vec4::new(0.5, 0.25, 1.0, 1.0));
            }
            let layout = PyramidLayout::new(size);
            let target = filter_level(mode, &source, layout.size(1));
            for voxel in target.voxels() {
                assert!(target.get(voxel).abs_diff_eq(Vec4::new(0.5, 0.25, 1.0, 1.0), 1e-6));
            }
        }
    }

    #[test]
    fn test_box_filter_averages_eight_voxels() {
        let mut source = RadianceVolume::new(2);
        source.set(UVec3::ZERO, Vec4::splat(8.0));
        let target = filter_level(MipmapFilterMode::Box, &source, 1);
        assert_eq!(target.get(UVec3::ZERO), Vec4::ONE);
    }

    #[test]
    fn test_fragment_count_within_capacity_for_worst_case_scenes() {
        for resolution in [VoxelResolution::Low, VoxelResolution::Medium] {
            for aa in [AntiAliasing::X1, AntiAliasing::X8] {
                for mode in [MipmapFilterMode::Box, MipmapFilterMode::Gaussian3x3x3] {
                    let config = VxgiConfig {
                        resolution,
                        anti_aliasing: aa,
                        mipmap_filter_mode: mode,
                        ..default()
                    };
                    // A box hugging the volume projects every face onto the
                    // full viewport.
                    let scene = CpuScene {
                        boxes: vec![SceneBox {
                            min: Vec3::splat(-5.0),
                            max: Vec3::splat(4.99),
                            albedo: Vec4::ONE,
                            emission: Vec3::ONE,
                        }],
                        lights: Vec::new(),
                    };
                    let mut state = VoxelVolumeState::from_config(&config);
                    let mut volume = CpuVoxelVolume::new(&config, scene);
                    refresh(&mut volume, &mut state, &config, 0.0);
                    assert!(volume.counter > 0);
                    assert!(
                        volume.counter <= volume.capacity(),
                        "{:?} {:?} {:?}: {} > {}",
                        resolution,
                        aa,
                        mode,
                        volume.counter,
                        volume.capacity()
                    );
                }
            }
        }
    }

    #[test]
    fn test_random_scenes_stay_within_capacity() {
        let config = VxgiConfig {
            resolution: VoxelResolution::Low,
            ..default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        let boxes = (0..8)
            .map(|_| {
                let min = Vec3::new(
                    rng.gen_range(-5.0..4.0),
                    rng.gen_range(-5.0..4.0),
                    rng.gen_range(-5.0..4.0),
                );
                let size = Vec3::new(
                    rng.gen_range(0.2..3.0),
                    rng.gen_range(0.2..3.0),
                    rng.gen_range(0.2..3.0),
                );
                SceneBox {
                    min,
                    max: min + size,
                    albedo: Vec4::ONE,
                    emission: Vec3::ONE,
                }
            })
            .collect();
        let mut state = VoxelVolumeState::from_config(&config);
        let mut volume = CpuVoxelVolume::new(&config, CpuScene { boxes, lights: Vec::new() });
        refresh(&mut volume, &mut state, &config, 0.0);
        assert!(volume.counter <= volume.capacity());
        assert_eq!(volume.fragments.len() as u32, volume.counter);
    }
}
