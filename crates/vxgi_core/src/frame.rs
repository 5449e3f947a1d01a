//! Main-world side of a refresh.
//!
//! [`plan_vxgi_refresh`] runs once per frame after transform propagation. It
//! decides whether the volume refreshes, culls surfaces and lights against
//! the voxelization frustum and stores the result in [`VxgiFrame`], which is
//! extracted to the render world as a whole.

use bevy::prelude::*;
use bevy::render::extract_component::ExtractComponent;
use bevy::render::extract_resource::ExtractResource;
use bevy_mesh::VertexAttributeValues;

use crate::config::VxgiConfig;
use crate::frustum::VoxelizationFrustum;
use crate::light::{collect_light_sources, LightKind, LightSource, VisibleLight};
use crate::refresh::{plan_refresh, RefreshPlan};
use crate::volume::VoxelVolumeState;

/// Marks the camera the volume follows when
/// [`VxgiConfig::follow_camera`] is on. Only the first one found is used.
///
/// Cameras carrying it also receive the indirect lighting composite, which
/// needs `DepthPrepass` and `NormalPrepass` on the same entity.
#[derive(Component, Clone, Copy, Debug, Default, ExtractComponent)]
pub struct VxgiCamera;

/// Marks a `Mesh3d` entity as part of the voxelized scene.
#[derive(Component, Clone, Copy, Debug)]
pub struct VxgiSurface {
    pub albedo: Color,
    /// Linear emitted radiance, unaffected by exposure
    pub emission: LinearRgba,
}

impl Default for VxgiSurface {
    fn default() -> Self {
        Self {
            albedo: Color::WHITE,
            emission: LinearRgba::BLACK,
        }
    }
}

impl VxgiSurface {
    pub fn new(albedo: Color) -> Self {
        Self {
            albedo,
            ..default()
        }
    }

    pub fn emissive(albedo: Color, emission: LinearRgba) -> Self {
        Self { albedo, emission }
    }
}

/// A surface that overlaps the voxelization frustum this frame.
#[derive(Clone, Debug, PartialEq)]
pub struct VoxelizedSurface {
    pub mesh: AssetId<Mesh>,
    pub world_from_local: Mat4,
    /// Linear albedo
    pub albedo: Vec4,
    pub emission: Vec3,
}

/// Work for the render world, rebuilt every frame.
///
/// `plan` is `None` on frames that do not refresh; the render world then
/// keeps the last published pyramid.
#[derive(Resource, Clone, Debug, Default, ExtractResource)]
pub struct VxgiFrame {
    pub plan: Option<RefreshPlan>,
    pub surfaces: Vec<VoxelizedSurface>,
    pub lights: Vec<LightSource>,
    /// Number of refreshes planned so far, including this one
    pub refresh_count: u64,
}

impl VxgiFrame {
    pub fn is_refresh(&self) -> bool {
        self.plan.is_some()
    }
}

/// World-space AABB of a mesh under `world_from_local`.
pub fn mesh_world_bounds(mesh: &Mesh, world_from_local: &GlobalTransform) -> Option<(Vec3, Vec3)> {
    let Some(VertexAttributeValues::Float32x3(positions)) = mesh.attribute(Mesh::ATTRIBUTE_POSITION)
    else {
        return None;
    };
    let (mut lo, mut hi) = (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN));
    for p in positions {
        let p = Vec3::from_array(*p);
        lo = lo.min(p);
        hi = hi.max(p);
    }
    if positions.is_empty() {
        return None;
    }

    let (mut world_lo, mut world_hi) = (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN));
    for i in 0..8 {
        let corner = Vec3::new(
            if i & 1 == 0 { lo.x } else { hi.x },
            if i & 2 == 0 { lo.y } else { hi.y },
            if i & 4 == 0 { lo.z } else { hi.z },
        );
        let world = world_from_local.transform_point(corner);
        world_lo = world_lo.min(world);
        world_hi = world_hi.max(world);
    }
    Some((world_lo, world_hi))
}

fn linear_rgb(color: Color) -> Vec3 {
    let c = color.to_linear();
    Vec3::new(c.red, c.green, c.blue)
}

fn is_visible(visibility: Option<&InheritedVisibility>) -> bool {
    visibility.is_none_or(|v| v.get())
}

/// Gather the scene lights that can reach the volume, in a stable order:
/// directional, then point, then spot lights.
#[allow(clippy::type_complexity)]
fn visible_lights(
    frustum: &VoxelizationFrustum,
    exposure: f32,
    directional: &Query<(&DirectionalLight, &GlobalTransform, Option<&InheritedVisibility>)>,
    point: &Query<(&PointLight, &GlobalTransform, Option<&InheritedVisibility>)>,
    spot: &Query<(&SpotLight, &GlobalTransform, Option<&InheritedVisibility>)>,
) -> Vec<VisibleLight> {
    let mut lights = Vec::new();

    for (light, transform, visibility) in directional {
        if !is_visible(visibility) {
            continue;
        }
        lights.push(VisibleLight {
            kind: LightKind::Directional,
            position: transform.translation(),
            direction: transform.forward().as_vec3(),
            color: linear_rgb(light.color) * light.illuminance * exposure,
            range: f32::INFINITY,
            spot_angle: 0.0,
        });
    }

    let per_steradian = exposure / (4.0 * std::f32::consts::PI);

    for (light, transform, visibility) in point {
        let position = transform.translation();
        if !is_visible(visibility) || !frustum.intersects_sphere(position, light.range) {
            continue;
        }
        lights.push(VisibleLight {
            kind: LightKind::Point,
            position,
            direction: Vec3::NEG_Y,
            color: linear_rgb(light.color) * light.intensity * per_steradian,
            range: light.range,
            spot_angle: 0.0,
        });
    }

    for (light, transform, visibility) in spot {
        let position = transform.translation();
        if !is_visible(visibility) || !frustum.intersects_sphere(position, light.range) {
            continue;
        }
        lights.push(VisibleLight {
            kind: LightKind::Spot,
            position,
            direction: transform.forward().as_vec3(),
            color: linear_rgb(light.color) * light.intensity * per_steradian,
            range: light.range,
            spot_angle: light.outer_angle,
        });
    }

    lights
}

/// Decide this frame's refresh and fill [`VxgiFrame`].
#[allow(clippy::too_many_arguments, clippy::type_complexity)]
pub fn plan_vxgi_refresh(
    time: Res<Time<Real>>,
    config: Res<VxgiConfig>,
    meshes: Option<Res<Assets<Mesh>>>,
    mut state: ResMut<VoxelVolumeState>,
    mut frame: ResMut<VxgiFrame>,
    cameras: Query<&GlobalTransform, With<VxgiCamera>>,
    surfaces: Query<(&Mesh3d, &GlobalTransform, &VxgiSurface, Option<&InheritedVisibility>)>,
    directional: Query<(&DirectionalLight, &GlobalTransform, Option<&InheritedVisibility>)>,
    point: Query<(&PointLight, &GlobalTransform, Option<&InheritedVisibility>)>,
    spot: Query<(&SpotLight, &GlobalTransform, Option<&InheritedVisibility>)>,
) {
    frame.plan = None;
    frame.surfaces.clear();
    frame.lights.clear();

    if let Err(err) = config.validate() {
        warn_once!("VXGI refresh disabled: {}", err);
        return;
    }

    let follow_target = cameras.iter().next().map(|t| t.translation());
    if config.follow_camera && follow_target.is_none() {
        warn_once!("VXGI follow_camera is on but no VxgiCamera exists, using the configured center");
    }

    let now = time.elapsed_secs_f64();
    let Some(plan) = plan_refresh(&mut state, &config, now, follow_target) else {
        return;
    };

    if let Some(meshes) = meshes.as_deref() {
        for (mesh3d, transform, surface, visibility) in &surfaces {
            if !is_visible(visibility) {
                continue;
            }
            let Some(mesh) = meshes.get(&mesh3d.0) else {
                continue;
            };
            let Some((lo, hi)) = mesh_world_bounds(mesh, transform) else {
                continue;
            };
            if !plan.frustum.intersects_aabb(lo, hi) {
                continue;
            }
            frame.surfaces.push(VoxelizedSurface {
                mesh: mesh3d.0.id(),
                world_from_local: transform.to_matrix(),
                albedo: linear_rgb(surface.albedo).extend(surface.albedo.to_linear().alpha),
                emission: Vec3::new(
                    surface.emission.red,
                    surface.emission.green,
                    surface.emission.blue,
                ),
            });
        }
    }

    let visible = visible_lights(&plan.frustum, config.exposure(), &directional, &point, &spot);
    frame.lights = collect_light_sources(&visible, plan.world_to_voxel, plan.voxel_size);
    frame.refresh_count = state.refresh_count;
    frame.plan = Some(plan);

    trace!(
        "VXGI refresh {}: {} surfaces, {} lights, displacement {}",
        frame.refresh_count,
        frame.surfaces.len(),
        frame.lights.len(),
        plan.displacement
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::asset::RenderAssetUsages;
    use bevy_mesh::PrimitiveTopology;

    fn triangle() -> Mesh {
        Mesh::new(PrimitiveTopology::TriangleList, RenderAssetUsages::default()).with_inserted_attribute(
            Mesh::ATTRIBUTE_POSITION,
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 2.0, 0.0]],
        )
    }

    #[test]
    fn test_mesh_world_bounds_follow_transform() {
        let transform = GlobalTransform::from(Transform::from_xyz(1.0, 0.0, -1.0).with_scale(Vec3::splat(2.0)));
        let (lo, hi) = mesh_world_bounds(&triangle(), &transform).unwrap();
        assert!(lo.abs_diff_eq(Vec3::new(1.0, 0.0, -1.0), 1e-6));
        assert!(hi.abs_diff_eq(Vec3::new(3.0, 4.0, -1.0), 1e-6));
    }

    #[test]
    fn test_mesh_without_positions_has_no_bounds() {
        let mesh = Mesh::new(PrimitiveTopology::TriangleList, RenderAssetUsages::default());
        assert!(mesh_world_bounds(&mesh, &GlobalTransform::IDENTITY).is_none());
    }

    #[test]
    fn test_frame_defaults_to_no_refresh() {
        assert!(!VxgiFrame::default().is_refresh());
    }
}
