//! Light sources fed to the voxel shader.

use bevy::prelude::*;

/// Maximum number of lights uploaded per refresh.
pub const MAX_LIGHT_SOURCES: usize = 64;

/// Kind of a scene light, as reported by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LightKind {
    Point,
    Directional,
    Spot,
}

impl LightKind {
    /// Value of `LightSource::kind` in the GPU programs.
    pub fn gpu_kind(self) -> u32 {
        match self {
            LightKind::Point => 0,
            LightKind::Directional => 1,
            LightKind::Spot => 2,
        }
    }
}

/// A light that survived frustum culling, in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VisibleLight {
    pub kind: LightKind,
    pub position: Vec3,
    /// Direction the light travels along (unit length)
    pub direction: Vec3,
    /// Linear color premultiplied by intensity
    pub color: Vec3,
    /// World-space range, ignored for directional lights
    pub range: f32,
    /// Outer half-angle in radians, spot lights only
    pub spot_angle: f32,
}

/// GPU light record.
///
/// Layout matches `LightSource` in `voxel_shader.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightSource {
    /// Voxel-space position
    pub position: [f32; 3],
    pub kind: u32,
    /// Voxel-space direction
    pub direction: [f32; 3],
    /// Range in voxels
    pub range: f32,
    pub color: [f32; 3],
    /// Cosine of the outer half-angle
    pub spot_cos: f32,
}
// Total: 48 bytes

/// Build the light list for one refresh.
///
/// Keeps culling order. Drops black lights and truncates to [`MAX_LIGHT_SOURCES`].
pub fn collect_light_sources<'a>(
    visible: impl IntoIterator<Item = &'a VisibleLight>,
    world_to_voxel: Mat4,
    voxel_size: f32,
) -> Vec<LightSource> {
    let mut lights = Vec::new();
    let mut dropped = 0usize;

    for light in visible {
        if light.color.max_element() <= 0.0 {
            continue;
        }
        if lights.len() == MAX_LIGHT_SOURCES {
            dropped += 1;
            continue;
        }
        lights.push(LightSource {
            position: world_to_voxel.transform_point3(light.position).to_array(),
            kind: light.kind.gpu_kind(),
            direction: world_to_voxel
                .transform_vector3(light.direction)
                .normalize_or_zero()
                .to_array(),
            range: light.range / voxel_size,
            color: light.color.to_array(),
            spot_cos: light.spot_angle.cos(),
        });
    }

    if dropped > 0 {
        warn_once!(
            "VXGI light list full: {} lights beyond {} were dropped",
            dropped,
            MAX_LIGHT_SOURCES
        );
    }

    lights
}
