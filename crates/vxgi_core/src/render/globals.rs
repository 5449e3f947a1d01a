//! Published volume state read by the lighting composite.
//!
//! The refresh node writes [`VxgiGlobalsUniform`] into a staging buffer and
//! copies it into the live globals buffer as its last step, so lighting
//! never sees a half-built volume. Before the first publish the globals are
//! zero and lighting contributes nothing. The same copy moves the light
//! list of the refresh into the published light buffer.

use std::sync::{Arc, Mutex};

use bevy::prelude::*;
use bevy::render::{
    render_resource::{
        AddressMode, BindGroup, BindGroupEntry, BindGroupLayout, BindGroupLayoutEntry,
        BindingResource, BindingType, BufferBindingType, FilterMode, Sampler,
        SamplerBindingType, SamplerDescriptor, ShaderStages, TextureSampleType,
        TextureViewDimension,
    },
    renderer::RenderDevice,
};
use bytemuck::{Pod, Zeroable};

use crate::config::VxgiConfig;
use crate::pyramid::MAX_BOUND_LEVELS;
use crate::refresh::{RefreshPlan, VolumePlacement};

use super::resources::VxgiResources;

/// GPU mirror of `VxgiGlobals` in the lighting shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct VxgiGlobalsUniform {
    pub world_to_voxel: [[f32; 4]; 4],
    pub voxel_to_world: [[f32; 4]; 4],
    pub resolution: u32,
    pub light_count: u32,
    /// Zero until the first publish
    pub level_count: u32,
    pub voxel_size: f32,
    pub indirect_diffuse_modifier: f32,
    pub indirect_specular_modifier: f32,
    pub _padding: [f32; 2],
}

impl VxgiGlobalsUniform {
    pub fn new(plan: &RefreshPlan, config: &VxgiConfig, light_count: u32, level_count: u32) -> Self {
        Self {
            world_to_voxel: plan.world_to_voxel.to_cols_array_2d(),
            voxel_to_world: plan.voxel_to_world.to_cols_array_2d(),
            resolution: plan.resolution,
            light_count,
            level_count,
            voxel_size: plan.voxel_size,
            indirect_diffuse_modifier: config.indirect_diffuse_modifier,
            indirect_specular_modifier: config.indirect_specular_modifier,
            _padding: [0.0; 2],
        }
    }
}

/// Binding of the trilinear radiance sampler in lighting group 1.
pub const RADIANCE_SAMPLER_BINDING: u32 = 1 + MAX_BOUND_LEVELS as u32;

/// Binding of the published light buffer in lighting group 1.
pub const PUBLISHED_LIGHTS_BINDING: u32 = RADIANCE_SAMPLER_BINDING + 1;

/// Layout of lighting group 1: globals, every pyramid slot, a trilinear
/// sampler and the published lights.
pub fn create_globals_layout(render_device: &RenderDevice) -> BindGroupLayout {
    let mut entries = Vec::with_capacity(MAX_BOUND_LEVELS + 3);
    entries.push(BindGroupLayoutEntry {
        binding: 0,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    });
    for slot in 0..MAX_BOUND_LEVELS {
        entries.push(BindGroupLayoutEntry {
            binding: 1 + slot as u32,
            visibility: ShaderStages::FRAGMENT,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: true },
                view_dimension: TextureViewDimension::D3,
                multisampled: false,
            },
            count: None,
        });
    }
    entries.push(BindGroupLayoutEntry {
        binding: RADIANCE_SAMPLER_BINDING,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Sampler(SamplerBindingType::Filtering),
        count: None,
    });
    entries.push(BindGroupLayoutEntry {
        binding: PUBLISHED_LIGHTS_BINDING,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    });
    render_device.create_bind_group_layout("vxgi_globals_layout", &entries)
}

pub fn create_radiance_sampler(render_device: &RenderDevice) -> Sampler {
    render_device.create_sampler(&SamplerDescriptor {
        label: Some("vxgi_radiance_sampler"),
        address_mode_u: AddressMode::ClampToEdge,
        address_mode_v: AddressMode::ClampToEdge,
        address_mode_w: AddressMode::ClampToEdge,
        mag_filter: FilterMode::Linear,
        min_filter: FilterMode::Linear,
        ..default()
    })
}

/// Lighting's view of the published volume.
#[derive(Resource)]
pub struct VxgiGlobals {
    pub bind_group: BindGroup,
}

/// Placement of the volume the last completed refresh published.
///
/// Shared between the render world (written by the refresh node) and the
/// main world (read only). A planned refresh shifts by its displacement from
/// this placement, so moves planned for refreshes that never ran are not
/// lost.
#[derive(Resource, Clone, Default)]
pub struct PublishedVolume {
    inner: Arc<Mutex<Option<VolumePlacement>>>,
}

impl PublishedVolume {
    fn lock(&self) -> std::sync::MutexGuard<'_, Option<VolumePlacement>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// `None` before the first publish and after the volume is rebuilt.
    pub fn get(&self) -> Option<VolumePlacement> {
        *self.lock()
    }

    pub fn set(&self, placement: VolumePlacement) {
        *self.lock() = Some(placement);
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }
}

/// Rebuild [`VxgiGlobals`] whenever the volume resources are replaced, and
/// drop them once the volume is gone.
pub fn prepare_vxgi_globals(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    resources: Option<Res<VxgiResources>>,
    lighting: Option<Res<super::lighting_node::LightingPipeline>>,
    existing: Option<Res<VxgiGlobals>>,
) {
    let Some(resources) = resources else {
        if existing.is_some() {
            commands.remove_resource::<VxgiGlobals>();
        }
        return;
    };
    let Some(lighting) = lighting else {
        return;
    };
    if existing.is_some() && !resources.is_changed() {
        return;
    }

    let views = resources.pyramid.binding_views();
    let mut entries = Vec::with_capacity(MAX_BOUND_LEVELS + 3);
    entries.push(BindGroupEntry {
        binding: 0,
        resource: resources.globals.as_entire_binding(),
    });
    for (slot, view) in views.into_iter().enumerate() {
        entries.push(BindGroupEntry {
            binding: 1 + slot as u32,
            resource: BindingResource::TextureView(view),
        });
    }
    entries.push(BindGroupEntry {
        binding: RADIANCE_SAMPLER_BINDING,
        resource: BindingResource::Sampler(&lighting.radiance_sampler),
    });
    entries.push(BindGroupEntry {
        binding: PUBLISHED_LIGHTS_BINDING,
        resource: resources.published_lights.as_entire_binding(),
    });

    let bind_group =
        render_device.create_bind_group("vxgi_globals_bind_group", &lighting.globals_layout, &entries);
    commands.insert_resource(VxgiGlobals { bind_group });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::VoxelVolumeState;
    use crate::frustum::VoxelizationFrustum;

    #[test]
    fn test_globals_layout_matches_shader() {
        assert_eq!(std::mem::size_of::<VxgiGlobalsUniform>(), 160);
    }

    #[test]
    fn test_lighting_declares_published_lights() {
        let declaration = format!(
            "@group(1) @binding({}) var<storage, read> lights: array<LightSource>;",
            PUBLISHED_LIGHTS_BINDING
        );
        assert!(crate::render::LIGHTING_PROGRAM.source.contains(&declaration));
        let sampler = format!("@group(1) @binding({}) var radiance_sampler", RADIANCE_SAMPLER_BINDING);
        assert!(crate::render::LIGHTING_PROGRAM.source.contains(&sampler));
    }

    #[test]
    fn test_published_volume_is_shared_between_clones() {
        let render_world = PublishedVolume::default();
        let main_world = render_world.clone();
        assert_eq!(main_world.get(), None);

        let placement = VolumePlacement {
            resolution: 64,
            voxel_size: 0.5,
            center: Vec3::new(1.0, 0.0, -2.0),
        };
        render_world.set(placement);
        assert_eq!(main_world.get(), Some(placement));

        render_world.clear();
        assert_eq!(main_world.get(), None);
    }

    #[test]
    fn test_default_globals_disable_lighting() {
        let globals = VxgiGlobalsUniform::default();
        assert_eq!(globals.level_count, 0);
        assert_eq!(globals.resolution, 0);
    }

    #[test]
    fn test_globals_carry_modifiers() {
        let config = VxgiConfig {
            indirect_diffuse_modifier: 2.0,
            indirect_specular_modifier: 0.5,
            ..default()
        };
        let state = VoxelVolumeState::from_config(&config);
        let plan = RefreshPlan {
            displacement: IVec3::ZERO,
            frustum: VoxelizationFrustum::new(&state).unwrap(),
            resolution: state.resolution,
            voxel_size: state.voxel_size,
            voxel_to_world: state.voxel_to_world(),
            world_to_voxel: state.world_to_voxel(),
        };
        let globals = VxgiGlobalsUniform::new(&plan, &config, 3, 7);
        assert_eq!(globals.indirect_diffuse_modifier, 2.0);
        assert_eq!(globals.indirect_specular_modifier, 0.5);
        assert_eq!(globals.light_count, 3);
        assert_eq!(globals.level_count, 7);
        assert_eq!(globals.resolution, config.effective_resolution());
    }
}
