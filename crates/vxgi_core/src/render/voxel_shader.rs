//! Voxel shader pipelines: clear, render and aggregate.
//!
//! `render` shades one fragment per invocation and is dispatched
//! indirectly, with the group count written by the parameterizer from the
//! fragment counter. Shadow rays march the occupancy of the previous
//! refresh, bound as pyramid group 1.

use bevy::prelude::*;
use bevy::render::{
    render_resource::{
        BindGroup, BindGroupEntry, BindGroupLayout, BindGroupLayoutEntry, BindingResource,
        BindingType, BufferBindingType, CachedComputePipelineId, ComputePipelineDescriptor,
        PipelineCache, ShaderStages, StorageTextureAccess, TextureSampleType,
        TextureViewDimension,
    },
    renderer::RenderDevice,
};
use bytemuck::{Pod, Zeroable};

use crate::frame::VxgiFrame;
use crate::pyramid::MAX_BOUND_LEVELS;
use crate::refresh::RefreshPlan;

use super::programs::VxgiPrograms;
use super::resources::{AccumulatorPool, Accumulators, VxgiResources, RADIANCE_FORMAT};

/// GPU mirror of `ShadeParams` in `voxel_shader.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ShadeParams {
    pub voxel_to_world: [[f32; 4]; 4],
    pub world_to_voxel: [[f32; 4]; 4],
    pub resolution: u32,
    pub capacity: u32,
    pub light_count: u32,
    pub voxel_size: f32,
}

impl ShadeParams {
    pub fn new(plan: &RefreshPlan, capacity: u32, light_count: u32) -> Self {
        Self {
            voxel_to_world: plan.voxel_to_world.to_cols_array_2d(),
            world_to_voxel: plan.world_to_voxel.to_cols_array_2d(),
            resolution: plan.resolution,
            capacity,
            light_count,
            voxel_size: plan.voxel_size,
        }
    }
}

fn storage_buffer(binding: u32, read_only: bool) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Layout of every pyramid slot as an unfilterable sampled 3D texture.
pub fn create_pyramid_layout(render_device: &RenderDevice, label: &'static str) -> BindGroupLayout {
    let entries: Vec<BindGroupLayoutEntry> = (0..MAX_BOUND_LEVELS as u32)
        .map(|binding| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: false },
                view_dimension: TextureViewDimension::D3,
                multisampled: false,
            },
            count: None,
        })
        .collect();
    render_device.create_bind_group_layout(label, &entries)
}

/// Layout of a single write-only storage volume at binding 0.
pub fn create_storage_volume_layout(render_device: &RenderDevice, label: &'static str) -> BindGroupLayout {
    render_device.create_bind_group_layout(
        label,
        &[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::StorageTexture {
                access: StorageTextureAccess::WriteOnly,
                format: RADIANCE_FORMAT,
                view_dimension: TextureViewDimension::D3,
            },
            count: None,
        }],
    )
}

/// Pipeline resources for shading voxel fragments.
#[derive(Resource)]
pub struct VoxelShaderPipeline {
    /// Group 0: params, lights, fragments, counter, accumulators
    pub shade_layout: BindGroupLayout,
    /// Group 1: previous pyramid
    pub pyramid_layout: BindGroupLayout,
    /// Group 2: level 0 as storage
    pub level_layout: BindGroupLayout,
    /// Fills group 1 for `aggregate`, which writes the level `render` reads
    pub empty_layout: BindGroupLayout,
    pub clear_pipeline: CachedComputePipelineId,
    pub render_pipeline: CachedComputePipelineId,
    pub aggregate_pipeline: CachedComputePipelineId,
}

/// System to initialize the voxel shader pipelines.
pub fn init_voxel_shader_pipeline(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    programs: Option<Res<VxgiPrograms>>,
    existing: Option<Res<VoxelShaderPipeline>>,
) {
    if existing.is_some() {
        return;
    }
    let Some(programs) = programs else {
        return;
    };

    let shade_layout = render_device.create_bind_group_layout(
        "vxgi_shade_layout",
        &[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            storage_buffer(1, true),
            storage_buffer(2, true),
            storage_buffer(3, true),
            storage_buffer(4, false),
            storage_buffer(5, false),
            storage_buffer(6, false),
        ],
    );
    let pyramid_layout = create_pyramid_layout(&render_device, "vxgi_shade_pyramid_layout");
    let level_layout = create_storage_volume_layout(&render_device, "vxgi_shade_level_layout");
    let empty_layout = render_device.create_bind_group_layout("vxgi_empty_layout", &[]);

    let shader = programs.voxel_shader.clone();
    let queue = |label: &'static str, entry_point: &'static str, layout: Vec<BindGroupLayout>| {
        pipeline_cache.queue_compute_pipeline(ComputePipelineDescriptor {
            label: Some(label.into()),
            layout,
            push_constant_ranges: vec![],
            shader: shader.clone(),
            shader_defs: vec![],
            entry_point: Some(entry_point.into()),
            zero_initialize_workgroup_memory: false,
        })
    };

    let clear_pipeline = queue("vxgi_shade_clear", "clear", vec![shade_layout.clone()]);
    let render_pipeline = queue(
        "vxgi_shade_render",
        "render",
        vec![shade_layout.clone(), pyramid_layout.clone()],
    );
    let aggregate_pipeline = queue(
        "vxgi_shade_aggregate",
        "aggregate",
        vec![shade_layout.clone(), empty_layout.clone(), level_layout.clone()],
    );

    commands.insert_resource(VoxelShaderPipeline {
        shade_layout,
        pyramid_layout,
        level_layout,
        empty_layout,
        clear_pipeline,
        render_pipeline,
        aggregate_pipeline,
    });
}

/// Bind groups of one shading pass, holding the accumulators it borrowed
/// from the pool.
#[derive(Resource)]
pub struct VoxelShaderBindGroups {
    pub shade: BindGroup,
    pub pyramid: BindGroup,
    pub level_0: BindGroup,
    pub empty: BindGroup,
    pub accumulators: Option<Accumulators>,
}

/// Borrow accumulators and build the shading bind groups for this refresh.
pub fn prepare_voxel_shader_bind_groups(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    mut pool: ResMut<AccumulatorPool>,
    pipeline: Option<Res<VoxelShaderPipeline>>,
    frame: Option<Res<VxgiFrame>>,
    resources: Option<Res<VxgiResources>>,
) {
    let (Some(pipeline), Some(frame), Some(resources)) = (pipeline, frame, resources) else {
        return;
    };
    if !frame.is_refresh() {
        return;
    }

    let accumulators = pool.acquire(&render_device, resources.resolution);

    let shade = render_device.create_bind_group(
        "vxgi_shade_bind_group",
        &pipeline.shade_layout,
        &[
            BindGroupEntry {
                binding: 0,
                resource: resources.shade_params.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 1,
                resource: resources.lights.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 2,
                resource: resources.fragments.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 3,
                resource: resources.counter.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 4,
                resource: accumulators.rg.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 5,
                resource: accumulators.ba.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 6,
                resource: accumulators.count.as_entire_binding(),
            },
        ],
    );

    let pyramid_entries: Vec<BindGroupEntry> = resources
        .pyramid
        .binding_views()
        .into_iter()
        .enumerate()
        .map(|(slot, view)| BindGroupEntry {
            binding: slot as u32,
            resource: BindingResource::TextureView(view),
        })
        .collect();
    let pyramid = render_device.create_bind_group(
        "vxgi_shade_pyramid_bind_group",
        &pipeline.pyramid_layout,
        &pyramid_entries,
    );

    let level_0 = render_device.create_bind_group(
        "vxgi_shade_level_bind_group",
        &pipeline.level_layout,
        &[BindGroupEntry {
            binding: 0,
            resource: BindingResource::TextureView(&resources.pyramid.views[0]),
        }],
    );
    let empty = render_device.create_bind_group("vxgi_empty_bind_group", &pipeline.empty_layout, &[]);

    commands.insert_resource(VoxelShaderBindGroups {
        shade,
        pyramid,
        level_0,
        empty,
        accumulators: Some(accumulators),
    });
}

/// Return this frame's accumulators to the pool once the frame is submitted.
pub fn release_voxel_shader_accumulators(
    mut commands: Commands,
    mut pool: ResMut<AccumulatorPool>,
    bind_groups: Option<ResMut<VoxelShaderBindGroups>>,
) {
    let Some(mut bind_groups) = bind_groups else {
        return;
    };
    if let Some(accumulators) = bind_groups.accumulators.take() {
        pool.release(accumulators);
    }
    commands.remove_resource::<VoxelShaderBindGroups>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shade_params_match_shader() {
        assert_eq!(std::mem::size_of::<ShadeParams>(), 144);
    }
}
