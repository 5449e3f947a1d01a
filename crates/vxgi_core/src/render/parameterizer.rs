//! Parameterizer pipeline: fragment count to indirect dispatch arguments.

use bevy::prelude::*;
use bevy::render::{
    render_resource::{
        BindGroup, BindGroupEntry, BindGroupLayout, BindGroupLayoutEntry, BindingType,
        BufferBindingType, CachedComputePipelineId, ComputePipelineDescriptor, PipelineCache,
        ShaderStages,
    },
    renderer::RenderDevice,
};
use bytemuck::{Pod, Zeroable};

use crate::frame::VxgiFrame;
use crate::num_threads::NumThreads;

use super::programs::VxgiPrograms;
use super::resources::VxgiResources;

/// GPU mirror of `ParameterizeParams` in `parameterizer.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct ParameterizeParams {
    /// xyz: workgroup size of the indirectly dispatched kernel
    pub threads: [u32; 4],
}

impl ParameterizeParams {
    pub fn new(threads: NumThreads) -> Self {
        Self {
            threads: [threads.x, threads.y, threads.z, 0],
        }
    }
}

#[derive(Resource)]
pub struct ParameterizerPipeline {
    pub layout: BindGroupLayout,
    pub pipeline_id: CachedComputePipelineId,
}

/// System to initialize the parameterizer pipeline.
pub fn init_parameterizer_pipeline(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    programs: Option<Res<VxgiPrograms>>,
    existing: Option<Res<ParameterizerPipeline>>,
) {
    if existing.is_some() {
        return;
    }
    let Some(programs) = programs else {
        return;
    };

    let layout = render_device.create_bind_group_layout(
        "vxgi_parameterizer_layout",
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
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    );

    let pipeline_id = pipeline_cache.queue_compute_pipeline(ComputePipelineDescriptor {
        label: Some("vxgi_parameterize".into()),
        layout: vec![layout.clone()],
        push_constant_ranges: vec![],
        shader: programs.parameterizer.clone(),
        shader_defs: vec![],
        entry_point: Some("parameterize".into()),
        zero_initialize_workgroup_memory: false,
    });

    commands.insert_resource(ParameterizerPipeline {
        layout,
        pipeline_id,
    });
}

#[derive(Resource)]
pub struct ParameterizerBindGroup(pub BindGroup);

pub fn prepare_parameterizer_bind_group(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline: Option<Res<ParameterizerPipeline>>,
    frame: Option<Res<VxgiFrame>>,
    resources: Option<Res<VxgiResources>>,
) {
    commands.remove_resource::<ParameterizerBindGroup>();

    let (Some(pipeline), Some(frame), Some(resources)) = (pipeline, frame, resources) else {
        return;
    };
    if !frame.is_refresh() {
        return;
    }

    let bind_group = render_device.create_bind_group(
        "vxgi_parameterizer_bind_group",
        &pipeline.layout,
        &[
            BindGroupEntry {
                binding: 0,
                resource: resources.parameterize_params.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 1,
                resource: resources.indirect_args.as_entire_binding(),
            },
        ],
    );
    commands.insert_resource(ParameterizerBindGroup(bind_group));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_match_shader() {
        assert_eq!(std::mem::size_of::<ParameterizeParams>(), 16);
        let params = ParameterizeParams::new(NumThreads::new(256, 1, 1));
        assert_eq!(params.threads, [256, 1, 1, 0]);
    }
}
