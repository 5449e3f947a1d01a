//! Indirect lighting composite render graph node.
//!
//! Runs on every [`VxgiCamera`] after the main opaque pass and adds two
//! fullscreen passes on top of the lit scene:
//! 1. Indirect diffuse, six cones around the prepass normal
//! 2. Indirect specular, one cone along the reflected view ray
//!
//! Both blend additively into the view target and read the most recently
//! published volume.

use bevy::core_pipeline::prepass::ViewPrepassTextures;
use bevy::image::BevyDefault;
use bevy::prelude::*;
use bevy::render::{
    camera::ExtractedCamera,
    render_graph::{NodeRunError, RenderGraphContext, ViewNode},
    render_resource::{
        BindGroupEntry, BindGroupLayout, BindGroupLayoutEntry, BindingResource, BindingType,
        BlendComponent, BlendFactor, BlendOperation, BlendState, BufferBindingType,
        BufferInitDescriptor, BufferUsages, CachedRenderPipelineId, ColorTargetState, ColorWrites,
        FragmentState, LoadOp, MultisampleState, Operations, PipelineCache, PrimitiveState,
        RenderPassColorAttachment, RenderPassDescriptor, RenderPipelineDescriptor, Sampler,
        ShaderStages, StoreOp, TextureFormat, TextureSampleType, TextureViewDimension,
        VertexState,
    },
    renderer::{RenderContext, RenderDevice},
    view::{ExtractedView, ViewTarget},
};
use bytemuck::{Pod, Zeroable};

use crate::frame::VxgiCamera;

use super::globals::{create_globals_layout, create_radiance_sampler, VxgiGlobals};
use super::programs::VxgiPrograms;

/// GPU mirror of `LightingView` in `lighting.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct LightingViewUniform {
    pub world_from_clip: [[f32; 4]; 4],
    /// xyz: world-space camera position
    pub camera_position: [f32; 4],
}

impl LightingViewUniform {
    pub fn new(view: &ExtractedView) -> Self {
        let world_from_view = Mat4::from(view.world_from_view.affine());
        Self {
            world_from_clip: (world_from_view * view.clip_from_view.inverse()).to_cols_array_2d(),
            camera_position: view.world_from_view.translation().extend(1.0).to_array(),
        }
    }
}

/// Pipelines for one view target format.
#[derive(Clone, Copy, Debug)]
pub struct LightingPipelineIds {
    pub diffuse: CachedRenderPipelineId,
    pub specular: CachedRenderPipelineId,
}

/// Pipeline resources for the indirect lighting composite.
#[derive(Resource)]
pub struct LightingPipeline {
    /// Group 0: view uniform and prepass textures
    pub view_layout: BindGroupLayout,
    /// Group 1: published volume
    pub globals_layout: BindGroupLayout,
    pub radiance_sampler: Sampler,
    pub hdr: LightingPipelineIds,
    pub sdr: LightingPipelineIds,
}

impl LightingPipeline {
    pub fn pipelines_for(&self, format: TextureFormat) -> LightingPipelineIds {
        if format == ViewTarget::TEXTURE_FORMAT_HDR {
            self.hdr
        } else {
            self.sdr
        }
    }
}

/// Additive color, destination alpha kept.
const ADDITIVE: BlendState = BlendState {
    color: BlendComponent {
        src_factor: BlendFactor::One,
        dst_factor: BlendFactor::One,
        operation: BlendOperation::Add,
    },
    alpha: BlendComponent {
        src_factor: BlendFactor::Zero,
        dst_factor: BlendFactor::One,
        operation: BlendOperation::Add,
    },
};

/// System to initialize the lighting pipelines.
pub fn init_lighting_pipeline(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    programs: Option<Res<VxgiPrograms>>,
    existing: Option<Res<LightingPipeline>>,
) {
    if existing.is_some() {
        return;
    }
    let Some(programs) = programs else {
        return;
    };

    let view_layout = render_device.create_bind_group_layout(
        "vxgi_lighting_view_layout",
        &[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            // Depth prepass
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Depth,
                    view_dimension: TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            // Normal prepass
            BindGroupLayoutEntry {
                binding: 2,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                    view_dimension: TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
        ],
    );
    let globals_layout = create_globals_layout(&render_device);
    let radiance_sampler = create_radiance_sampler(&render_device);

    let shader = programs.lighting.clone();
    let queue = |format: TextureFormat, entry_point: &'static str| {
        pipeline_cache.queue_render_pipeline(RenderPipelineDescriptor {
            label: Some(format!("vxgi_{entry_point}").into()),
            layout: vec![view_layout.clone(), globals_layout.clone()],
            push_constant_ranges: vec![],
            vertex: VertexState {
                shader: shader.clone(),
                shader_defs: vec![],
                entry_point: Some("vertex".into()),
                buffers: vec![],
            },
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            multisample: MultisampleState::default(),
            fragment: Some(FragmentState {
                shader: shader.clone(),
                shader_defs: vec![],
                entry_point: Some(entry_point.into()),
                targets: vec![Some(ColorTargetState {
                    format,
                    blend: Some(ADDITIVE),
                    write_mask: ColorWrites::ALL,
                })],
            }),
            zero_initialize_workgroup_memory: false,
        })
    };
    let ids = |format: TextureFormat| LightingPipelineIds {
        diffuse: queue(format, "indirect_diffuse"),
        specular: queue(format, "indirect_specular"),
    };
    let hdr = ids(ViewTarget::TEXTURE_FORMAT_HDR);
    let sdr = ids(TextureFormat::bevy_default());

    commands.insert_resource(LightingPipeline {
        view_layout,
        globals_layout,
        radiance_sampler,
        hdr,
        sdr,
    });
}

/// Render graph node adding indirect lighting to VXGI cameras.
#[derive(Default)]
pub struct VxgiLightingNode;

impl ViewNode for VxgiLightingNode {
    type ViewQuery = (
        &'static ExtractedCamera,
        &'static ExtractedView,
        &'static ViewTarget,
        &'static ViewPrepassTextures,
        &'static VxgiCamera,
    );

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        (camera, view, target, prepass, _): bevy::ecs::query::QueryItem<'w, '_, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        let pipeline_cache = world.resource::<PipelineCache>();
        let Some(lighting_pipeline) = world.get_resource::<LightingPipeline>() else {
            return Ok(());
        };
        // Nothing to trace before the volume exists.
        let Some(globals) = world.get_resource::<VxgiGlobals>() else {
            return Ok(());
        };
        let (Some(depth), Some(normal)) = (prepass.depth_view(), prepass.normal_view()) else {
            warn_once!("VXGI cameras need DepthPrepass and NormalPrepass, skipping indirect lighting");
            return Ok(());
        };

        let ids = lighting_pipeline.pipelines_for(target.main_texture_format());
        let (Some(diffuse), Some(specular)) = (
            pipeline_cache.get_render_pipeline(ids.diffuse),
            pipeline_cache.get_render_pipeline(ids.specular),
        ) else {
            return Ok(());
        };

        let render_device = render_context.render_device();
        let view_buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("vxgi_lighting_view"),
            contents: bytemuck::bytes_of(&LightingViewUniform::new(view)),
            usage: BufferUsages::UNIFORM,
        });
        let view_bind_group = render_device.create_bind_group(
            "vxgi_lighting_view_bind_group",
            &lighting_pipeline.view_layout,
            &[
                BindGroupEntry {
                    binding: 0,
                    resource: view_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(depth),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::TextureView(normal),
                },
            ],
        );

        let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
            label: Some("vxgi_lighting_pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: target.main_texture_view(),
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Load,
                    store: StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        if let Some(viewport) = &camera.viewport {
            render_pass.set_camera_viewport(viewport);
        }

        render_pass.set_bind_group(0, &view_bind_group, &[]);
        render_pass.set_bind_group(1, &globals.bind_group, &[]);
        for pipeline in [diffuse, specular] {
            render_pass.set_render_pipeline(pipeline);
            render_pass.draw(0..3, 0..1);
        }

        Ok(())
    }
}
