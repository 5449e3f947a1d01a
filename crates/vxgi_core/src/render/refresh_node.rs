//! Volume refresh render graph node.
//!
//! Runs ahead of every camera on frames the main world planned a refresh
//! for, encoding the whole sequence into the frame's command encoder:
//!
//! ```text
//! [shift + filter] → voxelize → clear → count → parameterize → render
//!                  → aggregate → filter → publish
//! ```
//!
//! Nothing is encoded until every pipeline has compiled and every surface
//! mesh is uploaded. A skipped refresh leaves the published volume
//! untouched, and the next one shifts by the moves it missed.

use bevy::prelude::*;
use bevy::render::{
    mesh::{allocator::MeshAllocator, RenderMesh, RenderMeshBufferInfo},
    render_asset::RenderAssets,
    render_graph::{Node, NodeRunError, RenderGraphContext},
    render_resource::{
        BindGroup, ComputePassDescriptor, ComputePipeline, Extent3d, LoadOp, Operations,
        PipelineCache, RenderPassColorAttachment, RenderPassDescriptor, StoreOp,
    },
    renderer::RenderContext,
};

use crate::config::VxgiConfig;
use crate::frame::VxgiFrame;
use crate::num_threads::NumThreads;
use crate::refresh::{run_refresh, RefreshStages};

use super::globals::{PublishedVolume, VxgiGlobalsUniform};
use super::mipmapper::{filter_kernel_index, MipmapperBindGroups, MipmapperPipeline};
use super::parameterizer::{ParameterizerBindGroup, ParameterizerPipeline};
use super::programs::{KernelThreads, VxgiPrograms};
use super::resources::{VxgiRefreshJob, VxgiResources, LIGHT_BUFFER_SIZE};
use super::voxel_shader::{VoxelShaderBindGroups, VoxelShaderPipeline};
use super::voxelizer::VoxelizerBatch;

/// Compiled compute kernels of one refresh.
struct RefreshKernels<'w> {
    clear: &'w ComputePipeline,
    render: &'w ComputePipeline,
    aggregate: &'w ComputePipeline,
    parameterize: &'w ComputePipeline,
    filter: &'w ComputePipeline,
    shift: &'w ComputePipeline,
}

impl<'w> RefreshKernels<'w> {
    fn get(world: &'w World, config: &VxgiConfig) -> Option<Self> {
        let pipeline_cache = world.resource::<PipelineCache>();
        let shader = world.get_resource::<VoxelShaderPipeline>()?;
        let mipmapper = world.get_resource::<MipmapperPipeline>()?;
        let parameterizer = world.get_resource::<ParameterizerPipeline>()?;

        Some(Self {
            clear: pipeline_cache.get_compute_pipeline(shader.clear_pipeline)?,
            render: pipeline_cache.get_compute_pipeline(shader.render_pipeline)?,
            aggregate: pipeline_cache.get_compute_pipeline(shader.aggregate_pipeline)?,
            parameterize: pipeline_cache.get_compute_pipeline(parameterizer.pipeline_id)?,
            filter: pipeline_cache
                .get_compute_pipeline(mipmapper.filter_pipeline(config.mipmap_filter_mode))?,
            shift: pipeline_cache.get_compute_pipeline(mipmapper.shift_pipeline)?,
        })
    }
}

/// Bind groups prepared for this refresh.
struct RefreshBindGroups<'w> {
    voxelizer: &'w VoxelizerBatch,
    shader: &'w VoxelShaderBindGroups,
    mipmapper: &'w MipmapperBindGroups,
    parameterizer: &'w ParameterizerBindGroup,
}

impl<'w> RefreshBindGroups<'w> {
    fn get(world: &'w World) -> Option<Self> {
        Some(Self {
            voxelizer: world.get_resource::<VoxelizerBatch>()?,
            shader: world.get_resource::<VoxelShaderBindGroups>()?,
            mipmapper: world.get_resource::<MipmapperBindGroups>()?,
            parameterizer: world.get_resource::<ParameterizerBindGroup>()?,
        })
    }
}

/// Encodes the refresh stages on the GPU.
struct GpuRefreshStages<'a, 'w> {
    render_context: &'a mut RenderContext<'w>,
    world: &'w World,
    resources: &'w VxgiResources,
    kernels: RefreshKernels<'w>,
    bind_groups: RefreshBindGroups<'w>,
    threads: KernelThreads,
    filter_threads: NumThreads,
}

impl GpuRefreshStages<'_, '_> {
    fn dispatch(
        &mut self,
        label: &'static str,
        pipeline: &ComputePipeline,
        bind_groups: &[&BindGroup],
        groups: UVec3,
    ) {
        let mut pass = self
            .render_context
            .command_encoder()
            .begin_compute_pass(&ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
        pass.set_pipeline(pipeline);
        for (index, bind_group) in bind_groups.iter().enumerate() {
            pass.set_bind_group(index as u32, *bind_group, &[]);
        }
        pass.dispatch_workgroups(groups.x, groups.y, groups.z);
    }

    fn volume_groups(&self, threads: NumThreads, size: u32) -> UVec3 {
        threads.groups_for(UVec3::splat(size))
    }
}

impl RefreshStages for GpuRefreshStages<'_, '_> {
    fn shift(&mut self, displacement: IVec3) {
        trace!("VXGI shifting volume by {}", displacement);
        let resources = self.resources;
        let mipmapper = self.bind_groups.mipmapper;
        let resolution = resources.resolution;
        self.render_context.command_encoder().copy_texture_to_texture(
            resources.pyramid.textures[0].as_image_copy(),
            resources.pyramid.scratch.as_image_copy(),
            Extent3d {
                width: resolution,
                height: resolution,
                depth_or_array_layers: resolution,
            },
        );

        let groups = self.volume_groups(self.threads.shift, resolution);
        self.dispatch("vxgi_shift", self.kernels.shift, &[&mipmapper.shift], groups);
    }

    fn voxelize(&mut self) {
        let resources = self.resources;
        let batch = self.bind_groups.voxelizer;
        let pipeline_cache = self.world.resource::<PipelineCache>();
        let mesh_allocator = self.world.resource::<MeshAllocator>();
        let render_meshes = self.world.resource::<RenderAssets<RenderMesh>>();

        self.render_context
            .command_encoder()
            .clear_buffer(&resources.counter, 0, None);

        let mut render_pass = self.render_context.begin_tracked_render_pass(RenderPassDescriptor {
            label: Some("vxgi_voxelize_pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: &resources.voxelization_target_view,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: StoreOp::Discard,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        render_pass.set_bind_group(0, &batch.volume_bind_group, &[]);

        // One instance per projection axis. Draws still missing here
        // failed to compile.
        let axes = 0..3;
        for draw in &batch.draws {
            let Some(pipeline) = pipeline_cache.get_render_pipeline(draw.pipeline_id) else {
                continue;
            };
            let Some(gpu_mesh) = render_meshes.get(draw.mesh) else {
                continue;
            };
            let Some(vertex_slice) = mesh_allocator.mesh_vertex_slice(&draw.mesh) else {
                continue;
            };

            render_pass.set_render_pipeline(pipeline);
            render_pass.set_bind_group(1, &draw.bind_group, &[]);
            render_pass.set_vertex_buffer(0, vertex_slice.buffer.slice(..));

            match &gpu_mesh.buffer_info {
                RenderMeshBufferInfo::Indexed {
                    count,
                    index_format,
                } => {
                    let Some(index_slice) = mesh_allocator.mesh_index_slice(&draw.mesh) else {
                        continue;
                    };
                    render_pass.set_index_buffer(index_slice.buffer.slice(..), 0, *index_format);
                    render_pass.draw_indexed(
                        index_slice.range.start..(index_slice.range.start + count),
                        vertex_slice.range.start as i32,
                        axes.clone(),
                    );
                }
                RenderMeshBufferInfo::NonIndexed => {
                    render_pass.draw(vertex_slice.range.clone(), axes.clone());
                }
            }
        }
    }

    fn shade(&mut self) {
        let resources = self.resources;
        let shader = self.bind_groups.shader;
        let volume = self.volume_groups(self.threads.clear, resources.resolution);

        self.dispatch("vxgi_shade_clear", self.kernels.clear, &[&shader.shade], volume);

        // Fragment count into the x argument, then to group counts.
        self.render_context.command_encoder().copy_buffer_to_buffer(
            &resources.counter,
            0,
            &resources.indirect_args,
            0,
            4,
        );
        let parameterizer = self.bind_groups.parameterizer;
        self.dispatch(
            "vxgi_parameterize",
            self.kernels.parameterize,
            &[&parameterizer.0],
            UVec3::ONE,
        );

        {
            let mut pass = self
                .render_context
                .command_encoder()
                .begin_compute_pass(&ComputePassDescriptor {
                    label: Some("vxgi_shade_render"),
                    timestamp_writes: None,
                });
            pass.set_pipeline(self.kernels.render);
            pass.set_bind_group(0, &shader.shade, &[]);
            pass.set_bind_group(1, &shader.pyramid, &[]);
            pass.dispatch_workgroups_indirect(&resources.indirect_args, 0);
        }

        let volume = self.volume_groups(self.threads.aggregate, resources.resolution);
        self.dispatch(
            "vxgi_shade_aggregate",
            self.kernels.aggregate,
            &[&shader.shade, &shader.empty, &shader.level_0],
            volume,
        );
    }

    fn filter(&mut self) {
        let resources = self.resources;
        let layout = &resources.pyramid.layout;
        let mipmapper = self.bind_groups.mipmapper;
        for level in 1..layout.len() {
            let groups = self.volume_groups(self.filter_threads, layout.size(level));
            let bind_group = &mipmapper.filters[level - 1];
            self.dispatch("vxgi_filter", self.kernels.filter, &[bind_group], groups);
        }
    }

    fn publish(&mut self) {
        let resources = self.resources;
        self.render_context.command_encoder().copy_buffer_to_buffer(
            &resources.globals_staging,
            0,
            &resources.globals,
            0,
            std::mem::size_of::<VxgiGlobalsUniform>() as u64,
        );
        self.render_context.command_encoder().copy_buffer_to_buffer(
            &resources.lights,
            0,
            &resources.published_lights,
            0,
            LIGHT_BUFFER_SIZE,
        );
    }
}

/// Render graph node running planned volume refreshes.
#[derive(Default)]
pub struct VxgiRefreshNode;

impl Node for VxgiRefreshNode {
    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        let (Some(frame), Some(VxgiRefreshJob(plan))) = (
            world.get_resource::<VxgiFrame>(),
            world.get_resource::<VxgiRefreshJob>(),
        ) else {
            return Ok(());
        };
        let plan = *plan;
        let (Some(config), Some(programs), Some(resources)) = (
            world.get_resource::<VxgiConfig>(),
            world.get_resource::<VxgiPrograms>(),
            world.get_resource::<VxgiResources>(),
        ) else {
            return Ok(());
        };
        if resources.resolution != plan.resolution {
            return Ok(());
        }
        let Some(kernels) = RefreshKernels::get(world, config) else {
            trace!("VXGI pipelines still compiling, skipping refresh");
            return Ok(());
        };
        let Some(bind_groups) = RefreshBindGroups::get(world) else {
            return Ok(());
        };
        if !bind_groups.voxelizer.is_complete(
            world.resource::<PipelineCache>(),
            world.resource::<RenderAssets<RenderMesh>>(),
            world.resource::<MeshAllocator>(),
        ) {
            trace!("VXGI surfaces not ready, skipping refresh");
            return Ok(());
        }

        let mipmapper = world.resource::<MipmapperPipeline>();
        let filter_index = filter_kernel_index(config.mipmap_filter_mode, mipmapper.variant);

        let mut stages = GpuRefreshStages {
            render_context,
            world,
            resources,
            kernels,
            bind_groups,
            threads: programs.threads,
            filter_threads: programs.threads.filters[filter_index],
        };
        run_refresh(&mut stages, &plan);
        world.resource::<PublishedVolume>().set(plan.placement());

        trace!(
            "VXGI refresh {} encoded: {} surfaces, {} lights",
            frame.refresh_count,
            frame.surfaces.len(),
            frame.lights.len()
        );
        Ok(())
    }
}
