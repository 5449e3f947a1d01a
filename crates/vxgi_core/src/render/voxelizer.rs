//! Voxelizer pipeline.
//!
//! Rasterizes every surface overlapping the volume into voxel fragments.
//! Surfaces are drawn with three instances, one orthographic projection per
//! principal axis, into a resolution-sized multisampled target that is never
//! stored. The fragment stage appends to the fragment buffer through an
//! atomic counter; records past the buffer's capacity are counted but not
//! written.

use bevy::prelude::*;
use bevy::render::{
    mesh::{allocator::MeshAllocator, RenderMesh, RenderMeshBufferInfo},
    render_asset::RenderAssets,
    render_resource::{
        BindGroup, BindGroupEntry, BindGroupLayout, BindGroupLayoutEntry, BindingType,
        BufferBindingType, BufferInitDescriptor, BufferUsages, CachedPipelineState,
        CachedRenderPipelineId,
        ColorTargetState, ColorWrites, FragmentState, FrontFace, MultisampleState, PipelineCache,
        PolygonMode, PrimitiveState, RenderPipelineDescriptor, ShaderStages,
        SpecializedMeshPipeline, SpecializedMeshPipelineError, SpecializedMeshPipelines,
        VertexState,
    },
    renderer::RenderDevice,
};
use bevy_mesh::{MeshVertexBufferLayoutRef, PrimitiveTopology};
use bytemuck::{Pod, Zeroable};

use crate::frame::{VoxelizedSurface, VxgiFrame};
use crate::frustum::ProjectionAxis;
use crate::refresh::RefreshPlan;

use super::programs::VxgiPrograms;
use super::resources::{VxgiResources, VOXELIZATION_TARGET_FORMAT};

/// GPU mirror of `VoxelizeVolume` in `voxelize.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct VoxelizeVolumeUniform {
    /// Indexed by instance: X, Y then Z projection
    pub clip_from_world: [[[f32; 4]; 4]; 3],
    pub world_to_voxel: [[f32; 4]; 4],
    pub resolution: u32,
    pub capacity: u32,
    pub _padding: [u32; 2],
}

impl VoxelizeVolumeUniform {
    pub fn new(plan: &RefreshPlan, capacity: u32) -> Self {
        Self {
            clip_from_world: ProjectionAxis::ALL
                .map(|axis| plan.frustum.clip_from_world(axis).to_cols_array_2d()),
            world_to_voxel: plan.world_to_voxel.to_cols_array_2d(),
            resolution: plan.resolution,
            capacity,
            _padding: [0; 2],
        }
    }
}

/// GPU mirror of `VoxelizeSurface` in `voxelize.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct VoxelizeSurfaceUniform {
    pub world_from_local: [[f32; 4]; 4],
    pub normal_from_local: [[f32; 4]; 4],
    pub albedo: [f32; 4],
    /// RGB, w unused
    pub emission: [f32; 4],
}

impl VoxelizeSurfaceUniform {
    pub fn new(surface: &VoxelizedSurface) -> Self {
        let world = surface.world_from_local;
        // A collapsed transform has no inverse; its normals are meaningless
        // anyway, so keep the transform itself.
        let normal = if world.determinant().abs() > f32::EPSILON {
            world.inverse().transpose()
        } else {
            world
        };
        Self {
            world_from_local: world.to_cols_array_2d(),
            normal_from_local: normal.to_cols_array_2d(),
            albedo: surface.albedo.to_array(),
            emission: surface.emission.extend(0.0).to_array(),
        }
    }
}

/// Layouts and shader of the voxelization pipeline.
#[derive(Resource)]
pub struct VoxelizerPipeline {
    /// Group 0: volume uniform, fragment buffer, fragment counter
    pub volume_layout: BindGroupLayout,
    /// Group 1: per-surface uniform
    pub surface_layout: BindGroupLayout,
    pub shader: Handle<Shader>,
}

impl VoxelizerPipeline {
    pub fn new(render_device: &RenderDevice, shader: Handle<Shader>) -> Self {
        let storage = |binding: u32| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::FRAGMENT,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let volume_layout = render_device.create_bind_group_layout(
            "vxgi_voxelize_volume_layout",
            &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::VERTEX_FRAGMENT,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage(1),
                storage(2),
            ],
        );

        let surface_layout = render_device.create_bind_group_layout(
            "vxgi_voxelize_surface_layout",
            &[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::VERTEX_FRAGMENT,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        );

        Self {
            volume_layout,
            surface_layout,
            shader,
        }
    }
}

/// Key for specializing the voxelization pipeline per mesh.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct VoxelizerPipelineKey {
    /// MSAA samples of the voxelization target
    pub samples: u32,
    pub primitive_topology: PrimitiveTopology,
}

impl SpecializedMeshPipeline for VoxelizerPipeline {
    type Key = VoxelizerPipelineKey;

    fn specialize(
        &self,
        key: Self::Key,
        layout: &MeshVertexBufferLayoutRef,
    ) -> Result<RenderPipelineDescriptor, SpecializedMeshPipelineError> {
        let vertex_buffer_layout = layout.0.get_layout(&[
            Mesh::ATTRIBUTE_POSITION.at_shader_location(0),
            Mesh::ATTRIBUTE_NORMAL.at_shader_location(1),
        ])?;

        Ok(RenderPipelineDescriptor {
            label: Some("vxgi_voxelize_pipeline".into()),
            layout: vec![self.volume_layout.clone(), self.surface_layout.clone()],
            push_constant_ranges: vec![],
            vertex: VertexState {
                shader: self.shader.clone(),
                shader_defs: vec![],
                entry_point: Some("vertex".into()),
                buffers: vec![vertex_buffer_layout],
            },
            // Both faces: a triangle seen from behind along its dominant
            // axis still has to voxelize.
            primitive: PrimitiveState {
                topology: key.primitive_topology,
                strip_index_format: None,
                front_face: FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: None,
            multisample: MultisampleState {
                count: key.samples,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            fragment: Some(FragmentState {
                shader: self.shader.clone(),
                shader_defs: vec![],
                entry_point: Some("fragment".into()),
                targets: vec![Some(ColorTargetState {
                    format: VOXELIZATION_TARGET_FORMAT,
                    blend: None,
                    write_mask: ColorWrites::empty(),
                })],
            }),
            zero_initialize_workgroup_memory: false,
        })
    }
}

/// System to initialize the voxelizer pipeline once the programs are loaded.
pub fn init_voxelizer_pipeline(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    programs: Option<Res<VxgiPrograms>>,
    existing: Option<Res<VoxelizerPipeline>>,
) {
    if existing.is_some() {
        return;
    }
    let Some(programs) = programs else {
        return;
    };

    commands.insert_resource(VoxelizerPipeline::new(
        &render_device,
        programs.voxelize.clone(),
    ));
}

/// One surface draw of the voxelization pass.
pub struct VoxelizerDraw {
    pub mesh: AssetId<Mesh>,
    pub pipeline_id: CachedRenderPipelineId,
    pub bind_group: BindGroup,
}

/// Whether one draw can be encoded yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawStatus {
    Ready,
    /// Pipeline compiling or mesh data not uploaded
    Pending,
    /// Pipeline failed to compile; the surface is left out
    Failed,
}

impl DrawStatus {
    pub fn of(state: &CachedPipelineState) -> Self {
        match state {
            CachedPipelineState::Ok(_) => DrawStatus::Ready,
            CachedPipelineState::Err(_) => DrawStatus::Failed,
            _ => DrawStatus::Pending,
        }
    }
}

/// A batch is complete once every mesh is uploaded and no draw is pending.
pub fn batch_is_complete(
    pending_meshes: usize,
    statuses: impl IntoIterator<Item = DrawStatus>,
) -> bool {
    pending_meshes == 0 && statuses.into_iter().all(|status| status != DrawStatus::Pending)
}

/// Everything the voxelization pass draws this refresh.
#[derive(Resource)]
pub struct VoxelizerBatch {
    pub volume_bind_group: BindGroup,
    pub draws: Vec<VoxelizerDraw>,
    /// Surfaces whose mesh has not reached the render world yet
    pub pending_meshes: usize,
}

impl VoxelizerBatch {
    fn draw_status(
        draw: &VoxelizerDraw,
        pipeline_cache: &PipelineCache,
        render_meshes: &RenderAssets<RenderMesh>,
        mesh_allocator: &MeshAllocator,
    ) -> DrawStatus {
        let Some(gpu_mesh) = render_meshes.get(draw.mesh) else {
            return DrawStatus::Pending;
        };
        if mesh_allocator.mesh_vertex_slice(&draw.mesh).is_none() {
            return DrawStatus::Pending;
        }
        if matches!(gpu_mesh.buffer_info, RenderMeshBufferInfo::Indexed { .. })
            && mesh_allocator.mesh_index_slice(&draw.mesh).is_none()
        {
            return DrawStatus::Pending;
        }
        let status = DrawStatus::of(pipeline_cache.get_render_pipeline_state(draw.pipeline_id));
        if status == DrawStatus::Failed {
            warn_once!("VXGI voxelization pipeline failed for mesh {:?}", draw.mesh);
        }
        status
    }

    /// Whether every surface can be drawn now. A refresh that voxelizes only
    /// part of the scene would publish a volume with holes in it.
    pub fn is_complete(
        &self,
        pipeline_cache: &PipelineCache,
        render_meshes: &RenderAssets<RenderMesh>,
        mesh_allocator: &MeshAllocator,
    ) -> bool {
        batch_is_complete(
            self.pending_meshes,
            self.draws
                .iter()
                .map(|draw| Self::draw_status(draw, pipeline_cache, render_meshes, mesh_allocator)),
        )
    }
}

/// Specialize a pipeline and build bind groups for every surface of this
/// refresh. Meshes lacking positions or normals are skipped; meshes not
/// uploaded yet hold the refresh back.
pub fn prepare_voxelizer_batch(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    render_meshes: Res<RenderAssets<RenderMesh>>,
    mut pipelines: ResMut<SpecializedMeshPipelines<VoxelizerPipeline>>,
    voxelizer: Option<Res<VoxelizerPipeline>>,
    frame: Option<Res<VxgiFrame>>,
    resources: Option<Res<VxgiResources>>,
) {
    commands.remove_resource::<VoxelizerBatch>();

    let (Some(voxelizer), Some(frame), Some(resources)) = (voxelizer, frame, resources) else {
        return;
    };
    if !frame.is_refresh() {
        return;
    }

    let volume_bind_group = render_device.create_bind_group(
        "vxgi_voxelize_volume_bind_group",
        &voxelizer.volume_layout,
        &[
            BindGroupEntry {
                binding: 0,
                resource: resources.voxelize_volume.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 1,
                resource: resources.fragments.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 2,
                resource: resources.counter.as_entire_binding(),
            },
        ],
    );

    let mut draws = Vec::with_capacity(frame.surfaces.len());
    let mut pending_meshes = 0;
    for surface in &frame.surfaces {
        let Some(gpu_mesh) = render_meshes.get(surface.mesh) else {
            pending_meshes += 1;
            continue;
        };
        let key = VoxelizerPipelineKey {
            samples: resources.samples,
            primitive_topology: gpu_mesh.primitive_topology(),
        };
        let pipeline_id =
            match pipelines.specialize(&pipeline_cache, &voxelizer, key, &gpu_mesh.layout) {
                Ok(id) => id,
                Err(err) => {
                    warn_once!("VXGI cannot voxelize mesh {:?}: {}", surface.mesh, err);
                    continue;
                }
            };

        let uniform = VoxelizeSurfaceUniform::new(surface);
        let buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("vxgi_voxelize_surface"),
            contents: bytemuck::bytes_of(&uniform),
            usage: BufferUsages::UNIFORM,
        });
        let bind_group = render_device.create_bind_group(
            "vxgi_voxelize_surface_bind_group",
            &voxelizer.surface_layout,
            &[BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        );

        draws.push(VoxelizerDraw {
            mesh: surface.mesh,
            pipeline_id,
            bind_group,
        });
    }

    trace!("VXGI voxelizing {} of {} surfaces", draws.len(), frame.surfaces.len());
    commands.insert_resource(VoxelizerBatch {
        volume_bind_group,
        draws,
        pending_meshes,
    });
}
