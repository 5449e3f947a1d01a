//! Mipmapper pipelines: pyramid filtering and level 0 shifting.
//!
//! Each filter mode ships two kernels that compute the same result, one
//! reading texels with `textureLoad` and one sampling texel centres. Which
//! one runs is decided once per adapter.

use bevy::prelude::*;
use bevy::render::{
    render_resource::{
        BindGroup, BindGroupEntry, BindGroupLayout, BindGroupLayoutEntry, BindingResource,
        BindingType, Buffer, BufferBindingType, CachedComputePipelineId, ComputePipelineDescriptor,
        FilterMode, PipelineCache, Sampler, SamplerBindingType, SamplerDescriptor, ShaderStages,
        StorageTextureAccess, TextureSampleType, TextureView, TextureViewDimension,
    },
    renderer::{RenderAdapterInfo, RenderDevice},
};
use bytemuck::{Pod, Zeroable};

use crate::config::MipmapFilterMode;
use crate::frame::VxgiFrame;

use super::programs::{VxgiPrograms, FILTER_ENTRY_POINTS};
use super::resources::{VxgiResources, RADIANCE_FORMAT};

/// GPU mirror of `MipmapParams` in `mipmapper.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MipmapParams {
    /// xyz: shift displacement, w unused
    pub displacement: [i32; 4],
    pub source_size: u32,
    pub target_size: u32,
    pub _padding: [u32; 2],
}

impl MipmapParams {
    pub fn filter(source_size: u32, target_size: u32) -> Self {
        Self {
            source_size,
            target_size,
            ..default()
        }
    }

    pub fn shift(displacement: IVec3, resolution: u32) -> Self {
        Self {
            displacement: displacement.extend(0).to_array(),
            source_size: resolution,
            target_size: resolution,
            _padding: [0; 2],
        }
    }
}

/// How a filter kernel reads its source level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterVariant {
    /// Typed `textureLoad`
    Load,
    /// Nearest sampling at texel centres
    Sample,
}

impl FilterVariant {
    /// Direct3D reads typed volumes natively; elsewhere sampling is the
    /// better-supported path.
    pub fn for_backend(backend: wgpu::Backend) -> Self {
        match backend {
            wgpu::Backend::Dx12 => FilterVariant::Load,
            _ => FilterVariant::Sample,
        }
    }

    fn offset(self) -> usize {
        match self {
            FilterVariant::Load => 0,
            FilterVariant::Sample => 1,
        }
    }
}

/// Index into [`FILTER_ENTRY_POINTS`] of the kernel for `mode` and `variant`.
pub fn filter_kernel_index(mode: MipmapFilterMode, variant: FilterVariant) -> usize {
    2 * mode.index() as usize + variant.offset()
}

/// Pipeline resources for filtering and shifting the pyramid.
#[derive(Resource)]
pub struct MipmapperPipeline {
    pub layout: BindGroupLayout,
    pub sampler: Sampler,
    pub variant: FilterVariant,
    /// Indexed like [`FILTER_ENTRY_POINTS`]
    pub filter_pipelines: [CachedComputePipelineId; 6],
    pub shift_pipeline: CachedComputePipelineId,
}

impl MipmapperPipeline {
    pub fn filter_pipeline(&self, mode: MipmapFilterMode) -> CachedComputePipelineId {
        self.filter_pipelines[filter_kernel_index(mode, self.variant)]
    }
}

/// System to initialize the mipmapper pipelines.
pub fn init_mipmapper_pipeline(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    adapter_info: Res<RenderAdapterInfo>,
    programs: Option<Res<VxgiPrograms>>,
    existing: Option<Res<MipmapperPipeline>>,
) {
    if existing.is_some() {
        return;
    }
    let Some(programs) = programs else {
        return;
    };

    let layout = render_device.create_bind_group_layout(
        "vxgi_mipmapper_layout",
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
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                    view_dimension: TextureViewDimension::D3,
                    multisampled: false,
                },
                count: None,
            },
            BindGroupLayoutEntry {
                binding: 2,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::Sampler(SamplerBindingType::NonFiltering),
                count: None,
            },
            BindGroupLayoutEntry {
                binding: 3,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::StorageTexture {
                    access: StorageTextureAccess::WriteOnly,
                    format: RADIANCE_FORMAT,
                    view_dimension: TextureViewDimension::D3,
                },
                count: None,
            },
        ],
    );

    let sampler = render_device.create_sampler(&SamplerDescriptor {
        label: Some("vxgi_mipmapper_sampler"),
        mag_filter: FilterMode::Nearest,
        min_filter: FilterMode::Nearest,
        ..default()
    });

    let shader = programs.mipmapper.clone();
    let queue = |entry_point: &'static str| {
        pipeline_cache.queue_compute_pipeline(ComputePipelineDescriptor {
            label: Some(format!("vxgi_{entry_point}").into()),
            layout: vec![layout.clone()],
            push_constant_ranges: vec![],
            shader: shader.clone(),
            shader_defs: vec![],
            entry_point: Some(entry_point.into()),
            zero_initialize_workgroup_memory: false,
        })
    };

    let variant = FilterVariant::for_backend(adapter_info.backend);
    debug!("VXGI mipmapper using {:?} kernels on {:?}", variant, adapter_info.backend);

    let filter_pipelines = FILTER_ENTRY_POINTS.map(&queue);
    let shift_pipeline = queue("shift");

    commands.insert_resource(MipmapperPipeline {
        filter_pipelines,
        shift_pipeline,
        layout,
        sampler,
        variant,
    });
}

/// Bind groups for filtering every level and for the shift.
#[derive(Resource)]
pub struct MipmapperBindGroups {
    /// Entry `i` writes level `i + 1`
    pub filters: Vec<BindGroup>,
    pub shift: BindGroup,
}

/// Build the mipmapper bind groups for this refresh.
pub fn prepare_mipmapper_bind_groups(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline: Option<Res<MipmapperPipeline>>,
    frame: Option<Res<VxgiFrame>>,
    resources: Option<Res<VxgiResources>>,
) {
    commands.remove_resource::<MipmapperBindGroups>();

    let (Some(pipeline), Some(frame), Some(resources)) = (pipeline, frame, resources) else {
        return;
    };
    if !frame.is_refresh() {
        return;
    }

    let pyramid = &resources.pyramid;
    let bind_group = |params: &Buffer, source: &TextureView, destination: &TextureView| {
        render_device.create_bind_group(
            "vxgi_mipmapper_bind_group",
            &pipeline.layout,
            &[
                BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(source),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::Sampler(&pipeline.sampler),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: BindingResource::TextureView(destination),
                },
            ],
        )
    };

    let filters = (1..pyramid.layout.len())
        .map(|level| {
            bind_group(
                &resources.filter_params[level - 1],
                &pyramid.views[level - 1],
                &pyramid.views[level],
            )
        })
        .collect();
    let shift = bind_group(&resources.shift_params, &pyramid.scratch_view, &pyramid.views[0]);

    commands.insert_resource(MipmapperBindGroups { filters, shift });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_match_shader() {
        assert_eq!(std::mem::size_of::<MipmapParams>(), 32);
    }

    #[test]
    fn test_kernel_index_selects_matching_entry_point() {
        let cases = [
            (MipmapFilterMode::Box, FilterVariant::Load, "filter_box_load"),
            (MipmapFilterMode::Box, FilterVariant::Sample, "filter_box_sample"),
            (MipmapFilterMode::Gaussian3x3x3, FilterVariant::Load, "filter_gaussian3_load"),
            (MipmapFilterMode::Gaussian3x3x3, FilterVariant::Sample, "filter_gaussian3_sample"),
            (MipmapFilterMode::Gaussian4x4x4, FilterVariant::Load, "filter_gaussian4_load"),
            (MipmapFilterMode::Gaussian4x4x4, FilterVariant::Sample, "filter_gaussian4_sample"),
        ];
        for (mode, variant, entry_point) in cases {
            assert_eq!(FILTER_ENTRY_POINTS[filter_kernel_index(mode, variant)], entry_point);
        }
    }

    #[test]
    fn test_variant_per_backend() {
        assert_eq!(FilterVariant::for_backend(wgpu::Backend::Dx12), FilterVariant::Load);
        assert_eq!(FilterVariant::for_backend(wgpu::Backend::Vulkan), FilterVariant::Sample);
        assert_eq!(FilterVariant::for_backend(wgpu::Backend::Metal), FilterVariant::Sample);
    }

    #[test]
    fn test_shift_params_carry_displacement() {
        let params = MipmapParams::shift(IVec3::new(1, -2, 0), 64);
        assert_eq!(params.displacement, [1, -2, 0, 0]);
        assert_eq!(params.source_size, 64);
        assert_eq!(params.target_size, 64);
    }
}
