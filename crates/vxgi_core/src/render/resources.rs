//! GPU resources of the voxel volume.
//!
//! Everything here lives in the render world. [`VxgiResources`] is built for
//! one resolution and anti-aliasing level and rebuilt from scratch when
//! either changes; dropping it releases every buffer and texture it owns.

use std::collections::HashMap;

use bevy::prelude::*;
use bevy::render::{
    render_resource::{
        Buffer, BufferDescriptor, BufferInitDescriptor, BufferUsages, Extent3d, Texture,
        TextureDescriptor, TextureDimension, TextureFormat, TextureUsages, TextureView,
        TextureViewDescriptor,
    },
    renderer::{RenderDevice, RenderQueue},
};

use crate::config::VxgiConfig;
use crate::fragment::VoxelFragment;
use crate::frame::VxgiFrame;
use crate::light::{LightSource, MAX_LIGHT_SOURCES};
use crate::parameterizer::INITIAL_INDIRECT_ARGS;
use crate::pyramid::{PyramidLayout, MAX_BOUND_LEVELS};
use crate::refresh::RefreshPlan;

use super::globals::{PublishedVolume, VxgiGlobalsUniform};
use super::mipmapper::MipmapParams;
use super::parameterizer::ParameterizeParams;
use super::programs::VxgiPrograms;
use super::voxel_shader::ShadeParams;
use super::voxelizer::VoxelizeVolumeUniform;

/// Format of every pyramid level.
pub const RADIANCE_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// Bytes of a full light list.
pub const LIGHT_BUFFER_SIZE: u64 = (MAX_LIGHT_SOURCES * std::mem::size_of::<LightSource>()) as u64;

/// Format of the throwaway voxelization color target.
pub const VOXELIZATION_TARGET_FORMAT: TextureFormat = TextureFormat::R8Unorm;

/// The radiance pyramid plus a level 0 sized scratch volume for shifting.
pub struct RadiancePyramid {
    pub layout: PyramidLayout,
    pub textures: Vec<Texture>,
    pub views: Vec<TextureView>,
    pub scratch: Texture,
    pub scratch_view: TextureView,
}

fn radiance_texture(render_device: &RenderDevice, label: &'static str, size: u32) -> Texture {
    render_device.create_texture(&TextureDescriptor {
        label: Some(label),
        size: Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: size,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D3,
        format: RADIANCE_FORMAT,
        usage: TextureUsages::TEXTURE_BINDING
            | TextureUsages::STORAGE_BINDING
            | TextureUsages::COPY_SRC
            | TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

impl RadiancePyramid {
    pub fn new(render_device: &RenderDevice, resolution: u32) -> Self {
        let layout = PyramidLayout::new(resolution);
        let textures: Vec<Texture> = layout
            .sizes()
            .iter()
            .map(|&size| radiance_texture(render_device, "vxgi_radiance_level", size))
            .collect();
        let views = textures
            .iter()
            .map(|t| t.create_view(&TextureViewDescriptor::default()))
            .collect();
        let scratch = radiance_texture(render_device, "vxgi_radiance_scratch", resolution);
        let scratch_view = scratch.create_view(&TextureViewDescriptor::default());

        Self {
            layout,
            textures,
            views,
            scratch,
            scratch_view,
        }
    }

    /// View bound to pyramid slot `slot`; slots past the last level repeat
    /// the coarsest one.
    pub fn binding_view(&self, slot: usize) -> &TextureView {
        &self.views[self.layout.binding_level(slot)]
    }

    /// Views for all [`MAX_BOUND_LEVELS`] slots.
    pub fn binding_views(&self) -> [&TextureView; MAX_BOUND_LEVELS] {
        std::array::from_fn(|slot| self.binding_view(slot))
    }
}

/// Fixed-point radiance accumulators for one resolution.
pub struct Accumulators {
    pub resolution: u32,
    /// Red and green sums, two words per voxel
    pub rg: Buffer,
    /// Blue and alpha sums, two words per voxel
    pub ba: Buffer,
    /// Fragments per voxel
    pub count: Buffer,
}

impl Accumulators {
    pub fn new(render_device: &RenderDevice, resolution: u32) -> Self {
        let voxels = (resolution as u64).pow(3);
        let buffer = |label: &'static str, words: u64| -> Buffer {
            render_device.create_buffer(&BufferDescriptor {
                label: Some(label),
                size: words * 4,
                usage: BufferUsages::STORAGE,
                mapped_at_creation: false,
            })
        };
        Self {
            resolution,
            rg: buffer("vxgi_accumulator_rg", voxels * 2),
            ba: buffer("vxgi_accumulator_ba", voxels * 2),
            count: buffer("vxgi_accumulator_count", voxels),
        }
    }
}

/// Accumulators not in use, keyed by resolution.
#[derive(Resource, Default)]
pub struct AccumulatorPool {
    free: HashMap<u32, Vec<Accumulators>>,
}

impl AccumulatorPool {
    /// Take a set for `resolution`, allocating when none is free.
    pub fn acquire(&mut self, render_device: &RenderDevice, resolution: u32) -> Accumulators {
        self.free
            .get_mut(&resolution)
            .and_then(Vec::pop)
            .unwrap_or_else(|| Accumulators::new(render_device, resolution))
    }

    pub fn release(&mut self, accumulators: Accumulators) {
        self.free
            .entry(accumulators.resolution)
            .or_default()
            .push(accumulators);
    }

    /// Drop pooled sets of every other resolution.
    pub fn retain_resolution(&mut self, resolution: u32) {
        self.free.retain(|r, _| *r == resolution);
    }
}

/// Buffers and textures of the voxel volume.
#[derive(Resource)]
pub struct VxgiResources {
    pub resolution: u32,
    pub samples: u32,
    /// Slots in the fragment buffer
    pub capacity: u32,
    pub fragments: Buffer,
    /// Atomic append counter, reset before every voxelization
    pub counter: Buffer,
    /// Indirect dispatch arguments of the shade kernel
    pub indirect_args: Buffer,
    /// Lights of the refresh in flight
    pub lights: Buffer,
    /// Lights read by lighting, written by the publish step
    pub published_lights: Buffer,
    pub pyramid: RadiancePyramid,
    pub voxelization_target: Texture,
    pub voxelization_target_view: TextureView,
    pub voxelize_volume: Buffer,
    pub shade_params: Buffer,
    pub parameterize_params: Buffer,
    /// Params of the filter writing level `i + 1`
    pub filter_params: Vec<Buffer>,
    pub shift_params: Buffer,
    /// Globals read by lighting, written by the publish step
    pub globals: Buffer,
    /// Globals of the refresh in flight
    pub globals_staging: Buffer,
}

impl VxgiResources {
    pub fn new(
        render_device: &RenderDevice,
        config: &VxgiConfig,
        programs: &VxgiPrograms,
    ) -> Self {
        let resolution = config.effective_resolution();
        let samples = config.anti_aliasing.samples();
        let capacity = config.fragment_capacity();
        let pyramid = RadiancePyramid::new(render_device, resolution);

        let fragments = render_device.create_buffer(&BufferDescriptor {
            label: Some("vxgi_voxel_fragments"),
            size: capacity as u64 * std::mem::size_of::<VoxelFragment>() as u64,
            usage: BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let counter = render_device.create_buffer(&BufferDescriptor {
            label: Some("vxgi_fragment_counter"),
            size: 4,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let indirect_args = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("vxgi_indirect_args"),
            contents: bytemuck::cast_slice(&INITIAL_INDIRECT_ARGS),
            usage: BufferUsages::INDIRECT | BufferUsages::STORAGE | BufferUsages::COPY_DST,
        });

        let light_buffer = |label: &'static str, usage: BufferUsages| -> Buffer {
            render_device.create_buffer(&BufferDescriptor {
                label: Some(label),
                size: LIGHT_BUFFER_SIZE,
                usage: BufferUsages::STORAGE | usage,
                mapped_at_creation: false,
            })
        };
        let lights = light_buffer(
            "vxgi_light_sources",
            BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
        );
        let published_lights = light_buffer("vxgi_published_light_sources", BufferUsages::COPY_DST);

        // Coverage is bounded by the attachment, so the target spans the
        // whole voxel grid.
        let voxelization_target = render_device.create_texture(&TextureDescriptor {
            label: Some("vxgi_voxelization_target"),
            size: Extent3d {
                width: resolution,
                height: resolution,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: samples,
            dimension: TextureDimension::D2,
            format: VOXELIZATION_TARGET_FORMAT,
            usage: TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let voxelization_target_view =
            voxelization_target.create_view(&TextureViewDescriptor::default());

        let uniform = |label: &'static str, size: usize| -> Buffer {
            render_device.create_buffer(&BufferDescriptor {
                label: Some(label),
                size: size as u64,
                usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };

        let parameterize_params = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("vxgi_parameterize_params"),
            contents: bytemuck::bytes_of(&ParameterizeParams::new(programs.threads.render)),
            usage: BufferUsages::UNIFORM,
        });

        let filter_params = (1..pyramid.layout.len())
            .map(|level| {
                let params = MipmapParams::filter(
                    pyramid.layout.size(level - 1),
                    pyramid.layout.size(level),
                );
                render_device.create_buffer_with_data(&BufferInitDescriptor {
                    label: Some("vxgi_filter_params"),
                    contents: bytemuck::bytes_of(&params),
                    usage: BufferUsages::UNIFORM,
                })
            })
            .collect();

        // Zeroed globals keep lighting disabled until the first publish.
        let globals = render_device.create_buffer_with_data(&BufferInitDescriptor {
            label: Some("vxgi_globals"),
            contents: bytemuck::bytes_of(&VxgiGlobalsUniform::default()),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });

        debug!(
            "VXGI resources: {}^3 voxels, {} pyramid levels, {} fragment slots, {}x AA",
            resolution,
            pyramid.layout.len(),
            capacity,
            samples
        );

        Self {
            resolution,
            samples,
            capacity,
            fragments,
            counter,
            indirect_args,
            lights,
            published_lights,
            pyramid,
            voxelization_target,
            voxelization_target_view,
            voxelize_volume: uniform(
                "vxgi_voxelize_volume",
                std::mem::size_of::<VoxelizeVolumeUniform>(),
            ),
            shade_params: uniform("vxgi_shade_params", std::mem::size_of::<ShadeParams>()),
            parameterize_params,
            filter_params,
            shift_params: uniform("vxgi_shift_params", std::mem::size_of::<MipmapParams>()),
            globals,
            globals_staging: render_device.create_buffer(&BufferDescriptor {
                label: Some("vxgi_globals_staging"),
                size: std::mem::size_of::<VxgiGlobalsUniform>() as u64,
                usage: BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
        }
    }

    /// Whether these resources were built for `config`.
    pub fn matches(&self, config: &VxgiConfig) -> bool {
        self.resolution == config.effective_resolution()
            && self.samples == config.anti_aliasing.samples()
    }
}

/// The refresh the node runs this frame, displaced from the published
/// volume rather than from the last planned one.
#[derive(Resource, Clone, Copy, Debug)]
pub struct VxgiRefreshJob(pub RefreshPlan);

/// Build or rebuild [`VxgiResources`] and upload this frame's per-refresh
/// data.
pub fn prepare_vxgi_resources(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    render_queue: Res<RenderQueue>,
    config: Option<Res<VxgiConfig>>,
    frame: Option<Res<VxgiFrame>>,
    programs: Option<Res<VxgiPrograms>>,
    resources: Option<Res<VxgiResources>>,
    published: Res<PublishedVolume>,
    mut pool: ResMut<AccumulatorPool>,
) {
    commands.remove_resource::<VxgiRefreshJob>();
    let (Some(config), Some(frame), Some(programs)) = (config, frame, programs) else {
        return;
    };
    let Some(plan) = frame.plan else {
        return;
    };

    if config.diffuse_resolution_scale != 1.0 {
        warn_once!(
            "VXGI diffuse_resolution_scale {} is not supported, rendering at full resolution",
            config.diffuse_resolution_scale
        );
    }

    if let Some(resources) = resources.filter(|resources| resources.matches(&config)) {
        let plan = plan.rebased(published.get());
        write_refresh_uniforms(&render_queue, &resources, &config, &frame, &plan);
        commands.insert_resource(VxgiRefreshJob(plan));
        return;
    }

    if let Err(err) = config.check_device_limits(&render_device.limits()) {
        error_once!("VXGI disabled: {}", err);
        published.clear();
        commands.remove_resource::<VxgiResources>();
        return;
    }

    info!(
        "VXGI volume allocated at {}^3 with {}x anti-aliasing",
        config.effective_resolution(),
        config.anti_aliasing.samples()
    );
    pool.retain_resolution(config.effective_resolution());
    // A fresh pyramid holds nothing to shift.
    published.clear();
    let plan = plan.rebased(None);
    let resources = VxgiResources::new(&render_device, &config, &programs);
    write_refresh_uniforms(&render_queue, &resources, &config, &frame, &plan);
    commands.insert_resource(resources);
    commands.insert_resource(VxgiRefreshJob(plan));
}

fn write_refresh_uniforms(
    render_queue: &RenderQueue,
    resources: &VxgiResources,
    config: &VxgiConfig,
    frame: &VxgiFrame,
    plan: &RefreshPlan,
) {
    let volume = VoxelizeVolumeUniform::new(plan, resources.capacity);
    render_queue.write_buffer(&resources.voxelize_volume, 0, bytemuck::bytes_of(&volume));

    let light_count = frame.lights.len().min(MAX_LIGHT_SOURCES);
    if light_count > 0 {
        render_queue.write_buffer(
            &resources.lights,
            0,
            bytemuck::cast_slice(&frame.lights[..light_count]),
        );
    }

    let shade = ShadeParams::new(plan, resources.capacity, light_count as u32);
    render_queue.write_buffer(&resources.shade_params, 0, bytemuck::bytes_of(&shade));

    let shift = MipmapParams::shift(plan.displacement, resources.resolution);
    render_queue.write_buffer(&resources.shift_params, 0, bytemuck::bytes_of(&shift));

    let globals = VxgiGlobalsUniform::new(
        plan,
        config,
        light_count as u32,
        resources.pyramid.layout.len() as u32,
    );
    render_queue.write_buffer(&resources.globals_staging, 0, bytemuck::bytes_of(&globals));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_sizes_are_16_byte_multiples() {
        for size in [
            std::mem::size_of::<VoxelizeVolumeUniform>(),
            std::mem::size_of::<ShadeParams>(),
            std::mem::size_of::<MipmapParams>(),
            std::mem::size_of::<ParameterizeParams>(),
            std::mem::size_of::<VxgiGlobalsUniform>(),
        ] {
            assert_eq!(size % 16, 0, "uniform of {} bytes", size);
        }
    }

    #[test]
    fn test_light_buffer_holds_every_light() {
        assert_eq!(LIGHT_BUFFER_SIZE, 64 * 48);
    }

    #[test]
    fn test_fragment_buffer_fits_worst_resolution() {
        let config = VxgiConfig {
            resolution: crate::config::VoxelResolution::VeryHigh,
            ..default()
        };
        let bytes = config.fragment_capacity() as u64 * std::mem::size_of::<VoxelFragment>() as u64;
        // 64 fragments per voxel row of 256, i.e. 0.25 per voxel
        assert_eq!(bytes, 256u64.pow(3) / 4 * 32);
    }
}
