//! VXGI configuration.
//!
//! [`VxgiConfig`] is the single knob surface of the pipeline. It lives in the
//! main world, is extracted to the render world every frame, and can be
//! loaded from a JSON file with [`load_config`].

use std::path::Path;

use bevy::prelude::*;
use bevy::render::extract_resource::ExtractResource;
use serde::{Deserialize, Serialize};

use crate::error::{VxgiError, VxgiResult};
use crate::fragment::VoxelFragment;

/// Voxel volume resolution (voxels per axis).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoxelResolution {
    Low,
    #[default]
    Medium,
    High,
    VeryHigh,
}

impl VoxelResolution {
    pub const ALL: [VoxelResolution; 4] = [
        VoxelResolution::Low,
        VoxelResolution::Medium,
        VoxelResolution::High,
        VoxelResolution::VeryHigh,
    ];

    pub fn voxels(self) -> u32 {
        match self {
            VoxelResolution::Low => 32,
            VoxelResolution::Medium => 64,
            VoxelResolution::High => 128,
            VoxelResolution::VeryHigh => 256,
        }
    }
}

/// Voxelization anti-aliasing level (raster sample count).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AntiAliasing {
    #[default]
    X1,
    X2,
    X4,
    X8,
}

impl AntiAliasing {
    pub fn samples(self) -> u32 {
        match self {
            AntiAliasing::X1 => 1,
            AntiAliasing::X2 => 2,
            AntiAliasing::X4 => 4,
            AntiAliasing::X8 => 8,
        }
    }
}

/// Filter used to build each radiance mip level from the previous one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MipmapFilterMode {
    /// 2x2x2 average
    #[default]
    Box,
    /// 3x3x3 Gaussian centred on the even source voxel. Needs an odd volume.
    Gaussian3x3x3,
    /// 4x4x4 Gaussian over the 2x2x2 footprint and its one-voxel border
    Gaussian4x4x4,
}

impl MipmapFilterMode {
    /// Index used to select the filter kernel family.
    pub fn index(self) -> u32 {
        match self {
            MipmapFilterMode::Box => 0,
            MipmapFilterMode::Gaussian3x3x3 => 1,
            MipmapFilterMode::Gaussian4x4x4 => 2,
        }
    }

    /// Whether the volume is addressed as `resolution + 1` voxels per axis.
    pub fn resolution_plus_one(self) -> bool {
        self == MipmapFilterMode::Gaussian3x3x3
    }
}

/// Sizes of the largest storage buffers a config allocates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StorageRequirements {
    /// Voxel fragment append buffer
    pub fragment_bytes: u64,
    /// One of the two-word-per-voxel radiance accumulators
    pub accumulator_bytes: u64,
}

/// Configuration for voxel cone traced global illumination.
#[derive(Resource, Clone, Debug, PartialEq, ExtractResource, Serialize, Deserialize)]
#[serde(default)]
pub struct VxgiConfig {
    /// Track the translation of the [`crate::VxgiCamera`] with the volume center
    pub follow_camera: bool,
    /// World-space volume center, used when `follow_camera` is off
    pub center: Vec3,
    /// World-space edge length of the voxel volume (> 0)
    pub bound: f32,
    pub resolution: VoxelResolution,
    pub anti_aliasing: AntiAliasing,
    pub mipmap_filter_mode: MipmapFilterMode,
    /// Cap how often the volume is refreshed
    pub limit_refresh_rate: bool,
    /// Refreshes per second when `limit_refresh_rate` is on
    pub refresh_rate: f32,
    /// Strength of the indirect diffuse composite (>= 0)
    pub indirect_diffuse_modifier: f32,
    /// Strength of the indirect specular composite (>= 0)
    pub indirect_specular_modifier: f32,
    /// Scale of the indirect diffuse pass. Only 1.0 is implemented.
    pub diffuse_resolution_scale: f32,
    /// Camera exposure applied to light intensities before shading
    pub exposure_ev100: f32,
}

impl Default for VxgiConfig {
    fn default() -> Self {
        Self {
            follow_camera: false,
            center: Vec3::ZERO,
            bound: 10.0,
            resolution: VoxelResolution::Medium,
            anti_aliasing: AntiAliasing::X1,
            mipmap_filter_mode: MipmapFilterMode::Box,
            limit_refresh_rate: false,
            refresh_rate: 30.0,
            indirect_diffuse_modifier: 1.0,
            indirect_specular_modifier: 1.0,
            diffuse_resolution_scale: 1.0,
            exposure_ev100: 9.7,
        }
    }
}

impl VxgiConfig {
    /// Voxels per axis actually allocated, including the +1 of
    /// [`MipmapFilterMode::Gaussian3x3x3`].
    pub fn effective_resolution(&self) -> u32 {
        let base = self.resolution.voxels();
        if self.mipmap_filter_mode.resolution_plus_one() {
            base + 1
        } else {
            base
        }
    }

    /// Even part of the effective resolution. Voxel size and buffer scale are
    /// both derived from it so the +1 voxel does not shrink the voxels.
    fn even_resolution(&self) -> u32 {
        let r = self.effective_resolution();
        r - r % 2
    }

    /// World-space edge length of one voxel.
    pub fn voxel_size(&self) -> f32 {
        self.bound / self.even_resolution() as f32
    }

    /// Fragments reserved per voxel of the volume.
    pub fn buffer_scale(&self) -> f32 {
        64.0 / self.even_resolution() as f32
    }

    /// Voxel count of the volume.
    pub fn volume(&self) -> u32 {
        let r = self.effective_resolution();
        r * r * r
    }

    /// Capacity of the voxel fragment append buffer (`bufferScale × volume`).
    pub fn fragment_capacity(&self) -> u32 {
        (self.buffer_scale() * self.volume() as f32).ceil() as u32
    }

    /// Bytes of the storage buffers bound whole by the voxel shader.
    pub fn storage_requirements(&self) -> StorageRequirements {
        StorageRequirements {
            fragment_bytes: self.fragment_capacity() as u64
                * std::mem::size_of::<VoxelFragment>() as u64,
            accumulator_bytes: self.volume() as u64 * 8,
        }
    }

    /// Check that every volume buffer can be created and bound on a device
    /// with `limits`.
    pub fn check_device_limits(&self, limits: &wgpu::Limits) -> VxgiResult<()> {
        let limit = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
        let required = self.storage_requirements();
        for (buffer, bytes) in [
            ("fragment", required.fragment_bytes),
            ("accumulator", required.accumulator_bytes),
        ] {
            if bytes > limit {
                return Err(VxgiError::ExceedsDeviceLimits {
                    buffer,
                    bytes,
                    limit,
                });
            }
        }
        Ok(())
    }

    /// Minimum seconds between two refreshes, `None` when unlimited.
    pub fn refresh_interval(&self) -> Option<f64> {
        if self.limit_refresh_rate && self.refresh_rate > 0.0 {
            Some(1.0 / self.refresh_rate as f64)
        } else {
            None
        }
    }

    /// Multiplier turning photometric light units into shaded radiance.
    pub fn exposure(&self) -> f32 {
        1.0 / (2f32.powf(self.exposure_ev100) * 1.2)
    }

    /// Check value ranges. Called by [`load_config`].
    pub fn validate(&self) -> VxgiResult<()> {
        if !self.bound.is_finite() || self.bound <= 0.0 {
            return Err(VxgiError::InvalidConfig(format!(
                "bound must be a positive finite number, got {}",
                self.bound
            )));
        }
        if !self.center.is_finite() {
            return Err(VxgiError::InvalidConfig("center must be finite".into()));
        }
        if self.limit_refresh_rate && !(self.refresh_rate > 0.0) {
            return Err(VxgiError::InvalidConfig(format!(
                "refresh_rate must be positive when limited, got {}",
                self.refresh_rate
            )));
        }
        if self.indirect_diffuse_modifier < 0.0 || self.indirect_specular_modifier < 0.0 {
            return Err(VxgiError::InvalidConfig(
                "indirect modifiers must be >= 0".into(),
            ));
        }
        if !(0.1..=1.0).contains(&self.diffuse_resolution_scale) {
            return Err(VxgiError::InvalidConfig(format!(
                "diffuse_resolution_scale must be within [0.1, 1], got {}",
                self.diffuse_resolution_scale
            )));
        }
        if !self.exposure_ev100.is_finite() {
            return Err(VxgiError::InvalidConfig("exposure_ev100 must be finite".into()));
        }
        Ok(())
    }
}

/// Load and validate a [`VxgiConfig`] from a JSON file.
///
/// Missing fields take their default value.
pub fn load_config<P: AsRef<Path>>(path: P) -> VxgiResult<VxgiConfig> {
    let text = std::fs::read_to_string(path)?;
    let config: VxgiConfig = serde_json::from_str(&text)?;
    config.validate()?;
    Ok(config)
}

/// Write a [`VxgiConfig`] as pretty JSON.
pub fn save_config<P: AsRef<Path>>(config: &VxgiConfig, path: P) -> VxgiResult<()> {
    let text = serde_json::to_string_pretty(config)?;
    std::fs::write(path, text)?;
    Ok(())
}
