//! Voxel cone traced global illumination for Bevy.
//!
//! This crate provides:
//! - A world-space voxel volume that follows a camera and refreshes at a
//!   configurable rate
//! - GPU voxelization of scene meshes into voxel fragments
//! - Direct-light shading of fragments into a radiance pyramid
//! - Box and Gaussian mip filtering with whole-voxel volume shifting
//! - Indirect diffuse and specular lighting by cone tracing the pyramid
//! - A CPU reference volume mirroring the GPU kernels
//! - JSON configuration loading

pub mod config;
pub mod cpu_volume;
pub mod error;
pub mod fragment;
pub mod frame;
pub mod frustum;
pub mod light;
pub mod num_threads;
pub mod parameterizer;
pub mod pyramid;
pub mod refresh;
pub mod render;
pub mod volume;

pub use config::{
    load_config, save_config, AntiAliasing, MipmapFilterMode, StorageRequirements, VoxelResolution,
    VxgiConfig,
};
pub use cpu_volume::{CpuScene, CpuVoxelVolume, RadianceVolume, SceneBox};
pub use error::{VxgiError, VxgiResult};
pub use frame::{plan_vxgi_refresh, VxgiCamera, VxgiFrame, VxgiSurface};
pub use frustum::{ProjectionAxis, VoxelizationFrustum};
pub use light::{LightKind, LightSource, VisibleLight};
pub use num_threads::NumThreads;
pub use pyramid::PyramidLayout;
pub use refresh::{
    plan_refresh, run_refresh, RefreshPlan, RefreshStages, RefreshStep, VolumePlacement,
};
pub use render::{PublishedVolume, VxgiLabel, VxgiPlugin};
pub use volume::VoxelVolumeState;
