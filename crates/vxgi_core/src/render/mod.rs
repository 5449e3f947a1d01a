//! GPU side of voxel cone traced global illumination.
//!
//! ## Frame Overview
//!
//! ```text
//! ┌──────────────────┐
//! │ plan_vxgi_refresh│  ← Main world: gate, follow, cull, light list
//! └────────┬─────────┘
//!          │ VxgiFrame (extracted), rebased on PublishedVolume
//! ┌────────▼─────────┐
//! │   Refresh node   │  ← Shift, voxelize, shade, filter, publish
//! └────────┬─────────┘     (once per frame, before the camera driver)
//!          │ VxgiGlobals
//! ┌────────▼─────────┐
//! │  Lighting node   │  ← Per VxgiCamera, after the main opaque pass
//! └──────────────────┘
//! ```
//!
//! ## Radiance Pyramid
//!
//! - **Level 0** (Rgba16Float, R³): averaged fragment radiance, alpha = occupancy
//! - **Level i**: level i - 1 filtered down, until the size reaches 1
//!
//! Shaders see the pyramid through nine slots; slots past the last level
//! repeat the coarsest one.

mod globals;
mod labels;
mod lighting_node;
mod mipmapper;
mod parameterizer;
mod plugin;
mod programs;
mod refresh_node;
mod resources;
mod voxel_shader;
mod voxelizer;

pub use globals::*;
pub use labels::*;
pub use lighting_node::*;
pub use mipmapper::*;
pub use parameterizer::*;
pub use plugin::*;
pub use programs::*;
pub use refresh_node::*;
pub use resources::*;
pub use voxel_shader::*;
pub use voxelizer::*;
