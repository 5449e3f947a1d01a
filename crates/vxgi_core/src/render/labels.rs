//! Render graph labels for voxel cone-traced GI.

use bevy::render::render_graph::RenderLabel;

/// Labels for VXGI nodes in the render graph.
#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub enum VxgiLabel {
    /// Volume refresh: shift, voxelize, shade, filter and publish. Runs once
    /// per frame ahead of every camera.
    Refresh,
    /// Indirect lighting composite on each VXGI camera
    Lighting,
}
