//! VXGI plugin for Bevy.
//!
//! Sets up the main-world planner, extraction, and the render-world
//! pipelines and graph nodes.

use bevy::core_pipeline::core_3d::graph::{Core3d, Node3d};
use bevy::prelude::*;
use bevy::render::{
    extract_component::ExtractComponentPlugin,
    extract_resource::ExtractResourcePlugin,
    graph::CameraDriverLabel,
    render_graph::{RenderGraph, RenderGraphExt, ViewNodeRunner},
    render_resource::SpecializedMeshPipelines,
    Render, RenderApp, RenderSystems,
};
use bevy::transform::TransformSystems;

use crate::config::VxgiConfig;
use crate::frame::{plan_vxgi_refresh, VxgiCamera, VxgiFrame};
use crate::volume::VoxelVolumeState;

use super::globals::{prepare_vxgi_globals, PublishedVolume};
use super::labels::VxgiLabel;
use super::lighting_node::{init_lighting_pipeline, VxgiLightingNode};
use super::mipmapper::{init_mipmapper_pipeline, prepare_mipmapper_bind_groups};
use super::parameterizer::{init_parameterizer_pipeline, prepare_parameterizer_bind_group};
use super::programs::{
    load_programs, GpuProgram, ThreadCache, VxgiPrograms, LIGHTING_PROGRAM, MIPMAPPER_PROGRAM,
    PARAMETERIZER_PROGRAM, VOXELIZE_PROGRAM, VOXEL_SHADER_PROGRAM,
};
use super::refresh_node::VxgiRefreshNode;
use super::resources::{prepare_vxgi_resources, AccumulatorPool};
use super::voxel_shader::{
    init_voxel_shader_pipeline, prepare_voxel_shader_bind_groups,
    release_voxel_shader_accumulators,
};
use super::voxelizer::{init_voxelizer_pipeline, prepare_voxelizer_batch, VoxelizerPipeline};

/// Plugin that adds voxel cone traced global illumination.
///
/// ## Usage
///
/// ```rust,ignore
/// app.add_plugins(VxgiPlugin);
///
/// // Lit surfaces
/// commands.spawn((Mesh3d(mesh), MeshMaterial3d(material), VxgiSurface::new(Color::WHITE)));
///
/// // The camera the volume follows and that receives indirect light
/// commands.spawn((
///     Camera3d::default(),
///     VxgiCamera,
///     DepthPrepass,
///     NormalPrepass,
///     Msaa::Off,
/// ));
/// ```
pub struct VxgiPlugin;

impl Plugin for VxgiPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<VxgiConfig>();
        app.init_resource::<VoxelVolumeState>();
        app.init_resource::<VxgiFrame>();

        // Written by the refresh node, readable from both worlds
        let published = PublishedVolume::default();
        app.insert_resource(published.clone());

        app.add_systems(
            PostUpdate,
            plan_vxgi_refresh.after(TransformSystems::Propagate),
        );

        app.add_plugins(ExtractComponentPlugin::<VxgiCamera>::default());
        app.add_plugins(ExtractResourcePlugin::<VxgiConfig>::default());
        app.add_plugins(ExtractResourcePlugin::<VxgiFrame>::default());

        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            warn!("RenderApp not found - VXGI runs without GPU output");
            return;
        };

        render_app.insert_resource(published);
        render_app.init_resource::<AccumulatorPool>();
        render_app.init_resource::<SpecializedMeshPipelines<VoxelizerPipeline>>();

        render_app.add_systems(
            Render,
            (
                init_voxelizer_pipeline,
                init_voxel_shader_pipeline,
                init_mipmapper_pipeline,
                init_parameterizer_pipeline,
                init_lighting_pipeline,
            )
                .in_set(RenderSystems::Prepare)
                .before(RenderSystems::PrepareResources),
        );

        render_app.add_systems(
            Render,
            (
                prepare_vxgi_resources.in_set(RenderSystems::PrepareResources),
                (
                    prepare_voxelizer_batch,
                    prepare_voxel_shader_bind_groups,
                    prepare_mipmapper_bind_groups,
                    prepare_parameterizer_bind_group,
                    prepare_vxgi_globals,
                )
                    .in_set(RenderSystems::PrepareBindGroups),
                release_voxel_shader_accumulators.in_set(RenderSystems::Cleanup),
            ),
        );

        // Refresh once per frame, before any camera renders.
        let mut render_graph = render_app.world_mut().resource_mut::<RenderGraph>();
        render_graph.add_node(VxgiLabel::Refresh, VxgiRefreshNode);
        render_graph.add_node_edge(VxgiLabel::Refresh, CameraDriverLabel);

        render_app
            .add_render_graph_node::<ViewNodeRunner<VxgiLightingNode>>(Core3d, VxgiLabel::Lighting)
            .add_render_graph_edges(
                Core3d,
                (
                    Node3d::MainOpaquePass,
                    VxgiLabel::Lighting,
                    Node3d::MainTransparentPass,
                ),
            );
    }

    fn finish(&self, app: &mut App) {
        let mut cache = ThreadCache::default();
        let threads = match load_programs(&mut cache) {
            Ok(threads) => threads,
            Err(err) => {
                error!("VXGI disabled: {}", err);
                return;
            }
        };

        let programs = {
            let Some(mut shaders) = app.world_mut().get_resource_mut::<Assets<Shader>>() else {
                return;
            };
            let mut register =
                |program: &GpuProgram| shaders.add(Shader::from_wgsl(program.source, program.path));
            VxgiPrograms {
                voxelize: register(&VOXELIZE_PROGRAM),
                voxel_shader: register(&VOXEL_SHADER_PROGRAM),
                mipmapper: register(&MIPMAPPER_PROGRAM),
                parameterizer: register(&PARAMETERIZER_PROGRAM),
                lighting: register(&LIGHTING_PROGRAM),
                threads,
            }
        };

        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };
        debug!("VXGI programs loaded: {:?}", programs.threads);
        render_app.insert_resource(programs);
    }
}
