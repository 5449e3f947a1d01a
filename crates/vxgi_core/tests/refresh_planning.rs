use std::time::Duration;

use bevy::prelude::*;
use bevy::time::TimeUpdateStrategy;
use vxgi_core::{
    PublishedVolume, VoxelResolution, VoxelVolumeState, VxgiCamera, VxgiConfig, VxgiFrame, VxgiPlugin,
};

const FRAME: Duration = Duration::from_millis(10);

fn headless_app(config: VxgiConfig) -> App {
    let mut app = App::new();
    app.add_plugins((MinimalPlugins, TransformPlugin));
    app.insert_resource(TimeUpdateStrategy::ManualDuration(FRAME));
    app.insert_resource(config);
    app.add_plugins(VxgiPlugin);
    app
}

fn run_frames(app: &mut App, frames: usize) -> usize {
    let mut refreshes = 0;
    for _ in 0..frames {
        app.update();
        if app.world().resource::<VxgiFrame>().is_refresh() {
            refreshes += 1;
        }
    }
    refreshes
}

#[test]
fn test_unlimited_rate_refreshes_every_frame() {
    let mut app = headless_app(VxgiConfig {
        limit_refresh_rate: false,
        ..default()
    });

    assert_eq!(run_frames(&mut app, 20), 20);
    assert_eq!(app.world().resource::<VoxelVolumeState>().refresh_count, 20);
}

#[test]
fn test_limited_rate_skips_frames() {
    // 30 Hz against 100 Hz frames: one refresh every fourth frame or so.
    let mut app = headless_app(VxgiConfig {
        limit_refresh_rate: true,
        refresh_rate: 30.0,
        ..default()
    });

    let refreshes = run_frames(&mut app, 100);
    assert!((20..=35).contains(&refreshes), "{refreshes} refreshes in 1s");
    assert_eq!(
        app.world().resource::<VoxelVolumeState>().refresh_count,
        refreshes as u64
    );
}

#[test]
fn test_follow_camera_moved_one_voxel_shifts_once() {
    let config = VxgiConfig {
        follow_camera: true,
        limit_refresh_rate: false,
        bound: 10.0,
        resolution: VoxelResolution::Low,
        ..default()
    };
    let voxel_size = config.voxel_size();
    let mut app = headless_app(config);
    let camera = app
        .world_mut()
        .spawn((VxgiCamera, Transform::default()))
        .id();

    app.update();
    let first = app.world().resource::<VxgiFrame>().plan.unwrap();
    assert_eq!(first.displacement, IVec3::ZERO);

    app.world_mut()
        .entity_mut(camera)
        .get_mut::<Transform>()
        .unwrap()
        .translation
        .x += voxel_size;
    app.update();
    let moved = app.world().resource::<VxgiFrame>().plan.unwrap();
    assert_eq!(moved.displacement, IVec3::X);

    // Standing still does not shift again.
    app.update();
    let still = app.world().resource::<VxgiFrame>().plan.unwrap();
    assert_eq!(still.displacement, IVec3::ZERO);
}

#[test]
fn test_refresh_that_never_ran_shifts_with_the_next_one() {
    let config = VxgiConfig {
        follow_camera: true,
        limit_refresh_rate: false,
        ..default()
    };
    let voxel_size = config.voxel_size();
    let mut app = headless_app(config);
    let camera = app.world_mut().spawn((VxgiCamera, Transform::default())).id();

    // Only the first refresh gets published.
    app.update();
    let first = app.world().resource::<VxgiFrame>().plan.unwrap();
    app.world().resource::<PublishedVolume>().set(first.placement());

    for _ in 0..2 {
        app.world_mut()
            .entity_mut(camera)
            .get_mut::<Transform>()
            .unwrap()
            .translation
            .x += voxel_size;
        app.update();
    }

    let planned = app.world().resource::<VxgiFrame>().plan.unwrap();
    assert_eq!(planned.displacement, IVec3::X);
    let published = app.world().resource::<PublishedVolume>().get();
    assert_eq!(planned.rebased(published).displacement, IVec3::new(2, 0, 0));
}

#[test]
fn test_sub_voxel_motion_does_not_shift() {
    let config = VxgiConfig {
        follow_camera: true,
        limit_refresh_rate: false,
        ..default()
    };
    let voxel_size = config.voxel_size();
    let mut app = headless_app(config);
    let camera = app
        .world_mut()
        .spawn((VxgiCamera, Transform::from_xyz(0.1 * voxel_size, 0.0, 0.0)))
        .id();
    app.update();

    app.world_mut()
        .entity_mut(camera)
        .get_mut::<Transform>()
        .unwrap()
        .translation
        .x += 0.5 * voxel_size;
    app.update();

    let plan = app.world().resource::<VxgiFrame>().plan.unwrap();
    assert_eq!(plan.displacement, IVec3::ZERO);
}

#[test]
fn test_resolution_change_restarts_without_shift() {
    let mut app = headless_app(VxgiConfig {
        follow_camera: true,
        limit_refresh_rate: false,
        ..default()
    });
    let camera = app.world_mut().spawn((VxgiCamera, Transform::default())).id();
    app.update();

    app.world_mut().resource_mut::<VxgiConfig>().resolution = VoxelResolution::Low;
    app.world_mut()
        .entity_mut(camera)
        .get_mut::<Transform>()
        .unwrap()
        .translation = Vec3::new(3.0, 0.0, 0.0);
    app.update();

    let plan = app.world().resource::<VxgiFrame>().plan.unwrap();
    assert_eq!(plan.resolution, 32);
    assert_eq!(plan.displacement, IVec3::ZERO);
    assert_eq!(app.world().resource::<VoxelVolumeState>().refresh_count, 1);
}

#[test]
fn test_invalid_config_never_refreshes() {
    let mut app = headless_app(VxgiConfig {
        bound: 0.0,
        ..default()
    });

    assert_eq!(run_frames(&mut app, 5), 0);
}
