use bevy::core_pipeline::prepass::{DepthPrepass, NormalPrepass};
use bevy::prelude::*;
use bevy::render::view::Hdr;
use vxgi_core::{load_config, VxgiCamera, VxgiConfig, VxgiPlugin, VxgiSurface};

/// Orbit radius and height of the demo camera.
const ORBIT: Vec2 = Vec2::new(4.0, 1.5);

fn main() {
    // Optional JSON config path as the first argument
    let config = match std::env::args().nth(1) {
        Some(path) => load_config(&path).unwrap_or_else(|err| {
            eprintln!("Failed to load {path}: {err}, using defaults");
            VxgiConfig::default()
        }),
        None => VxgiConfig {
            follow_camera: true,
            bound: 8.0,
            ..default()
        },
    };

    App::new()
        .add_plugins(DefaultPlugins)
        .insert_resource(config)
        .add_plugins(VxgiPlugin)
        .insert_resource(ClearColor(Color::srgb(0.02, 0.02, 0.03)))
        .add_systems(Startup, setup)
        .add_systems(Update, orbit_camera)
        .run();
}

/// Spawn a mesh that is both rendered and voxelized.
fn spawn_surface(
    commands: &mut Commands,
    mesh: Handle<Mesh>,
    materials: &mut Assets<StandardMaterial>,
    surface: VxgiSurface,
    transform: Transform,
) {
    let material = materials.add(StandardMaterial {
        base_color: surface.albedo,
        emissive: surface.emission,
        perceptual_roughness: 0.8,
        ..default()
    });
    commands.spawn((Mesh3d(mesh), MeshMaterial3d(material), surface, transform));
}

fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    // Cornell box: 4m room, red left wall, green right wall, open front
    let wall = meshes.add(Cuboid::new(4.0, 0.1, 4.0));
    let white = VxgiSurface::new(Color::srgb(0.8, 0.8, 0.8));
    let walls = [
        (white, Transform::from_xyz(0.0, -2.0, 0.0)),
        (white, Transform::from_xyz(0.0, 2.0, 0.0)),
        (
            white,
            Transform::from_xyz(0.0, 0.0, -2.0).with_rotation(Quat::from_rotation_x(90f32.to_radians())),
        ),
        (
            VxgiSurface::new(Color::srgb(0.8, 0.1, 0.1)),
            Transform::from_xyz(-2.0, 0.0, 0.0).with_rotation(Quat::from_rotation_z(90f32.to_radians())),
        ),
        (
            VxgiSurface::new(Color::srgb(0.1, 0.8, 0.1)),
            Transform::from_xyz(2.0, 0.0, 0.0).with_rotation(Quat::from_rotation_z(90f32.to_radians())),
        ),
    ];
    for (surface, transform) in walls {
        spawn_surface(&mut commands, wall.clone(), &mut materials, surface, transform);
    }

    // Two blocks and an emissive sphere
    spawn_surface(
        &mut commands,
        meshes.add(Cuboid::new(1.0, 1.0, 1.0)),
        &mut materials,
        white,
        Transform::from_xyz(0.7, -1.45, 0.5).with_rotation(Quat::from_rotation_y(0.3)),
    );
    spawn_surface(
        &mut commands,
        meshes.add(Cuboid::new(1.0, 2.2, 1.0)),
        &mut materials,
        white,
        Transform::from_xyz(-0.7, -0.85, -0.6).with_rotation(Quat::from_rotation_y(-0.3)),
    );
    spawn_surface(
        &mut commands,
        meshes.add(Sphere::new(0.3)),
        &mut materials,
        VxgiSurface::emissive(Color::WHITE, LinearRgba::rgb(4.0, 3.0, 1.5)),
        Transform::from_xyz(0.0, 1.2, 0.0),
    );

    commands.spawn((
        PointLight {
            intensity: 200_000.0,
            range: 8.0,
            shadows_enabled: true,
            ..default()
        },
        Transform::from_xyz(0.0, 1.6, 0.5),
    ));

    commands.spawn((
        Camera3d::default(),
        Hdr,
        VxgiCamera,
        DepthPrepass,
        NormalPrepass,
        Msaa::Off,
        Transform::from_xyz(0.0, ORBIT.y, ORBIT.x).looking_at(Vec3::ZERO, Vec3::Y),
    ));
}

/// Swing the camera slowly so the volume follows it.
fn orbit_camera(time: Res<Time>, mut cameras: Query<&mut Transform, With<VxgiCamera>>) {
    let angle = 0.4 * (0.3 * time.elapsed_secs()).sin();
    for mut transform in &mut cameras {
        *transform = Transform::from_xyz(ORBIT.x * angle.sin(), ORBIT.y, ORBIT.x * angle.cos())
            .looking_at(Vec3::ZERO, Vec3::Y);
    }
}
