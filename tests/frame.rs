use std::sync::Arc;

use glam::{Vec3, Vec4};
use wgpu_deferred::renderer::device::HeadlessDevice;
use wgpu_deferred::renderer::material::deferred_light::DeferredLightPixelConstants;
use wgpu_deferred::renderer::material::pbr::decode_world_matrix;
use wgpu_deferred::renderer::material::{shared, MaterialAlphaMode, PbrMaterial, SharedMaterial};
use wgpu_deferred::renderer::mesh::VertexAccessor;
use wgpu_deferred::renderer::primitives;
use wgpu_deferred::renderer::texture::Texture;
use wgpu_deferred::renderer::vertex::{VertexAttribute, VertexAttributeSemantic};
use wgpu_deferred::scene::components::{
    AmbientLight, CameraComponent, DirectionalLight, PointLight, ShadowData, ShadowMap, WorldTransform,
};
use wgpu_deferred::scene::{Scene, Transform};
use wgpu_deferred::{RenderSettings, RenderStepManager};

const EYE: Vec3 = Vec3::new(0.0, 3.0, 15.0);

fn build_scene() -> Scene {
    let mut scene = Scene::new();
    scene.spawn_camera(
        Transform::looking_at(EYE, Vec3::ZERO, Vec3::Y),
        CameraComponent::default(),
    );

    let cube = Arc::new(primitives::cube(Vec3::splat(0.5)));
    for (index, x) in [-3.0f32, 0.0, 3.0].into_iter().enumerate() {
        let material: SharedMaterial = shared(PbrMaterial::new(Vec4::new(0.8, 0.8, 0.8, 1.0)));
        scene.spawn_renderable(
            &format!("Opaque {index}"),
            Transform::from_translation(Vec3::new(x, 0.0, 0.0)),
            Arc::clone(&cube),
            material,
        );
    }

    let sphere = Arc::new(primitives::sphere(16, 8));
    for (index, z) in [4.0f32, -4.0].into_iter().enumerate() {
        let material: SharedMaterial = shared(
            PbrMaterial::new(Vec4::new(0.2, 0.5, 1.0, 0.5)).with_alpha_mode(MaterialAlphaMode::Blend),
        );
        scene.spawn_renderable(
            &format!("Glass {index}"),
            Transform::from_translation(Vec3::new(0.0, 1.0, z)),
            Arc::clone(&sphere),
            material,
        );
    }

    scene.world.spawn((
        WorldTransform(Transform::looking_at(Vec3::new(4.0, 8.0, 4.0), Vec3::ZERO, Vec3::Y)),
        DirectionalLight::new(Vec3::ONE, 3.0).with_shadows(),
    ));
    scene.world.spawn((
        WorldTransform::default(),
        AmbientLight {
            color: Vec3::splat(0.2),
            intensity: 1.0,
        },
    ));
    scene
}

fn ready_manager(device: &mut HeadlessDevice, settings: &RenderSettings) -> RenderStepManager {
    let mut manager = RenderStepManager::new(settings);
    manager.create_device_dependent_resources(device).unwrap();
    manager
        .create_window_size_dependent_resources(device, 64, 64)
        .unwrap();
    manager
}

fn shadow_light_count(scene: &Scene, shadows_enabled: bool) -> usize {
    scene
        .world
        .query::<&DirectionalLight>()
        .iter()
        .filter(|(_, light)| light.shadows_enabled == shadows_enabled)
        .count()
}

#[test]
fn second_frame_reuses_every_variant_and_sorts_transparency() {
    let mut device = HeadlessDevice::new();
    let mut manager = RenderStepManager::new(&RenderSettings::default());
    manager.create_device_dependent_resources(&mut device).unwrap();
    manager
        .create_window_size_dependent_resources(&mut device, 320, 180)
        .unwrap();
    let mut scene = build_scene();

    manager.render(&mut device, &mut scene).unwrap();
    let compiled = device.compile_count();
    assert!(compiled > 0);

    device.clear_recording();
    manager.render(&mut device, &mut scene).unwrap();
    assert_eq!(device.compile_count(), compiled);
    assert_eq!(manager.frame_count(), 2);
    assert!(!manager.has_fatal_error());

    let stats = manager.stats();
    assert_eq!(stats.visible_entities, 5);
    assert_eq!(stats.opaque_entities, 3);
    assert_eq!(stats.alpha_entities, 2);
    assert_eq!(stats.shadow_passes, 1);
    assert_eq!(stats.light_batches, 1);

    let distances: Vec<f32> = device
        .draws()
        .iter()
        .filter(|draw| draw.in_event("Transparent"))
        .map(|draw| {
            let world = decode_world_matrix(&draw.vertex_constants[0]).unwrap();
            world.w_axis.truncate().distance(EYE)
        })
        .collect();
    assert_eq!(distances.len(), 2);
    assert!(distances[0] >= distances[1]);

    assert!(manager
        .destroy_device_dependent_resources(&mut device, &scene.world)
        .is_ok());
}

#[test]
fn disabling_deferred_rendering_skips_opaque_entities() {
    let mut device = HeadlessDevice::new();
    let mut manager = RenderStepManager::new(&RenderSettings::default());
    manager.create_device_dependent_resources(&mut device).unwrap();
    manager
        .create_window_size_dependent_resources(&mut device, 64, 64)
        .unwrap();
    manager.set_deferred_rendering_enabled(false);
    let mut scene = build_scene();

    manager.render(&mut device, &mut scene).unwrap();
    let stats = manager.stats();
    assert_eq!(stats.opaque_entities, 0);
    assert_eq!(stats.light_batches, 0);
    assert_eq!(stats.alpha_entities, 2);
    assert!(device.draws().iter().all(|draw| !draw.in_event("Opaque")));
}

#[test]
fn step_failures_stop_rendering_until_the_device_is_recreated() {
    let mut device = HeadlessDevice::new();
    let mut manager = ready_manager(&mut device, &RenderSettings::default());
    let mut scene = build_scene();

    // Float joint indices are not a supported skinning layout.
    let cube = primitives::cube(Vec3::splat(0.5));
    let vertices = cube
        .attribute(VertexAttributeSemantic::primary(VertexAttribute::Position))
        .unwrap()
        .count;
    let skinned = cube
        .with_attribute(
            VertexAttributeSemantic::primary(VertexAttribute::Joints),
            VertexAccessor::vec4(&vec![Vec4::ZERO; vertices]),
        )
        .with_attribute(
            VertexAttributeSemantic::primary(VertexAttribute::Weights),
            VertexAccessor::vec4(&vec![Vec4::X; vertices]),
        );
    scene.spawn_renderable(
        "Bad joints",
        Transform::from_translation(Vec3::new(0.0, 0.0, 2.0)),
        Arc::new(skinned),
        shared(PbrMaterial::default()),
    );

    manager.render(&mut device, &mut scene).unwrap();
    assert!(manager.has_fatal_error());

    device.clear_recording();
    manager.render(&mut device, &mut scene).unwrap();
    assert!(device.draws().is_empty());
    assert!(manager.has_fatal_error());
    assert_eq!(manager.frame_count(), 1);

    manager
        .destroy_device_dependent_resources(&mut device, &scene.world)
        .unwrap();
    assert!(!manager.has_fatal_error());
    manager.create_device_dependent_resources(&mut device).unwrap();
    assert!(!manager.has_fatal_error());
}

#[test]
fn unsupported_shadow_maps_are_fatal_before_any_step_runs() {
    let mut device = HeadlessDevice::new();
    let mut manager = ready_manager(&mut device, &RenderSettings::default());
    let mut scene = build_scene();
    let mut light = DirectionalLight::new(Vec3::ONE, 1.0);
    light.shadow_data = Some(ShadowData::new(ShadowMap::Basic(Arc::new(
        Texture::solid_color("standalone shadow", [255; 4]),
    ))));
    scene.world.spawn((WorldTransform::default(), light));

    manager.render(&mut device, &mut scene).unwrap();
    assert!(manager.has_fatal_error());
    assert!(device.draws().is_empty());

    manager.render(&mut device, &mut scene).unwrap();
    assert!(device.draws().is_empty());
    assert_eq!(manager.frame_count(), 0);
}

#[test]
fn lights_beyond_capacity_draw_extra_batches_without_emission() {
    let mut device = HeadlessDevice::new();
    let mut manager = ready_manager(&mut device, &RenderSettings::default());
    let mut scene = Scene::new();
    scene.spawn_camera(
        Transform::looking_at(EYE, Vec3::ZERO, Vec3::Y),
        CameraComponent::default(),
    );
    scene.spawn_renderable(
        "Floor",
        Transform::default(),
        Arc::new(primitives::cube(Vec3::new(5.0, 0.1, 5.0))),
        shared(PbrMaterial::default()),
    );
    for index in 0..10 {
        let angle = index as f32 * std::f32::consts::TAU / 10.0;
        scene.world.spawn((
            WorldTransform(Transform::from_translation(Vec3::new(
                angle.cos() * 3.0,
                2.0,
                angle.sin() * 3.0,
            ))),
            PointLight {
                color: Vec3::ONE,
                intensity: 2.0,
            },
        ));
    }

    manager.render(&mut device, &mut scene).unwrap();
    assert!(!manager.has_fatal_error());
    assert_eq!(manager.stats().light_batches, 2);

    let emitted: Vec<u32> = device
        .draws()
        .iter()
        .filter(|draw| draw.in_event("Light Accumulation"))
        .map(|draw| {
            bytemuck::pod_read_unaligned::<DeferredLightPixelConstants>(&draw.pixel_constants[0])
                .emitted_enabled
        })
        .collect();
    assert_eq!(emitted, vec![1, 0]);
}

#[test]
fn exhausted_shadow_pool_disables_shadows_on_the_extra_light() {
    let settings = RenderSettings {
        shadow_map_array_size: 1,
        ..RenderSettings::default()
    };
    let mut device = HeadlessDevice::new();
    let mut manager = ready_manager(&mut device, &settings);
    let mut scene = build_scene();
    scene.world.spawn((
        WorldTransform(Transform::looking_at(Vec3::new(-4.0, 8.0, 4.0), Vec3::ZERO, Vec3::Y)),
        DirectionalLight::new(Vec3::ONE, 1.0).with_shadows(),
    ));
    assert_eq!(shadow_light_count(&scene, true), 2);

    manager.render(&mut device, &mut scene).unwrap();
    assert!(!manager.has_fatal_error());
    assert_eq!(shadow_light_count(&scene, true), 1);
    assert_eq!(shadow_light_count(&scene, false), 1);
    assert_eq!(manager.stats().shadow_passes, 1);

    manager.render(&mut device, &mut scene).unwrap();
    assert_eq!(manager.frame_count(), 2);
    assert_eq!(manager.stats().shadow_passes, 1);
}
