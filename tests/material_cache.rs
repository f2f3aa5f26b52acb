use std::sync::Arc;

use glam::{Vec3, Vec4};
use wgpu_deferred::renderer::device::HeadlessDevice;
use wgpu_deferred::renderer::lights::{RenderLightData, MAX_LIGHTS};
use wgpu_deferred::renderer::material::{shared, PbrMaterial, PbrTexture, SharedMaterial, UnlitMaterial};
use wgpu_deferred::renderer::material_manager::{MaterialContext, MaterialManager};
use wgpu_deferred::renderer::mesh::MeshData;
use wgpu_deferred::renderer::primitives;
use wgpu_deferred::renderer::render_pass::RenderPassBlendMode;
use wgpu_deferred::renderer::texture::Texture;
use wgpu_deferred::RenderResult;

fn bind_once(
    device: &mut HeadlessDevice,
    manager: &mut MaterialManager,
    context: &mut MaterialContext,
    material: &SharedMaterial,
    mesh: &MeshData,
) -> RenderResult<()> {
    let lights = RenderLightData::new();
    manager.bind(
        device,
        context,
        material,
        mesh.layout(),
        &lights,
        RenderPassBlendMode::Opaque,
        true,
    )?;
    manager.unbind(device);
    Ok(())
}

#[test]
fn rebinding_an_unchanged_material_never_recompiles() {
    let mut device = HeadlessDevice::new();
    let mut manager = MaterialManager::default();
    let mesh = primitives::cube(Vec3::ONE);
    let material: SharedMaterial = shared(UnlitMaterial::default());
    let mut context = MaterialContext::default();

    bind_once(&mut device, &mut manager, &mut context, &material, &mesh).unwrap();
    let compiled = device.compile_count();
    for _ in 0..5 {
        bind_once(&mut device, &mut manager, &mut context, &material, &mesh).unwrap();
    }
    assert_eq!(device.compile_count(), compiled);
    assert_eq!(manager.compile_count(), 1);
}

#[test]
fn only_variant_changes_trigger_compilation() {
    let mut device = HeadlessDevice::new();
    let mut manager = MaterialManager::default();
    let mesh = primitives::cube(Vec3::ONE);
    let pbr = shared(PbrMaterial::default());
    let material: SharedMaterial = pbr.clone();
    let mut context = MaterialContext::default();

    bind_once(&mut device, &mut manager, &mut context, &material, &mesh).unwrap();
    assert_eq!(manager.compile_count(), 1);

    pbr.write().unwrap().base_color = Vec4::new(0.2, 0.4, 0.8, 1.0);
    bind_once(&mut device, &mut manager, &mut context, &material, &mesh).unwrap();
    assert_eq!(manager.compile_count(), 1);

    pbr.write().unwrap().set_texture(
        PbrTexture::BaseColor,
        Some(Arc::new(Texture::solid_color("albedo", [200, 120, 40, 255]))),
    );
    bind_once(&mut device, &mut manager, &mut context, &material, &mesh).unwrap();
    assert_eq!(manager.compile_count(), 2);
    assert_eq!(context.resource_views().len(), 1);
}

#[test]
fn light_buffer_rejects_the_ninth_light() {
    let mut lights = RenderLightData::new();
    assert!(lights.add_directional_light(Vec3::NEG_Y, Vec3::ONE, 2.0, None));
    assert!(lights.add_ambient_light(Vec3::splat(0.1), 1.0));
    for index in 2..MAX_LIGHTS {
        assert!(lights.add_point_light(Vec3::new(index as f32, 0.0, 0.0), Vec3::ONE, 1.0));
    }
    assert!(lights.is_full());
    assert!(!lights.add_point_light(Vec3::ZERO, Vec3::ONE, 1.0));
    assert_eq!(lights.len(), MAX_LIGHTS);
}
