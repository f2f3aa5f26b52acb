// renderer/entity_renderer.rs
// Draws single entities and standalone renderables through the material cache

use std::sync::Arc;

use glam::Mat4;
use hecs::{Entity, World};

use crate::error::{RenderError, RenderResult};
use crate::renderer::camera::CameraData;
use crate::renderer::device::RenderDevice;
use crate::renderer::features::RendererFeatures;
use crate::renderer::lights::{EnvironmentMaps, LightProvider, RenderLightData};
use crate::renderer::material::{MaterialAlphaMode, MaterialLightMode, SharedMaterial};
use crate::renderer::material_manager::{MaterialContext, MaterialManager};
use crate::renderer::mesh::MeshData;
use crate::renderer::primitives;
use crate::renderer::render_pass::RenderPassBlendMode;
use crate::renderer::renderer_data::{RendererAnimationData, RendererData};
use crate::renderer::texture::Texture;
use crate::scene::components::{MorphWeights, Name, RenderableComponent, SkinnedMesh, WorldTransform};

/// A mesh and material drawn outside of the entity world, such as the
/// full-screen lighting quads and the sky sphere.
pub struct Renderable {
    name: String,
    mesh: Arc<MeshData>,
    material: SharedMaterial,
    renderer_data: Option<RendererData>,
    material_context: MaterialContext,
    pub visible: bool,
}

impl Renderable {
    pub fn new(name: impl Into<String>, mesh: Arc<MeshData>, material: SharedMaterial) -> Self {
        Self {
            name: name.into(),
            mesh,
            material,
            renderer_data: None,
            material_context: MaterialContext::default(),
            visible: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mesh(&self) -> &Arc<MeshData> {
        &self.mesh
    }

    pub fn material(&self) -> &SharedMaterial {
        &self.material
    }

    pub fn set_material(&mut self, material: SharedMaterial) {
        if !Arc::ptr_eq(&self.material, &material) {
            self.material = material;
            self.material_context.reset();
        }
    }

    pub fn material_context(&self) -> &MaterialContext {
        &self.material_context
    }

    /// Releases the vertex buffers and the compiled variant.
    pub fn destroy(&mut self, device: &mut dyn RenderDevice) {
        if let Some(mut data) = self.renderer_data.take() {
            data.destroy(device);
        }
        self.material_context.reset();
    }
}

impl std::fmt::Debug for Renderable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderable")
            .field("name", &self.name)
            .field("mesh", &self.mesh.name())
            .field("visible", &self.visible)
            .finish()
    }
}

fn available_features(features: RendererFeatures, light_data: &RenderLightData) -> RendererFeatures {
    RendererFeatures {
        shadows_enabled: features.shadows_enabled && light_data.shadow_map_array.is_some(),
        irradiance_mapping_enabled: features.irradiance_mapping_enabled
            && light_data.environment.is_complete(),
        ..features
    }
}

/// Borrowed pieces of one draw.
struct DrawItem<'a> {
    mesh: &'a MeshData,
    material: &'a SharedMaterial,
    renderer_data: &'a mut Option<RendererData>,
    context: &'a mut MaterialContext,
    world: Mat4,
}

/// Per-render-thread drawing state: the material cache, the light buffers and
/// the animation scratch data.
pub struct EntityRenderer {
    features: RendererFeatures,
    material_manager: MaterialManager,
    light_data: RenderLightData,
    unlit_light_data: RenderLightData,
    animation: RendererAnimationData,
    draw_count: usize,
}

impl EntityRenderer {
    pub fn new(features: RendererFeatures) -> Self {
        let light_data = RenderLightData::new();
        Self {
            features,
            material_manager: MaterialManager::new(available_features(features, &light_data)),
            light_data,
            unlit_light_data: RenderLightData::new(),
            animation: RendererAnimationData::default(),
            draw_count: 0,
        }
    }

    pub fn material_manager(&self) -> &MaterialManager {
        &self.material_manager
    }

    /// Requested features. Materials compile against the subset whose
    /// resources are present, see [`EntityRenderer::set_light_resources`].
    pub fn features(&self) -> &RendererFeatures {
        &self.features
    }

    pub fn set_features(&mut self, features: RendererFeatures) {
        self.features = features;
        self.refresh_material_features();
    }

    /// Environment maps and shadow array handed to lit materials. Shadow and
    /// irradiance variants are only compiled while these are available.
    pub fn set_light_resources(&mut self, environment: EnvironmentMaps, shadow_map_array: Option<Arc<Texture>>) {
        self.light_data.environment = environment;
        self.light_data.shadow_map_array = shadow_map_array;
        self.refresh_material_features();
    }

    fn refresh_material_features(&mut self) {
        let available = available_features(self.features, &self.light_data);
        if *self.material_manager.features() != available {
            self.material_manager.set_features(available);
        }
    }

    pub fn light_data(&self) -> &RenderLightData {
        &self.light_data
    }

    /// Draw calls issued since the last reset.
    pub fn draw_count(&self) -> usize {
        self.draw_count
    }

    pub fn reset_draw_count(&mut self) {
        self.draw_count = 0;
    }

    /// Alpha mode of the entity's material, if it has one.
    pub fn alpha_mode(world: &World, entity: Entity) -> Option<MaterialAlphaMode> {
        let renderable = world.get::<&RenderableComponent>(entity).ok()?;
        let material = renderable.material()?;
        let alpha_mode = material.read().ok()?.alpha_mode();
        Some(alpha_mode)
    }

    /// Draws one entity. Returns whether a draw was issued.
    ///
    /// Entities without a [`RenderableComponent`] or marked invisible are
    /// skipped. Transient failures hide the entity and are logged.
    pub fn render_entity(
        &mut self,
        device: &mut dyn RenderDevice,
        world: &World,
        entity: Entity,
        camera: &CameraData,
        blend_mode: RenderPassBlendMode,
        lights: &dyn LightProvider,
    ) -> RenderResult<bool> {
        let Ok(mut renderable) = world.get::<&mut RenderableComponent>(entity) else {
            return Ok(false);
        };
        if !renderable.visible {
            return Ok(false);
        }

        let world_matrix = world
            .get::<&WorldTransform>(entity)
            .map(|transform| transform.matrix())
            .unwrap_or(Mat4::IDENTITY);

        self.animation.clear();
        if let Ok(skin) = world.get::<&SkinnedMesh>(entity) {
            self.animation.set_skin(&world_matrix, &skin)?;
        }
        if let Ok(weights) = world.get::<&MorphWeights>(entity) {
            self.animation.set_morph_weights(&weights.0);
        }

        let RenderableComponent {
            mesh,
            material,
            renderer_data,
            material_context,
            ..
        } = &mut *renderable;

        let result = match (mesh.as_deref(), material.as_ref()) {
            (None, _) => Err(RenderError::MissingMeshData),
            (_, None) => Err(RenderError::MissingMaterial),
            (Some(mesh), Some(material)) => self.draw(
                device,
                DrawItem {
                    mesh,
                    material,
                    renderer_data,
                    context: material_context,
                    world: world_matrix,
                },
                camera,
                blend_mode,
                lights,
            ),
        };

        match result {
            Ok(()) => Ok(true),
            Err(err) if err.is_transient() => {
                renderable.visible = false;
                let name = world
                    .get::<&Name>(entity)
                    .map(|name| name.0.clone())
                    .unwrap_or_default();
                log::warn!(
                    "Hiding entity '{}' ({:?}) after a failed draw: {}",
                    name,
                    entity,
                    err
                );
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Draws a renderable that isn't part of the world.
    pub fn render_renderable(
        &mut self,
        device: &mut dyn RenderDevice,
        renderable: &mut Renderable,
        world: Mat4,
        camera: &CameraData,
        blend_mode: RenderPassBlendMode,
        lights: &dyn LightProvider,
    ) -> RenderResult<bool> {
        if !renderable.visible {
            return Ok(false);
        }
        self.animation.clear();

        let item = DrawItem {
            mesh: &renderable.mesh,
            material: &renderable.material,
            renderer_data: &mut renderable.renderer_data,
            context: &mut renderable.material_context,
            world,
        };
        match self.draw(device, item, camera, blend_mode, lights) {
            Ok(()) => Ok(true),
            Err(err) if err.is_transient() => {
                renderable.visible = false;
                log::warn!("Hiding renderable '{}' after a failed draw: {}", renderable.name, err);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// A full-screen quad drawn with `material`.
    pub fn create_screen_space_quad(material: SharedMaterial) -> Renderable {
        Renderable::new("Screen Space Quad", Arc::new(primitives::screen_quad()), material)
    }

    fn draw(
        &mut self,
        device: &mut dyn RenderDevice,
        item: DrawItem<'_>,
        camera: &CameraData,
        blend_mode: RenderPassBlendMode,
        lights: &dyn LightProvider,
    ) -> RenderResult<()> {
        let light_mode = item
            .material
            .read()
            .map_err(|_| RenderError::usage("material lock poisoned"))?
            .light_mode();

        let light_data = match light_mode {
            MaterialLightMode::Lit => {
                self.light_data.clear();
                lights.provide(&mut self.light_data)?;
                self.light_data.update_buffer(device)?;
                &self.light_data
            }
            MaterialLightMode::Unlit => &self.unlit_light_data,
        };

        self.material_manager.bind(
            device,
            item.context,
            item.material,
            item.mesh.layout(),
            light_data,
            blend_mode,
            camera.enable_pixel_shader,
        )?;

        let result = Self::draw_bound(
            &mut self.material_manager,
            device,
            item.mesh,
            item.renderer_data,
            item.world,
            &self.animation,
            camera,
        );
        self.material_manager.unbind(device);
        if result.is_ok() {
            self.draw_count += 1;
        }
        result
    }

    fn draw_bound(
        manager: &mut MaterialManager,
        device: &mut dyn RenderDevice,
        mesh: &MeshData,
        renderer_data: &mut Option<RendererData>,
        world: Mat4,
        animation: &RendererAnimationData,
        camera: &CameraData,
    ) -> RenderResult<()> {
        let inputs = manager
            .bound_vertex_inputs()
            .ok_or_else(|| RenderError::usage("no material bound for draw"))?
            .to_vec();

        let stale = renderer_data
            .as_ref()
            .map_or(true, |data| !data.matches(&inputs));
        if stale {
            if let Some(mut old) = renderer_data.take() {
                old.destroy(device);
            }
            *renderer_data = Some(RendererData::create(device, mesh, &inputs)?);
        }

        match renderer_data.as_ref() {
            Some(data) => manager.render(device, data, world, animation, camera),
            None => Err(RenderError::MissingMeshData),
        }
    }

    /// Releases the material cache and light buffers. Renderables keep their
    /// contexts until they are reset by their owner.
    pub fn destroy_device_dependent_resources(&mut self, device: &mut dyn RenderDevice) {
        self.material_manager.destroy_device_dependent_resources(device);
        self.light_data.destroy(device);
        self.unlit_light_data.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::HeadlessDevice;
    use crate::renderer::lights::{collect_scene_lights, NoLights, SimpleLightProvider};
    use crate::renderer::material::{shared, PbrMaterial, UnlitMaterial};
    use crate::scene::components::AmbientLight;
    use crate::scene::Transform;
    use glam::{Vec3, Vec4};

    fn spawn_cube(world: &mut World, material: SharedMaterial) -> Entity {
        world.spawn((
            Name::new("cube"),
            WorldTransform(Transform::from_translation(Vec3::new(0.0, 0.0, -5.0))),
            RenderableComponent::new(Arc::new(primitives::cube(Vec3::ONE)), material),
        ))
    }

    #[test]
    fn lit_draws_upload_the_provided_lights() {
        let mut device = HeadlessDevice::new();
        let mut world = World::new();
        world.spawn((AmbientLight {
            color: Vec3::ONE,
            intensity: 0.5,
        },));
        let entity = spawn_cube(&mut world, shared(PbrMaterial::new(Vec4::ONE)));
        let lights = collect_scene_lights(&world).unwrap();

        let mut renderer = EntityRenderer::new(RendererFeatures::default());
        let drawn = renderer
            .render_entity(
                &mut device,
                &world,
                entity,
                &CameraData::default(),
                RenderPassBlendMode::Opaque,
                &SimpleLightProvider::new(&lights),
            )
            .unwrap();
        assert!(drawn);
        assert_eq!(renderer.light_data().len(), 1);
        assert_eq!(renderer.draw_count(), 1);
        assert_eq!(device.draws().len(), 1);
        assert!(!renderer.material_manager().is_bound());
    }

    #[test]
    fn pending_meshes_hide_the_entity() {
        let mut device = HeadlessDevice::new();
        let mut world = World::new();
        let entity = world.spawn((RenderableComponent::pending(shared(UnlitMaterial::default())),));

        let mut renderer = EntityRenderer::new(RendererFeatures::default());
        let drawn = renderer
            .render_entity(
                &mut device,
                &world,
                entity,
                &CameraData::default(),
                RenderPassBlendMode::Opaque,
                &NoLights,
            )
            .unwrap();
        assert!(!drawn);
        assert!(!world.get::<&RenderableComponent>(entity).unwrap().visible);
        assert!(device.draws().is_empty());
    }

    #[test]
    fn shader_failures_hide_only_the_failing_entity() {
        let mut device = HeadlessDevice::new();
        device.fail_shader("PBR_PS.wgsl");
        let mut world = World::new();
        let broken = spawn_cube(&mut world, shared(PbrMaterial::default()));
        let fine = spawn_cube(&mut world, shared(UnlitMaterial::default()));

        let mut renderer = EntityRenderer::new(RendererFeatures::default());
        for entity in [broken, fine] {
            renderer
                .render_entity(
                    &mut device,
                    &world,
                    entity,
                    &CameraData::default(),
                    RenderPassBlendMode::Opaque,
                    &NoLights,
                )
                .unwrap();
        }
        assert!(!world.get::<&RenderableComponent>(broken).unwrap().visible);
        assert!(world.get::<&RenderableComponent>(fine).unwrap().visible);
        assert_eq!(device.draws().len(), 1);
    }

    #[test]
    fn renderer_data_follows_the_bound_inputs() {
        let mut device = HeadlessDevice::new();
        let mut world = World::new();
        let material = shared(UnlitMaterial::default());
        let entity = spawn_cube(&mut world, material.clone());
        let mut renderer = EntityRenderer::new(RendererFeatures::default());
        let draw = |renderer: &mut EntityRenderer, device: &mut HeadlessDevice| {
            renderer
                .render_entity(
                    device,
                    &world,
                    entity,
                    &CameraData::default(),
                    RenderPassBlendMode::Opaque,
                    &NoLights,
                )
                .unwrap()
        };

        assert!(draw(&mut renderer, &mut device));
        let buffers = device.live_buffer_count();
        assert!(draw(&mut renderer, &mut device));
        assert_eq!(device.live_buffer_count(), buffers);

        let inputs = world
            .get::<&RenderableComponent>(entity)
            .unwrap()
            .renderer_data()
            .unwrap()
            .inputs()
            .len();
        assert_eq!(inputs, 1);
    }

    #[test]
    fn shadow_variants_wait_for_the_shadow_array() {
        let mut device = HeadlessDevice::new();
        let mut world = World::new();
        let material = shared(
            PbrMaterial::new(Vec4::new(1.0, 1.0, 1.0, 0.5)).with_alpha_mode(MaterialAlphaMode::Blend),
        );
        let entity = spawn_cube(&mut world, material);
        let mut renderer = EntityRenderer::new(RendererFeatures::default());
        assert!(renderer.features().shadows_enabled);
        assert!(!renderer.material_manager().features().shadows_enabled);
        assert!(!renderer.material_manager().features().irradiance_mapping_enabled);

        let mut draw = |renderer: &mut EntityRenderer| {
            renderer
                .render_entity(
                    &mut device,
                    &world,
                    entity,
                    &CameraData::default(),
                    RenderPassBlendMode::BlendedAlpha,
                    &NoLights,
                )
                .unwrap()
        };
        assert!(draw(&mut renderer));
        let flags = |world: &World| {
            world
                .get::<&RenderableComponent>(entity)
                .unwrap()
                .material_context()
                .flags()
                .clone()
        };
        assert!(!flags(&world).contains("shadows_enabled"));

        renderer.set_light_resources(
            EnvironmentMaps::default(),
            Some(Arc::new(Texture::solid_color("shadow array", [255; 4]))),
        );
        assert!(draw(&mut renderer));
        assert!(flags(&world).contains("shadows_enabled"));
    }

    #[test]
    fn mesh_swaps_release_the_old_buffers() {
        let mut device = HeadlessDevice::new();
        let mut world = World::new();
        let entity = spawn_cube(&mut world, shared(PbrMaterial::default()));
        let mut renderer = EntityRenderer::new(RendererFeatures::default());
        let mut draw = |device: &mut HeadlessDevice| {
            renderer
                .render_entity(
                    device,
                    &world,
                    entity,
                    &CameraData::default(),
                    RenderPassBlendMode::Opaque,
                    &NoLights,
                )
                .unwrap()
        };

        assert!(draw(&mut device));
        let baseline = device.live_buffer_count();
        for _ in 0..3 {
            world
                .get::<&mut RenderableComponent>(entity)
                .unwrap()
                .set_mesh(Some(Arc::new(primitives::cube(Vec3::splat(2.0)))));
            assert!(world
                .get::<&RenderableComponent>(entity)
                .unwrap()
                .renderer_data()
                .unwrap()
                .is_stale());
            assert!(draw(&mut device));
        }
        assert_eq!(device.live_buffer_count(), baseline);
        let renderable = world.get::<&RenderableComponent>(entity).unwrap();
        assert!(!renderable.renderer_data().unwrap().is_stale());
    }

    #[test]
    fn screen_quads_draw_without_an_entity() {
        let mut device = HeadlessDevice::new();
        let mut renderer = EntityRenderer::new(RendererFeatures::default());
        let mut quad = EntityRenderer::create_screen_space_quad(shared(UnlitMaterial::default()));
        let drawn = renderer
            .render_renderable(
                &mut device,
                &mut quad,
                Mat4::IDENTITY,
                &CameraData::IDENTITY,
                RenderPassBlendMode::Opaque,
                &NoLights,
            )
            .unwrap();
        assert!(drawn);
        let draw = &device.draws()[0];
        assert!(draw.indexed);
        assert_eq!(draw.element_count, 6);

        quad.destroy(&mut device);
        assert!(!quad.material_context().is_valid());
    }
}
