// scene/scene.rs
use std::sync::Arc;

use glam::Mat4;
use hecs::{Entity, World};

use super::components::{CameraComponent, Name, RenderableComponent, WorldTransform};
use crate::error::{RenderError, RenderResult};
use crate::renderer::camera::CameraData;
use crate::renderer::device::RenderDevice;
use crate::renderer::entity_renderer::EntityRenderer;
use crate::renderer::lights::EnvironmentMaps;
use crate::renderer::material::SharedMaterial;
use crate::renderer::mesh::MeshData;
use crate::renderer::texture::Texture;
use crate::scene::Transform;

/// Hook for tools that draw gizmos and other debug geometry. Invoked from the
/// debug step with the frame camera.
pub trait DebugShapeRenderer: Send {
    fn render_debug_shapes(
        &mut self,
        device: &mut dyn RenderDevice,
        world: &World,
        entity_renderer: &mut EntityRenderer,
        camera: &CameraData,
    ) -> RenderResult<()>;
}

/// Entities plus the frame-wide inputs of the render pipeline.
pub struct Scene {
    pub world: World,
    main_camera: Option<Entity>,
    sky_texture: Option<Arc<Texture>>,
    pub environment: EnvironmentMaps,
    debug_renderer: Option<Box<dyn DebugShapeRenderer>>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            world: World::new(),
            main_camera: None,
            sky_texture: None,
            environment: EnvironmentMaps::default(),
            debug_renderer: None,
        }
    }

    pub fn main_camera(&self) -> Option<Entity> {
        self.main_camera
    }

    pub fn set_main_camera(&mut self, camera: Option<Entity>) {
        self.main_camera = camera;
    }

    /// Spawns a camera entity and makes it the main camera.
    pub fn spawn_camera(&mut self, transform: Transform, camera: CameraComponent) -> Entity {
        let entity = self
            .world
            .spawn((Name::new("Main Camera"), WorldTransform(transform), camera));
        self.main_camera = Some(entity);
        entity
    }

    pub fn spawn_renderable(
        &mut self,
        name: &str,
        transform: Transform,
        mesh: Arc<MeshData>,
        material: SharedMaterial,
    ) -> Entity {
        self.world.spawn((
            Name::new(name),
            WorldTransform(transform),
            RenderableComponent::new(mesh, material),
        ))
    }

    /// Camera matrices for the main camera. `None` when no camera is set.
    pub fn camera_data(&self, aspect: f32) -> RenderResult<Option<CameraData>> {
        let Some(entity) = self.main_camera else {
            return Ok(None);
        };
        let camera = self
            .world
            .get::<&CameraComponent>(entity)
            .map_err(|_| RenderError::configuration("Main camera entity has no CameraComponent"))?;
        let camera_world = self
            .world
            .get::<&WorldTransform>(entity)
            .map(|transform| transform.matrix())
            .unwrap_or(Mat4::IDENTITY);
        Ok(Some(CameraData::new(
            camera_world.inverse(),
            camera.projection(aspect),
        )))
    }

    pub fn sky_texture(&self) -> Option<&Arc<Texture>> {
        self.sky_texture.as_ref()
    }

    pub fn set_sky_texture(&mut self, texture: Option<Arc<Texture>>) {
        self.sky_texture = texture;
    }

    pub fn set_debug_renderer(&mut self, renderer: Option<Box<dyn DebugShapeRenderer>>) {
        self.debug_renderer = renderer;
    }

    pub fn has_debug_renderer(&self) -> bool {
        self.debug_renderer.is_some()
    }

    /// Runs the debug hook, if any.
    pub fn render_debug_shapes(
        &mut self,
        device: &mut dyn RenderDevice,
        entity_renderer: &mut EntityRenderer,
        camera: &CameraData,
    ) -> RenderResult<()> {
        match self.debug_renderer.as_mut() {
            Some(debug_renderer) => {
                debug_renderer.render_debug_shapes(device, &self.world, entity_renderer, camera)
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn camera_without_component_is_a_configuration_error() {
        let mut scene = Scene::new();
        let entity = scene.world.spawn((WorldTransform::default(),));
        scene.set_main_camera(Some(entity));
        assert!(matches!(
            scene.camera_data(1.0),
            Err(RenderError::Configuration(_))
        ));
    }

    #[test]
    fn missing_camera_yields_no_camera_data() {
        assert!(Scene::new().camera_data(1.0).unwrap().is_none());
    }

    #[test]
    fn camera_data_uses_the_inverse_transform() {
        let mut scene = Scene::new();
        let eye = Vec3::new(0.0, 2.0, 10.0);
        scene.spawn_camera(
            Transform::looking_at(eye, Vec3::ZERO, Vec3::Y),
            CameraComponent::default(),
        );
        let camera = scene.camera_data(16.0 / 9.0).unwrap().unwrap();
        assert!(camera.position.abs_diff_eq(eye, 1e-4));
        let origin = camera.view.transform_point3(Vec3::ZERO);
        assert!(origin.z < 0.0);
    }
}
