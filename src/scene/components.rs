// scene/components.rs
// hecs components consumed by the render pipeline

use std::sync::Arc;

use glam::{Mat4, Vec3};

use crate::renderer::material::SharedMaterial;
use crate::renderer::material_manager::MaterialContext;
use crate::renderer::mesh::MeshData;
use crate::renderer::renderer_data::RendererData;
use crate::renderer::shadow_map::ShadowMapSlice;
use crate::renderer::texture::Texture;
use crate::scene::bounds::{Aabb, BoundingSphere};
use crate::scene::Transform;

// ============================================================================
// Core Rendering Components
// ============================================================================

/// World-space transform (computed by the scene graph update)
#[derive(Debug, Clone, Copy, Default)]
pub struct WorldTransform(pub Transform);

impl WorldTransform {
    pub fn matrix(&self) -> Mat4 {
        self.0.matrix()
    }
}

/// Mesh, material and the GPU state derived from them.
pub struct RenderableComponent {
    pub(crate) mesh: Option<Arc<MeshData>>,
    pub(crate) material: Option<SharedMaterial>,
    pub visible: bool,
    pub cast_shadow: bool,
    pub(crate) renderer_data: Option<RendererData>,
    pub(crate) material_context: MaterialContext,
}

impl RenderableComponent {
    pub fn new(mesh: Arc<MeshData>, material: SharedMaterial) -> Self {
        Self {
            mesh: Some(mesh),
            material: Some(material),
            visible: true,
            cast_shadow: true,
            renderer_data: None,
            material_context: MaterialContext::default(),
        }
    }

    /// A renderable whose mesh hasn't been loaded yet.
    pub fn pending(material: SharedMaterial) -> Self {
        Self {
            mesh: None,
            material: Some(material),
            visible: true,
            cast_shadow: true,
            renderer_data: None,
            material_context: MaterialContext::default(),
        }
    }

    pub fn with_cast_shadow(mut self, cast_shadow: bool) -> Self {
        self.cast_shadow = cast_shadow;
        self
    }

    pub fn mesh(&self) -> Option<&Arc<MeshData>> {
        self.mesh.as_ref()
    }

    pub fn material(&self) -> Option<&SharedMaterial> {
        self.material.as_ref()
    }

    /// Replacing the mesh marks the derived vertex buffers stale; the next
    /// draw releases and rebuilds them.
    pub fn set_mesh(&mut self, mesh: Option<Arc<MeshData>>) {
        let same = match (&self.mesh, &mesh) {
            (Some(current), Some(new)) => Arc::ptr_eq(current, new),
            (None, None) => true,
            _ => false,
        };
        if !same {
            self.mesh = mesh;
            if let Some(data) = self.renderer_data.as_mut() {
                data.mark_stale();
            }
            self.material_context.reset();
        }
    }

    /// Replacing the material drops the compiled variant.
    pub fn set_material(&mut self, material: Option<SharedMaterial>) {
        let same = match (&self.material, &material) {
            (Some(current), Some(new)) => Arc::ptr_eq(current, new),
            (None, None) => true,
            _ => false,
        };
        if !same {
            self.material = material;
            self.material_context.reset();
        }
    }

    pub fn renderer_data(&self) -> Option<&RendererData> {
        self.renderer_data.as_ref()
    }

    pub fn material_context(&self) -> &MaterialContext {
        &self.material_context
    }

    pub fn material_context_mut(&mut self) -> &mut MaterialContext {
        &mut self.material_context
    }

    pub fn world_bounds(&self, world: &WorldTransform) -> Option<BoundingSphere> {
        self.mesh
            .as_ref()
            .map(|mesh| mesh.bounds().transformed(&world.matrix()))
    }
}

impl std::fmt::Debug for RenderableComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderableComponent")
            .field("mesh", &self.mesh.as_ref().map(|mesh| mesh.name().to_string()))
            .field("visible", &self.visible)
            .field("cast_shadow", &self.cast_shadow)
            .field("has_renderer_data", &self.renderer_data.is_some())
            .finish()
    }
}

// ============================================================================
// Camera
// ============================================================================

/// Perspective projection parameters; the view comes from the entity transform.
#[derive(Debug, Clone, Copy)]
pub struct CameraComponent {
    pub fov_y_radians: f32,
    pub near_plane: f32,
    pub far_plane: f32,
}

impl CameraComponent {
    pub fn projection(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_radians, aspect, self.near_plane, self.far_plane)
    }
}

impl Default for CameraComponent {
    fn default() -> Self {
        Self {
            fov_y_radians: 60f32.to_radians(),
            near_plane: 0.1,
            far_plane: 100.0,
        }
    }
}

// ============================================================================
// Lighting Components
// ============================================================================

#[derive(Debug)]
pub enum ShadowMap {
    /// A standalone depth texture. Not supported by the lighting passes.
    Basic(Arc<Texture>),
    ArraySlice(ShadowMapSlice),
}

impl ShadowMap {
    pub fn as_array_slice(&self) -> Option<&ShadowMapSlice> {
        match self {
            ShadowMap::ArraySlice(slice) => Some(slice),
            ShadowMap::Basic(_) => None,
        }
    }
}

/// Shadow state a light keeps between frames.
#[derive(Debug)]
pub struct ShadowData {
    pub shadow_map: ShadowMap,
    pub world_view_proj: Mat4,
    /// Light-space bounds of the shadow casters.
    pub caster_volume: Option<Aabb>,
}

impl ShadowData {
    pub fn new(shadow_map: ShadowMap) -> Self {
        Self {
            shadow_map,
            world_view_proj: Mat4::IDENTITY,
            caster_volume: None,
        }
    }
}

/// Directional light component; shines along the entity's forward (-Z) axis.
#[derive(Debug)]
pub struct DirectionalLight {
    pub color: Vec3,
    pub intensity: f32,
    pub shadows_enabled: bool,
    pub shadow_map_bias: f32,
    pub shadow_data: Option<ShadowData>,
}

impl DirectionalLight {
    pub fn new(color: Vec3, intensity: f32) -> Self {
        Self {
            color,
            intensity,
            shadows_enabled: false,
            shadow_map_bias: 0.005,
            shadow_data: None,
        }
    }

    pub fn with_shadows(mut self) -> Self {
        self.shadows_enabled = true;
        self
    }
}

/// Point light component
#[derive(Debug, Clone, Copy)]
pub struct PointLight {
    pub color: Vec3,
    pub intensity: f32,
}

/// Ambient light component
#[derive(Debug, Clone, Copy)]
pub struct AmbientLight {
    pub color: Vec3,
    pub intensity: f32,
}

// ============================================================================
// Utility Components
// ============================================================================

/// Name component for debugging
#[derive(Debug, Clone)]
pub struct Name(pub String);

impl Name {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

// ============================================================================
// Animation Components
// ============================================================================

/// Joint poses for a skinned mesh, produced by the animation system.
#[derive(Debug, Clone, Default)]
pub struct SkinnedMesh {
    /// World transforms of each joint.
    pub joint_transforms: Vec<Mat4>,
    pub inverse_bind_matrices: Vec<Mat4>,
}

/// Per-frame morph target weights.
#[derive(Debug, Clone, Default)]
pub struct MorphWeights(pub Vec<f32>);
