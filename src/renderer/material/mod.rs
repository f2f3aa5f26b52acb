//! Materials describe which shader variant to compile for a draw and which
//! constants and resources feed it. They never own compiled programs; those
//! live in the [`MaterialManager`](crate::renderer::material_manager::MaterialManager).

pub mod clear_gbuffer;
pub mod deferred_light;
pub mod pbr;
pub mod skybox;
pub mod unlit;

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::RenderResult;
use crate::renderer::device::ShaderCompileSettings;
use crate::renderer::features::RendererFeatures;
use crate::renderer::lights::RenderLightData;
use crate::renderer::render_pass::RenderPassBlendMode;
use crate::renderer::renderer_data::RendererAnimationData;
use crate::renderer::texture::{SamplerDescriptor, Texture};
use crate::renderer::vertex::{ElementType, MeshVertexLayout, VertexAttribute, VertexAttributeElement};

pub use clear_gbuffer::ClearGBufferMaterial;
pub use deferred_light::DeferredLightMaterial;
pub use pbr::{PbrMaterial, PbrTexture};
pub use skybox::SkyboxMaterial;
pub use unlit::UnlitMaterial;

/// Materials are shared between renderables and edited in place.
pub type SharedMaterial = Arc<RwLock<dyn Material>>;

pub fn shared<M: Material + 'static>(material: M) -> Arc<RwLock<M>> {
    Arc::new(RwLock::new(material))
}

/// Index of the per-type constant buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MaterialType {
    Pbr,
    Unlit,
    DeferredLight,
    Skybox,
    ClearGBuffer,
}

impl MaterialType {
    pub const COUNT: usize = 5;

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            MaterialType::Pbr => "PBR",
            MaterialType::Unlit => "Unlit",
            MaterialType::DeferredLight => "DeferredLight",
            MaterialType::Skybox => "Skybox",
            MaterialType::ClearGBuffer => "ClearGBuffer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialAlphaMode {
    #[default]
    Opaque,
    Mask,
    Blend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialFaceCullMode {
    #[default]
    BackFace,
    FrontFace,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialLightMode {
    Lit,
    Unlit,
}

/// Textures and sampler descriptions a variant binds, in slot order.
#[derive(Debug, Clone, Default)]
pub struct ShaderResources {
    pub textures: Vec<Arc<Texture>>,
    pub samplers: Vec<SamplerDescriptor>,
}

impl ShaderResources {
    pub fn push(&mut self, texture: Arc<Texture>, sampler: Option<SamplerDescriptor>) {
        self.textures.push(texture);
        if let Some(sampler) = sampler {
            self.samplers.push(sampler);
        }
    }
}

/// Per-draw values used to fill the constant buffers.
#[derive(Debug, Clone, Copy)]
pub struct ConstantInputs<'a> {
    pub world: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub eye_position: Vec3,
    pub animation: &'a RendererAnimationData,
}

impl ConstantInputs<'_> {
    pub fn world_view_proj(&self) -> Mat4 {
        self.projection * self.view * self.world
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct BaseVertexConstants {
    pub world_view_proj: [[f32; 4]; 4],
}

pub trait Material: Send + Sync + fmt::Debug {
    fn material_type(&self) -> MaterialType;

    fn light_mode(&self) -> MaterialLightMode;

    fn alpha_mode(&self) -> MaterialAlphaMode {
        MaterialAlphaMode::Opaque
    }

    fn face_cull_mode(&self) -> MaterialFaceCullMode {
        MaterialFaceCullMode::BackFace
    }

    /// Properties that change the generated shader code. Colors and scalar
    /// factors never belong here.
    fn compiler_properties(&self) -> serde_json::Value {
        json!({
            "alpha_mode": self.alpha_mode(),
            "face_cull_mode": self.face_cull_mode(),
        })
    }

    fn compiler_properties_hash(&self) -> u64 {
        let serialized = self.compiler_properties().to_string();
        log::trace!(
            "Compiler properties of {}: {}",
            self.material_type().name(),
            serialized
        );
        let mut hasher = DefaultHasher::new();
        serialized.hash(&mut hasher);
        hasher.finish()
    }

    fn config_flags(
        &self,
        _features: &RendererFeatures,
        _blend_mode: RenderPassBlendMode,
        _layout: &MeshVertexLayout,
    ) -> RenderResult<BTreeSet<String>> {
        Ok(BTreeSet::new())
    }

    fn vertex_inputs(&self, _flags: &BTreeSet<String>) -> RenderResult<Vec<VertexAttributeElement>> {
        Ok(vec![VertexAttributeElement::float(
            VertexAttribute::Position,
            0,
            ElementType::Vector3,
        )])
    }

    fn vertex_shader_settings(&self, _flags: &BTreeSet<String>) -> ShaderCompileSettings {
        ShaderCompileSettings::new(
            format!("{}_VS.wgsl", self.material_type().name()),
            "vs_main",
        )
    }

    fn pixel_shader_settings(&self, _flags: &BTreeSet<String>) -> ShaderCompileSettings {
        ShaderCompileSettings::new(
            format!("{}_PS.wgsl", self.material_type().name()),
            "fs_main",
        )
    }

    fn shader_resources(
        &self,
        _flags: &BTreeSet<String>,
        _light_data: &RenderLightData,
    ) -> RenderResult<ShaderResources> {
        Ok(ShaderResources::default())
    }

    fn vertex_constants_size(&self) -> usize {
        std::mem::size_of::<BaseVertexConstants>()
    }

    fn vertex_constants(&self, inputs: &ConstantInputs<'_>) -> Vec<u8> {
        let constants = BaseVertexConstants {
            world_view_proj: inputs.world_view_proj().to_cols_array_2d(),
        };
        bytemuck::bytes_of(&constants).to_vec()
    }

    /// Zero when the pixel stage has no material constants.
    fn pixel_constants_size(&self) -> usize {
        0
    }

    fn pixel_constants(&self, _inputs: &ConstantInputs<'_>) -> Vec<u8> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_materials_coerce_to_trait_objects() {
        let unlit = shared(UnlitMaterial::new(Vec3::ONE));
        let as_dyn: SharedMaterial = unlit.clone();
        assert_eq!(
            as_dyn.read().unwrap().material_type(),
            MaterialType::Unlit
        );
        unlit.write().unwrap().color = Vec3::ZERO;
        assert_eq!(Arc::strong_count(&unlit), 2);
    }

    #[test]
    fn default_shader_names_follow_the_material_type() {
        let material = ClearGBufferMaterial::default();
        let flags = BTreeSet::new();
        assert_eq!(material.vertex_shader_settings(&flags).filename, "ClearGBuffer_VS.wgsl");
        assert_eq!(material.pixel_shader_settings(&flags).filename, "ClearGBuffer_PS.wgsl");
    }
}
