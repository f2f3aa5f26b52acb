use std::collections::BTreeSet;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use serde_json::json;

use super::{
    ConstantInputs, Material, MaterialAlphaMode, MaterialFaceCullMode, MaterialLightMode,
    MaterialType, ShaderResources,
};
use crate::error::{RenderError, RenderResult};
use crate::renderer::device::ShaderCompileSettings;
use crate::renderer::features::RendererFeatures;
use crate::renderer::lights::RenderLightData;
use crate::renderer::render_pass::RenderPassBlendMode;
use crate::renderer::renderer_data::MAX_MORPH_TARGETS;
use crate::renderer::texture::{SamplerDescriptor, Texture};
use crate::renderer::vertex::{
    ElementComponent, ElementType, MeshVertexLayout, VertexAttribute, VertexAttributeElement,
    VertexAttributeSemantic,
};

const FLAG_ENABLE_DEFERRED: &str = "enable_deferred";
const FLAG_SKINNED: &str = "skinned";
const FLAG_JOINTS_UINT16: &str = "joints_uint16";
const FLAG_JOINTS_UINT32: &str = "joints_uint32";
const FLAG_JOINTS_SINT16: &str = "joints_sint16";
const FLAG_JOINTS_SINT32: &str = "joints_sint32";
const FLAG_MORPH_TARGET_COUNT: &str = "morph_target_count_";
const FLAG_MORPH_POSITION: &str = "morph_target_vertex_position_";
const FLAG_MORPH_NORMAL: &str = "morph_target_vertex_normal_";
const FLAG_MORPH_TANGENT: &str = "morph_target_vertex_tangent_";
const FLAG_SHADOWS_ENABLED: &str = "shadows_enabled";
const FLAG_IBL_ENABLED: &str = "ibl_enabled";
const FLAG_ALPHA_MASK: &str = "alpha_mask_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PbrTexture {
    BaseColor,
    MetallicRoughness,
    Normal,
    Occlusion,
    Emissive,
}

impl PbrTexture {
    pub const ALL: [PbrTexture; 5] = [
        PbrTexture::BaseColor,
        PbrTexture::MetallicRoughness,
        PbrTexture::Normal,
        PbrTexture::Occlusion,
        PbrTexture::Emissive,
    ];

    fn define(&self) -> &'static str {
        match self {
            PbrTexture::BaseColor => "MAP_BASECOLOR",
            PbrTexture::MetallicRoughness => "MAP_METALLIC_ROUGHNESS",
            PbrTexture::Normal => "MAP_NORMAL",
            PbrTexture::Occlusion => "MAP_OCCLUSION",
            PbrTexture::Emissive => "MAP_EMISSIVE",
        }
    }

    fn flag(&self) -> &'static str {
        match self {
            PbrTexture::BaseColor => "map_base_color",
            PbrTexture::MetallicRoughness => "map_metallic_roughness",
            PbrTexture::Normal => "map_normal",
            PbrTexture::Occlusion => "map_occlusion",
            PbrTexture::Emissive => "map_emissive",
        }
    }

    fn json_key(&self) -> &'static str {
        match self {
            PbrTexture::BaseColor => "base_color_texture",
            PbrTexture::MetallicRoughness => "metallic_roughness_texture",
            PbrTexture::Normal => "normal_texture",
            PbrTexture::Occlusion => "occlusion_texture",
            PbrTexture::Emissive => "emissive_texture",
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PbrVertexConstants {
    pub world_view_proj: [[f32; 4]; 4],
    pub world: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
    pub world_inv_transpose: [[f32; 4]; 4],
    pub morph_weights: [[f32; 4]; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PbrPixelConstants {
    pub world: [[f32; 4]; 4],
    pub base_color: [f32; 4],
    /// Metallic, roughness, alpha cutoff, unused.
    pub metallic_roughness: [f32; 4],
    pub emissive: [f32; 4],
    pub eye_position: [f32; 4],
}

/// Metallic-roughness material.
#[derive(Debug, Clone)]
pub struct PbrMaterial {
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: Vec3,
    pub alpha_cutoff: f32,
    pub alpha_mode: MaterialAlphaMode,
    pub face_cull_mode: MaterialFaceCullMode,
    textures: [Option<Arc<Texture>>; 5],
}

impl Default for PbrMaterial {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            metallic: 1.0,
            roughness: 1.0,
            emissive: Vec3::ZERO,
            alpha_cutoff: 0.5,
            alpha_mode: MaterialAlphaMode::Opaque,
            face_cull_mode: MaterialFaceCullMode::BackFace,
            textures: Default::default(),
        }
    }
}

impl PbrMaterial {
    pub fn new(base_color: Vec4) -> Self {
        Self {
            base_color,
            ..Default::default()
        }
    }

    pub fn with_alpha_mode(mut self, alpha_mode: MaterialAlphaMode) -> Self {
        self.alpha_mode = alpha_mode;
        self
    }

    pub fn texture(&self, slot: PbrTexture) -> Option<&Arc<Texture>> {
        self.textures[slot as usize].as_ref()
    }

    pub fn set_texture(&mut self, slot: PbrTexture, texture: Option<Arc<Texture>>) {
        self.textures[slot as usize] = texture;
    }

    pub fn requires_tangents(&self) -> bool {
        self.texture(PbrTexture::Normal).is_some()
    }

    pub fn requires_tex_coord0(&self) -> bool {
        self.textures.iter().any(Option::is_some)
    }

    fn morph_tangent_semantic_offset(&self) -> u8 {
        if self.requires_tangents() {
            1
        } else {
            0
        }
    }

    fn apply_vertex_layout_settings(&self, settings: &mut ShaderCompileSettings) {
        settings.define("VB_NORMAL", "1");
        if self.requires_tex_coord0() {
            settings.define("VB_TEXCOORD0", "1");
        }
        if self.requires_tangents() {
            settings.define("VB_TANGENT", "1");
        }
    }
}

/// Decoded morph target flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct MorphTargetConfig {
    target_count: u8,
    position: Option<u8>,
    normal: Option<u8>,
    tangent: Option<u8>,
}

impl MorphTargetConfig {
    fn decode(flags: &BTreeSet<String>) -> RenderResult<Self> {
        let mut config = Self::default();
        for flag in flags {
            let parse = |suffix: &str| {
                suffix.parse::<u8>().map_err(|_| {
                    RenderError::configuration(format!("malformed morph target flag {flag}"))
                })
            };
            if let Some(count) = flag.strip_prefix(FLAG_MORPH_TARGET_COUNT) {
                config.target_count = parse(count)?;
            } else if let Some(index) = flag.strip_prefix(FLAG_MORPH_POSITION) {
                config.position = Some(parse(index)?);
            } else if let Some(index) = flag.strip_prefix(FLAG_MORPH_NORMAL) {
                config.normal = Some(parse(index)?);
            } else if let Some(index) = flag.strip_prefix(FLAG_MORPH_TANGENT) {
                config.tangent = Some(parse(index)?);
            }
        }
        Ok(config)
    }
}

fn joints_component(flags: &BTreeSet<String>) -> RenderResult<ElementComponent> {
    if flags.contains(FLAG_JOINTS_UINT16) {
        Ok(ElementComponent::UnsignedShort)
    } else if flags.contains(FLAG_JOINTS_UINT32) {
        Ok(ElementComponent::UnsignedInt)
    } else if flags.contains(FLAG_JOINTS_SINT16) {
        Ok(ElementComponent::SignedShort)
    } else if flags.contains(FLAG_JOINTS_SINT32) {
        Ok(ElementComponent::SignedInt)
    } else {
        Err(RenderError::configuration("Missing joints component flag"))
    }
}

impl Material for PbrMaterial {
    fn material_type(&self) -> MaterialType {
        MaterialType::Pbr
    }

    fn light_mode(&self) -> MaterialLightMode {
        MaterialLightMode::Lit
    }

    fn alpha_mode(&self) -> MaterialAlphaMode {
        self.alpha_mode
    }

    fn face_cull_mode(&self) -> MaterialFaceCullMode {
        self.face_cull_mode
    }

    fn compiler_properties(&self) -> serde_json::Value {
        let mut properties = json!({
            "alpha_mode": self.alpha_mode,
            "face_cull_mode": self.face_cull_mode,
        });
        for slot in PbrTexture::ALL {
            properties[slot.json_key()] = json!({ "enabled": self.texture(slot).is_some() });
        }
        // The cutoff is baked into the pixel shader as a define.
        if self.alpha_mode == MaterialAlphaMode::Mask {
            properties["alpha_cutoff"] = json!(self.alpha_cutoff);
        }
        properties
    }

    fn config_flags(
        &self,
        features: &RendererFeatures,
        blend_mode: RenderPassBlendMode,
        layout: &MeshVertexLayout,
    ) -> RenderResult<BTreeSet<String>> {
        let mut flags: BTreeSet<String> = PbrTexture::ALL
            .into_iter()
            .filter(|slot| self.texture(*slot).is_some())
            .map(|slot| slot.flag().to_string())
            .collect();
        if self.alpha_mode == MaterialAlphaMode::Mask {
            flags.insert(format!("{FLAG_ALPHA_MASK}{:?}", self.alpha_cutoff));
        }

        if blend_mode == RenderPassBlendMode::Opaque {
            flags.insert(FLAG_ENABLE_DEFERRED.to_string());
        } else {
            if features.shadows_enabled {
                flags.insert(FLAG_SHADOWS_ENABLED.to_string());
            }
            if features.irradiance_mapping_enabled {
                flags.insert(FLAG_IBL_ENABLED.to_string());
            }
        }

        let joints = layout.element(VertexAttributeSemantic::primary(VertexAttribute::Joints));
        let has_weights = layout.contains(VertexAttributeSemantic::primary(VertexAttribute::Weights));
        if let (true, Some(joints), true) = (features.skinned_animation, joints, has_weights) {
            flags.insert(FLAG_SKINNED.to_string());
            let component_flag = match joints.component {
                ElementComponent::UnsignedShort => FLAG_JOINTS_UINT16,
                ElementComponent::UnsignedInt => FLAG_JOINTS_UINT32,
                ElementComponent::SignedShort => FLAG_JOINTS_SINT16,
                ElementComponent::SignedInt => FLAG_JOINTS_SINT32,
                other => {
                    return Err(RenderError::configuration(format!(
                        "Material does not support joints component: {other:?}"
                    )))
                }
            };
            flags.insert(component_flag.to_string());
        }

        if features.vertex_morph && layout.morph_target_count() > 0 {
            flags.insert(format!("{FLAG_MORPH_TARGET_COUNT}{}", layout.morph_target_count()));
            for (position, semantic) in layout.morph_target_layout().iter().enumerate() {
                let prefix = match (semantic.attribute, semantic.semantic_index) {
                    (VertexAttribute::Position, 0) => FLAG_MORPH_POSITION,
                    (VertexAttribute::Normal, 0) => FLAG_MORPH_NORMAL,
                    (VertexAttribute::Tangent, 0) => FLAG_MORPH_TANGENT,
                    _ => continue,
                };
                flags.insert(format!("{prefix}{position}"));
            }
        }

        Ok(flags)
    }

    fn vertex_inputs(&self, flags: &BTreeSet<String>) -> RenderResult<Vec<VertexAttributeElement>> {
        let mut inputs = vec![
            VertexAttributeElement::float(VertexAttribute::Position, 0, ElementType::Vector3),
            VertexAttributeElement::float(VertexAttribute::Normal, 0, ElementType::Vector3),
        ];
        if self.requires_tangents() {
            inputs.push(VertexAttributeElement::float(
                VertexAttribute::Tangent,
                0,
                ElementType::Vector4,
            ));
        }
        if self.requires_tex_coord0() {
            inputs.push(VertexAttributeElement::float(
                VertexAttribute::TexCoord,
                0,
                ElementType::Vector2,
            ));
        }

        if flags.contains(FLAG_SKINNED) {
            inputs.push(VertexAttributeElement::new(
                VertexAttributeSemantic::primary(VertexAttribute::Joints),
                ElementType::Vector4,
                joints_component(flags)?,
            ));
            inputs.push(VertexAttributeElement::float(
                VertexAttribute::Weights,
                0,
                ElementType::Vector4,
            ));
        }

        let morph = MorphTargetConfig::decode(flags)?;
        if morph.target_count as usize > MAX_MORPH_TARGETS {
            return Err(RenderError::configuration(format!(
                "Does not support more than {MAX_MORPH_TARGETS} morph targets"
            )));
        }
        let mut position_index = 1u8;
        let mut normal_index = 1u8;
        let mut tangent_index = self.morph_tangent_semantic_offset();
        for _ in 0..morph.target_count {
            if morph.position.is_some() {
                inputs.push(VertexAttributeElement::float(
                    VertexAttribute::Position,
                    position_index,
                    ElementType::Vector3,
                ));
                position_index += 1;
            }
            if morph.normal.is_some() {
                inputs.push(VertexAttributeElement::float(
                    VertexAttribute::Normal,
                    normal_index,
                    ElementType::Vector3,
                ));
                normal_index += 1;
            }
            if self.requires_tangents() && morph.tangent.is_some() {
                inputs.push(VertexAttributeElement::float(
                    VertexAttribute::Tangent,
                    tangent_index,
                    ElementType::Vector4,
                ));
                tangent_index += 1;
            }
        }

        Ok(inputs)
    }

    fn vertex_shader_settings(&self, flags: &BTreeSet<String>) -> ShaderCompileSettings {
        let mut settings = ShaderCompileSettings::new("PBR_VS.wgsl", "vs_main");
        self.apply_vertex_layout_settings(&mut settings);

        if flags.contains(FLAG_SKINNED) {
            settings.define("VB_SKINNED", "1");
            if flags.contains(FLAG_JOINTS_SINT16) || flags.contains(FLAG_JOINTS_SINT32) {
                settings.define("VB_JOINTS_SIGNED", "1");
            }
        }

        // Flags were validated when the vertex inputs were derived.
        if let Ok(morph) = MorphTargetConfig::decode(flags) {
            if morph.target_count > 0 {
                settings.define("VB_MORPH", "1");
                settings.define("VB_MORPH_TARGET_COUNT", morph.target_count.to_string());
                if morph.position.is_some() {
                    settings.define("VB_MORPH_POSITION", "1");
                }
                if morph.normal.is_some() {
                    settings.define("VB_MORPH_NORMAL", "1");
                }
                if self.requires_tangents() && morph.tangent.is_some() {
                    settings.define("VB_MORPH_TANGENT", "1");
                }
            }
        }

        settings
    }

    fn pixel_shader_settings(&self, flags: &BTreeSet<String>) -> ShaderCompileSettings {
        let mut settings = ShaderCompileSettings::new("PBR_PS.wgsl", "fs_main");

        for slot in PbrTexture::ALL {
            if self.texture(slot).is_some() {
                settings.define(slot.define(), "1");
            }
        }

        if flags.contains(FLAG_ENABLE_DEFERRED) {
            settings.define("PS_PIPELINE_DEFERRED", "1");
        } else {
            settings.define("PS_PIPELINE_STANDARD", "1");
            if flags.contains(FLAG_SHADOWS_ENABLED) {
                settings.define("MAP_SHADOWMAP_ARRAY", "1");
            }
            if flags.contains(FLAG_IBL_ENABLED) {
                settings.define("MAP_IBL", "1");
            }
        }

        if self.alpha_mode == MaterialAlphaMode::Mask {
            settings.define("ALPHA_MASK_VALUE", format!("{:?}", self.alpha_cutoff));
        }

        self.apply_vertex_layout_settings(&mut settings);
        settings
    }

    fn shader_resources(
        &self,
        flags: &BTreeSet<String>,
        light_data: &RenderLightData,
    ) -> RenderResult<ShaderResources> {
        let mut resources = ShaderResources::default();
        for texture in self.textures.iter().flatten() {
            resources.push(Arc::clone(texture), Some(SamplerDescriptor::default()));
        }

        if !flags.contains(FLAG_ENABLE_DEFERRED) {
            if flags.contains(FLAG_SHADOWS_ENABLED) {
                let shadow_array = light_data.shadow_map_array.as_ref().ok_or_else(|| {
                    RenderError::configuration(
                        "Forward PBR shadows require a shadow map array in the light data",
                    )
                })?;
                resources.push(
                    Arc::clone(shadow_array),
                    Some(SamplerDescriptor::shadow_comparison()),
                );
            }
            if flags.contains(FLAG_IBL_ENABLED) {
                let environment = &light_data.environment;
                let (Some(brdf), Some(diffuse), Some(specular)) = (
                    &environment.brdf_lut,
                    &environment.diffuse_irradiance,
                    &environment.specular_irradiance,
                ) else {
                    return Err(RenderError::configuration(
                        "Forward PBR irradiance mapping requires a complete environment map",
                    ));
                };
                resources.push(Arc::clone(brdf), Some(SamplerDescriptor::clamp_linear()));
                resources.push(Arc::clone(diffuse), None);
                resources.push(Arc::clone(specular), None);
            }
        }

        Ok(resources)
    }

    fn vertex_constants_size(&self) -> usize {
        std::mem::size_of::<PbrVertexConstants>()
    }

    fn vertex_constants(&self, inputs: &ConstantInputs<'_>) -> Vec<u8> {
        let weights = &inputs.animation.morph_weights;
        let constants = PbrVertexConstants {
            world_view_proj: inputs.world_view_proj().to_cols_array_2d(),
            world: inputs.world.to_cols_array_2d(),
            view_proj: (inputs.projection * inputs.view).to_cols_array_2d(),
            world_inv_transpose: inputs.world.transpose().inverse().to_cols_array_2d(),
            morph_weights: [
                [weights[0], weights[1], weights[2], weights[3]],
                [weights[4], weights[5], weights[6], weights[7]],
            ],
        };
        bytemuck::bytes_of(&constants).to_vec()
    }

    fn pixel_constants_size(&self) -> usize {
        std::mem::size_of::<PbrPixelConstants>()
    }

    fn pixel_constants(&self, inputs: &ConstantInputs<'_>) -> Vec<u8> {
        let constants = PbrPixelConstants {
            world: inputs.world.to_cols_array_2d(),
            base_color: self.base_color.to_array(),
            metallic_roughness: [self.metallic, self.roughness, self.alpha_cutoff, 0.0],
            emissive: self.emissive.extend(0.0).to_array(),
            eye_position: inputs.eye_position.extend(0.0).to_array(),
        };
        bytemuck::bytes_of(&constants).to_vec()
    }
}

/// Decodes the world matrix written by [`PbrMaterial::vertex_constants`].
pub fn decode_world_matrix(vertex_constants: &[u8]) -> Option<Mat4> {
    let size = std::mem::size_of::<PbrVertexConstants>();
    if vertex_constants.len() < size {
        return None;
    }
    let constants: PbrVertexConstants = bytemuck::pod_read_unaligned(&vertex_constants[..size]);
    Some(Mat4::from_cols_array_2d(&constants.world))
}
