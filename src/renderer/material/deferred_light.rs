use std::collections::BTreeSet;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde_json::json;

use super::{ConstantInputs, Material, MaterialLightMode, MaterialType, ShaderResources};
use crate::error::{RenderError, RenderResult};
use crate::renderer::device::ShaderCompileSettings;
use crate::renderer::features::{DebugDisplayMode, RendererFeatures};
use crate::renderer::lights::RenderLightData;
use crate::renderer::render_pass::RenderPassBlendMode;
use crate::renderer::texture::{AddressMode, SamplerDescriptor, Texture};
use crate::renderer::vertex::MeshVertexLayout;

const FLAG_DEBUG_WORLD_POSITIONS: &str = "debug_world_positions";
const FLAG_DEBUG_NORMALS: &str = "debug_normals";
const FLAG_DEBUG_LIGHTING: &str = "debug_lighting";
const FLAG_SHADOWS_ENABLED: &str = "shadowsEnabled";
const FLAG_IBL_ENABLED: &str = "iblEnabled";

/// Camera data shared by every light batch; the lights themselves come from
/// the light constant buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DeferredLightPixelConstants {
    pub view_inv: [[f32; 4]; 4],
    pub proj_inv: [[f32; 4]; 4],
    pub eye_position: [f32; 4],
    pub emitted_enabled: u32,
    pub _pad: [u32; 3],
}

/// Resolves the G-buffer into the final image, one batch of lights at a time.
#[derive(Debug, Clone)]
pub struct DeferredLightMaterial {
    pub color0_texture: Option<Arc<Texture>>,
    pub color1_texture: Option<Arc<Texture>>,
    pub color2_texture: Option<Arc<Texture>>,
    pub depth_texture: Option<Arc<Texture>>,
    pub shadow_map_array_texture: Option<Arc<Texture>>,
    pub ibl_enabled: bool,
    pub shadow_array_enabled: bool,
    emitted_enabled: bool,
}

impl Default for DeferredLightMaterial {
    fn default() -> Self {
        Self {
            color0_texture: None,
            color1_texture: None,
            color2_texture: None,
            depth_texture: None,
            shadow_map_array_texture: None,
            ibl_enabled: true,
            shadow_array_enabled: true,
            emitted_enabled: false,
        }
    }
}

impl DeferredLightMaterial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only the first light batch adds the emissive term.
    pub fn set_emitted(&mut self, enabled: bool) {
        self.emitted_enabled = enabled;
    }

    pub fn emitted(&self) -> bool {
        self.emitted_enabled
    }

    fn gbuffer(&self) -> Option<[&Arc<Texture>; 4]> {
        Some([
            self.color0_texture.as_ref()?,
            self.color1_texture.as_ref()?,
            self.color2_texture.as_ref()?,
            self.depth_texture.as_ref()?,
        ])
    }
}

impl Material for DeferredLightMaterial {
    fn material_type(&self) -> MaterialType {
        MaterialType::DeferredLight
    }

    fn light_mode(&self) -> MaterialLightMode {
        MaterialLightMode::Lit
    }

    fn compiler_properties(&self) -> serde_json::Value {
        let enabled = |texture: &Option<Arc<Texture>>| json!({ "enabled": texture.is_some() });
        json!({
            "alpha_mode": self.alpha_mode(),
            "face_cull_mode": self.face_cull_mode(),
            "color0_texture": enabled(&self.color0_texture),
            "color1_texture": enabled(&self.color1_texture),
            "color2_texture": enabled(&self.color2_texture),
            "depth_texture": enabled(&self.depth_texture),
            "shadow_map_array_texture": enabled(&self.shadow_map_array_texture),
            "ibl_enabled": self.ibl_enabled,
            "shadow_array_enabled": self.shadow_array_enabled,
        })
    }

    fn config_flags(
        &self,
        features: &RendererFeatures,
        _blend_mode: RenderPassBlendMode,
        _layout: &MeshVertexLayout,
    ) -> RenderResult<BTreeSet<String>> {
        let mut flags = BTreeSet::new();
        match features.debug_display_mode {
            DebugDisplayMode::WorldPositions => {
                flags.insert(FLAG_DEBUG_WORLD_POSITIONS.to_string());
            }
            DebugDisplayMode::Normals => {
                flags.insert(FLAG_DEBUG_NORMALS.to_string());
            }
            DebugDisplayMode::Lighting => {
                flags.insert(FLAG_DEBUG_LIGHTING.to_string());
            }
            DebugDisplayMode::None => {}
        }
        if features.shadows_enabled && self.shadow_array_enabled {
            flags.insert(FLAG_SHADOWS_ENABLED.to_string());
        }
        if features.irradiance_mapping_enabled && self.ibl_enabled {
            flags.insert(FLAG_IBL_ENABLED.to_string());
        }
        Ok(flags)
    }

    fn pixel_shader_settings(&self, flags: &BTreeSet<String>) -> ShaderCompileSettings {
        let mut settings = ShaderCompileSettings::new("DeferredLight_PS.wgsl", "fs_main");
        let defines = [
            (FLAG_IBL_ENABLED, "MAP_IBL"),
            (FLAG_SHADOWS_ENABLED, "MAP_SHADOWMAP_ARRAY"),
            (FLAG_DEBUG_WORLD_POSITIONS, "DEBUG_DISPLAY_WORLD_POSITION"),
            (FLAG_DEBUG_NORMALS, "DEBUG_DISPLAY_NORMALS"),
            (FLAG_DEBUG_LIGHTING, "DEBUG_DISPLAY_LIGHTING_ONLY"),
        ];
        for (flag, define) in defines {
            if flags.contains(flag) {
                settings.define(define, "1");
            }
        }
        settings
    }

    fn shader_resources(
        &self,
        flags: &BTreeSet<String>,
        light_data: &RenderLightData,
    ) -> RenderResult<ShaderResources> {
        let mut resources = ShaderResources::default();
        let Some(gbuffer) = self.gbuffer() else {
            return Ok(resources);
        };

        let clamp = SamplerDescriptor::clamp_linear();
        for texture in gbuffer {
            resources.push(Arc::clone(texture), Some(clamp));
        }

        if flags.contains(FLAG_IBL_ENABLED) {
            let environment = &light_data.environment;
            let (Some(brdf), Some(diffuse), Some(specular)) = (
                &environment.brdf_lut,
                &environment.diffuse_irradiance,
                &environment.specular_irradiance,
            ) else {
                return Err(RenderError::configuration(
                    "Deferred lighting requires a complete environment map in the light data",
                ));
            };
            resources.push(Arc::clone(brdf), None);
            resources.push(Arc::clone(diffuse), None);
            resources.push(
                Arc::clone(specular),
                Some(SamplerDescriptor {
                    address_mode_u: AddressMode::Repeat,
                    address_mode_v: AddressMode::Repeat,
                    address_mode_w: AddressMode::Repeat,
                    ..clamp
                }),
            );
        }

        if flags.contains(FLAG_SHADOWS_ENABLED) {
            let shadow_array = self.shadow_map_array_texture.as_ref().ok_or_else(|| {
                RenderError::configuration(
                    "Cannot bind shadow map resources without a shadow map array texture",
                )
            })?;
            resources.push(Arc::clone(shadow_array), Some(clamp));
        }

        Ok(resources)
    }

    fn vertex_constants_size(&self) -> usize {
        0
    }

    fn vertex_constants(&self, _inputs: &ConstantInputs<'_>) -> Vec<u8> {
        Vec::new()
    }

    fn pixel_constants_size(&self) -> usize {
        std::mem::size_of::<DeferredLightPixelConstants>()
    }

    fn pixel_constants(&self, inputs: &ConstantInputs<'_>) -> Vec<u8> {
        let view_inv = inputs.view.inverse();
        let eye: Vec3 = view_inv.w_axis.truncate();
        let constants = DeferredLightPixelConstants {
            view_inv: view_inv.to_cols_array_2d(),
            proj_inv: inputs.projection.inverse().to_cols_array_2d(),
            eye_position: eye.extend(0.0).to_array(),
            emitted_enabled: self.emitted_enabled as u32,
            _pad: [0; 3],
        };
        bytemuck::bytes_of(&constants).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::lights::EnvironmentMaps;

    fn texture(name: &str) -> Option<Arc<Texture>> {
        Some(Arc::new(Texture::solid_color(name, [0; 4])))
    }

    fn with_gbuffer() -> DeferredLightMaterial {
        DeferredLightMaterial {
            color0_texture: texture("color0"),
            color1_texture: texture("color1"),
            color2_texture: texture("color2"),
            depth_texture: texture("depth"),
            ..Default::default()
        }
    }

    fn flags(material: &DeferredLightMaterial, features: RendererFeatures) -> BTreeSet<String> {
        material
            .config_flags(
                &features,
                RenderPassBlendMode::Additive,
                &MeshVertexLayout::from_elements(Vec::new()),
            )
            .unwrap()
    }

    #[test]
    fn missing_gbuffer_yields_no_resources() {
        let material = DeferredLightMaterial::default();
        let resources = material
            .shader_resources(&BTreeSet::new(), &RenderLightData::new())
            .unwrap();
        assert!(resources.textures.is_empty());
        assert!(resources.samplers.is_empty());
    }

    #[test]
    fn shadows_require_the_array_texture() {
        let material = with_gbuffer();
        let features = RendererFeatures {
            irradiance_mapping_enabled: false,
            ..Default::default()
        };
        let flags = flags(&material, features);
        assert!(flags.contains(FLAG_SHADOWS_ENABLED));
        assert!(matches!(
            material.shader_resources(&flags, &RenderLightData::new()),
            Err(RenderError::Configuration(_))
        ));

        let material = DeferredLightMaterial {
            shadow_map_array_texture: texture("shadows"),
            ..material
        };
        let resources = material.shader_resources(&flags, &RenderLightData::new()).unwrap();
        assert_eq!(resources.textures.len(), 5);
        assert_eq!(resources.samplers.len(), 5);
        assert!(material
            .pixel_shader_settings(&flags)
            .defines
            .contains_key("MAP_SHADOWMAP_ARRAY"));
    }

    #[test]
    fn ibl_uses_the_environment_maps() {
        let material = DeferredLightMaterial {
            shadow_array_enabled: false,
            ..with_gbuffer()
        };
        let flags = flags(&material, RendererFeatures::default());
        assert!(flags.contains(FLAG_IBL_ENABLED));
        assert!(material.shader_resources(&flags, &RenderLightData::new()).is_err());

        let mut light_data = RenderLightData::new();
        light_data.environment = EnvironmentMaps {
            brdf_lut: texture("brdf"),
            diffuse_irradiance: texture("diffuse"),
            specular_irradiance: texture("specular"),
        };
        let resources = material.shader_resources(&flags, &light_data).unwrap();
        assert_eq!(resources.textures.len(), 7);
        assert_eq!(resources.samplers.len(), 5);
    }

    #[test]
    fn debug_modes_map_to_defines() {
        let material = with_gbuffer();
        let features = RendererFeatures {
            debug_display_mode: DebugDisplayMode::Normals,
            ..Default::default()
        };
        let flags = flags(&material, features);
        let settings = material.pixel_shader_settings(&flags);
        assert!(settings.defines.contains_key("DEBUG_DISPLAY_NORMALS"));
        assert!(!settings.defines.contains_key("DEBUG_DISPLAY_WORLD_POSITION"));
    }

    #[test]
    fn emitted_flag_does_not_change_the_variant() {
        let mut material = with_gbuffer();
        let hash = material.compiler_properties_hash();
        material.set_emitted(true);
        assert_eq!(material.compiler_properties_hash(), hash);
        assert_eq!(material.pixel_constants_size(), 160);
    }
}
