use std::collections::BTreeSet;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde_json::json;

use super::{ConstantInputs, Material, MaterialLightMode, MaterialType};
use crate::error::RenderResult;
use crate::renderer::device::ShaderCompileSettings;
use crate::renderer::features::RendererFeatures;
use crate::renderer::render_pass::RenderPassBlendMode;
use crate::renderer::vertex::MeshVertexLayout;

const FLAG_ENABLE_DEFERRED: &str = "enable_deferred";

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct UnlitPixelConstants {
    pub color: [f32; 4],
}

/// Flat color, no lighting. In the G-buffer pass the color goes to the
/// emissive target so light accumulation passes it through unchanged.
#[derive(Debug, Clone)]
pub struct UnlitMaterial {
    pub color: Vec3,
}

impl Default for UnlitMaterial {
    fn default() -> Self {
        Self::new(Vec3::ONE)
    }
}

impl UnlitMaterial {
    pub fn new(color: Vec3) -> Self {
        Self { color }
    }
}

impl Material for UnlitMaterial {
    fn material_type(&self) -> MaterialType {
        MaterialType::Unlit
    }

    fn light_mode(&self) -> MaterialLightMode {
        MaterialLightMode::Unlit
    }

    fn compiler_properties(&self) -> serde_json::Value {
        json!({})
    }

    fn config_flags(
        &self,
        _features: &RendererFeatures,
        blend_mode: RenderPassBlendMode,
        _layout: &MeshVertexLayout,
    ) -> RenderResult<BTreeSet<String>> {
        let mut flags = BTreeSet::new();
        if blend_mode == RenderPassBlendMode::Opaque {
            flags.insert(FLAG_ENABLE_DEFERRED.to_string());
        }
        Ok(flags)
    }

    fn pixel_shader_settings(&self, flags: &BTreeSet<String>) -> ShaderCompileSettings {
        let mut settings = ShaderCompileSettings::new("Unlit_PS.wgsl", "fs_main");
        if flags.contains(FLAG_ENABLE_DEFERRED) {
            settings.define("PS_PIPELINE_DEFERRED", "1");
        }
        settings
    }

    fn pixel_constants_size(&self) -> usize {
        std::mem::size_of::<UnlitPixelConstants>()
    }

    fn pixel_constants(&self, _inputs: &ConstantInputs<'_>) -> Vec<u8> {
        let constants = UnlitPixelConstants {
            color: self.color.extend(1.0).to_array(),
        };
        bytemuck::bytes_of(&constants).to_vec()
    }
}
