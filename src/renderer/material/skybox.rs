use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;

use super::{Material, MaterialFaceCullMode, MaterialLightMode, MaterialType, ShaderResources};
use crate::error::RenderResult;
use crate::renderer::lights::RenderLightData;
use crate::renderer::texture::{SamplerDescriptor, Texture};

/// Samples a cube map along the view direction. Rendered from inside a
/// sphere, so front faces are culled.
#[derive(Debug, Clone, Default)]
pub struct SkyboxMaterial {
    cube_map: Option<Arc<Texture>>,
}

impl SkyboxMaterial {
    pub fn new(cube_map: Option<Arc<Texture>>) -> Self {
        Self { cube_map }
    }

    pub fn cube_map(&self) -> Option<&Arc<Texture>> {
        self.cube_map.as_ref()
    }

    pub fn set_cube_map(&mut self, cube_map: Option<Arc<Texture>>) {
        self.cube_map = cube_map;
    }
}

impl Material for SkyboxMaterial {
    fn material_type(&self) -> MaterialType {
        MaterialType::Skybox
    }

    fn light_mode(&self) -> MaterialLightMode {
        MaterialLightMode::Unlit
    }

    fn face_cull_mode(&self) -> MaterialFaceCullMode {
        MaterialFaceCullMode::FrontFace
    }

    fn compiler_properties(&self) -> serde_json::Value {
        json!({
            "face_cull_mode": self.face_cull_mode(),
            "cube_map": { "enabled": self.cube_map.is_some() },
        })
    }

    fn shader_resources(
        &self,
        _flags: &BTreeSet<String>,
        _light_data: &RenderLightData,
    ) -> RenderResult<ShaderResources> {
        let mut resources = ShaderResources::default();
        if let Some(cube_map) = &self.cube_map {
            resources.push(Arc::clone(cube_map), Some(SamplerDescriptor::clamp_linear()));
        }
        Ok(resources)
    }
}
