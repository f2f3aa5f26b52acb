use serde_json::json;

use super::{Material, MaterialLightMode, MaterialType};

/// Full screen quad that resets the G-buffer targets before geometry is drawn.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClearGBufferMaterial;

impl Material for ClearGBufferMaterial {
    fn material_type(&self) -> MaterialType {
        MaterialType::ClearGBuffer
    }

    fn light_mode(&self) -> MaterialLightMode {
        MaterialLightMode::Unlit
    }

    fn compiler_properties(&self) -> serde_json::Value {
        json!({})
    }
}
