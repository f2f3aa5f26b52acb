use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugDisplayMode {
    #[default]
    None,
    Normals,
    WorldPositions,
    Lighting,
}

impl DebugDisplayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebugDisplayMode::None => "none",
            DebugDisplayMode::Normals => "normals",
            DebugDisplayMode::WorldPositions => "world_positions",
            DebugDisplayMode::Lighting => "lighting",
        }
    }
}

/// Global renderer toggles that influence which shader variants get compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RendererFeatures {
    #[serde(default = "default_true")]
    pub vertex_morph: bool,
    #[serde(default = "default_true")]
    pub skinned_animation: bool,
    #[serde(default)]
    pub debug_display_mode: DebugDisplayMode,
    #[serde(default = "default_true")]
    pub shadows_enabled: bool,
    #[serde(default = "default_true")]
    pub irradiance_mapping_enabled: bool,
    #[serde(default)]
    pub enable_shader_optimization: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for RendererFeatures {
    fn default() -> Self {
        Self {
            vertex_morph: true,
            skinned_animation: true,
            debug_display_mode: DebugDisplayMode::None,
            shadows_enabled: true,
            irradiance_mapping_enabled: true,
            enable_shader_optimization: false,
        }
    }
}

impl RendererFeatures {
    pub fn hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        Hash::hash(self, &mut hasher);
        hasher.finish()
    }
}
