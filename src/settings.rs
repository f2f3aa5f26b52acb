use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::renderer::RendererFeatures;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "RenderSettings::default_shadow_map_size")]
    pub shadow_map_size: u32,
    #[serde(default = "RenderSettings::default_shadow_map_array_size")]
    pub shadow_map_array_size: u32,
    #[serde(default = "RenderSettings::default_clear_color")]
    pub clear_color: [f32; 4],
    #[serde(default = "RenderSettings::default_enable_deferred_rendering")]
    pub enable_deferred_rendering: bool,
    #[serde(default)]
    pub features: RendererFeatures,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            shadow_map_size: Self::default_shadow_map_size(),
            shadow_map_array_size: Self::default_shadow_map_array_size(),
            clear_color: Self::default_clear_color(),
            enable_deferred_rendering: Self::default_enable_deferred_rendering(),
            features: RendererFeatures::default(),
        }
    }
}

impl RenderSettings {
    pub fn load() -> Self {
        Self::load_from_path("render_settings.json")
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|err| {
                warn!(
                    "Failed to parse {:?} ({}). Falling back to default render settings.",
                    path, err
                );
                RenderSettings::default()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Render settings file {:?} not found. Using default settings.",
                    path
                );
                RenderSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default render settings.",
                    path, err
                );
                RenderSettings::default()
            }
        }
    }

    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        let settings = serde_json::from_str::<RenderSettings>(contents)?;
        info!("Loaded render settings");
        Ok(settings.validate())
    }

    fn validate(mut self) -> Self {
        if self.shadow_map_size == 0 || !self.shadow_map_size.is_power_of_two() {
            warn!(
                "Shadow map size {} must be a power of two. Using default value.",
                self.shadow_map_size
            );
            self.shadow_map_size = Self::default_shadow_map_size();
        }

        if self.shadow_map_array_size == 0 {
            warn!("Shadow map array size must be greater than zero. Using default value.");
            self.shadow_map_array_size = Self::default_shadow_map_array_size();
        }

        self
    }

    const fn default_shadow_map_size() -> u32 {
        256
    }

    const fn default_shadow_map_array_size() -> u32 {
        8
    }

    const fn default_clear_color() -> [f32; 4] {
        [0.0, 0.0, 0.0, 1.0]
    }

    const fn default_enable_deferred_rendering() -> bool {
        true
    }
}
