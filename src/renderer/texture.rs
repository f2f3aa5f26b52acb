// renderer/texture.rs

use std::sync::{Arc, Mutex};

use crate::error::{RenderError, RenderResult};
use crate::renderer::device::{
    RenderDevice, ResourceView, TextureDesc, TextureDimension, TextureFormat, TextureId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Repeat,
    MirrorRepeat,
    ClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDescriptor {
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    /// Depth comparison sampling, used for shadow maps.
    pub compare: bool,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Linear,
            address_mode_u: AddressMode::Repeat,
            address_mode_v: AddressMode::Repeat,
            address_mode_w: AddressMode::Repeat,
            compare: false,
        }
    }
}

impl SamplerDescriptor {
    pub fn clamp_linear() -> Self {
        Self {
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            ..Default::default()
        }
    }

    pub fn point_clamp() -> Self {
        Self {
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            ..Self::clamp_linear()
        }
    }

    pub fn shadow_comparison() -> Self {
        Self {
            compare: true,
            ..Self::clamp_linear()
        }
    }
}

#[derive(Debug)]
struct LoadedTexture {
    texture: Option<TextureId>,
    view: Arc<ResourceView>,
}

/// A texture asset. Pixel data is uploaded on first `load`; render targets and
/// shadow arrays wrap an existing view through [`Texture::from_view`].
#[derive(Debug)]
pub struct Texture {
    name: String,
    desc: TextureDesc,
    data: Option<Vec<u8>>,
    loaded: Mutex<Option<LoadedTexture>>,
}

impl Texture {
    pub fn new(name: impl Into<String>, desc: TextureDesc, data: Option<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            desc,
            data,
            loaded: Mutex::new(None),
        }
    }

    /// Solid color 1x1 texture.
    pub fn solid_color(name: impl Into<String>, rgba: [u8; 4]) -> Self {
        let name = name.into();
        let desc = TextureDesc::color_2d(name.clone(), 1, 1);
        Self::new(name, desc, Some(rgba.to_vec()))
    }

    pub fn cube(name: impl Into<String>, size: u32) -> Self {
        let name = name.into();
        let desc = TextureDesc {
            label: name.clone(),
            width: size,
            height: size,
            layers: 6,
            dimension: TextureDimension::Cube,
            format: TextureFormat::Rgba8Unorm,
            render_target: false,
        };
        Self::new(name, desc, None)
    }

    /// Wraps a view owned elsewhere. Unloading only forgets the view.
    pub fn from_view(name: impl Into<String>, desc: TextureDesc, view: Arc<ResourceView>) -> Self {
        Self {
            name: name.into(),
            desc,
            data: None,
            loaded: Mutex::new(Some(LoadedTexture {
                texture: None,
                view,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// True once `load` created a device texture. Wrapped views never own one.
    pub fn owns_device_texture(&self) -> bool {
        self.loaded
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|loaded| loaded.texture.is_some()))
            .unwrap_or(false)
    }

    pub fn view(&self) -> Option<Arc<ResourceView>> {
        self.loaded
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|loaded| Arc::clone(&loaded.view)))
    }

    /// Uploads the texture if needed and returns its shader resource view.
    pub fn load(&self, device: &mut dyn RenderDevice) -> RenderResult<Arc<ResourceView>> {
        let mut slot = self
            .loaded
            .lock()
            .map_err(|_| RenderError::usage(format!("texture {} lock poisoned", self.name)))?;
        if let Some(loaded) = slot.as_ref() {
            return Ok(Arc::clone(&loaded.view));
        }

        if let Some(data) = &self.data {
            if data.len() != self.desc.byte_size() {
                return Err(RenderError::ResourceCreation(format!(
                    "texture {} expects {} bytes of pixel data, got {}",
                    self.name,
                    self.desc.byte_size(),
                    data.len()
                )));
            }
        }

        log::debug!(
            "Loading texture {} ({}x{}x{})",
            self.name,
            self.desc.width,
            self.desc.height,
            self.desc.layers
        );
        let texture = device.create_texture(&self.desc, self.data.as_deref())?;
        let view = match device.create_view(texture, &self.desc.default_view()) {
            Ok(view) => view,
            Err(err) => {
                device.destroy_texture(texture);
                return Err(err);
            }
        };
        *slot = Some(LoadedTexture {
            texture: Some(texture),
            view: Arc::clone(&view),
        });
        Ok(view)
    }

    pub fn unload(&self, device: &mut dyn RenderDevice) {
        let Ok(mut slot) = self.loaded.lock() else {
            return;
        };
        if let Some(LoadedTexture {
            texture: Some(texture),
            ..
        }) = slot.take()
        {
            device.destroy_texture(texture);
        }
    }
}
