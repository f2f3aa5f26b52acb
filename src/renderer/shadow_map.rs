//! Shadow map texture array pool.
//!
//! Every slice shares one depth texture array; borrowing hands out one layer
//! and returning it puts the layer back on the free list.

use std::sync::Arc;

use crate::error::{RenderError, RenderResult};
use crate::renderer::device::{
    RenderDevice, ResourceView, TextureDesc, TextureDimension, TextureFormat, TextureId, ViewDesc,
    ViewDimension, Viewport,
};
use crate::renderer::texture::Texture;

pub const SHADOW_MAP_FORMAT: TextureFormat = TextureFormat::Depth24PlusStencil8;

/// The physical texture array backing a pool.
#[derive(Debug)]
pub struct ShadowMapArray {
    texture: TextureId,
    dimension: u32,
    size: u32,
    depth_texture: Arc<Texture>,
}

impl ShadowMapArray {
    pub fn texture_id(&self) -> TextureId {
        self.texture
    }

    pub fn dimension(&self) -> u32 {
        self.dimension
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

/// One borrowed layer of the shadow map array. Not `Clone`: it is owned by
/// exactly one light until returned.
#[derive(Debug)]
pub struct ShadowMapSlice {
    array: Arc<ShadowMapArray>,
    array_index: u32,
    depth_view: Option<Arc<ResourceView>>,
}

impl ShadowMapSlice {
    pub fn array_index(&self) -> u32 {
        self.array_index
    }

    pub fn dimension(&self) -> u32 {
        self.array.dimension
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.array.dimension as f32, self.array.dimension as f32)
    }

    /// Creates the depth-stencil view for this layer. No new texture is allocated.
    pub fn load(&mut self, device: &mut dyn RenderDevice) -> RenderResult<Arc<ResourceView>> {
        if let Some(view) = &self.depth_view {
            return Ok(Arc::clone(view));
        }
        let view = device.create_view(
            self.array.texture,
            &ViewDesc {
                dimension: ViewDimension::D2,
                format: SHADOW_MAP_FORMAT,
                base_layer: self.array_index,
                layer_count: 1,
            },
        )?;
        self.depth_view = Some(Arc::clone(&view));
        Ok(view)
    }

    pub fn depth_view(&self) -> Option<&Arc<ResourceView>> {
        self.depth_view.as_ref()
    }

    pub fn belongs_to(&self, array: &Arc<ShadowMapArray>) -> bool {
        Arc::ptr_eq(&self.array, array)
    }
}

#[derive(Debug)]
pub struct ShadowMapTexturePool {
    dimension: u32,
    size: u32,
    array: Option<Arc<ShadowMapArray>>,
    free: Vec<ShadowMapSlice>,
}

impl ShadowMapTexturePool {
    pub fn new(dimension: u32, size: u32) -> Self {
        Self {
            dimension,
            size,
            array: None,
            free: Vec::new(),
        }
    }

    pub fn dimension(&self) -> u32 {
        self.dimension
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn outstanding(&self) -> usize {
        if self.array.is_some() {
            self.size as usize - self.free.len()
        } else {
            0
        }
    }

    pub fn is_ready(&self) -> bool {
        self.array.is_some()
    }

    pub fn create_device_dependent_resources(&mut self, device: &mut dyn RenderDevice) -> RenderResult<()> {
        if self.array.is_some() {
            return Err(RenderError::usage(
                "shadow map pool device resources created twice",
            ));
        }
        if self.size == 0 || self.dimension == 0 {
            return Err(RenderError::configuration(
                "shadow map pool needs a non-zero dimension and slice count",
            ));
        }

        let desc = TextureDesc {
            label: "Shadow Map Array".to_string(),
            width: self.dimension,
            height: self.dimension,
            layers: self.size,
            dimension: TextureDimension::D2Array,
            format: SHADOW_MAP_FORMAT,
            render_target: true,
        };
        let texture = device.create_texture(&desc, None)?;
        let view = match device.create_view(texture, &desc.default_view()) {
            Ok(view) => view,
            Err(err) => {
                device.destroy_texture(texture);
                return Err(err);
            }
        };
        let depth_texture = Arc::new(Texture::from_view("Shadow Map Array", desc, view));
        let array = Arc::new(ShadowMapArray {
            texture,
            dimension: self.dimension,
            size: self.size,
            depth_texture,
        });

        // Pushed in reverse so the first borrow takes layer 0.
        self.free = (0..self.size)
            .map(|slice| ShadowMapSlice {
                array: Arc::clone(&array),
                array_index: self.size - slice - 1,
                depth_view: None,
            })
            .collect();
        self.array = Some(array);

        log::info!(
            "Created shadow map pool: {} slices of {}x{}",
            self.size,
            self.dimension,
            self.dimension
        );
        Ok(())
    }

    pub fn destroy_device_dependent_resources(&mut self, device: &mut dyn RenderDevice) -> RenderResult<()> {
        let outstanding = self.outstanding();
        if outstanding > 0 {
            return Err(RenderError::OutstandingShadowMaps { outstanding });
        }
        self.free.clear();
        if let Some(array) = self.array.take() {
            device.destroy_texture(array.texture);
        }
        Ok(())
    }

    pub fn borrow_texture(&mut self) -> RenderResult<ShadowMapSlice> {
        if self.array.is_none() {
            return Err(RenderError::DeviceUnavailable(
                "shadow map pool has no device resources",
            ));
        }
        self.free.pop().ok_or(RenderError::PoolExhausted)
    }

    pub fn return_texture(&mut self, slice: ShadowMapSlice) -> RenderResult<()> {
        match &self.array {
            Some(array) if slice.belongs_to(array) => {
                self.free.push(slice);
                Ok(())
            }
            _ => Err(RenderError::ForeignShadowMap),
        }
    }

    /// The whole array as a shader resource, for lighting passes.
    pub fn depth_texture_array(&self) -> Option<Arc<Texture>> {
        self.array
            .as_ref()
            .map(|array| Arc::clone(&array.depth_texture))
    }
}

/// Owns the pool for the lifetime of a device.
#[derive(Debug)]
pub struct ShadowMapManager {
    dimension: u32,
    size: u32,
    pool: Option<ShadowMapTexturePool>,
}

impl ShadowMapManager {
    pub fn new(dimension: u32, size: u32) -> Self {
        Self {
            dimension,
            size,
            pool: None,
        }
    }

    pub fn create_device_dependent_resources(&mut self, device: &mut dyn RenderDevice) -> RenderResult<()> {
        let mut pool = ShadowMapTexturePool::new(self.dimension, self.size);
        pool.create_device_dependent_resources(device)?;
        self.pool = Some(pool);
        Ok(())
    }

    pub fn destroy_device_dependent_resources(&mut self, device: &mut dyn RenderDevice) -> RenderResult<()> {
        if let Some(pool) = self.pool.as_mut() {
            pool.destroy_device_dependent_resources(device)?;
            self.pool = None;
        }
        Ok(())
    }

    fn pool_mut(&mut self) -> RenderResult<&mut ShadowMapTexturePool> {
        self.pool.as_mut().ok_or(RenderError::DeviceUnavailable(
            "shadow map methods called without a device",
        ))
    }

    pub fn borrow_texture(&mut self) -> RenderResult<ShadowMapSlice> {
        self.pool_mut()?.borrow_texture()
    }

    pub fn return_texture(&mut self, slice: ShadowMapSlice) -> RenderResult<()> {
        self.pool_mut()?.return_texture(slice)
    }

    pub fn depth_texture_array(&self) -> Option<Arc<Texture>> {
        self.pool.as_ref().and_then(ShadowMapTexturePool::depth_texture_array)
    }

    pub fn pool(&self) -> Option<&ShadowMapTexturePool> {
        self.pool.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::HeadlessDevice;

    fn ready_pool(device: &mut HeadlessDevice, size: u32) -> ShadowMapTexturePool {
        let mut pool = ShadowMapTexturePool::new(64, size);
        pool.create_device_dependent_resources(device).unwrap();
        pool
    }

    #[test]
    fn first_borrow_is_layer_zero() {
        let mut device = HeadlessDevice::new();
        let mut pool = ready_pool(&mut device, 3);
        let first = pool.borrow_texture().unwrap();
        let second = pool.borrow_texture().unwrap();
        assert_eq!(first.array_index(), 0);
        assert_eq!(second.array_index(), 1);
        assert_eq!(pool.outstanding(), 2);
        pool.return_texture(first).unwrap();
        pool.return_texture(second).unwrap();
        pool.destroy_device_dependent_resources(&mut device).unwrap();
    }

    #[test]
    fn load_creates_a_single_layer_view_without_allocating() {
        let mut device = HeadlessDevice::new();
        let mut pool = ready_pool(&mut device, 2);
        let mut slice = pool.borrow_texture().unwrap();
        let textures = device.live_texture_count();
        let view = slice.load(&mut device).unwrap();
        assert_eq!(view.desc().base_layer, 0);
        assert_eq!(view.desc().layer_count, 1);
        assert_eq!(device.live_texture_count(), textures);
        assert_eq!(slice.viewport().width, 64.0);
        pool.return_texture(slice).unwrap();
    }

    #[test]
    fn manager_requires_a_device() {
        let mut manager = ShadowMapManager::new(64, 2);
        assert!(matches!(
            manager.borrow_texture(),
            Err(RenderError::DeviceUnavailable(_))
        ));
    }
}
