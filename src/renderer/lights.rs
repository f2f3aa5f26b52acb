use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use hecs::World;

use crate::error::{RenderError, RenderResult};
use crate::renderer::device::{BufferDesc, BufferId, BufferKind, RenderDevice};
use crate::renderer::texture::Texture;
use crate::scene::components::{AmbientLight, DirectionalLight, PointLight, WorldTransform};

/// Capacity of the per-draw light buffer.
pub const MAX_LIGHTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LightType {
    Directional = 1,
    Point = 2,
    Ambient = 3,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct LightEntry {
    pub light_type: u32,
    pub position_direction: [f32; 3],
    pub intensified_color: [f32; 3],
    /// Array slice of the shadow map, or -1 when the light casts no shadow.
    pub shadow_map_index: i32,
    pub shadow_view_proj: [[f32; 4]; 4],
    pub shadow_map_bias: f32,
    pub shadow_map_dimension: i32,
    pub _pad: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct LightHeader {
    pub light_count: u32,
    pub max_lights: u32,
    pub irradiance_enabled: u32,
    pub _pad: u32,
}

/// Shadow parameters of a directional light that owns an array slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightShadow {
    pub array_index: u32,
    pub world_view_proj: Mat4,
    pub bias: f32,
    pub dimension: u32,
}

#[derive(Debug, Clone, Default)]
pub struct EnvironmentMaps {
    pub brdf_lut: Option<Arc<Texture>>,
    pub diffuse_irradiance: Option<Arc<Texture>>,
    pub specular_irradiance: Option<Arc<Texture>>,
}

impl EnvironmentMaps {
    pub fn is_complete(&self) -> bool {
        self.brdf_lut.is_some() && self.diffuse_irradiance.is_some() && self.specular_irradiance.is_some()
    }
}

/// Lights active for one draw call, plus the constant buffer they upload to.
#[derive(Debug)]
pub struct RenderLightData {
    entries: [LightEntry; MAX_LIGHTS],
    count: usize,
    buffer: Option<BufferId>,
    pub environment: EnvironmentMaps,
    pub shadow_map_array: Option<Arc<Texture>>,
}

impl Default for RenderLightData {
    fn default() -> Self {
        Self {
            entries: [LightEntry::zeroed(); MAX_LIGHTS],
            count: 0,
            buffer: None,
            environment: EnvironmentMaps::default(),
            shadow_map_array: None,
        }
    }
}

impl RenderLightData {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn max_lights(&self) -> usize {
        MAX_LIGHTS
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == MAX_LIGHTS
    }

    pub fn entries(&self) -> &[LightEntry] {
        &self.entries[..self.count]
    }

    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    pub fn clear(&mut self) {
        self.count = 0;
    }

    fn push(&mut self, entry: LightEntry) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries[self.count] = entry;
        self.count += 1;
        true
    }

    pub fn add_directional_light(
        &mut self,
        direction: Vec3,
        color: Vec3,
        intensity: f32,
        shadow: Option<LightShadow>,
    ) -> bool {
        let mut entry = LightEntry {
            light_type: LightType::Directional as u32,
            position_direction: direction.normalize_or_zero().to_array(),
            intensified_color: (color * intensity).to_array(),
            shadow_map_index: -1,
            ..LightEntry::zeroed()
        };
        if let Some(shadow) = shadow {
            entry.shadow_map_index = shadow.array_index as i32;
            entry.shadow_view_proj = shadow.world_view_proj.to_cols_array_2d();
            entry.shadow_map_bias = shadow.bias;
            entry.shadow_map_dimension = shadow.dimension as i32;
        }
        self.push(entry)
    }

    pub fn add_point_light(&mut self, position: Vec3, color: Vec3, intensity: f32) -> bool {
        self.push(LightEntry {
            light_type: LightType::Point as u32,
            position_direction: position.to_array(),
            intensified_color: (color * intensity).to_array(),
            shadow_map_index: -1,
            ..LightEntry::zeroed()
        })
    }

    pub fn add_ambient_light(&mut self, color: Vec3, intensity: f32) -> bool {
        self.push(LightEntry {
            light_type: LightType::Ambient as u32,
            intensified_color: (color * intensity).to_array(),
            shadow_map_index: -1,
            ..LightEntry::zeroed()
        })
    }

    pub fn buffer_size() -> u64 {
        (std::mem::size_of::<LightHeader>() + std::mem::size_of::<LightEntry>() * MAX_LIGHTS) as u64
    }

    /// Header followed by all `MAX_LIGHTS` entries; unused ones are stale.
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = LightHeader {
            light_count: self.count as u32,
            max_lights: MAX_LIGHTS as u32,
            irradiance_enabled: self.environment.is_complete() as u32,
            _pad: 0,
        };
        let mut bytes = Vec::with_capacity(Self::buffer_size() as usize);
        bytes.extend_from_slice(bytemuck::bytes_of(&header));
        bytes.extend_from_slice(bytemuck::cast_slice(&self.entries));
        bytes
    }

    /// Uploads the packed lights, creating the buffer on first use.
    pub fn update_buffer(&mut self, device: &mut dyn RenderDevice) -> RenderResult<()> {
        let bytes = self.to_bytes();
        match self.buffer {
            Some(buffer) => device.update_buffer(buffer, &bytes),
            None => {
                let buffer = device.create_buffer(
                    &BufferDesc {
                        label: "Light Data",
                        kind: BufferKind::Constant,
                        size: Self::buffer_size(),
                    },
                    Some(&bytes),
                )?;
                self.buffer = Some(buffer);
                Ok(())
            }
        }
    }

    pub fn destroy(&mut self, device: &mut dyn RenderDevice) {
        if let Some(buffer) = self.buffer.take() {
            device.destroy_buffer(buffer);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SceneLightKind {
    Directional {
        direction: Vec3,
        shadow: Option<LightShadow>,
    },
    Point {
        position: Vec3,
    },
    Ambient,
}

/// A light as gathered from the scene for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneLight {
    pub entity: hecs::Entity,
    pub kind: SceneLightKind,
    pub color: Vec3,
    pub intensity: f32,
}

impl SceneLight {
    /// Returns false when the light data is already full.
    pub fn add_to(&self, light_data: &mut RenderLightData) -> bool {
        match self.kind {
            SceneLightKind::Directional { direction, shadow } => {
                light_data.add_directional_light(direction, self.color, self.intensity, shadow)
            }
            SceneLightKind::Point { position } => {
                light_data.add_point_light(position, self.color, self.intensity)
            }
            SceneLightKind::Ambient => light_data.add_ambient_light(self.color, self.intensity),
        }
    }
}

fn directional_scene_light(
    entity: hecs::Entity,
    transform: &WorldTransform,
    light: &DirectionalLight,
) -> RenderResult<SceneLight> {
    let shadow = match &light.shadow_data {
        Some(shadow_data) => {
            let slice = shadow_data.shadow_map.as_array_slice().ok_or_else(|| {
                RenderError::configuration("Directional lights only support texture array shadow maps.")
            })?;
            Some(LightShadow {
                array_index: slice.array_index(),
                world_view_proj: shadow_data.world_view_proj,
                bias: light.shadow_map_bias,
                dimension: slice.dimension(),
            })
        }
        None => None,
    };
    Ok(SceneLight {
        entity,
        kind: SceneLightKind::Directional {
            direction: transform.0.forward(),
            shadow,
        },
        color: light.color,
        intensity: light.intensity,
    })
}

/// Snapshot of every light in the world, directional lights first.
pub fn collect_scene_lights(world: &World) -> RenderResult<Vec<SceneLight>> {
    let mut lights = Vec::new();

    for (entity, (transform, light)) in world.query::<(&WorldTransform, &DirectionalLight)>().iter() {
        lights.push(directional_scene_light(entity, transform, light)?);
    }

    for (entity, (transform, light)) in world.query::<(&WorldTransform, &PointLight)>().iter() {
        lights.push(SceneLight {
            entity,
            kind: SceneLightKind::Point {
                position: transform.0.translation,
            },
            color: light.color,
            intensity: light.intensity,
        });
    }

    for (entity, light) in world.query::<&AmbientLight>().iter() {
        lights.push(SceneLight {
            entity,
            kind: SceneLightKind::Ambient,
            color: light.color,
            intensity: light.intensity,
        });
    }

    Ok(lights)
}

/// Fills a light buffer for one entity draw.
pub trait LightProvider {
    fn provide(&self, light_data: &mut RenderLightData) -> RenderResult<()>;
}

/// Adds the first lights of the scene, up to the buffer capacity.
pub struct SimpleLightProvider<'a> {
    lights: &'a [SceneLight],
}

impl<'a> SimpleLightProvider<'a> {
    pub fn new(lights: &'a [SceneLight]) -> Self {
        Self { lights }
    }
}

impl LightProvider for SimpleLightProvider<'_> {
    fn provide(&self, light_data: &mut RenderLightData) -> RenderResult<()> {
        for light in self.lights.iter().take(light_data.max_lights() - light_data.len()) {
            if !light.add_to(light_data) {
                return Err(RenderError::usage("Failed to add light to light data"));
            }
        }
        Ok(())
    }
}

/// Leaves the light data empty. Used for unlit and shadow draws.
pub struct NoLights;

impl LightProvider for NoLights {
    fn provide(&self, _light_data: &mut RenderLightData) -> RenderResult<()> {
        Ok(())
    }
}

/// One batch of the deferred light accumulation. The batch must fit the
/// light buffer; see [`light_batches`].
pub struct LightBatchProvider<'a> {
    batch: &'a [SceneLight],
}

impl<'a> LightBatchProvider<'a> {
    pub fn new(batch: &'a [SceneLight]) -> Self {
        Self { batch }
    }
}

impl LightProvider for LightBatchProvider<'_> {
    fn provide(&self, light_data: &mut RenderLightData) -> RenderResult<()> {
        for light in self.batch {
            if !light.add_to(light_data) {
                return Err(RenderError::usage(format!(
                    "Light batch of {} lights exceeds the light buffer capacity of {MAX_LIGHTS}",
                    self.batch.len()
                )));
            }
        }
        Ok(())
    }
}

/// Splits the scene lights into batches of at most `MAX_LIGHTS`.
pub fn light_batches(lights: &[SceneLight]) -> std::slice::Chunks<'_, SceneLight> {
    lights.chunks(MAX_LIGHTS)
}
