//! Shader variant cache.
//!
//! Each renderable keeps a [`MaterialContext`] holding the compiled variant it
//! last drew with, plus the resource views and samplers bound alongside it.
//! [`MaterialManager::bind`] only recompiles when the derived config flags
//! change; identical variants are shared between contexts through a weak
//! cache keyed by the full compile inputs.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

use crate::error::{RenderError, RenderResult};
use crate::renderer::camera::CameraData;
use crate::renderer::device::{
    BufferDesc, BufferId, BufferKind, PixelProgram, RenderDevice, ResourceView, SamplerId,
    ShaderCompileSettings, ShaderStage, VertexProgram, MAX_SAMPLERS, MAX_SHADER_RESOURCES,
};
use crate::renderer::features::RendererFeatures;
use crate::renderer::lights::RenderLightData;
use crate::renderer::material::{ConstantInputs, Material, MaterialType, ShaderResources, SharedMaterial};
use crate::renderer::render_pass::RenderPassBlendMode;
use crate::renderer::renderer_data::{RendererAnimationData, RendererData};
use crate::renderer::texture::{SamplerDescriptor, Texture};
use crate::renderer::vertex::{MeshVertexLayout, VertexAttributeElement};

/// Added to every flag set while shader optimization is off, so toggling
/// optimization produces a distinct variant.
pub const FLAG_DISABLE_OPTIMIZATIONS: &str = "disableOptimizations";

const VERTEX_CONSTANTS_SLOT: u32 = 0;
const BONE_CONSTANTS_SLOT: u32 = 1;
const PIXEL_CONSTANTS_SLOT: u32 = 0;
const LIGHT_CONSTANTS_SLOT: u32 = 1;

/// A compiled vertex/pixel program pair.
#[derive(Debug)]
pub struct CompiledMaterial {
    pub material_type: MaterialType,
    pub flags: BTreeSet<String>,
    pub vertex_inputs: Vec<VertexAttributeElement>,
    pub vertex_program: VertexProgram,
    pub pixel_program: PixelProgram,
}

/// Per-renderable binding state.
#[derive(Debug, Default)]
pub struct MaterialContext {
    compiled: Option<Arc<CompiledMaterial>>,
    material_hash: u64,
    mesh_layout_hash: u64,
    blend_mode: Option<RenderPassBlendMode>,
    features_hash: u64,
    flags: BTreeSet<String>,
    views: Vec<Option<Arc<ResourceView>>>,
    samplers: Vec<Option<SamplerId>>,
}

impl MaterialContext {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_valid(&self) -> bool {
        self.compiled.is_some()
    }

    pub fn compiled(&self) -> Option<&Arc<CompiledMaterial>> {
        self.compiled.as_ref()
    }

    pub fn flags(&self) -> &BTreeSet<String> {
        &self.flags
    }

    pub fn resource_views(&self) -> &[Option<Arc<ResourceView>>] {
        &self.views
    }

    pub fn samplers(&self) -> &[Option<SamplerId>] {
        &self.samplers
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct VariantKey {
    vertex: ShaderCompileSettings,
    pixel: ShaderCompileSettings,
    inputs: Vec<VertexAttributeElement>,
    optimize: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct MaterialConstantBuffers {
    created: bool,
    vertex: Option<BufferId>,
    pixel: Option<BufferId>,
}

struct BoundMaterial {
    material: SharedMaterial,
    compiled: Arc<CompiledMaterial>,
    blend_mode: RenderPassBlendMode,
    pixel_shader_enabled: bool,
    resource_count: usize,
    sampler_count: usize,
}

pub struct MaterialManager {
    features: RendererFeatures,
    features_hash: u64,
    variants: HashMap<VariantKey, Weak<CompiledMaterial>>,
    constant_buffers: [MaterialConstantBuffers; MaterialType::COUNT],
    bone_buffer: Option<BufferId>,
    samplers: HashMap<SamplerDescriptor, SamplerId>,
    // Keyed by allocation address; unloaded with the device.
    uploaded_textures: HashMap<usize, Arc<Texture>>,
    bound: Option<BoundMaterial>,
    compile_count: usize,
    null_views: Vec<Option<Arc<ResourceView>>>,
    null_samplers: Vec<Option<SamplerId>>,
}

impl Default for MaterialManager {
    fn default() -> Self {
        Self::new(RendererFeatures::default())
    }
}

impl MaterialManager {
    pub fn new(features: RendererFeatures) -> Self {
        Self {
            features,
            features_hash: features.hash(),
            variants: HashMap::new(),
            constant_buffers: [MaterialConstantBuffers::default(); MaterialType::COUNT],
            bone_buffer: None,
            samplers: HashMap::new(),
            uploaded_textures: HashMap::new(),
            bound: None,
            compile_count: 0,
            null_views: vec![None; MAX_SHADER_RESOURCES],
            null_samplers: vec![None; MAX_SAMPLERS],
        }
    }

    pub fn features(&self) -> &RendererFeatures {
        &self.features
    }

    pub fn set_features(&mut self, features: RendererFeatures) {
        self.features = features;
        self.features_hash = features.hash();
    }

    /// Number of variants compiled by this manager; cache hits are not counted.
    pub fn compile_count(&self) -> usize {
        self.compile_count
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    /// Vertex inputs of the currently bound variant.
    pub fn bound_vertex_inputs(&self) -> Option<&[VertexAttributeElement]> {
        self.bound
            .as_ref()
            .map(|bound| bound.compiled.vertex_inputs.as_slice())
    }

    pub fn bound_blend_mode(&self) -> Option<RenderPassBlendMode> {
        self.bound.as_ref().map(|bound| bound.blend_mode)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn bind(
        &mut self,
        device: &mut dyn RenderDevice,
        context: &mut MaterialContext,
        material: &SharedMaterial,
        layout: &MeshVertexLayout,
        light_data: &RenderLightData,
        blend_mode: RenderPassBlendMode,
        pixel_shader_enabled: bool,
    ) -> RenderResult<()> {
        if self.bound.is_some() {
            return Err(RenderError::usage(
                "A material is still bound. Did you forget to call MaterialManager::unbind()?",
            ));
        }

        let guard = material
            .read()
            .map_err(|_| RenderError::usage("material lock poisoned"))?;
        let material_ref: &dyn Material = &*guard;
        let material_hash = material_ref.compiler_properties_hash();

        if self.requires_rebuild(context, material_hash, layout, blend_mode) {
            let mut flags = material_ref.config_flags(&self.features, blend_mode, layout)?;
            if !self.features.enable_shader_optimization {
                flags.insert(FLAG_DISABLE_OPTIMIZATIONS.to_string());
            }
            log::debug!(
                "Material flags for {}: {:?}",
                material_ref.material_type().name(),
                flags
            );

            // Flag equality, not hash equality, gates the compile.
            if context.compiled.is_none() || context.flags != flags {
                match self.compile(device, material_ref, &flags) {
                    Ok(compiled) => {
                        context.compiled = Some(compiled);
                        context.flags = flags;
                        context.views.clear();
                        context.samplers.clear();
                    }
                    Err(err) => {
                        context.reset();
                        return Err(err);
                    }
                }
            }

            context.material_hash = material_hash;
            context.mesh_layout_hash = layout.properties_hash();
            context.blend_mode = Some(blend_mode);
            context.features_hash = self.features_hash;
        }

        let compiled = context
            .compiled
            .clone()
            .ok_or_else(|| RenderError::usage("material context has no compiled variant"))?;

        let resources = material_ref.shader_resources(&compiled.flags, light_data)?;
        self.load_resources(device, context, &resources)?;

        device.set_vertex_program(Some(&compiled.vertex_program));
        let buffers = self.constant_buffers[compiled.material_type.index()];
        device.set_constant_buffers(ShaderStage::Vertex, VERTEX_CONSTANTS_SLOT, &[buffers.vertex]);
        device.set_constant_buffers(ShaderStage::Vertex, BONE_CONSTANTS_SLOT, &[self.bone_buffer]);

        let (resource_count, sampler_count) = if pixel_shader_enabled {
            device.set_pixel_program(Some(&compiled.pixel_program));
            device.set_constant_buffers(ShaderStage::Pixel, PIXEL_CONSTANTS_SLOT, &[buffers.pixel]);
            device.set_constant_buffers(ShaderStage::Pixel, LIGHT_CONSTANTS_SLOT, &[light_data.buffer()]);
            device.set_shader_resources(0, &context.views);
            device.set_samplers(0, &context.samplers);
            (context.views.len(), context.samplers.len())
        } else {
            device.set_pixel_program(None);
            (0, 0)
        };

        drop(guard);
        self.bound = Some(BoundMaterial {
            material: Arc::clone(material),
            compiled,
            blend_mode,
            pixel_shader_enabled,
            resource_count,
            sampler_count,
        });
        Ok(())
    }

    fn requires_rebuild(
        &self,
        context: &MaterialContext,
        material_hash: u64,
        layout: &MeshVertexLayout,
        blend_mode: RenderPassBlendMode,
    ) -> bool {
        if context.compiled.is_none() {
            return true;
        }
        if context.blend_mode != Some(blend_mode) {
            log::warn!(
                "Rendering material with a different blend mode than last time ({:?} -> {:?}); \
                 this forces a variant rebuild",
                context.blend_mode,
                blend_mode
            );
            return true;
        }
        if context.mesh_layout_hash != layout.properties_hash() {
            log::warn!("Rendering material with a different mesh vertex layout than last time");
            return true;
        }
        if context.material_hash != material_hash {
            log::debug!("Material hash changed");
            return true;
        }
        if context.features_hash != self.features_hash {
            log::debug!("Renderer features hash changed");
            return true;
        }
        false
    }

    fn compile(
        &mut self,
        device: &mut dyn RenderDevice,
        material: &dyn Material,
        flags: &BTreeSet<String>,
    ) -> RenderResult<Arc<CompiledMaterial>> {
        let material_type = material.material_type();
        let vertex_inputs = material.vertex_inputs(flags)?;
        let key = VariantKey {
            vertex: material.vertex_shader_settings(flags),
            pixel: material.pixel_shader_settings(flags),
            inputs: vertex_inputs.clone(),
            optimize: self.features.enable_shader_optimization,
        };

        self.ensure_constant_buffers(device, material)?;

        if let Some(existing) = self.variants.get(&key).and_then(Weak::upgrade) {
            log::debug!("Reusing compiled {} variant", material_type.name());
            return Ok(existing);
        }

        log::info!("Recompiling shaders for {} material", material_type.name());
        let vertex_program =
            device.compile_vertex_program(&key.vertex, &vertex_inputs, key.optimize)?;
        let pixel_program = device.compile_pixel_program(&key.pixel, key.optimize)?;
        self.compile_count += 1;

        let compiled = Arc::new(CompiledMaterial {
            material_type,
            flags: flags.clone(),
            vertex_inputs,
            vertex_program,
            pixel_program,
        });
        self.variants.retain(|_, variant| variant.strong_count() > 0);
        self.variants.insert(key, Arc::downgrade(&compiled));
        Ok(compiled)
    }

    /// Constant buffers are shared by every material of a type.
    fn ensure_constant_buffers(
        &mut self,
        device: &mut dyn RenderDevice,
        material: &dyn Material,
    ) -> RenderResult<()> {
        let material_type = material.material_type();
        let slot = &mut self.constant_buffers[material_type.index()];
        if !slot.created {
            let vertex_size = material.vertex_constants_size() as u64;
            if vertex_size > 0 {
                let label = format!("{} vertex constants", material_type.name());
                slot.vertex = Some(device.create_buffer(
                    &BufferDesc {
                        label: &label,
                        kind: BufferKind::Constant,
                        size: vertex_size,
                    },
                    None,
                )?);
            }
            let pixel_size = material.pixel_constants_size() as u64;
            if pixel_size > 0 {
                let label = format!("{} pixel constants", material_type.name());
                slot.pixel = Some(device.create_buffer(
                    &BufferDesc {
                        label: &label,
                        kind: BufferKind::Constant,
                        size: pixel_size,
                    },
                    None,
                )?);
            }
            slot.created = true;
        }

        if self.bone_buffer.is_none() {
            self.bone_buffer = Some(device.create_buffer(
                &BufferDesc {
                    label: "Bone transforms",
                    kind: BufferKind::Constant,
                    size: RendererAnimationData::bone_buffer_size(),
                },
                None,
            )?);
        }
        Ok(())
    }

    fn load_resources(
        &mut self,
        device: &mut dyn RenderDevice,
        context: &mut MaterialContext,
        resources: &ShaderResources,
    ) -> RenderResult<()> {
        if resources.textures.len() > MAX_SHADER_RESOURCES {
            return Err(RenderError::configuration(format!(
                "Material requires {} shader resources, the device supports {MAX_SHADER_RESOURCES}",
                resources.textures.len()
            )));
        }
        if resources.samplers.len() > MAX_SAMPLERS {
            return Err(RenderError::configuration(format!(
                "Material requires {} samplers, the device supports {MAX_SAMPLERS}",
                resources.samplers.len()
            )));
        }

        if context.views.len() != resources.textures.len() {
            context.views = vec![None; resources.textures.len()];
        }
        for (slot, texture) in context.views.iter_mut().zip(&resources.textures) {
            let view = texture.load(device)?;
            if !texture.desc().render_target && texture.owns_device_texture() {
                self.uploaded_textures
                    .entry(Arc::as_ptr(texture) as usize)
                    .or_insert_with(|| Arc::clone(texture));
            }
            let current = slot.as_ref().is_some_and(|bound| Arc::ptr_eq(bound, &view));
            if !current {
                *slot = Some(view);
            }
        }

        if context.samplers.len() != resources.samplers.len() {
            context.samplers = vec![None; resources.samplers.len()];
        }
        for (slot, desc) in context.samplers.iter_mut().zip(&resources.samplers) {
            let sampler = match self.samplers.get(desc) {
                Some(sampler) => *sampler,
                None => {
                    let sampler = device.create_sampler(desc)?;
                    self.samplers.insert(*desc, sampler);
                    sampler
                }
            };
            *slot = Some(sampler);
        }
        Ok(())
    }

    /// Uploads the per-draw constants and issues the draw.
    pub fn render(
        &mut self,
        device: &mut dyn RenderDevice,
        renderer_data: &RendererData,
        world: glam::Mat4,
        animation: &RendererAnimationData,
        camera: &CameraData,
    ) -> RenderResult<()> {
        let bound = self.bound.as_ref().ok_or_else(|| {
            RenderError::usage("MaterialManager::render called without a bound material")
        })?;
        let guard = bound
            .material
            .read()
            .map_err(|_| RenderError::usage("material lock poisoned"))?;

        let inputs = ConstantInputs {
            world,
            view: camera.view,
            projection: camera.projection,
            eye_position: camera.position,
            animation,
        };
        let buffers = self.constant_buffers[bound.compiled.material_type.index()];

        if let Some(buffer) = buffers.vertex {
            device.update_buffer(buffer, &guard.vertex_constants(&inputs))?;
        }
        if animation.num_bones() > 0 {
            if let Some(buffer) = self.bone_buffer {
                device.update_buffer(buffer, &animation.bone_bytes())?;
            }
        }
        if bound.pixel_shader_enabled {
            if let Some(buffer) = buffers.pixel {
                device.update_buffer(buffer, &guard.pixel_constants(&inputs))?;
            }
        }

        renderer_data.bind(device);
        renderer_data.draw(device)
    }

    /// Clears every resource and sampler slot the bound material used.
    pub fn unbind(&mut self, device: &mut dyn RenderDevice) {
        if let Some(bound) = self.bound.take() {
            if bound.resource_count > 0 {
                device.set_shader_resources(0, &self.null_views[..bound.resource_count]);
            }
            if bound.sampler_count > 0 {
                device.set_samplers(0, &self.null_samplers[..bound.sampler_count]);
            }
        }
    }

    /// Releases every device object. Contexts keep their variants alive until
    /// they are reset.
    pub fn destroy_device_dependent_resources(&mut self, device: &mut dyn RenderDevice) {
        self.bound = None;
        for slot in self.constant_buffers.iter_mut() {
            for buffer in [slot.vertex.take(), slot.pixel.take()].into_iter().flatten() {
                device.destroy_buffer(buffer);
            }
            slot.created = false;
        }
        if let Some(buffer) = self.bone_buffer.take() {
            device.destroy_buffer(buffer);
        }
        self.variants.clear();
        self.samplers.clear();
        let uploaded = self.uploaded_textures.len();
        for (_, texture) in self.uploaded_textures.drain() {
            texture.unload(device);
        }
        if uploaded > 0 {
            log::debug!("Unloaded {} material textures", uploaded);
        }
    }

    /// Material textures uploaded through this manager and not yet unloaded.
    pub fn uploaded_texture_count(&self) -> usize {
        self.uploaded_textures.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::{DrawRecord, HeadlessDevice};
    use crate::renderer::material::{shared, PbrMaterial, PbrTexture, UnlitMaterial};
    use crate::renderer::primitives;
    use crate::renderer::texture::Texture;
    use glam::{Mat4, Vec3, Vec4};

    struct Fixture {
        device: HeadlessDevice,
        manager: MaterialManager,
        lights: RenderLightData,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                device: HeadlessDevice::new(),
                manager: MaterialManager::default(),
                lights: RenderLightData::new(),
            }
        }

        fn draw(&mut self, context: &mut MaterialContext, material: &SharedMaterial) -> RenderResult<()> {
            let mesh = primitives::cube(Vec3::ONE);
            self.manager.bind(
                &mut self.device,
                context,
                material,
                mesh.layout(),
                &self.lights,
                RenderPassBlendMode::Opaque,
                true,
            )?;
            let inputs = self.manager.bound_vertex_inputs().unwrap().to_vec();
            let mut data = RendererData::create(&mut self.device, &mesh, &inputs)?;
            let result = self.manager.render(
                &mut self.device,
                &data,
                Mat4::IDENTITY,
                &RendererAnimationData::default(),
                &CameraData::default(),
            );
            self.manager.unbind(&mut self.device);
            data.destroy(&mut self.device);
            result
        }

        fn last_draw(&self) -> &DrawRecord {
            self.device.draws().last().unwrap()
        }
    }

    #[test]
    fn double_bind_is_a_usage_error() {
        let mut fixture = Fixture::new();
        let material: SharedMaterial = shared(UnlitMaterial::default());
        let mesh = primitives::cube(Vec3::ONE);
        let mut context = MaterialContext::default();
        let mut other = MaterialContext::default();
        fixture
            .manager
            .bind(
                &mut fixture.device,
                &mut context,
                &material,
                mesh.layout(),
                &fixture.lights,
                RenderPassBlendMode::Opaque,
                true,
            )
            .unwrap();
        let second = fixture.manager.bind(
            &mut fixture.device,
            &mut other,
            &material,
            mesh.layout(),
            &fixture.lights,
            RenderPassBlendMode::Opaque,
            true,
        );
        assert!(matches!(second, Err(RenderError::Usage(_))));
        fixture.manager.unbind(&mut fixture.device);
        assert!(!fixture.manager.is_bound());
    }

    #[test]
    fn render_without_bind_is_a_usage_error() {
        let mut fixture = Fixture::new();
        let mesh = primitives::cube(Vec3::ONE);
        let inputs = UnlitMaterial::default().vertex_inputs(&BTreeSet::new()).unwrap();
        let data = RendererData::create(&mut fixture.device, &mesh, &inputs).unwrap();
        let result = fixture.manager.render(
            &mut fixture.device,
            &data,
            Mat4::IDENTITY,
            &RendererAnimationData::default(),
            &CameraData::default(),
        );
        assert!(matches!(result, Err(RenderError::Usage(_))));
    }

    #[test]
    fn variants_are_shared_between_contexts() {
        let mut fixture = Fixture::new();
        let first: SharedMaterial = shared(PbrMaterial::default());
        let second: SharedMaterial = shared(PbrMaterial::new(Vec4::new(1.0, 0.0, 0.0, 1.0)));
        let mut first_context = MaterialContext::default();
        let mut second_context = MaterialContext::default();

        fixture.draw(&mut first_context, &first).unwrap();
        fixture.draw(&mut second_context, &second).unwrap();
        assert_eq!(fixture.manager.compile_count(), 1);
        assert_eq!(fixture.device.compile_count(), 2);
        assert!(Arc::ptr_eq(
            first_context.compiled().unwrap(),
            second_context.compiled().unwrap()
        ));
    }

    #[test]
    fn optimization_toggle_adds_a_flag() {
        let mut fixture = Fixture::new();
        let material: SharedMaterial = shared(UnlitMaterial::default());
        let mut context = MaterialContext::default();
        fixture.draw(&mut context, &material).unwrap();
        assert!(context.flags().contains(FLAG_DISABLE_OPTIMIZATIONS));

        fixture.manager.set_features(RendererFeatures {
            enable_shader_optimization: true,
            ..RendererFeatures::default()
        });
        fixture.draw(&mut context, &material).unwrap();
        assert!(!context.flags().contains(FLAG_DISABLE_OPTIMIZATIONS));
        assert_eq!(fixture.manager.compile_count(), 2);
    }

    #[test]
    fn feature_changes_that_keep_the_flags_skip_compilation() {
        let mut fixture = Fixture::new();
        let material: SharedMaterial = shared(UnlitMaterial::default());
        let mut context = MaterialContext::default();
        fixture.draw(&mut context, &material).unwrap();

        fixture.manager.set_features(RendererFeatures {
            shadows_enabled: false,
            ..RendererFeatures::default()
        });
        fixture.draw(&mut context, &material).unwrap();
        assert_eq!(fixture.manager.compile_count(), 1);
    }

    #[test]
    fn compile_failures_invalidate_the_context() {
        let mut fixture = Fixture::new();
        fixture.device.fail_shader("Unlit_PS.wgsl");
        let material: SharedMaterial = shared(UnlitMaterial::default());
        let mut context = MaterialContext::default();

        let err = fixture.draw(&mut context, &material).unwrap_err();
        assert!(err.is_transient());
        assert!(!context.is_valid());
        assert!(!fixture.manager.is_bound());

        fixture.device.clear_shader_failures();
        fixture.draw(&mut context, &material).unwrap();
        assert!(context.is_valid());
    }

    #[test]
    fn textures_bind_views_and_samplers() {
        let mut fixture = Fixture::new();
        let mut pbr = PbrMaterial::default();
        pbr.set_texture(
            PbrTexture::BaseColor,
            Some(Arc::new(Texture::solid_color("albedo", [255; 4]))),
        );
        pbr.set_texture(
            PbrTexture::Emissive,
            Some(Arc::new(Texture::solid_color("emissive", [0; 4]))),
        );
        let material: SharedMaterial = shared(pbr);
        let mut context = MaterialContext::default();
        fixture
            .draw(&mut context, &material)
            .unwrap();

        assert_eq!(context.resource_views().len(), 2);
        assert_eq!(context.samplers().len(), 2);
        let draw = fixture.last_draw();
        assert_eq!(draw.shader_resources.iter().flatten().count(), 2);
        // Both textures use the same sampler description.
        assert_eq!(draw.samplers[0], draw.samplers[1]);
    }

    #[test]
    fn pixel_shader_can_be_disabled() {
        let mut fixture = Fixture::new();
        let material: SharedMaterial = shared(UnlitMaterial::default());
        let mesh = primitives::cube(Vec3::ONE);
        let mut context = MaterialContext::default();
        fixture
            .manager
            .bind(
                &mut fixture.device,
                &mut context,
                &material,
                mesh.layout(),
                &fixture.lights,
                RenderPassBlendMode::Opaque,
                false,
            )
            .unwrap();
        let inputs = fixture.manager.bound_vertex_inputs().unwrap().to_vec();
        let data = RendererData::create(&mut fixture.device, &mesh, &inputs).unwrap();
        fixture
            .manager
            .render(
                &mut fixture.device,
                &data,
                Mat4::IDENTITY,
                &RendererAnimationData::default(),
                &CameraData::default(),
            )
            .unwrap();
        fixture.manager.unbind(&mut fixture.device);
        assert!(fixture.last_draw().pixel_program.is_none());
        assert!(fixture.last_draw().vertex_program.is_some());
    }
}
