//! Frame orchestration.
//!
//! A frame starts the cull sort, clears the final targets and then, once the
//! culled list is available, starts the alpha sort and runs the steps in
//! their fixed order: shadow maps, deferred lighting, standard (transparent),
//! debug elements and sky. Passes that need the back-to-front list wait on the
//! alpha sorter themselves.
//!
//! Any error escaping a pass sets a sticky fatal flag. Later frames are
//! skipped until the device resources are recreated.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use glam::{Mat4, Quat, Vec3, Vec4};
use hecs::{Entity, World};

use crate::error::{RenderError, RenderResult};
use crate::renderer::camera::CameraData;
use crate::renderer::device::{ClearFlags, RenderDevice, ResourceView, TextureDesc, TextureFormat, Viewport};
use crate::renderer::entity_renderer::{EntityRenderer, Renderable};
use crate::renderer::features::RendererFeatures;
use crate::renderer::frustum::Frustum;
use crate::renderer::internal::SharedStateCache;
use crate::renderer::lights::{
    collect_scene_lights, light_batches, LightBatchProvider, NoLights, SceneLight, SimpleLightProvider,
};
use crate::renderer::material::{
    shared, ClearGBufferMaterial, DeferredLightMaterial, MaterialAlphaMode, SkyboxMaterial,
};
use crate::renderer::primitives;
use crate::renderer::render_pass::{
    DepthMode, DrawDestination, RenderPass, RenderPassBlendMode, RenderPassConfig, StencilMode,
};
use crate::renderer::render_step::{RenderStep, RenderStepKind};
use crate::renderer::shadow_map::ShadowMapManager;
use crate::renderer::sorters::{AlphaSorter, CullSorter, SortEntry};
use crate::renderer::texture::Texture;
use crate::scene::bounds::{Aabb, BoundingSphere};
use crate::scene::components::{
    DirectionalLight, RenderableComponent, ShadowData, ShadowMap, WorldTransform,
};
use crate::scene::Scene;
use crate::settings::RenderSettings;

/// Color targets of the G-buffer.
pub const MAX_RENDER_TARGET_VIEWS: usize = 3;

const GBUFFER_FORMATS: [TextureFormat; MAX_RENDER_TARGET_VIEWS] = [
    TextureFormat::Rgba8Unorm,
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba8Unorm,
];
const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth24PlusStencil8;
const FINAL_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Counters for the last rendered frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub visible_entities: usize,
    pub opaque_entities: usize,
    pub alpha_entities: usize,
    pub shadow_passes: usize,
    pub light_batches: usize,
    pub draw_calls: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepTiming {
    pub frames: u32,
    pub total: Duration,
}

impl StepTiming {
    fn record(&mut self, elapsed: Duration) {
        self.frames += 1;
        self.total += elapsed;
    }

    pub fn average(&self) -> Duration {
        if self.frames == 0 {
            Duration::ZERO
        } else {
            self.total / self.frames
        }
    }
}

/// Device objects the pass callbacks draw with.
pub struct FrameResources {
    shadow_maps: ShadowMapManager,
    clear_gbuffer: Option<Renderable>,
    deferred_light: Option<Renderable>,
    deferred_light_material: Arc<RwLock<DeferredLightMaterial>>,
    sky: Option<Renderable>,
    sky_material: Arc<RwLock<SkyboxMaterial>>,
}

impl FrameResources {
    fn new(settings: &RenderSettings) -> Self {
        Self {
            shadow_maps: ShadowMapManager::new(settings.shadow_map_size, settings.shadow_map_array_size),
            clear_gbuffer: None,
            deferred_light: None,
            deferred_light_material: shared(DeferredLightMaterial::new()),
            sky: None,
            sky_material: shared(SkyboxMaterial::default()),
        }
    }

    pub fn shadow_maps(&self) -> &ShadowMapManager {
        &self.shadow_maps
    }

    fn renderables_mut(&mut self) -> impl Iterator<Item = &mut Option<Renderable>> {
        [&mut self.clear_gbuffer, &mut self.deferred_light, &mut self.sky].into_iter()
    }
}

/// Everything a pass callback may touch while a frame is being rendered.
pub struct FrameContext<'a> {
    pub device: &'a mut dyn RenderDevice,
    pub scene: &'a mut Scene,
    pub entity_renderer: &'a mut EntityRenderer,
    pub resources: &'a mut FrameResources,
    /// Output of the cull sort.
    pub visible: &'a [SortEntry],
    pub alpha_sorter: &'a mut AlphaSorter,
    /// Scene lights, refreshed after the shadow maps are rendered.
    pub lights: Vec<SceneLight>,
    pub stats: &'a mut RenderStats,
}

struct WindowTargets {
    width: u32,
    height: u32,
    gbuffer: [Arc<Texture>; MAX_RENDER_TARGET_VIEWS],
    depth: Arc<Texture>,
    final_color: Arc<Texture>,
}

impl WindowTargets {
    fn create(device: &mut dyn RenderDevice, width: u32, height: u32) -> RenderResult<Self> {
        let target = |label: &str, format: TextureFormat| {
            Arc::new(Texture::new(
                label,
                TextureDesc::render_target(label, width, height, format),
                None,
            ))
        };
        let targets = Self {
            width,
            height,
            gbuffer: [
                target("GBuffer Color0", GBUFFER_FORMATS[0]),
                target("GBuffer Color1", GBUFFER_FORMATS[1]),
                target("GBuffer Color2", GBUFFER_FORMATS[2]),
            ],
            depth: target("Depth Stencil", DEPTH_FORMAT),
            final_color: target("Final Color", FINAL_FORMAT),
        };
        for texture in targets.textures() {
            if let Err(err) = texture.load(device) {
                targets.unload(device);
                return Err(err);
            }
        }
        Ok(targets)
    }

    fn textures(&self) -> impl Iterator<Item = &Arc<Texture>> {
        self.gbuffer
            .iter()
            .chain([&self.depth, &self.final_color])
    }

    fn unload(&self, device: &mut dyn RenderDevice) {
        for texture in self.textures() {
            texture.unload(device);
        }
    }

    fn viewport(&self) -> Viewport {
        Viewport::new(self.width as f32, self.height as f32)
    }

    fn views(&self, textures: &[Arc<Texture>]) -> RenderResult<Vec<Option<Arc<ResourceView>>>> {
        textures
            .iter()
            .map(|texture| {
                texture
                    .view()
                    .map(Some)
                    .ok_or_else(|| RenderError::usage(format!("render target {} is not loaded", texture.name())))
            })
            .collect()
    }

    fn depth_view(&self) -> RenderResult<Arc<ResourceView>> {
        self.depth
            .view()
            .ok_or_else(|| RenderError::usage("depth target is not loaded"))
    }
}

pub struct RenderStepManager {
    steps: Vec<RenderStep>,
    entity_renderer: EntityRenderer,
    resources: FrameResources,
    cull_sorter: CullSorter,
    alpha_sorter: AlphaSorter,
    states: SharedStateCache,
    window: Option<WindowTargets>,
    device_ready: bool,
    fatal_error: bool,
    enable_deferred_rendering: bool,
    clear_color: [f32; 4],
    timings: [StepTiming; RenderStepKind::ALL.len()],
    stats: RenderStats,
    frame_count: u64,
}

impl RenderStepManager {
    pub fn new(settings: &RenderSettings) -> Self {
        Self {
            steps: build_steps(),
            entity_renderer: EntityRenderer::new(settings.features),
            resources: FrameResources::new(settings),
            cull_sorter: CullSorter::new(),
            alpha_sorter: AlphaSorter::new(),
            states: SharedStateCache::default(),
            window: None,
            device_ready: false,
            fatal_error: false,
            enable_deferred_rendering: settings.enable_deferred_rendering,
            clear_color: settings.clear_color,
            timings: [StepTiming::default(); RenderStepKind::ALL.len()],
            stats: RenderStats::default(),
            frame_count: 0,
        }
    }

    pub fn steps(&self) -> &[RenderStep] {
        &self.steps
    }

    pub fn entity_renderer(&self) -> &EntityRenderer {
        &self.entity_renderer
    }

    pub fn resources(&self) -> &FrameResources {
        &self.resources
    }

    pub fn set_features(&mut self, features: RendererFeatures) {
        self.entity_renderer.set_features(features);
    }

    pub fn set_step_enabled(&mut self, kind: RenderStepKind, enabled: bool) {
        self.steps[kind.index()].set_enabled(enabled);
    }

    pub fn is_step_enabled(&self, kind: RenderStepKind) -> bool {
        self.steps[kind.index()].is_enabled()
    }

    /// Without deferred rendering the deferred step is skipped and opaque
    /// entities are not drawn.
    pub fn set_deferred_rendering_enabled(&mut self, enabled: bool) {
        self.enable_deferred_rendering = enabled;
    }

    pub fn is_deferred_rendering_enabled(&self) -> bool {
        self.enable_deferred_rendering
    }

    pub fn has_fatal_error(&self) -> bool {
        self.fatal_error
    }

    pub fn is_device_ready(&self) -> bool {
        self.device_ready
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn step_timing(&self, kind: RenderStepKind) -> StepTiming {
        self.timings[kind.index()]
    }

    pub fn screen_viewport(&self) -> Option<Viewport> {
        self.window.as_ref().map(WindowTargets::viewport)
    }

    /// The image the frame resolves into.
    pub fn final_target(&self) -> Option<&Arc<Texture>> {
        self.window.as_ref().map(|window| &window.final_color)
    }

    pub fn create_device_dependent_resources(&mut self, device: &mut dyn RenderDevice) -> RenderResult<()> {
        if self.device_ready {
            return Err(RenderError::usage(
                "Device dependent resources created twice without being destroyed",
            ));
        }

        for step in &mut self.steps {
            step.create_device_dependent_resources(device, &mut self.states)?;
        }
        self.resources.shadow_maps.create_device_dependent_resources(device)?;
        self.resources
            .deferred_light_material
            .write()
            .map_err(|_| RenderError::usage("deferred light material lock poisoned"))?
            .shadow_map_array_texture = self.resources.shadow_maps.depth_texture_array();

        self.resources.clear_gbuffer = Some(EntityRenderer::create_screen_space_quad(shared(
            ClearGBufferMaterial,
        )));
        self.resources.deferred_light = Some(EntityRenderer::create_screen_space_quad(
            self.resources.deferred_light_material.clone(),
        ));
        self.resources.sky = Some(Renderable::new(
            "Sky",
            Arc::new(primitives::sphere(32, 16)),
            self.resources.sky_material.clone(),
        ));

        self.device_ready = true;
        self.fatal_error = false;
        log::info!("Created device dependent resources on the {} device", device.name());
        Ok(())
    }

    /// Returns every borrowed shadow slice, drops the derived state of every
    /// renderable in `world` and releases all device objects.
    pub fn destroy_device_dependent_resources(
        &mut self,
        device: &mut dyn RenderDevice,
        world: &World,
    ) -> RenderResult<()> {
        if !self.device_ready {
            return Err(RenderError::usage(
                "Device dependent resources destroyed without being created",
            ));
        }
        self.cull_sorter.reset();
        self.alpha_sorter.reset();

        if self.window.is_some() {
            self.destroy_window_size_dependent_resources(device)?;
        }

        for (_, light) in world.query::<&mut DirectionalLight>().iter() {
            let owns_slice = light
                .shadow_data
                .as_ref()
                .is_some_and(|data| data.shadow_map.as_array_slice().is_some());
            if !owns_slice {
                continue;
            }
            if let Some(ShadowData {
                shadow_map: ShadowMap::ArraySlice(slice),
                ..
            }) = light.shadow_data.take()
            {
                self.resources.shadow_maps.return_texture(slice)?;
            }
        }

        for (_, renderable) in world.query::<&mut RenderableComponent>().iter() {
            if let Some(mut data) = renderable.renderer_data.take() {
                data.destroy(device);
            }
            renderable.material_context.reset();
        }
        for renderable in self.resources.renderables_mut() {
            if let Some(mut renderable) = renderable.take() {
                renderable.destroy(device);
            }
        }

        for step in &mut self.steps {
            step.destroy_device_dependent_resources();
        }
        self.states.clear();
        self.entity_renderer.destroy_device_dependent_resources(device);
        self.resources
            .deferred_light_material
            .write()
            .map_err(|_| RenderError::usage("deferred light material lock poisoned"))?
            .shadow_map_array_texture = None;
        self.resources.shadow_maps.destroy_device_dependent_resources(device)?;

        self.log_step_timings();
        self.device_ready = false;
        self.fatal_error = false;
        log::info!("Destroyed device dependent resources");
        Ok(())
    }

    pub fn create_window_size_dependent_resources(
        &mut self,
        device: &mut dyn RenderDevice,
        width: u32,
        height: u32,
    ) -> RenderResult<()> {
        if !self.device_ready {
            return Err(RenderError::DeviceUnavailable(
                "window size dependent resources need device resources first",
            ));
        }
        if self.window.is_some() {
            return Err(RenderError::usage(
                "Window size dependent resources created twice without being destroyed",
            ));
        }
        if width == 0 || height == 0 {
            return Err(RenderError::configuration(format!(
                "Cannot create render targets of size {width}x{height}"
            )));
        }

        let targets = WindowTargets::create(device, width, height)?;
        let gbuffer = targets.views(&targets.gbuffer)?;
        let final_target = targets.views(std::slice::from_ref(&targets.final_color))?;
        let depth = targets.depth_view()?;
        for step in &mut self.steps {
            step.set_render_targets(&gbuffer, &final_target, Some(&depth));
        }

        {
            let mut material = self
                .resources
                .deferred_light_material
                .write()
                .map_err(|_| RenderError::usage("deferred light material lock poisoned"))?;
            let [color0, color1, color2] = &targets.gbuffer;
            material.color0_texture = Some(Arc::clone(color0));
            material.color1_texture = Some(Arc::clone(color1));
            material.color2_texture = Some(Arc::clone(color2));
            material.depth_texture = Some(Arc::clone(&targets.depth));
        }

        self.window = Some(targets);
        log::info!("Created window size dependent resources ({width}x{height})");
        Ok(())
    }

    pub fn destroy_window_size_dependent_resources(&mut self, device: &mut dyn RenderDevice) -> RenderResult<()> {
        let targets = self.window.take().ok_or_else(|| {
            RenderError::usage("Window size dependent resources destroyed without being created")
        })?;
        for step in &mut self.steps {
            step.clear_render_targets();
        }
        {
            let mut material = self
                .resources
                .deferred_light_material
                .write()
                .map_err(|_| RenderError::usage("deferred light material lock poisoned"))?;
            material.color0_texture = None;
            material.color1_texture = None;
            material.color2_texture = None;
            material.depth_texture = None;
        }
        targets.unload(device);
        log::info!("Destroyed window size dependent resources");
        Ok(())
    }

    /// Replaces the window targets as a whole.
    pub fn resize(&mut self, device: &mut dyn RenderDevice, width: u32, height: u32) -> RenderResult<()> {
        if self.window.is_some() {
            self.destroy_window_size_dependent_resources(device)?;
        }
        self.create_window_size_dependent_resources(device, width, height)
    }

    /// Renders one frame of `scene`.
    pub fn render(&mut self, device: &mut dyn RenderDevice, scene: &mut Scene) -> RenderResult<()> {
        if self.fatal_error {
            return Ok(());
        }
        if !self.device_ready {
            return Err(RenderError::DeviceUnavailable(
                "render called before device dependent resources were created",
            ));
        }
        let Some(window) = self.window.as_ref() else {
            return Err(RenderError::usage(
                "render called before window size dependent resources were created",
            ));
        };
        let viewport = window.viewport();
        let final_view = window
            .final_color
            .view()
            .ok_or_else(|| RenderError::usage("final target is not loaded"))?;
        let depth_view = window.depth_view()?;

        let Some(camera) = scene.camera_data(viewport.aspect_ratio())? else {
            log::debug!("No main camera; skipping frame");
            return Ok(());
        };
        let lights = match collect_scene_lights(&scene.world) {
            Ok(lights) => lights,
            Err(err) => {
                log::error!(
                    "Light collection failed; rendering is disabled until the device is recreated: {}",
                    err
                );
                self.fatal_error = true;
                return Ok(());
            }
        };

        self.stats = RenderStats::default();
        self.entity_renderer.reset_draw_count();
        self.entity_renderer.set_light_resources(
            scene.environment.clone(),
            self.resources.shadow_maps.depth_texture_array(),
        );

        self.cull_sorter
            .begin_sort_async(sort_candidates(&scene.world), Frustum::from_view_proj(&camera.view_proj()));

        device.begin_event("Frame");
        device.set_viewport(viewport);
        device.clear_render_target(&final_view, self.clear_color);
        device.clear_depth_stencil(&depth_view, ClearFlags::DEPTH | ClearFlags::STENCIL, 1.0, 0);

        let Self {
            steps,
            entity_renderer,
            resources,
            cull_sorter,
            alpha_sorter,
            fatal_error,
            enable_deferred_rendering,
            timings,
            stats,
            ..
        } = self;

        let waited = cull_sorter.wait_then(|visible| {
            alpha_sorter.begin_sort_async(Arc::from(visible), camera.position);
            stats.visible_entities = visible.len();

            let mut ctx = FrameContext {
                device: &mut *device,
                scene: &mut *scene,
                entity_renderer: &mut *entity_renderer,
                resources: &mut *resources,
                visible,
                alpha_sorter: &mut *alpha_sorter,
                lights,
                stats: &mut *stats,
            };

            for step in steps.iter_mut() {
                if !step.is_enabled() {
                    continue;
                }
                if step.kind() == RenderStepKind::Deferred && !*enable_deferred_rendering {
                    continue;
                }
                ctx.device.set_viewport(viewport);
                let started = Instant::now();
                let result = step.render(&mut ctx, &camera);
                timings[step.kind().index()].record(started.elapsed());
                if let Err(err) = result {
                    log::error!(
                        "{} step failed; rendering is disabled until the device is recreated: {}",
                        step.name(),
                        err
                    );
                    *fatal_error = true;
                    break;
                }
            }
        });

        device.end_event();
        waited?;
        device.submit()?;

        self.stats.draw_calls = self.entity_renderer.draw_count();
        self.frame_count += 1;
        Ok(())
    }

    fn log_step_timings(&self) {
        for kind in RenderStepKind::ALL {
            let timing = self.timings[kind.index()];
            if timing.frames > 0 {
                log::info!(
                    "{}: {:?} average over {} frames",
                    kind.name(),
                    timing.average(),
                    timing.frames
                );
            }
        }
    }
}

fn build_steps() -> Vec<RenderStep> {
    use RenderPassBlendMode::{Additive, BlendedAlpha, Opaque};

    vec![
        RenderStep::new(
            RenderStepKind::ShadowMap,
            vec![RenderPass::new(
                "Shadow Map",
                RenderPassConfig::new(Opaque, DepthMode::ReadWrite, DrawDestination::ShadowMap).with_stencil(
                    StencilMode::Enabled {
                        read_mask: 0xFF,
                        write_mask: 0xFF,
                    },
                    1,
                ),
                Box::new(render_shadow_maps),
            )],
        ),
        RenderStep::new(
            RenderStepKind::Deferred,
            vec![
                RenderPass::new(
                    "Clear G-Buffer",
                    RenderPassConfig::new(Opaque, DepthMode::Disabled, DrawDestination::GBuffer),
                    Box::new(clear_gbuffer),
                ),
                RenderPass::new(
                    "Opaque",
                    RenderPassConfig::new(Opaque, DepthMode::ReadWrite, DrawDestination::GBuffer),
                    Box::new(render_opaque),
                ),
                RenderPass::new(
                    "Light Accumulation",
                    RenderPassConfig::new(Additive, DepthMode::Disabled, DrawDestination::Final),
                    Box::new(accumulate_lights),
                ),
            ],
        ),
        RenderStep::new(
            RenderStepKind::Standard,
            vec![RenderPass::new(
                "Transparent",
                RenderPassConfig::new(BlendedAlpha, DepthMode::ReadWrite, DrawDestination::Final),
                Box::new(render_transparent),
            )],
        ),
        RenderStep::new(
            RenderStepKind::Debug,
            vec![RenderPass::new(
                "Debug Shapes",
                RenderPassConfig::new(Opaque, DepthMode::WriteOnly, DrawDestination::Final),
                Box::new(render_debug_shapes),
            )],
        ),
        RenderStep::new(
            RenderStepKind::Sky,
            vec![RenderPass::new(
                "Sky",
                RenderPassConfig::new(Opaque, DepthMode::ReadWrite, DrawDestination::Final),
                Box::new(render_sky),
            )],
        ),
    ]
}

/// Visible renderables with loaded meshes, with their world bounds.
fn sort_candidates(world: &World) -> Vec<SortEntry> {
    world
        .query::<(&RenderableComponent, &WorldTransform)>()
        .iter()
        .filter(|(_, (renderable, _))| renderable.visible)
        .filter_map(|(entity, (renderable, transform))| {
            renderable
                .world_bounds(transform)
                .map(|bounds| SortEntry { entity, bounds })
        })
        .collect()
}

fn is_blended(world: &World, entity: Entity) -> bool {
    EntityRenderer::alpha_mode(world, entity) == Some(MaterialAlphaMode::Blend)
}

/// Orthographic light camera around `volume`, which is expressed in the
/// light's rotated frame. The light looks down its local -Z axis.
pub fn light_view_projection(rotation: Quat, volume: Option<&Aabb>) -> (Mat4, Mat4) {
    const DEPTH_PADDING: f32 = 0.01;

    let view = Mat4::from_quat(rotation.inverse());
    let projection = match volume {
        Some(volume) => Mat4::orthographic_rh(
            volume.min.x,
            volume.max.x,
            volume.min.y,
            volume.max.y,
            -volume.max.z - DEPTH_PADDING,
            -volume.min.z + DEPTH_PADDING,
        ),
        None => Mat4::IDENTITY,
    };
    (view, projection)
}

/// Rotation-only view with depth squeezed into the back half of the range.
pub fn sky_camera(camera: &CameraData) -> CameraData {
    let mut view = camera.view;
    view.w_axis = Vec4::W;
    let depth_range = Mat4::from_cols(
        Vec4::X,
        Vec4::Y,
        Vec4::new(0.0, 0.0, 0.5, 0.0),
        Vec4::new(0.0, 0.0, 0.5, 1.0),
    );
    CameraData {
        view,
        projection: depth_range * camera.projection,
        position: Vec3::ZERO,
        enable_pixel_shader: true,
    }
}

struct ShadowLightPass {
    depth_view: Arc<ResourceView>,
    viewport: Viewport,
    rotation: Quat,
    volume: Option<Aabb>,
    camera: CameraData,
}

/// Borrows a slice for the light if needed and fits its camera to `focus`.
/// Returns `None` when the light gets no shadow this frame.
fn prepare_shadow_light(
    ctx: &mut FrameContext<'_>,
    entity: Entity,
    focus: &[BoundingSphere],
) -> RenderResult<Option<ShadowLightPass>> {
    let world = &ctx.scene.world;
    let rotation = world
        .get::<&WorldTransform>(entity)
        .map(|transform| transform.0.rotation)
        .unwrap_or(Quat::IDENTITY);
    let Ok(mut light) = world.get::<&mut DirectionalLight>(entity) else {
        return Ok(None);
    };

    if light.shadow_data.is_none() {
        match ctx.resources.shadow_maps.borrow_texture() {
            Ok(slice) => light.shadow_data = Some(ShadowData::new(ShadowMap::ArraySlice(slice))),
            Err(RenderError::PoolExhausted) => {
                log::warn!("No free shadow map for light {:?}; disabling its shadows", entity);
                light.shadows_enabled = false;
                return Ok(None);
            }
            Err(err) => return Err(err),
        }
    }
    let Some(shadow_data) = light.shadow_data.as_mut() else {
        return Ok(None);
    };
    let ShadowMap::ArraySlice(slice) = &mut shadow_data.shadow_map else {
        return Err(RenderError::configuration(
            "Directional lights only support texture array shadow maps.",
        ));
    };
    let depth_view = slice.load(&mut *ctx.device)?;
    let viewport = slice.viewport();

    let volume = Aabb::from_spheres_in_space(focus, rotation);
    let (view, projection) = light_view_projection(rotation, volume.as_ref());
    shadow_data.world_view_proj = projection * view;
    shadow_data.caster_volume = volume;

    Ok(Some(ShadowLightPass {
        depth_view,
        viewport,
        rotation,
        volume,
        camera: CameraData {
            view,
            projection,
            position: Vec3::ZERO,
            enable_pixel_shader: false,
        },
    }))
}

fn render_shadow_maps(ctx: &mut FrameContext<'_>, _camera: &CameraData) -> RenderResult<()> {
    if !ctx.entity_renderer.features().shadows_enabled {
        return Ok(());
    }
    let light_entities: Vec<Entity> = ctx
        .scene
        .world
        .query::<&DirectionalLight>()
        .iter()
        .filter(|(_, light)| light.shadows_enabled)
        .map(|(entity, _)| entity)
        .collect();
    if light_entities.is_empty() {
        return Ok(());
    }

    let world = &ctx.scene.world;
    let casters: Vec<SortEntry> = sort_candidates(world)
        .into_iter()
        .filter(|entry| {
            !is_blended(world, entry.entity)
                && world
                    .get::<&RenderableComponent>(entry.entity)
                    .is_ok_and(|renderable| renderable.cast_shadow)
        })
        .collect();
    let visible: HashSet<Entity> = ctx.visible.iter().map(|entry| entry.entity).collect();
    let focus: Vec<BoundingSphere> = casters
        .iter()
        .filter(|entry| visible.contains(&entry.entity))
        .map(|entry| entry.bounds)
        .collect();

    for entity in light_entities {
        let Some(pass) = prepare_shadow_light(ctx, entity, &focus)? else {
            continue;
        };
        ctx.device.set_render_targets(&[], Some(&pass.depth_view));
        ctx.device.set_viewport(pass.viewport);
        ctx.device.clear_depth_stencil(
            &pass.depth_view,
            ClearFlags::DEPTH | ClearFlags::STENCIL,
            1.0,
            0,
        );
        let Some(volume) = pass.volume else {
            continue;
        };

        ctx.stats.shadow_passes += 1;
        let to_light = pass.rotation.inverse();
        for caster in &casters {
            let local = BoundingSphere::new(to_light * caster.bounds.center, caster.bounds.radius);
            if !volume.intersects_sphere(&local) {
                continue;
            }
            ctx.entity_renderer.render_entity(
                &mut *ctx.device,
                &ctx.scene.world,
                caster.entity,
                &pass.camera,
                RenderPassBlendMode::Opaque,
                &NoLights,
            )?;
        }
    }

    ctx.lights = collect_scene_lights(&ctx.scene.world)?;
    Ok(())
}

fn clear_gbuffer(ctx: &mut FrameContext<'_>, _camera: &CameraData) -> RenderResult<()> {
    let quad = ctx
        .resources
        .clear_gbuffer
        .as_mut()
        .ok_or(RenderError::DeviceUnavailable("G-buffer clear quad was not created"))?;
    ctx.entity_renderer.render_renderable(
        &mut *ctx.device,
        quad,
        Mat4::IDENTITY,
        &CameraData::IDENTITY,
        RenderPassBlendMode::Opaque,
        &NoLights,
    )?;
    Ok(())
}

fn render_opaque(ctx: &mut FrameContext<'_>, camera: &CameraData) -> RenderResult<()> {
    for entry in ctx.visible.iter() {
        if is_blended(&ctx.scene.world, entry.entity) {
            continue;
        }
        let drawn = ctx.entity_renderer.render_entity(
            &mut *ctx.device,
            &ctx.scene.world,
            entry.entity,
            camera,
            RenderPassBlendMode::Opaque,
            &NoLights,
        )?;
        if drawn {
            ctx.stats.opaque_entities += 1;
        }
    }
    Ok(())
}

/// One full-screen draw per batch of lights. Only the first batch adds the
/// emissive term. A scene without lights still gets one empty batch.
fn accumulate_lights(ctx: &mut FrameContext<'_>, camera: &CameraData) -> RenderResult<()> {
    let material = Arc::clone(&ctx.resources.deferred_light_material);
    let ibl_available = ctx.entity_renderer.light_data().environment.is_complete();
    {
        let mut material = material
            .write()
            .map_err(|_| RenderError::usage("deferred light material lock poisoned"))?;
        if material.ibl_enabled != ibl_available {
            material.ibl_enabled = ibl_available;
        }
    }

    let quad = ctx
        .resources
        .deferred_light
        .as_mut()
        .ok_or(RenderError::DeviceUnavailable("deferred light quad was not created"))?;

    let batches: Vec<&[SceneLight]> = if ctx.lights.is_empty() {
        vec![&ctx.lights[..]]
    } else {
        light_batches(&ctx.lights).collect()
    };
    for (index, batch) in batches.into_iter().enumerate() {
        material
            .write()
            .map_err(|_| RenderError::usage("deferred light material lock poisoned"))?
            .set_emitted(index == 0);
        ctx.entity_renderer.render_renderable(
            &mut *ctx.device,
            quad,
            Mat4::IDENTITY,
            camera,
            RenderPassBlendMode::Additive,
            &LightBatchProvider::new(batch),
        )?;
        ctx.stats.light_batches += 1;
    }
    Ok(())
}

fn render_transparent(ctx: &mut FrameContext<'_>, camera: &CameraData) -> RenderResult<()> {
    let sorted: Vec<Entity> = ctx
        .alpha_sorter
        .wait_then(|sorted| sorted.iter().map(|entry| entry.entity).collect())?;
    let lights = SimpleLightProvider::new(&ctx.lights);
    for entity in sorted {
        if !is_blended(&ctx.scene.world, entity) {
            continue;
        }
        let drawn = ctx.entity_renderer.render_entity(
            &mut *ctx.device,
            &ctx.scene.world,
            entity,
            camera,
            RenderPassBlendMode::BlendedAlpha,
            &lights,
        )?;
        if drawn {
            ctx.stats.alpha_entities += 1;
        }
    }
    Ok(())
}

fn render_debug_shapes(ctx: &mut FrameContext<'_>, camera: &CameraData) -> RenderResult<()> {
    ctx.scene
        .render_debug_shapes(&mut *ctx.device, &mut *ctx.entity_renderer, camera)
}

fn render_sky(ctx: &mut FrameContext<'_>, camera: &CameraData) -> RenderResult<()> {
    let Some(texture) = ctx.scene.sky_texture().cloned() else {
        return Ok(());
    };
    {
        let mut material = ctx
            .resources
            .sky_material
            .write()
            .map_err(|_| RenderError::usage("sky material lock poisoned"))?;
        let current = material
            .cube_map()
            .is_some_and(|cube_map| Arc::ptr_eq(cube_map, &texture));
        if !current {
            material.set_cube_map(Some(texture));
        }
    }

    let sky = ctx
        .resources
        .sky
        .as_mut()
        .ok_or(RenderError::DeviceUnavailable("sky sphere was not created"))?;
    ctx.entity_renderer.render_renderable(
        &mut *ctx.device,
        sky,
        Mat4::IDENTITY,
        &sky_camera(camera),
        RenderPassBlendMode::Opaque,
        &NoLights,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::HeadlessDevice;
    use crate::renderer::material::{PbrMaterial, PbrTexture};
    use crate::scene::components::CameraComponent;
    use crate::scene::Transform;

    fn ready_manager(device: &mut HeadlessDevice) -> RenderStepManager {
        let mut manager = RenderStepManager::new(&RenderSettings::default());
        manager.create_device_dependent_resources(device).unwrap();
        manager.create_window_size_dependent_resources(device, 64, 32).unwrap();
        manager
    }

    #[test]
    fn steps_follow_the_pass_table() {
        let manager = RenderStepManager::new(&RenderSettings::default());
        let kinds: Vec<_> = manager.steps().iter().map(RenderStep::kind).collect();
        assert_eq!(kinds, RenderStepKind::ALL.to_vec());

        let shadow = manager.steps()[0].passes()[0].config();
        assert_eq!(shadow.stencil_ref, 1);
        assert_eq!(
            shadow.stencil_mode,
            StencilMode::Enabled {
                read_mask: 0xFF,
                write_mask: 0xFF
            }
        );

        let deferred = manager.steps()[1].passes();
        assert_eq!(deferred.len(), 3);
        assert_eq!(deferred[2].blend_mode(), RenderPassBlendMode::Additive);
        assert_eq!(deferred[2].config().destination, DrawDestination::Final);
        assert_eq!(manager.steps()[3].passes()[0].config().depth_mode, DepthMode::WriteOnly);
    }

    #[test]
    fn lifecycle_pairs_are_enforced() {
        let mut device = HeadlessDevice::new();
        let mut manager = RenderStepManager::new(&RenderSettings::default());
        let world = World::new();

        assert!(manager.create_window_size_dependent_resources(&mut device, 8, 8).is_err());
        assert!(manager.destroy_device_dependent_resources(&mut device, &world).is_err());

        manager.create_device_dependent_resources(&mut device).unwrap();
        assert!(matches!(
            manager.create_device_dependent_resources(&mut device),
            Err(RenderError::Usage(_))
        ));
        manager.create_window_size_dependent_resources(&mut device, 8, 8).unwrap();
        assert!(manager.steps()[1].passes()[0].render_targets().len() == MAX_RENDER_TARGET_VIEWS);
        assert!(manager.steps()[2].passes()[0].render_targets().len() == 1);
        assert!(manager.steps()[0].passes()[0].render_targets().is_empty());

        manager.destroy_device_dependent_resources(&mut device, &world).unwrap();
        assert!(manager.screen_viewport().is_none());
        assert_eq!(device.live_texture_count(), 0);
        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn device_recreation_reloads_material_textures() {
        let mut device = HeadlessDevice::new();
        let mut manager = ready_manager(&mut device);
        let mut scene = Scene::new();
        scene.spawn_camera(
            Transform::looking_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y),
            CameraComponent::default(),
        );
        let albedo = Arc::new(Texture::solid_color("albedo", [200, 120, 40, 255]));
        let mut material = PbrMaterial::new(Vec4::ONE);
        material.set_texture(PbrTexture::BaseColor, Some(Arc::clone(&albedo)));
        scene.spawn_renderable(
            "Textured",
            Transform::default(),
            Arc::new(primitives::cube(Vec3::ONE)),
            shared(material),
        );
        let sky = Arc::new(Texture::cube("sky", 4));
        scene.set_sky_texture(Some(Arc::clone(&sky)));

        manager.render(&mut device, &mut scene).unwrap();
        assert!(albedo.is_loaded());
        assert!(sky.is_loaded());

        manager
            .destroy_device_dependent_resources(&mut device, &scene.world)
            .unwrap();
        assert!(!albedo.is_loaded());
        assert!(!sky.is_loaded());
        assert_eq!(device.live_texture_count(), 0);

        let mut fresh = HeadlessDevice::new();
        manager.create_device_dependent_resources(&mut fresh).unwrap();
        manager.create_window_size_dependent_resources(&mut fresh, 64, 32).unwrap();
        manager.render(&mut fresh, &mut scene).unwrap();
        assert!(!manager.has_fatal_error());
        for (texture, label) in [(&albedo, "albedo"), (&sky, "sky")] {
            let view = texture.view().unwrap();
            assert_eq!(fresh.texture_desc(view.texture()).unwrap().label, label);
        }
    }

    #[test]
    fn resize_swaps_every_target() {
        let mut device = HeadlessDevice::new();
        let mut manager = ready_manager(&mut device);
        let before = manager.steps()[2].passes()[0].render_targets()[0].clone();

        manager.resize(&mut device, 128, 64).unwrap();
        let after = manager.steps()[2].passes()[0].render_targets()[0].clone();
        assert_ne!(before.unwrap().id(), after.unwrap().id());
        assert_eq!(manager.screen_viewport().unwrap().width, 128.0);
    }

    #[test]
    fn frames_without_a_camera_are_skipped() {
        let mut device = HeadlessDevice::new();
        let mut manager = ready_manager(&mut device);
        let mut scene = Scene::new();
        manager.render(&mut device, &mut scene).unwrap();
        assert_eq!(manager.frame_count(), 0);
        assert!(device.draws().is_empty());
    }

    #[test]
    fn sky_depth_lands_in_the_back_half() {
        let projection = Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0);
        let camera = CameraData::look_at(Vec3::new(5.0, 0.0, 0.0), Vec3::NEG_Z, Vec3::Y, projection);
        let sky = sky_camera(&camera);
        assert_eq!(sky.view.w_axis, Vec4::W);

        for z in [-0.2f32, -1.0, -50.0] {
            let clip = sky.projection * Vec4::new(0.0, 0.0, z, 1.0);
            let depth = clip.z / clip.w;
            assert!((0.5..=1.0).contains(&depth), "depth {depth} for z {z}");
        }
    }

    #[test]
    fn light_camera_encloses_the_volume() {
        let rotation = Quat::from_rotation_x(-std::f32::consts::FRAC_PI_3);
        let spheres = [
            BoundingSphere::new(Vec3::new(2.0, 0.0, 1.0), 1.0),
            BoundingSphere::new(Vec3::new(-3.0, 1.0, -2.0), 0.5),
        ];
        let volume = Aabb::from_spheres_in_space(&spheres, rotation).unwrap();
        let (view, projection) = light_view_projection(rotation, Some(&volume));
        let view_proj = projection * view;

        for sphere in &spheres {
            let ndc = view_proj.project_point3(sphere.center);
            assert!(ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0);
            assert!((0.0..=1.0).contains(&ndc.z));
        }
    }
}
