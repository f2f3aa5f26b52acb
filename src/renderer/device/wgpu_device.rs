// renderer/device/wgpu_device.rs
//
// `RenderDevice` on top of wgpu. Immediate-mode state calls are recorded into
// a list of clear and draw operations that `submit` replays into one command
// encoder. Render pipelines are derived lazily from the bound state.

use std::collections::HashMap;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::error::{RenderError, RenderResult};
use crate::renderer::texture::{AddressMode, FilterMode, SamplerDescriptor};
use crate::renderer::vertex::{ElementComponent, ElementType, VertexAttributeElement};

use super::shader_library::{reflect_bindings, BindingKind, ShaderBinding, ShaderLibrary};
use super::{
    BlendState, BlendStateId, BufferDesc, BufferId, BufferKind, ClearFlags, CompareFunction,
    DepthStencilDesc, DepthStencilStateId, IndexBufferBinding, IndexFormat, PixelProgram,
    PrimitiveTopology, ProgramId, RenderDevice, ResourceView, SamplerId, ShaderCompileSettings,
    ShaderStage, StencilFaceDesc, StencilOp, TextureDesc, TextureFormat,
    TextureId, VertexBufferBinding, VertexProgram, ViewDesc, ViewDimension, ViewId, Viewport,
};

const BIND_GROUP_COUNT: usize = 4;
const VERTEX_CONSTANTS_GROUP: u32 = 0;
const PIXEL_CONSTANTS_GROUP: u32 = 1;
/// Zeroed uniform data bound where a shader declares constants nobody set.
/// Large enough for the bone palette.
const FALLBACK_UNIFORM_SIZE: u64 = 8192;

struct TextureEntry {
    texture: wgpu::Texture,
    desc: TextureDesc,
}

struct ViewEntry {
    texture: TextureId,
    /// Used as a render target or depth attachment.
    attachment: wgpu::TextureView,
    /// Used for shader reads; depth-only for depth formats.
    sampled: wgpu::TextureView,
}

enum BufferEntry {
    Gpu(wgpu::Buffer),
    /// Constant buffers keep a CPU copy; every draw uploads a snapshot.
    Constant(Vec<u8>),
}

struct ShaderProgram {
    module: wgpu::ShaderModule,
    entry_point: String,
    bindings: Vec<ShaderBinding>,
    inputs: Vec<VertexAttributeElement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    vertex: ProgramId,
    pixel: Option<ProgramId>,
    blend: BlendState,
    depth_stencil: Option<DepthStencilDesc>,
    color_formats: Vec<Option<TextureFormat>>,
    depth_format: Option<TextureFormat>,
    topology: PrimitiveTopology,
    strip_index_format: Option<IndexFormat>,
    strides: Vec<u32>,
}

struct CachedPipeline {
    pipeline: wgpu::RenderPipeline,
    layouts: Vec<wgpu::BindGroupLayout>,
    bindings: Vec<ShaderBinding>,
    writes_depth: bool,
    writes_stencil: bool,
}

#[derive(Default)]
struct BoundState {
    vertex_program: Option<ProgramId>,
    pixel_program: Option<ProgramId>,
    vertex_constants: Vec<Option<BufferId>>,
    pixel_constants: Vec<Option<BufferId>>,
    shader_resources: Vec<Option<Arc<ResourceView>>>,
    samplers: Vec<Option<SamplerId>>,
    render_targets: Vec<Option<Arc<ResourceView>>>,
    depth_target: Option<Arc<ResourceView>>,
    viewport: Option<Viewport>,
    blend_state: Option<BlendStateId>,
    depth_stencil: Option<DepthStencilStateId>,
    stencil_ref: u32,
    topology: Option<PrimitiveTopology>,
    vertex_buffers: Vec<VertexBufferBinding>,
    index_buffer: Option<IndexBufferBinding>,
}

struct RecordedDraw {
    pipeline: Arc<CachedPipeline>,
    bind_groups: Vec<wgpu::BindGroup>,
    vertex_buffers: Vec<(wgpu::Buffer, u64)>,
    index_buffer: Option<(wgpu::Buffer, wgpu::IndexFormat, u64)>,
    viewport: Option<Viewport>,
    stencil_ref: u32,
    count: u32,
}

enum RecordedOp {
    ClearColor {
        view: ViewId,
        color: [f32; 4],
    },
    ClearDepthStencil {
        view: ViewId,
        has_stencil: bool,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    },
    Pass {
        label: String,
        colors: Vec<Option<ViewId>>,
        depth: Option<(ViewId, bool)>,
        draws: Vec<RecordedDraw>,
    },
}

/// Fallback bindings for declarations the bound state leaves empty.
struct Fallbacks {
    views: HashMap<(ViewDimension, bool), wgpu::TextureView>,
    sampler: wgpu::Sampler,
    comparison_sampler: wgpu::Sampler,
    uniform: wgpu::Buffer,
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    shaders: ShaderLibrary,
    next_id: u64,
    textures: HashMap<TextureId, TextureEntry>,
    views: HashMap<ViewId, ViewEntry>,
    buffers: HashMap<BufferId, BufferEntry>,
    samplers: HashMap<SamplerId, (wgpu::Sampler, bool)>,
    blend_states: HashMap<BlendStateId, BlendState>,
    depth_stencil_states: HashMap<DepthStencilStateId, DepthStencilDesc>,
    programs: HashMap<ProgramId, ShaderProgram>,
    pipelines: HashMap<PipelineKey, Arc<CachedPipeline>>,
    fallbacks: Fallbacks,
    event_stack: Vec<String>,
    bound: BoundState,
    ops: Vec<RecordedOp>,
}

impl WgpuDevice {
    /// Creates a device without a surface, for offscreen rendering.
    pub fn new_headless(shaders: ShaderLibrary) -> RenderResult<Self> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .map_err(|_| RenderError::DeviceUnavailable("no compatible graphics adapter"))?;
            log::info!("Using adapter {}", adapter.get_info().name);

            let (device, queue) = adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("Render Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    experimental_features: wgpu::ExperimentalFeatures::disabled(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    trace: wgpu::Trace::Off,
                })
                .await
                .map_err(|_| RenderError::DeviceUnavailable("device request failed"))?;
            Ok::<_, RenderError>(Self::from_parts(device, queue, shaders))
        })
    }

    /// Wraps a device created by the application, e.g. one tied to a window.
    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue, shaders: ShaderLibrary) -> Self {
        let fallbacks = Fallbacks::new(&device);
        Self {
            device,
            queue,
            shaders,
            next_id: 0,
            textures: HashMap::new(),
            views: HashMap::new(),
            buffers: HashMap::new(),
            samplers: HashMap::new(),
            blend_states: HashMap::new(),
            depth_stencil_states: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            fallbacks,
            event_stack: Vec::new(),
            bound: BoundState::default(),
            ops: Vec::new(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn shaders_mut(&mut self) -> &mut ShaderLibrary {
        &mut self.shaders
    }

    pub fn texture(&self, texture: TextureId) -> Option<&wgpu::Texture> {
        self.textures.get(&texture).map(|entry| &entry.texture)
    }

    /// The attachment view behind `view`, e.g. for presenting the final target.
    pub fn texture_view(&self, view: &ResourceView) -> Option<&wgpu::TextureView> {
        self.views.get(&view.id()).map(|entry| &entry.attachment)
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn capture_errors<T>(&self, create: impl FnOnce(&wgpu::Device) -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        let error = pollster::block_on(self.device.pop_error_scope());
        (value, error)
    }

    fn compile(&mut self, settings: &ShaderCompileSettings, inputs: &[VertexAttributeElement]) -> RenderResult<ProgramId> {
        let source = self.shaders.preprocess(settings)?;
        let bindings = reflect_bindings(&source).map_err(|err| match err {
            RenderError::ShaderCompilation { message, .. } => RenderError::ShaderCompilation {
                file: settings.filename.clone(),
                message,
            },
            other => other,
        })?;

        let label = settings.filename.clone();
        let (module, error) = self.capture_errors(|device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label.as_str()),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        });
        if let Some(error) = error {
            return Err(RenderError::ShaderCompilation {
                file: settings.filename.clone(),
                message: error.to_string(),
            });
        }

        let id = ProgramId(self.next_id());
        self.programs.insert(
            id,
            ShaderProgram {
                module,
                entry_point: settings.entry_point.clone(),
                bindings,
                inputs: inputs.to_vec(),
            },
        );
        log::debug!("Compiled {} ({} defines)", settings.filename, settings.defines.len());
        Ok(id)
    }

    fn pipeline_key(&self, vertex: ProgramId) -> PipelineKey {
        let format = |view: &Arc<ResourceView>| view.desc().format;
        PipelineKey {
            vertex,
            pixel: self.bound.pixel_program,
            blend: self
                .bound
                .blend_state
                .and_then(|id| self.blend_states.get(&id).copied())
                .unwrap_or(BlendState::Opaque),
            depth_stencil: self
                .bound
                .depth_stencil
                .and_then(|id| self.depth_stencil_states.get(&id).copied()),
            color_formats: self
                .bound
                .render_targets
                .iter()
                .map(|view| view.as_ref().map(format))
                .collect(),
            depth_format: self.bound.depth_target.as_ref().map(format),
            topology: self.bound.topology.unwrap_or(PrimitiveTopology::TriangleList),
            strip_index_format: match self.bound.topology {
                Some(PrimitiveTopology::TriangleStrip) => {
                    self.bound.index_buffer.map(|binding| binding.format)
                }
                _ => None,
            },
            strides: self.bound.vertex_buffers.iter().map(|binding| binding.stride).collect(),
        }
    }

    fn pipeline(&mut self, key: &PipelineKey) -> RenderResult<Arc<CachedPipeline>> {
        if let Some(pipeline) = self.pipelines.get(key) {
            return Ok(Arc::clone(pipeline));
        }
        let pipeline = Arc::new(self.create_pipeline(key)?);
        self.pipelines.insert(key.clone(), Arc::clone(&pipeline));
        log::debug!("Created render pipeline #{}", self.pipelines.len());
        Ok(pipeline)
    }

    fn create_pipeline(&self, key: &PipelineKey) -> RenderResult<CachedPipeline> {
        let vertex = self
            .programs
            .get(&key.vertex)
            .ok_or_else(|| RenderError::usage("draw with a destroyed vertex program"))?;
        let pixel = match key.pixel {
            Some(id) => Some(
                self.programs
                    .get(&id)
                    .ok_or_else(|| RenderError::usage("draw with a destroyed pixel program"))?,
            ),
            None => None,
        };
        if vertex.inputs.len() != key.strides.len() {
            return Err(RenderError::usage(format!(
                "vertex program expects {} vertex buffers, {} are bound",
                vertex.inputs.len(),
                key.strides.len()
            )));
        }

        let mut bindings = vertex.bindings.clone();
        for binding in pixel.iter().flat_map(|program| &program.bindings) {
            if !bindings.iter().any(|b| b.group == binding.group && b.binding == binding.binding) {
                bindings.push(*binding);
            }
        }
        bindings.sort_by_key(|binding| (binding.group, binding.binding));

        let layouts: Vec<wgpu::BindGroupLayout> = (0..BIND_GROUP_COUNT as u32)
            .map(|group| {
                let entries: Vec<_> = bindings
                    .iter()
                    .filter(|binding| binding.group == group)
                    .map(layout_entry)
                    .collect();
                self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Material Bind Group Layout"),
                    entries: &entries,
                })
            })
            .collect();
        let layout_refs: Vec<&wgpu::BindGroupLayout> = layouts.iter().collect();
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Material Pipeline Layout"),
            bind_group_layouts: &layout_refs,
            push_constant_ranges: &[],
        });

        let attributes = vertex
            .inputs
            .iter()
            .enumerate()
            .map(|(location, input)| {
                Ok([wgpu::VertexAttribute {
                    format: vertex_format(input)?,
                    offset: 0,
                    shader_location: location as u32,
                }])
            })
            .collect::<RenderResult<Vec<_>>>()?;
        let vertex_layouts: Vec<wgpu::VertexBufferLayout> = attributes
            .iter()
            .zip(&key.strides)
            .map(|(attribute, stride)| wgpu::VertexBufferLayout {
                array_stride: *stride as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: attribute,
            })
            .collect();

        let blend = blend_state(key.blend);
        let targets: Vec<Option<wgpu::ColorTargetState>> = key
            .color_formats
            .iter()
            .map(|format| {
                format.map(|format| wgpu::ColorTargetState {
                    format: texture_format(format),
                    blend: Some(blend),
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let depth_stencil = key.depth_format.map(|format| {
            depth_stencil_state(format, &key.depth_stencil.unwrap_or_else(default_depth_stencil))
        });
        let writes_depth = depth_stencil.as_ref().is_some_and(|state| state.depth_write_enabled);
        let writes_stencil = depth_stencil.as_ref().is_some_and(|state| state.stencil.is_enabled() && state.stencil.write_mask != 0);

        let (pipeline, error) = self.capture_errors(|device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Material Pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex.module,
                    entry_point: Some(vertex.entry_point.as_str()),
                    buffers: &vertex_layouts,
                    compilation_options: Default::default(),
                },
                fragment: pixel.map(|pixel| wgpu::FragmentState {
                    module: &pixel.module,
                    entry_point: Some(pixel.entry_point.as_str()),
                    targets: &targets,
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: primitive_topology(key.topology),
                    strip_index_format: key.strip_index_format.map(index_format),
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        });
        if let Some(error) = error {
            return Err(RenderError::ResourceCreation(format!("render pipeline: {error}")));
        }

        Ok(CachedPipeline {
            pipeline,
            layouts,
            bindings,
            writes_depth,
            writes_stencil,
        })
    }

    fn constant_snapshot(&self, slots: &[Option<BufferId>], slot: u32) -> Option<wgpu::Buffer> {
        let buffer = slots.get(slot as usize).copied().flatten()?;
        let BufferEntry::Constant(data) = self.buffers.get(&buffer)? else {
            return None;
        };
        let mut contents = data.clone();
        let padded = contents.len().max(16).next_multiple_of(16);
        contents.resize(padded, 0);
        Some(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Constant Snapshot"),
            contents: &contents,
            usage: wgpu::BufferUsages::UNIFORM,
        }))
    }

    fn bound_view(&self, slot: u32, dimension: ViewDimension, depth: bool) -> &wgpu::TextureView {
        let bound = self
            .bound
            .shader_resources
            .get(slot as usize)
            .and_then(Option::as_ref)
            .filter(|view| view.desc().dimension == dimension && view.desc().format.is_depth() == depth)
            .and_then(|view| self.views.get(&view.id()));
        match bound {
            Some(entry) => &entry.sampled,
            None => {
                log::trace!("Texture slot {slot} falls back to a dummy view");
                self.fallbacks.view(dimension, depth)
            }
        }
    }

    fn bound_sampler(&self, slot: u32, comparison: bool) -> &wgpu::Sampler {
        self.bound
            .samplers
            .get(slot as usize)
            .copied()
            .flatten()
            .and_then(|id| self.samplers.get(&id))
            .filter(|(_, compare)| *compare == comparison)
            .map(|(sampler, _)| sampler)
            .unwrap_or(if comparison {
                &self.fallbacks.comparison_sampler
            } else {
                &self.fallbacks.sampler
            })
    }

    fn bind_groups(&self, pipeline: &CachedPipeline) -> Vec<wgpu::BindGroup> {
        // Uniform snapshots must outlive the entries that borrow them.
        let snapshots: Vec<Option<wgpu::Buffer>> = pipeline
            .bindings
            .iter()
            .map(|binding| match (binding.kind, binding.group) {
                (BindingKind::Uniform, VERTEX_CONSTANTS_GROUP) => {
                    self.constant_snapshot(&self.bound.vertex_constants, binding.binding)
                }
                (BindingKind::Uniform, PIXEL_CONSTANTS_GROUP) => {
                    self.constant_snapshot(&self.bound.pixel_constants, binding.binding)
                }
                _ => None,
            })
            .collect();

        pipeline
            .layouts
            .iter()
            .enumerate()
            .map(|(group, layout)| {
                let entries: Vec<wgpu::BindGroupEntry> = pipeline
                    .bindings
                    .iter()
                    .zip(&snapshots)
                    .filter(|(binding, _)| binding.group == group as u32)
                    .map(|(binding, snapshot)| wgpu::BindGroupEntry {
                        binding: binding.binding,
                        resource: match binding.kind {
                            BindingKind::Uniform => snapshot
                                .as_ref()
                                .unwrap_or(&self.fallbacks.uniform)
                                .as_entire_binding(),
                            BindingKind::Texture { dimension, depth } => {
                                wgpu::BindingResource::TextureView(self.bound_view(binding.binding, dimension, depth))
                            }
                            BindingKind::Sampler { comparison } => {
                                wgpu::BindingResource::Sampler(self.bound_sampler(binding.binding, comparison))
                            }
                        },
                    })
                    .collect();
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Material Bind Group"),
                    layout,
                    entries: &entries,
                })
            })
            .collect()
    }

    fn gpu_buffer(&self, buffer: BufferId) -> RenderResult<wgpu::Buffer> {
        match self.buffers.get(&buffer) {
            Some(BufferEntry::Gpu(buffer)) => Ok(buffer.clone()),
            Some(BufferEntry::Constant(_)) => Err(RenderError::usage("constant buffer bound as geometry")),
            None => Err(RenderError::usage("draw with a destroyed buffer")),
        }
    }

    fn record_draw(&mut self, indexed: bool, count: u32) -> RenderResult<()> {
        let vertex = self
            .bound
            .vertex_program
            .ok_or_else(|| RenderError::usage("draw issued without a vertex program"))?;
        if self.bound.vertex_buffers.is_empty() {
            return Err(RenderError::usage("draw issued without vertex buffers"));
        }
        if indexed && self.bound.index_buffer.is_none() {
            return Err(RenderError::usage("indexed draw issued without an index buffer"));
        }

        let key = self.pipeline_key(vertex);
        let pipeline = self.pipeline(&key)?;
        let bind_groups = self.bind_groups(&pipeline);
        let vertex_buffers = self
            .bound
            .vertex_buffers
            .iter()
            .map(|binding| Ok((self.gpu_buffer(binding.buffer)?, binding.offset as u64)))
            .collect::<RenderResult<Vec<_>>>()?;
        let index_buffer = match self.bound.index_buffer.filter(|_| indexed) {
            Some(binding) => Some((
                self.gpu_buffer(binding.buffer)?,
                index_format(binding.format),
                binding.offset as u64,
            )),
            None => None,
        };

        let draw = RecordedDraw {
            pipeline,
            bind_groups,
            vertex_buffers,
            index_buffer,
            viewport: self.bound.viewport,
            stencil_ref: self.bound.stencil_ref,
            count,
        };

        let colors: Vec<Option<ViewId>> = self
            .bound
            .render_targets
            .iter()
            .map(|view| view.as_ref().map(|view| view.id()))
            .collect();
        let depth = self
            .bound
            .depth_target
            .as_ref()
            .map(|view| (view.id(), view.desc().format.has_stencil()));
        let same_targets = matches!(
            self.ops.last(),
            Some(RecordedOp::Pass { colors: pass_colors, depth: pass_depth, .. })
                if *pass_colors == colors && *pass_depth == depth
        );
        match self.ops.last_mut() {
            Some(RecordedOp::Pass { draws, .. }) if same_targets => draws.push(draw),
            _ => {
                let label = self.event_stack.last().cloned().unwrap_or_else(|| "Draw".to_string());
                self.ops.push(RecordedOp::Pass {
                    label,
                    colors,
                    depth,
                    draws: vec![draw],
                });
            }
        }
        Ok(())
    }

    fn attachment(&self, view: ViewId) -> RenderResult<&wgpu::TextureView> {
        self.views
            .get(&view)
            .map(|entry| &entry.attachment)
            .ok_or_else(|| RenderError::usage("render target view was destroyed before submit"))
    }

    fn encode(&self, encoder: &mut wgpu::CommandEncoder, op: &RecordedOp) -> RenderResult<()> {
        match op {
            RecordedOp::ClearColor { view, color } => {
                let [r, g, b, a] = color.map(f64::from);
                encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Clear Render Target"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: self.attachment(*view)?,
                        resolve_target: None,
                        depth_slice: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
            }
            RecordedOp::ClearDepthStencil {
                view,
                has_stencil,
                flags,
                depth,
                stencil,
            } => {
                let depth_load = if flags.contains(ClearFlags::DEPTH) {
                    wgpu::LoadOp::Clear(*depth)
                } else {
                    wgpu::LoadOp::Load
                };
                let stencil_load = if flags.contains(ClearFlags::STENCIL) {
                    wgpu::LoadOp::Clear(u32::from(*stencil))
                } else {
                    wgpu::LoadOp::Load
                };
                encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Clear Depth Stencil"),
                    color_attachments: &[],
                    depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                        view: self.attachment(*view)?,
                        depth_ops: Some(wgpu::Operations {
                            load: depth_load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: has_stencil.then_some(wgpu::Operations {
                            load: stencil_load,
                            store: wgpu::StoreOp::Store,
                        }),
                    }),
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
            }
            RecordedOp::Pass {
                label,
                colors,
                depth,
                draws,
            } => {
                let color_attachments = colors
                    .iter()
                    .map(|view| {
                        view.map(|view| {
                            Ok::<_, RenderError>(wgpu::RenderPassColorAttachment {
                                view: self.attachment(view)?,
                                resolve_target: None,
                                depth_slice: None,
                                ops: wgpu::Operations {
                                    load: wgpu::LoadOp::Load,
                                    store: wgpu::StoreOp::Store,
                                },
                            })
                        })
                        .transpose()
                    })
                    .collect::<RenderResult<Vec<_>>>()?;
                let writes_depth = draws.iter().any(|draw| draw.pipeline.writes_depth);
                let writes_stencil = draws.iter().any(|draw| draw.pipeline.writes_stencil);
                let depth_stencil_attachment = match depth {
                    Some((view, has_stencil)) => {
                        let (depth_ops, stencil_ops) =
                            preserved_depth_stencil_ops(writes_depth, *has_stencil && writes_stencil);
                        Some(wgpu::RenderPassDepthStencilAttachment {
                            view: self.attachment(*view)?,
                            depth_ops,
                            stencil_ops,
                        })
                    }
                    None => None,
                };

                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some(label.as_str()),
                    color_attachments: &color_attachments,
                    depth_stencil_attachment,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                for draw in draws {
                    pass.set_pipeline(&draw.pipeline.pipeline);
                    if let Some(viewport) = draw.viewport {
                        pass.set_viewport(
                            viewport.x,
                            viewport.y,
                            viewport.width,
                            viewport.height,
                            viewport.min_depth,
                            viewport.max_depth,
                        );
                    }
                    pass.set_stencil_reference(draw.stencil_ref);
                    for (group, bind_group) in draw.bind_groups.iter().enumerate() {
                        pass.set_bind_group(group as u32, bind_group, &[]);
                    }
                    for (slot, (buffer, offset)) in draw.vertex_buffers.iter().enumerate() {
                        pass.set_vertex_buffer(slot as u32, buffer.slice(*offset..));
                    }
                    match &draw.index_buffer {
                        Some((buffer, format, offset)) => {
                            pass.set_index_buffer(buffer.slice(*offset..), *format);
                            pass.draw_indexed(0..draw.count, 0, 0..1);
                        }
                        None => pass.draw(0..draw.count, 0..1),
                    }
                }
            }
        }
        Ok(())
    }
}

impl Fallbacks {
    fn new(device: &wgpu::Device) -> Self {
        let mut views = HashMap::new();
        for dimension in [ViewDimension::D2, ViewDimension::D2Array, ViewDimension::Cube] {
            for depth in [false, true] {
                if depth && dimension == ViewDimension::Cube {
                    continue;
                }
                let layers = if dimension == ViewDimension::Cube { 6 } else { 1 };
                let format = if depth {
                    wgpu::TextureFormat::Depth32Float
                } else {
                    wgpu::TextureFormat::Rgba8Unorm
                };
                // wgpu zero-initializes textures that are never written.
                let texture = device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("Fallback Texture"),
                    size: wgpu::Extent3d {
                        width: 1,
                        height: 1,
                        depth_or_array_layers: layers,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING,
                    view_formats: &[],
                });
                let view = texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("Fallback View"),
                    dimension: Some(view_dimension(dimension)),
                    ..Default::default()
                });
                views.insert((dimension, depth), view);
            }
        }

        Self {
            views,
            sampler: device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("Fallback Sampler"),
                ..Default::default()
            }),
            comparison_sampler: device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("Fallback Comparison Sampler"),
                compare: Some(wgpu::CompareFunction::LessEqual),
                ..Default::default()
            }),
            uniform: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Fallback Uniform"),
                size: FALLBACK_UNIFORM_SIZE,
                usage: wgpu::BufferUsages::UNIFORM,
                mapped_at_creation: false,
            }),
        }
    }

    fn view(&self, dimension: ViewDimension, depth: bool) -> &wgpu::TextureView {
        let depth = depth && dimension != ViewDimension::Cube;
        // Every key is populated in `new`, apart from depth cube maps.
        &self.views[&(dimension, depth)]
    }
}

fn align_to_copy(size: u64) -> u64 {
    size.max(wgpu::COPY_BUFFER_ALIGNMENT)
        .next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
}

/// Load-and-store operations for the aspects a pass writes. Aspects left as
/// `None` are attached read-only.
fn preserved_depth_stencil_ops(
    writes_depth: bool,
    writes_stencil: bool,
) -> (Option<wgpu::Operations<f32>>, Option<wgpu::Operations<u32>>) {
    let depth = writes_depth.then_some(wgpu::Operations {
        load: wgpu::LoadOp::Load,
        store: wgpu::StoreOp::Store,
    });
    let stencil = writes_stencil.then_some(wgpu::Operations {
        load: wgpu::LoadOp::Load,
        store: wgpu::StoreOp::Store,
    });
    (depth, stencil)
}

impl RenderDevice for WgpuDevice {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_texture(&mut self, desc: &TextureDesc, data: Option<&[u8]>) -> RenderResult<TextureId> {
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 {
            return Err(RenderError::ResourceCreation(format!(
                "texture {} has a zero dimension",
                desc.label
            )));
        }
        if data.is_some_and(|data| desc.format.is_depth() || data.len() != desc.byte_size()) {
            return Err(RenderError::ResourceCreation(format!(
                "texture {} initial data does not match its format",
                desc.label
            )));
        }
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        if desc.render_target || desc.format.is_depth() {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        let size = wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: desc.layers,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label.as_str()),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(desc.format),
            usage,
            view_formats: &[],
        });

        if let Some(data) = data {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(desc.width * desc.format.bytes_per_pixel()),
                    rows_per_image: Some(desc.height),
                },
                size,
            );
        }

        let id = TextureId(self.next_id());
        self.textures.insert(
            id,
            TextureEntry {
                texture,
                desc: desc.clone(),
            },
        );
        Ok(id)
    }

    fn create_view(&mut self, texture: TextureId, desc: &ViewDesc) -> RenderResult<Arc<ResourceView>> {
        let entry = self
            .textures
            .get(&texture)
            .ok_or_else(|| RenderError::ResourceCreation("view of unknown texture".to_string()))?;
        if desc.layer_count == 0 || desc.base_layer + desc.layer_count > entry.desc.layers {
            return Err(RenderError::ResourceCreation(format!(
                "view layers {}..{} out of range for {} layers",
                desc.base_layer,
                desc.base_layer + desc.layer_count,
                entry.desc.layers
            )));
        }

        let view = |aspect| {
            entry.texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some(entry.desc.label.as_str()),
                dimension: Some(view_dimension(desc.dimension)),
                aspect,
                base_array_layer: desc.base_layer,
                array_layer_count: Some(desc.layer_count),
                ..Default::default()
            })
        };
        let attachment = view(wgpu::TextureAspect::All);
        let sampled = if desc.format.is_depth() {
            view(wgpu::TextureAspect::DepthOnly)
        } else {
            attachment.clone()
        };

        let id = ViewId(self.next_id());
        self.views.insert(
            id,
            ViewEntry {
                texture,
                attachment,
                sampled,
            },
        );
        Ok(Arc::new(ResourceView::new(id, texture, *desc)))
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if let Some(entry) = self.textures.remove(&texture) {
            self.views.retain(|_, view| view.texture != texture);
            entry.texture.destroy();
        }
    }

    fn create_buffer(&mut self, desc: &BufferDesc<'_>, data: Option<&[u8]>) -> RenderResult<BufferId> {
        if data.is_some_and(|data| data.len() as u64 > desc.size) {
            return Err(RenderError::ResourceCreation(format!(
                "buffer {} initial data exceeds its size",
                desc.label
            )));
        }
        let entry = match desc.kind {
            BufferKind::Constant => {
                let mut contents = vec![0u8; desc.size as usize];
                if let Some(data) = data {
                    contents[..data.len()].copy_from_slice(data);
                }
                BufferEntry::Constant(contents)
            }
            BufferKind::Vertex | BufferKind::Index => {
                let usage = match desc.kind {
                    BufferKind::Index => wgpu::BufferUsages::INDEX,
                    _ => wgpu::BufferUsages::VERTEX,
                } | wgpu::BufferUsages::COPY_DST;
                let mut contents = vec![0u8; align_to_copy(desc.size) as usize];
                if let Some(data) = data {
                    contents[..data.len()].copy_from_slice(data);
                }
                BufferEntry::Gpu(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(desc.label),
                    contents: &contents,
                    usage,
                }))
            }
        };
        let id = BufferId(self.next_id());
        self.buffers.insert(id, entry);
        Ok(id)
    }

    /// Geometry updates land before the next submit executes, so every draw
    /// of that submit sees the last write.
    fn update_buffer(&mut self, buffer: BufferId, data: &[u8]) -> RenderResult<()> {
        match self.buffers.get_mut(&buffer) {
            Some(BufferEntry::Constant(contents)) => {
                if data.len() > contents.len() {
                    return Err(RenderError::usage(format!(
                        "buffer update of {} bytes exceeds buffer size {}",
                        data.len(),
                        contents.len()
                    )));
                }
                contents[..data.len()].copy_from_slice(data);
                Ok(())
            }
            Some(BufferEntry::Gpu(gpu_buffer)) => {
                let size = align_to_copy(data.len() as u64);
                if size > gpu_buffer.size() {
                    return Err(RenderError::usage(format!(
                        "buffer update of {} bytes exceeds buffer size {}",
                        data.len(),
                        gpu_buffer.size()
                    )));
                }
                let mut padded = data.to_vec();
                padded.resize(size as usize, 0);
                self.queue.write_buffer(gpu_buffer, 0, &padded);
                Ok(())
            }
            None => Err(RenderError::usage("update of unknown buffer")),
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(BufferEntry::Gpu(buffer)) = self.buffers.remove(&buffer) {
            buffer.destroy();
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> RenderResult<SamplerId> {
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Material Sampler"),
            address_mode_u: address_mode(desc.address_mode_u),
            address_mode_v: address_mode(desc.address_mode_v),
            address_mode_w: address_mode(desc.address_mode_w),
            mag_filter: filter_mode(desc.mag_filter),
            min_filter: filter_mode(desc.min_filter),
            mipmap_filter: filter_mode(desc.mipmap_filter),
            compare: desc.compare.then_some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });
        let id = SamplerId(self.next_id());
        self.samplers.insert(id, (sampler, desc.compare));
        Ok(id)
    }

    fn create_blend_state(&mut self, state: BlendState) -> RenderResult<BlendStateId> {
        let id = BlendStateId(self.next_id());
        self.blend_states.insert(id, state);
        Ok(id)
    }

    fn create_depth_stencil_state(&mut self, desc: &DepthStencilDesc) -> RenderResult<DepthStencilStateId> {
        let id = DepthStencilStateId(self.next_id());
        self.depth_stencil_states.insert(id, *desc);
        Ok(id)
    }

    fn compile_vertex_program(
        &mut self,
        settings: &ShaderCompileSettings,
        inputs: &[VertexAttributeElement],
        _optimize: bool,
    ) -> RenderResult<VertexProgram> {
        let id = self.compile(settings, inputs)?;
        Ok(VertexProgram {
            id,
            label: settings.filename.clone(),
            inputs: inputs.to_vec(),
        })
    }

    fn compile_pixel_program(
        &mut self,
        settings: &ShaderCompileSettings,
        _optimize: bool,
    ) -> RenderResult<PixelProgram> {
        let id = self.compile(settings, &[])?;
        Ok(PixelProgram {
            id,
            label: settings.filename.clone(),
        })
    }

    fn set_render_targets(&mut self, colors: &[Option<Arc<ResourceView>>], depth: Option<&Arc<ResourceView>>) {
        self.bound.render_targets = colors.to_vec();
        self.bound.depth_target = depth.cloned();
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.bound.viewport = Some(viewport);
    }

    fn clear_render_target(&mut self, view: &Arc<ResourceView>, color: [f32; 4]) {
        self.ops.push(RecordedOp::ClearColor {
            view: view.id(),
            color,
        });
    }

    fn clear_depth_stencil(&mut self, view: &Arc<ResourceView>, flags: ClearFlags, depth: f32, stencil: u8) {
        self.ops.push(RecordedOp::ClearDepthStencil {
            view: view.id(),
            has_stencil: view.desc().format.has_stencil(),
            flags,
            depth,
            stencil,
        });
    }

    fn set_blend_state(&mut self, state: Option<BlendStateId>) {
        self.bound.blend_state = state;
    }

    fn set_depth_stencil_state(&mut self, state: Option<DepthStencilStateId>, stencil_ref: u32) {
        self.bound.depth_stencil = state;
        self.bound.stencil_ref = stencil_ref;
    }

    fn set_vertex_program(&mut self, program: Option<&VertexProgram>) {
        self.bound.vertex_program = program.map(|program| program.id);
    }

    fn set_pixel_program(&mut self, program: Option<&PixelProgram>) {
        self.bound.pixel_program = program.map(|program| program.id);
    }

    fn set_constant_buffers(&mut self, stage: ShaderStage, start_slot: u32, buffers: &[Option<BufferId>]) {
        let slots = match stage {
            ShaderStage::Vertex => &mut self.bound.vertex_constants,
            ShaderStage::Pixel => &mut self.bound.pixel_constants,
        };
        place_slots(slots, start_slot, buffers);
    }

    fn set_shader_resources(&mut self, start_slot: u32, views: &[Option<Arc<ResourceView>>]) {
        place_slots(&mut self.bound.shader_resources, start_slot, views);
    }

    fn set_samplers(&mut self, start_slot: u32, samplers: &[Option<SamplerId>]) {
        place_slots(&mut self.bound.samplers, start_slot, samplers);
    }

    fn set_vertex_buffers(&mut self, bindings: &[VertexBufferBinding]) {
        self.bound.vertex_buffers = bindings.to_vec();
    }

    fn set_index_buffer(&mut self, binding: Option<IndexBufferBinding>) {
        self.bound.index_buffer = binding;
    }

    fn set_topology(&mut self, topology: PrimitiveTopology) {
        self.bound.topology = Some(topology);
    }

    fn draw(&mut self, vertex_count: u32) -> RenderResult<()> {
        self.record_draw(false, vertex_count)
    }

    fn draw_indexed(&mut self, index_count: u32) -> RenderResult<()> {
        self.record_draw(true, index_count)
    }

    fn begin_event(&mut self, label: &str) {
        self.event_stack.push(label.to_string());
    }

    fn end_event(&mut self) {
        self.event_stack.pop();
    }

    fn submit(&mut self) -> RenderResult<()> {
        let ops = std::mem::take(&mut self.ops);
        if ops.is_empty() {
            return Ok(());
        }
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Frame Encoder"),
        });
        for op in &ops {
            self.encode(&mut encoder, op)?;
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        log::trace!("Submitted {} recorded operations", ops.len());
        Ok(())
    }
}

fn place_slots<T: Clone>(slots: &mut Vec<Option<T>>, start_slot: u32, values: &[Option<T>]) {
    let start = start_slot as usize;
    if slots.len() < start + values.len() {
        slots.resize(start + values.len(), None);
    }
    for (offset, value) in values.iter().enumerate() {
        slots[start + offset] = value.clone();
    }
}

fn layout_entry(binding: &ShaderBinding) -> wgpu::BindGroupLayoutEntry {
    let ty = match binding.kind {
        BindingKind::Uniform => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingKind::Texture { dimension, depth } => wgpu::BindingType::Texture {
            sample_type: if depth {
                wgpu::TextureSampleType::Depth
            } else {
                wgpu::TextureSampleType::Float { filterable: true }
            },
            view_dimension: view_dimension(dimension),
            multisampled: false,
        },
        BindingKind::Sampler { comparison } => wgpu::BindingType::Sampler(if comparison {
            wgpu::SamplerBindingType::Comparison
        } else {
            wgpu::SamplerBindingType::Filtering
        }),
    };
    wgpu::BindGroupLayoutEntry {
        binding: binding.binding,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty,
        count: None,
    }
}

fn vertex_format(input: &VertexAttributeElement) -> RenderResult<wgpu::VertexFormat> {
    use wgpu::VertexFormat as F;
    use ElementComponent as C;
    use ElementType as T;

    let format = match (input.component, input.ty) {
        (C::Float, T::Scalar) => F::Float32,
        (C::Float, T::Vector2) => F::Float32x2,
        (C::Float, T::Vector3) => F::Float32x3,
        (C::Float, T::Vector4) => F::Float32x4,
        (C::UnsignedInt, T::Scalar) => F::Uint32,
        (C::UnsignedInt, T::Vector2) => F::Uint32x2,
        (C::UnsignedInt, T::Vector3) => F::Uint32x3,
        (C::UnsignedInt, T::Vector4) => F::Uint32x4,
        (C::SignedInt, T::Scalar) => F::Sint32,
        (C::SignedInt, T::Vector2) => F::Sint32x2,
        (C::SignedInt, T::Vector3) => F::Sint32x3,
        (C::SignedInt, T::Vector4) => F::Sint32x4,
        (C::UnsignedShort, T::Vector2) => F::Uint16x2,
        (C::UnsignedShort, T::Vector4) => F::Uint16x4,
        (C::SignedShort, T::Vector2) => F::Sint16x2,
        (C::SignedShort, T::Vector4) => F::Sint16x4,
        (C::UnsignedByte, T::Vector2) => F::Uint8x2,
        (C::UnsignedByte, T::Vector4) => F::Uint8x4,
        (C::SignedByte, T::Vector2) => F::Sint8x2,
        (C::SignedByte, T::Vector4) => F::Sint8x4,
        (component, ty) => {
            return Err(RenderError::configuration(format!(
                "unsupported vertex format {ty:?} of {component:?} for {}",
                input.semantic
            )))
        }
    };
    Ok(format)
}

fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

fn view_dimension(dimension: ViewDimension) -> wgpu::TextureViewDimension {
    match dimension {
        ViewDimension::D2 => wgpu::TextureViewDimension::D2,
        ViewDimension::D2Array => wgpu::TextureViewDimension::D2Array,
        ViewDimension::Cube => wgpu::TextureViewDimension::Cube,
    }
}

fn blend_state(state: BlendState) -> wgpu::BlendState {
    match state {
        BlendState::Opaque => wgpu::BlendState::REPLACE,
        BlendState::AlphaBlend => wgpu::BlendState::ALPHA_BLENDING,
        BlendState::Additive => {
            let add = wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            };
            wgpu::BlendState { color: add, alpha: add }
        }
    }
}

fn compare_function(compare: CompareFunction) -> wgpu::CompareFunction {
    match compare {
        CompareFunction::Never => wgpu::CompareFunction::Never,
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::Equal => wgpu::CompareFunction::Equal,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Greater => wgpu::CompareFunction::Greater,
        CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

fn stencil_operation(op: StencilOp) -> wgpu::StencilOperation {
    match op {
        StencilOp::Keep => wgpu::StencilOperation::Keep,
        StencilOp::Zero => wgpu::StencilOperation::Zero,
        StencilOp::Replace => wgpu::StencilOperation::Replace,
        StencilOp::IncrementClamp => wgpu::StencilOperation::IncrementClamp,
        StencilOp::DecrementClamp => wgpu::StencilOperation::DecrementClamp,
        StencilOp::Invert => wgpu::StencilOperation::Invert,
        StencilOp::IncrementWrap => wgpu::StencilOperation::IncrementWrap,
        StencilOp::DecrementWrap => wgpu::StencilOperation::DecrementWrap,
    }
}

fn stencil_face(face: &StencilFaceDesc) -> wgpu::StencilFaceState {
    wgpu::StencilFaceState {
        compare: compare_function(face.compare),
        fail_op: stencil_operation(face.fail_op),
        depth_fail_op: stencil_operation(face.depth_fail_op),
        pass_op: stencil_operation(face.pass_op),
    }
}

fn default_depth_stencil() -> DepthStencilDesc {
    DepthStencilDesc {
        depth_enable: true,
        depth_write: true,
        depth_compare: CompareFunction::Less,
        stencil_enable: false,
        stencil_read_mask: 0xff,
        stencil_write_mask: 0xff,
        front_face: StencilFaceDesc::default(),
        back_face: StencilFaceDesc::default(),
    }
}

fn depth_stencil_state(format: TextureFormat, desc: &DepthStencilDesc) -> wgpu::DepthStencilState {
    let stencil = if desc.stencil_enable && format.has_stencil() {
        wgpu::StencilState {
            front: stencil_face(&desc.front_face),
            back: stencil_face(&desc.back_face),
            read_mask: u32::from(desc.stencil_read_mask),
            write_mask: u32::from(desc.stencil_write_mask),
        }
    } else {
        wgpu::StencilState::default()
    };
    wgpu::DepthStencilState {
        format: texture_format(format),
        depth_write_enabled: desc.depth_enable && desc.depth_write,
        depth_compare: if desc.depth_enable {
            compare_function(desc.depth_compare)
        } else {
            wgpu::CompareFunction::Always
        },
        stencil,
        bias: wgpu::DepthBiasState::default(),
    }
}

fn primitive_topology(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
    match topology {
        PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
        PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
    }
}

fn index_format(format: IndexFormat) -> wgpu::IndexFormat {
    match format {
        IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
        IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
    }
}

fn address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::Repeat => wgpu::AddressMode::Repeat,
        AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
    }
}

fn filter_mode(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}
