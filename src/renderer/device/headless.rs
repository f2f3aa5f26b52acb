use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{RenderError, RenderResult};
use crate::renderer::texture::SamplerDescriptor;
use crate::renderer::vertex::VertexAttributeElement;

use super::{
    BlendState, BlendStateId, BufferDesc, BufferId, BufferKind, ClearFlags, DepthStencilDesc,
    DepthStencilStateId, IndexBufferBinding, PixelProgram, PrimitiveTopology, ProgramId,
    RenderDevice, ResourceView, SamplerId, ShaderCompileSettings, ShaderStage, TextureDesc,
    TextureId, VertexBufferBinding, VertexProgram, ViewDesc, ViewId, Viewport,
};

/// Snapshot of the bound pipeline state at the time of a draw call.
#[derive(Debug, Clone)]
pub struct DrawRecord {
    /// Debug event stack, outermost first.
    pub events: Vec<String>,
    pub vertex_program: Option<String>,
    pub pixel_program: Option<String>,
    pub vertex_constants: Vec<Vec<u8>>,
    pub pixel_constants: Vec<Vec<u8>>,
    pub shader_resources: Vec<Option<ViewId>>,
    pub samplers: Vec<Option<SamplerId>>,
    pub render_targets: Vec<Option<ViewId>>,
    pub depth_target: Option<ViewId>,
    pub viewport: Option<Viewport>,
    pub blend_state: Option<BlendState>,
    pub depth_stencil: Option<DepthStencilDesc>,
    pub stencil_ref: u32,
    pub topology: PrimitiveTopology,
    pub vertex_buffer_count: usize,
    pub indexed: bool,
    pub element_count: u32,
}

impl DrawRecord {
    pub fn in_event(&self, label: &str) -> bool {
        self.events.iter().any(|event| event == label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    BeginEvent(String),
    EndEvent,
    SetRenderTargets {
        colors: Vec<Option<ViewId>>,
        depth: Option<ViewId>,
    },
    SetViewport(Viewport),
    ClearRenderTarget {
        view: ViewId,
        color: [f32; 4],
    },
    ClearDepthStencil {
        view: ViewId,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    },
    /// Index into [`HeadlessDevice::draws`].
    Draw(usize),
    Submit,
}

#[derive(Debug, Default)]
struct BoundState {
    vertex_program: Option<String>,
    pixel_program: Option<String>,
    vertex_constants: Vec<Option<BufferId>>,
    pixel_constants: Vec<Option<BufferId>>,
    shader_resources: Vec<Option<Arc<ResourceView>>>,
    samplers: Vec<Option<SamplerId>>,
    render_targets: Vec<Option<ViewId>>,
    depth_target: Option<ViewId>,
    viewport: Option<Viewport>,
    blend_state: Option<BlendStateId>,
    depth_stencil: Option<DepthStencilStateId>,
    stencil_ref: u32,
    topology: Option<PrimitiveTopology>,
    vertex_buffers: Vec<VertexBufferBinding>,
    index_buffer: Option<IndexBufferBinding>,
}

/// A device that records commands instead of talking to a GPU.
///
/// Buffer contents are kept so per-draw constants can be inspected, and
/// shader compilation can be made to fail for chosen files.
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    next_id: u64,
    textures: HashMap<TextureId, TextureDesc>,
    buffers: HashMap<BufferId, (BufferKind, Vec<u8>)>,
    blend_states: HashMap<BlendStateId, BlendState>,
    depth_stencil_states: HashMap<DepthStencilStateId, DepthStencilDesc>,
    samplers: HashMap<SamplerId, SamplerDescriptor>,
    programs: HashMap<ProgramId, String>,
    failing_shaders: HashSet<String>,
    vertex_compiles: usize,
    pixel_compiles: usize,
    submits: usize,
    event_stack: Vec<String>,
    bound: BoundState,
    commands: Vec<DeviceCommand>,
    draws: Vec<DrawRecord>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Makes every subsequent compile of `filename` fail.
    pub fn fail_shader(&mut self, filename: impl Into<String>) {
        self.failing_shaders.insert(filename.into());
    }

    pub fn clear_shader_failures(&mut self) {
        self.failing_shaders.clear();
    }

    pub fn vertex_compile_count(&self) -> usize {
        self.vertex_compiles
    }

    pub fn pixel_compile_count(&self) -> usize {
        self.pixel_compiles
    }

    pub fn compile_count(&self) -> usize {
        self.vertex_compiles + self.pixel_compiles
    }

    pub fn submit_count(&self) -> usize {
        self.submits
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffer_contents(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|(_, data)| data.as_slice())
    }

    pub fn texture_desc(&self, texture: TextureId) -> Option<&TextureDesc> {
        self.textures.get(&texture)
    }

    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    /// Forgets recorded commands and draws; resources and compile counters stay.
    pub fn clear_recording(&mut self) {
        self.commands.clear();
        self.draws.clear();
    }

    fn snapshot_constants(&self, slots: &[Option<BufferId>]) -> Vec<Vec<u8>> {
        slots
            .iter()
            .map(|slot| {
                slot.and_then(|buffer| self.buffer_contents(buffer))
                    .map(|data| data.to_vec())
                    .unwrap_or_default()
            })
            .collect()
    }

    fn record_draw(&mut self, indexed: bool, element_count: u32) -> RenderResult<()> {
        if self.bound.vertex_program.is_none() {
            return Err(RenderError::usage("draw issued without a vertex program"));
        }
        if self.bound.vertex_buffers.is_empty() {
            return Err(RenderError::usage("draw issued without vertex buffers"));
        }
        if indexed && self.bound.index_buffer.is_none() {
            return Err(RenderError::usage("indexed draw issued without an index buffer"));
        }

        let record = DrawRecord {
            events: self.event_stack.clone(),
            vertex_program: self.bound.vertex_program.clone(),
            pixel_program: self.bound.pixel_program.clone(),
            vertex_constants: self.snapshot_constants(&self.bound.vertex_constants),
            pixel_constants: self.snapshot_constants(&self.bound.pixel_constants),
            shader_resources: self
                .bound
                .shader_resources
                .iter()
                .map(|view| view.as_ref().map(|view| view.id()))
                .collect(),
            samplers: self.bound.samplers.clone(),
            render_targets: self.bound.render_targets.clone(),
            depth_target: self.bound.depth_target,
            viewport: self.bound.viewport,
            blend_state: self
                .bound
                .blend_state
                .and_then(|id| self.blend_states.get(&id).copied()),
            depth_stencil: self
                .bound
                .depth_stencil
                .and_then(|id| self.depth_stencil_states.get(&id).copied()),
            stencil_ref: self.bound.stencil_ref,
            topology: self.bound.topology.unwrap_or(PrimitiveTopology::TriangleList),
            vertex_buffer_count: self.bound.vertex_buffers.len(),
            indexed,
            element_count,
        };
        self.commands.push(DeviceCommand::Draw(self.draws.len()));
        self.draws.push(record);
        Ok(())
    }

    fn check_shader(&self, settings: &ShaderCompileSettings) -> RenderResult<()> {
        if self.failing_shaders.contains(&settings.filename) {
            return Err(RenderError::ShaderCompilation {
                file: settings.filename.clone(),
                message: "compilation failure injected by headless device".to_string(),
            });
        }
        Ok(())
    }

    fn program_label(settings: &ShaderCompileSettings) -> String {
        let defines: Vec<_> = settings
            .defines
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        format!(
            "{}:{} [{}]",
            settings.filename,
            settings.entry_point,
            defines.join(",")
        )
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
    while matches!(slots.last(), Some(None)) {
        slots.pop();
    }
}

impl RenderDevice for HeadlessDevice {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn create_texture(&mut self, desc: &TextureDesc, data: Option<&[u8]>) -> RenderResult<TextureId> {
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 {
            return Err(RenderError::ResourceCreation(format!(
                "texture {} has a zero dimension",
                desc.label
            )));
        }
        if let Some(data) = data {
            if data.len() != desc.byte_size() {
                return Err(RenderError::ResourceCreation(format!(
                    "texture {} initial data size mismatch",
                    desc.label
                )));
            }
        }
        let id = TextureId(self.next_id());
        self.textures.insert(id, desc.clone());
        Ok(id)
    }

    fn create_view(&mut self, texture: TextureId, desc: &ViewDesc) -> RenderResult<Arc<ResourceView>> {
        let layers = self
            .textures
            .get(&texture)
            .map(|texture_desc| texture_desc.layers)
            .ok_or_else(|| RenderError::ResourceCreation("view of unknown texture".to_string()))?;
        if desc.layer_count == 0 || desc.base_layer + desc.layer_count > layers {
            return Err(RenderError::ResourceCreation(format!(
                "view layers {}..{} out of range for {} layers",
                desc.base_layer,
                desc.base_layer + desc.layer_count,
                layers
            )));
        }
        let id = ViewId(self.next_id());
        Ok(Arc::new(ResourceView::new(id, texture, *desc)))
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    fn create_buffer(&mut self, desc: &BufferDesc<'_>, data: Option<&[u8]>) -> RenderResult<BufferId> {
        let mut contents = vec![0u8; desc.size as usize];
        if let Some(data) = data {
            if data.len() > contents.len() {
                return Err(RenderError::ResourceCreation(format!(
                    "buffer {} initial data exceeds its size",
                    desc.label
                )));
            }
            contents[..data.len()].copy_from_slice(data);
        }
        let id = BufferId(self.next_id());
        self.buffers.insert(id, (desc.kind, contents));
        Ok(id)
    }

    fn update_buffer(&mut self, buffer: BufferId, data: &[u8]) -> RenderResult<()> {
        let (_, contents) = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| RenderError::usage("update of unknown buffer"))?;
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

    fn destroy_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> RenderResult<SamplerId> {
        let id = SamplerId(self.next_id());
        self.samplers.insert(id, *desc);
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
        self.vertex_compiles += 1;
        self.check_shader(settings)?;
        let id = ProgramId(self.next_id());
        let label = Self::program_label(settings);
        self.programs.insert(id, label.clone());
        Ok(VertexProgram {
            id,
            label,
            inputs: inputs.to_vec(),
        })
    }

    fn compile_pixel_program(
        &mut self,
        settings: &ShaderCompileSettings,
        _optimize: bool,
    ) -> RenderResult<PixelProgram> {
        self.pixel_compiles += 1;
        self.check_shader(settings)?;
        let id = ProgramId(self.next_id());
        let label = Self::program_label(settings);
        self.programs.insert(id, label.clone());
        Ok(PixelProgram { id, label })
    }

    fn set_render_targets(&mut self, colors: &[Option<Arc<ResourceView>>], depth: Option<&Arc<ResourceView>>) {
        let colors: Vec<_> = colors.iter().map(|view| view.as_ref().map(|view| view.id())).collect();
        let depth = depth.map(|view| view.id());
        self.bound.render_targets = colors.clone();
        self.bound.depth_target = depth;
        self.commands.push(DeviceCommand::SetRenderTargets { colors, depth });
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.bound.viewport = Some(viewport);
        self.commands.push(DeviceCommand::SetViewport(viewport));
    }

    fn clear_render_target(&mut self, view: &Arc<ResourceView>, color: [f32; 4]) {
        self.commands.push(DeviceCommand::ClearRenderTarget {
            view: view.id(),
            color,
        });
    }

    fn clear_depth_stencil(&mut self, view: &Arc<ResourceView>, flags: ClearFlags, depth: f32, stencil: u8) {
        self.commands.push(DeviceCommand::ClearDepthStencil {
            view: view.id(),
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
        self.bound.vertex_program = program.map(|program| program.label.clone());
    }

    fn set_pixel_program(&mut self, program: Option<&PixelProgram>) {
        self.bound.pixel_program = program.map(|program| program.label.clone());
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
        self.commands.push(DeviceCommand::BeginEvent(label.to_string()));
    }

    fn end_event(&mut self) {
        self.event_stack.pop();
        self.commands.push(DeviceCommand::EndEvent);
    }

    fn submit(&mut self) -> RenderResult<()> {
        self.submits += 1;
        self.commands.push(DeviceCommand::Submit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::TextureFormat;
    use crate::renderer::vertex::{ElementType, VertexAttribute};

    fn triangle_buffer(device: &mut HeadlessDevice) -> BufferId {
        device
            .create_buffer(
                &BufferDesc {
                    label: "triangle",
                    kind: BufferKind::Vertex,
                    size: 36,
                },
                None,
            )
            .unwrap()
    }

    #[test]
    fn draws_capture_bound_state_and_event_stack() {
        let mut device = HeadlessDevice::new();
        let settings = ShaderCompileSettings::new("Unlit_VS.wgsl", "vs_main");
        let inputs = [VertexAttributeElement::float(
            VertexAttribute::Position,
            0,
            ElementType::Vector3,
        )];
        let program = device.compile_vertex_program(&settings, &inputs, false).unwrap();
        let buffer = triangle_buffer(&mut device);
        let constants = device
            .create_buffer(
                &BufferDesc {
                    label: "constants",
                    kind: BufferKind::Constant,
                    size: 8,
                },
                None,
            )
            .unwrap();
        device.update_buffer(constants, &[1, 2, 3, 4]).unwrap();

        device.begin_event("Frame");
        device.begin_event("Pass");
        device.set_vertex_program(Some(&program));
        device.set_vertex_buffers(&[VertexBufferBinding {
            buffer,
            stride: 12,
            offset: 0,
        }]);
        device.set_constant_buffers(ShaderStage::Vertex, 0, &[Some(constants)]);
        device.draw(3).unwrap();
        device.end_event();
        device.end_event();

        let draw = &device.draws()[0];
        assert_eq!(draw.events, vec!["Frame".to_string(), "Pass".to_string()]);
        assert!(draw.in_event("Pass"));
        assert_eq!(&draw.vertex_constants[0][..4], &[1, 2, 3, 4]);
        assert_eq!(draw.element_count, 3);
        assert_eq!(device.vertex_compile_count(), 1);
    }

    #[test]
    fn draw_without_program_is_a_usage_error() {
        let mut device = HeadlessDevice::new();
        assert!(matches!(device.draw(3), Err(RenderError::Usage(_))));
    }

    #[test]
    fn injected_failures_still_count_compiles() {
        let mut device = HeadlessDevice::new();
        device.fail_shader("Broken_PS.wgsl");
        let settings = ShaderCompileSettings::new("Broken_PS.wgsl", "fs_main");
        assert!(matches!(
            device.compile_pixel_program(&settings, false),
            Err(RenderError::ShaderCompilation { .. })
        ));
        assert_eq!(device.pixel_compile_count(), 1);
    }

    #[test]
    fn views_must_stay_within_texture_layers() {
        let mut device = HeadlessDevice::new();
        let mut desc = TextureDesc::render_target("array", 8, 8, TextureFormat::Depth32Float);
        desc.layers = 2;
        let texture = device.create_texture(&desc, None).unwrap();
        let mut view = desc.default_view();
        view.base_layer = 1;
        view.layer_count = 2;
        assert!(device.create_view(texture, &view).is_err());
    }
}
