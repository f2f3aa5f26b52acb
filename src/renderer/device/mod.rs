//! Graphics device seam.
//!
//! The render pipeline only talks to the GPU through [`RenderDevice`]. State is
//! set immediately (targets, programs, resources) and draws consume whatever is
//! currently bound, which keeps the material cache and passes independent of
//! the backing API.

pub mod headless;
pub mod shader_library;
#[cfg(feature = "wgpu-backend")]
pub mod wgpu_device;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bitflags::bitflags;

use crate::error::RenderResult;
use crate::renderer::texture::SamplerDescriptor;
use crate::renderer::vertex::VertexAttributeElement;

pub use headless::{DeviceCommand, DrawRecord, HeadlessDevice};
pub use shader_library::ShaderLibrary;
#[cfg(feature = "wgpu-backend")]
pub use wgpu_device::WgpuDevice;

/// Maximum number of shader resource slots that may be bound to the pixel stage.
pub const MAX_SHADER_RESOURCES: usize = 32;
/// Maximum number of sampler slots that may be bound to the pixel stage.
pub const MAX_SAMPLERS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SamplerId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlendStateId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepthStencilStateId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    D2,
    D2Array,
    Cube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgba16Float,
    Depth24PlusStencil8,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth24PlusStencil8 | TextureFormat::Depth32Float
        )
    }

    pub fn has_stencil(&self) -> bool {
        matches!(self, TextureFormat::Depth24PlusStencil8)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Depth24PlusStencil8
            | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    /// Array layers; 6 for cube maps.
    pub layers: u32,
    pub dimension: TextureDimension,
    pub format: TextureFormat,
    pub render_target: bool,
}

impl TextureDesc {
    pub fn color_2d(label: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            layers: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
            render_target: false,
        }
    }

    pub fn render_target(label: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            layers: 1,
            dimension: TextureDimension::D2,
            format,
            render_target: true,
        }
    }

    pub fn default_view(&self) -> ViewDesc {
        ViewDesc {
            dimension: match self.dimension {
                TextureDimension::D2 => ViewDimension::D2,
                TextureDimension::D2Array => ViewDimension::D2Array,
                TextureDimension::Cube => ViewDimension::Cube,
            },
            format: self.format,
            base_layer: 0,
            layer_count: self.layers,
        }
    }

    pub fn byte_size(&self) -> usize {
        (self.width * self.height * self.layers * self.format.bytes_per_pixel()) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewDimension {
    D2,
    D2Array,
    Cube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewDesc {
    pub dimension: ViewDimension,
    pub format: TextureFormat,
    pub base_layer: u32,
    pub layer_count: u32,
}

/// A view onto a device texture. Shared through `Arc` by materials, render
/// passes and binding contexts; replacing a slot simply drops the old handle.
#[derive(Debug, PartialEq, Eq)]
pub struct ResourceView {
    id: ViewId,
    texture: TextureId,
    desc: ViewDesc,
}

impl ResourceView {
    pub(crate) fn new(id: ViewId, texture: TextureId, desc: ViewDesc) -> Self {
        Self { id, texture, desc }
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn desc(&self) -> &ViewDesc {
        &self.desc
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Constant,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub kind: BufferKind,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendState {
    Opaque,
    AlphaBlend,
    Additive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilFaceDesc {
    pub fail_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub compare: CompareFunction,
}

impl Default for StencilFaceDesc {
    fn default() -> Self {
        Self {
            fail_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            compare: CompareFunction::Always,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilDesc {
    pub depth_enable: bool,
    pub depth_write: bool,
    pub depth_compare: CompareFunction,
    pub stencil_enable: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub front_face: StencilFaceDesc,
    pub back_face: StencilFaceDesc,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            1.0
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u8 {
        const DEPTH = 0b01;
        const STENCIL = 0b10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferBinding {
    pub buffer: BufferId,
    pub stride: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBufferBinding {
    pub buffer: BufferId,
    pub format: IndexFormat,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

/// Inputs for compiling one shader program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ShaderCompileSettings {
    pub filename: String,
    pub entry_point: String,
    pub defines: BTreeMap<String, String>,
    pub includes: BTreeSet<String>,
}

impl ShaderCompileSettings {
    pub fn new(filename: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            entry_point: entry_point.into(),
            ..Default::default()
        }
    }

    pub fn define(&mut self, name: &str, value: impl Into<String>) {
        self.defines.insert(name.to_string(), value.into());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexProgram {
    pub id: ProgramId,
    pub label: String,
    pub inputs: Vec<VertexAttributeElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelProgram {
    pub id: ProgramId,
    pub label: String,
}

pub trait RenderDevice {
    fn name(&self) -> &'static str;

    fn create_texture(&mut self, desc: &TextureDesc, data: Option<&[u8]>) -> RenderResult<TextureId>;
    fn create_view(&mut self, texture: TextureId, desc: &ViewDesc) -> RenderResult<Arc<ResourceView>>;
    fn destroy_texture(&mut self, texture: TextureId);

    fn create_buffer(&mut self, desc: &BufferDesc<'_>, data: Option<&[u8]>) -> RenderResult<BufferId>;
    fn update_buffer(&mut self, buffer: BufferId, data: &[u8]) -> RenderResult<()>;
    fn destroy_buffer(&mut self, buffer: BufferId);

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> RenderResult<SamplerId>;
    fn create_blend_state(&mut self, state: BlendState) -> RenderResult<BlendStateId>;
    fn create_depth_stencil_state(&mut self, desc: &DepthStencilDesc) -> RenderResult<DepthStencilStateId>;

    fn compile_vertex_program(
        &mut self,
        settings: &ShaderCompileSettings,
        inputs: &[VertexAttributeElement],
        optimize: bool,
    ) -> RenderResult<VertexProgram>;
    fn compile_pixel_program(
        &mut self,
        settings: &ShaderCompileSettings,
        optimize: bool,
    ) -> RenderResult<PixelProgram>;

    fn set_render_targets(&mut self, colors: &[Option<Arc<ResourceView>>], depth: Option<&Arc<ResourceView>>);
    fn set_viewport(&mut self, viewport: Viewport);
    fn clear_render_target(&mut self, view: &Arc<ResourceView>, color: [f32; 4]);
    fn clear_depth_stencil(&mut self, view: &Arc<ResourceView>, flags: ClearFlags, depth: f32, stencil: u8);
    fn set_blend_state(&mut self, state: Option<BlendStateId>);
    fn set_depth_stencil_state(&mut self, state: Option<DepthStencilStateId>, stencil_ref: u32);

    fn set_vertex_program(&mut self, program: Option<&VertexProgram>);
    fn set_pixel_program(&mut self, program: Option<&PixelProgram>);
    fn set_constant_buffers(&mut self, stage: ShaderStage, start_slot: u32, buffers: &[Option<BufferId>]);
    fn set_shader_resources(&mut self, start_slot: u32, views: &[Option<Arc<ResourceView>>]);
    fn set_samplers(&mut self, start_slot: u32, samplers: &[Option<SamplerId>]);
    fn set_vertex_buffers(&mut self, bindings: &[VertexBufferBinding]);
    fn set_index_buffer(&mut self, binding: Option<IndexBufferBinding>);
    fn set_topology(&mut self, topology: PrimitiveTopology);

    fn draw(&mut self, vertex_count: u32) -> RenderResult<()>;
    fn draw_indexed(&mut self, index_count: u32) -> RenderResult<()>;

    fn begin_event(&mut self, label: &str);
    fn end_event(&mut self);

    /// Flushes the work recorded since the last submit.
    fn submit(&mut self) -> RenderResult<()>;
}
