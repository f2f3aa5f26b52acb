use std::fmt;
use std::sync::Arc;

use crate::error::RenderResult;
use crate::renderer::camera::CameraData;
use crate::renderer::device::{
    BlendState, BlendStateId, CompareFunction, DepthStencilDesc, DepthStencilStateId,
    RenderDevice, ResourceView, StencilFaceDesc, StencilOp,
};
use crate::renderer::internal::SharedStateCache;
use crate::renderer::render_step_manager::FrameContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderPassBlendMode {
    Opaque,
    BlendedAlpha,
    Additive,
}

impl RenderPassBlendMode {
    pub fn blend_state(&self) -> BlendState {
        match self {
            RenderPassBlendMode::Opaque => BlendState::Opaque,
            RenderPassBlendMode::BlendedAlpha => BlendState::AlphaBlend,
            RenderPassBlendMode::Additive => BlendState::Additive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthMode {
    ReadWrite,
    ReadOnly,
    WriteOnly,
    Disabled,
}

impl DepthMode {
    pub fn reads(&self) -> bool {
        matches!(self, DepthMode::ReadWrite | DepthMode::ReadOnly)
    }

    pub fn writes(&self) -> bool {
        matches!(self, DepthMode::ReadWrite | DepthMode::WriteOnly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilMode {
    Disabled,
    Enabled { read_mask: u8, write_mask: u8 },
}

/// Depth-stencil state for a pass.
pub fn depth_stencil_desc(depth: DepthMode, stencil: StencilMode) -> DepthStencilDesc {
    let (stencil_enable, stencil_read_mask, stencil_write_mask, face) = match stencil {
        StencilMode::Disabled => (false, 0, 0, StencilFaceDesc::default()),
        StencilMode::Enabled {
            read_mask,
            write_mask,
        } => (
            true,
            read_mask,
            write_mask,
            StencilFaceDesc {
                fail_op: StencilOp::Replace,
                depth_fail_op: StencilOp::Keep,
                pass_op: StencilOp::Replace,
                compare: CompareFunction::Always,
            },
        ),
    };

    DepthStencilDesc {
        depth_enable: depth.reads() || depth.writes(),
        depth_write: depth.writes(),
        depth_compare: if depth.reads() {
            CompareFunction::LessEqual
        } else {
            CompareFunction::Always
        },
        stencil_enable,
        stencil_read_mask,
        stencil_write_mask,
        front_face: face,
        back_face: face,
    }
}

/// Which target set a pass receives when the window is resized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawDestination {
    GBuffer,
    Final,
    /// Targets are set per light by the pass itself.
    ShadowMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassConfig {
    pub blend_mode: RenderPassBlendMode,
    pub depth_mode: DepthMode,
    pub stencil_mode: StencilMode,
    pub stencil_ref: u32,
    pub destination: DrawDestination,
}

impl RenderPassConfig {
    pub fn new(blend_mode: RenderPassBlendMode, depth_mode: DepthMode, destination: DrawDestination) -> Self {
        Self {
            blend_mode,
            depth_mode,
            stencil_mode: StencilMode::Disabled,
            stencil_ref: 0,
            destination,
        }
    }

    pub fn with_stencil(mut self, stencil_mode: StencilMode, stencil_ref: u32) -> Self {
        self.stencil_mode = stencil_mode;
        self.stencil_ref = stencil_ref;
        self
    }

    pub fn depth_stencil_desc(&self) -> DepthStencilDesc {
        depth_stencil_desc(self.depth_mode, self.stencil_mode)
    }
}

pub type RenderCallback =
    Box<dyn FnMut(&mut FrameContext<'_>, &CameraData) -> RenderResult<()> + Send>;

/// One draw invocation: targets, fixed-function state and a callback that
/// issues the draws.
pub struct RenderPass {
    name: String,
    config: RenderPassConfig,
    callback: RenderCallback,
    render_targets: Vec<Option<Arc<ResourceView>>>,
    depth_stencil: Option<Arc<ResourceView>>,
    blend_state: Option<BlendStateId>,
    depth_stencil_state: Option<DepthStencilStateId>,
}

impl RenderPass {
    pub fn new(name: impl Into<String>, config: RenderPassConfig, callback: RenderCallback) -> Self {
        Self {
            name: name.into(),
            config,
            callback,
            render_targets: Vec::new(),
            depth_stencil: None,
            blend_state: None,
            depth_stencil_state: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RenderPassConfig {
        &self.config
    }

    pub fn blend_mode(&self) -> RenderPassBlendMode {
        self.config.blend_mode
    }

    pub fn is_ready(&self) -> bool {
        self.blend_state.is_some() && self.depth_stencil_state.is_some()
    }

    pub fn create_device_dependent_resources(
        &mut self,
        device: &mut dyn RenderDevice,
        states: &mut SharedStateCache,
    ) -> RenderResult<()> {
        self.blend_state = Some(states.blend_state(device, self.config.blend_mode.blend_state())?);
        self.depth_stencil_state = Some(states.depth_stencil_state(device, &self.config.depth_stencil_desc())?);
        Ok(())
    }

    pub fn destroy_device_dependent_resources(&mut self) {
        self.blend_state = None;
        self.depth_stencil_state = None;
        self.clear_render_targets();
    }

    /// Replaces the whole target set.
    pub fn set_render_targets(
        &mut self,
        render_targets: Vec<Option<Arc<ResourceView>>>,
        depth_stencil: Option<Arc<ResourceView>>,
    ) {
        self.render_targets = render_targets;
        self.depth_stencil = depth_stencil;
    }

    pub fn clear_render_targets(&mut self) {
        self.render_targets.clear();
        self.depth_stencil = None;
    }

    pub fn render_targets(&self) -> &[Option<Arc<ResourceView>>] {
        &self.render_targets
    }

    pub fn depth_stencil(&self) -> Option<&Arc<ResourceView>> {
        self.depth_stencil.as_ref()
    }

    pub fn render(&mut self, ctx: &mut FrameContext<'_>, camera: &CameraData) -> RenderResult<()> {
        if self.config.destination != DrawDestination::ShadowMap {
            ctx.device
                .set_render_targets(&self.render_targets, self.depth_stencil.as_ref());
        }
        ctx.device.set_blend_state(self.blend_state);
        ctx.device
            .set_depth_stencil_state(self.depth_stencil_state, self.config.stencil_ref);

        ctx.device.begin_event(&self.name);
        let result = (self.callback)(ctx, camera);
        ctx.device.end_event();
        result
    }
}

impl fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPass")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("render_targets", &self.render_targets.len())
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::HeadlessDevice;

    #[test]
    fn depth_rules() {
        let read_write = depth_stencil_desc(DepthMode::ReadWrite, StencilMode::Disabled);
        assert!(read_write.depth_enable && read_write.depth_write);
        assert_eq!(read_write.depth_compare, CompareFunction::LessEqual);

        let write_only = depth_stencil_desc(DepthMode::WriteOnly, StencilMode::Disabled);
        assert!(write_only.depth_enable && write_only.depth_write);
        assert_eq!(write_only.depth_compare, CompareFunction::Always);

        let read_only = depth_stencil_desc(DepthMode::ReadOnly, StencilMode::Disabled);
        assert!(read_only.depth_enable && !read_only.depth_write);

        let disabled = depth_stencil_desc(DepthMode::Disabled, StencilMode::Disabled);
        assert!(!disabled.depth_enable && !disabled.depth_write);
        assert!(!disabled.stencil_enable);
    }

    #[test]
    fn stencil_replaces_on_pass_and_fail() {
        let desc = depth_stencil_desc(
            DepthMode::ReadWrite,
            StencilMode::Enabled {
                read_mask: 0xFF,
                write_mask: 0xFF,
            },
        );
        assert!(desc.stencil_enable);
        assert_eq!(desc.front_face.pass_op, StencilOp::Replace);
        assert_eq!(desc.front_face.fail_op, StencilOp::Replace);
        assert_eq!(desc.front_face.depth_fail_op, StencilOp::Keep);
        assert_eq!(desc.front_face.compare, CompareFunction::Always);
        assert_eq!(desc.front_face, desc.back_face);
    }

    #[test]
    fn passes_share_state_objects() {
        let mut device = HeadlessDevice::new();
        let mut states = SharedStateCache::default();
        let config = RenderPassConfig::new(
            RenderPassBlendMode::Opaque,
            DepthMode::ReadWrite,
            DrawDestination::Final,
        );
        let mut first = RenderPass::new("first", config, Box::new(|_, _| Ok(())));
        let mut second = RenderPass::new("second", config, Box::new(|_, _| Ok(())));
        first.create_device_dependent_resources(&mut device, &mut states).unwrap();
        second.create_device_dependent_resources(&mut device, &mut states).unwrap();
        assert!(first.is_ready() && second.is_ready());
        assert_eq!(states.len(), 2);

        first.destroy_device_dependent_resources();
        assert!(!first.is_ready());
    }
}
