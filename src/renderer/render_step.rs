use std::sync::Arc;

use crate::error::RenderResult;
use crate::renderer::camera::CameraData;
use crate::renderer::device::{RenderDevice, ResourceView};
use crate::renderer::internal::SharedStateCache;
use crate::renderer::render_pass::{DepthMode, DrawDestination, RenderPass};
use crate::renderer::render_step_manager::FrameContext;

/// The fixed steps of a frame, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderStepKind {
    ShadowMap,
    Deferred,
    Standard,
    Debug,
    Sky,
}

impl RenderStepKind {
    pub const ALL: [RenderStepKind; 5] = [
        RenderStepKind::ShadowMap,
        RenderStepKind::Deferred,
        RenderStepKind::Standard,
        RenderStepKind::Debug,
        RenderStepKind::Sky,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            RenderStepKind::ShadowMap => "Shadow Map",
            RenderStepKind::Deferred => "Deferred Lighting",
            RenderStepKind::Standard => "Standard",
            RenderStepKind::Debug => "Debug Elements",
            RenderStepKind::Sky => "Sky",
        }
    }
}

/// Passes that run together. Enabled or disabled as a unit.
#[derive(Debug)]
pub struct RenderStep {
    kind: RenderStepKind,
    passes: Vec<RenderPass>,
    enabled: bool,
}

impl RenderStep {
    pub fn new(kind: RenderStepKind, passes: Vec<RenderPass>) -> Self {
        Self {
            kind,
            passes,
            enabled: true,
        }
    }

    pub fn kind(&self) -> RenderStepKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn passes(&self) -> &[RenderPass] {
        &self.passes
    }

    pub fn create_device_dependent_resources(
        &mut self,
        device: &mut dyn RenderDevice,
        states: &mut SharedStateCache,
    ) -> RenderResult<()> {
        for pass in &mut self.passes {
            pass.create_device_dependent_resources(device, states)?;
        }
        Ok(())
    }

    pub fn destroy_device_dependent_resources(&mut self) {
        for pass in &mut self.passes {
            pass.destroy_device_dependent_resources();
        }
    }

    /// Hands every pass the target set matching its destination. Passes that
    /// ignore depth get no depth target, which leaves it free to be sampled.
    pub fn set_render_targets(
        &mut self,
        gbuffer: &[Option<Arc<ResourceView>>],
        final_target: &[Option<Arc<ResourceView>>],
        depth_stencil: Option<&Arc<ResourceView>>,
    ) {
        for pass in &mut self.passes {
            let depth = match pass.config().depth_mode {
                DepthMode::Disabled => None,
                _ => depth_stencil.cloned(),
            };
            match pass.config().destination {
                DrawDestination::GBuffer => pass.set_render_targets(gbuffer.to_vec(), depth),
                DrawDestination::Final => pass.set_render_targets(final_target.to_vec(), depth),
                DrawDestination::ShadowMap => {}
            }
        }
    }

    pub fn clear_render_targets(&mut self) {
        for pass in &mut self.passes {
            pass.clear_render_targets();
        }
    }

    pub fn render(&mut self, ctx: &mut FrameContext<'_>, camera: &CameraData) -> RenderResult<()> {
        ctx.device.begin_event(self.kind.name());
        let mut result = Ok(());
        for pass in &mut self.passes {
            result = pass.render(ctx, camera);
            if result.is_err() {
                break;
            }
        }
        ctx.device.end_event();
        result
    }
}
