use std::collections::HashMap;

use crate::error::RenderResult;
use crate::renderer::device::{
    BlendState, BlendStateId, DepthStencilDesc, DepthStencilStateId, RenderDevice,
};

/// Blend and depth-stencil state objects shared by every render pass.
#[derive(Debug, Default)]
pub(crate) struct SharedStateCache {
    blend_states: HashMap<BlendState, BlendStateId>,
    depth_stencil_states: HashMap<DepthStencilDesc, DepthStencilStateId>,
}

impl SharedStateCache {
    pub(crate) fn blend_state(
        &mut self,
        device: &mut dyn RenderDevice,
        state: BlendState,
    ) -> RenderResult<BlendStateId> {
        if let Some(id) = self.blend_states.get(&state) {
            return Ok(*id);
        }
        let id = device.create_blend_state(state)?;
        self.blend_states.insert(state, id);
        Ok(id)
    }

    pub(crate) fn depth_stencil_state(
        &mut self,
        device: &mut dyn RenderDevice,
        desc: &DepthStencilDesc,
    ) -> RenderResult<DepthStencilStateId> {
        if let Some(id) = self.depth_stencil_states.get(desc) {
            return Ok(*id);
        }
        let id = device.create_depth_stencil_state(desc)?;
        self.depth_stencil_states.insert(*desc, id);
        Ok(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.blend_states.len() + self.depth_stencil_states.len()
    }

    pub(crate) fn clear(&mut self) {
        self.blend_states.clear();
        self.depth_stencil_states.clear();
    }
}
