pub mod camera;
pub mod device;
pub mod entity_renderer;
pub mod features;
pub mod frustum;
pub(crate) mod internal;
pub mod lights;
pub mod material;
pub mod material_manager;
pub mod mesh;
pub mod primitives;
pub mod render_pass;
pub mod render_step;
pub mod render_step_manager;
pub mod renderer_data;
pub mod shadow_map;
pub mod sorters;
pub mod texture;
pub mod vertex;

pub use camera::CameraData;
pub use features::{DebugDisplayMode, RendererFeatures};
