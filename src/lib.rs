//! Deferred render pipeline core: materials compiled into cached shader
//! variants, entities culled and sorted off-thread, and a fixed sequence of
//! shadow, deferred, transparent, debug and sky steps driving a
//! [`RenderDevice`](renderer::device::RenderDevice).

pub mod error;
pub mod renderer;
pub mod scene;
pub mod settings;

pub use error::{RenderError, RenderResult};
pub use renderer::render_step_manager::RenderStepManager;
pub use settings::RenderSettings;

/// Installs `env_logger` at `info` unless `RUST_LOG` says otherwise. Safe to
/// call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}
