// scene/mod.rs

pub mod bounds;
pub mod components;
pub mod scene;
pub mod transform;

pub use scene::{DebugShapeRenderer, Scene};
pub use transform::Transform;
