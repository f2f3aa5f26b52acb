use thiserror::Error;

/// Errors raised by the render pipeline.
///
/// Configuration and usage errors are programming or content mistakes and are
/// propagated to the caller. Transient errors only affect a single renderable,
/// see [`RenderError::is_transient`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("failed to compile shader {file}: {message}")]
    ShaderCompilation { file: String, message: String },
    #[error("failed to create resource: {0}")]
    ResourceCreation(String),
    #[error("shadow map pool is exhausted")]
    PoolExhausted,
    #[error("attempt to return a shadow map that doesn't belong to this pool")]
    ForeignShadowMap,
    #[error("{outstanding} shadow map slices must be returned before the pool is destroyed")]
    OutstandingShadowMaps { outstanding: usize },
    #[error("invalid usage: {0}")]
    Usage(String),
    #[error("no device is available: {0}")]
    DeviceUnavailable(&'static str),
    #[error("mesh data is not available")]
    MissingMeshData,
    #[error("renderable has no material")]
    MissingMaterial,
}

pub type RenderResult<T> = Result<T, RenderError>;

impl RenderError {
    /// Errors that a single draw may recover from by hiding the offending renderable.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RenderError::ShaderCompilation { .. }
                | RenderError::ResourceCreation(_)
                | RenderError::MissingMaterial
                | RenderError::MissingMeshData
        )
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        RenderError::Configuration(message.into())
    }

    pub(crate) fn usage(message: impl Into<String>) -> Self {
        RenderError::Usage(message.into())
    }
}
