pub mod state_cache;

pub(crate) use state_cache::SharedStateCache;
