//! Application state shared by all handlers.

use std::sync::Arc;

use vistudio_core::{InferencePool, ModelRegistry};

/// Cheap to clone: both members are reference counted.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub pool: InferencePool,
}

impl AppState {
    pub fn new(registry: Arc<ModelRegistry>, pool: InferencePool) -> Self {
        Self { registry, pool }
    }
}
