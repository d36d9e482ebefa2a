// src/effects/registry.rs
//! Effect type → handler registry

use crate::effects::handler::EffectHandler;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Registered effect handlers
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn EffectHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `effect_type`, returning the handler it replaced
    pub fn register(
        &self,
        effect_type: impl Into<String>,
        handler: Arc<dyn EffectHandler>,
    ) -> Option<Arc<dyn EffectHandler>> {
        let effect_type = effect_type.into();
        info!("Registering effect handler for '{}'", effect_type);
        self.handlers.insert(effect_type, handler)
    }

    /// Builder-style registration
    pub fn with(self, effect_type: impl Into<String>, handler: impl EffectHandler + 'static) -> Self {
        self.register(effect_type, Arc::new(handler));
        self
    }

    pub fn unregister(&self, effect_type: &str) -> Option<Arc<dyn EffectHandler>> {
        debug!("Removing effect handler for '{}'", effect_type);
        self.handlers.remove(effect_type).map(|(_, h)| h)
    }

    pub fn get(&self, effect_type: &str) -> Option<Arc<dyn EffectHandler>> {
        self.handlers.get(effect_type).map(|h| Arc::clone(h.value()))
    }

    pub fn contains(&self, effect_type: &str) -> bool {
        self.handlers.contains_key(effect_type)
    }

    /// Registered effect types, sorted
    pub fn effect_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.iter().map(|h| h.key().clone()).collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
