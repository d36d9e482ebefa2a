// src/effects/handler.rs
//! Effect handler trait

use crate::core::Patch;
use crate::effects::{EffectError, EffectRequest};
use async_trait::async_trait;
use std::future::Future;

/// Executes one effect type
#[async_trait]
pub trait EffectHandler: Send + Sync {
    /// Run the effect and return the patches describing its result
    async fn execute(&self, request: &EffectRequest) -> Result<Vec<Patch>, EffectError>;
}

/// Adapter turning an async closure into an [`EffectHandler`]
pub struct FnHandler<F> {
    f: F,
}

/// Wrap `f` as an effect handler
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(EffectRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Patch>, EffectError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> EffectHandler for FnHandler<F>
where
    F: Fn(EffectRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Patch>, EffectError>> + Send,
{
    async fn execute(&self, request: &EffectRequest) -> Result<Vec<Patch>, EffectError> {
        (self.f)(request.clone()).await
    }
}
