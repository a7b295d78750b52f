//! Generation Strategy Registry
//!
//! Binds each dispatchable mode to the pluggable strategy that produces its
//! content. The set is fixed at construction; dispatching a mode nothing was
//! registered for is the same typed error as an unknown mode string.

use crate::dispatch::mode::GenerationMode;
use crate::dispatch::output::GenerationOutput;
use crate::dispatch::request::GenerationContext;
use crate::error::{DispatchError, ProviderError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A pluggable content generator for one mode
#[async_trait]
pub trait GenerationStrategy: Send + Sync {
    /// Strategy name for logs and diagnostics
    fn name(&self) -> &str;

    /// Produce output for one request
    ///
    /// Implementations convert whatever their provider returns into the
    /// uniform [`GenerationOutput`] contract; throttling signals surface as
    /// [`ProviderError::Throttled`].
    async fn generate(&self, ctx: GenerationContext) -> Result<GenerationOutput, ProviderError>;
}

/// Mode-to-strategy table
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: HashMap<GenerationMode, Arc<dyn GenerationStrategy>>,
}

impl StrategyRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a strategy to a mode, replacing any previous binding
    pub fn register(
        mut self,
        mode: GenerationMode,
        strategy: Arc<dyn GenerationStrategy>,
    ) -> Self {
        self.strategies.insert(mode, strategy);
        self
    }

    /// Strategy bound to a mode
    pub fn strategy(
        &self,
        mode: GenerationMode,
    ) -> Result<&Arc<dyn GenerationStrategy>, DispatchError> {
        self.strategies
            .get(&mode)
            .ok_or_else(|| DispatchError::UnsupportedMode(mode.to_string()))
    }

    /// Invoke the strategy for `mode`
    ///
    /// Provider throttling is translated into the uniform upstream error
    /// kind; other strategy failures pass through unchanged.
    pub async fn dispatch(
        &self,
        mode: GenerationMode,
        ctx: GenerationContext,
    ) -> Result<GenerationOutput, DispatchError> {
        let strategy = self.strategy(mode)?;
        debug!(mode = %mode, strategy = strategy.name(), app_id = %ctx.app.id, "dispatching");
        strategy.generate(ctx).await.map_err(DispatchError::from)
    }
}
