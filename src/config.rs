use std::sync::Arc;

use crate::{transport::Transport, CustomStrategy, Engine, Result};

/// Configuration for [`Engine`].
#[derive(Default)]
pub struct EngineConfig {
    pub(crate) custom_strategies: Vec<Arc<dyn CustomStrategy>>,
    pub(crate) fallback_strategy: Option<Arc<dyn CustomStrategy>>,
}

impl EngineConfig {
    /// Create a configuration without custom strategies.
    pub fn new() -> EngineConfig {
        EngineConfig::default()
    }

    /// Register a custom strategy. It is evaluated for every feature that declares a strategy
    /// with the same name.
    ///
    /// ```
    /// # use yggdrasil_bridge::{strategy_fn, EngineConfig};
    /// let mut config = EngineConfig::new();
    /// config.custom_strategy(strategy_fn("region", |parameters, context| {
    ///     parameters.get("regions").zip(context.properties.get("region"))
    ///         .is_some_and(|(regions, region)| regions.split(',').any(|r| r == region))
    /// }));
    /// ```
    pub fn custom_strategy(&mut self, strategy: impl CustomStrategy + 'static) -> &mut Self {
        self.custom_strategies.push(Arc::new(strategy));
        self
    }

    /// Register several custom strategies at once.
    pub fn custom_strategies(
        &mut self,
        strategies: impl IntoIterator<Item = Arc<dyn CustomStrategy>>,
    ) -> &mut Self {
        self.custom_strategies.extend(strategies);
        self
    }

    /// Set a strategy that is evaluated for every feature, in addition to its declared ones.
    pub fn fallback_strategy(&mut self, strategy: impl CustomStrategy + 'static) -> &mut Self {
        self.fallback_strategy = Some(Arc::new(strategy));
        self
    }

    /// Create a new [`Engine`] on `transport` using this configuration.
    ///
    /// ```no_run
    /// # use yggdrasil_bridge::{EngineConfig, transport::native::NativeTransport};
    /// # fn main() -> yggdrasil_bridge::Result<()> {
    /// let engine = EngineConfig::new().to_engine(NativeTransport::from_env()?)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn to_engine<T: Transport>(self, transport: T) -> Result<Engine<T>> {
        Engine::new(transport, self)
    }
}
