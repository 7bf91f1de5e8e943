use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use crate::{
    codec::{validate_toggle_name, EvaluationRequest},
    custom_strategies::CustomStrategiesEvaluator,
    response::{EvaluationResponse, StateWarning, ToggleDefinition, VariantDef},
    transport::Transport,
    Context, EngineConfig, Error, MetricsBucket, Result,
};

/// A live engine instance together with the transport that reaches it.
///
/// Dropping it destroys the instance. Nothing else calls `free_engine`, so destroy happens
/// exactly once.
struct EngineInstance<T: Transport> {
    transport: T,
    instance: T::Instance,
}

impl<T: Transport> EngineInstance<T> {
    fn call<R>(&mut self, f: impl FnOnce(&mut T, T::Instance) -> R) -> R {
        f(&mut self.transport, self.instance)
    }
}

impl<T: Transport> Drop for EngineInstance<T> {
    fn drop(&mut self) {
        match self.transport.free_engine(self.instance) {
            Ok(()) => log::debug!(target: "yggdrasil", "engine {:?} freed", self.instance),
            Err(err) => {
                log::warn!(target: "yggdrasil", "failed to free engine {:?}: {err}", self.instance)
            }
        }
    }
}

/// A handle to one feature-flag engine instance.
///
/// The handle is `Sync`: any number of threads may share it. Calls into the engine are
/// serialized. Custom strategies run before the engine lock is taken.
///
/// # Examples
/// ```no_run
/// # use yggdrasil_bridge::{Context, EngineConfig, transport::native::NativeTransport};
/// # fn main() -> yggdrasil_bridge::Result<()> {
/// let engine = EngineConfig::new().to_engine(NativeTransport::from_env()?)?;
/// engine.take_state(r#"{"version":2,"features":[]}"#)?;
///
/// let context = Context::new().with_user_id("7");
/// if engine.is_enabled("new-checkout", &context)?.unwrap_or(false) {
///     // ...
/// }
/// # Ok(())
/// # }
/// ```
pub struct Engine<T: Transport> {
    inner: Mutex<EngineInstance<T>>,
    custom_strategies: CustomStrategiesEvaluator,
}

impl<T: Transport> Engine<T> {
    /// Create an engine instance on `transport`. [`EngineConfig::to_engine`] is usually more
    /// convenient.
    pub fn new(mut transport: T, config: EngineConfig) -> Result<Engine<T>> {
        let instance = transport.new_engine()?;
        log::debug!(target: "yggdrasil", "engine {instance:?} created");
        let mut inner = EngineInstance {
            transport,
            instance,
        };

        // On failure `inner` is dropped here, which frees the instance.
        let built_in = inner.transport.built_in_strategies()?;

        let custom_strategies = CustomStrategiesEvaluator::new(
            config.custom_strategies,
            config.fallback_strategy,
            built_in,
        );

        Ok(Engine {
            inner: Mutex::new(inner),
            custom_strategies,
        })
    }

    fn lock(&self) -> MutexGuard<'_, EngineInstance<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the engine state with `state` (a full or delta JSON payload) and rebuild the
    /// custom strategy plan from it.
    ///
    /// Returns the warnings for features the engine could only partially understand. An
    /// outright rejection is [`Error::Engine`].
    pub fn take_state(&self, state: &str) -> Result<Vec<StateWarning>> {
        let mut inner = self.lock();
        let response = inner.call(|transport, instance| transport.take_state(instance, state))?;
        // Plan and engine state change under the same lock.
        self.custom_strategies.load_strategies_for(Some(state));
        drop(inner);

        response
            .into_value()
            .map(Option::unwrap_or_default)
            .map_err(|err| {
                log::warn!(target: "yggdrasil", "engine rejected state: {err}");
                err
            })
    }

    /// Current engine state as JSON.
    pub fn get_state(&self) -> Result<String> {
        self.lock()
            .call(|transport, instance| transport.get_state(instance))
    }

    /// Evaluate a toggle, keeping the full response.
    pub fn check_enabled(
        &self,
        toggle_name: &str,
        context: &Context,
    ) -> Result<EvaluationResponse<bool>> {
        validate_toggle_name(toggle_name)?;
        let results = self.custom_strategies.evaluate(toggle_name, context);
        let request = EvaluationRequest::new(toggle_name, context, &results);

        let response = self
            .lock()
            .call(|transport, instance| transport.check_enabled(instance, &request))?;

        log::trace!(target: "yggdrasil",
                    toggle_name,
                    context:serde = context,
                    enabled:serde = response.value;
                    "evaluated toggle");
        Ok(response)
    }

    /// Whether a toggle is enabled for `context`. `None` if the engine does not know the toggle.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] for a blank toggle name. Otherwise only transport failures and
    /// engine-reported errors.
    pub fn is_enabled(&self, toggle_name: &str, context: &Context) -> Result<Option<bool>> {
        self.check_enabled(toggle_name, context)?.into_value()
    }

    /// Resolve the variant of a toggle, keeping the full response.
    pub fn check_variant(
        &self,
        toggle_name: &str,
        context: &Context,
    ) -> Result<EvaluationResponse<VariantDef>> {
        validate_toggle_name(toggle_name)?;
        let results = self.custom_strategies.evaluate(toggle_name, context);
        let request = EvaluationRequest::new(toggle_name, context, &results);

        let response = self
            .lock()
            .call(|transport, instance| transport.check_variant(instance, &request))?;

        log::trace!(target: "yggdrasil",
                    toggle_name,
                    context:serde = context,
                    variant:serde = response.value.as_ref().map(|variant| &variant.name);
                    "resolved variant");
        Ok(response)
    }

    /// The variant of a toggle for `context`. `None` if the engine does not know the toggle.
    pub fn get_variant(&self, toggle_name: &str, context: &Context) -> Result<Option<VariantDef>> {
        self.check_variant(toggle_name, context)?.into_value()
    }

    /// Take the usage counters collected since the previous call. `None` when nothing was
    /// evaluated in between.
    pub fn get_metrics(&self) -> Result<Option<MetricsBucket>> {
        let now = Utc::now();
        self.lock()
            .call(|transport, instance| transport.get_metrics(instance, now))
    }

    /// Toggles known to the engine's current state.
    pub fn list_known_toggles(&self) -> Result<Vec<ToggleDefinition>> {
        self.lock()
            .call(|transport, instance| transport.list_known_toggles(instance))
    }

    /// Strategies the engine evaluates itself.
    pub fn built_in_strategies(&self) -> Result<Vec<String>> {
        self.lock()
            .call(|transport, _| transport.built_in_strategies())
    }

    /// Version of the engine core.
    pub fn core_version(&self) -> Result<semver::Version> {
        let version = self.lock().call(|transport, _| transport.core_version())?;
        semver::Version::parse(version.trim()).map_err(|err| {
            Error::parse(
                format!("engine reported an invalid core version: {err}"),
                version.as_bytes(),
            )
        })
    }

    /// The custom strategy evaluator feeding this engine.
    pub fn custom_strategies(&self) -> &CustomStrategiesEvaluator {
        &self.custom_strategies
    }

    /// Destroy the engine instance now instead of when the handle is dropped.
    pub fn release(self) {
        drop(self);
    }
}
