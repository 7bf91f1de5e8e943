//! The two ways of reaching the engine.
//!
//! A [`Transport`] exposes the engine's entry points one-to-one and takes care of its wire format
//! and buffer ownership. It performs no locking: the [`Engine`](crate::Engine) handle owns the
//! transport and serializes every call.
use std::fmt::Debug;

use chrono::{DateTime, Utc};

use crate::{
    codec::EvaluationRequest,
    response::{EvaluationResponse, StateWarning, ToggleDefinition, VariantDef},
    MetricsBucket, Result,
};

#[cfg(feature = "native")]
pub mod native;
pub mod sandbox;
#[cfg(feature = "wasm")]
pub mod wasm;

/// Engine entry points, independent of how the engine is hosted.
pub trait Transport: Send {
    /// Identifies one live engine instance.
    type Instance: Copy + Send + Debug;

    fn new_engine(&mut self) -> Result<Self::Instance>;

    /// Destroy `instance`. Must be called exactly once per instance, after its last use.
    fn free_engine(&mut self, instance: Self::Instance) -> Result<()>;

    fn take_state(
        &mut self,
        instance: Self::Instance,
        state: &str,
    ) -> Result<EvaluationResponse<Vec<StateWarning>>>;

    /// Current engine state serialized as JSON.
    fn get_state(&mut self, instance: Self::Instance) -> Result<String>;

    fn check_enabled(
        &mut self,
        instance: Self::Instance,
        request: &EvaluationRequest<'_>,
    ) -> Result<EvaluationResponse<bool>>;

    fn check_variant(
        &mut self,
        instance: Self::Instance,
        request: &EvaluationRequest<'_>,
    ) -> Result<EvaluationResponse<VariantDef>>;

    /// Take the counters collected since the previous call. `None` means no activity.
    fn get_metrics(
        &mut self,
        instance: Self::Instance,
        now: DateTime<Utc>,
    ) -> Result<Option<MetricsBucket>>;

    fn list_known_toggles(&mut self, instance: Self::Instance) -> Result<Vec<ToggleDefinition>>;

    /// Names of the strategies the engine evaluates itself. Not tied to an instance.
    fn built_in_strategies(&mut self) -> Result<Vec<String>>;

    /// Version of the engine core. Not tied to an instance.
    fn core_version(&mut self) -> Result<String>;
}
