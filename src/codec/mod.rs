//! Request encoding and response decoding for the two engine wire formats.
//!
//! [`json`] is spoken by the native library, [`binary`] by the sandboxed module, whose flatbuffer
//! tables live in [`messaging`]. Both encode the same [`EvaluationRequest`] and decode into the
//! same response types, so everything above the transport layer is wire-agnostic.
use chrono::{DateTime, SecondsFormat, Utc};

use crate::{custom_strategies::CustomStrategyResults, Context, Error, Result};

pub mod binary;
pub mod json;
pub mod messaging;

/// Everything the engine needs for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationRequest<'a> {
    pub toggle_name: &'a str,
    pub context: &'a Context,
    pub custom_strategy_results: &'a CustomStrategyResults,
}

impl<'a> EvaluationRequest<'a> {
    pub fn new(
        toggle_name: &'a str,
        context: &'a Context,
        custom_strategy_results: &'a CustomStrategyResults,
    ) -> EvaluationRequest<'a> {
        EvaluationRequest {
            toggle_name,
            context,
            custom_strategy_results,
        }
    }

    /// Rejects requests that must never reach the engine.
    pub(crate) fn validate(&self) -> Result<()> {
        validate_toggle_name(self.toggle_name)
    }

    /// Current time as seen by the engine: the context override, or `now`.
    pub(crate) fn current_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.context.current_time.unwrap_or(now)
    }
}

pub(crate) fn validate_toggle_name(toggle_name: &str) -> Result<()> {
    if toggle_name.trim().is_empty() {
        return Err(Error::InvalidInput("toggle name must not be blank".to_owned()));
    }
    Ok(())
}

pub(crate) fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}
