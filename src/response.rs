use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Outcome class of an engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    NotFound,
    Error,
}

/// A decoded engine response.
///
/// `NotFound` and `Error` are valid responses, not decode failures. Only `Ok` carries a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationResponse<T> {
    pub status: Status,
    pub value: Option<T>,
    pub error_message: Option<String>,
    /// Whether the caller should emit an impression event for this evaluation.
    pub impression_data: bool,
}

impl<T> EvaluationResponse<T> {
    pub(crate) fn ok(value: T, impression_data: bool) -> EvaluationResponse<T> {
        EvaluationResponse {
            status: Status::Ok,
            value: Some(value),
            error_message: None,
            impression_data,
        }
    }

    pub(crate) fn not_found() -> EvaluationResponse<T> {
        EvaluationResponse {
            status: Status::NotFound,
            value: None,
            error_message: None,
            impression_data: false,
        }
    }

    pub(crate) fn error(message: impl Into<String>) -> EvaluationResponse<T> {
        EvaluationResponse {
            status: Status::Error,
            value: None,
            error_message: Some(message.into()),
            impression_data: false,
        }
    }

    /// Collapse into the value, turning an engine-reported error into [`Error::Engine`].
    ///
    /// An unknown toggle yields `Ok(None)`, never a default `true`.
    pub fn into_value(self) -> Result<Option<T>> {
        match self.status {
            Status::Ok => Ok(self.value),
            Status::NotFound => Ok(None),
            Status::Error => Err(Error::Engine(
                self.error_message
                    .unwrap_or_else(|| "engine returned an error without a message".to_owned()),
            )),
        }
    }

    pub(crate) fn map<U>(self, f: impl FnOnce(T) -> U) -> EvaluationResponse<U> {
        EvaluationResponse {
            status: self.status,
            value: self.value.map(f),
            error_message: self.error_message,
            impression_data: self.impression_data,
        }
    }
}

/// Variant payload attached to a variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "type")]
    pub payload_type: String,
    pub value: String,
}

/// Variant resolved by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantDef {
    pub name: String,
    #[serde(default)]
    pub payload: Option<Payload>,
    pub enabled: bool,
    /// Whether the toggle owning this variant evaluated to enabled.
    #[serde(default, alias = "feature_enabled")]
    pub feature_enabled: bool,
}

/// Metadata about a toggle currently loaded in the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleDefinition {
    pub name: String,
    #[serde(default)]
    pub project: String,
    #[serde(rename = "type", default)]
    pub feature_type: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

/// Non-fatal problem the engine reported while taking a new state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateWarning {
    pub toggle_name: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use crate::Error;

    use super::{EvaluationResponse, Status};

    #[test]
    fn not_found_is_not_an_error() {
        let response = EvaluationResponse::<bool>::not_found();

        assert_eq!(response.status, Status::NotFound);
        assert_eq!(response.into_value().unwrap(), None);
    }

    #[test]
    fn engine_error_keeps_its_message() {
        let response = EvaluationResponse::<bool>::error("state was never loaded");

        match response.into_value() {
            Err(Error::Engine(message)) => assert_eq!(message, "state was never loaded"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
