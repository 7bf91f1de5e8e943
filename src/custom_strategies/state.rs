//! The slice of an engine state payload the strategy planner cares about.
//!
//! Only feature names and their strategy lists are read; everything else in the payload belongs to
//! the engine and is ignored.
use std::collections::HashMap;

use serde::{Deserialize, Deserializer};

/// A strategy as declared on one feature.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StrategyDefinition {
    pub name: String,
    #[serde(default, deserialize_with = "string_parameters")]
    pub parameters: HashMap<String, String>,
}

impl StrategyDefinition {
    pub(crate) fn fallback() -> StrategyDefinition {
        StrategyDefinition {
            name: "fallback".to_owned(),
            parameters: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct FeatureDefinition {
    pub name: String,
    #[serde(default)]
    pub strategies: Vec<StrategyDefinition>,
}

/// `TryParse` lets one malformed entry fail without failing the whole payload.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum TryParse<T> {
    Parsed(T),
    ParseFailed(serde_json::Value),
}

impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(raw) => {
                log::warn!(target: "yggdrasil",
                           feature = raw.get("name").and_then(|name| name.as_str()).unwrap_or("<unnamed>");
                           "skipping malformed feature in state payload");
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub(crate) enum DeltaEvent {
    Hydration {
        #[serde(default)]
        features: Vec<TryParse<FeatureDefinition>>,
    },
    FeatureUpdated {
        feature: TryParse<FeatureDefinition>,
    },
    FeatureRemoved {
        #[serde(rename = "featureName")]
        feature_name: String,
    },
    /// Segment events and anything newer. Segments never change a strategy list.
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct RawState {
    features: Option<Vec<TryParse<FeatureDefinition>>>,
    events: Option<Vec<TryParse<DeltaEvent>>>,
}

/// What a state payload asks the planner to do.
#[derive(Debug)]
pub(crate) enum StateUpdate {
    /// Replace the plan with one built from these features.
    Full(Vec<FeatureDefinition>),
    /// Apply these events on top of the current plan.
    Delta(Vec<DeltaEvent>),
    /// Nothing to plan; keep the current plan.
    Unchanged,
}

/// Interpret a state payload. Fails only when the payload is not a JSON object at all.
pub(crate) fn parse_state(payload: &str) -> Result<StateUpdate, serde_json::Error> {
    let raw: RawState = serde_json::from_str(payload)?;

    Ok(match (raw.features, raw.events) {
        (Some(features), _) => {
            StateUpdate::Full(features.into_iter().filter_map(Option::from).collect())
        }
        (None, Some(events)) => StateUpdate::Delta(
            events
                .into_iter()
                .filter_map(|event| match event {
                    TryParse::Parsed(event) => Some(event),
                    TryParse::ParseFailed(_) => {
                        log::warn!(target: "yggdrasil", "skipping malformed delta event");
                        None
                    }
                })
                .collect(),
        ),
        (None, None) => StateUpdate::Unchanged,
    })
}

// Parameters are strings on the wire, but hand-written states routinely carry numbers and
// booleans. Those are kept in their JSON text form; nulls are dropped.
fn string_parameters<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<HashMap<String, serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(value) => Some((key, value)),
            other => Some((key, other.to_string())),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::{parse_state, DeltaEvent, StateUpdate};

    #[test]
    fn full_state_skips_malformed_features() {
        let update = parse_state(
            r#"{
              "version": 2,
              "features": [
                {"name": "good", "enabled": true, "strategies": [{"name": "custom", "parameters": {"a": "1", "b": 2, "c": null}}]},
                {"enabled": true},
                {"name": "bare"}
              ]
            }"#,
        )
        .unwrap();

        let features = match update {
            StateUpdate::Full(features) => features,
            other => panic!("expected a full update, got {other:?}"),
        };
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].name, "good");
        let parameters = &features[0].strategies[0].parameters;
        assert_eq!(parameters["a"], "1");
        assert_eq!(parameters["b"], "2");
        assert!(!parameters.contains_key("c"));
        assert!(features[1].strategies.is_empty());
    }

    #[test]
    fn delta_events() {
        let update = parse_state(
            r#"{"events": [
              {"type": "feature-updated", "eventId": 1, "feature": {"name": "a", "strategies": []}},
              {"type": "feature-removed", "eventId": 2, "featureName": "b", "project": "default"},
              {"type": "segment-updated", "eventId": 3, "segment": {"id": 1}},
              {"type": "hydration", "eventId": 4, "features": [], "segments": []}
            ]}"#,
        )
        .unwrap();

        let events = match update {
            StateUpdate::Delta(events) => events,
            other => panic!("expected a delta update, got {other:?}"),
        };
        assert!(matches!(events[0], DeltaEvent::FeatureUpdated { .. }));
        assert!(
            matches!(&events[1], DeltaEvent::FeatureRemoved { feature_name } if feature_name == "b")
        );
        assert!(matches!(events[2], DeltaEvent::Other));
        assert!(matches!(events[3], DeltaEvent::Hydration { .. }));
    }

    #[test]
    fn featureless_object_is_unchanged() {
        assert!(matches!(parse_state("{}"), Ok(StateUpdate::Unchanged)));
        assert!(matches!(
            parse_state(r#"{"version": 2}"#),
            Ok(StateUpdate::Unchanged)
        ));
    }

    #[test]
    fn non_object_payloads_fail() {
        assert!(parse_state("[]").is_err());
        assert!(parse_state("not json").is_err());
    }
}
