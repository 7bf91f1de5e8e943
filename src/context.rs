use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Evaluation context passed alongside a toggle name.
///
/// Every field is optional. Absent fields are left out of the request entirely, which the engine
/// reads as "no constraint" rather than as an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    /// Overrides "now" for time-based constraints. When unset, the codec stamps the current time
    /// at encode time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
    /// Free-form properties. Ordered so requests encode deterministically.
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "skip_null_values"
    )]
    pub properties: BTreeMap<String, String>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Context {
        Context::default()
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Context {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Context {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Context {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Context {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn with_current_time(mut self, current_time: DateTime<Utc>) -> Context {
        self.current_time = Some(current_time);
        self
    }

    pub fn with_remote_address(mut self, remote_address: impl Into<String>) -> Context {
        self.remote_address = Some(remote_address.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Context {
        self.properties.insert(key.into(), value.into());
        self
    }
}

// Hosts commonly send `{"key": null}` for unset properties. Those are dropped rather than failing
// the whole context.
fn skip_null_values<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Option<String>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| value.map(|value| (key, value)))
        .collect())
}
