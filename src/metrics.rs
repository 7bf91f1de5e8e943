//! Usage counters collected by the engine between two metrics fetches.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters for one toggle within a bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureCount {
    pub yes: u32,
    pub no: u32,
    #[serde(default)]
    pub variants: HashMap<String, u32>,
}

/// A window of engine activity.
///
/// `start` and `stop` are assigned by the engine and exposed as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsBucket {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub toggles: HashMap<String, FeatureCount>,
}

impl MetricsBucket {
    /// Counters recorded for `toggle_name`, if it was evaluated within this window.
    pub fn toggle(&self, toggle_name: &str) -> Option<&FeatureCount> {
        self.toggles.get(toggle_name)
    }
}

/// Wire shape shared by both transports: a bucket with an absent or empty toggles collection
/// means "no activity" and decodes to no bucket at all.
#[derive(Debug, Deserialize)]
pub(crate) struct RawMetricsBucket {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    #[serde(default)]
    pub toggles: Option<HashMap<String, FeatureCount>>,
}

impl RawMetricsBucket {
    /// Returns `Err` with a reason when the window bounds are inverted.
    pub(crate) fn into_bucket(self) -> Result<Option<MetricsBucket>, String> {
        if self.start > self.stop {
            return Err(format!(
                "metrics window starts after it stops ({} > {})",
                self.start, self.stop
            ));
        }
        Ok(self
            .toggles
            .filter(|toggles| !toggles.is_empty())
            .map(|toggles| MetricsBucket {
                start: self.start,
                stop: self.stop,
                toggles,
            }))
    }
}
