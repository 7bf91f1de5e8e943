//! Flatbuffer wire format spoken by the sandboxed engine module.
//!
//! Requests are a [`ContextMessage`]; each export answers with its own root table from
//! [`messaging`](super::messaging). An `error` field always wins over the rest of a response, and
//! an evaluation without a result (no `has_enabled`, no variant name) means the toggle is unknown.
//!
//! `take_state` and `get_state` answer with NUL-terminated text instead, see [`decode_take_state`].
use chrono::{DateTime, Utc};
use flatbuffers::{FlatBufferBuilder, Verifiable};

use crate::{
    metrics::{FeatureCount, RawMetricsBucket},
    response::{EvaluationResponse, Payload, StateWarning, ToggleDefinition, VariantDef},
    Error, MetricsBucket, Result,
};

use super::{
    format_time,
    messaging::{
        finish, BuiltInStrategies, ContextMessage, ContextMessageArgs, CoreVersion, FeatureDefs,
        MetricsBucket as MetricsTable, PropertyEntry, Response, Variant,
    },
    EvaluationRequest,
};

/// Encode `request`, stamping the current time if the context has none.
///
/// Encoding must happen once per call: a cached request would carry a stale time.
pub fn encode_request(request: &EvaluationRequest<'_>) -> Result<Vec<u8>> {
    encode_request_at(request, Utc::now())
}

pub(crate) fn encode_request_at(
    request: &EvaluationRequest<'_>,
    now: DateTime<Utc>,
) -> Result<Vec<u8>> {
    request.validate()?;
    let context = request.context;
    let mut fbb = FlatBufferBuilder::with_capacity(256);

    let properties: Vec<_> = context
        .properties
        .iter()
        .map(|(key, value)| PropertyEntry::create(&mut fbb, key, value))
        .collect();
    let properties = (!properties.is_empty()).then(|| fbb.create_vector(&properties));
    let results: Vec<_> = request
        .custom_strategy_results
        .iter()
        .map(|(slot, value)| PropertyEntry::create(&mut fbb, slot, &value.to_string()))
        .collect();
    let custom_strategies_results = (!results.is_empty()).then(|| fbb.create_vector(&results));

    let mut string = |value: Option<&str>| value.map(|value| fbb.create_string(value));
    let args = ContextMessageArgs {
        toggle_name: string(Some(request.toggle_name)),
        user_id: string(context.user_id.as_deref()),
        session_id: string(context.session_id.as_deref()),
        environment: string(context.environment.as_deref()),
        app_name: string(context.app_name.as_deref()),
        current_time: string(Some(&format_time(request.current_time(now)))),
        remote_address: string(context.remote_address.as_deref()),
        properties,
        custom_strategies_results,
    };

    let message = ContextMessage::create(&mut fbb, &args);
    Ok(finish(fbb, message))
}

/// Verify `bytes` as a `T` root. A failed verification is a parse error carrying the payload.
fn root<'a, T>(bytes: &'a [u8]) -> Result<T::Inner>
where
    T: flatbuffers::Follow<'a> + Verifiable + 'a,
{
    flatbuffers::root::<T>(bytes).map_err(|err| Error::parse(err.to_string(), bytes))
}

fn owned(value: Option<&str>) -> String {
    value.map(str::to_owned).unwrap_or_default()
}

/// Decode the response to `check_enabled`.
pub fn decode_enabled(bytes: &[u8]) -> Result<EvaluationResponse<bool>> {
    let response = root::<Response>(bytes)?;
    Ok(match response.error() {
        Some(message) => EvaluationResponse::error(message),
        None if !response.has_enabled() => EvaluationResponse::not_found(),
        None => EvaluationResponse::ok(response.enabled(), response.impression_data()),
    })
}

/// Decode the response to `check_variant`.
pub fn decode_variant(bytes: &[u8]) -> Result<EvaluationResponse<VariantDef>> {
    let variant = root::<Variant>(bytes)?;
    if let Some(message) = variant.error() {
        return Ok(EvaluationResponse::error(message));
    }
    let Some(name) = variant.name() else {
        return Ok(EvaluationResponse::not_found());
    };
    let payload = variant.payload().map(|payload| Payload {
        payload_type: owned(payload.payload_type()),
        value: owned(payload.value()),
    });
    Ok(EvaluationResponse::ok(
        VariantDef {
            name: name.to_owned(),
            payload,
            enabled: variant.enabled(),
            feature_enabled: variant.feature_enabled(),
        },
        variant.impression_data(),
    ))
}

/// Interpret the text `take_state` answers with.
///
/// No text means the state was taken cleanly. A JSON list of warnings means it was taken with
/// warnings; anything else is the engine's reason for rejecting it.
pub fn decode_take_state(text: Option<&str>) -> EvaluationResponse<Vec<StateWarning>> {
    match text.map(str::trim).filter(|text| !text.is_empty()) {
        None => EvaluationResponse::ok(Vec::new(), false),
        Some(text) => match serde_json::from_str::<Vec<StateWarning>>(text) {
            Ok(warnings) => EvaluationResponse::ok(warnings, false),
            Err(_) => EvaluationResponse::error(text),
        },
    }
}

/// Decode the response to `get_metrics`.
///
/// A bucket without toggles means no activity and yields `None`.
pub fn decode_metrics(bytes: &[u8]) -> Result<Option<MetricsBucket>> {
    let bucket = root::<MetricsTable>(bytes)?;
    let Some(entries) = bucket.toggles() else {
        return Ok(None);
    };

    let instant = |millis: i64| {
        DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| Error::parse(format!("timestamp {millis} is out of range"), bytes))
    };
    let toggles = entries
        .iter()
        .map(|entry| {
            let stats = entry.value();
            let variants = stats
                .and_then(|stats| stats.variants())
                .map(|variants| {
                    variants
                        .iter()
                        .map(|variant| (owned(variant.key()), variant.value()))
                        .collect()
                })
                .unwrap_or_default();
            let count = FeatureCount {
                yes: stats.map_or(0, |stats| stats.yes()),
                no: stats.map_or(0, |stats| stats.no()),
                variants,
            };
            (owned(entry.key()), count)
        })
        .collect();

    RawMetricsBucket {
        start: instant(bucket.start())?,
        stop: instant(bucket.stop())?,
        toggles: Some(toggles),
    }
    .into_bucket()
    .map_err(|reason| Error::parse(reason, bytes))
}

/// Decode the response to `list_known_toggles`.
pub fn decode_toggle_definitions(bytes: &[u8]) -> Result<Vec<ToggleDefinition>> {
    let definitions = root::<FeatureDefs>(bytes)?;
    Ok(definitions
        .items()
        .map(|items| {
            items
                .iter()
                .map(|item| ToggleDefinition {
                    name: owned(item.name()),
                    project: item.project().unwrap_or("default").to_owned(),
                    feature_type: item.type_().map(str::to_owned),
                    enabled: item.enabled(),
                })
                .collect()
        })
        .unwrap_or_default())
}

/// Decode the response to `get_built_in_strategies`.
pub fn decode_built_in_strategies(bytes: &[u8]) -> Result<Vec<String>> {
    let strategies = root::<BuiltInStrategies>(bytes)?;
    Ok(strategies
        .values()
        .map(|values| values.iter().map(str::to_owned).collect())
        .unwrap_or_default())
}

/// Decode the response to `get_core_version`.
pub fn decode_core_version(bytes: &[u8]) -> Result<String> {
    root::<CoreVersion>(bytes)?
        .version()
        .map(str::to_owned)
        .ok_or_else(|| Error::Engine("engine did not report its core version".to_owned()))
}
