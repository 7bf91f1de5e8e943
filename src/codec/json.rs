//! JSON wire format spoken by the native library.
//!
//! Requests are plain JSON strings. Every response is wrapped in an envelope:
//!
//! ```json
//! {"status_code": "Ok", "value": true, "error_message": null}
//! ```
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize};

use crate::{
    custom_strategies::CustomStrategyResults,
    metrics::RawMetricsBucket,
    response::{EvaluationResponse, Status},
    Context, Error, MetricsBucket, Result,
};

use super::EvaluationRequest;

/// JSON pieces of one evaluation call, ready to be handed to the native library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRequest {
    pub toggle_name: String,
    pub context: String,
    pub custom_strategy_results: String,
}

/// Encode `request`, stamping the current time if the context has none.
pub fn encode_request(request: &EvaluationRequest<'_>) -> Result<EncodedRequest> {
    encode_request_at(request, Utc::now())
}

pub(crate) fn encode_request_at(
    request: &EvaluationRequest<'_>,
    now: DateTime<Utc>,
) -> Result<EncodedRequest> {
    request.validate()?;
    Ok(EncodedRequest {
        toggle_name: request.toggle_name.to_owned(),
        context: encode_context(request.context, request.current_time(now))?,
        custom_strategy_results: encode_custom_strategy_results(request.custom_strategy_results)?,
    })
}

fn encode_context(context: &Context, current_time: DateTime<Utc>) -> Result<String> {
    let stamped = Context {
        current_time: Some(current_time),
        ..context.clone()
    };
    serde_json::to_string(&stamped)
        .map_err(|err| Error::InvalidInput(format!("failed to encode context: {err}")))
}

fn encode_custom_strategy_results(results: &CustomStrategyResults) -> Result<String> {
    serde_json::to_string(results).map_err(|err| {
        Error::InvalidInput(format!("failed to encode custom strategy results: {err}"))
    })
}

#[derive(Deserialize)]
struct Envelope<T> {
    status_code: Status,
    value: Option<T>,
    error_message: Option<String>,
}

/// Decode an envelope whose `value` is a `T`.
///
/// `NotFound` and `Error` envelopes decode successfully; malformed JSON is a parse error carrying
/// the raw bytes.
pub fn decode_response<T: DeserializeOwned>(bytes: &[u8]) -> Result<EvaluationResponse<T>> {
    let envelope: Envelope<T> = serde_json::from_slice(bytes)
        .map_err(|err| Error::parse(format!("invalid response envelope: {err}"), bytes))?;

    Ok(match envelope.status_code {
        Status::Ok => EvaluationResponse {
            status: Status::Ok,
            value: envelope.value,
            error_message: None,
            impression_data: false,
        },
        Status::NotFound => EvaluationResponse::not_found(),
        Status::Error => EvaluationResponse::error(
            envelope
                .error_message
                .unwrap_or_else(|| "engine returned an error without a message".to_owned()),
        ),
    })
}

/// Decode the envelope returned by `get_metrics`.
///
/// A `null` value or an empty toggles collection means no activity and yields `None`.
pub fn decode_metrics(bytes: &[u8]) -> Result<Option<MetricsBucket>> {
    match decode_response::<RawMetricsBucket>(bytes)?.into_value()? {
        Some(raw) => raw
            .into_bucket()
            .map_err(|reason| Error::parse(reason, bytes)),
        None => Ok(None),
    }
}

/// Decode the bare JSON array returned by `built_in_strategies`.
pub fn decode_built_in_strategies(bytes: &[u8]) -> Result<Vec<String>> {
    serde_json::from_slice(bytes)
        .map_err(|err| Error::parse(format!("invalid built-in strategy list: {err}"), bytes))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use crate::{
        codec::EvaluationRequest,
        response::{Status, VariantDef},
        Context, Error,
    };

    use super::{decode_metrics, decode_response, encode_request_at};

    #[test]
    fn context_is_camel_case_with_absent_fields_omitted() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let context = Context::new()
            .with_user_id("7")
            .with_property("plan", "pro");
        let results = BTreeMap::from([("customStrategy1".to_owned(), true)]);

        let encoded =
            encode_request_at(&EvaluationRequest::new("toggle", &context, &results), now).unwrap();

        let context: serde_json::Value = serde_json::from_str(&encoded.context).unwrap();
        assert_eq!(
            context,
            json!({
                "userId": "7",
                "currentTime": "2024-01-01T00:00:00Z",
                "properties": {"plan": "pro"},
            })
        );
        assert_eq!(encoded.custom_strategy_results, r#"{"customStrategy1":true}"#);
    }

    #[test]
    fn explicit_current_time_is_kept() {
        let pinned = Utc.with_ymd_and_hms(2020, 5, 5, 5, 5, 5).unwrap();
        let context = Context::new().with_current_time(pinned);
        let results = BTreeMap::new();

        let encoded = encode_request_at(
            &EvaluationRequest::new("toggle", &context, &results),
            Utc::now(),
        )
        .unwrap();

        assert!(encoded.context.contains("2020-05-05T05:05:05Z"));
    }

    #[test]
    fn envelope_statuses() {
        let ok = decode_response::<bool>(br#"{"status_code":"Ok","value":true}"#).unwrap();
        assert_eq!(ok.value, Some(true));

        let not_found =
            decode_response::<bool>(br#"{"status_code":"NotFound","value":null}"#).unwrap();
        assert_eq!(not_found.status, Status::NotFound);

        let error = decode_response::<bool>(
            br#"{"status_code":"Error","value":null,"error_message":"boom"}"#,
        )
        .unwrap();
        assert_eq!(error.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn variant_envelope() {
        let response = decode_response::<VariantDef>(
            br#"{"status_code":"Ok","value":{"name":"red","payload":{"type":"string","value":"r"},"enabled":true,"featureEnabled":true}}"#,
        )
        .unwrap();

        let variant = response.value.unwrap();
        assert_eq!(variant.name, "red");
        assert!(variant.feature_enabled);
        assert_eq!(variant.payload.unwrap().value, "r");
    }

    #[test]
    fn malformed_envelope_keeps_payload() {
        let bytes = br#"{"status_code":"Maybe"}"#;

        match decode_response::<bool>(bytes) {
            Err(Error::Parse { payload, .. }) => assert_eq!(&payload[..], &bytes[..]),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn metrics_without_activity_is_no_bucket() {
        assert_eq!(
            decode_metrics(br#"{"status_code":"Ok","value":null}"#).unwrap(),
            None
        );
        assert_eq!(
            decode_metrics(
                br#"{"status_code":"Ok","value":{"start":"2024-01-01T00:00:00Z","stop":"2024-01-01T00:01:00Z","toggles":{}}}"#
            )
            .unwrap(),
            None
        );
    }

    #[test]
    fn metrics_bucket_is_decoded() {
        let bucket = decode_metrics(
            br#"{"status_code":"Ok","value":{"start":"2024-01-01T00:00:00Z","stop":"2024-01-01T00:01:00Z","toggles":{"a":{"yes":2,"no":1,"variants":{"red":2}}}}}"#,
        )
        .unwrap()
        .unwrap();

        let counts = bucket.toggle("a").unwrap();
        assert_eq!((counts.yes, counts.no), (2, 1));
        assert_eq!(counts.variants["red"], 2);
    }
}
