//! Result serialization for ingestion
//!
//! Turns filtered metric families into the flat JSON record batch consumed by
//! the ingestion sink: one record per sample plus exactly one synthetic
//! liveness record ("up") and one agent-identity record per cycle. All
//! records of a cycle share one correlation id. Output is a single compact
//! JSON array with sorted keys (serde_json's default map is ordered).

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::{debug, error};
use uuid::Uuid;

use crate::errors::CheckError;
use crate::exposition::{MetricFamily, Sample};

/// Name of the synthetic record carrying agent identity and payload version.
pub const AGENT_MARKER: &str = "provmon";
/// Name of the synthetic liveness record, used like Prometheus' own `up`.
pub const LIVENESS_MARKER: &str = "up";

pub const PAYLOAD_VERSION: &str = env!("CARGO_PKG_VERSION");

const LABEL_AGENT_VERSION: &str = "AGENT_VERSION";
const LABEL_PROVIDER_INSTANCE: &str = "PROVIDER_INSTANCE";

/// Per-cycle context injected into every record.
#[derive(Debug)]
pub struct RecordContext<'a> {
    /// Stable identity of the monitored target (host component of the URL).
    pub instance: &'a str,
    /// Configured name of the provider instance.
    pub provider_name: &'a str,
    /// Free-form metadata attached to every record.
    pub metadata: &'a Map<String, Value>,
    /// Field name carrying the generation timestamp, per check.
    pub time_generated_field: &'a str,
}

/// Serialize one cycle's filtered families into the wire-contract JSON array.
///
/// `families = None` means the payload could not be parsed; the batch then
/// degrades to a liveness=0 record (plus the agent-identity record) so the
/// outage is still observable downstream.
pub fn serialize_result(
    families: Option<&[MetricFamily]>,
    ctx: &RecordContext<'_>,
) -> Result<String, CheckError> {
    let correlation_id = Uuid::new_v4().to_string();
    let fallback_now = Utc::now();

    let mut records: Vec<Map<String, Value>> = Vec::new();
    let parse_ok = families.is_some();
    if let Some(families) = families {
        for family in families {
            for sample in &family.samples {
                records.push(sample_to_record(sample, ctx, &correlation_id, fallback_now));
            }
        }
    }

    let liveness = Sample {
        name: LIVENESS_MARKER.to_string(),
        labels: BTreeMap::new(),
        value: if parse_ok { 1.0 } else { 0.0 },
        timestamp_ms: None,
    };
    records.push(sample_to_record(&liveness, ctx, &correlation_id, fallback_now));

    let identity = Sample {
        name: AGENT_MARKER.to_string(),
        labels: BTreeMap::from([
            (LABEL_AGENT_VERSION.to_string(), PAYLOAD_VERSION.to_string()),
            (
                LABEL_PROVIDER_INSTANCE.to_string(),
                ctx.provider_name.to_string(),
            ),
        ]),
        value: 1.0,
        timestamp_ms: None,
    };
    records.push(sample_to_record(&identity, ctx, &correlation_id, fallback_now));

    match serde_json::to_string(&records) {
        Ok(json) => {
            debug!(records = records.len(), "serialized result batch");
            Ok(json)
        }
        Err(e) => {
            let preview = format!("{records:?}");
            let preview = &preview[..preview.len().min(1000)];
            error!(error = %e, "could not serialize result batch: {preview}");
            Err(CheckError::Serialization(e.to_string()))
        }
    }
}

fn sample_to_record(
    sample: &Sample,
    ctx: &RecordContext<'_>,
    correlation_id: &str,
    fallback_now: DateTime<Utc>,
) -> Map<String, Value> {
    let time_generated = sample
        .timestamp_ms
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or(fallback_now);

    // Labels are embedded as a compact JSON string with sorted keys, exactly
    // as the ingestion contract expects.
    let labels_json =
        serde_json::to_string(&sample.labels).unwrap_or_else(|_| "{}".to_string());

    let mut record = Map::new();
    record.insert("name".into(), Value::String(sample.name.clone()));
    record.insert("labels".into(), Value::String(labels_json));
    record.insert("value".into(), json_number(sample.value));
    record.insert(
        ctx.time_generated_field.into(),
        Value::String(time_generated.to_rfc3339_opts(SecondsFormat::Micros, true)),
    );
    record.insert("instance".into(), Value::String(ctx.instance.to_string()));
    record.insert("metadata".into(), Value::Object(ctx.metadata.clone()));
    record.insert(
        "correlation_id".into(),
        Value::String(correlation_id.to_string()),
    );
    record
}

// Non-finite values have no JSON representation; they degrade to null rather
// than failing the whole batch.
fn json_number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{self, FilterPatterns};

    fn ctx<'a>(metadata: &'a Map<String, Value>) -> RecordContext<'a> {
        RecordContext {
            instance: "target.example.com:9100",
            provider_name: "node1",
            metadata,
            time_generated_field: "TimeGeneratedPrometheus",
        }
    }

    fn decode(json: &str) -> Vec<Map<String, Value>> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_batch_contains_liveness_and_identity_once() {
        let metadata = Map::new();
        let families =
            filter::filter_metrics("foo_bar 5\nbaz 2\n", &FilterPatterns::default()).unwrap();
        let json = serialize_result(Some(&families), &ctx(&metadata)).unwrap();
        let records = decode(&json);

        assert_eq!(records.len(), 4);
        let liveness: Vec<_> = records
            .iter()
            .filter(|r| r["name"] == LIVENESS_MARKER)
            .collect();
        assert_eq!(liveness.len(), 1);
        assert_eq!(liveness[0]["value"], 1.0);
        let identity: Vec<_> = records
            .iter()
            .filter(|r| r["name"] == AGENT_MARKER)
            .collect();
        assert_eq!(identity.len(), 1);
        let labels: Map<String, Value> =
            serde_json::from_str(identity[0]["labels"].as_str().unwrap()).unwrap();
        assert_eq!(labels["AGENT_VERSION"], PAYLOAD_VERSION);
        assert_eq!(labels["PROVIDER_INSTANCE"], "node1");
    }

    #[test]
    fn test_all_records_share_one_correlation_id() {
        let metadata = Map::new();
        let families = filter::filter_metrics("a 1\nb 2\n", &FilterPatterns::default()).unwrap();
        let json = serialize_result(Some(&families), &ctx(&metadata)).unwrap();
        let records = decode(&json);
        let first = records[0]["correlation_id"].as_str().unwrap();
        assert!(!first.is_empty());
        assert!(records
            .iter()
            .all(|r| r["correlation_id"].as_str().unwrap() == first));
    }

    #[test]
    fn test_parse_failure_degrades_to_liveness_zero() {
        let metadata = Map::new();
        let json = serialize_result(None, &ctx(&metadata)).unwrap();
        let records = decode(&json);

        // Only the synthetic records: liveness=0 plus the agent identity
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["name"], LIVENESS_MARKER);
        assert_eq!(records[0]["value"], 0.0);
        assert_eq!(records[1]["name"], AGENT_MARKER);
    }

    #[test]
    fn test_sample_timestamp_wins_over_fallback() {
        let metadata = Map::new();
        let families = filter::filter_metrics(
            "stamped 1 1395066363000\nunstamped 2\n",
            &FilterPatterns::default(),
        )
        .unwrap();
        let json = serialize_result(Some(&families), &ctx(&metadata)).unwrap();
        let records = decode(&json);
        assert_eq!(
            records[0]["TimeGeneratedPrometheus"],
            "2014-03-17T14:26:03.000000Z"
        );
        // Unstamped sample and the synthetic records share the cycle fallback
        assert_eq!(
            records[1]["TimeGeneratedPrometheus"],
            records[2]["TimeGeneratedPrometheus"]
        );
    }

    #[test]
    fn test_round_trip_preserves_count_and_fields() {
        let mut metadata = Map::new();
        metadata.insert("env".into(), Value::String("prod".into()));
        let families = filter::filter_metrics(
            "m{b=\"2\",a=\"1\"} 7\n",
            &FilterPatterns::default(),
        )
        .unwrap();
        let json = serialize_result(Some(&families), &ctx(&metadata)).unwrap();
        let records = decode(&json);
        assert_eq!(records.len(), 3);
        for record in &records {
            for field in [
                "name",
                "labels",
                "value",
                "TimeGeneratedPrometheus",
                "instance",
                "metadata",
                "correlation_id",
            ] {
                assert!(record.contains_key(field), "missing field {field}");
            }
        }
        // Label keys come out sorted regardless of source order
        assert_eq!(records[0]["labels"], r#"{"a":"1","b":"2"}"#);
    }

    #[test]
    fn test_filter_and_serialize_scenario() {
        let metadata = Map::new();
        let raw = "up 1\nfoo_bar{x=\"1\"} 5\ngo_gc_total 3\n";
        let families = filter::filter_metrics(raw, &FilterPatterns::default()).unwrap();
        let json = serialize_result(Some(&families), &ctx(&metadata)).unwrap();
        let records = decode(&json);

        let names: Vec<&str> = records.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert!(names.contains(&"foo_bar"));
        assert!(!names.contains(&"go_gc_total"));
        // The target's own up sample, foo_bar, liveness and identity
        assert_eq!(records.len(), 4);
        // The scraped up sample passes the filter untouched, the synthetic
        // liveness record is appended on top of it
        let up_records: Vec<_> = records
            .iter()
            .filter(|r| r["name"] == LIVENESS_MARKER && r["value"] == 1.0)
            .collect();
        assert_eq!(up_records.len(), 2);
    }

    #[test]
    fn test_non_finite_values_degrade_to_null() {
        let metadata = Map::new();
        let families =
            filter::filter_metrics("weird NaN\n", &FilterPatterns::default()).unwrap();
        let json = serialize_result(Some(&families), &ctx(&metadata)).unwrap();
        let records = decode(&json);
        assert_eq!(records[0]["value"], Value::Null);
    }
}
