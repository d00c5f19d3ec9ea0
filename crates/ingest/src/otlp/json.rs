//! OTLP/JSON trace payloads: camelCase keys, hex ids, 64-bit integers that
//! may arrive as strings.

use prism_core::error::{PrismError, Result};
use prism_core::model::span::{Span, SpanStatus, Tags};
use serde::Deserialize;
use uuid::Uuid;

use super::decode::{SERVICE_NAME_KEY, UNKNOWN_SERVICE, nanos_to_micros};

const STATUS_CODE_ERROR: i64 = 2;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracesPayload {
    #[serde(default)]
    pub resource_spans: Vec<ResourceSpans>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpans {
    #[serde(default)]
    pub resource: Option<Resource>,
    #[serde(default)]
    pub scope_spans: Vec<ScopeSpans>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScopeSpans {
    #[serde(default)]
    pub spans: Vec<JsonSpan>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonSpan {
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub span_id: String,
    #[serde(default)]
    pub parent_span_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub start_time_unix_nano: Option<JsonInt>,
    #[serde(default)]
    pub end_time_unix_nano: Option<JsonInt>,
    #[serde(default)]
    pub status: Option<JsonStatus>,
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
}

#[derive(Debug, Default, Deserialize)]
pub struct JsonStatus {
    #[serde(default)]
    pub code: Option<JsonInt>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(default)]
    pub value: AnyValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnyValue {
    pub string_value: Option<String>,
    pub int_value: Option<JsonInt>,
    pub bool_value: Option<bool>,
    pub double_value: Option<f64>,
}

impl AnyValue {
    fn render(&self) -> String {
        if let Some(s) = &self.string_value {
            return s.clone();
        }
        if let Some(i) = &self.int_value {
            return i.value().to_string();
        }
        if let Some(b) = self.bool_value {
            return b.to_string();
        }
        if let Some(d) = self.double_value {
            return d.to_string();
        }
        String::new()
    }
}

/// proto3 JSON writes int64/uint64 as strings; some exporters send numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum JsonInt {
    Int(i64),
    Float(f64),
    Text(String),
}

impl JsonInt {
    pub fn value(&self) -> i64 {
        match self {
            Self::Int(v) => *v,
            Self::Float(v) => *v as i64,
            Self::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }
}

fn nanos(value: Option<&JsonInt>) -> u64 {
    value.map(JsonInt::value).unwrap_or(0).max(0) as u64
}

pub fn decode_json(body: &[u8]) -> Result<Vec<Span>> {
    let payload: TracesPayload = serde_json::from_slice(body)
        .map_err(|e| PrismError::Parse(format!("invalid OTLP/JSON body: {e}")))?;
    Ok(decode_payload(&payload))
}

pub fn decode_payload(payload: &TracesPayload) -> Vec<Span> {
    let mut spans = Vec::new();
    for rs in &payload.resource_spans {
        let service = rs
            .resource
            .as_ref()
            .and_then(|r| r.attributes.iter().find(|kv| kv.key == SERVICE_NAME_KEY))
            .map(|kv| kv.value.render())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNKNOWN_SERVICE.to_string());

        for ss in &rs.scope_spans {
            for span in &ss.spans {
                spans.push(decode_json_span(&service, span));
            }
        }
    }
    spans
}

fn decode_json_span(service: &str, span: &JsonSpan) -> Span {
    let start = nanos(span.start_time_unix_nano.as_ref());
    let end = nanos(span.end_time_unix_nano.as_ref());
    let is_error = span
        .status
        .as_ref()
        .and_then(|s| s.code.as_ref())
        .is_some_and(|c| c.value() == STATUS_CODE_ERROR);

    let tags: Tags = span
        .attributes
        .iter()
        .map(|kv| (kv.key.clone(), serde_json::Value::String(kv.value.render())))
        .collect();

    Span {
        id: Uuid::new_v4().to_string(),
        trace_id: span.trace_id.to_ascii_lowercase(),
        span_id: span.span_id.to_ascii_lowercase(),
        parent_span_id: Some(span.parent_span_id.to_ascii_lowercase()).filter(|p| !p.is_empty()),
        operation: span.name.clone(),
        service_name: service.to_string(),
        start_time: nanos_to_micros(start),
        duration: nanos_to_micros(end.saturating_sub(start)),
        status: if is_error {
            SpanStatus::Error
        } else {
            SpanStatus::Ok
        },
        tags,
    }
}
