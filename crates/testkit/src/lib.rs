use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::any_value::Value;
use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::status::StatusCode;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span as OtlpSpan, Status};
use prism_core::model::span::{Span, SpanStatus, Tags};
use prost::Message;

/// Epoch of the chain scenario, in whatever unit the test treats it as.
pub const CHAIN_BASE: i64 = 1_715_000_000_000;

pub fn span(
    trace_id: &str,
    span_id: &str,
    parent: Option<&str>,
    service: &str,
    start: i64,
    duration: i64,
) -> Span {
    span_with_status(trace_id, span_id, parent, service, start, duration, SpanStatus::Ok)
}

pub fn span_with_status(
    trace_id: &str,
    span_id: &str,
    parent: Option<&str>,
    service: &str,
    start: i64,
    duration: i64,
    status: SpanStatus,
) -> Span {
    Span {
        id: format!("{trace_id}-{span_id}"),
        trace_id: trace_id.to_string(),
        span_id: span_id.to_string(),
        parent_span_id: parent.map(str::to_string),
        operation: format!("{service} {span_id}"),
        service_name: service.to_string(),
        start_time: start,
        duration,
        status,
        tags: Tags::new(),
    }
}

/// gateway -> auth-svc -> user-svc -> user-svc -> db-svc, the last one failing.
pub fn sample_chain(trace_id: &str) -> Vec<Span> {
    vec![
        span(trace_id, "s1", None, "gateway", CHAIN_BASE, 500),
        span(trace_id, "s2", Some("s1"), "auth-svc", CHAIN_BASE + 50, 150),
        span(trace_id, "s3", Some("s2"), "user-svc", CHAIN_BASE + 250, 450),
        span(trace_id, "s4", Some("s3"), "user-svc", CHAIN_BASE + 275, 100),
        span_with_status(
            trace_id,
            "s5",
            Some("s4"),
            "db-svc",
            CHAIN_BASE + 400,
            250,
            SpanStatus::Error,
        ),
    ]
}

pub fn hex_id(byte: u8, len: usize) -> Vec<u8> {
    vec![byte; len]
}

pub fn string_attr(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(Value::StringValue(value.to_string())),
        }),
    }
}

/// One OTLP span with nanosecond timestamps.
pub fn otlp_span(
    trace: u8,
    span: u8,
    parent: Option<u8>,
    name: &str,
    start_nanos: u64,
    end_nanos: u64,
    error: bool,
) -> OtlpSpan {
    OtlpSpan {
        trace_id: hex_id(trace, 16),
        span_id: hex_id(span, 8),
        parent_span_id: parent.map(|p| hex_id(p, 8)).unwrap_or_default(),
        name: name.to_string(),
        start_time_unix_nano: start_nanos,
        end_time_unix_nano: end_nanos,
        attributes: vec![string_attr("http.method", "GET")],
        status: Some(Status {
            code: if error { StatusCode::Error } else { StatusCode::Ok } as i32,
            message: String::new(),
        }),
        ..Default::default()
    }
}

pub fn export_request(service: &str, spans: Vec<OtlpSpan>) -> ExportTraceServiceRequest {
    ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            resource: Some(Resource {
                attributes: vec![string_attr("service.name", service)],
                ..Default::default()
            }),
            scope_spans: vec![ScopeSpans {
                spans,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

pub fn export_request_bytes(service: &str, spans: Vec<OtlpSpan>) -> Vec<u8> {
    export_request(service, spans).encode_to_vec()
}

/// The same request in OTLP/JSON form (hex ids, string nanos).
/// `spans` holds `(span_id, parent, start_nanos, end_nanos, status_code)`.
pub fn export_request_json(
    service: &str,
    trace_id: &str,
    spans: &[(&str, Option<&str>, u64, u64, i32)],
) -> serde_json::Value {
    let spans: Vec<_> = spans
        .iter()
        .map(|(span_id, parent, start, end, code)| {
            serde_json::json!({
                "traceId": trace_id,
                "spanId": span_id,
                "parentSpanId": parent.unwrap_or_default(),
                "name": format!("op-{span_id}"),
                "startTimeUnixNano": start.to_string(),
                "endTimeUnixNano": end.to_string(),
                "status": { "code": code },
                "attributes": [
                    { "key": "http.status_code", "value": { "intValue": "200" } },
                    { "key": "peer", "value": { "stringValue": "db:5432" } }
                ]
            })
        })
        .collect();

    serde_json::json!({
        "resourceSpans": [{
            "resource": {
                "attributes": [{ "key": "service.name", "value": { "stringValue": service } }]
            },
            "scopeSpans": [{ "scope": { "name": "test" }, "spans": spans }]
        }]
    })
}
