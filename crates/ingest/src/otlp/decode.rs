use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::any_value::Value;
use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::Span as OtlpSpan;
use opentelemetry_proto::tonic::trace::v1::status::StatusCode;
use prism_core::model::span::{Span, SpanStatus, Tags};
use uuid::Uuid;

pub const SERVICE_NAME_KEY: &str = "service.name";
pub const UNKNOWN_SERVICE: &str = "unknown";

pub fn decode_request(req: &ExportTraceServiceRequest) -> Vec<Span> {
    let mut spans = Vec::new();
    for rs in &req.resource_spans {
        let service = service_name(rs.resource.as_ref());
        for ss in &rs.scope_spans {
            for span in &ss.spans {
                spans.push(decode_span(&service, span));
            }
        }
    }
    spans
}

/// Converts one OTLP span, with nanosecond timestamps scaled to microseconds.
pub fn decode_span(service: &str, span: &OtlpSpan) -> Span {
    let status = match span.status.as_ref() {
        Some(s) if s.code == StatusCode::Error as i32 => SpanStatus::Error,
        _ => SpanStatus::Ok,
    };

    Span {
        id: Uuid::new_v4().to_string(),
        trace_id: bytes_to_hex(&span.trace_id).unwrap_or_default(),
        span_id: bytes_to_hex(&span.span_id).unwrap_or_default(),
        parent_span_id: bytes_to_hex(&span.parent_span_id),
        operation: span.name.clone(),
        service_name: service.to_string(),
        start_time: nanos_to_micros(span.start_time_unix_nano),
        duration: nanos_to_micros(
            span.end_time_unix_nano
                .saturating_sub(span.start_time_unix_nano),
        ),
        status,
        tags: kv_to_tags(&span.attributes),
    }
}

pub fn service_name(resource: Option<&Resource>) -> String {
    resource
        .and_then(|r| r.attributes.iter().find(|kv| kv.key == SERVICE_NAME_KEY))
        .map(|kv| any_value_to_string(kv.value.as_ref()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN_SERVICE.to_string())
}

fn kv_to_tags(attrs: &[KeyValue]) -> Tags {
    attrs
        .iter()
        .map(|kv| {
            (
                kv.key.clone(),
                serde_json::Value::String(any_value_to_string(kv.value.as_ref())),
            )
        })
        .collect()
}

fn any_value_to_string(value: Option<&AnyValue>) -> String {
    value
        .and_then(|v| v.value.as_ref())
        .map(|v| match v {
            Value::StringValue(s) => s.clone(),
            Value::BoolValue(b) => b.to_string(),
            Value::IntValue(i) => i.to_string(),
            Value::DoubleValue(d) => d.to_string(),
            Value::BytesValue(b) => String::from_utf8_lossy(b).to_string(),
            _ => "<complex>".to_string(),
        })
        .unwrap_or_default()
}

fn bytes_to_hex(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    Some(bytes.iter().map(|b| format!("{b:02x}")).collect::<String>())
}

pub(crate) fn nanos_to_micros(nanos: u64) -> i64 {
    i64::try_from(nanos / 1_000).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use opentelemetry_proto::tonic::trace::v1::Span as OtlpSpan;
    use testkit::{export_request, otlp_span};

    use super::*;

    #[test]
    fn decodes_request_with_service_and_micros() {
        let req = export_request(
            "checkout",
            vec![
                otlp_span(
                    1,
                    1,
                    None,
                    "POST /cart",
                    1_700_000_000_000_000_000,
                    1_700_000_000_250_000_000,
                    false,
                ),
                otlp_span(
                    1,
                    2,
                    Some(1),
                    "SELECT cart",
                    1_700_000_000_010_000_000,
                    1_700_000_000_020_000_000,
                    true,
                ),
            ],
        );

        let spans = decode_request(&req);
        assert_eq!(spans.len(), 2);

        let root = &spans[0];
        assert_eq!(root.trace_id, "01010101010101010101010101010101");
        assert_eq!(root.span_id, "0101010101010101");
        assert!(root.is_root());
        assert_eq!(root.service_name, "checkout");
        assert_eq!(root.start_time, 1_700_000_000_000_000);
        assert_eq!(root.duration, 250_000);
        assert_eq!(root.status, SpanStatus::Ok);
        assert_eq!(root.tags["http.method"], "GET");

        let child = &spans[1];
        assert_eq!(child.parent_span_id.as_deref(), Some("0101010101010101"));
        assert_eq!(child.status, SpanStatus::Error);
        assert_eq!(child.duration, 10_000);
        assert_ne!(root.id, child.id);
    }

    #[test]
    fn missing_resource_and_status_fall_back() {
        let span = OtlpSpan {
            trace_id: vec![1; 16],
            span_id: vec![2; 8],
            name: "call".into(),
            start_time_unix_nano: 2_000,
            end_time_unix_nano: 1_000,
            status: None,
            ..Default::default()
        };

        assert_eq!(service_name(None), "unknown");
        let out = decode_span(&service_name(None), &span);
        assert_eq!(out.status, SpanStatus::Ok);
        assert_eq!(out.duration, 0);
        assert!(out.tags.is_empty());
    }
}
