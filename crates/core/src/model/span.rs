use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PrismError, Result};

/// Free-form span metadata. Exposed for inspection, never interpreted.
pub type Tags = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Ok,
    Error,
    #[default]
    Unset,
}

impl SpanStatus {
    /// Case-insensitive; anything that is not `ok` or `error` is `Unset`.
    pub fn parse(input: &str) -> Self {
        match input.trim().to_ascii_lowercase().as_str() {
            "ok" => Self::Ok,
            "error" => Self::Error,
            _ => Self::Unset,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Unset => "unset",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }
}

impl fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SpanStatus {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(SpanStatus::parse).unwrap_or_default())
    }
}

/// One timed unit of work within a trace.
///
/// `start_time` and `duration` carry whatever unit the producer used
/// (microseconds on the wire from the hub, milliseconds from some UIs). All
/// spans of one trace share the unit; nothing in the derivation code assumes
/// which one it is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    #[serde(default)]
    pub id: String,
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, deserialize_with = "deserialize_parent")]
    pub parent_span_id: Option<String>,
    pub operation: String,
    pub service_name: String,
    #[serde(deserialize_with = "deserialize_number")]
    pub start_time: i64,
    #[serde(deserialize_with = "deserialize_number")]
    pub duration: i64,
    #[serde(default)]
    pub status: SpanStatus,
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: Tags,
}

impl Span {
    /// Parses one inbound stream payload.
    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data).map_err(|e| PrismError::Parse(format!("invalid span: {e}")))
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    pub fn end_time(&self) -> i64 {
        self.start_time.saturating_add(self.duration)
    }
}

fn deserialize_parent<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|id| !id.is_empty()))
}

fn deserialize_tags<'de, D>(deserializer: D) -> std::result::Result<Tags, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Tags>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Int(i64),
    Float(f64),
    Text(String),
}

fn deserialize_number<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match RawNumber::deserialize(deserializer)? {
        RawNumber::Int(v) => Ok(v),
        RawNumber::Float(v) if v.is_finite() => Ok(v as i64),
        RawNumber::Float(v) => Err(D::Error::custom(format!("non-finite number {v}"))),
        RawNumber::Text(s) => {
            let trimmed = s.trim();
            if let Ok(v) = trimmed.parse::<i64>() {
                return Ok(v);
            }
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(|v| v as i64)
                .ok_or_else(|| D::Error::custom(format!("expected a number, got {s:?}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_is_case_insensitive() {
        assert_eq!(SpanStatus::parse("OK"), SpanStatus::Ok);
        assert_eq!(SpanStatus::parse("Error"), SpanStatus::Error);
        assert_eq!(SpanStatus::parse("STATUS_CODE_UNSET"), SpanStatus::Unset);
        assert_eq!(SpanStatus::parse(""), SpanStatus::Unset);
    }

    #[test]
    fn parses_wire_span() {
        let span = Span::from_json(
            r#"{"id":"1","trace_id":"t1","span_id":"s2","parent_span_id":"s1",
                "operation":"GET /users","service_name":"user-svc",
                "start_time":1715000000050,"duration":150,"status":"ERROR",
                "tags":{"http.status_code":"500","retries":2}}"#,
        )
        .unwrap();
        assert_eq!(span.parent_span_id.as_deref(), Some("s1"));
        assert_eq!(span.start_time, 1_715_000_000_050);
        assert_eq!(span.end_time(), 1_715_000_000_200);
        assert_eq!(span.status, SpanStatus::Error);
        assert_eq!(span.tags["retries"], serde_json::json!(2));
    }

    #[test]
    fn empty_or_null_parent_is_root() {
        let base = r#""trace_id":"t","span_id":"a","operation":"op","service_name":"svc","start_time":1,"duration":2"#;
        let null_parent = Span::from_json(&format!(r#"{{{base},"parent_span_id":null}}"#)).unwrap();
        let empty_parent = Span::from_json(&format!(r#"{{{base},"parent_span_id":""}}"#)).unwrap();
        let missing = Span::from_json(&format!("{{{base}}}")).unwrap();
        assert!(null_parent.is_root());
        assert!(empty_parent.is_root());
        assert!(missing.is_root());
        assert_eq!(missing.status, SpanStatus::Unset);
        assert!(missing.tags.is_empty());
    }

    #[test]
    fn accepts_string_and_float_numbers() {
        let span = Span::from_json(
            r#"{"trace_id":"t","span_id":"a","operation":"op","service_name":"svc",
                "start_time":"1700000000000000","duration":12.9,"status":"ok","tags":null}"#,
        )
        .unwrap();
        assert_eq!(span.start_time, 1_700_000_000_000_000);
        assert_eq!(span.duration, 12);
        assert_eq!(span.status, SpanStatus::Ok);
    }

    #[test]
    fn rejects_malformed_payload() {
        assert!(Span::from_json("not json").is_err());
        assert!(Span::from_json(r#"{"trace_id":"t"}"#).is_err());
        assert!(
            Span::from_json(
                r#"{"trace_id":"t","span_id":"a","operation":"op","service_name":"svc",
                    "start_time":"soon","duration":1}"#
            )
            .is_err()
        );
    }

    #[test]
    fn serializes_lowercase_status() {
        let span = Span {
            id: "1".into(),
            trace_id: "t".into(),
            span_id: "a".into(),
            parent_span_id: None,
            operation: "op".into(),
            service_name: "svc".into(),
            start_time: 10,
            duration: 5,
            status: SpanStatus::Error,
            tags: Tags::new(),
        };
        let json = serde_json::to_value(&span).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["parent_span_id"], serde_json::Value::Null);
    }
}
