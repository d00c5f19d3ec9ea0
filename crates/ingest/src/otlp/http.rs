use std::io::Read;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use flate2::read::GzDecoder;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use prism_core::error::{PrismError, Result};
use prism_core::model::span::Span;
use prism_core::query::ErrorBody;
use prost::Message;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::otlp::decode::decode_request;
use crate::otlp::json::decode_json;
use crate::sink::SpanSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Protobuf,
    Json,
    /// Unknown content type: try protobuf, then JSON.
    Sniff,
}

impl BodyFormat {
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(ct) = content_type else {
            return Self::Sniff;
        };
        let ct = ct.to_ascii_lowercase();
        if ct.contains("application/x-protobuf") || ct.contains("application/protobuf") {
            Self::Protobuf
        } else if ct.contains("application/json") {
            Self::Json
        } else {
            Self::Sniff
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedBody {
    pub accepted: usize,
}

pub fn router(sink: SpanSink) -> Router {
    Router::new()
        .route("/v1/traces", post(export_traces))
        .with_state(sink)
}

async fn export_traces(
    State(sink): State<SpanSink>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let gzip = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));
    debug!(content_type, gzip, bytes = body.len(), "otlp http traces request");

    let spans = match read_body(&body, gzip)
        .and_then(|raw| decode_body(&raw, BodyFormat::from_content_type(content_type)))
    {
        Ok(spans) => spans,
        Err(err) => {
            warn!(error = %err, "otlp http traces decode failed");
            let body = ErrorBody {
                error: "failed to parse OTLP data".to_string(),
                details: Some(err.to_string()),
            };
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    let accepted = sink.accept(spans, "http").await;
    Json(AcceptedBody { accepted }).into_response()
}

fn read_body(body: &[u8], gzip: bool) -> Result<Vec<u8>> {
    if !gzip {
        return Ok(body.to_vec());
    }
    let mut out = Vec::new();
    GzDecoder::new(body)
        .read_to_end(&mut out)
        .map_err(|e| PrismError::Parse(format!("invalid gzip body: {e}")))?;
    Ok(out)
}

pub fn decode_body(body: &[u8], format: BodyFormat) -> Result<Vec<Span>> {
    match format {
        BodyFormat::Protobuf => decode_protobuf(body),
        BodyFormat::Json => decode_json(body),
        BodyFormat::Sniff => decode_protobuf(body).or_else(|_| decode_json(body)),
    }
}

fn decode_protobuf(body: &[u8]) -> Result<Vec<Span>> {
    let req = ExportTraceServiceRequest::decode(body)
        .map_err(|e| PrismError::Parse(format!("invalid OTLP protobuf body: {e}")))?;
    Ok(decode_request(&req))
}
