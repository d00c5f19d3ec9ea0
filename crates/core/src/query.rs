use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::filter::{ServiceFilter, TimeWindow};
use crate::model::span::Span;

pub const DEFAULT_TRACE_LIMIT: usize = 50;
pub const MAX_TRACE_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracesRequest {
    pub service: Option<ServiceFilter>,
    pub window: TimeWindow,
    pub limit: usize,
}

impl Default for TracesRequest {
    fn default() -> Self {
        Self {
            service: None,
            window: TimeWindow::all(),
            limit: DEFAULT_TRACE_LIMIT,
        }
    }
}

impl TracesRequest {
    /// Limits outside `1..=MAX_TRACE_LIMIT` fall back to the default or the cap.
    pub fn clamp_limit(limit: Option<usize>) -> usize {
        match limit {
            None | Some(0) => DEFAULT_TRACE_LIMIT,
            Some(v) => v.min(MAX_TRACE_LIMIT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceListItem {
    pub trace_id: String,
    pub root_operation: Option<String>,
    pub root_service: Option<String>,
    pub span_count: usize,
    pub error_count: usize,
    pub start_time: i64,
    pub duration: i64,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracesResponse {
    pub traces: Vec<TraceListItem>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceResponse {
    pub trace_id: String,
    pub spans: Vec<Span>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub db_path: String,
    pub db_size_bytes: u64,
    pub spans_count: usize,
    pub traces_count: usize,
    pub newest_ingest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
