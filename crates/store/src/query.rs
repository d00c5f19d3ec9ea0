use std::collections::HashMap;

use chrono::NaiveDateTime;
use duckdb::{Row, params};
use prism_core::error::{PrismError, Result};
use prism_core::model::span::{Span, SpanStatus, Tags};
use prism_core::query::{TraceListItem, TraceResponse, TracesRequest};

use crate::Store;

const SPAN_COLUMNS: &str = "id, trace_id, span_id, parent_span_id, operation, service_name, \
                            start_time, duration, status, tags_json";

struct TraceRow {
    trace_id: String,
    span_count: usize,
    error_count: usize,
    start_time: i64,
    end_time: i64,
    ingested_at: NaiveDateTime,
}

impl Store {
    /// All archived spans of one trace ordered by start time, `None` when unknown.
    pub fn get_trace(&self, trace_id: &str) -> Result<Option<TraceResponse>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {SPAN_COLUMNS} FROM spans WHERE trace_id = ? ORDER BY start_time ASC, span_id ASC"
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| PrismError::Store(format!("prepare trace spans failed: {e}")))?;

        let rows = stmt
            .query_map(params![trace_id], raw_span)
            .map_err(|e| PrismError::Store(format!("query trace spans failed: {e}")))?;

        let mut spans = Vec::new();
        for row in rows {
            let (span, tags_json) =
                row.map_err(|e| PrismError::Store(format!("map trace span failed: {e}")))?;
            spans.push(with_tags(span, &tags_json)?);
        }

        if spans.is_empty() {
            return Ok(None);
        }
        Ok(Some(TraceResponse {
            trace_id: trace_id.to_string(),
            spans,
        }))
    }

    /// Most recently ingested traces first.
    pub fn list_traces(&self, req: &TracesRequest) -> Result<Vec<TraceListItem>> {
        let conn = self.conn();

        let mut stmt = conn
            .prepare(
                "SELECT trace_id,
                        COUNT(*) AS span_count,
                        COUNT(*) FILTER (WHERE status = 'error') AS error_count,
                        MIN(start_time) AS start_time,
                        MAX(start_time + duration) AS end_time,
                        MAX(ingested_at) AS ingested_at
                 FROM spans
                 GROUP BY trace_id
                 ORDER BY ingested_at DESC, trace_id ASC",
            )
            .map_err(|e| PrismError::Store(format!("prepare traces failed: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TraceRow {
                    trace_id: row.get(0)?,
                    span_count: row.get::<_, i64>(1)? as usize,
                    error_count: row.get::<_, i64>(2)? as usize,
                    start_time: row.get(3)?,
                    end_time: row.get(4)?,
                    ingested_at: row.get(5)?,
                })
            })
            .map_err(|e| PrismError::Store(format!("query traces failed: {e}")))?;
        let mut traces = Vec::new();
        for row in rows {
            traces.push(row.map_err(|e| PrismError::Store(format!("map traces row failed: {e}")))?);
        }

        let mut roots: HashMap<String, (String, String)> = HashMap::new();
        let mut stmt = conn
            .prepare(
                "SELECT trace_id, operation, service_name FROM spans
                 WHERE parent_span_id IS NULL
                 ORDER BY start_time ASC",
            )
            .map_err(|e| PrismError::Store(format!("prepare trace roots failed: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| PrismError::Store(format!("query trace roots failed: {e}")))?;
        for row in rows {
            let (trace_id, operation, service) =
                row.map_err(|e| PrismError::Store(format!("map trace root failed: {e}")))?;
            roots.entry(trace_id).or_insert((operation, service));
        }

        let mut services: HashMap<String, Vec<String>> = HashMap::new();
        if req.service.is_some() {
            let mut stmt = conn
                .prepare("SELECT DISTINCT trace_id, service_name FROM spans")
                .map_err(|e| PrismError::Store(format!("prepare trace services failed: {e}")))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
                .map_err(|e| PrismError::Store(format!("query trace services failed: {e}")))?;
            for row in rows {
                let (trace_id, service) =
                    row.map_err(|e| PrismError::Store(format!("map trace service failed: {e}")))?;
                services.entry(trace_id).or_default().push(service);
            }
        }

        let mut items = Vec::new();
        for trace in traces {
            let ingested_at = trace.ingested_at.and_utc();
            if !req.window.contains(ingested_at) {
                continue;
            }
            if let Some(filter) = &req.service {
                let touches = services
                    .get(&trace.trace_id)
                    .is_some_and(|names| names.iter().any(|s| filter.matches(s)));
                if !touches {
                    continue;
                }
            }

            let root = roots.remove(&trace.trace_id);
            items.push(TraceListItem {
                root_operation: root.as_ref().map(|(op, _)| op.clone()),
                root_service: root.map(|(_, svc)| svc),
                trace_id: trace.trace_id,
                span_count: trace.span_count,
                error_count: trace.error_count,
                start_time: trace.start_time,
                duration: trace.end_time.saturating_sub(trace.start_time),
                ingested_at,
            });
            if items.len() >= req.limit {
                break;
            }
        }
        Ok(items)
    }
}

fn raw_span(row: &Row<'_>) -> duckdb::Result<(Span, String)> {
    let status: String = row.get(8)?;
    let span = Span {
        id: row.get(0)?,
        trace_id: row.get(1)?,
        span_id: row.get(2)?,
        parent_span_id: row.get(3)?,
        operation: row.get(4)?,
        service_name: row.get(5)?,
        start_time: row.get(6)?,
        duration: row.get(7)?,
        status: SpanStatus::parse(&status),
        tags: Tags::new(),
    };
    Ok((span, row.get(9)?))
}

fn with_tags(mut span: Span, tags_json: &str) -> Result<Span> {
    span.tags = serde_json::from_str(tags_json)
        .map_err(|e| PrismError::Store(format!("decode tags of span {} failed: {e}", span.span_id)))?;
    Ok(span)
}

#[cfg(test)]
mod tests {
    use prism_core::filter::ServiceFilter;
    use prism_core::query::TracesRequest;
    use testkit::{sample_chain, span};

    use crate::Store;

    #[test]
    fn unknown_trace_is_none() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_trace("missing").unwrap().is_none());
    }

    #[test]
    fn trace_round_trips_parent_links_and_tags() {
        let store = Store::open_in_memory().unwrap();
        let mut spans = sample_chain("t1");
        spans[1]
            .tags
            .insert("http.status_code".into(), serde_json::json!("200"));
        store.insert_spans(&spans).unwrap();

        let trace = store.get_trace("t1").unwrap().unwrap();
        let ids: Vec<_> = trace.spans.iter().map(|s| s.span_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3", "s4", "s5"]);
        assert!(trace.spans[0].parent_span_id.is_none());
        assert_eq!(trace.spans[1].tags["http.status_code"], "200");
        assert!(trace.spans[4].status.is_error());
    }

    #[test]
    fn lists_trace_summaries() {
        let store = Store::open_in_memory().unwrap();
        store.insert_spans(&sample_chain("t1")).unwrap();
        store
            .insert_spans(&[span("t2", "r", None, "billing", 10, 40)])
            .unwrap();

        let items = store.list_traces(&TracesRequest::default()).unwrap();
        assert_eq!(items.len(), 2);

        let t1 = items.iter().find(|i| i.trace_id == "t1").unwrap();
        assert_eq!(t1.span_count, 5);
        assert_eq!(t1.error_count, 1);
        assert_eq!(t1.root_service.as_deref(), Some("gateway"));
        assert_eq!(t1.start_time, 1_715_000_000_000);
        assert_eq!(t1.duration, 700);
    }

    #[test]
    fn service_glob_and_limit_filter_listing() {
        let store = Store::open_in_memory().unwrap();
        store.insert_spans(&sample_chain("t1")).unwrap();
        store
            .insert_spans(&[span("t2", "r", None, "billing", 10, 40)])
            .unwrap();

        let req = TracesRequest {
            service: Some(ServiceFilter::parse("db-*").unwrap()),
            ..TracesRequest::default()
        };
        let items = store.list_traces(&req).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].trace_id, "t1");

        let req = TracesRequest {
            limit: 1,
            ..TracesRequest::default()
        };
        assert_eq!(store.list_traces(&req).unwrap().len(), 1);
    }

    #[test]
    fn trace_without_root_has_no_root_fields() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_spans(&[span("t3", "child", Some("gone"), "api", 5, 5)])
            .unwrap();
        let items = store.list_traces(&TracesRequest::default()).unwrap();
        assert_eq!(items[0].root_operation, None);
        assert_eq!(items[0].root_service, None);
    }
}
