use chrono::Utc;
use duckdb::params;
use prism_core::error::{PrismError, Result};
use prism_core::model::span::Span;

use crate::Store;

impl Store {
    /// Upserts by `(trace_id, span_id)`; a re-sent span replaces the stored one.
    pub fn insert_spans(&self, spans: &[Span]) -> Result<()> {
        if spans.is_empty() {
            return Ok(());
        }

        let ingested_at = crate::db::sql_timestamp(Utc::now());
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| PrismError::Store(format!("begin tx failed: {e}")))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO spans
                     (id, trace_id, span_id, parent_span_id, operation, service_name,
                      start_time, duration, status, tags_json, ingested_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .map_err(|e| PrismError::Store(format!("prepare insert spans failed: {e}")))?;

            for span in spans {
                let tags_json = serde_json::to_string(&span.tags)
                    .map_err(|e| PrismError::Store(format!("encode span tags failed: {e}")))?;
                stmt.execute(params![
                    span.id,
                    span.trace_id,
                    span.span_id,
                    span.parent_span_id,
                    span.operation,
                    span.service_name,
                    span.start_time,
                    span.duration,
                    span.status.as_str(),
                    tags_json,
                    ingested_at,
                ])
                .map_err(|e| PrismError::Store(format!("insert span failed: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| PrismError::Store(format!("commit spans failed: {e}")))
    }
}
