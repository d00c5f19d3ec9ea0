pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS spans (
  id TEXT NOT NULL,
  trace_id TEXT NOT NULL,
  span_id TEXT NOT NULL,
  parent_span_id TEXT,
  operation TEXT NOT NULL,
  service_name TEXT NOT NULL,
  start_time BIGINT NOT NULL,
  duration BIGINT NOT NULL,
  status TEXT NOT NULL,
  tags_json TEXT NOT NULL,
  ingested_at TIMESTAMP NOT NULL,
  PRIMARY KEY(trace_id, span_id)
);

CREATE INDEX IF NOT EXISTS idx_spans_trace ON spans(trace_id);
CREATE INDEX IF NOT EXISTS idx_spans_service ON spans(service_name);
CREATE INDEX IF NOT EXISTS idx_spans_ingested ON spans(ingested_at);
"#;
