use prism_core::model::graph::ServiceGraph;
use serde::Serialize;

use crate::graph::build_service_graph;
use crate::hierarchy::{AnnotatedSpan, annotate};
use crate::span_store::SpanSnapshot;
use crate::timeline::Timeline;

/// Everything the rendering layer reads for one render tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceView {
    pub trace_id: Option<String>,
    pub spans: Vec<AnnotatedSpan>,
    pub total_duration: i64,
    pub graph: ServiceGraph,
}

impl TraceView {
    pub fn derive(snapshot: &SpanSnapshot) -> Self {
        let spans = snapshot.spans();
        let graph = build_service_graph(spans);
        let (rows, total_duration) = match Timeline::normalize(spans) {
            Some(timeline) => (annotate(spans, &timeline), timeline.total_duration),
            None => (Vec::new(), 0),
        };

        Self {
            trace_id: snapshot.trace_id().map(str::to_string),
            spans: rows,
            total_duration,
            graph,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn span(&self, span_id: &str) -> Option<&AnnotatedSpan> {
        self.spans.iter().find(|s| s.span.span_id == span_id)
    }

    pub fn error_count(&self) -> usize {
        self.spans
            .iter()
            .filter(|s| s.span.status.is_error())
            .count()
    }
}
