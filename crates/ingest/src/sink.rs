use prism_core::model::span::Span;
use tracing::debug;

use crate::hub::TraceHub;
use crate::pipeline::Pipeline;

/// Where decoded spans go: live subscribers first, then the archive writer.
#[derive(Clone)]
pub struct SpanSink {
    hub: TraceHub,
    pipeline: Option<Pipeline>,
}

impl SpanSink {
    pub fn new(hub: TraceHub, pipeline: Option<Pipeline>) -> Self {
        Self { hub, pipeline }
    }

    pub fn hub(&self) -> &TraceHub {
        &self.hub
    }

    /// Returns the number of spans accepted.
    pub async fn accept(&self, spans: Vec<Span>, transport: &'static str) -> usize {
        let count = spans.len();
        if count == 0 {
            return 0;
        }
        self.hub.publish_all(spans.iter().cloned());
        if let Some(pipeline) = &self.pipeline {
            pipeline.submit_spans(spans).await;
        }
        debug!(count, transport, "otlp spans accepted");
        count
    }
}
