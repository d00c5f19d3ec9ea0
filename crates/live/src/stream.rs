use std::collections::VecDeque;

use prism_core::error::{PrismError, Result};
use prism_core::model::event::StreamEvent;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tracing::{debug, warn};

use crate::sse::SseDecoder;

/// Opens per-trace span streams against a prism hub.
#[derive(Debug, Clone)]
pub struct StreamClient {
    http: reqwest::Client,
    hub_url: String,
}

impl StreamClient {
    pub fn new(hub_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), hub_url)
    }

    pub fn with_client(http: reqwest::Client, hub_url: impl Into<String>) -> Self {
        let hub_url = hub_url.into().trim_end_matches('/').to_string();
        Self { http, hub_url }
    }

    pub fn stream_url(&self) -> String {
        format!("{}/traces/stream", self.hub_url)
    }

    pub async fn connect(&self, trace_id: &str) -> Result<TraceStream> {
        let response = self
            .http
            .get(self.stream_url())
            .query(&[("traceId", trace_id)])
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| PrismError::Stream(format!("open trace stream: {e}")))?;

        if !response.status().is_success() {
            return Err(PrismError::Stream(format!(
                "trace stream request failed with status {}",
                response.status()
            )));
        }

        debug!(trace_id, "trace stream connected");
        Ok(TraceStream {
            trace_id: trace_id.to_string(),
            response,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
        })
    }
}

/// One open SSE connection. Dropping it closes the connection.
pub struct TraceStream {
    trace_id: String,
    response: reqwest::Response,
    decoder: SseDecoder,
    pending: VecDeque<StreamEvent>,
}

impl TraceStream {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Next event in arrival order, or `None` once the server ends the body.
    ///
    /// Malformed span payloads are logged and skipped.
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            let Some(chunk) = self
                .response
                .chunk()
                .await
                .map_err(|e| PrismError::Stream(format!("read trace stream chunk: {e}")))?
            else {
                return Ok(None);
            };

            for frame in self.decoder.push(&chunk) {
                match StreamEvent::from_frame(frame.event.as_deref(), &frame.data) {
                    Ok(Some(event)) => self.pending.push_back(event),
                    Ok(None) => {
                        debug!(trace_id = %self.trace_id, event = ?frame.event, "ignoring sse event");
                    }
                    Err(err) => {
                        warn!(trace_id = %self.trace_id, error = %err, "dropping malformed span event");
                    }
                }
            }
        }
    }
}
