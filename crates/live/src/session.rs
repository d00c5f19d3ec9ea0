use prism_core::model::event::StreamEvent;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::span_store::{AppendOutcome, Generation, SharedSpanStore, SpanSnapshot};
use crate::stream::StreamClient;
use crate::view::TraceView;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamStatus {
    #[default]
    Idle,
    Connecting,
    Streaming,
    /// The hub declared the trace finished.
    Complete,
    /// The stream ended without a completion signal.
    ConnectionLost(String),
}

impl StreamStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::ConnectionLost(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionState {
    pub trace_id: Option<String>,
    pub generation: Generation,
    pub status: StreamStatus,
    pub span_count: usize,
}

/// Owns the span store and the one stream task feeding it.
///
/// Opening a trace aborts the previous stream task before clearing the store.
/// A task that still manages one late append is rejected by the generation tag.
pub struct TraceSession {
    client: StreamClient,
    store: SharedSpanStore,
    state_tx: watch::Sender<SessionState>,
    task: Option<JoinHandle<()>>,
}

impl TraceSession {
    pub fn new(client: StreamClient) -> Self {
        let (state_tx, _) = watch::channel(SessionState::default());
        Self {
            client,
            store: SharedSpanStore::new(),
            state_tx,
            task: None,
        }
    }

    pub fn open(&mut self, trace_id: &str) -> Generation {
        self.teardown();

        let generation = self.store.open(trace_id);
        self.state_tx.send_replace(SessionState {
            trace_id: Some(trace_id.to_string()),
            generation,
            status: StreamStatus::Connecting,
            span_count: 0,
        });
        info!(trace_id, generation, "opening trace session");

        let task = tokio::spawn(run_stream(
            self.client.clone(),
            self.store.clone(),
            self.state_tx.clone(),
            trace_id.to_string(),
            generation,
        ));
        self.task = Some(task);
        generation
    }

    /// Stops streaming and empties the store.
    pub fn close(&mut self) {
        self.teardown();
        self.store.clear();
        let generation = self.store.generation();
        self.state_tx.send_replace(SessionState {
            generation,
            ..SessionState::default()
        });
    }

    pub fn snapshot(&self) -> SpanSnapshot {
        self.store.snapshot()
    }

    pub fn view(&self) -> TraceView {
        TraceView::derive(&self.store.snapshot())
    }

    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn teardown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("previous stream task aborted");
        }
    }
}

impl Drop for TraceSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn set_status(
    state_tx: &watch::Sender<SessionState>,
    generation: Generation,
    status: StreamStatus,
    span_count: Option<usize>,
) {
    state_tx.send_if_modified(|state| {
        if state.generation != generation {
            return false;
        }
        let mut changed = false;
        if state.status != status {
            state.status = status;
            changed = true;
        }
        if let Some(count) = span_count
            && state.span_count != count
        {
            state.span_count = count;
            changed = true;
        }
        changed
    });
}

async fn run_stream(
    client: StreamClient,
    store: SharedSpanStore,
    state_tx: watch::Sender<SessionState>,
    trace_id: String,
    generation: Generation,
) {
    let mut stream = match client.connect(&trace_id).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(%trace_id, error = %err, "trace stream failed to open");
            set_status(
                &state_tx,
                generation,
                StreamStatus::ConnectionLost(lost_message(&err.to_string())),
                None,
            );
            return;
        }
    };
    set_status(&state_tx, generation, StreamStatus::Streaming, None);

    loop {
        match stream.next_event().await {
            Ok(Some(StreamEvent::Span(span))) => {
                let span_id = span.span_id.clone();
                match store.append_tagged(generation, span) {
                    (AppendOutcome::StaleGeneration, _) => {
                        debug!(%trace_id, generation, "stream superseded, stopping");
                        return;
                    }
                    (AppendOutcome::ForeignTrace, _) => {
                        warn!(%trace_id, %span_id, "span for another trace ignored");
                    }
                    (_, count) => {
                        set_status(&state_tx, generation, StreamStatus::Streaming, Some(count));
                    }
                }
            }
            Ok(Some(StreamEvent::Complete)) => {
                info!(%trace_id, spans = store.len(), "trace complete");
                set_status(&state_tx, generation, StreamStatus::Complete, None);
                return;
            }
            Ok(None) => {
                warn!(%trace_id, "trace stream closed before completion");
                set_status(
                    &state_tx,
                    generation,
                    StreamStatus::ConnectionLost(lost_message("stream closed")),
                    None,
                );
                return;
            }
            Err(err) => {
                warn!(%trace_id, error = %err, "trace stream error");
                set_status(
                    &state_tx,
                    generation,
                    StreamStatus::ConnectionLost(lost_message(&err.to_string())),
                    None,
                );
                return;
            }
        }
    }
}

fn lost_message(cause: &str) -> String {
    format!("connection lost, trace may be incomplete: {cause}")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::Router;
    use axum::extract::Query;
    use axum::http::header::CONTENT_TYPE;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use prism_core::model::span::SpanStatus;
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;

    #[derive(serde::Deserialize)]
    struct StreamParams {
        #[serde(rename = "traceId")]
        trace_id: String,
    }

    fn wire_span(trace: &str, id: &str, parent: &str, service: &str, start: i64) -> String {
        json!({
            "id": format!("{trace}-{id}"),
            "trace_id": trace,
            "span_id": id,
            "parent_span_id": parent,
            "operation": "op",
            "service_name": service,
            "start_time": start,
            "duration": 10,
            "status": "OK",
            "tags": {}
        })
        .to_string()
    }

    async fn canned_stream(Query(params): Query<StreamParams>) -> impl IntoResponse {
        let t = params.trace_id.as_str();
        let body = match t {
            "done" => format!(
                "data: {}\n\ndata: not json\n\ndata: {}\n\nevent: complete\ndata: {{}}\n\n",
                wire_span(t, "child", "root", "auth-svc", 20),
                wire_span(t, "root", "", "gateway", 0),
            ),
            "cut" => format!("data: {}\n\n", wire_span(t, "root", "", "gateway", 0)),
            _ => format!("data: {}\n\n", wire_span("someone-else", "x", "", "api", 0)),
        };
        ([(CONTENT_TYPE, "text/event-stream")], body)
    }

    async fn spawn_hub() -> String {
        let app = Router::new().route("/traces/stream", get(canned_stream));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn wait_terminal(rx: &mut watch::Receiver<SessionState>) -> SessionState {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.status.is_terminal()))
            .await
            .expect("session never settled")
            .expect("state channel closed")
            .clone()
    }

    #[tokio::test]
    async fn streams_until_complete() {
        let hub = spawn_hub().await;
        let mut session = TraceSession::new(StreamClient::new(hub));
        let mut rx = session.subscribe();

        session.open("done");
        let state = wait_terminal(&mut rx).await;
        assert_eq!(state.status, StreamStatus::Complete);
        assert_eq!(state.trace_id.as_deref(), Some("done"));

        let view = session.view();
        assert_eq!(view.spans.len(), 2);
        assert_eq!(view.span("child").unwrap().depth, 1);
        assert_eq!(view.span("root").unwrap().span.status, SpanStatus::Ok);
        assert_eq!(view.graph.edge("gateway", "auth-svc").unwrap().call_count, 1);
    }

    #[tokio::test]
    async fn early_eof_reports_connection_lost() {
        let hub = spawn_hub().await;
        let mut session = TraceSession::new(StreamClient::new(hub));
        let mut rx = session.subscribe();

        session.open("cut");
        let state = wait_terminal(&mut rx).await;
        let StreamStatus::ConnectionLost(message) = state.status else {
            panic!("expected connection lost, got {:?}", state.status);
        };
        assert!(message.starts_with("connection lost, trace may be incomplete"));
        assert_eq!(session.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn foreign_trace_spans_are_ignored() {
        let hub = spawn_hub().await;
        let mut session = TraceSession::new(StreamClient::new(hub));
        let mut rx = session.subscribe();

        session.open("mine");
        wait_terminal(&mut rx).await;
        assert!(session.snapshot().is_empty());
    }

    #[tokio::test]
    async fn reopening_discards_previous_trace() {
        let hub = spawn_hub().await;
        let mut session = TraceSession::new(StreamClient::new(hub));
        let mut rx = session.subscribe();

        let first = session.open("done");
        wait_terminal(&mut rx).await;
        let second = session.open("cut");
        assert!(second > first);

        let state = wait_terminal(&mut rx).await;
        assert_eq!(state.generation, second);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.trace_id(), Some("cut"));
        assert!(snapshot.spans().iter().all(|s| s.trace_id == "cut"));

        session.close();
        assert!(session.snapshot().is_empty());
        assert_eq!(session.state().status, StreamStatus::Idle);
    }

    #[tokio::test]
    async fn unreachable_hub_reports_connection_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut session = TraceSession::new(StreamClient::new(format!("http://{addr}")));
        let mut rx = session.subscribe();
        session.open("t1");
        let state = wait_terminal(&mut rx).await;
        assert!(matches!(state.status, StreamStatus::ConnectionLost(_)));
    }
}
