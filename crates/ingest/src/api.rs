use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::Stream;
use prism_core::filter::{ServiceFilter, TimeWindow};
use prism_core::model::event::COMPLETE_EVENT;
use prism_core::model::span::Span;
use prism_core::query::{ErrorBody, TracesRequest, TracesResponse};
use prism_core::time::parse_time_or_relative;
use prism_store::Store;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::hub::{SubscriberId, TraceHub};

#[derive(Clone)]
pub struct ApiState {
    pub hub: TraceHub,
    pub store: Option<Store>,
    pub completion_tick: Duration,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/traces/stream", get(stream_trace))
        .route("/traces", get(list_traces))
        .route("/traces/{trace_id}", get(get_trace))
        .route("/status", get(status))
        .with_state(state)
}

fn error(status: StatusCode, message: &str, details: Option<String>) -> Response {
    let body = ErrorBody {
        error: message.to_string(),
        details,
    };
    (status, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    #[serde(rename = "traceId")]
    pub trace_id: Option<String>,
}

/// Removes the subscriber when the SSE body is dropped, which is how axum
/// reports a client disconnect.
struct SubscriptionGuard {
    hub: TraceHub,
    trace_id: String,
    id: SubscriberId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.trace_id, self.id);
    }
}

async fn stream_trace(State(state): State<ApiState>, Query(params): Query<StreamParams>) -> Response {
    let Some(trace_id) = params.trace_id.filter(|t| !t.trim().is_empty()) else {
        return error(StatusCode::BAD_REQUEST, "traceId required", None);
    };
    info!(%trace_id, "trace stream opened");
    Sse::new(trace_events(state.hub, trace_id, state.completion_tick))
        .keep_alive(KeepAlive::default())
        .into_response()
}

enum Step {
    Span(Span),
    Tick,
    Closed,
}

fn trace_events(
    hub: TraceHub,
    trace_id: String,
    tick: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let subscription = hub.subscribe(&trace_id);
        let guard = SubscriptionGuard {
            hub: hub.clone(),
            trace_id: trace_id.clone(),
            id: subscription.id,
        };
        let mut rx = subscription.rx;
        let mut ticker = tokio::time::interval(tick);

        loop {
            let step = tokio::select! {
                biased;
                maybe_span = rx.recv() => match maybe_span {
                    Some(span) => Step::Span(span),
                    None => Step::Closed,
                },
                _ = ticker.tick() => Step::Tick,
            };

            match step {
                Step::Span(span) => match Event::default().json_data(&span) {
                    Ok(event) => yield Ok(event),
                    Err(err) => warn!(%trace_id, error = %err, "failed to encode span event"),
                },
                Step::Tick => {
                    if hub.is_complete(&trace_id) {
                        debug!(%trace_id, "trace complete, closing stream");
                        yield Ok(Event::default().event(COMPLETE_EVENT).data("{}"));
                        break;
                    }
                }
                Step::Closed => break,
            }
        }
        drop(guard);
    }
}

#[derive(Debug, Deserialize)]
pub struct TracesParams {
    pub limit: Option<usize>,
    pub service: Option<String>,
    /// RFC3339 timestamp or a duration back from now, e.g. `15m`.
    pub since: Option<String>,
    pub until: Option<String>,
}

fn parse_window(params: &TracesParams) -> prism_core::Result<TimeWindow> {
    let since = params.since.as_deref().map(parse_time_or_relative).transpose()?;
    let until = params.until.as_deref().map(parse_time_or_relative).transpose()?;
    Ok(TimeWindow { since, until })
}

fn archive(state: &ApiState) -> Result<&Store, Response> {
    state
        .store
        .as_ref()
        .ok_or_else(|| error(StatusCode::SERVICE_UNAVAILABLE, "archive disabled", None))
}

async fn list_traces(State(state): State<ApiState>, Query(params): Query<TracesParams>) -> Response {
    let store = match archive(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    let service = match params.service.as_deref().map(ServiceFilter::parse).transpose() {
        Ok(service) => service,
        Err(err) => return error(StatusCode::BAD_REQUEST, "invalid service filter", Some(err.to_string())),
    };
    let window = match parse_window(&params) {
        Ok(window) => window,
        Err(err) => return error(StatusCode::BAD_REQUEST, "invalid time window", Some(err.to_string())),
    };
    let req = TracesRequest {
        service,
        window,
        limit: TracesRequest::clamp_limit(params.limit),
    };

    match store.list_traces(&req) {
        Ok(traces) => Json(TracesResponse {
            count: traces.len(),
            traces,
        })
        .into_response(),
        Err(err) => {
            warn!(error = %err, "list traces failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, "failed to list traces", Some(err.to_string()))
        }
    }
}

async fn get_trace(State(state): State<ApiState>, Path(trace_id): Path<String>) -> Response {
    let store = match archive(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    match store.get_trace(&trace_id) {
        Ok(Some(trace)) => Json(trace).into_response(),
        Ok(None) => error(StatusCode::NOT_FOUND, "trace not found", None),
        Err(err) => {
            warn!(%trace_id, error = %err, "get trace failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, "failed to load trace", Some(err.to_string()))
        }
    }
}

async fn status(State(state): State<ApiState>) -> Response {
    let store = match archive(&state) {
        Ok(store) => store,
        Err(resp) => return resp,
    };
    match store.status() {
        Ok(status) => Json(status).into_response(),
        Err(err) => error(StatusCode::INTERNAL_SERVER_ERROR, "status failed", Some(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use testkit::sample_chain;
    use tower::ServiceExt;

    use super::*;
    use crate::hub::HubConfig;

    fn api_state(store: Option<Store>) -> ApiState {
        ApiState {
            hub: TraceHub::new(HubConfig::default()),
            store,
            completion_tick: Duration::from_millis(10),
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn stream_requires_trace_id() {
        let (status, body) = get_json(router(api_state(None)), "/traces/stream").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "traceId required");
    }

    #[tokio::test]
    async fn completed_trace_stream_replays_then_completes() {
        let state = ApiState {
            hub: TraceHub::new(HubConfig {
                completion_idle: Duration::from_millis(20),
                ..HubConfig::default()
            }),
            ..api_state(None)
        };
        state.hub.publish_all(sample_chain("t1"));
        tokio::time::sleep(Duration::from_millis(40)).await;

        let response = router(state.clone())
            .oneshot(
                Request::get("/traces/stream?traceId=t1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        assert_eq!(text.matches("data: {\"id\"").count(), 5);
        assert!(text.ends_with("event: complete\ndata: {}\n\n"));
        assert_eq!(state.hub.subscriber_count("t1"), 0);
    }

    #[tokio::test]
    async fn lists_and_fetches_archived_traces() {
        let store = Store::open_in_memory().unwrap();
        store.insert_spans(&sample_chain("t1")).unwrap();
        let app = router(api_state(Some(store)));

        let (status, body) = get_json(app.clone(), "/traces?limit=500").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["traces"][0]["trace_id"], "t1");

        let (status, body) = get_json(app.clone(), "/traces/t1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["spans"].as_array().unwrap().len(), 5);

        let (status, body) = get_json(app.clone(), "/traces/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "trace not found");

        let (status, body) = get_json(app.clone(), "/traces?since=5m").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);

        let (status, body) = get_json(app.clone(), "/traces?until=2000-01-01T00:00:00Z").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);

        let (status, _) = get_json(app.clone(), "/traces?since=yesterday-ish").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get_json(app, "/traces?service=%5B").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn archive_routes_need_a_store() {
        let (status, _) = get_json(router(api_state(None)), "/traces").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
