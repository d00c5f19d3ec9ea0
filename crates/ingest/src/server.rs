use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::http::Method;
use prism_core::config::Config;
use prism_core::error::{PrismError, Result};
use prism_store::Store;
use tokio::net::TcpListener;
use tonic::transport::Server;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, warn};

use crate::api::{self, ApiState};
use crate::hub::{HubConfig, TraceHub};
use crate::otlp::grpc::GrpcIngest;
use crate::otlp::http;
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::sink::SpanSink;

const RETENTION_INTERVAL: Duration = Duration::from_secs(60 * 10);

/// Everything the backend serves, wired but not yet bound to sockets.
pub struct Backend {
    pub hub: TraceHub,
    pub store: Option<Store>,
    pub sink: SpanSink,
    pub router: Router,
    pub grpc: GrpcIngest,
}

impl Backend {
    /// Must be called inside a tokio runtime; the archive writer is spawned here.
    pub fn new(cfg: &Config, store: Option<Store>) -> Self {
        let hub = TraceHub::new(HubConfig {
            subscriber_buffer: cfg.subscriber_buffer,
            completion_idle: cfg.completion_idle,
            cache_ttl: cfg.hub_cache_ttl,
        });
        let pipeline = store
            .clone()
            .map(|store| Pipeline::new(store, PipelineConfig::from(cfg)));
        let sink = SpanSink::new(hub.clone(), pipeline);

        let api_state = ApiState {
            hub: hub.clone(),
            store: store.clone(),
            completion_tick: cfg.completion_tick,
        };
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
        let router = http::router(sink.clone())
            .merge(api::router(api_state))
            .layer(cors)
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            );

        Self {
            hub,
            store,
            grpc: GrpcIngest::new(sink.clone()),
            sink,
            router,
        }
    }

    /// Binds both listeners and runs until either server fails.
    pub async fn serve(self, cfg: &Config) -> Result<()> {
        let http_addr = parse_addr("http_addr", &cfg.http_addr)?;
        let grpc_addr = parse_addr("grpc_addr", &cfg.grpc_addr)?;

        let listener = TcpListener::bind(http_addr)
            .await
            .map_err(|e| PrismError::Io(format!("bind HTTP listener {http_addr}: {e}")))?;
        info!(%http_addr, %grpc_addr, "prism backend listening");

        let grpc = self.grpc.clone();
        let grpc_task = tokio::spawn(async move {
            Server::builder()
                .add_service(grpc.traces_service())
                .serve(grpc_addr)
                .await
        });
        let http_task = tokio::spawn(serve_http(listener, self.router));
        let maintenance = tokio::spawn(run_maintenance(
            self.hub,
            self.store,
            cfg.retention_ttl,
            cfg.completion_tick.max(Duration::from_secs(1)),
        ));

        let result = tokio::select! {
            res = grpc_task => {
                let inner = res.map_err(|e| PrismError::Ingest(format!("gRPC task join failed: {e}")))?;
                inner.map_err(|e| PrismError::Ingest(format!("gRPC server failed: {e}")))
            }
            res = http_task => {
                res.map_err(|e| PrismError::Ingest(format!("HTTP task join failed: {e}")))?
            }
        };
        maintenance.abort();
        result
    }
}

fn parse_addr(name: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|e| PrismError::Config(format!("bad {name} {value}: {e}")))
}

pub async fn serve_http(listener: TcpListener, router: Router) -> Result<()> {
    axum::serve(listener, router)
        .await
        .map_err(|e| PrismError::Ingest(format!("HTTP server failed: {e}")))
}

/// Periodic hub eviction and archive retention.
async fn run_maintenance(hub: TraceHub, store: Option<Store>, retention_ttl: Duration, tick: Duration) {
    let mut evict = tokio::time::interval(tick);
    let mut retention = tokio::time::interval(RETENTION_INTERVAL);
    loop {
        tokio::select! {
            _ = evict.tick() => {
                hub.evict_idle();
            }
            _ = retention.tick() => {
                let Some(store) = &store else { continue };
                if let Err(err) = store.prune_ttl(retention_ttl) {
                    warn!(error = %err, "archive retention failed");
                }
            }
        }
    }
}

pub async fn run_servers(cfg: &Config, store: Option<Store>) -> Result<()> {
    Backend::new(cfg, store).serve(cfg).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unparseable_addr() {
        assert!(parse_addr("http_addr", "localhost").is_err());
        assert!(parse_addr("http_addr", "127.0.0.1:7000").is_ok());
    }
}
