use std::collections::HashMap;
use std::io::IsTerminal;
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Utc};
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::trace as sdktrace;
use prism_core::model::span::{Span, SpanStatus, Tags};
use prism_ingest::SpanSink;
use tokio::sync::mpsc;
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Subscriber};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const SELF_SERVICE: &str = "prism";
const SELF_BATCH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfObserveMode {
    Off,
    /// The backend's own spans are published to its hub and archive.
    Hub,
}

impl SelfObserveMode {
    pub fn from_env() -> Self {
        Self::parse(&std::env::var("PRISM_SELF_OBSERVE").unwrap_or_default())
    }

    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" | "hub" => Self::Hub,
            _ => Self::Off,
        }
    }
}

pub fn init_cli_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .compact()
        .try_init();
}

pub fn init_run_tracing(mode: SelfObserveMode, sink: &SpanSink) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .compact();

    let otlp_layer = build_otlp_layer();
    let self_layer = match mode {
        SelfObserveMode::Hub => Some(SelfObserveLayer::new(sink.clone())),
        SelfObserveMode::Off => None,
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otlp_layer)
        .with(self_layer)
        .try_init();
}

pub fn shutdown_tracing() {
    if let Some(provider) = otlp_provider_slot()
        .lock()
        .ok()
        .and_then(|mut slot| slot.take())
    {
        let _ = provider.shutdown();
    }
}

fn build_otlp_layer<S>() -> Option<OpenTelemetryLayer<S, sdktrace::Tracer>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_err() {
        return None;
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()
        .ok()?;

    let provider = sdktrace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .build();
    let tracer = provider.tracer(SELF_SERVICE);

    if let Ok(mut slot) = otlp_provider_slot().lock() {
        *slot = Some(provider);
    }

    Some(tracing_opentelemetry::layer().with_tracer(tracer))
}

fn otlp_provider_slot() -> &'static Mutex<Option<sdktrace::SdkTracerProvider>> {
    static SLOT: OnceLock<Mutex<Option<sdktrace::SdkTracerProvider>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(None))
}

#[derive(Debug, Clone)]
struct SpanStart {
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    name: String,
    started_at: DateTime<Utc>,
    tags: Tags,
    error: bool,
}

impl SpanStart {
    fn finish(self, ended_at: DateTime<Utc>) -> Span {
        let start_time = self.started_at.timestamp_micros();
        Span {
            id: uuid::Uuid::new_v4().to_string(),
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            operation: self.name,
            service_name: SELF_SERVICE.to_string(),
            start_time,
            duration: (ended_at.timestamp_micros() - start_time).max(0),
            status: if self.error {
                SpanStatus::Error
            } else {
                SpanStatus::Ok
            },
            tags: self.tags,
        }
    }
}

/// Turns the process's own `tracing` spans into trace spans, so a running
/// backend can be watched with itself.
#[derive(Clone)]
struct SelfObserveLayer {
    tx: mpsc::UnboundedSender<Span>,
    spans: Arc<Mutex<HashMap<u64, SpanStart>>>,
}

impl SelfObserveLayer {
    /// Must be called inside a tokio runtime.
    fn new(sink: SpanSink) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Span>();
        tokio::spawn(async move {
            while let Some(span) = rx.recv().await {
                let mut batch = vec![span];
                while batch.len() < SELF_BATCH {
                    match rx.try_recv() {
                        Ok(span) => batch.push(span),
                        Err(_) => break,
                    }
                }
                sink.accept(batch, "self").await;
            }
        });
        Self::with_sender(tx)
    }

    fn with_sender(tx: mpsc::UnboundedSender<Span>) -> Self {
        Self {
            tx,
            spans: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<S> Layer<S> for SelfObserveLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let id_u64 = id.into_u64();
        let parent_id = attrs
            .parent()
            .map(Id::into_u64)
            .or_else(|| ctx.lookup_current().map(|s| s.id().into_u64()));

        let Ok(mut map) = self.spans.lock() else {
            return;
        };
        let parent = parent_id.and_then(|pid| map.get(&pid));
        let (trace_id, parent_span_id) = match parent {
            Some(parent) => (parent.trace_id.clone(), Some(parent.span_id.clone())),
            None => (uuid::Uuid::new_v4().simple().to_string(), None),
        };

        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);

        map.insert(
            id_u64,
            SpanStart {
                trace_id,
                span_id: format!("{id_u64:016x}"),
                parent_span_id,
                name: attrs.metadata().name().to_string(),
                started_at: Utc::now(),
                tags: visitor.into_tags(),
                error: false,
            },
        );
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        values.record(&mut visitor);
        if let Ok(mut map) = self.spans.lock()
            && let Some(start) = map.get_mut(&id.into_u64())
        {
            start.tags.extend(visitor.into_tags());
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        if *event.metadata().level() != tracing::Level::ERROR {
            return;
        }
        let Some(current) = ctx.lookup_current() else {
            return;
        };
        if let Ok(mut map) = self.spans.lock()
            && let Some(start) = map.get_mut(&current.id().into_u64())
        {
            start.error = true;
        }
    }

    fn on_close(&self, id: Id, _ctx: Context<'_, S>) {
        let Some(start) = self
            .spans
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&id.into_u64()))
        else {
            return;
        };
        let _ = self.tx.send(start.finish(Utc::now()));
    }
}

#[derive(Default)]
struct FieldVisitor {
    fields: HashMap<String, String>,
}

impl FieldVisitor {
    fn into_tags(self) -> Tags {
        self.fields
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect()
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), format!("{value:?}"));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }
}
