use std::time::Duration;

use prism_core::config::Config;
use prism_core::model::span::Span;
use prism_store::Store;
use tokio::sync::mpsc;
use tracing::warn;

/// Batches spans on their way into the archive.
#[derive(Clone)]
pub struct Pipeline {
    spans_tx: mpsc::Sender<Vec<Span>>,
}

pub struct PipelineConfig {
    pub channel_capacity: usize,
    pub flush_interval: Duration,
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            flush_interval: Duration::from_millis(200),
            batch_size: 1000,
        }
    }
}

impl From<&Config> for PipelineConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            flush_interval: Duration::from_millis(cfg.write_flush_ms.max(1)),
            batch_size: cfg.write_batch_size.max(1),
            ..Self::default()
        }
    }
}

impl Pipeline {
    pub fn new(store: Store, cfg: PipelineConfig) -> Self {
        let (spans_tx, spans_rx) = mpsc::channel(cfg.channel_capacity);
        tokio::spawn(run_span_writer(
            store,
            spans_rx,
            cfg.batch_size,
            cfg.flush_interval,
        ));
        Self { spans_tx }
    }

    pub async fn submit_spans(&self, spans: Vec<Span>) {
        if self.spans_tx.send(spans).await.is_err() {
            warn!("span pipeline dropped batch: receiver closed");
        }
    }
}

async fn run_span_writer(
    store: Store,
    mut rx: mpsc::Receiver<Vec<Span>>,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    let mut buffer = Vec::new();
    loop {
        tokio::select! {
            maybe_batch = rx.recv() => {
                let Some(batch) = maybe_batch else { break };
                buffer.extend(batch);
                if buffer.len() >= batch_size {
                    flush_spans(&store, &mut buffer);
                }
            }
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush_spans(&store, &mut buffer);
                }
            }
        }
    }
    if !buffer.is_empty() {
        flush_spans(&store, &mut buffer);
    }
}

fn flush_spans(store: &Store, buffer: &mut Vec<Span>) {
    if let Err(e) = store.insert_spans(buffer) {
        warn!(error = ?e, count = buffer.len(), "failed to write span batch");
    }
    buffer.clear();
}
