//! In-memory fan-out of freshly ingested spans to live trace viewers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use prism_core::model::span::Span;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::{debug, warn};

pub type SubscriberId = u64;

#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    pub subscriber_buffer: usize,
    /// Quiet period after which a trace with a root span counts as complete.
    pub completion_idle: Duration,
    pub cache_ttl: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 50,
            completion_idle: Duration::from_secs(3),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct TraceEntry {
    spans: Vec<Span>,
    root_seen: bool,
    last_activity: Instant,
}

impl TraceEntry {
    fn new() -> Self {
        Self {
            spans: Vec::new(),
            root_seen: false,
            last_activity: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
struct HubInner {
    subscribers: HashMap<String, Vec<(SubscriberId, mpsc::Sender<Span>)>>,
    traces: HashMap<String, TraceEntry>,
    next_id: SubscriberId,
}

pub struct Subscription {
    pub id: SubscriberId,
    pub trace_id: String,
    pub rx: mpsc::Receiver<Span>,
}

#[derive(Clone)]
pub struct TraceHub {
    inner: Arc<Mutex<HubInner>>,
    config: HubConfig,
}

impl TraceHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner::default())),
            config,
        }
    }

    pub fn config(&self) -> HubConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a subscriber and queues every span already cached for the trace.
    ///
    /// The replay is queued while the hub lock is held, so it always precedes
    /// spans published afterwards.
    pub fn subscribe(&self, trace_id: &str) -> Subscription {
        let mut inner = self.lock();
        let cached: &[Span] = inner
            .traces
            .get(trace_id)
            .map(|t| t.spans.as_slice())
            .unwrap_or_default();

        let (tx, rx) = mpsc::channel(self.config.subscriber_buffer + cached.len());
        for span in cached {
            // Capacity covers the whole replay.
            let _ = tx.try_send(span.clone());
        }
        let replayed = cached.len();

        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .subscribers
            .entry(trace_id.to_string())
            .or_default()
            .push((id, tx));
        debug!(trace_id, subscriber = id, replayed, "trace subscriber added");

        Subscription {
            id,
            trace_id: trace_id.to_string(),
            rx,
        }
    }

    pub fn unsubscribe(&self, trace_id: &str, id: SubscriberId) {
        let mut inner = self.lock();
        if let Some(subs) = inner.subscribers.get_mut(trace_id) {
            subs.retain(|(sub_id, _)| *sub_id != id);
            if subs.is_empty() {
                inner.subscribers.remove(trace_id);
            }
        }
        debug!(trace_id, subscriber = id, "trace subscriber removed");
    }

    pub fn publish(&self, span: Span) {
        let mut inner = self.lock();
        let trace_id = span.trace_id.clone();

        let entry = inner
            .traces
            .entry(trace_id.clone())
            .or_insert_with(TraceEntry::new);
        entry.last_activity = Instant::now();
        if span.is_root() {
            entry.root_seen = true;
        }
        entry.spans.push(span.clone());

        let Some(subs) = inner.subscribers.get_mut(&trace_id) else {
            return;
        };
        subs.retain(|(id, tx)| match tx.try_send(span.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(%trace_id, subscriber = id, span_id = %span.span_id, "subscriber buffer full, span dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    pub fn publish_all(&self, spans: impl IntoIterator<Item = Span>) {
        for span in spans {
            self.publish(span);
        }
    }

    /// A root span was seen and nothing arrived for `completion_idle`.
    pub fn is_complete(&self, trace_id: &str) -> bool {
        self.lock().traces.get(trace_id).is_some_and(|t| {
            t.root_seen && t.last_activity.elapsed() > self.config.completion_idle
        })
    }

    pub fn cached_spans(&self, trace_id: &str) -> usize {
        self.lock().traces.get(trace_id).map_or(0, |t| t.spans.len())
    }

    pub fn subscriber_count(&self, trace_id: &str) -> usize {
        self.lock().subscribers.get(trace_id).map_or(0, Vec::len)
    }

    /// Drops cached traces nobody is watching once they are complete or
    /// have been idle past `cache_ttl`. Returns the number evicted.
    pub fn evict_idle(&self) -> usize {
        let mut inner = self.lock();
        let HubInner {
            subscribers,
            traces,
            ..
        } = &mut *inner;

        let before = traces.len();
        traces.retain(|trace_id, entry| {
            if subscribers.contains_key(trace_id) {
                return true;
            }
            let idle = entry.last_activity.elapsed();
            let complete = entry.root_seen && idle > self.config.completion_idle;
            !complete && idle <= self.config.cache_ttl
        });
        let evicted = before - traces.len();
        if evicted > 0 {
            debug!(evicted, "evicted idle traces from hub cache");
        }
        evicted
    }
}
