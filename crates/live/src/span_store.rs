use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use prism_core::model::span::Span;

/// Bumped on every `open`/`clear`; appends carrying an older value are stale.
pub type Generation = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// A span with the same `span_id` was already present and got replaced.
    Replaced,
    /// The append was tagged with a generation that is no longer current.
    StaleGeneration,
    /// The span belongs to a different trace than the one the store is open for.
    ForeignTrace,
}

impl AppendOutcome {
    pub fn accepted(self) -> bool {
        matches!(self, Self::Inserted | Self::Replaced)
    }
}

/// Immutable view of the store at one instant.
///
/// Cloning is cheap; later appends to the store never show up in a snapshot
/// that was already taken.
#[derive(Debug, Clone, Default)]
pub struct SpanSnapshot {
    trace_id: Option<String>,
    generation: Generation,
    spans: Arc<Vec<Span>>,
}

impl SpanSnapshot {
    /// Builds a snapshot from an arbitrary span list with the same
    /// last-write-wins rules the store applies.
    pub fn from_spans(spans: impl IntoIterator<Item = Span>) -> Self {
        let mut store = SpanStore::new();
        for span in spans {
            store.append(span);
        }
        store.snapshot()
    }

    /// Spans in arrival order.
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// Append-only span set for the trace currently being viewed.
#[derive(Debug, Default)]
pub struct SpanStore {
    trace_id: Option<String>,
    generation: Generation,
    spans: Arc<Vec<Span>>,
    slots: HashMap<String, usize>,
}

impl SpanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empties the store and dedicates it to `trace_id`.
    pub fn open(&mut self, trace_id: impl Into<String>) -> Generation {
        self.reset();
        self.trace_id = Some(trace_id.into());
        self.generation
    }

    pub fn clear(&mut self) {
        self.reset();
        self.trace_id = None;
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.spans = Arc::new(Vec::new());
        self.slots.clear();
    }

    /// Last write wins by `span_id`; a replacement keeps the original
    /// arrival slot.
    pub fn append(&mut self, span: Span) -> AppendOutcome {
        let spans = Arc::make_mut(&mut self.spans);
        if let Some(&slot) = self.slots.get(&span.span_id) {
            spans[slot] = span;
            return AppendOutcome::Replaced;
        }
        self.slots.insert(span.span_id.clone(), spans.len());
        spans.push(span);
        AppendOutcome::Inserted
    }

    pub fn append_tagged(&mut self, generation: Generation, span: Span) -> AppendOutcome {
        if generation != self.generation {
            return AppendOutcome::StaleGeneration;
        }
        if let Some(trace_id) = &self.trace_id
            && *trace_id != span.trace_id
        {
            return AppendOutcome::ForeignTrace;
        }
        self.append(span)
    }

    pub fn snapshot(&self) -> SpanSnapshot {
        SpanSnapshot {
            trace_id: self.trace_id.clone(),
            generation: self.generation,
            spans: Arc::clone(&self.spans),
        }
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// Thread-safe handle to a [`SpanStore`]; `append` and `snapshot` never
/// interleave.
#[derive(Debug, Clone, Default)]
pub struct SharedSpanStore {
    inner: Arc<Mutex<SpanStore>>,
}

impl SharedSpanStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SpanStore> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn open(&self, trace_id: impl Into<String>) -> Generation {
        self.lock().open(trace_id)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn append(&self, span: Span) -> AppendOutcome {
        self.lock().append(span)
    }

    /// Appends and reports the resulting span count under the same lock.
    pub fn append_tagged(&self, generation: Generation, span: Span) -> (AppendOutcome, usize) {
        let mut store = self.lock();
        let outcome = store.append_tagged(generation, span);
        (outcome, store.len())
    }

    pub fn snapshot(&self) -> SpanSnapshot {
        self.lock().snapshot()
    }

    pub fn generation(&self) -> Generation {
        self.lock().generation()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
