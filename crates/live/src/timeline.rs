use prism_core::model::span::Span;
use serde::Serialize;

/// Shared zero-based time axis for one snapshot, in the spans' own unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timeline {
    pub min_start: i64,
    /// Largest `offset + duration`; sizes the display area.
    pub total_duration: i64,
}

impl Timeline {
    /// `None` for an empty span set; the caller renders the empty-trace state.
    pub fn normalize(spans: &[Span]) -> Option<Self> {
        let min_start = spans.iter().map(|s| s.start_time).min()?;
        let total_duration = spans
            .iter()
            .map(|s| s.start_time.saturating_sub(min_start).saturating_add(s.duration))
            .max()
            .unwrap_or(0);
        Some(Self {
            min_start,
            total_duration,
        })
    }

    pub fn offset_of(&self, span: &Span) -> i64 {
        span.start_time.saturating_sub(self.min_start)
    }
}
