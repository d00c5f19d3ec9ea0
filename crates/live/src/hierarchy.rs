use std::collections::{HashMap, HashSet};

use prism_core::model::span::Span;
use serde::Serialize;
use tracing::warn;

use crate::timeline::Timeline;

/// A span plus the layout data a Gantt row needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedSpan {
    #[serde(flatten)]
    pub span: Span,
    pub depth: usize,
    pub offset: i64,
    pub render_order: usize,
}

/// `span_id` lookup shared by depth resolution and the service graph.
#[derive(Debug)]
pub struct SpanIndex<'a> {
    by_id: HashMap<&'a str, &'a Span>,
}

impl<'a> SpanIndex<'a> {
    pub fn new(spans: &'a [Span]) -> Self {
        Self {
            by_id: spans.iter().map(|s| (s.span_id.as_str(), s)).collect(),
        }
    }

    pub fn get(&self, span_id: &str) -> Option<&'a Span> {
        self.by_id.get(span_id).copied()
    }

    /// The parent span, if it is referenced and present.
    pub fn parent_of(&self, span: &Span) -> Option<&'a Span> {
        span.parent_span_id.as_deref().and_then(|id| self.get(id))
    }
}

enum WalkEnd {
    /// Last span on the chain has no resolvable parent.
    Root,
    /// Chain reached a span whose depth is already known.
    Known(usize),
    /// Chain loops back on itself or reaches a span that sits on or under a cycle.
    Cycle,
}

#[derive(Debug, Clone, Copy)]
enum Resolved {
    Depth(usize),
    /// On a cycle or descended from one; renders at depth 0.
    Cyclic,
}

/// Memoizing depth calculator over one immutable span set.
pub struct DepthResolver<'a> {
    index: SpanIndex<'a>,
    memo: HashMap<&'a str, Resolved>,
}

impl<'a> DepthResolver<'a> {
    pub fn new(spans: &'a [Span]) -> Self {
        Self {
            index: SpanIndex::new(spans),
            memo: HashMap::with_capacity(spans.len()),
        }
    }

    /// Number of resolvable ancestors. Missing parents and chains that
    /// reach a cycle resolve to 0, whatever order spans are resolved in.
    pub fn depth(&mut self, span: &'a Span) -> usize {
        let start = span.span_id.as_str();
        if let Some(&resolved) = self.memo.get(start) {
            return depth_of(resolved);
        }

        let mut chain: Vec<&'a str> = Vec::new();
        let mut on_chain: HashSet<&'a str> = HashSet::new();
        let mut current = start;
        let mut parent_span = Some(span);

        let end = loop {
            match self.memo.get(current) {
                Some(Resolved::Depth(depth)) => break WalkEnd::Known(*depth),
                Some(Resolved::Cyclic) => break WalkEnd::Cycle,
                None => {}
            }
            if !on_chain.insert(current) {
                break WalkEnd::Cycle;
            }
            chain.push(current);

            match parent_span.and_then(|s| self.index.parent_of(s)) {
                Some(parent) => {
                    current = parent.span_id.as_str();
                    parent_span = Some(parent);
                }
                None => break WalkEnd::Root,
            }
        };

        let len = chain.len();
        match end {
            WalkEnd::Root => {
                for (i, id) in chain.into_iter().enumerate() {
                    self.memo.insert(id, Resolved::Depth(len - 1 - i));
                }
            }
            WalkEnd::Known(base) => {
                for (i, id) in chain.into_iter().enumerate() {
                    self.memo.insert(id, Resolved::Depth(base + (len - i)));
                }
            }
            WalkEnd::Cycle => {
                warn!(
                    trace_id = %span.trace_id,
                    span_id = %span.span_id,
                    chain_len = len,
                    "cyclic parent reference, treating spans as roots"
                );
                for id in chain {
                    self.memo.insert(id, Resolved::Cyclic);
                }
            }
        }

        self.memo.get(start).copied().map_or(0, depth_of)
    }
}

fn depth_of(resolved: Resolved) -> usize {
    match resolved {
        Resolved::Depth(depth) => depth,
        Resolved::Cyclic => 0,
    }
}

/// Depth of every span, aligned with the input order.
pub fn resolve_depths(spans: &[Span]) -> Vec<usize> {
    let mut resolver = DepthResolver::new(spans);
    spans.iter().map(|s| resolver.depth(s)).collect()
}

/// Indices into `spans` sorted by `start_time`; equal starts keep arrival order.
pub fn render_order(spans: &[Span]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..spans.len()).collect();
    order.sort_by_key(|&i| spans[i].start_time);
    order
}

/// Produces the Gantt rows for one snapshot, in render order.
pub fn annotate(spans: &[Span], timeline: &Timeline) -> Vec<AnnotatedSpan> {
    let depths = resolve_depths(spans);
    render_order(spans)
        .into_iter()
        .enumerate()
        .map(|(render_order, i)| AnnotatedSpan {
            span: spans[i].clone(),
            depth: depths[i],
            offset: timeline.offset_of(&spans[i]),
            render_order,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use testkit::{sample_chain, span};

    use super::*;

    #[test]
    fn linear_chain_depths() {
        let spans = sample_chain("t1");
        assert_eq!(resolve_depths(&spans), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn missing_parent_is_root() {
        let spans = vec![
            span("t1", "a", None, "api", 0, 10),
            span("t1", "b", Some("ghost"), "api", 5, 1),
            span("t1", "c", Some("b"), "api", 6, 1),
        ];
        assert_eq!(resolve_depths(&spans), vec![0, 0, 1]);
    }

    #[test]
    fn two_span_cycle_terminates_at_zero() {
        let spans = vec![
            span("t1", "A", Some("B"), "api", 0, 1),
            span("t1", "B", Some("A"), "api", 1, 1),
        ];
        assert_eq!(resolve_depths(&spans), vec![0, 0]);
    }

    #[test]
    fn self_reference_terminates_at_zero() {
        let spans = vec![span("t1", "A", Some("A"), "api", 0, 1)];
        assert_eq!(resolve_depths(&spans), vec![0]);
    }

    #[test]
    fn span_hanging_off_a_cycle_is_root() {
        let spans = vec![
            span("t1", "C", Some("A"), "api", 2, 1),
            span("t1", "A", Some("B"), "api", 0, 1),
            span("t1", "B", Some("A"), "api", 1, 1),
            span("t1", "root", None, "api", 0, 9),
            span("t1", "leaf", Some("root"), "api", 3, 1),
        ];
        assert_eq!(resolve_depths(&spans), vec![0, 0, 0, 0, 1]);
    }

    #[test]
    fn span_hanging_off_a_cycle_is_root_in_any_order() {
        let tail_first = vec![
            span("t1", "C", Some("A"), "api", 2, 1),
            span("t1", "A", Some("B"), "api", 0, 1),
            span("t1", "B", Some("A"), "api", 1, 1),
        ];
        let tail_last = vec![
            span("t1", "A", Some("B"), "api", 0, 1),
            span("t1", "B", Some("A"), "api", 1, 1),
            span("t1", "C", Some("A"), "api", 2, 1),
            span("t1", "D", Some("C"), "api", 3, 1),
        ];
        assert_eq!(resolve_depths(&tail_first), vec![0, 0, 0]);
        assert_eq!(resolve_depths(&tail_last), vec![0, 0, 0, 0]);
    }

    #[test]
    fn memoized_ancestors_extend_correctly() {
        // Children arrive before the deep ancestor chain is walked.
        let spans = vec![
            span("t1", "d", Some("c"), "api", 3, 1),
            span("t1", "b", Some("a"), "api", 1, 1),
            span("t1", "a", None, "api", 0, 9),
            span("t1", "c", Some("b"), "api", 2, 1),
            span("t1", "e", Some("c"), "api", 4, 1),
        ];
        assert_eq!(resolve_depths(&spans), vec![3, 1, 0, 2, 3]);
    }

    #[test]
    fn render_order_is_by_start_then_arrival() {
        let spans = vec![
            span("t1", "late", None, "api", 30, 1),
            span("t1", "tie1", None, "api", 10, 1),
            span("t1", "early", None, "api", 0, 1),
            span("t1", "tie2", None, "api", 10, 1),
        ];
        assert_eq!(render_order(&spans), vec![2, 1, 3, 0]);
    }

    #[test]
    fn annotate_fills_depth_offset_and_order() {
        let mut spans = sample_chain("t1");
        spans.reverse();
        let timeline = Timeline::normalize(&spans).unwrap();
        let rows = annotate(&spans, &timeline);

        let ids: Vec<_> = rows.iter().map(|r| r.span.span_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3", "s4", "s5"]);
        assert_eq!(rows.iter().map(|r| r.depth).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_eq!(
            rows.iter().map(|r| r.offset).collect::<Vec<_>>(),
            vec![0, 50, 250, 275, 400]
        );
        assert_eq!(
            rows.iter().map(|r| r.render_order).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4]
        );
    }
}
