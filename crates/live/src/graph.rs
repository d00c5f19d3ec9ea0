use std::collections::HashMap;
use std::collections::hash_map::Entry;

use prism_core::model::graph::{ServiceEdge, ServiceGraph, ServiceMetrics, ServiceNode};
use prism_core::model::span::Span;

use crate::hierarchy::SpanIndex;

/// Aggregates spans into a service dependency graph.
///
/// Nodes appear in the order their service was first seen in `spans`, edges
/// in the order the first call across that pair was seen, so re-deriving from
/// the same snapshot always yields the same sequence.
pub fn build_service_graph(spans: &[Span]) -> ServiceGraph {
    if spans.is_empty() {
        return ServiceGraph::default();
    }

    let index = SpanIndex::new(spans);
    let mut groups: Vec<(&str, Vec<&Span>)> = Vec::new();
    let mut group_slots: HashMap<&str, usize> = HashMap::new();
    let mut edges: Vec<ServiceEdge> = Vec::new();
    let mut edge_slots: HashMap<(&str, &str), usize> = HashMap::new();

    for span in spans {
        let service = span.service_name.as_str();
        let slot = *group_slots.entry(service).or_insert_with(|| {
            groups.push((service, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(span);

        let Some(parent) = index.parent_of(span) else {
            continue;
        };
        let parent_service = parent.service_name.as_str();
        if parent_service == service {
            continue;
        }

        match edge_slots.entry((parent_service, service)) {
            Entry::Occupied(e) => edges[*e.get()].call_count += 1,
            Entry::Vacant(e) => {
                e.insert(edges.len());
                edges.push(ServiceEdge {
                    id: ServiceEdge::edge_id(parent_service, service),
                    source: parent_service.to_string(),
                    target: service.to_string(),
                    call_count: 1,
                });
            }
        }
    }

    let nodes = groups
        .into_iter()
        .map(|(service, members)| ServiceNode {
            id: service.to_string(),
            service_name: service.to_string(),
            metrics: service_metrics(&members),
        })
        .collect();

    ServiceGraph { nodes, edges }
}

pub fn service_metrics(spans: &[&Span]) -> ServiceMetrics {
    if spans.is_empty() {
        return ServiceMetrics::default();
    }

    let mut durations: Vec<i64> = spans.iter().map(|s| s.duration).collect();
    durations.sort_unstable();

    let count = durations.len();
    let sum: i128 = durations.iter().map(|&d| i128::from(d)).sum();
    let errors = spans.iter().filter(|s| s.status.is_error()).count();
    let p95_index = (count as f64 * 0.95).floor() as usize;

    ServiceMetrics {
        total_calls: count,
        avg_latency: (sum as f64 / count as f64).round() as i64,
        error_rate: ((errors as f64 / count as f64) * 100.0).round() as u32,
        p95_latency: durations.get(p95_index).copied().unwrap_or(0),
    }
}
