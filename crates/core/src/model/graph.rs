use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMetrics {
    pub total_calls: usize,
    /// Mean span duration, rounded to the nearest whole unit.
    pub avg_latency: i64,
    /// Percentage of spans with status `error`, rounded.
    pub error_rate: u32,
    /// Sorted-index approximation, no interpolation.
    pub p95_latency: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNode {
    pub id: String,
    pub service_name: String,
    pub metrics: ServiceMetrics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub call_count: usize,
}

impl ServiceEdge {
    /// `source->target`, with `\\` and `>` escaped in both names so the
    /// first unescaped `>` always belongs to the separator.
    pub fn edge_id(source: &str, target: &str) -> String {
        format!("{}->{}", escape_edge_part(source), escape_edge_part(target))
    }
}

fn escape_edge_part(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '\\' | '>') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceGraph {
    pub nodes: Vec<ServiceNode>,
    pub edges: Vec<ServiceEdge>,
}

impl ServiceGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, service: &str) -> Option<&ServiceNode> {
        self.nodes.iter().find(|n| n.service_name == service)
    }

    pub fn edge(&self, source: &str, target: &str) -> Option<&ServiceEdge> {
        self.edges
            .iter()
            .find(|e| e.source == source && e.target == target)
    }
}
