use std::fmt::Write as _;

use chrono::SecondsFormat;
use owo_colors::OwoColorize;
use prism_core::model::graph::ServiceGraph;
use prism_core::query::{StatusResponse, TraceListItem};
use prism_core::time::TimeUnit;
use prism_live::{StreamStatus, TraceView};

pub const BAR_WIDTH: usize = 48;
const MAX_LABEL: usize = 48;

#[derive(Debug, Clone, Copy)]
pub struct Style {
    pub unit: TimeUnit,
    pub color: bool,
    pub bar_width: usize,
}

impl Style {
    fn red(&self, text: &str) -> String {
        if self.color {
            text.red().to_string()
        } else {
            text.to_string()
        }
    }

    fn dim(&self, text: &str) -> String {
        if self.color {
            text.bright_black().to_string()
        } else {
            text.to_string()
        }
    }

    fn cyan(&self, text: &str) -> String {
        if self.color {
            text.cyan().to_string()
        } else {
            text.to_string()
        }
    }
}

pub fn status_label(status: &StreamStatus) -> String {
    match status {
        StreamStatus::Idle => "idle".to_string(),
        StreamStatus::Connecting => "connecting".to_string(),
        StreamStatus::Streaming => "streaming".to_string(),
        StreamStatus::Complete => "complete".to_string(),
        StreamStatus::ConnectionLost(reason) => reason.clone(),
    }
}

/// Column range of one Gantt bar, always at least one cell wide.
pub fn bar_bounds(offset: i64, duration: i64, total: i64, width: usize) -> (usize, usize) {
    if width == 0 {
        return (0, 0);
    }
    if total <= 0 {
        return (0, 1);
    }
    let scale = |v: i64| (v.clamp(0, total) as i128 * width as i128 / total as i128) as usize;
    let start = scale(offset).min(width - 1);
    let len = scale(duration).max(1).min(width - start);
    (start, len)
}

pub fn render_trace(view: &TraceView, status: Option<&StreamStatus>, style: Style) -> String {
    let mut out = String::new();
    let trace_id = view
        .trace_id
        .as_deref()
        .or_else(|| view.spans.first().map(|row| row.span.trace_id.as_str()))
        .unwrap_or("-");
    let _ = write!(
        out,
        "TRACE {trace_id} spans={} errors={} duration={}",
        view.spans.len(),
        view.error_count(),
        style.unit.format(view.total_duration)
    );
    if let Some(status) = status {
        let _ = write!(out, " status={}", status_label(status));
    }
    out.push('\n');

    if view.is_empty() {
        out.push_str("(no spans yet)\n");
        return out;
    }
    out.push_str(&render_waterfall(view, style));
    out.push('\n');
    out.push_str(&render_service_map(&view.graph, style));
    out
}

pub fn render_waterfall(view: &TraceView, style: Style) -> String {
    let labels: Vec<String> = view
        .spans
        .iter()
        .map(|row| {
            let label = format!("{}{}", "  ".repeat(row.depth), row.span.operation);
            label.chars().take(MAX_LABEL).collect()
        })
        .collect();
    let label_width = labels.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let service_width = view
        .spans
        .iter()
        .map(|row| row.span.service_name.len())
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    for (row, label) in view.spans.iter().zip(&labels) {
        let (start, len) = bar_bounds(
            row.offset,
            row.span.duration,
            view.total_duration,
            style.bar_width,
        );
        let bar = format!(
            "{}{}{}",
            " ".repeat(start),
            "█".repeat(len),
            " ".repeat(style.bar_width - start - len)
        );
        let error = row.span.status.is_error();
        let bar = if error { style.red(&bar) } else { bar };
        let flag = if error { style.red(" ERR") } else { String::new() };
        let _ = writeln!(
            out,
            "{label:<label_width$}  {service} |{bar}| {duration}{flag}",
            service = style.cyan(&format!("{:<service_width$}", row.span.service_name)),
            duration = style.unit.format(row.span.duration),
        );
    }
    out
}

pub fn render_service_map(graph: &ServiceGraph, style: Style) -> String {
    let mut out = String::from("SERVICES\n");
    let width = graph
        .nodes
        .iter()
        .map(|n| n.service_name.len())
        .max()
        .unwrap_or(0);
    for node in &graph.nodes {
        let m = node.metrics;
        let errors = format!("errors={}%", m.error_rate);
        let errors = if m.error_rate > 0 {
            style.red(&errors)
        } else {
            errors
        };
        let _ = writeln!(
            out,
            "  {:<width$} calls={} avg={} p95={} {errors}",
            node.service_name,
            m.total_calls,
            style.unit.format(m.avg_latency),
            style.unit.format(m.p95_latency),
        );
    }

    if !graph.edges.is_empty() {
        out.push_str("CALLS\n");
        for edge in &graph.edges {
            let _ = writeln!(
                out,
                "  {} -> {} calls={}",
                edge.source, edge.target, edge.call_count
            );
        }
    }
    out
}

pub fn render_traces(items: &[TraceListItem], style: Style) -> String {
    let mut out = String::new();
    for item in items {
        let errors = format!("errors={}", item.error_count);
        let errors = if item.error_count > 0 {
            style.red(&errors)
        } else {
            errors
        };
        let _ = writeln!(
            out,
            "trace={} root=\"{}\" service={} spans={} {errors} duration={} {}",
            item.trace_id,
            item.root_operation.as_deref().unwrap_or("-"),
            item.root_service.as_deref().unwrap_or("-"),
            item.span_count,
            style.unit.format(item.duration),
            style.dim(&item.ingested_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
    }
    let _ = writeln!(out, "-- {} traces --", items.len());
    out
}

pub fn print_status_human(v: &StatusResponse) {
    println!("db_path={}", v.db_path);
    println!("db_size_bytes={}", v.db_size_bytes);
    println!("spans={} traces={}", v.spans_count, v.traces_count);
    if let Some(newest) = v.newest_ingest {
        println!(
            "newest={}",
            newest.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
    }
}

#[cfg(test)]
mod tests {
    use prism_live::SpanSnapshot;
    use testkit::sample_chain;

    use super::*;

    fn plain(bar_width: usize) -> Style {
        Style {
            unit: TimeUnit::Micros,
            color: false,
            bar_width,
        }
    }

    #[test]
    fn bars_scale_to_total_duration() {
        assert_eq!(bar_bounds(0, 500, 700, 28), (0, 20));
        assert_eq!(bar_bounds(250, 450, 700, 28), (10, 18));
        assert_eq!(bar_bounds(700, 0, 700, 28), (27, 1));
        assert_eq!(bar_bounds(0, 0, 0, 28), (0, 1));
        assert_eq!(bar_bounds(5, 5, 10, 0), (0, 0));
    }

    #[test]
    fn waterfall_indents_by_depth_and_flags_errors() {
        let view = TraceView::derive(&SpanSnapshot::from_spans(sample_chain("t1")));
        let text = render_waterfall(&view, plain(28));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("gateway s1"));
        assert!(lines[4].starts_with("        db-svc s5"));
        assert!(lines[4].ends_with("0.25ms ERR"));
        assert!(lines[2].contains(&format!("|{}{}|", " ".repeat(10), "█".repeat(18))));
    }

    #[test]
    fn trace_header_and_service_map() {
        let view = TraceView::derive(&SpanSnapshot::from_spans(sample_chain("t1")));
        let text = render_trace(&view, Some(&StreamStatus::Complete), plain(BAR_WIDTH));
        assert!(text.starts_with("TRACE t1 spans=5 errors=1 duration=0.70ms status=complete\n"));
        assert!(text.contains("SERVICES\n"));
        assert!(text.contains("db-svc   calls=1 avg=0.25ms p95=0.25ms errors=100%"));
        assert!(text.contains("  gateway -> auth-svc calls=1\n"));
        assert!(!text.contains("user-svc -> user-svc"));
    }

    #[test]
    fn empty_view_renders_placeholder() {
        let view = TraceView::derive(&SpanSnapshot::default());
        let text = render_trace(&view, None, plain(BAR_WIDTH));
        assert_eq!(text, "TRACE - spans=0 errors=0 duration=0ms\n(no spans yet)\n");
    }

    #[test]
    fn connection_lost_label_is_the_reason() {
        let reason = "connection lost, trace may be incomplete: stream closed";
        let label = status_label(&StreamStatus::ConnectionLost(reason.into()));
        assert_eq!(label, reason);
    }
}
