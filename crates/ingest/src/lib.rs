pub mod api;
pub mod hub;
pub mod otlp;
pub mod pipeline;
pub mod server;
pub mod sink;

pub use hub::{HubConfig, TraceHub};
pub use server::{Backend, run_servers, serve_http};
pub use sink::SpanSink;
