pub mod graph;
pub mod hierarchy;
pub mod session;
pub mod span_store;
pub mod sse;
pub mod stream;
pub mod timeline;
pub mod view;

pub use session::{SessionState, StreamStatus, TraceSession};
pub use span_store::{AppendOutcome, Generation, SharedSpanStore, SpanSnapshot, SpanStore};
pub use view::TraceView;
