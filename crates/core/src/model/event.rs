use crate::error::Result;
use crate::model::span::Span;

/// SSE event type that marks the end of a trace.
pub const COMPLETE_EVENT: &str = "complete";

/// Default SSE event type, carried by span payloads.
pub const MESSAGE_EVENT: &str = "message";

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Span(Span),
    Complete,
}

impl StreamEvent {
    /// Interprets one decoded SSE frame. Unknown event types yield `None`.
    pub fn from_frame(event: Option<&str>, data: &str) -> Result<Option<Self>> {
        match event.unwrap_or(MESSAGE_EVENT) {
            COMPLETE_EVENT => Ok(Some(Self::Complete)),
            MESSAGE_EVENT => Span::from_json(data).map(|span| Some(Self::Span(span))),
            _ => Ok(None),
        }
    }
}
