//! Generation Output Contract
//!
//! The uniform shape every strategy's result is normalized into: either a
//! complete synchronous result, or a lazy sequence of generation events.

use crate::error::ProviderError;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One event of a streamed generation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationEvent {
    /// Event name (e.g. "message", "node_started", "message_end")
    pub name: String,

    /// Event payload
    pub data: serde_json::Value,
}

impl GenerationEvent {
    /// Create an event
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Lazy, non-restartable sequence of generation events
pub type EventStream = BoxStream<'static, Result<GenerationEvent, ProviderError>>;

/// What a strategy produced for one request
pub enum GenerationOutput {
    /// Complete synchronous result
    Complete(serde_json::Value),

    /// Events produced as generation progresses
    Stream(EventStream),
}

impl GenerationOutput {
    /// Wrap an already-materialized event list as a stream
    pub fn from_events(events: Vec<GenerationEvent>) -> Self {
        GenerationOutput::Stream(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }
}

impl fmt::Debug for GenerationOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationOutput::Complete(value) => f.debug_tuple("Complete").field(value).finish(),
            GenerationOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_from_events_preserves_order() {
        let output = GenerationOutput::from_events(vec![
            GenerationEvent::new("message", json!({"delta": "hel"})),
            GenerationEvent::new("message", json!({"delta": "lo"})),
            GenerationEvent::new("message_end", json!({})),
        ]);

        let GenerationOutput::Stream(stream) = output else {
            panic!("expected stream");
        };
        let names: Vec<String> = stream.map(|e| e.unwrap().name).collect().await;
        assert_eq!(names, ["message", "message", "message_end"]);
    }

    #[test]
    fn test_event_round_trips_through_json() {
        let event = GenerationEvent::new("message", json!({"delta": "hi"}));
        let text = serde_json::to_string(&event).unwrap();
        let back: GenerationEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }
}
