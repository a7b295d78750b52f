//! Streaming Dispatch Wrapper
//!
//! Ties a granted admission slot to the full lifetime of the response the
//! caller observes. For a streamed response the slot is released when the
//! event sequence is exhausted, raises, or is dropped before exhaustion;
//! the guard's drop hook makes abandonment indistinguishable from a clean
//! finish as far as the governor is concerned.
//!
//! Provider throttle signals crossing this boundary are translated into the
//! uniform upstream-rate-limit error kind, with the slot released first.

use crate::dispatch::output::{EventStream, GenerationEvent};
use crate::error::DispatchError;
use crate::metrics;
use crate::rate_limit::governor::AdmissionGuard;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Response handed back to the caller of the dispatch layer
pub enum DispatchResponse {
    /// Complete synchronous result
    Complete(serde_json::Value),

    /// Guarded event sequence; consuming or dropping it returns the slot
    Stream(GuardedEventStream),
}

impl DispatchResponse {
    /// Whether this response streams
    pub fn is_stream(&self) -> bool {
        matches!(self, DispatchResponse::Stream(_))
    }

    /// The synchronous result, if this response is one
    pub fn into_complete(self) -> Option<serde_json::Value> {
        match self {
            DispatchResponse::Complete(value) => Some(value),
            DispatchResponse::Stream(_) => None,
        }
    }

    /// The event stream, if this response is one
    pub fn into_stream(self) -> Option<GuardedEventStream> {
        match self {
            DispatchResponse::Complete(_) => None,
            DispatchResponse::Stream(stream) => Some(stream),
        }
    }
}

impl fmt::Debug for DispatchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchResponse::Complete(value) => f.debug_tuple("Complete").field(value).finish(),
            DispatchResponse::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Event stream that owns its request's admission ticket
///
/// Each pull forwards to the strategy's underlying sequence. The ticket is
/// released exactly once: on exhaustion, on the first error, or when the
/// stream is dropped mid-consumption.
pub struct GuardedEventStream {
    inner: EventStream,
    guard: AdmissionGuard,
    done: bool,
}

impl GuardedEventStream {
    /// Wrap a strategy's event sequence with its admission guard
    pub fn new(inner: EventStream, guard: AdmissionGuard) -> Self {
        Self {
            inner,
            guard,
            done: false,
        }
    }

    /// Ticket token held by this stream
    pub fn ticket(&self) -> &str {
        self.guard.token()
    }

    /// Return the slot now while leaving the events consumable
    ///
    /// Used for callers that asked for a non-streamed response but received
    /// a strategy-internal sequence; the later natural release is a no-op.
    pub async fn release_ticket(&self) {
        self.guard.release().await;
    }
}

impl Stream for GuardedEventStream {
    type Item = Result<GenerationEvent, DispatchError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(event))) => Poll::Ready(Some(Ok(event))),
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                this.guard.release_in_background();
                let err = DispatchError::from(err);
                if matches!(err, DispatchError::UpstreamRateLimited(_)) {
                    metrics::UPSTREAM_THROTTLES_TOTAL.inc();
                }
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.done = true;
                this.guard.release_in_background();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for GuardedEventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedEventStream")
            .field("ticket", &self.guard.token())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
