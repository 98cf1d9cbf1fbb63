//! Deadline enforcement for relayed response bodies.
//!
//! Image and chart archives can take minutes to stream, so the relay cannot
//! rely on a single request deadline alone: a backend that stalls mid-body
//! would pin the connection until the total deadline. [`TimeoutBody`] wraps
//! the upstream byte stream with two timers, one bounding the gap between
//! chunks and one bounding the whole transfer.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http_body::{Body, Frame};
use tokio::time::{Sleep, sleep};

use crate::config::RelayConfig;

/// Deadlines applied to a single relayed stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamTimeouts {
    /// Maximum gap between consecutive chunks.
    pub chunk: Duration,
    /// Maximum duration of the whole stream.
    pub total: Duration,
}

impl StreamTimeouts {
    /// Build stream deadlines from the relay configuration.
    ///
    /// The total deadline reuses the request timeout so a stream can never
    /// outlive the request budget.
    pub fn from_relay(config: &RelayConfig) -> Self {
        Self {
            chunk: config.chunk_timeout,
            total: config.request_timeout,
        }
    }
}

/// Body adapter that aborts a stalled or overlong stream.
///
/// Timers are armed on the first poll rather than at construction, so a
/// response that sits briefly in a channel before being written does not
/// burn its budget. The chunk timer re-arms after every frame the inner
/// body yields.
pub struct TimeoutBody<B> {
    inner: B,
    timeouts: StreamTimeouts,
    chunk_deadline: Pin<Box<Sleep>>,
    total_deadline: Pin<Box<Sleep>>,
    armed: bool,
}

impl<B> TimeoutBody<B> {
    /// Wrap `inner` with the given deadlines.
    pub fn new(inner: B, timeouts: StreamTimeouts) -> Self {
        Self {
            inner,
            timeouts,
            chunk_deadline: Box::pin(sleep(timeouts.chunk)),
            total_deadline: Box::pin(sleep(timeouts.total)),
            armed: false,
        }
    }
}

impl<B> Body for TimeoutBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;

        if !this.armed {
            this.armed = true;
            let now = tokio::time::Instant::now();
            this.total_deadline.as_mut().reset(now + this.timeouts.total);
            this.chunk_deadline.as_mut().reset(now + this.timeouts.chunk);
        }

        // Total deadline takes precedence over the per-chunk one
        if this.total_deadline.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Some(Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("stream exceeded total deadline ({:?})", this.timeouts.total),
            )
            .into())));
        }

        if this.chunk_deadline.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Some(Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("stream stalled: no data within {:?}", this.timeouts.chunk),
            )
            .into())));
        }

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(result) => {
                let next = tokio::time::Instant::now() + this.timeouts.chunk;
                this.chunk_deadline.as_mut().reset(next);
                Poll::Ready(result.map(|r| r.map_err(Into::into)))
            }
            // The deadline polls above registered their wakers
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> http_body::SizeHint {
        self.inner.size_hint()
    }
}
