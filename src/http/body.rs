//! Body wrappers for both legs of an exchange.
//!
//! [`RelayBody`] wraps the backend's response body so frames pass through to
//! the client in arrival order, none larger than the configured buffer size.
//! It holds the backend connection guard: when the body is exhausted, fails,
//! or is dropped because the client went away, the guard is released and the
//! underlying backend connection is closed with it.
//!
//! [`UploadBody`] wraps the client's request body on its way to the backend
//! and reports each forwarded frame through [`UploadProgress`].

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use tokio::sync::Notify;

use crate::load_balancer::BackendConnectionGuard;
use crate::observability::metrics;

/// How a relayed body ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    InProgress,
    Completed,
    /// Dropped before the backend finished; the backend transfer is aborted.
    ClientDisconnect,
    /// The backend failed mid-stream; the client connection is aborted.
    BackendError,
}

#[derive(Debug)]
pub struct RelayBody<B> {
    inner: B,
    guard: Option<BackendConnectionGuard>,
    backend: String,
    outcome: RelayOutcome,
    /// Upper bound on a single emitted data frame.
    max_frame: usize,
    /// Tail of an oversized frame, emitted before the inner body is polled again.
    pending: Option<Bytes>,
    bytes: u64,
    frames: u64,
    peak_frame: usize,
}

impl<B: Body> RelayBody<B> {
    pub fn new(inner: B, guard: BackendConnectionGuard, max_frame: usize) -> Self {
        let backend = guard.id.clone();
        let mut body = Self {
            inner,
            guard: Some(guard),
            backend,
            outcome: RelayOutcome::InProgress,
            max_frame: max_frame.max(1),
            pending: None,
            bytes: 0,
            frames: 0,
            peak_frame: 0,
        };
        // Empty bodies (HEAD, 204, 304) are never polled.
        body.complete_if_drained();
        body
    }

    fn complete_if_drained(&mut self) {
        if self.pending.is_none() && self.inner.is_end_stream() {
            self.finish(RelayOutcome::Completed);
        }
    }
}

impl<B> RelayBody<B> {
    /// Id of the backend this body is streaming from.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn outcome(&self) -> RelayOutcome {
        self.outcome
    }

    pub fn bytes_relayed(&self) -> u64 {
        self.bytes
    }

    /// Largest single data frame seen so far.
    pub fn peak_frame_len(&self) -> usize {
        self.peak_frame
    }

    fn emit(&mut self, mut data: Bytes) -> Frame<Bytes> {
        if data.len() > self.max_frame {
            self.pending = Some(data.split_off(self.max_frame));
        }
        self.frames += 1;
        self.bytes += data.len() as u64;
        self.peak_frame = self.peak_frame.max(data.len());
        Frame::data(data)
    }

    fn finish(&mut self, outcome: RelayOutcome) {
        if self.outcome != RelayOutcome::InProgress {
            return;
        }
        self.outcome = outcome;
        self.guard.take();

        metrics::record_relayed_bytes(&self.backend, self.bytes);
        match outcome {
            RelayOutcome::ClientDisconnect => {
                metrics::record_client_disconnect(&self.backend);
                tracing::info!(
                    backend = %self.backend,
                    bytes = self.bytes,
                    "Client disconnected mid-response, aborting backend transfer"
                );
            }
            RelayOutcome::BackendError => {
                tracing::warn!(
                    backend = %self.backend,
                    bytes = self.bytes,
                    "Backend failed mid-response, aborting client connection"
                );
            }
            _ => {
                tracing::debug!(
                    backend = %self.backend,
                    bytes = self.bytes,
                    frames = self.frames,
                    "Response relayed"
                );
            }
        }
    }
}

impl<B> Body for RelayBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: std::fmt::Display,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if let Some(rest) = this.pending.take() {
            let frame = this.emit(rest);
            this.complete_if_drained();
            return Poll::Ready(Some(Ok(frame)));
        }
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                let frame = match frame.into_data() {
                    Ok(data) => this.emit(data),
                    Err(trailers) => trailers,
                };
                this.complete_if_drained();
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::debug!(backend = %this.backend, error = %e, "Backend body error");
                this.finish(RelayOutcome::BackendError);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish(RelayOutcome::Completed);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.pending.is_none() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        let pending = self.pending.as_ref().map_or(0, |rest| rest.len() as u64);
        let inner = self.inner.size_hint();
        let mut hint = SizeHint::new();
        if let Some(upper) = inner.upper() {
            hint.set_upper(upper + pending);
        }
        hint.set_lower(inner.lower() + pending);
        hint
    }
}

impl<B> Drop for RelayBody<B> {
    fn drop(&mut self) {
        self.finish(RelayOutcome::ClientDisconnect);
    }
}

/// Shared between an [`UploadBody`] and the task waiting on the backend.
#[derive(Debug, Default)]
pub struct UploadProgress {
    advanced: Notify,
    aborted: AtomicBool,
}

impl UploadProgress {
    /// Resolves once the upload moves: a frame was forwarded, the body ended,
    /// or the client aborted it.
    pub async fn advanced(&self) {
        self.advanced.notified().await
    }

    /// Whether the client's body failed before it was fully read.
    pub fn client_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

/// The client's request body, as handed to the backend connection.
#[derive(Debug)]
pub struct UploadBody<B> {
    inner: B,
    progress: Arc<UploadProgress>,
}

impl<B> UploadBody<B> {
    pub fn new(inner: B) -> (Self, Arc<UploadProgress>) {
        let progress = Arc::new(UploadProgress::default());
        let body = Self {
            inner,
            progress: progress.clone(),
        };
        (body, progress)
    }
}

impl<B> Body for UploadBody<B>
where
    B: Body + Unpin,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Err(_))) => {
                this.progress.aborted.store(true, Ordering::Release);
                this.progress.advanced.notify_one();
            }
            Poll::Ready(_) => this.progress.advanced.notify_one(),
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
