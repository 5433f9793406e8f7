//! Pass-through bodies capturing a bounded prefix of the payload for the request log.

use std::{
    collections::VecDeque,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{ready, Context, Poll},
    time::Duration,
};

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use http_body::{Body as HttpBody, Frame, SizeHint};
use http_body_util::BodyExt;

use crate::{
    builder::{emit, Outcome},
    config::ResolvedConfig,
    context::RequestContext,
    middleware::HandlerError,
};

/// Request payload as far as the request log is concerned.
#[derive(Debug)]
pub(crate) struct RequestCapture {
    prefix: Bytes,
    received: Arc<AtomicU64>,
}

impl RequestCapture {
    /// The captured prefix of the payload, at most the body limit long.
    pub(crate) fn prefix(&self) -> Bytes {
        self.prefix.clone()
    }

    /// Bytes handed to the downstream service so far.
    pub(crate) fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

/// Reads `body` ahead of the downstream service until it ends or exceeds `limit` bytes.
///
/// The returned body replays every frame read so far, including a read error, and then
/// continues with the unread remainder. The payload reaching the downstream service is
/// therefore unchanged.
pub(crate) async fn capture_request(mut body: Body, limit: usize) -> (Body, RequestCapture) {
    let mut frames = VecDeque::new();
    let mut prefix = BytesMut::new();
    let mut seen = 0_usize;
    let mut error = None;
    let mut finished = false;

    while seen <= limit {
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    keep_prefix(&mut prefix, data, limit);
                    seen = seen.saturating_add(data.len());
                }
                frames.push_back(frame);
            }
            Some(Err(read_error)) => {
                error = Some(read_error);
                finished = true;
                break;
            }
            None => {
                finished = true;
                break;
            }
        }
    }

    if !finished {
        tracing::debug!("Request payload exceeds {limit} bytes, logging a truncated body");
    }

    let received = Arc::new(AtomicU64::new(byte_len(seen)));
    let replay = Replay {
        frames,
        error,
        rest: (!finished).then_some(body),
        received: Arc::clone(&received),
    };
    let capture = RequestCapture {
        prefix: prefix.freeze(),
        received,
    };

    (Body::new(replay), capture)
}

#[derive(Debug)]
struct Replay {
    frames: VecDeque<Frame<Bytes>>,
    error: Option<axum::Error>,
    rest: Option<Body>,
    received: Arc<AtomicU64>,
}

impl Replay {
    fn buffered_len(&self) -> u64 {
        byte_len(
            self.frames
                .iter()
                .filter_map(Frame::data_ref)
                .map(Bytes::len)
                .sum(),
        )
    }
}

impl HttpBody for Replay {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if let Some(frame) = this.frames.pop_front() {
            return Poll::Ready(Some(Ok(frame)));
        }
        if let Some(error) = this.error.take() {
            return Poll::Ready(Some(Err(error)));
        }
        let Some(rest) = this.rest.as_mut() else {
            return Poll::Ready(None);
        };

        let polled = ready!(Pin::new(rest).poll_frame(cx));
        match &polled {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    this.received
                        .fetch_add(byte_len(data.len()), Ordering::Relaxed);
                }
            }
            Some(Err(_)) | None => this.rest = None,
        }
        Poll::Ready(polled)
    }

    fn is_end_stream(&self) -> bool {
        self.frames.is_empty()
            && self.error.is_none()
            && self.rest.as_ref().map_or(true, HttpBody::is_end_stream)
    }

    fn size_hint(&self) -> SizeHint {
        let buffered = self.buffered_len();
        let Some(rest) = &self.rest else {
            return SizeHint::with_exact(buffered);
        };

        let rest = rest.size_hint();
        let mut hint = SizeHint::new();
        hint.set_lower(rest.lower().saturating_add(buffered));
        if let Some(upper) = rest.upper() {
            hint.set_upper(upper.saturating_add(buffered));
        }
        hint
    }
}

/// Everything needed to emit a record, except the response payload which is still streaming.
#[derive(Debug)]
pub(crate) struct PendingRecord {
    pub(crate) config: Arc<ResolvedConfig>,
    pub(crate) context: RequestContext,
    pub(crate) latency: Duration,
    pub(crate) handler_error: Option<HandlerError>,
}

impl PendingRecord {
    fn emit(mut self, body: Bytes, sent: u64, body_error: Option<String>) {
        self.context.set_response_body(body, sent);

        let error = self
            .handler_error
            .as_ref()
            .map(HandlerError::message)
            .or(body_error.as_deref());
        emit(
            &self.config,
            &self.context,
            Outcome {
                latency: self.latency,
                error,
            },
        );
    }
}

/// Response body forwarding every frame unchanged.
///
/// The request log is emitted when the stream ends, fails or is dropped, whichever comes first.
#[derive(Debug)]
pub(crate) struct ResponseTap {
    inner: Body,
    prefix: BytesMut,
    limit: usize,
    sent: u64,
    pending: Option<PendingRecord>,
}

impl ResponseTap {
    pub(crate) fn new(inner: Body, limit: usize, pending: PendingRecord) -> Self {
        Self {
            inner,
            prefix: BytesMut::new(),
            limit,
            sent: 0,
            pending: Some(pending),
        }
    }

    fn finish(&mut self, error: Option<String>) {
        if let Some(pending) = self.pending.take() {
            pending.emit(self.prefix.split().freeze(), self.sent, error);
        }
    }
}

impl HttpBody for ResponseTap {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = ready!(Pin::new(&mut this.inner).poll_frame(cx));
        match &polled {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    keep_prefix(&mut this.prefix, data, this.limit);
                    this.sent = this.sent.saturating_add(byte_len(data.len()));
                }
            }
            Some(Err(error)) => {
                tracing::warn!("Response body failed while streaming: {error}");
                this.finish(Some(error.to_string()));
            }
            None => this.finish(None),
        }
        Poll::Ready(polled)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for ResponseTap {
    fn drop(&mut self) {
        self.finish(None);
    }
}

fn keep_prefix(prefix: &mut BytesMut, data: &Bytes, limit: usize) {
    let room = limit.saturating_sub(prefix.len());
    if let Some(chunk) = data.get(..room.min(data.len())) {
        prefix.extend_from_slice(chunk);
    }
}

fn byte_len(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}
