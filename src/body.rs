use std::{
    cell::RefCell,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use actix_http::error::PayloadError;
use bytes::{Bytes, BytesMut};
use futures_core::{Stream, ready};
use pin_project_lite::pin_project;

const ELLIPSIS: &str = "...";

/// In-memory copy of a request or response body.
///
/// Keeps at most `4 * max_len + 1` bytes: enough to render `max_len`
/// characters of any UTF-8 text and to know whether there was more.
#[derive(Debug)]
pub(crate) struct Capture {
    buf: BytesMut,
    max_len: usize,
}

impl Capture {
    pub(crate) fn new(max_len: usize) -> Self {
        Capture {
            buf: BytesMut::new(),
            max_len,
        }
    }

    fn limit(&self) -> usize {
        self.max_len.saturating_mul(4).saturating_add(1)
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        let room = self.limit().saturating_sub(self.buf.len());
        let take = chunk.len().min(room);
        self.buf.extend_from_slice(&chunk[..take]);
    }

    pub(crate) fn render(&self) -> String {
        truncate(&String::from_utf8_lossy(&self.buf), self.max_len)
    }
}

/// First `max_len` characters of `text`, followed by `...` when anything was cut.
pub(crate) fn truncate(text: &str, max_len: usize) -> String {
    match text.char_indices().nth(max_len) {
        Some((end, _)) => {
            let mut out = String::with_capacity(end + ELLIPSIS.len());
            out.push_str(&text[..end]);
            out.push_str(ELLIPSIS);
            out
        }
        None => text.to_string(),
    }
}

pin_project! {
    /// Request payload wrapper that copies every chunk the handler consumes.
    pub(crate) struct TeePayload<S> {
        #[pin]
        stream: S,
        capture: Rc<RefCell<Capture>>,
    }
}

impl<S> TeePayload<S> {
    pub(crate) fn new(stream: S, capture: Rc<RefCell<Capture>>) -> Self {
        TeePayload { stream, capture }
    }
}

impl<S> Stream for TeePayload<S>
where
    S: Stream<Item = Result<Bytes, PayloadError>>,
{
    type Item = Result<Bytes, PayloadError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match ready!(this.stream.poll_next(cx)) {
            Some(Ok(chunk)) => {
                this.capture.borrow_mut().push(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            other => Poll::Ready(other),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.stream.size_hint()
    }
}
