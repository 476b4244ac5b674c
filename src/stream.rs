use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::{self, Stream};
use http_body::{Body, Frame, SizeHint};
use pin_project::pin_project;

const IO_BUFFER_SIZE: usize = 64 * 1024;

/// Chunk source used for bodies cut from a [`ContentStore`](crate::ContentStore).
pub type StoreChunks = stream::Iter<std::vec::IntoIter<io::Result<Bytes>>>;

/// Split `bytes` into frames of at most 64 KiB without copying.
pub fn chunked(mut bytes: Bytes) -> StoreChunks {
    let mut chunks = Vec::with_capacity(bytes.len() / IO_BUFFER_SIZE + 1);
    while bytes.len() > IO_BUFFER_SIZE {
        chunks.push(Ok(bytes.split_to(IO_BUFFER_SIZE)));
    }
    if !bytes.is_empty() {
        chunks.push(Ok(bytes));
    }
    stream::iter(chunks)
}

/// Response body stream with a declared length. Implements [`Stream`],
/// [`Body`], and [`IntoResponse`].
///
/// The stream never yields more than the declared length. If the source ends
/// early it yields an [`io::ErrorKind::UnexpectedEof`] error, which aborts
/// only the response being written.
#[pin_project]
pub struct RangedStream<S> {
    declared: u64,
    remaining: u64,
    failed: bool,
    #[pin]
    chunks: S,
}

impl<S> RangedStream<S> {
    pub(crate) fn new(chunks: S, declared: u64) -> Self {
        RangedStream { declared, remaining: declared, failed: false, chunks }
    }

    /// The length this stream promised to produce.
    pub fn declared_len(&self) -> u64 {
        self.declared
    }
}

impl RangedStream<StoreChunks> {
    /// The declared length is always the slice length, so this stream can
    /// neither come up short nor be truncated.
    pub(crate) fn from_bytes(bytes: Bytes) -> Self {
        let declared = bytes.len() as u64;
        RangedStream::new(chunked(bytes), declared)
    }
}

impl<S> std::fmt::Debug for RangedStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangedStream")
            .field("declared", &self.declared)
            .field("remaining", &self.remaining)
            .finish()
    }
}

impl<S> IntoResponse for RangedStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    fn into_response(self) -> Response {
        Response::new(axum::body::Body::new(self))
    }
}

impl<S: Stream<Item = io::Result<Bytes>>> Body for RangedStream<S> {
    type Data = Bytes;
    type Error = io::Error;

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining)
    }

    fn is_end_stream(&self) -> bool {
        self.remaining == 0 || self.failed
    }

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>)
        -> Poll<Option<io::Result<Frame<Bytes>>>>
    {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }
}

impl<S: Stream<Item = io::Result<Bytes>>> Stream for RangedStream<S> {
    type Item = io::Result<Bytes>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>
    ) -> Poll<Option<io::Result<Bytes>>> {
        let this = self.project();

        if *this.remaining == 0 || *this.failed {
            return Poll::Ready(None);
        }

        match this.chunks.poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Err(e))) => {
                *this.failed = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(Some(Ok(mut chunk))) => {
                // never exceed the declared Content-Length
                let allowed = usize::try_from(*this.remaining).unwrap_or(usize::MAX);
                if chunk.len() > allowed {
                    chunk.truncate(allowed);
                }
                *this.remaining -= chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                *this.failed = true;
                let written = *this.declared - *this.remaining;
                tracing::error!(written, declared = *this.declared, "failed to write partial contents");
                Poll::Ready(Some(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("short write: wrote {} of {} bytes", written, this.declared),
                ))))
            }
        }
    }
}
