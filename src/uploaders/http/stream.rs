use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use futures::stream::{self, BoxStream};
use futures_util::StreamExt;
use pin_project_lite::pin_project;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use crate::core::{FileSource, ProgressSink};

/// Chunk size used when slicing in-memory sources.
pub const MEMORY_CHUNK_SIZE: usize = 64 * 1024;

pin_project! {
    /// Counts bytes as the request body pulls them and reports the running
    /// total.
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        sink: ProgressSink,
        uploaded: u64,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, sink: ProgressSink) -> Self {
        Self {
            inner,
            sink,
            uploaded: 0,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    *this.uploaded += chunk.len() as u64;
                    this.sink.report(*this.uploaded);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

/// Byte stream over a file source, read lazily.
pub async fn source_stream(source: &FileSource) -> io::Result<BoxStream<'static, io::Result<Bytes>>> {
    match source {
        FileSource::Path(path) => {
            let file = File::open(path).await?;
            Ok(ReaderStream::new(file).boxed())
        }
        FileSource::Memory(data) => {
            let data = data.clone();
            let chunks: Vec<io::Result<Bytes>> = (0..data.len())
                .step_by(MEMORY_CHUNK_SIZE)
                .map(|start| Ok(data.slice(start..(start + MEMORY_CHUNK_SIZE).min(data.len()))))
                .collect();
            Ok(stream::iter(chunks).boxed())
        }
    }
}
