//! Chunk sources feeding a [`StreamPipe`](super::StreamPipe).

use crate::error::SourceError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::io::{self, Read};
use std::pin::Pin;
use std::thread;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// Default read size for [`ReaderSource`].
pub const DEFAULT_READ_CHUNK: usize = 8192;

/// Something that delivers raw chunks one at a time.
///
/// `Ok(None)` signals natural end of input. Chunk boundaries carry no meaning.
#[async_trait]
pub trait ChunkSource: Send + 'static {
    /// Wait for the next chunk.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, SourceError>;

    /// Called once when the consumer stops early. Release anything held open.
    async fn close(&mut self) {}
}

/// Adapts any stream of byte results, such as `reqwest::Response::bytes_stream`.
pub struct StreamSource<S> {
    inner: Pin<Box<S>>,
}

impl<S> StreamSource<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }
}

#[async_trait]
impl<S, B, E> ChunkSource for StreamSource<S>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: Into<Bytes> + Send,
    E: Display + Send,
{
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, SourceError> {
        match self.inner.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk.into())),
            Some(Err(e)) => Err(SourceError::Stream(e.to_string())),
            None => Ok(None),
        }
    }
}

/// Reads fixed-size chunks from an async reader (files, stdin, sockets).
pub struct ReaderSource<R> {
    reader: Option<R>,
    buf: Vec<u8>,
}

impl<R> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self::with_chunk_size(reader, DEFAULT_READ_CHUNK)
    }

    pub fn with_chunk_size(reader: R, chunk_size: usize) -> Self {
        Self {
            reader: Some(reader),
            buf: vec![0; chunk_size.max(1)],
        }
    }
}

#[async_trait]
impl<R> ChunkSource for ReaderSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, SourceError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let n = reader.read(&mut self.buf).await?;
        if n == 0 {
            self.reader = None;
            return Ok(None);
        }
        Ok(Some(Bytes::copy_from_slice(&self.buf[..n])))
    }

    async fn close(&mut self) {
        self.reader = None;
    }
}

/// Reads a blocking reader on its own OS thread.
///
/// For interactive stdin. A read blocked on a terminal cannot be interrupted;
/// the detached thread lets the process exit without waiting for it.
pub struct BlockingReaderSource {
    rx: mpsc::Receiver<io::Result<Bytes>>,
}

impl BlockingReaderSource {
    pub fn spawn<R>(reader: R, chunk_size: usize) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(4);
        thread::Builder::new()
            .name("rill-reader".to_string())
            .spawn(move || read_loop(reader, chunk_size.max(1), &tx))?;
        Ok(Self { rx })
    }
}

fn read_loop<R: Read>(mut reader: R, chunk_size: usize, tx: &mpsc::Sender<io::Result<Bytes>>) {
    let mut buf = vec![0; chunk_size];
    loop {
        let chunk = match reader.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => Err(e),
        };
        let failed = chunk.is_err();
        // Receiver gone: the pipe ended or was cancelled.
        if tx.blocking_send(chunk).is_err() || failed {
            return;
        }
    }
}

#[async_trait]
impl ChunkSource for BlockingReaderSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, SourceError> {
        match self.rx.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}
