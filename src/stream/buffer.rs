//! Byte sinks: in-memory capture buffers and shared async writers.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Owned, type-erased async reader.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Owned, type-erased async writer.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Destination for chunks produced by a copy task.
///
/// Sinks are shared between tasks, so writes take `&self`.
#[async_trait]
pub trait ByteSink: Send + Sync {
    /// Write one chunk in full.
    async fn write_chunk(&self, chunk: &[u8]) -> io::Result<()>;

    /// Called once the source reached end-of-stream.
    async fn finish(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Growable in-memory buffer that several tasks can append to.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    /// Create an empty capture buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes to the buffer.
    pub fn append(&self, bytes: &[u8]) {
        match self.inner.lock() {
            Ok(mut buf) => buf.extend_from_slice(bytes),
            Err(poisoned) => poisoned.into_inner().extend_from_slice(bytes),
        }
    }

    /// Copy of the captured bytes.
    pub fn contents(&self) -> Vec<u8> {
        match self.inner.lock() {
            Ok(buf) => buf.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Captured bytes decoded as UTF-8 (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    /// Number of captured bytes.
    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(buf) => buf.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Whether nothing has been captured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ByteSink for CaptureBuffer {
    async fn write_chunk(&self, chunk: &[u8]) -> io::Result<()> {
        self.append(chunk);
        Ok(())
    }
}

impl AsyncWrite for CaptureBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.append(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// An async writer shared between tasks, e.g. the caller's stdout.
///
/// Every chunk is flushed as soon as it is written so interleaved output
/// from several tasks reaches the destination in write order.
#[derive(Clone)]
pub struct SharedSink {
    writer: Arc<tokio::sync::Mutex<BoxedWriter>>,
}

impl SharedSink {
    /// Wrap any async writer.
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Arc::new(tokio::sync::Mutex::new(Box::new(writer))),
        }
    }

    /// Sink writing to the process stdout.
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    /// Sink writing to the process stderr.
    pub fn stderr() -> Self {
        Self::new(tokio::io::stderr())
    }

    /// Close the underlying writer.
    pub async fn shutdown(&self) -> io::Result<()> {
        self.writer.lock().await.shutdown().await
    }
}

impl std::fmt::Debug for SharedSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSink").finish_non_exhaustive()
    }
}

impl From<CaptureBuffer> for SharedSink {
    fn from(buffer: CaptureBuffer) -> Self {
        Self::new(buffer)
    }
}

#[async_trait]
impl ByteSink for SharedSink {
    async fn write_chunk(&self, chunk: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(chunk).await?;
        writer.flush().await
    }

    async fn finish(&self) -> io::Result<()> {
        self.writer.lock().await.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_buffer_append() {
        let buf = CaptureBuffer::new();
        assert!(buf.is_empty());

        buf.append(b"hello ");
        buf.clone().append(b"world");

        assert_eq!(buf.len(), 11);
        assert_eq!(buf.text(), "hello world");
    }

    #[test]
    fn test_capture_buffer_survives_poisoned_lock() {
        let buf = CaptureBuffer::new();
        buf.append(b"kept");

        let writer = buf.clone();
        let _ = std::thread::spawn(move || {
            let _guard = writer.inner.lock().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(buf.inner.is_poisoned());

        assert_eq!(buf.len(), 4);
        assert!(!buf.is_empty());
        assert_eq!(buf.contents(), b"kept".to_vec());
    }

    #[test]
    fn test_capture_buffer_lossy_text() {
        let buf = CaptureBuffer::new();
        buf.append(&[b'o', b'k', 0xff]);
        assert!(buf.text().starts_with("ok"));
        assert_eq!(buf.contents(), vec![b'o', b'k', 0xff]);
    }

    #[tokio::test]
    async fn test_capture_buffer_as_async_writer() {
        let mut buf = CaptureBuffer::new();
        buf.write_all(b"async").await.unwrap();
        assert_eq!(buf.text(), "async");
    }

    #[tokio::test]
    async fn test_shared_sink_writes_through() {
        let capture = CaptureBuffer::new();
        let sink = SharedSink::from(capture.clone());

        sink.write_chunk(b"one ").await.unwrap();
        sink.clone().write_chunk(b"two").await.unwrap();
        sink.finish().await.unwrap();

        assert_eq!(capture.text(), "one two");
    }
}
