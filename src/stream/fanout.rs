//! One-to-many and many-to-one stream copying.

use std::io;
use std::sync::Arc;

use futures_util::future::try_join_all;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use super::buffer::{BoxedReader, ByteSink};

/// Chunk size used by every copy loop.
pub const COPY_BUFFER_SIZE: usize = 8192;

/// Copies a single source to any number of sinks.
///
/// Each chunk read from the source is written to all sinks concurrently
/// before the next read; a failing sink aborts the copy.
#[derive(Clone, Default)]
pub struct StreamFanout {
    sinks: Vec<Arc<dyn ByteSink>>,
}

impl StreamFanout {
    /// Create a fanout with no sinks. Copying into it discards the data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn with_sink(mut self, sink: Arc<dyn ByteSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Add a sink in place.
    pub fn push(&mut self, sink: Arc<dyn ByteSink>) {
        self.sinks.push(sink);
    }

    /// Number of sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether there are no sinks.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Drain `reader` into every sink until end-of-stream.
    ///
    /// Returns the number of bytes read from the source.
    pub async fn copy_from<R>(&self, reader: &mut R) -> io::Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut total = 0u64;

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            total += n as u64;
            trace!("fanout: {} bytes to {} sinks", n, self.sinks.len());

            let chunk = &buf[..n];
            try_join_all(self.sinks.iter().map(|sink| sink.write_chunk(chunk))).await?;
        }

        try_join_all(self.sinks.iter().map(|sink| sink.finish())).await?;
        Ok(total)
    }
}

/// Copy each source into `writer` in order, then flush.
///
/// Returns the total number of bytes copied.
pub async fn merge_sources<W>(sources: Vec<BoxedReader>, writer: &mut W) -> io::Result<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut total = 0u64;
    for mut source in sources {
        total += tokio::io::copy(&mut source, writer).await?;
    }
    writer.flush().await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::CaptureBuffer;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_fanout_copies_to_every_sink() {
        let a = CaptureBuffer::new();
        let b = CaptureBuffer::new();
        let fanout = StreamFanout::new()
            .with_sink(Arc::new(a.clone()))
            .with_sink(Arc::new(b.clone()));

        let mut source = Cursor::new(b"fan me out".to_vec());
        let copied = fanout.copy_from(&mut source).await.unwrap();

        assert_eq!(copied, 10);
        assert_eq!(a.text(), "fan me out");
        assert_eq!(b.text(), "fan me out");
    }

    #[tokio::test]
    async fn test_fanout_without_sinks_discards() {
        let fanout = StreamFanout::new();
        assert!(fanout.is_empty());

        let mut source = Cursor::new(vec![7u8; COPY_BUFFER_SIZE * 3 + 1]);
        let copied = fanout.copy_from(&mut source).await.unwrap();
        assert_eq!(copied, (COPY_BUFFER_SIZE * 3 + 1) as u64);
    }

    #[tokio::test]
    async fn test_merge_sources_in_order() {
        let sources: Vec<BoxedReader> = vec![
            Box::new(Cursor::new(b"first\n".to_vec())),
            Box::new(Cursor::new(Vec::new())),
            Box::new(Cursor::new(b"second\n".to_vec())),
        ];
        let mut out = CaptureBuffer::new();

        let copied = merge_sources(sources, &mut out).await.unwrap();

        assert_eq!(copied, 13);
        assert_eq!(out.text(), "first\nsecond\n");
    }
}
