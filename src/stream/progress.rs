//! Progress-reporting writer.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::AsyncWrite;
use tracing::info;

/// Minimum spacing between two progress callbacks (at most ~10 per second).
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Receives progress updates for a byte transfer.
pub trait ProgressObserver: Send + Sync {
    /// Called with the cumulative bytes written and the expected total.
    fn on_progress(&self, transferred: u64, total: u64);
}

/// Observer that ignores every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _transferred: u64, _total: u64) {}
}

/// Observer that logs each update at info level.
#[derive(Debug, Clone)]
pub struct LogProgress {
    label: String,
}

impl LogProgress {
    /// Create an observer labelled with the file being transferred.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ProgressObserver for LogProgress {
    fn on_progress(&self, transferred: u64, total: u64) {
        let percent = if total == 0 {
            100
        } else {
            transferred.saturating_mul(100) / total
        };
        info!("{}: {}/{} bytes ({}%)", self.label, transferred, total, percent);
    }
}

impl<F> ProgressObserver for F
where
    F: Fn(u64, u64) + Send + Sync,
{
    fn on_progress(&self, transferred: u64, total: u64) {
        self(transferred, total)
    }
}

/// Writer decorator counting bytes and reporting them at a bounded rate.
pub struct ProgressWriter<W> {
    inner: W,
    observer: Arc<dyn ProgressObserver>,
    total: u64,
    written: u64,
    interval: Duration,
    last_report: Option<Instant>,
}

impl<W> ProgressWriter<W> {
    /// Wrap `inner`, expecting `total` bytes.
    pub fn new(inner: W, total: u64, observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            inner,
            observer,
            total,
            written: 0,
            interval: DEFAULT_REPORT_INTERVAL,
            last_report: None,
        }
    }

    /// Override the reporting interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Report the final count unconditionally.
    pub fn finish(&mut self) {
        self.last_report = Some(Instant::now());
        self.observer.on_progress(self.written, self.total);
    }

    /// Access the wrapped writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Unwrap the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }

    fn record(&mut self, n: usize) {
        self.written += n as u64;
        let due = match self.last_report {
            Some(at) => at.elapsed() >= self.interval,
            None => true,
        };
        if due {
            self.last_report = Some(Instant::now());
            self.observer.on_progress(self.written, self.total);
        }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ProgressWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            self.record(n);
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::CaptureBuffer;
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(u64, u64)>>,
    }

    impl ProgressObserver for Recorder {
        fn on_progress(&self, transferred: u64, total: u64) {
            self.calls.lock().unwrap().push((transferred, total));
        }
    }

    #[tokio::test]
    async fn test_counts_bytes() {
        let sink = CaptureBuffer::new();
        let mut writer = ProgressWriter::new(sink.clone(), 10, Arc::new(NoProgress));

        writer.write_all(b"0123456789").await.unwrap();

        assert_eq!(writer.written(), 10);
        assert_eq!(sink.text(), "0123456789");
    }

    #[tokio::test]
    async fn test_rate_limited_reports() {
        let recorder = Arc::new(Recorder::default());
        let mut writer = ProgressWriter::new(CaptureBuffer::new(), 1000, recorder.clone())
            .with_interval(Duration::from_secs(3600));

        for _ in 0..100 {
            writer.write_all(&[0u8; 10]).await.unwrap();
        }
        writer.finish();

        let calls = recorder.calls.lock().unwrap();
        // First write reports immediately, the rest fall inside the interval
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], (10, 1000));
        assert_eq!(calls[1], (1000, 1000));
    }

    #[tokio::test]
    async fn test_closure_observer() {
        let seen = Arc::new(Mutex::new(0u64));
        let seen_clone = seen.clone();
        let observer = move |transferred: u64, _total: u64| {
            *seen_clone.lock().unwrap() = transferred;
        };

        let mut writer = ProgressWriter::new(CaptureBuffer::new(), 3, Arc::new(observer));
        writer.write_all(b"abc").await.unwrap();
        writer.finish();

        assert_eq!(*seen.lock().unwrap(), 3);
    }
}
