//! TCP readiness probing.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info};

/// Pause between two dial attempts.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Deadline of a single dial attempt.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// Wait until `host:port` accepts TCP connections or `timeout` elapses.
///
/// Returns whether a connection succeeded. The probe connection is closed
/// immediately.
pub async fn wait_for_tcp(host: &str, port: u16, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let address = format!("{}:{}", host, port);

    while Instant::now() < deadline {
        debug!("waiting for {}", address);
        let dial = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&address)).await;
        match dial {
            Ok(Ok(stream)) => {
                drop(stream);
                info!("{} is accepting connections", address);
                return true;
            }
            Ok(Err(e)) => debug!("{} not ready: {}", address, e),
            Err(_) => debug!("{} not ready: dial timed out", address),
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(wait_for_tcp("127.0.0.1", port, Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_closed_port_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!wait_for_tcp("127.0.0.1", port, Duration::from_millis(300)).await);
    }

    #[tokio::test]
    async fn test_zero_timeout() {
        assert!(!wait_for_tcp("127.0.0.1", 1, Duration::ZERO).await);
    }
}
