//! # shell-courier
//!
//! Local shell pipelines and remote SSH sessions behind one I/O model.
//!
//! Two engines share the same stream plumbing:
//!
//! - **Local pipelines**: `cmd1 | cmd2 < in > out` without spawning a shell,
//!   with quote-aware splitting and output fanned out to several sinks
//! - **Remote client**: one SSH connection per host with retry, sudo,
//!   interactive prompt answering, file upload and idempotent systemd helpers
//!
//! ## Quick Start
//!
//! ```no_run
//! use shell_courier::{RemoteClient, RemoteConfig};
//!
//! #[tokio::main]
//! async fn main() -> shell_courier::Result<()> {
//!     shell_courier::logging::try_init().ok();
//!
//!     let greeting = shell_courier::command("echo hello | tr a-z A-Z").await?;
//!     assert_eq!(greeting, "HELLO\n");
//!
//!     let client = RemoteClient::new(
//!         RemoteConfig::new("deploy", "10.0.0.5").with_key_file("/home/deploy/.ssh/id_ed25519"),
//!     );
//!     client.open_with_retry(3).await?;
//!     client.scp_file("app.conf", "/etc/app/app.conf", "app", "app", 0o640).await?;
//!     client.close().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod net;
pub mod remote;
pub mod stream;

// Re-export commonly used types
pub use error::{BoxError, CourierError, Result};
pub use execution::{command, eval, sudo_command, IoConfig, PipelineExecutor};
pub use net::wait_for_tcp;
pub use remote::{
    AuthMethod, ConnectionState, ExpectCallback, PromptResponder, RemoteClient, RemoteConfig,
    ServiceStatus, SshResult,
};
pub use stream::{
    CaptureBuffer, ErrorAggregator, ProgressObserver, ProgressWriter, SharedSink, StreamFanout,
};
