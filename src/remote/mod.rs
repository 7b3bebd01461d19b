//! Remote command execution over SSH.
//!
//! A [`RemoteClient`] owns one authenticated connection and runs commands,
//! uploads files and manages systemd services through it:
//! - Lifecycle `Closed -> Dialing -> Open -> Closed`, with bounded retry
//! - Commands with optional sudo elevation and interactive prompt answering
//! - File upload over the copy protocol, with atomic install helpers
//! - Idempotent service operations
//!
//! # Example
//!
//! ```no_run
//! use shell_courier::remote::{RemoteClient, RemoteConfig};
//!
//! # async fn demo() -> shell_courier::Result<()> {
//! let config = RemoteConfig::new("deploy", "10.0.0.5").with_password("secret");
//! let client = RemoteClient::new(config);
//! client.open().await?;
//!
//! let uptime = client.ssh("uptime").await.into_result()?;
//! println!("{}", uptime);
//!
//! client.enable_linux_service("nginx").await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod deploy;
mod expect;
mod openssh;
mod result;
mod service;
mod state;
pub mod testing;
mod transfer;
mod transport;

pub use client::{RemoteClient, RETRY_BACKOFF};
pub use config::{
    AuthMethod, InteractiveAuth, RemoteConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT,
    DEFAULT_REMOTE_TEMP_DIR,
};
pub use deploy::{DEFAULT_DIR_MODE, SYSTEMD_UNIT_DIR};
pub use expect::{expect_loop, ExpectCallback, MergedOutput, NoExpect, PromptResponder};
pub use openssh::OpenSshTransport;
pub use result::SshResult;
pub use service::ServiceStatus;
pub use state::ConnectionState;
pub use transfer::{TransferState, DEFAULT_FILE_MODE};
pub use transport::{Connection, RemoteSession, SessionStreams, Transport};
