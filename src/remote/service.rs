//! Idempotent systemd service operations.
//!
//! Every mutating call first queries the current state and only issues
//! the `systemctl` change when it differs, so repeating a call is free.

use tracing::{debug, info};

use super::client::RemoteClient;
use super::result::SshResult;
use crate::error::CourierError;
use crate::execution::shell_quote;
use crate::Result;

/// Enabled and running state of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceStatus {
    pub enabled: bool,
    pub running: bool,
}

fn unit(name: &str) -> Result<String> {
    if name.trim().is_empty() {
        return Err(CourierError::Config("service name is empty".into()));
    }
    Ok(shell_quote(name))
}

/// `systemctl is-*` answers on stdout and exits non-zero for "no".
fn answer(result: SshResult, expected: &str) -> Result<bool> {
    match result.error {
        None => Ok(result.stdout_trimmed() == expected),
        Some(CourierError::RemoteExit { .. }) => Ok(false),
        Some(e) => Err(e),
    }
}

impl RemoteClient {
    /// Whether `name` starts at boot.
    pub async fn is_service_enabled(&self, name: &str) -> Result<bool> {
        let unit = unit(name)?;
        let result = self.ssh(&format!("systemctl is-enabled {}", unit)).await;
        answer(result, "enabled")
    }

    /// Whether `name` is currently active.
    pub async fn is_service_running(&self, name: &str) -> Result<bool> {
        let unit = unit(name)?;
        let result = self.ssh(&format!("systemctl is-active {}", unit)).await;
        answer(result, "active")
    }

    /// Both states of `name`.
    pub async fn service_status(&self, name: &str) -> Result<ServiceStatus> {
        Ok(ServiceStatus {
            enabled: self.is_service_enabled(name).await?,
            running: self.is_service_running(name).await?,
        })
    }

    /// Enable `name` unless it already is.
    pub async fn enable_linux_service(&self, name: &str) -> Result<()> {
        if self.is_service_enabled(name).await? {
            debug!("service {} already enabled", name);
            return Ok(());
        }
        self.systemctl("enable", name).await
    }

    /// Disable `name` unless it already is.
    pub async fn disable_linux_service(&self, name: &str) -> Result<()> {
        if !self.is_service_enabled(name).await? {
            debug!("service {} already disabled", name);
            return Ok(());
        }
        self.systemctl("disable", name).await
    }

    /// Start `name` unless it is running.
    pub async fn start_linux_service(&self, name: &str) -> Result<()> {
        if self.is_service_running(name).await? {
            debug!("service {} already running", name);
            return Ok(());
        }
        self.systemctl("start", name).await
    }

    /// Stop `name` unless it is stopped.
    pub async fn stop_linux_service(&self, name: &str) -> Result<()> {
        if !self.is_service_running(name).await? {
            debug!("service {} already stopped", name);
            return Ok(());
        }
        self.systemctl("stop", name).await
    }

    async fn systemctl(&self, action: &str, name: &str) -> Result<()> {
        let unit = unit(name)?;
        self.sudo_ssh(&format!("systemctl {} {}", action, unit))
            .await
            .into_result()?;
        info!("service {}: {}", name, action);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::MockTransport;
    use crate::remote::RemoteConfig;
    use std::sync::{Arc, Mutex};

    /// Fake systemd tracking one unit's state.
    fn systemd(enabled: bool, running: bool) -> Arc<MockTransport> {
        let state = Arc::new(Mutex::new((enabled, running)));
        Arc::new(MockTransport::responding(move |cmd| {
            let mut state = state.lock().unwrap();
            let reply = |yes: bool, on: &str, off: &str| {
                if yes {
                    (0, format!("{}\n", on), String::new())
                } else {
                    (1, format!("{}\n", off), String::new())
                }
            };
            if cmd.contains("is-enabled") {
                reply(state.0, "enabled", "disabled")
            } else if cmd.contains("is-active") {
                reply(state.1, "active", "inactive")
            } else {
                if cmd.contains("systemctl enable") {
                    state.0 = true;
                } else if cmd.contains("systemctl disable") {
                    state.0 = false;
                } else if cmd.contains("systemctl start") {
                    state.1 = true;
                } else if cmd.contains("systemctl stop") {
                    state.1 = false;
                }
                (0, String::new(), String::new())
            }
        }))
    }

    fn mutations(transport: &MockTransport) -> Vec<String> {
        transport
            .commands()
            .into_iter()
            .filter(|c| !c.contains("is-enabled") && !c.contains("is-active"))
            .collect()
    }

    async fn client(transport: Arc<MockTransport>) -> RemoteClient {
        let config = RemoteConfig::new("deploy", "web-1").with_password("pw");
        let client = RemoteClient::with_transport(config, transport);
        client.open().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_enable_twice_mutates_once() {
        let transport = systemd(false, false);
        let client = client(transport.clone()).await;

        client.enable_linux_service("app").await.unwrap();
        client.enable_linux_service("app").await.unwrap();

        let changes = mutations(&transport);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].contains("systemctl enable app"));
        assert!(client.is_service_enabled("app").await.unwrap());
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let transport = systemd(true, false);
        let client = client(transport.clone()).await;

        client.stop_linux_service("app").await.unwrap();
        client.disable_linux_service("app").await.unwrap();

        let changes = mutations(&transport);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].contains("systemctl disable app"));
    }

    #[tokio::test]
    async fn test_start_and_status() {
        let transport = systemd(true, false);
        let client = client(transport).await;

        assert_eq!(
            client.service_status("app").await.unwrap(),
            ServiceStatus {
                enabled: true,
                running: false
            }
        );
        client.start_linux_service("app").await.unwrap();
        assert!(client.is_service_running("app").await.unwrap());
    }

    #[tokio::test]
    async fn test_query_on_closed_client_fails() {
        let transport = systemd(false, false);
        let config = RemoteConfig::new("deploy", "web-1").with_password("pw");
        let client = RemoteClient::with_transport(config, transport);

        assert!(matches!(
            client.is_service_enabled("app").await,
            Err(CourierError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let client = client(systemd(false, false)).await;
        assert!(matches!(
            client.start_linux_service(" ").await,
            Err(CourierError::Config(_))
        ));
    }
}
