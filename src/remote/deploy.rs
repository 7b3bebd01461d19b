//! Atomic file installation and service deployment on top of the copy protocol.

use std::path::Path;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::client::RemoteClient;
use crate::error::CourierError;
use crate::execution::shell_quote;
use crate::Result;

/// Mode given to directories created on the way to an installed file.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Where systemd looks for administrator-installed units.
pub const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";

/// `owner:group` argument for chown, or `None` when both are empty.
fn ownership(owner: &str, group: &str) -> Option<String> {
    match (owner.is_empty(), group.is_empty()) {
        (true, true) => None,
        (false, true) => Some(owner.to_string()),
        (true, false) => Some(format!(":{}", group)),
        (false, false) => Some(format!("{}:{}", owner, group)),
    }
}

/// Commands that give `path` its final owner and mode.
fn finish_commands(path: &str, owner: &str, group: &str, mode: u32) -> String {
    let path = shell_quote(path);
    let mut commands = Vec::with_capacity(2);
    if let Some(owner) = ownership(owner, group) {
        commands.push(format!("chown {} {}", shell_quote(&owner), path));
    }
    commands.push(format!("chmod {:o} {}", mode & 0o7777, path));
    commands.join(" && ")
}

/// Parent directory of an absolute remote path.
fn parent_dir(remote_path: &str) -> Result<&str> {
    if !remote_path.starts_with('/') || remote_path.ends_with('/') {
        return Err(CourierError::Config(format!(
            "remote path `{}` must be an absolute file path",
            remote_path
        )));
    }
    Ok(match remote_path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((dir, _)) => dir,
    })
}

impl RemoteClient {
    /// Whether `test <flag> <path>` holds on the remote host.
    async fn remote_test(&self, flag: &str, path: &str) -> Result<bool> {
        let result = self
            .ssh(&format!("test {} {}", flag, shell_quote(path)))
            .await;
        match result.error {
            None => Ok(true),
            Some(CourierError::RemoteExit { .. }) => Ok(false),
            Some(e) => Err(e),
        }
    }

    /// Create `dir` and any missing parents, giving each new directory
    /// the requested owner and mode. Existing directories are left as is.
    pub async fn ensure_dir(&self, dir: &str, owner: &str, group: &str, mode: u32) -> Result<()> {
        let dir = dir.trim_end_matches('/');
        if dir.is_empty() {
            return Ok(());
        }

        let mut missing = Vec::new();
        let mut current = dir;
        while !current.is_empty() && !self.remote_test("-d", current).await? {
            missing.push(current);
            current = match current.rsplit_once('/') {
                Some((parent, _)) => parent,
                None => "",
            };
        }

        for path in missing.into_iter().rev() {
            debug!("creating remote directory {}", path);
            let command = format!(
                "mkdir {} && {}",
                shell_quote(path),
                finish_commands(path, owner, group, mode)
            );
            self.sudo_ssh(&command).await.into_result()?;
        }
        Ok(())
    }

    /// Install `local_path` at `remote_path` with the given owner and mode.
    ///
    /// The file is uploaded to a randomly named staging file first and
    /// moved into place only once complete, so the final path never holds
    /// a partial file. The staging file is removed if anything fails.
    pub async fn scp_file(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        owner: &str,
        group: &str,
        mode: u32,
    ) -> Result<()> {
        let local_path = local_path.as_ref();
        let parent = parent_dir(remote_path)?;
        self.ensure_dir(parent, owner, group, DEFAULT_DIR_MODE)
            .await?;

        let staging = format!(
            "{}/.shell-courier-{}",
            self.config().remote_temp_dir.trim_end_matches('/'),
            Uuid::new_v4().simple()
        );

        let installed = match self.copy_file_with_mode(local_path, &staging, 0o600).await {
            Ok(()) => {
                let command = format!(
                    "mv -f {} {} && {}",
                    shell_quote(&staging),
                    shell_quote(remote_path),
                    finish_commands(remote_path, owner, group, mode)
                );
                self.sudo_ssh(&command).await.into_result().map(drop)
            }
            Err(e) => Err(e),
        };

        if let Err(e) = installed {
            self.remove_staging(&staging).await;
            return Err(e);
        }
        info!("installed {} at {}", local_path.display(), remote_path);
        Ok(())
    }

    async fn remove_staging(&self, staging: &str) {
        let result = self
            .sudo_ssh(&format!("rm -f {}", shell_quote(staging)))
            .await;
        if let Some(e) = result.error {
            warn!("failed to remove staging file {}: {}", staging, e);
        }
    }

    /// Install `unit_file` as `<name>.service`, reload systemd, then
    /// enable and start the service.
    pub async fn deploy_linux_service(&self, name: &str, unit_file: impl AsRef<Path>) -> Result<()> {
        if name.trim().is_empty() || name.contains('/') {
            return Err(CourierError::Config(format!("invalid service name `{}`", name)));
        }
        let unit_path = format!("{}/{}.service", SYSTEMD_UNIT_DIR, name);
        self.scp_file(unit_file, &unit_path, "root", "root", 0o644)
            .await?;
        self.sudo_ssh("systemctl daemon-reload").await.into_result()?;
        self.enable_linux_service(name).await?;
        self.start_linux_service(name).await?;
        info!("deployed service {}", name);
        Ok(())
    }
}
