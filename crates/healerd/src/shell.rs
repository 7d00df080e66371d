//! Shell executor for targets on the local host.
//!
//! Runs commands with `sh -c` inside the target's root directory. Backups are
//! gzip'd tar archives of the root directory kept under the backup dir. A
//! restore extracts into a sibling staging directory and swaps it in, so
//! files created after the backup do not survive.

use async_trait::async_trait;
use chrono::Utc;
use healer_common::{Target, ValidatedCommand};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::remote::{CommandOutput, RemoteError, RemoteExecutor};

pub struct ShellExecutor {
    backup_dir: PathBuf,
}

impl ShellExecutor {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    fn archive_path(&self, backup_id: &str) -> PathBuf {
        self.backup_dir.join(format!("{}.tar.gz", backup_id))
    }
}

#[async_trait]
impl RemoteExecutor for ShellExecutor {
    async fn execute(
        &self,
        target: &Target,
        command: &ValidatedCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        debug!(target_id = %target.id, "sh -c {}", command);
        let start = Instant::now();

        let child = Command::new("sh")
            .arg("-c")
            .arg(command.as_str())
            .current_dir(&target.root_path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(RemoteError::Transport(e.to_string())),
            Err(_) => return Err(RemoteError::Timeout(timeout)),
        };

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn take_backup(&self, target: &Target) -> Result<String, RemoteError> {
        tokio::fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(|e| RemoteError::Backup(format!("cannot create backup dir: {}", e)))?;

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let backup_id = format!(
            "{}-{}-{}",
            target.id,
            Utc::now().format("%Y%m%d%H%M%S"),
            &suffix[..8]
        );
        let archive = self.archive_path(&backup_id);

        let status = Command::new("tar")
            .arg("-czf")
            .arg(&archive)
            .arg("-C")
            .arg(Path::new(&target.root_path))
            .arg(".")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RemoteError::Backup(e.to_string()))?;

        if !status.status.success() {
            let stderr = String::from_utf8_lossy(&status.stderr).trim().to_string();
            warn!(target_id = %target.id, "tar backup failed: {}", stderr);
            let _ = tokio::fs::remove_file(&archive).await;
            return Err(RemoteError::Backup(stderr));
        }

        info!(target_id = %target.id, "Backup written to {}", archive.display());
        Ok(backup_id)
    }

    async fn restore_backup(&self, target: &Target, backup_id: &str) -> Result<bool, RemoteError> {
        let archive = self.archive_path(backup_id);
        if !archive.exists() {
            warn!(target_id = %target.id, "Backup archive missing: {}", archive.display());
            return Ok(false);
        }

        let root = Path::new(&target.root_path);
        let staging = sibling(root, "restore", backup_id)?;
        let replaced = sibling(root, "replaced", backup_id)?;
        let _ = tokio::fs::remove_dir_all(&staging).await;
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| RemoteError::Transport(format!("cannot create staging dir: {}", e)))?;

        let output = Command::new("tar")
            .arg("-xzf")
            .arg(&archive)
            .arg("-C")
            .arg(&staging)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        if !output.status.success() {
            warn!(
                target_id = %target.id,
                "tar restore failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Ok(false);
        }

        let had_root = root.exists();
        if had_root {
            if let Err(e) = tokio::fs::rename(root, &replaced).await {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                return Err(RemoteError::Transport(format!("cannot move root aside: {}", e)));
            }
        }
        if let Err(e) = tokio::fs::rename(&staging, root).await {
            if had_root {
                let _ = tokio::fs::rename(&replaced, root).await;
            }
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(RemoteError::Transport(format!("cannot swap in restored root: {}", e)));
        }
        if had_root {
            if let Err(e) = tokio::fs::remove_dir_all(&replaced).await {
                warn!(target_id = %target.id, "Leftover {}: {}", replaced.display(), e);
            }
        }

        info!(target_id = %target.id, "Restored {} into {}", backup_id, root.display());
        Ok(true)
    }
}

/// `/srv/site` -> `/srv/site.<what>-<backup_id>`
fn sibling(root: &Path, what: &str, backup_id: &str) -> Result<PathBuf, RemoteError> {
    let name = root
        .file_name()
        .ok_or_else(|| RemoteError::Transport(format!("cannot restore into {}", root.display())))?;
    Ok(root.with_file_name(format!(
        "{}.{}-{}",
        name.to_string_lossy(),
        what,
        backup_id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use healer_common::validate_command;
    use tempfile::TempDir;

    fn target(root: &Path) -> Target {
        Target::new("local", "http://localhost", root.to_string_lossy())
    }

    #[tokio::test]
    async fn test_runs_in_root_dir() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("marker.txt"), "here").unwrap();
        let shell = ShellExecutor::new(root.path().join("backups"));

        let cmd = validate_command("cat marker.txt").unwrap();
        let out = shell
            .execute(&target(root.path()), &cmd, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "here");
    }

    #[tokio::test]
    async fn test_timeout() {
        let root = TempDir::new().unwrap();
        let shell = ShellExecutor::new(root.path().join("backups"));
        let cmd = validate_command("sleep 5").unwrap();
        let result = shell
            .execute(&target(root.path()), &cmd, Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(RemoteError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_backup_restore_round() {
        let root = TempDir::new().unwrap();
        let backups = TempDir::new().unwrap();
        let file = root.path().join("wp-config.php");
        std::fs::write(&file, "original").unwrap();

        let shell = ShellExecutor::new(backups.path());
        let t = target(root.path());
        let id = shell.take_backup(&t).await.unwrap();

        std::fs::write(&file, "broken").unwrap();
        assert!(shell.restore_backup(&t, &id).await.unwrap());
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "original");

        assert!(!shell.restore_backup(&t, "missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_restore_drops_files_added_after_backup() {
        let parent = TempDir::new().unwrap();
        let root = parent.path().join("site");
        std::fs::create_dir_all(root.join("wp-content/plugins")).unwrap();
        std::fs::write(root.join("index.php"), "<?php").unwrap();
        let backups = TempDir::new().unwrap();

        let shell = ShellExecutor::new(backups.path());
        let t = target(&root);
        let id = shell.take_backup(&t).await.unwrap();

        std::fs::write(root.join(".maintenance"), "stuck").unwrap();
        std::fs::write(root.join("wp-content/plugins/dropped.php"), "bad").unwrap();
        std::fs::remove_file(root.join("index.php")).unwrap();

        assert!(shell.restore_backup(&t, &id).await.unwrap());
        assert!(!root.join(".maintenance").exists());
        assert!(!root.join("wp-content/plugins/dropped.php").exists());
        assert!(root.join("wp-content/plugins").is_dir());
        assert_eq!(std::fs::read_to_string(root.join("index.php")).unwrap(), "<?php");

        // No staging or moved-aside directories are left next to the root
        let leftovers: Vec<_> = std::fs::read_dir(parent.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("site")]);
    }
}
