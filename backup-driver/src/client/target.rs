//! Catalog reads and deletions against one backup target.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::EngineConfig;
use crate::credential::credential_env;
use crate::executor::{Execute, ExecuteTimeout, ProcessExecutor};
use crate::protocol::{
    parse_backup_config, parse_backup_names_list, parse_backup_volume_config,
    parse_backup_volume_names_list, parse_config_metadata, Backup, BackupVolume, ConfigMetadata,
};
use crate::target::{decode_backup_url, BackupTarget};
use crate::utils::{EngineError, Result, ResultExt};

/// Drives `backup` subcommands addressed to a remote store rather than an engine.
///
/// Holds no state between calls; every method is one engine invocation.
pub struct BackupTargetClient {
    binary: PathBuf,
    target: BackupTarget,
    executor: Arc<dyn Execute>,
}

impl BackupTargetClient {
    pub fn new(binary: PathBuf, target: BackupTarget, executor: Arc<dyn Execute>) -> Self {
        Self {
            binary,
            target,
            executor,
        }
    }

    pub fn from_config(config: &EngineConfig, target: BackupTarget) -> Self {
        Self::new(
            config.binary_path(),
            target,
            Arc::new(ProcessExecutor::from_config(config)),
        )
    }

    pub fn target(&self) -> &BackupTarget {
        &self.target
    }

    async fn execute(&self, args: &[&str], timeout: ExecuteTimeout) -> Result<String> {
        let envs = credential_env(self.target.backend, self.target.credential.as_ref())?;
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.executor
            .execute(&envs, &self.binary, &args, timeout)
            .await
    }

    /// Names of all backup volumes in the target, sorted; invalid names are dropped.
    pub async fn backup_volume_name_list(&self) -> Result<Vec<String>> {
        let url = self.target.url.as_str();
        let output = self
            .execute(&["backup", "ls", "--volume-only", url], ExecuteTimeout::Default)
            .await
            .absent_ok()
            .context("error listing backup volume names")?;
        match output {
            Some(output) => parse_backup_volume_names_list(&output),
            None => Ok(Vec::new()),
        }
    }

    /// Names of the backups of one volume, sorted.
    pub async fn backup_name_list(&self, volume_name: &str) -> Result<Vec<String>> {
        if volume_name.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.target.url.as_str();
        let output = self
            .execute(&["backup", "ls", "--volume", volume_name, url], ExecuteTimeout::Default)
            .await
            .absent_ok()
            .with_context(|| format!("error listing volume {} backup", volume_name))?;
        match output {
            Some(output) => parse_backup_names_list(&output, volume_name),
            None => Ok(Vec::new()),
        }
    }

    /// Delete a backup volume and all its backups. Already absent is success.
    pub async fn backup_volume_delete(&self, volume_name: &str) -> Result<()> {
        info!("Start deleting backup volume {}", volume_name);
        let url = self.target.url.as_str();
        let deleted = self
            .execute(&["backup", "rm", "--volume", volume_name, url], ExecuteTimeout::Unbounded)
            .await
            .absent_ok()
            .with_context(|| format!("error deleting backup volume {}", volume_name))?;
        if deleted.is_some() {
            info!("Complete deleting backup volume {}", volume_name);
        }
        Ok(())
    }

    /// Inspect one backup volume by its volume URL.
    pub async fn backup_volume_get(&self, backup_volume_url: &str) -> Result<Option<BackupVolume>> {
        let output = self
            .execute(&["backup", "inspect-volume", backup_volume_url], ExecuteTimeout::Default)
            .await
            .absent_ok()
            .with_context(|| format!("error getting backup volume config {}", backup_volume_url))?;
        output.map(|o| parse_backup_volume_config(&o)).transpose()
    }

    /// Inspect one backup by its backup URL.
    pub async fn backup_get(&self, backup_url: &str) -> Result<Option<Backup>> {
        let output = self
            .execute(&["backup", "inspect", backup_url], ExecuteTimeout::Default)
            .await
            .absent_ok()
            .with_context(|| format!("error getting backup config {}", backup_url))?;
        output.map(|o| parse_backup_config(&o)).transpose()
    }

    /// Cheap existence and staleness probe.
    pub async fn backup_config_meta_get(&self, url: &str) -> Result<Option<ConfigMetadata>> {
        let output = self
            .execute(&["backup", "head", url], ExecuteTimeout::Default)
            .await
            .absent_ok()
            .with_context(|| format!("error getting config metadata {}", url))?;
        output.map(|o| parse_config_metadata(&o)).transpose()
    }

    /// Delete one backup. Already absent is success.
    ///
    /// The locator must name both a backup and its volume.
    pub async fn backup_delete(&self, backup_url: &str) -> Result<()> {
        let (backup_name, volume_name, _) = decode_backup_url(backup_url)?;
        if backup_name.is_empty() {
            return Err(EngineError::Validation(format!(
                "backup URL {} does not name a backup",
                backup_url
            )));
        }

        info!("Start deleting backup {} of volume {}", backup_name, volume_name);
        let deleted = self
            .execute(&["backup", "rm", backup_url], ExecuteTimeout::Unbounded)
            .await
            .absent_ok()
            .with_context(|| format!("error deleting backup {}", backup_url))?;
        if deleted.is_some() {
            info!("Complete deleting backup {} of volume {}", backup_name, volume_name);
        }
        Ok(())
    }

    /// Release every mount point the engine holds for network-share targets.
    pub async fn backup_cleanup_all_mounts(&self) -> Result<()> {
        self.execute(&["backup", "cleanup-all-mounts"], ExecuteTimeout::Unbounded)
            .await
            .context("error clean up all mount points")?;
        Ok(())
    }
}
