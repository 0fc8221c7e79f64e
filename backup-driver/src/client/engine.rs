//! Backup creation, restore and progress polling through a running engine.
//!
//! Create and restore only launch asynchronous work on the replicas, so they run
//! without a local bound; status polls are cheap reads under the default bound.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::compat::{supports, Feature};
use crate::config::EngineConfig;
use crate::credential::credential_env;
use crate::executor::{Execute, ExecuteTimeout, ProcessExecutor};
use crate::protocol::{
    classify_restore_failure, parse_backup_create_info, parse_backup_status, parse_engine_version,
    parse_restore_status, parse_snapshot_info, BackupCreateInfo, BackupStatus, EngineVersion,
    RestoreFailure, RestoreStatus, SnapshotInfo,
};
use crate::target::{encode_backup_url, BackupTarget};
use crate::utils::{EngineError, Result, ResultExt};

/// Reserved name of a volume's live, still-mutable state.
pub const VOLUME_HEAD_NAME: &str = "volume-head";

/// Placeholder the legacy CLI expects in place of a backing image checksum.
const DEPRECATED_BACKING_IMAGE_URL: &str = "deprecated-field";

/// Resolves a snapshot by name before it is backed up.
#[async_trait]
pub trait SnapshotLookup: Send + Sync {
    async fn snapshot_get(&self, name: &str) -> Result<Option<SnapshotInfo>>;
}

/// What to back up and where.
#[derive(Debug, Clone)]
pub struct SnapshotBackupRequest {
    pub snapshot_name: String,
    /// Requested backup identifier; ignored by legacy engines
    pub backup_name: String,
    pub target: BackupTarget,
    pub backing_image_name: String,
    pub backing_image_checksum: String,
    pub labels: BTreeMap<String, String>,
}

/// Client for one engine (volume controller) process.
pub struct EngineClient {
    binary: PathBuf,
    engine_url: String,
    volume_name: String,
    executor: Arc<dyn Execute>,
}

impl EngineClient {
    pub fn new(
        binary: PathBuf,
        engine_url: impl Into<String>,
        volume_name: impl Into<String>,
        executor: Arc<dyn Execute>,
    ) -> Self {
        Self {
            binary,
            engine_url: engine_url.into(),
            volume_name: volume_name.into(),
            executor,
        }
    }

    pub fn from_config(
        config: &EngineConfig,
        engine_url: impl Into<String>,
        volume_name: impl Into<String>,
    ) -> Self {
        Self::new(
            config.binary_path(),
            engine_url,
            volume_name,
            Arc::new(ProcessExecutor::from_config(config)),
        )
    }

    pub fn volume_name(&self) -> &str {
        &self.volume_name
    }

    /// Run a command against this engine: `--url <engine> <args...>`.
    async fn execute(&self, envs: &[String], args: Vec<String>, timeout: ExecuteTimeout) -> Result<String> {
        let mut full_args = Vec::with_capacity(args.len() + 2);
        full_args.push("--url".to_string());
        full_args.push(self.engine_url.clone());
        full_args.extend(args);
        self.executor
            .execute(envs, &self.binary, &full_args, timeout)
            .await
    }

    /// Client-side version of the engine binary.
    pub async fn version_get(&self) -> Result<EngineVersion> {
        let args = vec!["version".to_string(), "--client-only".to_string()];
        let output = self
            .executor
            .execute(&[], &self.binary, &args, ExecuteTimeout::Default)
            .await
            .context("error getting engine version")?;
        parse_engine_version(&output)
    }

    /// Start backing up a snapshot. Returns the backup identifier and the replica
    /// doing the transfer, for later status polls.
    pub async fn snapshot_backup<L>(&self, lookup: &L, req: &SnapshotBackupRequest) -> Result<BackupCreateInfo>
    where
        L: SnapshotLookup + ?Sized,
    {
        if req.snapshot_name == VOLUME_HEAD_NAME {
            return Err(EngineError::Validation(format!(
                "invalid operation: cannot backup {}",
                VOLUME_HEAD_NAME
            )));
        }
        let envs = credential_env(req.target.backend, req.target.credential.as_ref())?;

        let snapshot = lookup.snapshot_get(&req.snapshot_name).await.with_context(|| {
            format!(
                "error getting snapshot '{}', volume '{}'",
                req.snapshot_name, self.volume_name
            )
        })?;
        if snapshot.is_none() {
            return Err(EngineError::NotFound(format!(
                "could not find snapshot '{}' to backup, volume '{}'",
                req.snapshot_name, self.volume_name
            )));
        }

        let version = self.version_get().await?;
        let args = backup_create_args(req, &version);

        let output = self.execute(&envs, args, ExecuteTimeout::Unbounded).await?;
        let info = parse_backup_create_info(&output)?;

        info!(
            "Backup {} created for volume {} snapshot {}",
            info.backup_id, self.volume_name, req.snapshot_name
        );
        Ok(info)
    }

    /// Progress of one backup, optionally on a specific replica.
    ///
    /// The replica instance name is only forwarded to engines that understand it.
    pub async fn snapshot_backup_status(
        &self,
        backup_name: &str,
        replica_address: Option<&str>,
        replica_name: Option<&str>,
    ) -> Result<BackupStatus> {
        let mut args = vec!["backup".to_string(), "status".to_string(), backup_name.to_string()];
        if let Some(address) = replica_address.filter(|a| !a.is_empty()) {
            args.push("--replica".to_string());
            args.push(address.to_string());
        }

        if let Some(name) = replica_name.filter(|n| !n.is_empty()) {
            let version = self.version_get().await?;
            if supports(&version, Feature::ReplicaInstanceName) {
                args.push("--replica-instance-name".to_string());
                args.push(name.to_string());
            } else {
                debug!(
                    cli_api_version = version.client_version.cli_api_version,
                    "Engine does not accept --replica-instance-name, omitting {}", name
                );
            }
        }

        let output = self.execute(&[], args, ExecuteTimeout::Default).await?;
        parse_backup_status(&output)
    }

    /// Start restoring a backup into this engine's replicas.
    ///
    /// With `last_restored` the restore is incremental from that backup. A failure
    /// whose output decodes as a task error is returned as [`EngineError::Task`].
    pub async fn backup_restore(
        &self,
        target: &BackupTarget,
        backup_name: &str,
        backup_volume_name: &str,
        last_restored: Option<&str>,
    ) -> Result<()> {
        let backup = encode_backup_url(backup_name, backup_volume_name, &target.url);
        if backup.is_empty() {
            return Err(EngineError::Validation(format!(
                "cannot restore backup '{}' of volume '{}' from '{}'",
                backup_name, backup_volume_name, target.url
            )));
        }
        let envs = credential_env(target.backend, target.credential.as_ref())?;

        let mut args = vec!["backup".to_string(), "restore".to_string(), backup.clone()];
        if let Some(last) = last_restored.filter(|l| !l.is_empty()) {
            args.push("--incrementally".to_string());
            args.push("--last-restored".to_string());
            args.push(last.to_string());
        }

        if let Err(e) = self.execute(&envs, args, ExecuteTimeout::Unbounded).await {
            let output = e.execution_output().unwrap_or("");
            return match classify_restore_failure(output) {
                RestoreFailure::Structured(task_err) => Err(EngineError::Task(task_err)),
                RestoreFailure::Raw(reason) => {
                    warn!(
                        "Cannot unmarshal the restore error, maybe it's not caused by the replica restore failure: {}",
                        reason
                    );
                    Err(e)
                }
            };
        }

        info!("Backup {} restored for volume {}", backup, self.volume_name);
        Ok(())
    }

    /// Restore progress of every replica, keyed by replica address.
    pub async fn backup_restore_status(&self) -> Result<BTreeMap<String, RestoreStatus>> {
        let args = vec!["backup".to_string(), "restore-status".to_string()];
        let output = self.execute(&[], args, ExecuteTimeout::Default).await?;
        parse_restore_status(&output)
    }
}

#[async_trait]
impl SnapshotLookup for EngineClient {
    async fn snapshot_get(&self, name: &str) -> Result<Option<SnapshotInfo>> {
        let args = vec!["snapshot".to_string(), "info".to_string()];
        let output = self.execute(&[], args, ExecuteTimeout::Default).await?;
        let mut snapshots = parse_snapshot_info(&output)?;
        Ok(snapshots.remove(name))
    }
}

/// `backup create` arguments, gated on what the engine CLI accepts.
fn backup_create_args(req: &SnapshotBackupRequest, version: &EngineVersion) -> Vec<String> {
    let mut args = vec![
        "backup".to_string(),
        "create".to_string(),
        "--dest".to_string(),
        req.target.url.clone(),
    ];

    if !req.backing_image_name.is_empty() {
        args.push("--backing-image-name".to_string());
        args.push(req.backing_image_name.clone());
        if !supports(version, Feature::BackingImageChecksum) {
            args.push("--backing-image-url".to_string());
            args.push(DEPRECATED_BACKING_IMAGE_URL.to_string());
        } else if !req.backing_image_checksum.is_empty() {
            args.push("--backing-image-checksum".to_string());
            args.push(req.backing_image_checksum.clone());
        }
    }

    if !req.backup_name.is_empty() && supports(version, Feature::ExplicitBackupName) {
        args.push("--backup-name".to_string());
        args.push(req.backup_name.clone());
    }

    for (key, value) in &req.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push(req.snapshot_name.clone());
    args
}
