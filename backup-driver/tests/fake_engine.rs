//! Drives the clients against a shell script standing in for the engine binary.

#![cfg(unix)]

use backup_driver::client::{BackupTargetClient, EngineClient, SnapshotBackupRequest};
use backup_driver::target::{BackupTarget, Credential};
use backup_driver::{EngineError, ProcessExecutor};
use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const ENGINE_SCRIPT: &str = r#"#!/bin/sh
if [ "$1" = "--url" ]; then shift 2; fi
case "$1 $2" in
  "version --client-only")
    echo '{"clientVersion": {"version": "v1.x", "cliAPIVersion": 9}}' ;;
  "snapshot info")
    echo '{"snap-1": {"name": "snap-1"}}' ;;
  "backup ls")
    if [ "$3" = "--volume-only" ]; then
      printf '{"vol-a": {}, "%s": {}, "bad name": {}}' "$CIFS_USERNAME"
    else
      printf '{"%s": {"messages": {}, "backups": {"backup-2": {}, "backup-1": {}}}}' "$4"
    fi ;;
  "backup create")
    echo '{"BackupID": "backup-9", "IsIncremental": false, "ReplicaAddress": "tcp://10.0.0.1:10000"}' ;;
  "backup rm")
    echo "cannot find $3 in backupstore" >&2
    exit 1 ;;
  "backup restore")
    echo '{"ReplicaErrors": [{"Address": "tcp://10.0.0.1:10000", "Message": "no space left"}]}'
    exit 1 ;;
  "backup status")
    sleep 30 ;;
  *)
    echo "unknown command: $*" >&2
    exit 2 ;;
esac
"#;

fn install_engine(dir: &Path) -> PathBuf {
    let path = dir.join("engine");
    std::fs::write(&path, ENGINE_SCRIPT).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn cifs_target() -> BackupTarget {
    let credential: Credential = [("CIFS_USERNAME", "vol-env"), ("CIFS_PASSWORD", "pw")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    BackupTarget::new("cifs://nas.local/backups", Some(credential)).unwrap()
}

// One test per binary so no other test forks while the script is being written.
#[tokio::test]
async fn drives_fake_engine_end_to_end() {
    let dir = TempDir::new().unwrap();
    let binary = install_engine(dir.path());
    let executor = Arc::new(ProcessExecutor::new(
        Duration::from_millis(500),
        Duration::from_millis(100),
    ));

    let target_client = BackupTargetClient::new(binary.clone(), cifs_target(), executor.clone());

    // Credentials reach the engine through its environment.
    let volumes = target_client.backup_volume_name_list().await.unwrap();
    assert_eq!(volumes, vec!["vol-a".to_string(), "vol-env".to_string()]);

    let backups = target_client.backup_name_list("vol-a").await.unwrap();
    assert_eq!(backups, vec!["backup-1".to_string(), "backup-2".to_string()]);

    // Deleting an absent backup succeeds.
    target_client
        .backup_delete("cifs://nas.local/backups?backup=backup-1&volume=vol-a")
        .await
        .unwrap();

    let engine = EngineClient::new(binary, "10.0.0.1:10000", "vol-a", executor);

    let request = SnapshotBackupRequest {
        snapshot_name: "snap-1".to_string(),
        backup_name: "backup-9".to_string(),
        target: cifs_target(),
        backing_image_name: String::new(),
        backing_image_checksum: String::new(),
        labels: BTreeMap::new(),
    };
    let info = engine.snapshot_backup(&engine, &request).await.unwrap();
    assert_eq!(info.backup_id, "backup-9");
    assert_eq!(info.replica_address, "tcp://10.0.0.1:10000");

    let err = engine
        .backup_restore(&cifs_target(), "backup-9", "vol-a", None)
        .await
        .unwrap_err();
    match err {
        EngineError::Task(task_err) => {
            assert_eq!(task_err.by_replica()["tcp://10.0.0.1:10000"], "no space left");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Status polls run under the bounded policy.
    let err = engine
        .snapshot_backup_status("backup-9", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout { .. }));
}
