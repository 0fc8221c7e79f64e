//! Records printed by the engine binary and the decoders for them.
//!
//! Every decoder fails with [`EngineError::Decode`] carrying the raw output on any
//! structural mismatch. Volume and backup names taken from listings are validated
//! before they are surfaced; state text is normalized while decoding.

use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned, IgnoredAny, Unexpected};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::state::{convert_engine_backup_state, BackupState};
use crate::target::validate_name;
use crate::utils::{EngineError, Result};

/// Key of the error entry in a record's `messages` map.
pub const MESSAGE_TYPE_ERROR: &str = "error";

fn deserialize_state<'de, D>(deserializer: D) -> std::result::Result<BackupState, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(convert_engine_backup_state(raw.as_deref().unwrap_or("")))
}

fn unknown_state() -> BackupState {
    BackupState::Unknown
}

/// A backup volume entry in the remote catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupVolume {
    pub name: String,
    pub size: String,
    pub labels: BTreeMap<String, String>,
    pub created: String,
    pub last_backup_name: String,
    pub last_backup_at: String,
    pub data_stored: String,
    pub messages: BTreeMap<String, String>,
    pub backups: BTreeMap<String, Backup>,
    pub backing_image_name: String,
    pub backing_image_checksum: String,
    pub storage_class_name: String,
}

impl BackupVolume {
    /// Non-empty error message embedded in an otherwise valid entry.
    pub fn error_message(&self) -> Option<&str> {
        self.messages
            .get(MESSAGE_TYPE_ERROR)
            .map(String::as_str)
            .filter(|m| !m.is_empty())
    }

    /// Valid backup names, sorted. Derived from the `backups` keys only.
    pub fn backup_names(&self) -> Vec<String> {
        self.backups
            .keys()
            .filter(|name| validate_name(name))
            .cloned()
            .collect()
    }
}

/// Full metadata of one backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Backup {
    pub name: String,
    #[serde(deserialize_with = "deserialize_state")]
    pub state: BackupState,
    pub url: String,
    pub snapshot_name: String,
    pub snapshot_created: String,
    pub created: String,
    pub size: String,
    pub labels: BTreeMap<String, String>,
    pub is_incremental: bool,
    pub volume_name: String,
    pub volume_size: String,
    pub volume_created: String,
    pub volume_backing_image_name: String,
    pub messages: BTreeMap<String, String>,
    pub compression_method: String,
}

impl Default for Backup {
    fn default() -> Self {
        Backup {
            name: String::new(),
            state: unknown_state(),
            url: String::new(),
            snapshot_name: String::new(),
            snapshot_created: String::new(),
            created: String::new(),
            size: String::new(),
            labels: BTreeMap::new(),
            is_incremental: false,
            volume_name: String::new(),
            volume_size: String::new(),
            volume_created: String::new(),
            volume_backing_image_name: String::new(),
            messages: BTreeMap::new(),
            compression_method: String::new(),
        }
    }
}

/// Result of the lightweight `backup head` probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigMetadata {
    pub modification_time: Option<DateTime<Utc>>,
}

/// Handle returned by `backup create` for later polling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BackupCreateInfo {
    #[serde(rename = "BackupID")]
    pub backup_id: String,
    pub is_incremental: bool,
    pub replica_address: String,
}

/// Progress of one in-flight backup on one replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupStatus {
    pub progress: i32,
    #[serde(rename = "backupURL")]
    pub backup_url: String,
    pub error: String,
    pub snapshot_name: String,
    #[serde(deserialize_with = "deserialize_state")]
    pub state: BackupState,
    pub replica_address: String,
}

impl Default for BackupStatus {
    fn default() -> Self {
        BackupStatus {
            progress: 0,
            backup_url: String::new(),
            error: String::new(),
            snapshot_name: String::new(),
            state: unknown_state(),
            replica_address: String::new(),
        }
    }
}

/// Restore progress of one replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RestoreStatus {
    pub is_restoring: bool,
    pub last_restored: String,
    pub current_restoring_backup: String,
    pub progress: i32,
    pub error: String,
    pub filename: String,
    #[serde(deserialize_with = "deserialize_state")]
    pub state: BackupState,
    #[serde(rename = "backupURL")]
    pub backup_url: String,
}

impl Default for RestoreStatus {
    fn default() -> Self {
        RestoreStatus {
            is_restoring: false,
            last_restored: String::new(),
            current_restoring_backup: String::new(),
            progress: 0,
            error: String::new(),
            filename: String::new(),
            state: unknown_state(),
            backup_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReplicaError {
    pub address: String,
    pub message: String,
}

/// Replica-attributed restore failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskError {
    #[serde(default)]
    pub replica_errors: Vec<ReplicaError>,
}

impl TaskError {
    /// Replica address to error message.
    pub fn by_replica(&self) -> BTreeMap<&str, &str> {
        self.replica_errors
            .iter()
            .map(|e| (e.address.as_str(), e.message.as_str()))
            .collect()
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let errs: Vec<String> = self
            .replica_errors
            .iter()
            .map(|e| format!("{}: {}", e.address, e.message))
            .collect();
        f.write_str(&errs.join("; "))
    }
}

impl std::error::Error for TaskError {}

/// How a failed restore reported itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreFailure {
    /// Per-replica errors; some replicas may still be healthy.
    Structured(TaskError),
    /// Anything else; the reason it is not structured.
    Raw(String),
}

/// Classify the output captured from a failed restore.
///
/// Any JSON object that decodes as a task error is structured, even one that
/// names no replica.
pub fn classify_restore_failure(output: &str) -> RestoreFailure {
    match from_object_str::<TaskError>(output) {
        Ok(task_err) => RestoreFailure::Structured(task_err),
        Err(e) => RestoreFailure::Raw(e.to_string()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineVersionDetails {
    pub version: String,
    pub git_commit: String,
    pub build_date: String,
    #[serde(rename = "cliAPIVersion")]
    pub cli_api_version: i64,
    #[serde(rename = "cliAPIMinVersion")]
    pub cli_api_min_version: i64,
    #[serde(rename = "controllerAPIVersion")]
    pub controller_api_version: i64,
    #[serde(rename = "controllerAPIMinVersion")]
    pub controller_api_min_version: i64,
    pub data_format_version: i64,
    pub data_format_min_version: i64,
}

/// Client and server versions reported by `version`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineVersion {
    pub client_version: EngineVersionDetails,
    #[serde(default)]
    pub server_version: Option<EngineVersionDetails>,
}

/// One entry of `snapshot info`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotInfo {
    pub name: String,
    pub parent: String,
    pub children: BTreeMap<String, bool>,
    pub removed: bool,
    pub usercreated: bool,
    pub created: String,
    pub size: String,
    pub labels: BTreeMap<String, String>,
}

/// Every engine record is a JSON object. Derived struct decoders would also take
/// a sequence, so the top-level shape is checked first.
fn from_object_str<T: DeserializeOwned>(output: &str) -> serde_json::Result<T> {
    let value: serde_json::Value = serde_json::from_str(output)?;
    if value.is_object() {
        return serde_json::from_value(value);
    }
    let unexpected = match &value {
        serde_json::Value::Object(_) => Unexpected::Map,
        serde_json::Value::Array(_) => Unexpected::Seq,
        serde_json::Value::String(s) => Unexpected::Str(s),
        serde_json::Value::Bool(b) => Unexpected::Bool(*b),
        serde_json::Value::Number(_) => Unexpected::Other("number"),
        serde_json::Value::Null => Unexpected::Unit,
    };
    Err(de::Error::invalid_type(unexpected, &"a JSON object"))
}

fn decode<T: DeserializeOwned>(output: &str, context: &str) -> Result<T> {
    from_object_str(output).map_err(|e| EngineError::decode(context, output, e))
}

/// Volume names from `backup ls --volume-only`: valid names only, sorted, unique.
pub fn parse_backup_volume_names_list(output: &str) -> Result<Vec<String>> {
    let data: BTreeMap<String, IgnoredAny> = decode(output, "error parsing backup volume names")?;
    Ok(data.into_keys().filter(|name| validate_name(name)).collect())
}

/// Backup names of one volume from `backup ls --volume <name>`.
///
/// An error message embedded in the volume entry fails the call even though the
/// payload decoded; no partial list is returned.
pub fn parse_backup_names_list(output: &str, volume_name: &str) -> Result<Vec<String>> {
    let mut data: BTreeMap<String, BackupVolume> = decode(output, "error parsing backup names")?;
    let volume = data
        .remove(volume_name)
        .ok_or_else(|| EngineError::VolumeMissing(volume_name.to_string()))?;

    if let Some(message) = volume.error_message() {
        return Err(EngineError::Catalog(message.to_string()));
    }
    Ok(volume.backup_names())
}

pub fn parse_backup_volume_config(output: &str) -> Result<BackupVolume> {
    decode(output, "error parsing one backup volume config")
}

pub fn parse_backup_config(output: &str) -> Result<Backup> {
    decode(output, "error parsing one backup config")
}

pub fn parse_config_metadata(output: &str) -> Result<ConfigMetadata> {
    decode(output, "error parsing config metadata")
}

pub fn parse_backup_create_info(output: &str) -> Result<BackupCreateInfo> {
    decode(output, "error parsing backup create info")
}

pub fn parse_backup_status(output: &str) -> Result<BackupStatus> {
    decode(output, "error parsing backup status")
}

/// Replica address to restore status; a decode failure fails the whole call.
pub fn parse_restore_status(output: &str) -> Result<BTreeMap<String, RestoreStatus>> {
    decode(output, "error parsing restore status")
}

pub fn parse_engine_version(output: &str) -> Result<EngineVersion> {
    decode(output, "error parsing engine version")
}

pub fn parse_snapshot_info(output: &str) -> Result<BTreeMap<String, SnapshotInfo>> {
    decode(output, "error parsing snapshot info")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_names_sorted_and_validated() {
        let output = r#"{"vol-b": {}, "vol-a": {"messages": {}}, "-bad": {}, "x": {}, "has space": {}}"#;
        let names = parse_backup_volume_names_list(output).unwrap();
        assert_eq!(names, vec!["vol-a".to_string(), "vol-b".to_string()]);
    }

    #[test]
    fn test_volume_names_decode_error_keeps_output() {
        let err = parse_backup_volume_names_list("not json").unwrap_err();
        match err {
            EngineError::Decode { output, .. } => assert_eq!(output, "not json"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_backup_names_for_volume() {
        let output = r#"{
            "vol-1": {
                "name": "vol-1",
                "messages": {},
                "backups": {
                    "backup-b": {"name": "backup-b", "state": "complete"},
                    "backup-a": {"name": "backup-a", "state": "in_progress"}
                }
            }
        }"#;
        let names = parse_backup_names_list(output, "vol-1").unwrap();
        assert_eq!(names, vec!["backup-a".to_string(), "backup-b".to_string()]);
    }

    #[test]
    fn test_backup_names_validated() {
        let output = r#"{"vol-1": {"backups": {"../evil name": {}, "x": {}, "backup-1": {}}}}"#;
        let names = parse_backup_names_list(output, "vol-1").unwrap();
        assert_eq!(names, vec!["backup-1".to_string()]);
    }

    #[test]
    fn test_backup_names_missing_volume() {
        let err = parse_backup_names_list(r#"{"vol-2": {}}"#, "vol-1").unwrap_err();
        assert!(matches!(err, EngineError::VolumeMissing(ref v) if v == "vol-1"));
        assert!(err.to_string().contains("cannot find the volume name vol-1"));
    }

    #[test]
    fn test_backup_names_embedded_error() {
        let output = r#"{"vol-1": {
            "messages": {"error": "failed to load backup.cfg"},
            "backups": {"backup-a": {}}
        }}"#;
        let err = parse_backup_names_list(output, "vol-1").unwrap_err();
        assert!(matches!(err, EngineError::Catalog(ref m) if m == "failed to load backup.cfg"));
    }

    #[test]
    fn test_backup_names_empty_error_message_ignored() {
        let output = r#"{"vol-1": {"messages": {"error": ""}, "backups": {"backup-a": {}}}}"#;
        assert_eq!(parse_backup_names_list(output, "vol-1").unwrap(), vec!["backup-a".to_string()]);
    }

    #[test]
    fn test_backup_config() {
        let output = r#"{
            "name": "backup-1",
            "state": "complete",
            "url": "s3://bucket@us-east-1/?backup=backup-1&volume=vol-1",
            "snapshotName": "snap-1",
            "size": "2097152",
            "labels": {"app": "db"},
            "isIncremental": true,
            "volumeName": "vol-1",
            "compressionMethod": "lz4",
            "someFutureField": 1
        }"#;
        let backup = parse_backup_config(output).unwrap();
        assert_eq!(backup.state, BackupState::Completed);
        assert_eq!(backup.snapshot_name, "snap-1");
        assert_eq!(backup.labels.get("app").map(String::as_str), Some("db"));
        assert!(backup.is_incremental);
        assert_eq!(backup.compression_method, "lz4");
    }

    #[test]
    fn test_config_metadata() {
        let meta = parse_config_metadata(r#"{"modificationTime": "2024-03-01T10:00:00Z"}"#).unwrap();
        assert_eq!(
            meta.modification_time.map(|t| t.to_rfc3339()),
            Some("2024-03-01T10:00:00+00:00".to_string())
        );
        assert!(parse_config_metadata("[]").is_err());
    }

    #[test]
    fn test_records_reject_non_object_output() {
        assert!(matches!(parse_backup_config("[]"), Err(EngineError::Decode { .. })));
        assert!(matches!(parse_backup_volume_config(r#"["vol-1"]"#), Err(EngineError::Decode { .. })));
        assert!(matches!(parse_backup_create_info(r#""backup-1""#), Err(EngineError::Decode { .. })));
        assert!(matches!(parse_backup_status("null"), Err(EngineError::Decode { .. })));
        assert!(matches!(parse_restore_status("[]"), Err(EngineError::Decode { .. })));
        assert!(matches!(parse_backup_volume_names_list("42"), Err(EngineError::Decode { .. })));

        let err = parse_config_metadata("[]").unwrap_err();
        match err {
            EngineError::Decode { output, .. } => assert_eq!(output, "[]"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_backup_create_info() {
        let info = parse_backup_create_info(
            r#"{"BackupID": "backup-0a1b", "IsIncremental": false, "ReplicaAddress": "tcp://10.0.0.5:10000"}"#,
        )
        .unwrap();
        assert_eq!(info.backup_id, "backup-0a1b");
        assert_eq!(info.replica_address, "tcp://10.0.0.5:10000");
    }

    #[test]
    fn test_backup_status_normalizes_state() {
        let status = parse_backup_status(
            r#"{"progress": 42, "backupURL": "", "snapshotName": "snap-1", "state": "in_progress", "replicaAddress": "tcp://10.0.0.5:10000"}"#,
        )
        .unwrap();
        assert_eq!(status.progress, 42);
        assert_eq!(status.state, BackupState::InProgress);

        let status = parse_backup_status(r#"{"state": "weird"}"#).unwrap();
        assert_eq!(status.state, BackupState::Unknown);
        let status = parse_backup_status(r#"{"state": null}"#).unwrap();
        assert_eq!(status.state, BackupState::Unknown);
    }

    #[test]
    fn test_restore_status_map() {
        let output = r#"{
            "tcp://10.0.0.5:10000": {"isRestoring": true, "progress": 10, "state": "in_progress", "backupURL": "s3://b"},
            "tcp://10.0.0.6:10000": {"isRestoring": false, "lastRestored": "backup-1", "state": "complete"}
        }"#;
        let statuses = parse_restore_status(output).unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses["tcp://10.0.0.5:10000"].state, BackupState::InProgress);
        assert_eq!(statuses["tcp://10.0.0.6:10000"].last_restored, "backup-1");

        assert!(parse_restore_status(r#"{"tcp://10.0.0.5:10000": "broken"}"#).is_err());
    }

    #[test]
    fn test_classify_restore_failure() {
        let output = r#"{"ReplicaErrors": [
            {"Address": "tcp://10.0.0.5:10000", "Message": "disk full"},
            {"Address": "tcp://10.0.0.6:10000", "Message": "timeout"}
        ]}"#;
        match classify_restore_failure(output) {
            RestoreFailure::Structured(task_err) => {
                assert_eq!(task_err.by_replica()["tcp://10.0.0.5:10000"], "disk full");
                assert_eq!(
                    task_err.to_string(),
                    "tcp://10.0.0.5:10000: disk full; tcp://10.0.0.6:10000: timeout"
                );
            }
            other => panic!("unexpected classification: {other:?}"),
        }

        assert!(matches!(classify_restore_failure("exit status 1"), RestoreFailure::Raw(_)));
        assert!(matches!(classify_restore_failure("[]"), RestoreFailure::Raw(_)));
        assert_eq!(
            classify_restore_failure("{}"),
            RestoreFailure::Structured(TaskError::default())
        );
    }

    #[test]
    fn test_engine_version() {
        let output = r#"{
            "clientVersion": {"version": "v1.5.1", "cliAPIVersion": 8, "cliAPIMinVersion": 3},
            "serverVersion": null
        }"#;
        let version = parse_engine_version(output).unwrap();
        assert_eq!(version.client_version.cli_api_version, 8);
        assert_eq!(version.client_version.cli_api_min_version, 3);
        assert!(version.server_version.is_none());
    }

    #[test]
    fn test_snapshot_info() {
        let output = r#"{
            "snap-1": {"name": "snap-1", "parent": "", "children": {"volume-head": true}, "usercreated": true},
            "volume-head": {"name": "volume-head", "parent": "snap-1"}
        }"#;
        let snapshots = parse_snapshot_info(output).unwrap();
        assert!(snapshots["snap-1"].usercreated);
        assert_eq!(snapshots["volume-head"].parent, "snap-1");
    }
}
