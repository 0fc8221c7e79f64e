//! Backup target descriptors: backend detection, name validation and backup locators.

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use url::Url;

use crate::utils::{EngineError, Result};

/// Backend-specific secrets, keyed by environment variable name.
pub type Credential = BTreeMap<String, String>;

/// The kind of remote store a target URL addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendType {
    S3,
    Cifs,
    AzBlob,
    Nfs,
}

impl BackendType {
    /// Detect the backend from the scheme of a target URL.
    pub fn from_url(target: &str) -> Result<Self> {
        let parsed = Url::parse(target).map_err(|e| {
            EngineError::Validation(format!("invalid backup target URL '{}': {}", target, e))
        })?;
        match parsed.scheme() {
            "s3" => Ok(BackendType::S3),
            "cifs" => Ok(BackendType::Cifs),
            "azblob" => Ok(BackendType::AzBlob),
            "nfs" => Ok(BackendType::Nfs),
            other => Err(EngineError::Validation(format!(
                "unsupported backup target type '{}' in {}",
                other, target
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::S3 => "s3",
            BackendType::Cifs => "cifs",
            BackendType::AzBlob => "azblob",
            BackendType::Nfs => "nfs",
        }
    }

    /// NFS targets are mounted without secrets.
    pub fn requires_credential(&self) -> bool {
        !matches!(self, BackendType::Nfs)
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One remote store endpoint plus the secrets needed to reach it.
#[derive(Debug, Clone)]
pub struct BackupTarget {
    pub url: String,
    pub backend: BackendType,
    pub credential: Option<Credential>,
}

impl BackupTarget {
    /// Backends that need secrets reject a target built without any credential.
    pub fn new(url: impl Into<String>, credential: Option<Credential>) -> Result<Self> {
        let url = url.into();
        let backend = BackendType::from_url(&url)?;
        if backend.requires_credential() && credential.is_none() {
            return Err(EngineError::Validation(format!(
                "cannot access {} without credential secret",
                url
            )));
        }
        Ok(BackupTarget {
            url,
            backend,
            credential,
        })
    }
}

fn name_regex() -> &'static Regex {
    static NAME: OnceLock<Regex> = OnceLock::new();
    NAME.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]+$").expect("name pattern is a valid regex")
    })
}

/// Volume and backup names must pass this before they are surfaced to callers.
pub fn validate_name(name: &str) -> bool {
    name_regex().is_match(name)
}

/// Locator of one backup: `<dest>?backup=<backup>&volume=<volume>`.
///
/// Returns an empty string when either name is invalid or the destination is missing.
pub fn encode_backup_url(backup_name: &str, volume_name: &str, dest_url: &str) -> String {
    if !validate_name(backup_name) || !validate_name(volume_name) || dest_url.is_empty() {
        return String::new();
    }
    append_query(dest_url, &[("backup", backup_name), ("volume", volume_name)])
}

/// Locator of a backup volume: `<dest>?volume=<volume>`.
pub fn backup_volume_url(volume_name: &str, dest_url: &str) -> String {
    if !validate_name(volume_name) || dest_url.is_empty() {
        return String::new();
    }
    append_query(dest_url, &[("volume", volume_name)])
}

fn append_query(dest_url: &str, pairs: &[(&str, &str)]) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    let separator = if dest_url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", dest_url, separator, query)
}

/// Split a backup locator into `(backup, volume, dest)`.
pub fn decode_backup_url(backup_url: &str) -> Result<(String, String, String)> {
    let parsed = Url::parse(backup_url).map_err(|e| {
        EngineError::Validation(format!("invalid backup URL '{}': {}", backup_url, e))
    })?;

    let mut backup = String::new();
    let mut volume = String::new();
    let mut rest = Vec::new();
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "backup" => backup = value.into_owned(),
            "volume" => volume = value.into_owned(),
            _ => rest.push((key.into_owned(), value.into_owned())),
        }
    }

    if !validate_name(&volume) {
        return Err(EngineError::Validation(format!(
            "invalid volume name '{}' in {}",
            volume, backup_url
        )));
    }
    if !backup.is_empty() && !validate_name(&backup) {
        return Err(EngineError::Validation(format!(
            "invalid backup name '{}' in {}",
            backup, backup_url
        )));
    }

    let base = match backup_url.split_once('?') {
        Some((base, _)) => base.to_string(),
        None => backup_url.to_string(),
    };
    let dest = if rest.is_empty() {
        base
    } else {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(rest)
            .finish();
        format!("{}?{}", base, query)
    };

    Ok((backup, volume, dest))
}
