//! Credential environment for the engine process.
//!
//! Each backend declares which secrets it requires and which optional settings are
//! forwarded unconditionally. The result is a `KEY=VALUE` list injected into the
//! engine's environment only; values are never logged.

use crate::target::{BackendType, Credential};
use crate::utils::{EngineError, Result};

pub const AWS_ACCESS_KEY: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const AWS_IAM_ROLE_ARN: &str = "AWS_IAM_ROLE_ARN";
pub const AWS_ENDPOINT: &str = "AWS_ENDPOINTS";
pub const AWS_CERT: &str = "AWS_CERT";
pub const VIRTUAL_HOSTED_STYLE: &str = "VIRTUAL_HOSTED_STYLE";

pub const CIFS_USERNAME: &str = "CIFS_USERNAME";
pub const CIFS_PASSWORD: &str = "CIFS_PASSWORD";

pub const AZBLOB_ACCOUNT_NAME: &str = "AZBLOB_ACCOUNT_NAME";
pub const AZBLOB_ACCOUNT_KEY: &str = "AZBLOB_ACCOUNT_KEY";
pub const AZBLOB_ENDPOINT: &str = "AZBLOB_ENDPOINT";
pub const AZBLOB_CERT: &str = "AZBLOB_CERT";

pub const HTTPS_PROXY: &str = "HTTPS_PROXY";
pub const HTTP_PROXY: &str = "HTTP_PROXY";
pub const NO_PROXY: &str = "NO_PROXY";

/// Which secrets a backend needs and which settings it passes through.
struct CredentialSchema {
    required: &'static [&'static str],
    optional: &'static [&'static str],
}

const S3_SCHEMA: CredentialSchema = CredentialSchema {
    required: &[AWS_ACCESS_KEY, AWS_SECRET_KEY],
    optional: &[
        AWS_ENDPOINT,
        AWS_CERT,
        HTTPS_PROXY,
        HTTP_PROXY,
        NO_PROXY,
        VIRTUAL_HOSTED_STYLE,
    ],
};

const CIFS_SCHEMA: CredentialSchema = CredentialSchema {
    required: &[CIFS_USERNAME, CIFS_PASSWORD],
    optional: &[],
};

const AZBLOB_SCHEMA: CredentialSchema = CredentialSchema {
    required: &[AZBLOB_ACCOUNT_NAME, AZBLOB_ACCOUNT_KEY, AZBLOB_ENDPOINT],
    optional: &[AZBLOB_CERT, HTTPS_PROXY, HTTP_PROXY, NO_PROXY],
};

impl BackendType {
    fn credential_schema(&self) -> Option<&'static CredentialSchema> {
        match self {
            BackendType::S3 => Some(&S3_SCHEMA),
            BackendType::Cifs => Some(&CIFS_SCHEMA),
            BackendType::AzBlob => Some(&AZBLOB_SCHEMA),
            BackendType::Nfs => None,
        }
    }
}

fn value<'a>(credential: &'a Credential, key: &str) -> &'a str {
    credential.get(key).map(String::as_str).unwrap_or("")
}

fn entry(credential: &Credential, key: &str) -> String {
    format!("{}={}", key, value(credential, key))
}

fn missing_keys(credential: &Credential, keys: &[&'static str]) -> Vec<&'static str> {
    keys.iter()
        .copied()
        .filter(|key| value(credential, key).is_empty())
        .collect()
}

/// Build the engine environment for a target URL.
pub fn backup_credential_env(target_url: &str, credential: Option<&Credential>) -> Result<Vec<String>> {
    let backend = BackendType::from_url(target_url)?;
    credential_env(backend, credential)
}

/// Build the engine environment for an already detected backend.
///
/// Backends without a credential schema, or calls without a credential, yield an
/// empty list. Missing required secrets fail before any process is spawned.
pub fn credential_env(backend: BackendType, credential: Option<&Credential>) -> Result<Vec<String>> {
    let (Some(schema), Some(credential)) = (backend.credential_schema(), credential) else {
        return Ok(Vec::new());
    };

    let missing = missing_keys(credential, schema.required);
    let mut envs = Vec::with_capacity(schema.required.len() + schema.optional.len());

    match backend {
        BackendType::S3 => {
            // An IAM role replaces the static key pair.
            if !missing.is_empty() && value(credential, AWS_IAM_ROLE_ARN).is_empty() {
                return Err(missing_error(backend, &missing));
            }
            if missing.is_empty() {
                envs.extend(schema.required.iter().map(|key| entry(credential, key)));
            }
        }
        _ => {
            if !missing.is_empty() {
                return Err(missing_error(backend, &missing));
            }
            envs.extend(schema.required.iter().map(|key| entry(credential, key)));
        }
    }

    envs.extend(schema.optional.iter().map(|key| entry(credential, key)));
    Ok(envs)
}

fn missing_error(backend: BackendType, missing: &[&str]) -> EngineError {
    EngineError::Validation(format!(
        "could not backup to {}, missing {:?} in the secret",
        backend, missing
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(pairs: &[(&str, &str)]) -> Credential {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_s3_missing_keys_without_role() {
        let cred = credential(&[(AWS_ACCESS_KEY, ""), (AWS_SECRET_KEY, ""), (AWS_IAM_ROLE_ARN, "")]);
        let err = backup_credential_env("s3://bucket@us-east-1/", Some(&cred)).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(msg.contains(AWS_ACCESS_KEY));
        assert!(msg.contains(AWS_SECRET_KEY));
    }

    #[test]
    fn test_s3_iam_role_skips_static_keys() {
        let cred = credential(&[(AWS_IAM_ROLE_ARN, "arn:aws:iam::123456789012:role/backup")]);
        let envs = backup_credential_env("s3://bucket@us-east-1/", Some(&cred)).unwrap();
        assert!(envs.iter().all(|e| !e.starts_with(AWS_ACCESS_KEY)));
        assert!(envs.iter().all(|e| !e.starts_with(AWS_SECRET_KEY)));
        assert!(envs.contains(&format!("{}=", AWS_ENDPOINT)));
    }

    #[test]
    fn test_s3_full_credential_order() {
        let cred = credential(&[
            (AWS_ACCESS_KEY, "AKIA"),
            (AWS_SECRET_KEY, "secret"),
            (AWS_ENDPOINT, "https://minio:9000"),
        ]);
        let envs = backup_credential_env("s3://bucket@us-east-1/", Some(&cred)).unwrap();
        assert_eq!(
            envs,
            vec![
                "AWS_ACCESS_KEY_ID=AKIA".to_string(),
                "AWS_SECRET_ACCESS_KEY=secret".to_string(),
                "AWS_ENDPOINTS=https://minio:9000".to_string(),
                "AWS_CERT=".to_string(),
                "HTTPS_PROXY=".to_string(),
                "HTTP_PROXY=".to_string(),
                "NO_PROXY=".to_string(),
                "VIRTUAL_HOSTED_STYLE=".to_string(),
            ]
        );
    }

    #[test]
    fn test_cifs_emits_two_entries() {
        let cred = credential(&[(CIFS_USERNAME, "u"), (CIFS_PASSWORD, "p")]);
        let envs = backup_credential_env("cifs://host/share", Some(&cred)).unwrap();
        assert_eq!(envs, vec!["CIFS_USERNAME=u".to_string(), "CIFS_PASSWORD=p".to_string()]);
    }

    #[test]
    fn test_cifs_missing_password() {
        let cred = credential(&[(CIFS_USERNAME, "u")]);
        let err = backup_credential_env("cifs://host/share", Some(&cred)).unwrap_err();
        assert!(err.to_string().contains(CIFS_PASSWORD));
    }

    #[test]
    fn test_azblob_passes_optional_settings() {
        let cred = credential(&[
            (AZBLOB_ACCOUNT_NAME, "acct"),
            (AZBLOB_ACCOUNT_KEY, "key"),
            (AZBLOB_ENDPOINT, "https://acct.blob.core.windows.net"),
            (HTTPS_PROXY, "http://proxy:3128"),
        ]);
        let envs = backup_credential_env("azblob://container@core.windows.net/", Some(&cred)).unwrap();
        assert_eq!(envs.len(), 7);
        assert_eq!(envs[0], "AZBLOB_ACCOUNT_NAME=acct");
        assert!(envs.contains(&"AZBLOB_CERT=".to_string()));
        assert!(envs.contains(&"HTTPS_PROXY=http://proxy:3128".to_string()));
    }

    #[test]
    fn test_no_credential_needed() {
        let cred = credential(&[(CIFS_USERNAME, "ignored")]);
        assert!(backup_credential_env("nfs://host:/opt/backups", Some(&cred)).unwrap().is_empty());
        assert!(backup_credential_env("s3://bucket@us-east-1/", None).unwrap().is_empty());
    }
}
