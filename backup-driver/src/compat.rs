//! Engine CLI compatibility table.
//!
//! Optional arguments are only passed to engines whose CLI API version supports them.
//! Every gate is looked up here so thresholds cannot drift between call sites.

use crate::protocol::EngineVersion;

/// Arguments that only newer engine CLIs understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// `--backing-image-checksum` instead of the `--backing-image-url` placeholder
    BackingImageChecksum,
    /// `--backup-name`; older engines always assign the backup identifier themselves
    ExplicitBackupName,
    /// `--replica-instance-name` on `backup status`
    ReplicaInstanceName,
}

/// Last CLI API version that still needs the legacy backup arguments.
pub const CLI_VERSION_FOUR: i64 = 4;

impl Feature {
    /// Minimum client CLI API version that accepts the argument.
    pub fn min_cli_api_version(&self) -> i64 {
        match self {
            Feature::BackingImageChecksum => CLI_VERSION_FOUR + 1,
            Feature::ExplicitBackupName => CLI_VERSION_FOUR + 1,
            Feature::ReplicaInstanceName => 9,
        }
    }
}

/// Whether the engine's client CLI accepts the argument.
pub fn supports(version: &EngineVersion, feature: Feature) -> bool {
    version.client_version.cli_api_version >= feature.min_cli_api_version()
}
