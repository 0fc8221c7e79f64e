//! Backup Driver Library
//!
//! Backup and restore orchestration over an out-of-process engine binary that owns
//! the remote store protocols (S3, CIFS, Azure Blob, NFS).

pub mod client;
pub mod compat;
pub mod config;
pub mod credential;
pub mod executor;
pub mod protocol;
pub mod state;
pub mod target;
pub mod utils;

// Re-export commonly used types
pub use client::{BackupTargetClient, EngineClient, SnapshotBackupRequest, SnapshotLookup};
pub use config::Config;
pub use executor::{Execute, ExecuteTimeout, ProcessExecutor};
pub use state::{convert_engine_backup_state, BackupState};
pub use target::{BackendType, BackupTarget, Credential};
pub use utils::errors::EngineError;
pub type Result<T> = std::result::Result<T, EngineError>;
