//! Clients driving the engine binary.
//!
//! [`BackupTargetClient`] reads and prunes the remote catalog; [`EngineClient`] talks
//! to a running engine to create, restore and poll backups.

pub mod engine;
pub mod target;

pub use engine::{EngineClient, SnapshotBackupRequest, SnapshotLookup, VOLUME_HEAD_NAME};
pub use target::BackupTargetClient;
