//! Backup Driver - command line entry point
//!
//! Runs one backup operation against the engine binary and prints the result as JSON.

use anyhow::{Context, Result};
use backup_driver::client::{BackupTargetClient, EngineClient, SnapshotBackupRequest};
use backup_driver::target::{backup_volume_url, BackupTarget, Credential};
use backup_driver::{config::Config, utils};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct TargetArgs {
    /// Backup target URL (s3://, cifs://, azblob://, nfs://)
    #[arg(long)]
    url: String,

    /// TOML file of credential key/value pairs
    #[arg(long, value_name = "FILE")]
    credential_file: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct EngineArgs {
    /// Address of the running engine
    #[arg(long)]
    engine_url: String,

    /// Volume served by the engine
    #[arg(long)]
    volume: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List backup volume names
    Volumes {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// List backup names of one volume
    Backups {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        volume: String,
    },
    /// Inspect one backup volume
    InspectVolume {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        volume: String,
    },
    /// Inspect one backup by its backup URL
    Inspect {
        #[command(flatten)]
        target: TargetArgs,
        backup_url: String,
    },
    /// Probe config metadata of a URL (defaults to the target URL)
    Head {
        #[command(flatten)]
        target: TargetArgs,
        probe_url: Option<String>,
    },
    /// Delete one backup by its backup URL
    Delete {
        #[command(flatten)]
        target: TargetArgs,
        backup_url: String,
    },
    /// Delete a backup volume and all its backups
    DeleteVolume {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        volume: String,
    },
    /// Release mount points held by the engine
    CleanupMounts {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Back up a snapshot
    Create {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        engine: EngineArgs,
        #[arg(long)]
        snapshot: String,
        #[arg(long, default_value = "")]
        backup_name: String,
        #[arg(long, default_value = "")]
        backing_image_name: String,
        #[arg(long, default_value = "")]
        backing_image_checksum: String,
        /// KEY=VALUE, repeatable
        #[arg(long = "label")]
        labels: Vec<String>,
    },
    /// Poll the progress of a backup
    Status {
        #[command(flatten)]
        engine: EngineArgs,
        backup_id: String,
        #[arg(long)]
        replica: Option<String>,
        #[arg(long)]
        replica_instance_name: Option<String>,
    },
    /// Restore a backup into the engine's replicas
    Restore {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        engine: EngineArgs,
        #[arg(long)]
        backup: String,
        #[arg(long)]
        backup_volume: String,
        #[arg(long)]
        last_restored: Option<String>,
    },
    /// Poll restore progress of every replica
    RestoreStatus {
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Show the engine binary's client version
    EngineVersion,
}

fn load_credential(path: &Path) -> Result<Credential> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading credential file {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing credential file {}", path.display()))
}

impl TargetArgs {
    fn build(&self) -> Result<BackupTarget> {
        let credential = self.credential_file.as_deref().map(load_credential).transpose()?;
        Ok(BackupTarget::new(self.url.clone(), credential)?)
    }
}

fn parse_labels(labels: &[String]) -> Result<BTreeMap<String, String>> {
    labels
        .iter()
        .map(|label| {
            label
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("label '{}' is not KEY=VALUE", label))
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Command, config: &Config) -> Result<()> {
    let engine_config = &config.engine;
    let target_client = |target: &TargetArgs| -> Result<BackupTargetClient> {
        Ok(BackupTargetClient::from_config(engine_config, target.build()?))
    };
    let engine_client =
        |engine: &EngineArgs| EngineClient::from_config(engine_config, &engine.engine_url, &engine.volume);

    match command {
        Command::Volumes { target } => {
            print_json(&target_client(&target)?.backup_volume_name_list().await?)
        }
        Command::Backups { target, volume } => {
            print_json(&target_client(&target)?.backup_name_list(&volume).await?)
        }
        Command::InspectVolume { target, volume } => {
            let volume_url = backup_volume_url(&volume, &target.url);
            print_json(&target_client(&target)?.backup_volume_get(&volume_url).await?)
        }
        Command::Inspect { target, backup_url } => {
            print_json(&target_client(&target)?.backup_get(&backup_url).await?)
        }
        Command::Head { target, probe_url } => {
            let url = probe_url.unwrap_or_else(|| target.url.clone());
            print_json(&target_client(&target)?.backup_config_meta_get(&url).await?)
        }
        Command::Delete { target, backup_url } => {
            target_client(&target)?.backup_delete(&backup_url).await?;
            Ok(())
        }
        Command::DeleteVolume { target, volume } => {
            target_client(&target)?.backup_volume_delete(&volume).await?;
            Ok(())
        }
        Command::CleanupMounts { target } => {
            target_client(&target)?.backup_cleanup_all_mounts().await?;
            Ok(())
        }
        Command::Create {
            target,
            engine,
            snapshot,
            backup_name,
            backing_image_name,
            backing_image_checksum,
            labels,
        } => {
            let client = engine_client(&engine);
            let request = SnapshotBackupRequest {
                snapshot_name: snapshot,
                backup_name,
                target: target.build()?,
                backing_image_name,
                backing_image_checksum,
                labels: parse_labels(&labels)?,
            };
            print_json(&client.snapshot_backup(&client, &request).await?)
        }
        Command::Status {
            engine,
            backup_id,
            replica,
            replica_instance_name,
        } => {
            let status = engine_client(&engine)
                .snapshot_backup_status(&backup_id, replica.as_deref(), replica_instance_name.as_deref())
                .await?;
            print_json(&status)
        }
        Command::Restore {
            target,
            engine,
            backup,
            backup_volume,
            last_restored,
        } => {
            engine_client(&engine)
                .backup_restore(&target.build()?, &backup, &backup_volume, last_restored.as_deref())
                .await?;
            Ok(())
        }
        Command::RestoreStatus { engine } => {
            print_json(&engine_client(&engine).backup_restore_status().await?)
        }
        Command::EngineVersion => {
            let client = EngineClient::from_config(engine_config, "", "");
            print_json(&client.version_get().await?)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };
    config.apply_env_overrides()?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!(
        "backup-driver v{} using engine binary {}",
        env!("CARGO_PKG_VERSION"),
        config.engine.binary_path().display()
    );

    run(args.command, &config).await
}
