//! # backup-quest
//!
//! Backs up the `Interface` and `WTF` folders of a World of Warcraft install into
//! timestamped zip archives, stored locally or on Google Drive.
//!
//! ## Features
//!
//! - **Folder Resolution**: Retail and Classic install layouts
//! - **Zip Archives**: Deflate compression with byte and file level progress
//! - **Storage Backends**: Local directory or Google Drive
//! - **Restore**: Download, extract and overwrite live folders
//! - **Retention Management**: Keep the newest N archives
//! - **Scheduled Backups**: Daily or weekly triggers
//!
//! ## Quick Start
//!
//! ```no_run
//! use backup_quest::backup::game::GameVersion;
//! use backup_quest::backup::options::{BackendKind, BackupOptions};
//! use backup_quest::backup::orchestrator::BackupOrchestrator;
//! use backup_quest::backup::retention::RetentionPolicy;
//! use backup_quest::backup::storage::local::LocalStorage;
//!
//! let options = BackupOptions::builder()
//!     .root_path("/games/World of Warcraft")
//!     .destination("/backups/wow")
//!     .version(GameVersion::Retail)
//!     .backend(BackendKind::Local)
//!     .build();
//!
//! let orchestrator = BackupOrchestrator::builder()
//!     .storage(Box::new(LocalStorage::new("/backups/wow")))
//!     .retention(RetentionPolicy::keep_newest(7))
//!     .scratch_dir(std::env::temp_dir())
//!     .build();
//!
//! let mut print = |event: backup_quest::backup::archive::progress::ProgressEvent| {
//!     println!("{:5.1}% {}", event.percent, event.message)
//! };
//! orchestrator.create_backup(&options, &mut print)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
