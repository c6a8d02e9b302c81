use crate::backup::archive::progress::ProgressEvent;
use crate::backup::cloud::CloudDrive;
use crate::backup::notifications::{NotificationSink, ScheduleEvent};
use crate::backup::options::{BackendKind, BackupOptions};
use crate::backup::orchestrator::BackupOrchestrator;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::retention::RetentionPolicy;
use crate::backup::schedule::scheduler::ScheduledJob;
use crate::backup::schedule::Frequency;
use crate::backup::settings::SettingsStore;
use crate::backup::storage::local::LocalStorage;
use crate::backup::storage::remote::RemoteStorage;
use crate::backup::storage::StorageBackend;
use bon::Builder;
use std::path::PathBuf;
use std::sync::Arc;

/// A backup run from the saved settings, as fired by a trigger.
///
/// Settings are read again on every run so edits apply to the next occurrence.
#[derive(Builder)]
pub struct BackupJob {
    settings: Arc<dyn SettingsStore>,
    /// Needed when the saved backend is `drive`.
    drive: Option<Arc<dyn CloudDrive>>,
    #[builder(into)]
    scratch_dir: PathBuf,
    notifier: Arc<dyn NotificationSink>,
}

/// Picks the storage backend for `options`, checking sign-in for remote ones.
pub fn storage_for(
    options: &BackupOptions,
    drive: Option<&Arc<dyn CloudDrive>>,
) -> Result<Box<dyn StorageBackend>> {
    match options.backend {
        BackendKind::Local => Ok(Box::new(LocalStorage::new(options.local_destination()?))),
        BackendKind::Drive => {
            let drive = drive
                .ok_or_else(|| Error::configuration("Google Drive client is not configured"))?;
            if !drive.is_authenticated() {
                return Err(Error::authentication(drive.provider()));
            }
            Ok(Box::new(RemoteStorage::new(drive.clone())))
        }
    }
}

impl BackupJob {
    fn orchestrator(&self) -> Result<(BackupOptions, BackupOrchestrator)> {
        let options = BackupOptions::from_settings(self.settings.as_ref())?;
        let retention = RetentionPolicy::from_settings(self.settings.as_ref())?;
        let storage = storage_for(&options, self.drive.as_ref())?;
        tracing::info!(
            "Scheduled backup of {:?} ({}) to {}",
            options.root_path,
            options.version,
            storage.describe()
        );

        let orchestrator = BackupOrchestrator::builder()
            .storage(storage)
            .retention(retention)
            .scratch_dir(self.scratch_dir.clone())
            .build();
        Ok((options, orchestrator))
    }

    /// Runs one backup. Every outcome goes to the notifier.
    pub fn run_once(&self) -> Result<String> {
        let result = self.orchestrator().and_then(|(options, orchestrator)| {
            self.notifier
                .event(ScheduleEvent::Start, "Starting automatic backup...");
            let mut relay = |event: ProgressEvent| self.notifier.progress(event.percent, &event.message);
            orchestrator.create_backup(&options, &mut relay)
        });

        match &result {
            Ok(locator) => self.notifier.event(
                ScheduleEvent::Complete,
                &format!("Automatic backup completed successfully: {locator}"),
            ),
            Err(e) => self
                .notifier
                .event(ScheduleEvent::Error, &format!("Automatic backup failed: {e}")),
        }
        result
    }
}

impl ScheduledJob for BackupJob {
    fn run(&self, frequency: Frequency) {
        tracing::info!("Running {frequency} backup");
        if let Err(e) = self.run_once() {
            tracing::error!("Scheduled {frequency} backup failed: {e}");
        }
    }
}
