use crate::backup::game::GameVersion;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::settings::{SettingsExt, SettingsKey, SettingsStore};
use bon::Builder;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    #[display("local")]
    Local,
    #[display("drive")]
    Drive,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(BackendKind::Local),
            "drive" => Ok(BackendKind::Drive),
            other => Err(Error::unknown_backend(other)),
        }
    }
}

/// What to back up and where to, fixed for the duration of one operation.
#[derive(Clone, Debug, PartialEq, Eq, Builder)]
pub struct BackupOptions {
    #[builder(into)]
    pub root_path: PathBuf,
    /// Local backup directory; unused by the drive backend.
    #[builder(into)]
    pub destination: Option<PathBuf>,
    pub version: GameVersion,
    #[builder(default)]
    pub backend: BackendKind,
}

impl BackupOptions {
    /// Reads the options saved by the user.
    ///
    /// A missing backend kind defaults to local and is written back.
    pub fn from_settings(settings: &dyn SettingsStore) -> Result<Self> {
        let root_path: Option<PathBuf> = settings.get_as(SettingsKey::WowPath)?;
        let destination: Option<PathBuf> = settings.get_as(SettingsKey::BackupPath)?;
        let version: Option<String> = settings.get_as(SettingsKey::GameVersion)?;
        let backend = match settings.get_as::<String>(SettingsKey::BackupType)? {
            Some(kind) => kind.parse()?,
            None => {
                tracing::info!("No backup type found, using default (local)");
                settings.set_as(SettingsKey::BackupType, &BackendKind::Local.to_string())?;
                BackendKind::Local
            }
        };

        let root_path = root_path
            .ok_or_else(|| Error::configuration("World of Warcraft path is not configured"))?;
        if backend == BackendKind::Local && destination.is_none() {
            return Err(Error::configuration("Local backup path is not configured"));
        }
        let version = version
            .ok_or_else(|| Error::configuration("Game version is not configured"))?
            .parse()?;

        Ok(Self {
            root_path,
            destination,
            version,
            backend,
        })
    }

    pub fn local_destination(&self) -> Result<&PathBuf> {
        self.destination
            .as_ref()
            .ok_or_else(|| Error::configuration("Local backup path is not configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::settings::MemorySettings;
    use serde_json::json;

    fn settings(pairs: &[(SettingsKey, serde_json::Value)]) -> MemorySettings {
        let s = MemorySettings::new();
        for (k, v) in pairs {
            s.set(*k, v.clone()).unwrap();
        }
        s
    }

    #[test]
    fn test_from_settings_local() {
        let s = settings(&[
            (SettingsKey::WowPath, json!("/wow")),
            (SettingsKey::BackupPath, json!("/backups")),
            (SettingsKey::GameVersion, json!("classic")),
            (SettingsKey::BackupType, json!("local")),
        ]);

        let options = BackupOptions::from_settings(&s).unwrap();
        assert_eq!(
            options,
            BackupOptions::builder()
                .root_path("/wow")
                .destination("/backups")
                .version(GameVersion::Classic)
                .backend(BackendKind::Local)
                .build()
        );
    }

    #[test]
    fn test_missing_backend_defaults_to_local_and_persists() {
        let s = settings(&[
            (SettingsKey::WowPath, json!("/wow")),
            (SettingsKey::BackupPath, json!("/backups")),
            (SettingsKey::GameVersion, json!("retail")),
        ]);

        let options = BackupOptions::from_settings(&s).unwrap();
        assert_eq!(options.backend, BackendKind::Local);
        assert_eq!(s.get(SettingsKey::BackupType).unwrap(), Some(json!("local")));
    }

    #[test]
    fn test_drive_does_not_need_destination() {
        let s = settings(&[
            (SettingsKey::WowPath, json!("/wow")),
            (SettingsKey::GameVersion, json!("retail")),
            (SettingsKey::BackupType, json!("drive")),
        ]);

        let options = BackupOptions::from_settings(&s).unwrap();
        assert_eq!(options.backend, BackendKind::Drive);
        assert_eq!(options.destination, None);
    }

    #[test]
    fn test_missing_required_fields() {
        let cases = [
            settings(&[(SettingsKey::GameVersion, json!("retail"))]),
            settings(&[
                (SettingsKey::WowPath, json!("/wow")),
                (SettingsKey::GameVersion, json!("retail")),
                (SettingsKey::BackupType, json!("local")),
            ]),
            settings(&[
                (SettingsKey::WowPath, json!("/wow")),
                (SettingsKey::BackupType, json!("drive")),
            ]),
        ];
        for s in cases {
            let err = BackupOptions::from_settings(&s).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{err}");
        }
    }

    #[test]
    fn test_unknown_backend() {
        let s = settings(&[
            (SettingsKey::WowPath, json!("/wow")),
            (SettingsKey::GameVersion, json!("retail")),
            (SettingsKey::BackupType, json!("dropbox")),
        ]);
        assert!(matches!(
            BackupOptions::from_settings(&s).unwrap_err(),
            Error::UnknownBackend(_)
        ));
    }
}
