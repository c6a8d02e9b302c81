//! Persistent user settings.
//!
//! A flat key-value store of JSON values. [`JsonFileSettings`] keeps them in a
//! single JSON document on disk; [`MemorySettings`] is the in-process variant.

use crate::backup::function_path;
use crate::backup::game::GameVersion;
use crate::backup::options::BackendKind;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::schedule::{ScheduleRule, StoredSchedule};
use crate::backup::validate::{validate_dir_exist, validate_writable_dir};
use derive_more::Display;
use function_name::named;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Keys understood by the application.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum SettingsKey {
    #[display("wowPath")]
    WowPath,
    #[display("backupPath")]
    BackupPath,
    #[display("gameVersion")]
    GameVersion,
    #[display("backupType")]
    BackupType,
    #[display("limitBackups")]
    LimitBackups,
    #[display("backupLimitCount")]
    BackupLimitCount,
    #[display("schedule")]
    Schedule,
    #[display("googleTokens")]
    GoogleTokens,
}

impl SettingsKey {
    pub const ALL: [SettingsKey; 8] = [
        SettingsKey::WowPath,
        SettingsKey::BackupPath,
        SettingsKey::GameVersion,
        SettingsKey::BackupType,
        SettingsKey::LimitBackups,
        SettingsKey::BackupLimitCount,
        SettingsKey::Schedule,
        SettingsKey::GoogleTokens,
    ];

    pub fn parse(key: &str) -> Result<SettingsKey> {
        Self::ALL
            .into_iter()
            .find(|k| k.to_string() == key)
            .ok_or_else(|| Error::configuration(format!("Unknown settings key: {key:?}")))
    }

    /// Checks user input for this key and converts it to the stored JSON value.
    pub fn parse_value(&self, raw: &str) -> Result<Value> {
        let invalid = |e: &dyn std::fmt::Display| {
            Error::configuration(format!("Invalid value {raw:?} for {self}: {e}"))
        };
        match self {
            SettingsKey::WowPath => {
                validate_dir_exist(raw).map_err(|e| invalid(&e))?;
                Ok(Value::from(raw))
            }
            SettingsKey::BackupPath => {
                validate_writable_dir(raw).map_err(|e| invalid(&e))?;
                Ok(Value::from(raw))
            }
            SettingsKey::GameVersion => Ok(Value::from(raw.parse::<GameVersion>()?.to_string())),
            SettingsKey::BackupType => Ok(Value::from(raw.parse::<BackendKind>()?.to_string())),
            SettingsKey::LimitBackups => raw.parse::<bool>().map(Value::from).map_err(|e| invalid(&e)),
            SettingsKey::BackupLimitCount => raw.parse::<u32>().map(Value::from).map_err(|e| invalid(&e)),
            SettingsKey::Schedule => {
                let stored: StoredSchedule = serde_json::from_str(raw)?;
                ScheduleRule::try_from(&stored)?;
                Ok(serde_json::to_value(stored)?)
            }
            SettingsKey::GoogleTokens => Err(Error::configuration(
                "googleTokens is managed by `auth login` and `auth logout`",
            )),
        }
    }
}

pub trait SettingsStore: Send + Sync {
    fn get(&self, key: SettingsKey) -> Result<Option<Value>>;
    fn set(&self, key: SettingsKey, value: Value) -> Result<()>;
    fn delete(&self, key: SettingsKey) -> Result<()>;
}

/// Typed access on top of any [`SettingsStore`].
pub trait SettingsExt {
    fn get_as<T: DeserializeOwned>(&self, key: SettingsKey) -> Result<Option<T>>;
    fn set_as<T: Serialize>(&self, key: SettingsKey, value: &T) -> Result<()>;
}

impl<S: SettingsStore + ?Sized> SettingsExt for S {
    fn get_as<T: DeserializeOwned>(&self, key: SettingsKey) -> Result<Option<T>> {
        match self.get(key)? {
            None | Some(Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v)
                .map(Some)
                .map_err(Error::from)
                .add_msg(format!("Invalid value for setting {key}")),
        }
    }

    fn set_as<T: Serialize>(&self, key: SettingsKey, value: &T) -> Result<()> {
        self.set(key, serde_json::to_value(value)?)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<Map<String, Value>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: SettingsKey) -> Result<Option<Value>> {
        Ok(lock(&self.values).get(&key.to_string()).cloned())
    }

    fn set(&self, key: SettingsKey, value: Value) -> Result<()> {
        lock(&self.values).insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: SettingsKey) -> Result<()> {
        lock(&self.values).remove(&key.to_string());
        Ok(())
    }
}

/// Settings persisted as one JSON object, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl JsonFileSettings {
    #[named]
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let file = std::fs::File::open(&path)
                .map_err(Error::from)
                .add_fn_name(function_path!())?;
            serde_json::from_reader(BufReader::new(file))
                .map_err(Error::from)
                .add_msg(format!("Parse settings failed: {:?}", path))?
        } else {
            tracing::info!("No settings file at {:?}, starting empty", path);
            Map::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[named]
    fn persist(&self, values: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(Error::from)
                .add_fn_name(function_path!())?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let write = || -> Result<()> {
            let mut writer = BufWriter::new(std::fs::File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, values)?;
            writer.flush()?;
            std::fs::rename(&tmp, &self.path)?;
            Ok(())
        };
        write()
            .add_msg(format!("Writing settings to {:?} failed", self.path))
            .add_fn_name(function_path!())
    }
}

impl SettingsStore for JsonFileSettings {
    fn get(&self, key: SettingsKey) -> Result<Option<Value>> {
        Ok(lock(&self.values).get(&key.to_string()).cloned())
    }

    fn set(&self, key: SettingsKey, value: Value) -> Result<()> {
        let mut values = lock(&self.values);
        values.insert(key.to_string(), value);
        self.persist(&values)
    }

    fn delete(&self, key: SettingsKey) -> Result<()> {
        let mut values = lock(&self.values);
        if values.remove(&key.to_string()).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_json_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf/settings.json");

        let settings = JsonFileSettings::open(&path).unwrap();
        settings.set(SettingsKey::WowPath, json!("/games/wow")).unwrap();
        settings.set_as(SettingsKey::BackupLimitCount, &5u32).unwrap();
        drop(settings);

        let reopened = JsonFileSettings::open(&path).unwrap();
        assert_eq!(
            reopened.get_as::<String>(SettingsKey::WowPath).unwrap(),
            Some("/games/wow".to_string())
        );
        assert_eq!(reopened.get_as::<u32>(SettingsKey::BackupLimitCount).unwrap(), Some(5));

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["wowPath"], json!("/games/wow"));
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().unwrap();
        let settings = JsonFileSettings::open(dir.path().join("s.json")).unwrap();
        settings.set(SettingsKey::GoogleTokens, json!({"access_token": "x"})).unwrap();
        settings.delete(SettingsKey::GoogleTokens).unwrap();
        settings.delete(SettingsKey::GoogleTokens).unwrap();
        assert_eq!(settings.get(SettingsKey::GoogleTokens).unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_fails_to_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(JsonFileSettings::open(&path).is_err());
    }

    #[test]
    fn test_get_as_type_mismatch() {
        let settings = MemorySettings::new();
        settings.set(SettingsKey::LimitBackups, json!("yes")).unwrap();
        assert!(settings.get_as::<bool>(SettingsKey::LimitBackups).is_err());

        settings.set(SettingsKey::LimitBackups, Value::Null).unwrap();
        assert_eq!(settings.get_as::<bool>(SettingsKey::LimitBackups).unwrap(), None);
    }

    #[test]
    fn test_parse_value() {
        let dir = TempDir::new().unwrap();
        let wow = dir.path().to_string_lossy().into_owned();
        assert_eq!(SettingsKey::WowPath.parse_value(&wow).unwrap(), json!(wow));
        assert!(SettingsKey::WowPath.parse_value("/definitely/not/here").is_err());

        assert_eq!(SettingsKey::GameVersion.parse_value("classic").unwrap(), json!("classic"));
        assert!(SettingsKey::GameVersion.parse_value("wrath").is_err());
        assert!(matches!(
            SettingsKey::BackupType.parse_value("dropbox").unwrap_err(),
            Error::UnknownBackend(_)
        ));
        assert_eq!(SettingsKey::LimitBackups.parse_value("true").unwrap(), json!(true));
        assert_eq!(SettingsKey::BackupLimitCount.parse_value("5").unwrap(), json!(5));
        assert!(SettingsKey::BackupLimitCount.parse_value("-1").is_err());
        assert_eq!(
            SettingsKey::Schedule
                .parse_value(r#"{"frequency":"weekly","time":"04:00","day":"2"}"#)
                .unwrap(),
            json!({"frequency": "weekly", "time": "04:00", "day": 2})
        );
        assert!(matches!(
            SettingsKey::Schedule
                .parse_value(r#"{"frequency":"hourly"}"#)
                .unwrap_err(),
            Error::UnsupportedFrequency(_)
        ));
        assert!(SettingsKey::GoogleTokens.parse_value("{}").is_err());
    }

    #[test]
    fn test_key_names() {
        assert_eq!(SettingsKey::WowPath.to_string(), "wowPath");
        assert_eq!(SettingsKey::parse("backupLimitCount").unwrap(), SettingsKey::BackupLimitCount);
        assert!(SettingsKey::parse("nope").is_err());
    }
}
