//! Application config file (YAML).
//!
//! ```yaml
//! settings_path: /home/me/.config/backup-quest/settings.json
//! scratch_dir: /tmp/backup-quest
//! http_timeout: 10m
//! google:
//!   client_id: 1234.apps.googleusercontent.com
//!   client_secret: GOCSPX-...
//!   redirect_uri: http://localhost:8765/callback
//! notification:
//!   type: smtp
//!   host: smtp.example.com
//!   smtp_mode: StartTls
//!   from: Backups <backups@example.com>
//!   to: [me@example.com]
//!   username: backups
//!   password: app-password
//! ```
//!
//! Every key is optional.

use crate::backup::cloud::google::{GoogleDriveClient, GoogleOAuthConfig};
use crate::backup::cloud::CloudDrive;
use crate::backup::function_path;
use crate::backup::notifications::{LogNotifier, NotificationConfig, NotificationSink, Notifiers};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::settings::{JsonFileSettings, SettingsStore};
use crate::backup::validate::validate_dir_exist_or_created;
use function_name::named;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use validator::{Validate, ValidationError};

static APP_DIR: &str = "backup-quest";
static SETTINGS_FILE: &str = "settings.json";

fn default_settings_path() -> PathBuf {
    PathBuf::from(APP_DIR).join(SETTINGS_FILE)
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join(APP_DIR)
}

fn validate_settings_path(path: &Path) -> std::result::Result<(), ValidationError> {
    if path.is_dir() {
        return Err(ValidationError::new("InvalidSettingsPath")
            .with_message(format!("{:?} is a directory", path).into()));
    }
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => validate_dir_exist_or_created(parent),
        None => Ok(()),
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default = "default_settings_path")]
    #[validate(custom(function = validate_settings_path))]
    pub settings_path: PathBuf,
    #[serde(default = "default_scratch_dir")]
    #[validate(custom(function = validate_dir_exist_or_created))]
    pub scratch_dir: PathBuf,
    #[serde(default, with = "humantime_serde")]
    pub http_timeout: Option<Duration>,
    #[validate(nested)]
    pub google: Option<GoogleOAuthConfig>,
    #[validate(nested)]
    pub notification: Option<NotificationConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            settings_path: default_settings_path(),
            scratch_dir: default_scratch_dir(),
            http_timeout: None,
            google: None,
            notification: None,
        }
    }
}

impl AppConfig {
    /// Reads and validates the config at `path`.
    #[named]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config: AppConfig = File::open(path)
            .map_err(Error::from)
            .and_then(|f| serde_yml::from_reader(f).map_err(Error::from))
            .add_msg(format!("Parse YAML config failed: {:?}", path))
            .add_fn_name(function_path!())?;
        config.validated(path)
    }

    /// Defaults when no config file is given.
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                tracing::debug!("No config file given, using defaults");
                let config = Self::default();
                config.validated(Path::new("<defaults>"))
            }
        }
    }

    fn validated(self, source: &Path) -> Result<Self> {
        self.validate()
            .map_err(Error::from)
            .add_msg(format!("Config validation failed: {:?}", source))?;
        Ok(self)
    }

    pub fn open_settings(&self) -> Result<Arc<dyn SettingsStore>> {
        Ok(Arc::new(JsonFileSettings::open(&self.settings_path)?))
    }

    /// The Google Drive client, if OAuth credentials are configured.
    pub fn drive(&self, settings: Arc<dyn SettingsStore>) -> Result<Option<Arc<dyn CloudDrive>>> {
        self.google
            .clone()
            .map(|google| {
                GoogleDriveClient::new(google, settings, self.http_timeout)
                    .map(|c| Arc::new(c) as Arc<dyn CloudDrive>)
            })
            .transpose()
    }

    /// The log, plus the mail notifier when configured.
    pub fn notifier(&self) -> Arc<dyn NotificationSink> {
        let mut sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(LogNotifier)];
        if let Some(notification) = &self.notification {
            sinks.push(Arc::new(notification.clone()));
        }
        Arc::new(Notifiers(sinks))
    }
}
