//! Cloud drive access.
//!
//! [`CloudDrive`] is everything the remote storage backend needs from a provider:
//! the sign-in flow and raw file operations. [`google::GoogleDriveClient`] talks to
//! the Google Drive v3 REST api.

pub mod google;

use crate::backup::result_error::result::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::path::Path;

/// File metadata as returned by the provider.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub created_time: DateTime<Utc>,
    /// Drive reports sizes as decimal strings.
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub size: Option<u64>,
}

pub trait CloudDrive: Send + Sync {
    /// Provider name used in messages, e.g. `Google Drive`.
    fn provider(&self) -> &str;

    /// Whether usable credentials are present, refreshing them if they expired.
    fn is_authenticated(&self) -> bool;

    /// Url the user opens to grant access.
    fn auth_url(&self) -> Result<String>;

    /// Trades the code shown after sign-in for tokens and saves them.
    fn exchange_code(&self, code: &str) -> Result<()>;

    /// Forgets saved credentials. Local credentials are removed even if revocation fails.
    fn logout(&self) -> Result<()>;

    fn upload(&self, local_file: &Path, name: &str) -> Result<RemoteFile>;

    /// Files newest first.
    fn list_files(&self) -> Result<Vec<RemoteFile>>;

    fn download(&self, id: &str, destination: &Path) -> Result<()>;

    fn delete_file(&self, id: &str) -> Result<()>;
}
