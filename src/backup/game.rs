//! Game install layouts.
//!
//! Maps a [`GameVersion`] to the directories that hold add-ons (`Interface`) and
//! saved variables (`WTF`), both for backing up and for restoring.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Sub folders archived for every game folder that exists.
pub static REQUIRED_SUBFOLDERS: [&str; 2] = ["Interface", "WTF"];

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameVersion {
    #[display("retail")]
    Retail,
    #[display("classic")]
    Classic,
}

impl GameVersion {
    pub const ALL: [GameVersion; 2] = [GameVersion::Retail, GameVersion::Classic];

    /// Tag written into archive file names.
    pub fn tag(&self) -> &'static str {
        match self {
            GameVersion::Retail => "retail",
            GameVersion::Classic => "classic",
        }
    }

    /// Top level folders scanned under the install root, in order.
    ///
    /// Retail also picks up `Classic` since both live next to each other in a
    /// standard launcher install.
    pub fn game_folders(&self) -> &'static [&'static str] {
        match self {
            GameVersion::Retail => &["_retail_", "Classic"],
            GameVersion::Classic => &["_classic_"],
        }
    }

    /// Folder that restored `Interface` and `WTF` are written into.
    pub fn restore_base(&self, root: &Path) -> PathBuf {
        match self {
            GameVersion::Retail => root.join("_retail_"),
            GameVersion::Classic => root.to_path_buf(),
        }
    }
}

impl FromStr for GameVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "retail" => Ok(GameVersion::Retail),
            "classic" => Ok(GameVersion::Classic),
            other => Err(Error::configuration(format!(
                "Invalid game version specified: {other:?}"
            ))),
        }
    }
}

/// Returns every `Interface`/`WTF` folder that exists under the game folders of `version`.
pub fn resolve_source_folders(root: &Path, version: GameVersion) -> Result<Vec<PathBuf>> {
    let mut folders = Vec::new();
    for game_folder in version.game_folders() {
        let game_path = root.join(game_folder);
        if !game_path.is_dir() {
            tracing::warn!("Game version folder not found, skipping: {:?}", game_path);
            continue;
        }

        for subfolder in REQUIRED_SUBFOLDERS {
            let path = game_path.join(subfolder);
            if path.is_dir() {
                tracing::debug!("Adding folder to backup: {:?}", path);
                folders.push(path);
            } else {
                tracing::warn!("Required subfolder not found, skipping: {:?}", path);
            }
        }
    }

    if folders.is_empty() {
        return Err(Error::configuration(format!(
            "No Interface or WTF folder found under {:?} for game version {}",
            root, version
        )));
    }

    Ok(folders)
}

/// Returns `(name, live path)` pairs overwritten by a restore.
pub fn resolve_restore_targets(root: &Path, version: GameVersion) -> Vec<(&'static str, PathBuf)> {
    let base = version.restore_base(root);
    REQUIRED_SUBFOLDERS
        .iter()
        .map(|name| (*name, base.join(name)))
        .collect()
}
