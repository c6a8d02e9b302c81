use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::settings::{SettingsExt, SettingsKey, SettingsStore};
use crate::backup::storage::BackupRecord;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

static DEFAULT_MAX_COUNT: u32 = 7;

/// Keep at most `max_count` archives per game version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub enabled: bool,
    pub max_count: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_count: DEFAULT_MAX_COUNT,
        }
    }
}

impl RetentionPolicy {
    pub fn keep_newest(max_count: u32) -> Self {
        Self {
            enabled: true,
            max_count,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &dyn SettingsStore) -> Result<Self> {
        let default = Self::default();
        Ok(Self {
            enabled: settings
                .get_as(SettingsKey::LimitBackups)?
                .unwrap_or(default.enabled),
            // Zero or negative counts switch retention off.
            max_count: settings
                .get_as::<i64>(SettingsKey::BackupLimitCount)?
                .map(|count| count.clamp(0, u32::MAX as i64) as u32)
                .unwrap_or(default.max_count),
        })
    }

    pub fn is_active(&self) -> bool {
        self.enabled && self.max_count > 0
    }

    /// Picks the oldest records beyond `max_count`, oldest first.
    ///
    /// Input order does not matter; ties on time are broken by name.
    pub fn select_evictions<'a, I>(&self, records: I) -> Vec<&'a BackupRecord>
    where
        I: IntoIterator<Item = &'a BackupRecord>,
    {
        if !self.is_active() {
            return Vec::new();
        }

        let oldest_first = records
            .into_iter()
            .sorted_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)))
            .collect_vec();
        let excess = oldest_first.len().saturating_sub(self.max_count as usize);
        oldest_first.into_iter().take(excess).collect()
    }
}

/// Outcome of a retention sweep. Failures do not stop the sweep.
#[derive(Debug, Default)]
pub struct RetentionReport {
    pub deleted: Vec<BackupRecord>,
    pub failed: Vec<(BackupRecord, Error)>,
}

impl RetentionReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
