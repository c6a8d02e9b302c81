//! Archive file names.
//!
//! Names look like `wow_retail_2024-03-14T12-34-56.789Z.zip`: an ISO-8601 UTC
//! instant with `:` replaced by `-` so the name is valid on every filesystem.
//! Older archives use `-` instead of `.` before the milliseconds; both parse.

use crate::backup::game::GameVersion;
use chrono::{DateTime, NaiveDateTime, Utc};

static FILE_PREFIX: &str = "wow";
static FILE_EXT: &str = ".zip";
static TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3fZ";
/// Length of `YYYY-MM-DDTHH-MM-SS.mmmZ`.
static TIME_LEN: usize = 24;
/// Byte offset of the separator in front of the milliseconds.
static MILLIS_SEPARATOR_IDX: usize = 19;

pub fn archive_file_name(version: GameVersion, dt: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}{}",
        FILE_PREFIX,
        version.tag(),
        dt.format(TIME_FORMAT),
        FILE_EXT
    )
}

fn file_prefix(version: GameVersion) -> String {
    format!("{}_{}_", FILE_PREFIX, version.tag())
}

/// Parses the timestamp part of an archive name, accepting `-mmm` and `.mmm`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if raw.len() != TIME_LEN || !raw.is_ascii() {
        return None;
    }

    let normalized = match raw.as_bytes()[MILLIS_SEPARATOR_IDX] {
        b'.' => raw.to_string(),
        b'-' => format!(
            "{}.{}",
            &raw[..MILLIS_SEPARATOR_IDX],
            &raw[MILLIS_SEPARATOR_IDX + 1..]
        ),
        _ => return None,
    };

    NaiveDateTime::parse_from_str(&normalized, TIME_FORMAT)
        .ok()
        .map(|dt| dt.and_utc())
}

/// Returns the creation time encoded in `file_name` if it is an archive of `version`.
pub fn parse_archive_file_name(file_name: &str, version: GameVersion) -> Option<DateTime<Utc>> {
    let raw = file_name
        .strip_prefix(file_prefix(version).as_str())?
        .strip_suffix(FILE_EXT)?;
    parse_timestamp(raw)
}

/// True for archive names of any game version.
pub fn is_archive_file_name(file_name: &str) -> bool {
    GameVersion::ALL
        .into_iter()
        .any(|version| parse_archive_file_name(file_name, version).is_some())
}
