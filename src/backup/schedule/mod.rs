//! Recurring backups.
//!
//! A [`ScheduleRule`] is turned into a five field cron expression and armed as a
//! trigger by the [`scheduler::Scheduler`]. At most one trigger exists per
//! [`Frequency`].

pub mod job;
pub mod scheduler;

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::validate::validate_cron_str;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use std::str::FromStr;
use validator::Validate;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Frequency {
    #[display("daily")]
    Daily,
    #[display("weekly")]
    Weekly,
}

impl FromStr for Frequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            other => Err(Error::unsupported_frequency(other)),
        }
    }
}

/// When a recurring backup fires, in local time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Validate)]
pub struct ScheduleRule {
    pub frequency: Frequency,
    #[validate(range(max = 23))]
    pub hour: u8,
    #[validate(range(max = 59))]
    pub minute: u8,
    /// `0` is Sunday. Ignored for daily rules.
    #[validate(range(max = 6))]
    pub day_of_week: Option<u8>,
}

impl ScheduleRule {
    /// Builds a rule from user input: a frequency name, `HH:MM` and an optional weekday.
    pub fn parse(frequency: &str, time: &str, day_of_week: Option<u8>) -> Result<Self> {
        let frequency = frequency.parse()?;
        let (hour, minute) = parse_time(time)?;
        let rule = Self {
            frequency,
            hour,
            minute,
            day_of_week: match frequency {
                Frequency::Daily => None,
                Frequency::Weekly => day_of_week,
            },
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn time(&self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }

    /// `M H * * *` for daily rules, `M H * * D` for weekly ones, Sunday when no day is set.
    pub fn to_cron(&self) -> String {
        match self.frequency {
            Frequency::Daily => format!("{} {} * * *", self.minute, self.hour),
            Frequency::Weekly => format!(
                "{} {} * * {}",
                self.minute,
                self.hour,
                self.day_of_week.unwrap_or(0)
            ),
        }
    }

    pub fn validated_cron(&self) -> Result<String> {
        self.validate()?;
        let cron = self.to_cron();
        validate_cron_str(&cron).map_err(|e| Error::configuration(e.to_string()))?;
        Ok(cron)
    }
}

fn parse_time(time: &str) -> Result<(u8, u8)> {
    let invalid = || Error::configuration(format!("Invalid time {time:?}, expected HH:MM"));
    let (hour, minute) = time.trim().split_once(':').ok_or_else(invalid)?;
    Ok((
        hour.parse().map_err(|_| invalid())?,
        minute.parse().map_err(|_| invalid())?,
    ))
}

/// The rule as saved under the `schedule` setting: `{"frequency", "time", "day"}`.
///
/// `day` may be saved as a number or a string.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSchedule {
    pub frequency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u8>,
}

impl From<&ScheduleRule> for StoredSchedule {
    fn from(rule: &ScheduleRule) -> Self {
        Self {
            frequency: rule.frequency.to_string(),
            time: Some(rule.time()),
            day: rule.day_of_week,
        }
    }
}

impl TryFrom<&StoredSchedule> for ScheduleRule {
    type Error = Error;

    /// A missing time means midnight.
    fn try_from(stored: &StoredSchedule) -> Result<Self> {
        ScheduleRule::parse(
            &stored.frequency,
            stored.time.as_deref().unwrap_or("00:00"),
            stored.day,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cron_expressions() {
        let daily = ScheduleRule::parse("daily", "03:30", Some(4)).unwrap();
        assert_eq!(daily.day_of_week, None);
        assert_eq!(daily.to_cron(), "30 3 * * *");

        let weekly = ScheduleRule::parse("weekly", "04:00", Some(2)).unwrap();
        assert_eq!(weekly.validated_cron().unwrap(), "0 4 * * 2");

        let sunday = ScheduleRule::parse("weekly", "21:05", None).unwrap();
        assert_eq!(sunday.to_cron(), "5 21 * * 0");
    }

    #[test]
    fn test_unsupported_frequency() {
        assert!(matches!(
            ScheduleRule::parse("monthly", "04:00", None).unwrap_err(),
            Error::UnsupportedFrequency(f) if f == "monthly"
        ));
    }

    #[test]
    fn test_out_of_range_values() {
        for (time, day) in [("24:00", None), ("12:60", None), ("12:00", Some(7)), ("noon", None)] {
            assert!(ScheduleRule::parse("weekly", time, day).is_err(), "{time} {day:?}");
        }
    }

    #[test]
    fn test_stored_schedule_formats() {
        let stored: StoredSchedule =
            serde_json::from_value(json!({"frequency": "weekly", "time": "04:15", "day": "3"})).unwrap();
        assert_eq!(stored.day, Some(3));
        let rule = ScheduleRule::try_from(&stored).unwrap();
        assert_eq!(rule.to_cron(), "15 4 * * 3");

        let numeric: StoredSchedule =
            serde_json::from_value(json!({"frequency": "weekly", "time": "04:15", "day": 3})).unwrap();
        assert_eq!(numeric, stored);

        let bare: StoredSchedule = serde_json::from_value(json!({"frequency": "daily"})).unwrap();
        assert_eq!(ScheduleRule::try_from(&bare).unwrap().to_cron(), "0 0 * * *");

        let saved = serde_json::to_value(StoredSchedule::from(&rule)).unwrap();
        assert_eq!(saved, json!({"frequency": "weekly", "time": "04:15", "day": 3}));
    }
}
