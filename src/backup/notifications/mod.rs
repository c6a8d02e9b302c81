//! Where scheduled runs report to.
//!
//! A [`NotificationSink`] receives the progress of a scheduled backup and the
//! `start`/`complete`/`error` events around it. [`LogNotifier`] writes them to the
//! log; a configured [`NotificationConfig`] mails the events.

use crate::backup::notifications::smtp::SmtpNotificationConfig;
use crate::backup::result_error::result::Result;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use std::result;
use std::sync::Arc;
use validator::{Validate, ValidationErrors};

pub mod smtp;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum ScheduleEvent {
    #[display("start")]
    Start,
    #[display("complete")]
    Complete,
    #[display("error")]
    Error,
}

pub trait NotificationSink: Send + Sync {
    fn progress(&self, percent: f64, message: &str);
    fn event(&self, kind: ScheduleEvent, message: &str);
}

/// Sends a message with a subject line.
pub trait Notification {
    fn send(&self, topic: &str, msg: &str) -> Result<()>;
}

#[derive(Clone, From, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum NotificationConfig {
    Smtp(SmtpNotificationConfig),
}

impl Validate for NotificationConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            Self::Smtp(inner) => inner.validate(),
        }
    }
}

impl Notification for NotificationConfig {
    fn send(&self, topic: &str, msg: &str) -> Result<()> {
        match self {
            Self::Smtp(inner) => inner.send(topic, msg),
        }
    }
}

/// Mails every event; progress is not mailed.
impl NotificationSink for NotificationConfig {
    fn progress(&self, _percent: f64, _message: &str) {}

    fn event(&self, kind: ScheduleEvent, message: &str) {
        let topic = format!("Scheduled WoW backup: {kind}");
        if let Err(e) = self.send(&topic, message) {
            tracing::error!("Failed to send {kind} notification: {e}");
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn progress(&self, percent: f64, message: &str) {
        tracing::debug!(percent, "{message}");
    }

    fn event(&self, kind: ScheduleEvent, message: &str) {
        match kind {
            ScheduleEvent::Error => tracing::error!(event = %kind, "{message}"),
            _ => tracing::info!(event = %kind, "{message}"),
        }
    }
}

/// Forwards to every sink in order.
#[derive(Clone, Default)]
pub struct Notifiers(pub Vec<Arc<dyn NotificationSink>>);

impl NotificationSink for Notifiers {
    fn progress(&self, percent: f64, message: &str) {
        self.0.iter().for_each(|n| n.progress(percent, message));
    }

    fn event(&self, kind: ScheduleEvent, message: &str) {
        self.0.iter().for_each(|n| n.event(kind, message));
    }
}
