use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Reminder {
    pub id: String,
    pub fire_at: Instant,
    pub label: String,
}

impl Reminder {
    pub fn new(id: impl Into<String>, fire_at: Instant, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fire_at,
            label: label.into(),
        }
    }

    /// Reminder due `delay` from now. Panics if that instant is not
    /// representable, like `Instant + Duration`.
    pub fn after(id: impl Into<String>, delay: Duration, label: impl Into<String>) -> Self {
        Self::new(id, Instant::now() + delay, label)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.fire_at <= now
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    pub reminder_id: String,
    pub label: String,
    pub message: String,
    pub emitted_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub(crate) fn for_reminder(reminder: &Reminder) -> Self {
        Self {
            reminder_id: reminder.id.clone(),
            label: reminder.label.clone(),
            message: format!("You need to do this task: {}", reminder.label),
            emitted_at: Utc::now(),
        }
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// What happens to a reminder once it has fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReminderMode {
    /// Removed from the registry after its first notification.
    #[default]
    Once,
    /// Kept, and notified again on every tick until the scheduler stops.
    Repeat,
}

#[derive(Debug, Error)]
#[error("unknown reminder mode {0:?}, expected \"once\" or \"repeat\"")]
pub struct ParseReminderModeError(String);

impl FromStr for ReminderMode {
    type Err = ParseReminderModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" => Ok(ReminderMode::Once),
            "repeat" => Ok(ReminderMode::Repeat),
            other => Err(ParseReminderModeError(other.to_string())),
        }
    }
}
