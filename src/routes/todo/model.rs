use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TodoStatus {
    #[serde(rename = "created")]
    Created,
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "done")]
    Done,
}

#[derive(Debug, Error)]
#[error("invalid status {0:?}, expected one of \"created\", \"in progress\", \"done\"")]
pub struct InvalidStatus(pub String);

impl TodoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TodoStatus::Created => "created",
            TodoStatus::InProgress => "in progress",
            TodoStatus::Done => "done",
        }
    }
}

impl FromStr for TodoStatus {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(TodoStatus::Created),
            "in progress" => Ok(TodoStatus::InProgress),
            "done" => Ok(TodoStatus::Done),
            other => Err(InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub title: String,
    pub status: TodoStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
}

/// Body of create and update requests. The status is kept as free text so
/// that an unknown value is reported as a validation error.
#[derive(Debug, Deserialize)]
pub struct TodoPayload {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub status: String,
    /// Relative delay such as "10s" or "1h 30m".
    #[serde(default)]
    pub reminder_time: Option<String>,
}

impl TodoPayload {
    pub fn reminder_delay(&self) -> Result<Option<Duration>, AppError> {
        match self.reminder_time.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => humantime::parse_duration(raw)
                .map(Some)
                .map_err(|e| AppError::Validation(format!("invalid reminder_time {raw:?}: {e}"))),
        }
    }

    /// Absolute fire time of the requested reminder, measured from `now`.
    /// Delays too large to represent are rejected rather than wrapped.
    pub fn reminder_at(&self, now: Instant) -> Result<Option<Instant>, AppError> {
        let Some(delay) = self.reminder_delay()? else {
            return Ok(None);
        };
        now.checked_add(delay).map(Some).ok_or_else(|| {
            AppError::Validation(format!(
                "reminder_time {:?} is too far in the future",
                self.reminder_time.as_deref().unwrap_or_default()
            ))
        })
    }

    pub fn into_todo(self, id: String) -> Result<Todo, AppError> {
        if self.title.trim().is_empty() {
            return Err(AppError::Validation("title must not be empty".to_string()));
        }
        let status = self
            .status
            .parse::<TodoStatus>()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        Ok(Todo {
            id,
            title: self.title,
            status,
            reminder_time: self.reminder_time.filter(|r| !r.trim().is_empty()),
            image_path: None,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageUploadResponse {
    pub id: String,
    pub image_path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTodoResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_scheduled: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(status: &str, reminder: Option<&str>) -> TodoPayload {
        TodoPayload {
            id: None,
            title: "Water plant".to_string(),
            status: status.to_string(),
            reminder_time: reminder.map(str::to_string),
        }
    }

    #[test]
    fn status_uses_spaced_wire_name() {
        let json = serde_json::to_string(&TodoStatus::InProgress).unwrap();
        assert_eq!(json, "\"in progress\"");
        assert_eq!("in progress".parse::<TodoStatus>().unwrap(), TodoStatus::InProgress);
    }

    #[test]
    fn unknown_status_is_a_validation_error() {
        let err = payload("later", None).into_todo("1".into()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn reminder_delay_parses_human_durations() {
        assert_eq!(
            payload("created", Some("1m 30s")).reminder_delay().unwrap(),
            Some(Duration::from_secs(90))
        );
        assert_eq!(payload("created", Some("")).reminder_delay().unwrap(), None);
        assert_eq!(payload("created", None).reminder_delay().unwrap(), None);
        assert!(payload("created", Some("soon")).reminder_delay().is_err());
    }

    #[test]
    fn unrepresentable_reminder_is_a_validation_error() {
        let now = Instant::now();
        let err = payload("created", Some("18446744073709551615s"))
            .reminder_at(now)
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert_eq!(
            payload("created", Some("10s")).reminder_at(now).unwrap(),
            Some(now + Duration::from_secs(10))
        );
    }
}
