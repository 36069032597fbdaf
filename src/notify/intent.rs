//! Notification intents — what should be said to whom, before any transport
//! is involved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directory::{NotificationSettings, UserId};
use crate::lifecycle::RequestId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    StatusUpdate,
    Assignment,
    Completion,
    TaskUpdate,
    ProgressNote,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatusUpdate => "status_update",
            Self::Assignment => "assignment",
            Self::Completion => "completion",
            Self::TaskUpdate => "task_update",
            Self::ProgressNote => "progress_note",
        }
    }

    /// Whether a recipient with `settings` wants this kind.
    /// Completion notices ignore settings.
    pub fn wanted_by(&self, settings: &NotificationSettings) -> bool {
        match self {
            Self::Completion => true,
            Self::Assignment => settings.notify_on_assign,
            Self::StatusUpdate | Self::TaskUpdate | Self::ProgressNote => settings.notify_on_update,
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message to deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationIntent {
    pub id: Uuid,
    pub recipient: UserId,
    pub kind: NotificationKind,
    pub subject: String,
    pub payload: serde_json::Value,
    pub request_id: RequestId,
    pub created_at: DateTime<Utc>,
}

impl NotificationIntent {
    pub fn new(
        recipient: UserId,
        kind: NotificationKind,
        subject: impl Into<String>,
        payload: serde_json::Value,
        request_id: RequestId,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient,
            kind,
            subject: subject.into(),
            payload,
            request_id,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_filter_by_kind() {
        let quiet = NotificationSettings {
            notify_on_assign: false,
            notify_on_update: false,
        };
        assert!(!NotificationKind::Assignment.wanted_by(&quiet));
        assert!(!NotificationKind::ProgressNote.wanted_by(&quiet));
        assert!(NotificationKind::Completion.wanted_by(&quiet));

        let defaults = NotificationSettings::default();
        assert!(NotificationKind::StatusUpdate.wanted_by(&defaults));
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&NotificationKind::ProgressNote).unwrap();
        assert_eq!(json, "\"progress_note\"");
        assert_eq!(NotificationKind::ProgressNote.to_string(), "progress_note");
    }
}
