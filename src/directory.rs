//! Directory entities referenced by requests — people, departments, and
//! per-user notification settings.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("static slug regex"));

/// Identity of a person, as supplied by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepartmentId(pub Uuid);

impl DepartmentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DepartmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DepartmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A business unit that owns onboarding requests (IT, HR, Finance, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Department {
    pub id: DepartmentId,
    /// Short stable key, e.g. `"it-ops"`. Unique across departments.
    pub slug: String,
    pub name: String,
    pub manager: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    /// New requests without an explicit coordinator go to the manager.
    #[serde(default)]
    pub auto_assign_to_manager: bool,
    pub created_at: DateTime<Utc>,
}

impl Department {
    pub fn new(slug: impl Into<String>, name: impl Into<String>, manager: UserId) -> Self {
        Self {
            id: DepartmentId::new(),
            slug: slug.into(),
            name: name.into(),
            manager,
            email: None,
            active: true,
            auto_assign_to_manager: false,
            created_at: Utc::now(),
        }
    }

    /// Builder: route unassigned requests to the manager.
    pub fn with_auto_assign(mut self) -> Self {
        self.auto_assign_to_manager = true;
        self
    }

    /// Builder: set the contact address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !SLUG_RE.is_match(&self.slug) {
            return Err(EngineError::validation(format!(
                "department slug {:?} must be lowercase letters, digits and single dashes",
                self.slug
            )));
        }
        if self.name.trim().is_empty() {
            return Err(EngineError::validation("department name is empty"));
        }
        Ok(())
    }
}

/// Per-user notification preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Receive `assignment` notifications.
    pub notify_on_assign: bool,
    /// Receive status, task and note notifications.
    pub notify_on_update: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            notify_on_assign: true,
            notify_on_update: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_validation() {
        let ok = Department::new("it-ops", "IT Operations", UserId::new("mgr"));
        assert!(ok.validate().is_ok());

        for bad in ["IT", "it ops", "-it", "it--ops", ""] {
            let dept = Department::new(bad, "IT", UserId::new("mgr"));
            assert!(
                matches!(dept.validate(), Err(EngineError::Validation(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn blank_name_rejected() {
        let dept = Department::new("hr", "   ", UserId::new("mgr"));
        assert!(dept.validate().is_err());
    }

    #[test]
    fn department_json_defaults() {
        let json = format!(
            r#"{{"id":"{}","slug":"fin","name":"Finance","manager":"ana","created_at":"2026-01-01T00:00:00Z"}}"#,
            Uuid::new_v4()
        );
        let dept: Department = serde_json::from_str(&json).unwrap();
        assert!(dept.active);
        assert!(!dept.auto_assign_to_manager);
        assert_eq!(dept.manager, UserId::new("ana"));
    }

    #[test]
    fn settings_default_to_enabled() {
        let s = NotificationSettings::default();
        assert!(s.notify_on_assign && s.notify_on_update);
    }
}
