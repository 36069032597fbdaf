//! Onboarding templates — named, reusable task lists per position type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directory::DepartmentId;
use crate::error::EngineError;

/// Default number of days an onboarding is expected to take.
pub const DEFAULT_DURATION_DAYS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(pub Uuid);

impl TemplateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TemplateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One checklist entry in a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateItem {
    pub description: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

impl TemplateItem {
    pub fn required(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            required: false,
        }
    }
}

/// A fixed-schema template. Requests copy its items at creation time, so
/// later edits never reach existing requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingTemplate {
    pub id: TemplateId,
    pub name: String,
    pub department: DepartmentId,
    /// Position types this template applies to, e.g. `["engineer", "sre"]`.
    #[serde(default)]
    pub position_types: Vec<String>,
    pub items: Vec<TemplateItem>,
    #[serde(default = "default_duration")]
    pub estimated_duration_days: u32,
    #[serde(default = "default_active")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl OnboardingTemplate {
    pub fn new(name: impl Into<String>, department: DepartmentId, items: Vec<TemplateItem>) -> Self {
        Self {
            id: TemplateId::new(),
            name: name.into(),
            department,
            position_types: Vec::new(),
            items,
            estimated_duration_days: DEFAULT_DURATION_DAYS,
            active: true,
            created_at: Utc::now(),
        }
    }

    /// Template where every item is required.
    pub fn all_required<I, S>(name: impl Into<String>, department: DepartmentId, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            department,
            items.into_iter().map(TemplateItem::required).collect(),
        )
    }

    /// Builder: set position types.
    pub fn with_position_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.position_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: set the expected duration.
    pub fn with_duration_days(mut self, days: u32) -> Self {
        self.estimated_duration_days = days;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether this template is meant for the given position type.
    /// Templates without position types apply to every position.
    pub fn applies_to(&self, position_type: &str) -> bool {
        self.position_types.is_empty()
            || self
                .position_types
                .iter()
                .any(|p| p.eq_ignore_ascii_case(position_type.trim()))
    }

    /// Shape checks. An empty template is allowed to exist but cannot seed
    /// a request.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::validation("template name is empty"));
        }
        if let Some(pos) = self.items.iter().position(|i| i.description.trim().is_empty()) {
            return Err(EngineError::validation(format!(
                "template {:?} item {} has no description",
                self.name,
                pos + 1
            )));
        }
        Ok(())
    }
}

fn default_required() -> bool {
    true
}

fn default_active() -> bool {
    true
}

fn default_duration() -> u32 {
    DEFAULT_DURATION_DAYS
}
