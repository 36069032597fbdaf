//! Onboarding request data model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directory::{DepartmentId, UserId};
use crate::tasks::{TaskSet, TemplateId};

use super::status::RequestStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Who is being onboarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewHireInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_type: Option<String>,
    /// The new hire's line manager, notified on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hiring_manager: Option<UserId>,
    pub start_date: NaiveDate,
}

impl NewHireInfo {
    pub fn new(name: impl Into<String>, start_date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            email: None,
            position_type: None,
            hiring_manager: None,
            start_date,
        }
    }

    /// Builder: set the hiring manager.
    pub fn with_manager(mut self, manager: UserId) -> Self {
        self.hiring_manager = Some(manager);
        self
    }

    /// Builder: set the position type.
    pub fn with_position(mut self, position: impl Into<String>) -> Self {
        self.position_type = Some(position.into());
        self
    }

    /// Builder: set the contact email.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// A single onboarding request. Only the lifecycle engine mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingRequest {
    pub id: RequestId,
    pub new_hire: NewHireInfo,
    pub department: DepartmentId,
    pub coordinator: UserId,
    pub status: RequestStatus,
    /// Template the task set was instantiated from.
    pub template: TemplateId,
    pub tasks: TaskSet,
    /// Start date plus the template's estimated duration.
    pub due_date: NaiveDate,
    /// Incremented on every persisted change.
    pub version: u64,
    /// Number of entries in the request's progress log.
    pub progress_entries: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OnboardingRequest {
    pub fn start_date(&self) -> NaiveDate {
        self.new_hire.start_date
    }

    /// Open (non-terminal) and past its due date.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.status.is_terminal() && self.due_date < today
    }

    /// Bump version and timestamp after an in-memory change.
    pub(crate) fn touch(&mut self, at: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = at;
    }
}

/// Acknowledgement returned by successful commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub request_id: RequestId,
    /// Request version after the command. Pass it to
    /// `LifecycleEngine::transition_expecting` for a conditional follow-up.
    pub version: u64,
    pub status: RequestStatus,
    pub at: DateTime<Utc>,
}

impl Ack {
    pub(crate) fn of(request: &OnboardingRequest) -> Self {
        Self {
            request_id: request.id,
            version: request.version,
            status: request.status,
            at: request.updated_at,
        }
    }
}
