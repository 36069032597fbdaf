//! Request status state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an onboarding request.
///
/// `Draft → InProgress ⇄ Blocked`, `InProgress → Completed`, and
/// `Cancelled` from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Draft,
    InProgress,
    Blocked,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 5] = [
        Self::Draft,
        Self::InProgress,
        Self::Blocked,
        Self::Completed,
        Self::Cancelled,
    ];

    /// Check if a transition from `self` to `target` is a legal edge.
    /// Self-edges are never legal.
    pub fn can_transition_to(&self, target: RequestStatus) -> bool {
        use RequestStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, target),
            (Draft, InProgress)
                | (InProgress, Blocked)
                | (Blocked, InProgress)
                | (InProgress, Completed)
                | (Draft, Cancelled)
                | (InProgress, Cancelled)
                | (Blocked, Cancelled)
        )
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "draft" => Ok(Self::Draft),
            "in_progress" | "inprogress" | "started" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "completed" | "complete" | "done" => Ok(Self::Completed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(format!("unknown status {other:?}")),
        }
    }
}
