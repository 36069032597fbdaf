//! Error types for the onboarding engine.

use std::time::Duration;

use crate::directory::UserId;
use crate::lifecycle::{RequestId, RequestStatus};
use crate::tasks::TaskId;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Invalid command: {0}")]
    Command(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Version conflict on {entity} {id}: expected {expected}, found {found}")]
    Conflict {
        entity: String,
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors returned synchronously by lifecycle commands.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Request {request_id} cannot move from {from} to {to}")]
    InvalidTransition {
        request_id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("Request {request_id} has {} pending required task(s)", pending.len())]
    IncompleteTasks {
        request_id: RequestId,
        pending: Vec<TaskId>,
    },

    #[error("Request {request_id} is {status} and can no longer be modified")]
    TerminalState {
        request_id: RequestId,
        status: RequestStatus,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Request {request_id} was modified concurrently: {reason}")]
    ConcurrentModification { request_id: RequestId, reason: String },

    #[error("Store failure: {0}")]
    Store(#[from] DatabaseError),
}

impl EngineError {
    /// Whether the caller may retry the whole command.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub(crate) fn lock_timeout(request_id: RequestId, timeout: Duration) -> Self {
        Self::ConcurrentModification {
            request_id,
            reason: format!("lock not acquired within {timeout:?}"),
        }
    }
}

/// Notification delivery errors. Never surfaced to command callers.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Transport {transport} rejected notification for {recipient}: {reason}")]
    Rejected {
        transport: String,
        recipient: UserId,
        reason: String,
    },

    #[error("Transport {transport} unavailable: {reason}")]
    Unavailable { transport: String, reason: String },

    #[error("Gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
