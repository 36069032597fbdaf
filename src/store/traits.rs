//! Unified `Database` trait — single async interface for all persistence.
//!
//! The lifecycle engine is the only writer of requests and progress entries.
//! Backends provide the atomicity the engine relies on: `save_request` is a
//! compare-and-swap on the request version that commits the optional
//! progress entry in the same step.

use async_trait::async_trait;

use crate::directory::{Department, DepartmentId, NotificationSettings, UserId};
use crate::error::DatabaseError;
use crate::lifecycle::{OnboardingRequest, RequestId};
use crate::progress::{ProgressLog, ProgressUpdate};
use crate::tasks::{OnboardingTemplate, TemplateId};

/// Backend-agnostic persistence for departments, templates, requests,
/// progress logs, and notification settings.
#[async_trait]
pub trait Database: Send + Sync {
    // ── Departments ─────────────────────────────────────────────────

    /// Insert a department. Fails with `Constraint` if the slug is taken.
    async fn insert_department(&self, dept: &Department) -> Result<(), DatabaseError>;

    async fn get_department(&self, id: DepartmentId) -> Result<Option<Department>, DatabaseError>;

    async fn get_department_by_slug(&self, slug: &str) -> Result<Option<Department>, DatabaseError>;

    async fn list_departments(&self) -> Result<Vec<Department>, DatabaseError>;

    /// Delete a department. Fails with `Constraint` while any request or
    /// template references it, and with `NotFound` if it does not exist.
    async fn delete_department(&self, id: DepartmentId) -> Result<(), DatabaseError>;

    // ── Templates ───────────────────────────────────────────────────

    async fn insert_template(&self, template: &OnboardingTemplate) -> Result<(), DatabaseError>;

    async fn get_template(&self, id: TemplateId) -> Result<Option<OnboardingTemplate>, DatabaseError>;

    async fn list_templates(&self) -> Result<Vec<OnboardingTemplate>, DatabaseError>;

    // ── Requests ────────────────────────────────────────────────────

    /// Insert a new request together with its first progress entry.
    /// Fails with `Constraint` if the department does not exist.
    async fn create_request(
        &self,
        request: &OnboardingRequest,
        initial: &ProgressUpdate,
    ) -> Result<(), DatabaseError>;

    async fn get_request(&self, id: RequestId) -> Result<Option<OnboardingRequest>, DatabaseError>;

    /// All requests, oldest first.
    async fn list_requests(&self) -> Result<Vec<OnboardingRequest>, DatabaseError>;

    /// Replace a request if its stored version is still `expected_version`,
    /// appending `update` to its log in the same step. Fails with
    /// `Conflict` when the version moved.
    async fn save_request(
        &self,
        request: &OnboardingRequest,
        expected_version: u64,
        update: Option<&ProgressUpdate>,
    ) -> Result<(), DatabaseError>;

    /// The request's full progress log.
    async fn load_progress(&self, id: RequestId) -> Result<ProgressLog, DatabaseError>;

    // ── Notification settings ───────────────────────────────────────

    /// Settings for `user`, or the defaults if none were stored.
    async fn get_notification_settings(
        &self,
        user: &UserId,
    ) -> Result<NotificationSettings, DatabaseError>;

    async fn put_notification_settings(
        &self,
        user: &UserId,
        settings: &NotificationSettings,
    ) -> Result<(), DatabaseError>;
}
