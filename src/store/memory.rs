//! In-memory backend — a `Database` over plain maps behind one `RwLock`.
//!
//! Used by tests and by the binary when no database path is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::directory::{Department, DepartmentId, NotificationSettings, UserId};
use crate::error::DatabaseError;
use crate::lifecycle::{OnboardingRequest, RequestId};
use crate::progress::{ProgressLog, ProgressUpdate};
use crate::tasks::{OnboardingTemplate, TemplateId};

use super::traits::Database;

#[derive(Default)]
struct Tables {
    departments: HashMap<DepartmentId, Department>,
    templates: HashMap<TemplateId, OnboardingTemplate>,
    requests: HashMap<RequestId, OnboardingRequest>,
    logs: HashMap<RequestId, ProgressLog>,
    settings: HashMap<UserId, NotificationSettings>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn request_not_found(id: RequestId) -> DatabaseError {
    DatabaseError::NotFound {
        entity: "request".into(),
        id: id.to_string(),
    }
}

#[async_trait]
impl Database for MemoryStore {
    async fn insert_department(&self, dept: &Department) -> Result<(), DatabaseError> {
        let mut t = self.tables.write().await;
        if t.departments.values().any(|d| d.slug == dept.slug) {
            return Err(DatabaseError::Constraint(format!(
                "department slug {:?} already exists",
                dept.slug
            )));
        }
        if t.departments.contains_key(&dept.id) {
            return Err(DatabaseError::Constraint(format!("department {} already exists", dept.id)));
        }
        t.departments.insert(dept.id, dept.clone());
        Ok(())
    }

    async fn get_department(&self, id: DepartmentId) -> Result<Option<Department>, DatabaseError> {
        Ok(self.tables.read().await.departments.get(&id).cloned())
    }

    async fn get_department_by_slug(&self, slug: &str) -> Result<Option<Department>, DatabaseError> {
        let t = self.tables.read().await;
        Ok(t.departments.values().find(|d| d.slug == slug).cloned())
    }

    async fn list_departments(&self) -> Result<Vec<Department>, DatabaseError> {
        let t = self.tables.read().await;
        let mut depts: Vec<_> = t.departments.values().cloned().collect();
        depts.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(depts)
    }

    async fn delete_department(&self, id: DepartmentId) -> Result<(), DatabaseError> {
        let mut t = self.tables.write().await;
        if !t.departments.contains_key(&id) {
            return Err(DatabaseError::NotFound {
                entity: "department".into(),
                id: id.to_string(),
            });
        }
        let requests = t.requests.values().filter(|r| r.department == id).count();
        let templates = t.templates.values().filter(|tpl| tpl.department == id).count();
        if requests > 0 || templates > 0 {
            return Err(DatabaseError::Constraint(format!(
                "department {id} is referenced by {requests} request(s) and {templates} template(s)"
            )));
        }
        t.departments.remove(&id);
        debug!(department_id = %id, "Department deleted");
        Ok(())
    }

    async fn insert_template(&self, template: &OnboardingTemplate) -> Result<(), DatabaseError> {
        let mut t = self.tables.write().await;
        if !t.departments.contains_key(&template.department) {
            return Err(DatabaseError::Constraint(format!(
                "template department {} does not exist",
                template.department
            )));
        }
        if t.templates.contains_key(&template.id) {
            return Err(DatabaseError::Constraint(format!("template {} already exists", template.id)));
        }
        t.templates.insert(template.id, template.clone());
        Ok(())
    }

    async fn get_template(&self, id: TemplateId) -> Result<Option<OnboardingTemplate>, DatabaseError> {
        Ok(self.tables.read().await.templates.get(&id).cloned())
    }

    async fn list_templates(&self) -> Result<Vec<OnboardingTemplate>, DatabaseError> {
        let t = self.tables.read().await;
        let mut templates: Vec<_> = t.templates.values().cloned().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }

    async fn create_request(
        &self,
        request: &OnboardingRequest,
        initial: &ProgressUpdate,
    ) -> Result<(), DatabaseError> {
        let mut t = self.tables.write().await;
        if !t.departments.contains_key(&request.department) {
            return Err(DatabaseError::Constraint(format!(
                "request department {} does not exist",
                request.department
            )));
        }
        if t.requests.contains_key(&request.id) {
            return Err(DatabaseError::Constraint(format!("request {} already exists", request.id)));
        }
        let mut log = ProgressLog::new(request.id);
        log.append(initial.clone())
            .map_err(|e| DatabaseError::Constraint(e.to_string()))?;
        t.requests.insert(request.id, request.clone());
        t.logs.insert(request.id, log);
        Ok(())
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<OnboardingRequest>, DatabaseError> {
        Ok(self.tables.read().await.requests.get(&id).cloned())
    }

    async fn list_requests(&self) -> Result<Vec<OnboardingRequest>, DatabaseError> {
        let t = self.tables.read().await;
        let mut requests: Vec<_> = t.requests.values().cloned().collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(requests)
    }

    async fn save_request(
        &self,
        request: &OnboardingRequest,
        expected_version: u64,
        update: Option<&ProgressUpdate>,
    ) -> Result<(), DatabaseError> {
        let mut guard = self.tables.write().await;
        let t = &mut *guard;

        let stored = t.requests.get(&request.id).ok_or_else(|| request_not_found(request.id))?;
        if stored.version != expected_version {
            return Err(DatabaseError::Conflict {
                entity: "request".into(),
                id: request.id.to_string(),
                expected: expected_version,
                found: stored.version,
            });
        }

        if let Some(update) = update {
            let log = t.logs.get_mut(&request.id).ok_or_else(|| request_not_found(request.id))?;
            log.append(update.clone())
                .map_err(|e| DatabaseError::Constraint(e.to_string()))?;
        }
        t.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn load_progress(&self, id: RequestId) -> Result<ProgressLog, DatabaseError> {
        let t = self.tables.read().await;
        t.logs.get(&id).cloned().ok_or_else(|| request_not_found(id))
    }

    async fn get_notification_settings(
        &self,
        user: &UserId,
    ) -> Result<NotificationSettings, DatabaseError> {
        let t = self.tables.read().await;
        Ok(t.settings.get(user).cloned().unwrap_or_default())
    }

    async fn put_notification_settings(
        &self,
        user: &UserId,
        settings: &NotificationSettings,
    ) -> Result<(), DatabaseError> {
        self.tables
            .write()
            .await
            .settings
            .insert(user.clone(), settings.clone());
        Ok(())
    }
}
