//! JSON seed of departments, templates and notification settings, loaded at
//! startup. Applying a seed twice is harmless: existing departments (by
//! slug) and templates (by name within a department) are skipped.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::directory::{Department, NotificationSettings, UserId};
use crate::error::{ConfigError, EngineError};
use crate::lifecycle::LifecycleEngine;
use crate::tasks::{OnboardingTemplate, TemplateItem};

#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub departments: Vec<SeedDepartment>,
    #[serde(default)]
    pub templates: Vec<SeedTemplate>,
    #[serde(default)]
    pub notification_settings: HashMap<String, NotificationSettings>,
}

#[derive(Debug, Deserialize)]
pub struct SeedDepartment {
    pub slug: String,
    pub name: String,
    pub manager: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub auto_assign_to_manager: bool,
}

#[derive(Debug, Deserialize)]
pub struct SeedTemplate {
    pub name: String,
    /// Department slug.
    pub department: String,
    #[serde(default)]
    pub position_types: Vec<String>,
    #[serde(default)]
    pub estimated_duration_days: Option<u32>,
    pub items: Vec<TemplateItem>,
}

/// Counts of what `apply` created.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub departments: usize,
    pub templates: usize,
    pub settings: usize,
}

impl Seed {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(format!("seed: {e}")))
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub async fn apply(&self, engine: &LifecycleEngine) -> Result<SeedSummary, EngineError> {
        let store = engine.store();
        let mut summary = SeedSummary::default();

        for d in &self.departments {
            if store.get_department_by_slug(&d.slug).await?.is_some() {
                debug!(slug = %d.slug, "Seed department exists, skipping");
                continue;
            }
            let mut dept = Department::new(&d.slug, &d.name, UserId::new(&d.manager));
            dept.email = d.email.clone();
            dept.auto_assign_to_manager = d.auto_assign_to_manager;
            engine.add_department(dept).await?;
            summary.departments += 1;
        }

        let existing = store.list_templates().await?;
        for t in &self.templates {
            let dept = store
                .get_department_by_slug(&t.department)
                .await?
                .ok_or_else(|| {
                    EngineError::validation(format!(
                        "seed template {:?} names unknown department {:?}",
                        t.name, t.department
                    ))
                })?;
            if existing.iter().any(|e| e.department == dept.id && e.name == t.name) {
                continue;
            }
            let mut template = OnboardingTemplate::new(&t.name, dept.id, t.items.clone())
                .with_position_types(t.position_types.iter().cloned());
            if let Some(days) = t.estimated_duration_days {
                template = template.with_duration_days(days);
            }
            engine.add_template(template).await?;
            summary.templates += 1;
        }

        for (user, settings) in &self.notification_settings {
            engine
                .set_notification_settings(&UserId::new(user), settings.clone())
                .await?;
            summary.settings += 1;
        }

        info!(
            departments = summary.departments,
            templates = summary.templates,
            settings = summary.settings,
            "Seed applied"
        );
        Ok(summary)
    }
}
