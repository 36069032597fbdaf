//! Task model — templates and the per-request task set that gates completion.

pub mod set;
pub mod template;

pub use set::{Task, TaskId, TaskSet, TaskState};
pub use template::{OnboardingTemplate, TemplateId, TemplateItem};
