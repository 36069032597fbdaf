//! TaskSet — the ordered, per-request checklist instantiated from a template.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::directory::UserId;
use crate::error::EngineError;

use super::template::OnboardingTemplate;

/// Task identifier, unique within one set. Assigned in insertion order
/// starting at 1 and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u32);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Completion state of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Done { by: UserId, at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub required: bool,
    pub state: TaskState,
}

impl Task {
    pub fn is_done(&self) -> bool {
        matches!(self.state, TaskState::Done { .. })
    }

    pub fn completed_by(&self) -> Option<&UserId> {
        match &self.state {
            TaskState::Done { by, .. } => Some(by),
            TaskState::Pending => None,
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            TaskState::Done { at, .. } => Some(*at),
            TaskState::Pending => None,
        }
    }
}

/// Ordered task collection owned by a single request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSet {
    tasks: Vec<Task>,
    next_id: u32,
}

impl TaskSet {
    /// Copy a template's items into a fresh, independent set.
    pub fn instantiate(template: &OnboardingTemplate) -> Self {
        let mut set = Self::default();
        for item in &template.items {
            set.push(item.description.clone(), item.required);
        }
        set
    }

    /// Append a new pending task and return its id.
    pub fn push(&mut self, description: impl Into<String>, required: bool) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        self.tasks.push(Task {
            id,
            description: description.into(),
            required,
            state: TaskState::Pending,
        });
        id
    }

    /// Rebuild from stored tasks, rejecting duplicate ids.
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self, EngineError> {
        let mut seen = std::collections::HashSet::new();
        for task in &tasks {
            if !seen.insert(task.id) {
                return Err(EngineError::validation(format!("duplicate task id {}", task.id)));
            }
        }
        let next_id = tasks.iter().map(|t| t.id.0).max().unwrap_or(0);
        Ok(Self { tasks, next_id })
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Mark a task done. Returns `false` if it was already done (the original
    /// completion is kept).
    pub fn mark_done(&mut self, id: TaskId, actor: &UserId, at: DateTime<Utc>) -> Result<bool, EngineError> {
        let task = self.find_mut(id)?;
        if task.is_done() {
            return Ok(false);
        }
        task.state = TaskState::Done {
            by: actor.clone(),
            at,
        };
        Ok(true)
    }

    /// Return a task to pending. Returns `false` if it was already pending.
    pub fn mark_pending(&mut self, id: TaskId) -> Result<bool, EngineError> {
        let task = self.find_mut(id)?;
        if !task.is_done() {
            return Ok(false);
        }
        task.state = TaskState::Pending;
        Ok(true)
    }

    pub fn all_required_done(&self) -> bool {
        self.tasks.iter().filter(|t| t.required).all(Task::is_done)
    }

    /// Ids of required tasks still pending, in set order.
    pub fn pending_required(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.required && !t.is_done())
            .map(|t| t.id)
            .collect()
    }

    /// `(done, total)` over all tasks.
    pub fn progress(&self) -> (usize, usize) {
        let done = self.tasks.iter().filter(|t| t.is_done()).count();
        (done, self.tasks.len())
    }

    fn find_mut(&mut self, id: TaskId) -> Result<&mut Task, EngineError> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| EngineError::NotFound {
                entity: "task",
                id: id.to_string(),
            })
    }
}

impl<'a> IntoIterator for &'a TaskSet {
    type Item = &'a Task;
    type IntoIter = std::slice::Iter<'a, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DepartmentId;
    use crate::tasks::template::TemplateItem;

    fn template() -> OnboardingTemplate {
        OnboardingTemplate::new(
            "Engineer",
            DepartmentId::new(),
            vec![
                TemplateItem::required("Laptop"),
                TemplateItem::required("Badge"),
                TemplateItem::optional("Team lunch"),
            ],
        )
    }

    #[test]
    fn instantiate_copies_items_in_order() {
        let set = TaskSet::instantiate(&template());
        let names: Vec<_> = set.iter().map(|t| t.description.as_str()).collect();
        assert_eq!(names, ["Laptop", "Badge", "Team lunch"]);
        let ids: Vec<_> = set.iter().map(|t| t.id).collect();
        assert_eq!(ids, [TaskId(1), TaskId(2), TaskId(3)]);
        assert!(set.iter().all(|t| !t.is_done()));
    }

    #[test]
    fn template_edits_do_not_leak_into_set() {
        let mut tpl = template();
        let set = TaskSet::instantiate(&tpl);
        tpl.items[0].description = "Desktop".into();
        tpl.items.push(TemplateItem::required("Parking"));
        assert_eq!(set.get(TaskId(1)).unwrap().description, "Laptop");
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn completion_gate_ignores_optional_tasks() {
        let mut set = TaskSet::instantiate(&template());
        let actor = UserId::new("it-admin");
        assert!(!set.all_required_done());
        assert_eq!(set.pending_required(), vec![TaskId(1), TaskId(2)]);

        set.mark_done(TaskId(1), &actor, Utc::now()).unwrap();
        set.mark_done(TaskId(2), &actor, Utc::now()).unwrap();
        assert!(set.all_required_done());
        assert_eq!(set.progress(), (2, 3));
    }

    #[test]
    fn mark_done_twice_keeps_first_completion() {
        let mut set = TaskSet::instantiate(&template());
        let first = UserId::new("alice");
        assert!(set.mark_done(TaskId(1), &first, Utc::now()).unwrap());
        assert!(!set.mark_done(TaskId(1), &UserId::new("bob"), Utc::now()).unwrap());
        assert_eq!(set.get(TaskId(1)).unwrap().completed_by(), Some(&first));
    }

    #[test]
    fn mark_pending_reopens() {
        let mut set = TaskSet::instantiate(&template());
        set.mark_done(TaskId(2), &UserId::new("a"), Utc::now()).unwrap();
        assert!(set.mark_pending(TaskId(2)).unwrap());
        assert!(!set.mark_pending(TaskId(2)).unwrap());
        assert!(set.get(TaskId(2)).unwrap().completed_at().is_none());
    }

    #[test]
    fn unknown_task_is_not_found() {
        let mut set = TaskSet::instantiate(&template());
        let err = set.mark_done(TaskId(99), &UserId::new("a"), Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "task", .. }));
    }

    #[test]
    fn push_never_reuses_ids() {
        let mut set = TaskSet::instantiate(&template());
        let id = set.push("Parking", false);
        assert_eq!(id, TaskId(4));

        let mut restored = TaskSet::from_tasks(set.iter().cloned().collect()).unwrap();
        assert_eq!(restored.push("Desk", true), TaskId(5));
    }

    #[test]
    fn from_tasks_rejects_duplicates() {
        let set = TaskSet::instantiate(&template());
        let mut tasks: Vec<Task> = set.iter().cloned().collect();
        tasks[1].id = TaskId(1);
        assert!(TaskSet::from_tasks(tasks).is_err());
    }

    #[test]
    fn empty_set_has_all_required_done() {
        assert!(TaskSet::default().all_required_done());
    }
}
