//! LifecycleEngine — the single writer of onboarding requests.
//!
//! Every command on a request runs under that request's lock, re-reads the
//! stored request, validates, and commits through a version compare-and-swap
//! that also appends the progress entry. Events are published only after the
//! commit succeeds.

use std::sync::Arc;

use chrono::{DateTime, Days, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::directory::{Department, DepartmentId, NotificationSettings, UserId};
use crate::error::{DatabaseError, EngineError};
use crate::events::{EventBus, LifecycleEvent};
use crate::progress::{ProgressLog, ProgressUpdate};
use crate::store::Database;
use crate::tasks::{OnboardingTemplate, TaskId, TaskSet, TemplateId};

use super::locks::RequestLocks;
use super::model::{Ack, NewHireInfo, OnboardingRequest, RequestId};
use super::status::RequestStatus;

pub struct LifecycleEngine {
    store: Arc<dyn Database>,
    events: EventBus,
    locks: RequestLocks,
    config: EngineConfig,
}

impl LifecycleEngine {
    pub fn new(store: Arc<dyn Database>, config: EngineConfig) -> Self {
        Self {
            events: EventBus::new(config.event_capacity),
            locks: RequestLocks::new(config.lock_timeout),
            store,
            config,
        }
    }

    pub fn store(&self) -> Arc<dyn Database> {
        Arc::clone(&self.store)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Lossless event feed, for consumers that must not skip events.
    pub fn subscribe_queue(&self) -> mpsc::UnboundedReceiver<LifecycleEvent> {
        self.events.subscribe_queue()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Requests ────────────────────────────────────────────────────

    /// Open a new request in `Draft` with its task set copied from `template`.
    ///
    /// Without an explicit coordinator the department manager is used, but
    /// only if the department auto-assigns.
    pub async fn create(
        &self,
        new_hire: NewHireInfo,
        department: DepartmentId,
        coordinator: Option<UserId>,
        template: TemplateId,
    ) -> Result<RequestId, EngineError> {
        if new_hire.name.trim().is_empty() {
            return Err(EngineError::validation("new hire name is empty"));
        }

        let dept = self
            .store
            .get_department(department)
            .await?
            .ok_or_else(|| EngineError::validation(format!("unknown department {department}")))?;
        if !dept.active {
            return Err(EngineError::validation(format!("department {} is inactive", dept.slug)));
        }

        let template = self
            .store
            .get_template(template)
            .await?
            .ok_or_else(|| EngineError::validation(format!("unknown template {template}")))?;
        check_template_usable(&template, &dept)?;

        let coordinator = match coordinator {
            Some(c) => c,
            None if dept.auto_assign_to_manager => dept.manager.clone(),
            None => {
                return Err(EngineError::validation(format!(
                    "no coordinator given and department {} does not auto-assign",
                    dept.slug
                )));
            }
        };

        let due_date = new_hire
            .start_date
            .checked_add_days(Days::new(u64::from(template.estimated_duration_days)))
            .ok_or_else(|| EngineError::validation("due date out of range"))?;

        let now = Utc::now();
        let request = OnboardingRequest {
            id: RequestId::new(),
            new_hire,
            department,
            coordinator: coordinator.clone(),
            status: RequestStatus::Draft,
            template: template.id,
            tasks: TaskSet::instantiate(&template),
            due_date,
            version: 0,
            progress_entries: 1,
            created_at: now,
            updated_at: now,
        };
        let initial = ProgressUpdate::new(
            request.id,
            1,
            coordinator.clone(),
            None,
            RequestStatus::Draft,
            None,
            now,
        );

        self.store
            .create_request(&request, &initial)
            .await
            .map_err(|e| match e {
                DatabaseError::Constraint(msg) => EngineError::Validation(msg),
                other => EngineError::Store(other),
            })?;

        info!(
            request_id = %request.id,
            department = %dept.slug,
            coordinator = %coordinator,
            tasks = request.tasks.len(),
            "Onboarding request created"
        );
        self.events.publish(LifecycleEvent::RequestCreated {
            request_id: request.id,
            coordinator: coordinator.clone(),
            actor: coordinator,
            at: now,
        });
        Ok(request.id)
    }

    /// Move a request to `target`, conditional on the version observed now.
    pub async fn transition(
        &self,
        id: RequestId,
        target: RequestStatus,
        actor: &UserId,
        note: Option<String>,
    ) -> Result<Ack, EngineError> {
        let observed = self.get(id).await?.version;
        self.transition_expecting(id, observed, target, actor, note).await
    }

    /// Move a request to `target` if it is still at `expected_version`.
    pub async fn transition_expecting(
        &self,
        id: RequestId,
        expected_version: u64,
        target: RequestStatus,
        actor: &UserId,
        note: Option<String>,
    ) -> Result<Ack, EngineError> {
        let _guard = self.locks.acquire(id).await?;
        let mut request = self.get(id).await?;

        if request.version != expected_version {
            return Err(EngineError::ConcurrentModification {
                request_id: id,
                reason: format!(
                    "expected version {expected_version}, found {}",
                    request.version
                ),
            });
        }

        let from = request.status;
        if from.is_terminal() {
            return Err(EngineError::TerminalState {
                request_id: id,
                status: from,
            });
        }
        if !from.can_transition_to(target) {
            return Err(EngineError::InvalidTransition {
                request_id: id,
                from,
                to: target,
            });
        }
        if target == RequestStatus::Completed && !request.tasks.all_required_done() {
            return Err(EngineError::IncompleteTasks {
                request_id: id,
                pending: request.tasks.pending_required(),
            });
        }

        let at = next_timestamp(&request);
        let update = ProgressUpdate::new(
            id,
            request.progress_entries + 1,
            actor.clone(),
            Some(from),
            target,
            clean_note(note),
            at,
        );
        request.status = target;
        request.progress_entries += 1;
        request.touch(at);
        self.save(&request, expected_version, Some(&update)).await?;

        info!(request_id = %id, from = %from, to = %target, actor = %actor, "Request transitioned");
        self.events.publish(LifecycleEvent::StatusChanged {
            request_id: id,
            before: from,
            after: target,
            coordinator: request.coordinator.clone(),
            actor: actor.clone(),
            at,
        });
        Ok(Ack::of(&request))
    }

    /// Mark a task done. Completing a done task acknowledges without writing.
    pub async fn complete_task(
        &self,
        id: RequestId,
        task: TaskId,
        actor: &UserId,
    ) -> Result<Ack, EngineError> {
        let _guard = self.locks.acquire(id).await?;
        let mut request = self.get(id).await?;
        reject_terminal(&request)?;

        let expected = request.version;
        let at = next_timestamp(&request);
        if !request.tasks.mark_done(task, actor, at)? {
            debug!(request_id = %id, task = %task, "Task already done");
            return Ok(Ack::of(&request));
        }
        request.touch(at);
        self.save(&request, expected, None).await?;

        let (done, total) = request.tasks.progress();
        info!(request_id = %id, task = %task, actor = %actor, done, total, "Task completed");
        self.events.publish(LifecycleEvent::TaskCompleted {
            request_id: id,
            task_id: task,
            coordinator: request.coordinator.clone(),
            actor: actor.clone(),
            at,
        });
        Ok(Ack::of(&request))
    }

    /// Return a task to pending. Allowed on completed requests; the request
    /// status is left as is.
    pub async fn reopen_task(
        &self,
        id: RequestId,
        task: TaskId,
        actor: &UserId,
    ) -> Result<Ack, EngineError> {
        let _guard = self.locks.acquire(id).await?;
        let mut request = self.get(id).await?;
        if request.status == RequestStatus::Cancelled {
            return Err(EngineError::TerminalState {
                request_id: id,
                status: request.status,
            });
        }

        let expected = request.version;
        if !request.tasks.mark_pending(task)? {
            return Ok(Ack::of(&request));
        }
        request.touch(next_timestamp(&request));
        self.save(&request, expected, None).await?;

        if request.status == RequestStatus::Completed {
            warn!(request_id = %id, task = %task, actor = %actor, "Task reopened on completed request");
        } else {
            info!(request_id = %id, task = %task, actor = %actor, "Task reopened");
        }
        Ok(Ack::of(&request))
    }

    /// Add a task to one request's set. The template is not touched.
    pub async fn add_task(
        &self,
        id: RequestId,
        description: &str,
        required: bool,
    ) -> Result<TaskId, EngineError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(EngineError::validation("task description is empty"));
        }

        let _guard = self.locks.acquire(id).await?;
        let mut request = self.get(id).await?;
        reject_terminal(&request)?;

        let expected = request.version;
        let task = request.tasks.push(description, required);
        request.touch(next_timestamp(&request));
        self.save(&request, expected, None).await?;

        debug!(request_id = %id, task = %task, required, "Task added");
        Ok(task)
    }

    /// Whether moving to `Completed` would succeed right now.
    pub async fn can_complete(&self, id: RequestId) -> Result<bool, EngineError> {
        let request = self.get(id).await?;
        Ok(request.status.can_transition_to(RequestStatus::Completed)
            && request.tasks.all_required_done())
    }

    /// Append a note without changing status.
    pub async fn add_note(
        &self,
        id: RequestId,
        actor: &UserId,
        note: &str,
    ) -> Result<Ack, EngineError> {
        let Some(note) = clean_note(Some(note.to_string())) else {
            return Err(EngineError::validation("note is empty"));
        };

        let _guard = self.locks.acquire(id).await?;
        let mut request = self.get(id).await?;

        let expected = request.version;
        let at = next_timestamp(&request);
        let update = ProgressUpdate::new(
            id,
            request.progress_entries + 1,
            actor.clone(),
            Some(request.status),
            request.status,
            Some(note),
            at,
        );
        request.progress_entries += 1;
        request.touch(at);
        self.save(&request, expected, Some(&update)).await?;

        debug!(request_id = %id, actor = %actor, "Note added");
        self.events.publish(LifecycleEvent::NoteAdded {
            request_id: id,
            update_id: update.id,
            coordinator: request.coordinator.clone(),
            actor: actor.clone(),
            at,
        });
        Ok(Ack::of(&request))
    }

    /// Hand the request to another coordinator. Not recorded in the log.
    pub async fn reassign(&self, id: RequestId, coordinator: UserId) -> Result<Ack, EngineError> {
        let _guard = self.locks.acquire(id).await?;
        let mut request = self.get(id).await?;
        if request.status.is_terminal() && !self.config.allow_reassign_on_terminal {
            return Err(EngineError::TerminalState {
                request_id: id,
                status: request.status,
            });
        }
        if request.coordinator == coordinator {
            return Ok(Ack::of(&request));
        }

        let expected = request.version;
        let at = next_timestamp(&request);
        let from = std::mem::replace(&mut request.coordinator, coordinator.clone());
        request.touch(at);
        self.save(&request, expected, None).await?;

        info!(request_id = %id, from = %from, to = %coordinator, "Request reassigned");
        self.events.publish(LifecycleEvent::Reassigned {
            request_id: id,
            from,
            to: coordinator,
            at,
        });
        Ok(Ack::of(&request))
    }

    pub async fn get(&self, id: RequestId) -> Result<OnboardingRequest, EngineError> {
        self.store
            .get_request(id)
            .await?
            .ok_or_else(|| request_not_found(id))
    }

    pub async fn history(&self, id: RequestId) -> Result<ProgressLog, EngineError> {
        self.store.load_progress(id).await.map_err(|e| match e {
            DatabaseError::NotFound { .. } => request_not_found(id),
            other => EngineError::Store(other),
        })
    }

    pub async fn list(&self) -> Result<Vec<OnboardingRequest>, EngineError> {
        Ok(self.store.list_requests().await?)
    }

    // ── Directory ───────────────────────────────────────────────────

    pub async fn add_department(&self, dept: Department) -> Result<DepartmentId, EngineError> {
        dept.validate()?;
        self.store
            .insert_department(&dept)
            .await
            .map_err(constraint_as_validation)?;
        info!(department = %dept.slug, manager = %dept.manager, "Department added");
        Ok(dept.id)
    }

    /// Delete a department nothing references.
    pub async fn delete_department(&self, id: DepartmentId) -> Result<(), EngineError> {
        self.store.delete_department(id).await.map_err(|e| match e {
            DatabaseError::NotFound { .. } => EngineError::NotFound {
                entity: "department",
                id: id.to_string(),
            },
            other => constraint_as_validation(other),
        })?;
        info!(department_id = %id, "Department deleted");
        Ok(())
    }

    pub async fn add_template(&self, template: OnboardingTemplate) -> Result<TemplateId, EngineError> {
        template.validate()?;
        if self.store.get_department(template.department).await?.is_none() {
            return Err(EngineError::validation(format!(
                "unknown department {}",
                template.department
            )));
        }
        self.store
            .insert_template(&template)
            .await
            .map_err(constraint_as_validation)?;
        info!(template = %template.name, items = template.items.len(), "Template added");
        Ok(template.id)
    }

    pub async fn set_notification_settings(
        &self,
        user: &UserId,
        settings: NotificationSettings,
    ) -> Result<(), EngineError> {
        self.store.put_notification_settings(user, &settings).await?;
        debug!(user = %user, ?settings, "Notification settings updated");
        Ok(())
    }

    async fn save(
        &self,
        request: &OnboardingRequest,
        expected_version: u64,
        update: Option<&ProgressUpdate>,
    ) -> Result<(), EngineError> {
        self.store
            .save_request(request, expected_version, update)
            .await
            .map_err(|e| match e {
                DatabaseError::Conflict { expected, found, .. } => {
                    EngineError::ConcurrentModification {
                        request_id: request.id,
                        reason: format!("store expected version {expected}, found {found}"),
                    }
                }
                DatabaseError::NotFound { .. } => request_not_found(request.id),
                other => EngineError::Store(other),
            })
    }
}

/// Re-run `op` while it fails with `ConcurrentModification`, up to
/// `attempts` calls in total. Other outcomes are returned as is.
pub async fn retry_on_conflict<T, F, Fut>(attempts: u32, mut op: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_conflict() && attempt < attempts => {
                debug!(attempt, error = %e, "Retrying after conflict");
                attempt += 1;
                tokio::task::yield_now().await;
            }
            other => return other,
        }
    }
}

fn check_template_usable(template: &OnboardingTemplate, dept: &Department) -> Result<(), EngineError> {
    if template.department != dept.id {
        return Err(EngineError::validation(format!(
            "template {} belongs to another department",
            template.name
        )));
    }
    if !template.active {
        return Err(EngineError::validation(format!("template {} is inactive", template.name)));
    }
    if template.is_empty() {
        return Err(EngineError::validation(format!("template {} has no tasks", template.name)));
    }
    Ok(())
}

fn reject_terminal(request: &OnboardingRequest) -> Result<(), EngineError> {
    if request.status.is_terminal() {
        return Err(EngineError::TerminalState {
            request_id: request.id,
            status: request.status,
        });
    }
    Ok(())
}

/// Entries must never predate the previous write.
fn next_timestamp(request: &OnboardingRequest) -> DateTime<Utc> {
    Utc::now().max(request.updated_at)
}

fn clean_note(note: Option<String>) -> Option<String> {
    note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

fn request_not_found(id: RequestId) -> EngineError {
    EngineError::NotFound {
        entity: "request",
        id: id.to_string(),
    }
}

fn constraint_as_validation(e: DatabaseError) -> EngineError {
    match e {
        DatabaseError::Constraint(msg) => EngineError::Validation(msg),
        other => EngineError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::NaiveDate;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::store::MemoryStore;
    use crate::tasks::TemplateItem;

    struct Fixture {
        engine: Arc<LifecycleEngine>,
        dept: DepartmentId,
        template: TemplateId,
        coord: UserId,
    }

    async fn fixture_with(config: EngineConfig) -> Fixture {
        let engine = Arc::new(LifecycleEngine::new(Arc::new(MemoryStore::new()), config));
        let dept = engine
            .add_department(Department::new("it", "IT", UserId::new("it-boss")))
            .await
            .unwrap();
        let template = engine
            .add_template(OnboardingTemplate::all_required(
                "Standard",
                dept,
                ["Laptop", "Badge", "Accounts"],
            ))
            .await
            .unwrap();
        Fixture {
            engine,
            dept,
            template,
            coord: UserId::new("coord"),
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(EngineConfig::default()).await
    }

    fn hire() -> NewHireInfo {
        NewHireInfo::new("Jo Park", NaiveDate::from_ymd_opt(2030, 3, 4).unwrap())
    }

    impl Fixture {
        async fn create(&self) -> RequestId {
            self.engine
                .create(hire(), self.dept, Some(self.coord.clone()), self.template)
                .await
                .unwrap()
        }

        async fn finish_tasks(&self, id: RequestId) {
            for task in [TaskId(1), TaskId(2), TaskId(3)] {
                self.engine.complete_task(id, task, &self.coord).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn laptop_badge_accounts_scenario() {
        let f = fixture().await;
        let id = f.create().await;
        let request = f.engine.get(id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Draft);
        assert_eq!(request.due_date, NaiveDate::from_ymd_opt(2030, 3, 9).unwrap());

        f.engine
            .transition(id, RequestStatus::InProgress, &f.coord, None)
            .await
            .unwrap();
        assert_eq!(f.engine.history(id).await.unwrap().len(), 2);

        let err = f
            .engine
            .transition(id, RequestStatus::Completed, &f.coord, None)
            .await
            .unwrap_err();
        match err {
            EngineError::IncompleteTasks { pending, .. } => assert_eq!(pending.len(), 3),
            other => panic!("expected IncompleteTasks, got {other}"),
        }
        assert!(!f.engine.can_complete(id).await.unwrap());

        f.finish_tasks(id).await;
        assert!(f.engine.can_complete(id).await.unwrap());

        let ack = f
            .engine
            .transition(id, RequestStatus::Completed, &f.coord, Some("all set".into()))
            .await
            .unwrap();
        assert_eq!(ack.status, RequestStatus::Completed);

        let log = f.engine.history(id).await.unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(
            log.status_path(),
            vec![RequestStatus::Draft, RequestStatus::InProgress, RequestStatus::Completed]
        );
        assert_eq!(log.last().unwrap().note.as_deref(), Some("all set"));
        assert!(f.engine.get(id).await.unwrap().tasks.all_required_done());
    }

    #[tokio::test]
    async fn retrying_applied_transition_is_rejected() {
        let f = fixture().await;
        let id = f.create().await;
        f.engine
            .transition(id, RequestStatus::InProgress, &f.coord, None)
            .await
            .unwrap();

        let err = f
            .engine
            .transition(id, RequestStatus::InProgress, &f.coord, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }), "got {err}");

        f.engine
            .transition(id, RequestStatus::Cancelled, &f.coord, None)
            .await
            .unwrap();
        let err = f
            .engine
            .transition(id, RequestStatus::Cancelled, &f.coord, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TerminalState { .. }), "got {err}");
        assert_eq!(f.engine.history(id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn illegal_edge_is_invalid_transition() {
        let f = fixture().await;
        let id = f.create().await;
        let err = f
            .engine
            .transition(id, RequestStatus::Blocked, &f.coord, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: RequestStatus::Draft,
                to: RequestStatus::Blocked,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn concurrent_transitions_have_one_winner() {
        let f = fixture().await;
        let id = f.create().await;
        let version = f.engine.get(id).await.unwrap().version;

        let mut handles = Vec::new();
        for target in [
            RequestStatus::InProgress,
            RequestStatus::Cancelled,
            RequestStatus::InProgress,
            RequestStatus::Cancelled,
            RequestStatus::InProgress,
        ] {
            let engine = Arc::clone(&f.engine);
            let actor = f.coord.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .transition_expecting(id, version, target, &actor, None)
                    .await
                    .map(|ack| ack.status)
            }));
        }

        let mut winners = Vec::new();
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(status) => winners.push(status),
                Err(e) if e.is_conflict() => conflicts += 1,
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(conflicts, 4);
        assert_eq!(f.engine.get(id).await.unwrap().status, winners[0]);
        assert_eq!(f.engine.history(id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn lock_timeout_surfaces_as_conflict() {
        let f = fixture_with(EngineConfig {
            lock_timeout: Duration::from_millis(30),
            ..EngineConfig::default()
        })
        .await;
        let id = f.create().await;

        let _held = f.engine.locks.acquire(id).await.unwrap();
        let err = f
            .engine
            .transition(id, RequestStatus::InProgress, &f.coord, None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(f.engine.get(id).await.unwrap().status, RequestStatus::Draft);
    }

    #[tokio::test]
    async fn retry_on_conflict_reruns_only_conflicts() {
        let f = fixture().await;
        let id = f.create().await;
        let stale = f.engine.get(id).await.unwrap().version;
        f.engine.add_note(id, &f.coord, "bump").await.unwrap();

        // The first attempt uses the stale version; the retry re-reads.
        let mut calls = 0;
        let engine = Arc::clone(&f.engine);
        let ack = retry_on_conflict(3, || {
            calls += 1;
            let engine = Arc::clone(&engine);
            let actor = f.coord.clone();
            let first = calls == 1;
            async move {
                let version = if first {
                    stale
                } else {
                    engine.get(id).await?.version
                };
                engine
                    .transition_expecting(id, version, RequestStatus::InProgress, &actor, None)
                    .await
            }
        })
        .await
        .unwrap();
        assert_eq!(ack.status, RequestStatus::InProgress);
        assert_eq!(calls, 2);

        let mut calls = 0;
        let err = retry_on_conflict(3, || {
            calls += 1;
            let engine = Arc::clone(&engine);
            let actor = f.coord.clone();
            async move {
                engine
                    .transition(id, RequestStatus::InProgress, &actor, None)
                    .await
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn completing_done_task_is_a_silent_ack() {
        let f = fixture().await;
        let id = f.create().await;
        let mut rx = f.engine.subscribe();

        let first = f.engine.complete_task(id, TaskId(1), &f.coord).await.unwrap();
        assert!(matches!(rx.try_recv(), Ok(LifecycleEvent::TaskCompleted { .. })));

        let second = f
            .engine
            .complete_task(id, TaskId(1), &UserId::new("someone-else"))
            .await
            .unwrap();
        assert_eq!(first.version, second.version);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        let task = f.engine.get(id).await.unwrap();
        assert_eq!(task.tasks.get(TaskId(1)).unwrap().completed_by(), Some(&f.coord));
    }

    #[tokio::test]
    async fn unknown_task_and_request_are_not_found() {
        let f = fixture().await;
        let id = f.create().await;
        let err = f.engine.complete_task(id, TaskId(42), &f.coord).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "task", .. }));

        let err = f
            .engine
            .complete_task(RequestId::new(), TaskId(1), &f.coord)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "request", .. }));
    }

    #[tokio::test]
    async fn reopen_on_completed_keeps_status() {
        let f = fixture().await;
        let id = f.create().await;
        f.engine
            .transition(id, RequestStatus::InProgress, &f.coord, None)
            .await
            .unwrap();
        f.finish_tasks(id).await;
        f.engine
            .transition(id, RequestStatus::Completed, &f.coord, None)
            .await
            .unwrap();

        let ack = f.engine.reopen_task(id, TaskId(2), &f.coord).await.unwrap();
        assert_eq!(ack.status, RequestStatus::Completed);
        let request = f.engine.get(id).await.unwrap();
        assert!(!request.tasks.all_required_done());
        assert_eq!(f.engine.history(id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn cancelled_request_rejects_task_changes() {
        let f = fixture().await;
        let id = f.create().await;
        f.engine
            .transition(id, RequestStatus::Cancelled, &f.coord, None)
            .await
            .unwrap();

        for err in [
            f.engine.complete_task(id, TaskId(1), &f.coord).await.unwrap_err(),
            f.engine.reopen_task(id, TaskId(1), &f.coord).await.unwrap_err(),
        ] {
            assert!(matches!(err, EngineError::TerminalState { .. }), "got {err}");
        }
        let err = f.engine.add_task(id, "Parking", false).await.unwrap_err();
        assert!(matches!(err, EngineError::TerminalState { .. }));
    }

    #[tokio::test]
    async fn added_optional_task_does_not_gate_completion() {
        let f = fixture().await;
        let id = f.create().await;
        let extra = f.engine.add_task(id, "Team lunch", false).await.unwrap();
        assert_eq!(extra, TaskId(4));

        f.engine
            .transition(id, RequestStatus::InProgress, &f.coord, None)
            .await
            .unwrap();
        f.finish_tasks(id).await;
        assert!(f.engine.can_complete(id).await.unwrap());

        let required = f.engine.add_task(id, "Security training", true).await.unwrap();
        assert!(!f.engine.can_complete(id).await.unwrap());
        f.engine.complete_task(id, required, &f.coord).await.unwrap();
        assert!(f.engine.can_complete(id).await.unwrap());
    }

    #[tokio::test]
    async fn notes_preserve_status_and_reject_blank() {
        let f = fixture().await;
        let id = f.create().await;
        let before = f.engine.get(id).await.unwrap();

        let ack = f.engine.add_note(id, &f.coord, "  waiting on laptop  ").await.unwrap();
        assert_eq!(ack.status, RequestStatus::Draft);
        assert_eq!(ack.version, before.version + 1);

        let log = f.engine.history(id).await.unwrap();
        let entry = log.last().unwrap();
        assert_eq!(entry.status_before, Some(RequestStatus::Draft));
        assert_eq!(entry.status_after, RequestStatus::Draft);
        assert_eq!(entry.note.as_deref(), Some("waiting on laptop"));

        let err = f.engine.add_note(id, &f.coord, "   ").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn reassign_policy_on_terminal_requests() {
        let f = fixture().await;
        let id = f.create().await;
        f.engine
            .transition(id, RequestStatus::Cancelled, &f.coord, None)
            .await
            .unwrap();
        let err = f.engine.reassign(id, UserId::new("bea")).await.unwrap_err();
        assert!(matches!(err, EngineError::TerminalState { .. }));

        let f = fixture_with(EngineConfig {
            allow_reassign_on_terminal: true,
            ..EngineConfig::default()
        })
        .await;
        let id = f.create().await;
        f.engine
            .transition(id, RequestStatus::Cancelled, &f.coord, None)
            .await
            .unwrap();
        let mut rx = f.engine.subscribe();
        f.engine.reassign(id, UserId::new("bea")).await.unwrap();
        assert_eq!(f.engine.get(id).await.unwrap().coordinator, UserId::new("bea"));
        assert!(matches!(rx.try_recv(), Ok(LifecycleEvent::Reassigned { .. })));
        // Reassignment is not part of the progress history.
        assert_eq!(f.engine.history(id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn create_validates_inputs() {
        let f = fixture().await;

        let err = f
            .engine
            .create(hire(), DepartmentId::new(), Some(f.coord.clone()), f.template)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let empty = f
            .engine
            .add_template(OnboardingTemplate::new("Empty", f.dept, Vec::<TemplateItem>::new()))
            .await
            .unwrap();
        let err = f
            .engine
            .create(hire(), f.dept, Some(f.coord.clone()), empty)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // IT does not auto-assign, so a coordinator is mandatory.
        let err = f.engine.create(hire(), f.dept, None, f.template).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = f
            .engine
            .create(
                NewHireInfo::new(" ", NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()),
                f.dept,
                Some(f.coord.clone()),
                f.template,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn auto_assign_uses_department_manager() {
        let f = fixture().await;
        let hr = f
            .engine
            .add_department(Department::new("hr", "HR", UserId::new("hr-lead")).with_auto_assign())
            .await
            .unwrap();
        let template = f
            .engine
            .add_template(OnboardingTemplate::all_required("HR basics", hr, ["Contract"]))
            .await
            .unwrap();
        let mut rx = f.engine.subscribe();

        let id = f.engine.create(hire(), hr, None, template).await.unwrap();
        assert_eq!(f.engine.get(id).await.unwrap().coordinator, UserId::new("hr-lead"));
        match rx.try_recv() {
            Ok(LifecycleEvent::RequestCreated { coordinator, .. }) => {
                assert_eq!(coordinator, UserId::new("hr-lead"));
            }
            other => panic!("expected RequestCreated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn referenced_department_cannot_be_deleted() {
        let f = fixture().await;
        f.create().await;
        let err = f.engine.delete_department(f.dept).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "got {err}");

        let err = f.engine.delete_department(DepartmentId::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "department", .. }));
    }

    #[tokio::test]
    async fn blocked_round_trip_is_logged() {
        let f = fixture().await;
        let id = f.create().await;
        for target in [
            RequestStatus::InProgress,
            RequestStatus::Blocked,
            RequestStatus::InProgress,
        ] {
            f.engine.transition(id, target, &f.coord, None).await.unwrap();
        }
        let log = f.engine.history(id).await.unwrap();
        let path = log.status_path();
        assert!(path.windows(2).all(|w| w[0].can_transition_to(w[1])));
        assert_eq!(path.len(), 4);
    }
}
