//! NotificationDispatcher — turns lifecycle events into notification intents
//! and hands them to a transport without ever blocking the engine.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::NotifyConfig;
use crate::directory::UserId;
use crate::error::DatabaseError;
use crate::events::LifecycleEvent;
use crate::lifecycle::{OnboardingRequest, RequestStatus};
use crate::store::Database;

use super::intent::{NotificationIntent, NotificationKind};
use super::transport::NotificationTransport;

/// Longest note excerpt carried in a payload, in characters.
const NOTE_EXCERPT_CHARS: usize = 200;

/// What the routing rules need to know about the request behind an event.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request: OnboardingRequest,
    pub department_manager: UserId,
    /// Text of the note for `NoteAdded` events.
    pub note: Option<String>,
}

/// Routing rules: who hears about `event`, and as what. The coordinator is
/// the one recorded on the event, not the request's current one. Recipients
/// are de-duplicated per kind; settings are applied later.
pub fn recipients_for(
    event: &LifecycleEvent,
    ctx: &RequestContext,
    hr_recipients: &[UserId],
) -> Vec<(UserId, NotificationKind)> {
    let coordinator = event.coordinator();
    let mut out: Vec<(UserId, NotificationKind)> = Vec::new();
    let mut push = |user: &UserId, kind: NotificationKind| {
        if !out.iter().any(|(u, k)| u == user && *k == kind) {
            out.push((user.clone(), kind));
        }
    };

    match event {
        LifecycleEvent::RequestCreated { .. } => {
            push(coordinator, NotificationKind::Assignment);
        }
        LifecycleEvent::StatusChanged { after, .. } => {
            push(coordinator, NotificationKind::StatusUpdate);
            push(&ctx.department_manager, NotificationKind::StatusUpdate);
            if *after == RequestStatus::Completed {
                let manager = ctx
                    .request
                    .new_hire
                    .hiring_manager
                    .as_ref()
                    .unwrap_or(&ctx.department_manager);
                push(manager, NotificationKind::Completion);
                for hr in hr_recipients {
                    push(hr, NotificationKind::Completion);
                }
            }
        }
        LifecycleEvent::Reassigned { to, .. } => {
            push(to, NotificationKind::Assignment);
        }
        LifecycleEvent::TaskCompleted { actor, .. } => {
            if actor != coordinator {
                push(coordinator, NotificationKind::TaskUpdate);
            }
        }
        LifecycleEvent::NoteAdded { actor, .. } => {
            if actor != coordinator {
                push(coordinator, NotificationKind::ProgressNote);
            }
        }
    }
    out
}

fn subject_for(event: &LifecycleEvent, kind: NotificationKind, request: &OnboardingRequest) -> String {
    let who = &request.new_hire.name;
    match (kind, event) {
        (NotificationKind::Assignment, _) => format!("Onboarding for {who} assigned to you"),
        (NotificationKind::Completion, _) => format!("Onboarding for {who} completed"),
        (NotificationKind::StatusUpdate, LifecycleEvent::StatusChanged { before, after, .. }) => {
            format!("Onboarding for {who} moved from {before} to {after}")
        }
        (NotificationKind::TaskUpdate, _) => format!("Task completed on onboarding for {who}"),
        (NotificationKind::ProgressNote, _) => format!("Update on onboarding for {who}"),
        (NotificationKind::StatusUpdate, _) => format!("Onboarding for {who} updated"),
    }
}

fn excerpt(note: &str) -> String {
    if note.chars().count() <= NOTE_EXCERPT_CHARS {
        return note.to_string();
    }
    let mut cut: String = note.chars().take(NOTE_EXCERPT_CHARS).collect();
    cut.push_str("...");
    cut
}

fn payload_for(event: &LifecycleEvent, ctx: &RequestContext) -> serde_json::Value {
    let request = &ctx.request;
    let (done, total) = request.tasks.progress();
    let mut payload = serde_json::json!({
        "event": event,
        "new_hire": request.new_hire.name,
        "start_date": request.start_date(),
        "due_date": request.due_date,
        "status": event.status().unwrap_or(request.status),
        "coordinator": event.coordinator(),
        "tasks_done": done,
        "tasks_total": total,
    });
    if let (Some(note), Some(obj)) = (&ctx.note, payload.as_object_mut()) {
        obj.insert("note_excerpt".into(), serde_json::Value::String(excerpt(note)));
    }
    payload
}

pub struct NotificationDispatcher {
    store: Arc<dyn Database>,
    transport: Arc<dyn NotificationTransport>,
    hr_recipients: Vec<UserId>,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn Database>,
        transport: Arc<dyn NotificationTransport>,
        config: &NotifyConfig,
    ) -> Self {
        Self {
            store,
            transport,
            hr_recipients: config.hr_recipients.clone(),
        }
    }

    /// Load what the routing rules need. `None` if the request is gone.
    async fn context(&self, event: &LifecycleEvent) -> Result<Option<RequestContext>, DatabaseError> {
        let Some(request) = self.store.get_request(event.request_id()).await? else {
            return Ok(None);
        };
        let department_manager = match self.store.get_department(request.department).await? {
            Some(dept) => dept.manager,
            None => request.coordinator.clone(),
        };
        let note = match event {
            LifecycleEvent::NoteAdded { update_id, .. } => self
                .store
                .load_progress(request.id)
                .await?
                .history()
                .find(|e| e.id == *update_id)
                .and_then(|e| e.note.clone()),
            _ => None,
        };
        Ok(Some(RequestContext {
            request,
            department_manager,
            note,
        }))
    }

    /// Intents for one event, after recipients' settings are applied.
    pub async fn intents_for(
        &self,
        event: &LifecycleEvent,
    ) -> Result<Vec<NotificationIntent>, DatabaseError> {
        let Some(ctx) = self.context(event).await? else {
            debug!(request_id = %event.request_id(), "Event for unknown request, nothing to notify");
            return Ok(Vec::new());
        };

        let payload = payload_for(event, &ctx);
        let mut intents = Vec::new();
        let mut muted = HashSet::new();
        for (recipient, kind) in recipients_for(event, &ctx, &self.hr_recipients) {
            let settings = self.store.get_notification_settings(&recipient).await?;
            if !kind.wanted_by(&settings) {
                muted.insert(recipient.to_string());
                continue;
            }
            intents.push(NotificationIntent::new(
                recipient,
                kind,
                subject_for(event, kind, &ctx.request),
                payload.clone(),
                ctx.request.id,
            ));
        }
        if !muted.is_empty() {
            debug!(event = event.event_type(), ?muted, "Recipients muted by settings");
        }
        Ok(intents)
    }

    /// Route one event and start delivering its intents. Returns the
    /// delivery tasks; callers are free to drop them.
    pub async fn dispatch(&self, event: &LifecycleEvent) -> Vec<JoinHandle<()>> {
        let intents = match self.intents_for(event).await {
            Ok(intents) => intents,
            Err(e) => {
                error!(event = event.event_type(), request_id = %event.request_id(), error = %e, "Failed to route event");
                return Vec::new();
            }
        };

        intents
            .into_iter()
            .map(|intent| {
                let transport = Arc::clone(&self.transport);
                tokio::spawn(async move {
                    match transport.deliver(&intent).await {
                        Ok(()) => debug!(
                            transport = transport.name(),
                            recipient = %intent.recipient,
                            kind = %intent.kind,
                            "Notification delivered"
                        ),
                        Err(e) => warn!(
                            transport = transport.name(),
                            recipient = %intent.recipient,
                            kind = %intent.kind,
                            request_id = %intent.request_id,
                            error = %e,
                            "Notification delivery failed"
                        ),
                    }
                })
            })
            .collect()
    }

    /// Consume a lossless event queue (`LifecycleEngine::subscribe_queue`)
    /// until every sender is gone.
    pub fn spawn(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<LifecycleEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.dispatch(&event).await;
            }
            debug!("Event bus closed, notification dispatcher stopping");
        })
    }
}
