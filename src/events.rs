//! Lifecycle events and the bus they travel on.
//!
//! The engine publishes; the notification dispatcher, the dashboard cache and
//! any audit consumer subscribe. Publishing never blocks. Broadcast
//! subscribers that fall more than `capacity` events behind observe a lag and
//! skip ahead, which suits caches. Queue subscribers see every event.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::trace;
use uuid::Uuid;

use crate::directory::UserId;
use crate::lifecycle::{RequestId, RequestStatus};
use crate::tasks::TaskId;

/// Events emitted by the lifecycle engine after a command commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    RequestCreated {
        request_id: RequestId,
        coordinator: UserId,
        actor: UserId,
        at: DateTime<Utc>,
    },
    StatusChanged {
        request_id: RequestId,
        before: RequestStatus,
        after: RequestStatus,
        /// Coordinator when the change was made.
        coordinator: UserId,
        actor: UserId,
        at: DateTime<Utc>,
    },
    Reassigned {
        request_id: RequestId,
        from: UserId,
        to: UserId,
        at: DateTime<Utc>,
    },
    TaskCompleted {
        request_id: RequestId,
        task_id: TaskId,
        coordinator: UserId,
        actor: UserId,
        at: DateTime<Utc>,
    },
    NoteAdded {
        request_id: RequestId,
        update_id: Uuid,
        coordinator: UserId,
        actor: UserId,
        at: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::RequestCreated { request_id, .. }
            | Self::StatusChanged { request_id, .. }
            | Self::Reassigned { request_id, .. }
            | Self::TaskCompleted { request_id, .. }
            | Self::NoteAdded { request_id, .. } => *request_id,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::RequestCreated { at, .. }
            | Self::StatusChanged { at, .. }
            | Self::Reassigned { at, .. }
            | Self::TaskCompleted { at, .. }
            | Self::NoteAdded { at, .. } => *at,
        }
    }

    /// Coordinator of the request as of this event.
    pub fn coordinator(&self) -> &UserId {
        match self {
            Self::RequestCreated { coordinator, .. }
            | Self::StatusChanged { coordinator, .. }
            | Self::TaskCompleted { coordinator, .. }
            | Self::NoteAdded { coordinator, .. } => coordinator,
            Self::Reassigned { to, .. } => to,
        }
    }

    /// Status the event leaves the request in, when the event fixes it.
    pub fn status(&self) -> Option<RequestStatus> {
        match self {
            Self::RequestCreated { .. } => Some(RequestStatus::Draft),
            Self::StatusChanged { after, .. } => Some(*after),
            _ => None,
        }
    }

    /// Event type name (matches the serde tag).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RequestCreated { .. } => "request_created",
            Self::StatusChanged { .. } => "status_changed",
            Self::Reassigned { .. } => "reassigned",
            Self::TaskCompleted { .. } => "task_completed",
            Self::NoteAdded { .. } => "note_added",
        }
    }
}

type QueueSenders = Arc<Mutex<Vec<mpsc::UnboundedSender<LifecycleEvent>>>>;

/// Publish/subscribe channel for lifecycle events: a bounded broadcast for
/// consumers that tolerate lag, plus unbounded queues for consumers that
/// must see every event.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
    queues: QueueSenders,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            queues: Arc::default(),
        }
    }

    /// Bounded subscription. Falling behind surfaces as `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    /// Lossless subscription: every event published after this call is
    /// queued until the receiver takes it.
    pub fn subscribe_queue(&self) -> mpsc::UnboundedReceiver<LifecycleEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders().push(tx);
        rx
    }

    /// Publish to every current subscriber. Returns how many received it.
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        trace!(event = event.event_type(), request_id = %event.request_id(), "Publishing event");
        let mut delivered = 0;
        self.senders().retain(|q| {
            let open = q.send(event.clone()).is_ok();
            delivered += usize::from(open);
            open
        });
        // No subscribers is fine: events are advisory.
        delivered + self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count() + self.senders().len()
    }

    fn senders(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<LifecycleEvent>>> {
        // Only push and retain touch the list, so a poisoned lock is still usable.
        self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
