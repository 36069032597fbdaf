//! Notifications — event routing, intents, and delivery transports.

pub mod dispatcher;
pub mod intent;
pub mod transport;

pub use dispatcher::{NotificationDispatcher, RequestContext, recipients_for};
pub use intent::{NotificationIntent, NotificationKind};
pub use transport::{
    LogTransport, MemoryTransport, NotificationTransport, OutboxTransport, RetryingTransport,
};
