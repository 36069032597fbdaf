//! Request lifecycle — the status machine, the request model and the engine
//! that serializes every mutation.

pub mod engine;
pub mod locks;
pub mod model;
pub mod status;

pub use engine::{LifecycleEngine, retry_on_conflict};
pub use model::{Ack, NewHireInfo, OnboardingRequest, RequestId};
pub use status::RequestStatus;
