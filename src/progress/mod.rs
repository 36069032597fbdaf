//! Progress log — the append-only history of each request.

pub mod log;

pub use log::{History, ProgressLog, ProgressUpdate, UpdateKind};
