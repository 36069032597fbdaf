//! HR Onboard — onboarding request lifecycle engine.

pub mod config;
pub mod console;
pub mod dashboard;
pub mod directory;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod notify;
pub mod progress;
pub mod seed;
pub mod store;
pub mod tasks;
