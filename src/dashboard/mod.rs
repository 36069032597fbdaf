//! Dashboard — cached aggregates for HR overview screens.

pub mod aggregator;

pub use aggregator::{
    DashboardAggregator, DashboardSnapshot, OverdueRequest, UpcomingStart, spawn_refresh_task,
};
