//! DashboardAggregator — read-only projection over all requests.
//!
//! Reads are served from a cached snapshot. The snapshot is recomputed when
//! it is older than `max_staleness` or after `invalidate()`; the background
//! refresher invalidates on every lifecycle event.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::DashboardConfig;
use crate::directory::DepartmentId;
use crate::error::DatabaseError;
use crate::events::LifecycleEvent;
use crate::lifecycle::{OnboardingRequest, RequestId, RequestStatus};
use crate::store::Database;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpcomingStart {
    pub request_id: RequestId,
    pub new_hire: String,
    pub department: DepartmentId,
    pub start_date: NaiveDate,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverdueRequest {
    pub request_id: RequestId,
    pub new_hire: String,
    pub due_date: NaiveDate,
    pub status: RequestStatus,
    pub days_overdue: i64,
}

/// Aggregates computed from one consistent read of the store.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub taken_at: DateTime<Utc>,
    /// Day the overdue list was computed against.
    pub today: NaiveDate,
    /// Every status is present, with zero where nothing matches.
    pub counts_by_status: BTreeMap<RequestStatus, usize>,
    pub counts_by_department: BTreeMap<DepartmentId, usize>,
    /// Non-cancelled requests by start date, then creation time.
    pub starts: Vec<UpcomingStart>,
    pub overdue: Vec<OverdueRequest>,
}

impl DashboardSnapshot {
    pub fn compute(requests: &[OnboardingRequest], today: NaiveDate, taken_at: DateTime<Utc>) -> Self {
        let mut counts_by_status: BTreeMap<RequestStatus, usize> =
            RequestStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let mut counts_by_department = BTreeMap::new();
        let mut starts = Vec::new();
        let mut overdue = Vec::new();

        for r in requests {
            *counts_by_status.entry(r.status).or_default() += 1;
            *counts_by_department.entry(r.department).or_default() += 1;

            if r.status != RequestStatus::Cancelled {
                starts.push(UpcomingStart {
                    request_id: r.id,
                    new_hire: r.new_hire.name.clone(),
                    department: r.department,
                    start_date: r.start_date(),
                    status: r.status,
                    created_at: r.created_at,
                });
            }
            if r.is_overdue(today) {
                overdue.push(OverdueRequest {
                    request_id: r.id,
                    new_hire: r.new_hire.name.clone(),
                    due_date: r.due_date,
                    status: r.status,
                    days_overdue: (today - r.due_date).num_days(),
                });
            }
        }

        starts.sort_by(|a, b| {
            a.start_date
                .cmp(&b.start_date)
                .then(a.created_at.cmp(&b.created_at))
        });
        overdue.sort_by(|a, b| b.days_overdue.cmp(&a.days_overdue));

        Self {
            taken_at,
            today,
            counts_by_status,
            counts_by_department,
            starts,
            overdue,
        }
    }

    /// Starts from `today` through `today + within_days`, inclusive.
    pub fn upcoming_starts(&self, today: NaiveDate, within_days: u32) -> Vec<UpcomingStart> {
        let until = today
            .checked_add_days(Days::new(u64::from(within_days)))
            .unwrap_or(NaiveDate::MAX);
        self.starts
            .iter()
            .filter(|s| s.start_date >= today && s.start_date <= until)
            .cloned()
            .collect()
    }

    pub fn total(&self) -> usize {
        self.counts_by_status.values().sum()
    }
}

struct Cache {
    snapshot: Option<Arc<DashboardSnapshot>>,
    refreshed_at: Option<Instant>,
    /// Bumped by `invalidate()`.
    generation: u64,
    /// Generation the cached snapshot was computed at.
    snapshot_generation: u64,
}

pub struct DashboardAggregator {
    store: Arc<dyn Database>,
    max_staleness: Duration,
    cache: RwLock<Cache>,
}

impl DashboardAggregator {
    pub fn new(store: Arc<dyn Database>, config: &DashboardConfig) -> Self {
        Self {
            store,
            max_staleness: config.max_staleness,
            cache: RwLock::new(Cache {
                snapshot: None,
                refreshed_at: None,
                generation: 0,
                snapshot_generation: 0,
            }),
        }
    }

    /// Upper bound on how old a served snapshot can be, absent invalidation.
    pub fn max_staleness(&self) -> Duration {
        self.max_staleness
    }

    /// Mark the cached snapshot out of date.
    pub async fn invalidate(&self) {
        self.cache.write().await.generation += 1;
    }

    /// Recompute the snapshot now.
    pub async fn refresh(&self) -> Result<Arc<DashboardSnapshot>, DatabaseError> {
        let generation = self.cache.read().await.generation;
        let requests = self.store.list_requests().await?;
        let now = Utc::now();
        let snapshot = Arc::new(DashboardSnapshot::compute(&requests, now.date_naive(), now));

        let mut cache = self.cache.write().await;
        // A newer refresh may have landed while this one was reading.
        if cache.snapshot.is_none() || generation >= cache.snapshot_generation {
            cache.snapshot = Some(Arc::clone(&snapshot));
            cache.refreshed_at = Some(Instant::now());
            cache.snapshot_generation = generation;
        }
        debug!(requests = requests.len(), "Dashboard snapshot refreshed");
        Ok(snapshot)
    }

    /// The cached snapshot, recomputed first if stale or invalidated.
    pub async fn snapshot(&self) -> Result<Arc<DashboardSnapshot>, DatabaseError> {
        {
            let cache = self.cache.read().await;
            if let (Some(snapshot), Some(at)) = (&cache.snapshot, cache.refreshed_at)
                && cache.snapshot_generation == cache.generation
                && at.elapsed() <= self.max_staleness
            {
                return Ok(Arc::clone(snapshot));
            }
        }
        self.refresh().await
    }

    pub async fn counts_by_status(&self) -> Result<BTreeMap<RequestStatus, usize>, DatabaseError> {
        Ok(self.snapshot().await?.counts_by_status.clone())
    }

    pub async fn counts_by_department(
        &self,
    ) -> Result<BTreeMap<DepartmentId, usize>, DatabaseError> {
        Ok(self.snapshot().await?.counts_by_department.clone())
    }

    /// Non-cancelled requests starting within `within_days` of today.
    pub async fn upcoming_starts(&self, within_days: u32) -> Result<Vec<UpcomingStart>, DatabaseError> {
        self.upcoming_starts_from(Utc::now().date_naive(), within_days)
            .await
    }

    pub async fn upcoming_starts_from(
        &self,
        today: NaiveDate,
        within_days: u32,
    ) -> Result<Vec<UpcomingStart>, DatabaseError> {
        Ok(self.snapshot().await?.upcoming_starts(today, within_days))
    }

    pub async fn overdue(&self) -> Result<Vec<OverdueRequest>, DatabaseError> {
        Ok(self.snapshot().await?.overdue.clone())
    }
}

/// Invalidate on every lifecycle event and refresh dirty snapshots every
/// `interval`.
pub fn spawn_refresh_task(
    aggregator: Arc<DashboardAggregator>,
    mut rx: broadcast::Receiver<LifecycleEvent>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
        let mut dirty = true;
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Ok(_) => {
                        aggregator.invalidate().await;
                        dirty = true;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Dashboard refresher lagged");
                        aggregator.invalidate().await;
                        dirty = true;
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = ticker.tick() => {
                    if dirty {
                        match aggregator.refresh().await {
                            Ok(_) => dirty = false,
                            Err(e) => warn!(error = %e, "Dashboard refresh failed"),
                        }
                    }
                }
            }
        }
    })
}
