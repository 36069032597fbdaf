//! Persistence layer — the `Database` trait plus in-memory and libSQL backends.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use memory::MemoryStore;
pub use traits::Database;

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{Days, NaiveDate, Utc};

    use crate::directory::{Department, UserId};
    use crate::lifecycle::{NewHireInfo, OnboardingRequest, RequestId, RequestStatus};
    use crate::progress::ProgressUpdate;
    use crate::tasks::{OnboardingTemplate, TaskSet};

    pub fn sample_department(slug: &str) -> Department {
        Department::new(slug, format!("Dept {slug}"), UserId::new(format!("{slug}-manager")))
    }

    /// A draft request in `dept` with three required tasks and its
    /// creation entry.
    pub fn sample_request(dept: &Department) -> (OnboardingRequest, ProgressUpdate) {
        let template =
            OnboardingTemplate::all_required("Standard", dept.id, ["Laptop", "Badge", "Accounts"]);
        let start = NaiveDate::from_ymd_opt(2030, 3, 4).unwrap();
        let now = Utc::now();
        let coordinator = UserId::new("coord");
        let request = OnboardingRequest {
            id: RequestId::new(),
            new_hire: NewHireInfo::new("Jo Park", start),
            department: dept.id,
            coordinator: coordinator.clone(),
            status: RequestStatus::Draft,
            template: template.id,
            tasks: TaskSet::instantiate(&template),
            due_date: start.checked_add_days(Days::new(5)).unwrap(),
            version: 0,
            progress_entries: 1,
            created_at: now,
            updated_at: now,
        };
        let initial = ProgressUpdate::new(
            request.id,
            1,
            coordinator,
            None,
            RequestStatus::Draft,
            None,
            now,
        );
        (request, initial)
    }
}
