//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Requests, templates and
//! progress entries are stored as JSON bodies next to the columns queries
//! filter on; departments and settings are plain columns.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::directory::{Department, DepartmentId, NotificationSettings, UserId};
use crate::error::DatabaseError;
use crate::lifecycle::{OnboardingRequest, RequestId};
use crate::progress::{ProgressLog, ProgressUpdate};
use crate::store::migrations;
use crate::store::traits::Database;
use crate::tasks::{OnboardingTemplate, TemplateId};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations. Writes are
/// serialized so a transaction never interleaves with another write on the
/// shared connection.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    writes: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to enable foreign keys: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            writes: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("bad id {s:?}: {e}")))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json<T: DeserializeOwned>(s: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(s).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Classify a failed write: constraint failures keep their own variant.
fn write_err(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("constraint failed") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

fn read_err(op: &str) -> impl FnOnce(libsql::Error) -> DatabaseError + '_ {
    move |e| DatabaseError::Query(format!("{op}: {e}"))
}

/// Map a libsql Row to a Department.
///
/// Column order matches DEPARTMENT_COLUMNS.
fn row_to_department(row: &libsql::Row) -> Result<Department, DatabaseError> {
    let err = |e: libsql::Error| DatabaseError::Query(format!("row_to_department: {e}"));
    let id: String = row.get(0).map_err(err)?;
    let created: String = row.get(7).map_err(err)?;
    Ok(Department {
        id: DepartmentId(parse_uuid(&id)?),
        slug: row.get(1).map_err(err)?,
        name: row.get(2).map_err(err)?,
        manager: UserId::new(row.get::<String>(3).map_err(err)?),
        email: row.get::<String>(4).ok(),
        active: row.get::<i64>(5).map_err(err)? != 0,
        auto_assign_to_manager: row.get::<i64>(6).map_err(err)? != 0,
        created_at: parse_datetime(&created),
    })
}

/// Deserialize the JSON body column of a row.
fn row_body<T: DeserializeOwned>(row: &libsql::Row, idx: i32) -> Result<T, DatabaseError> {
    let body: String = row.get(idx).map_err(read_err("row_body"))?;
    from_json(&body)
}

async fn collect_bodies<T: DeserializeOwned>(
    mut rows: libsql::Rows,
    op: &str,
) -> Result<Vec<T>, DatabaseError> {
    let mut out = Vec::new();
    while let Some(row) = rows.next().await.map_err(read_err(op))? {
        out.push(row_body(&row, 0)?);
    }
    Ok(out)
}

async fn count(conn: &Connection, sql: &str, id: &str) -> Result<i64, DatabaseError> {
    let mut rows = conn.query(sql, params![id]).await.map_err(read_err("count"))?;
    match rows.next().await.map_err(read_err("count"))? {
        Some(row) => row.get::<i64>(0).map_err(read_err("count")),
        None => Ok(0),
    }
}

async fn stored_version(conn: &Connection, id: RequestId) -> Result<Option<u64>, DatabaseError> {
    let mut rows = conn
        .query("SELECT version FROM requests WHERE id = ?1", params![id.to_string()])
        .await
        .map_err(read_err("stored_version"))?;
    match rows.next().await.map_err(read_err("stored_version"))? {
        Some(row) => Ok(Some(row.get::<i64>(0).map_err(read_err("stored_version"))? as u64)),
        None => Ok(None),
    }
}

async fn read_progress(conn: &Connection, id: RequestId) -> Result<ProgressLog, DatabaseError> {
    let rows = conn
        .query(
            "SELECT body FROM progress_updates WHERE request_id = ?1 ORDER BY seq",
            params![id.to_string()],
        )
        .await
        .map_err(read_err("load_progress"))?;
    let entries: Vec<ProgressUpdate> = collect_bodies(rows, "load_progress").await?;
    ProgressLog::from_entries(id, entries)
        .map_err(|e| DatabaseError::Serialization(format!("corrupt progress log for {id}: {e}")))
}

async fn read_progress_tail(
    conn: &Connection,
    id: RequestId,
) -> Result<Option<ProgressUpdate>, DatabaseError> {
    let rows = conn
        .query(
            "SELECT body FROM progress_updates WHERE request_id = ?1 ORDER BY seq DESC LIMIT 1",
            params![id.to_string()],
        )
        .await
        .map_err(read_err("read_progress_tail"))?;
    let tail: Vec<ProgressUpdate> = collect_bodies(rows, "read_progress_tail").await?;
    Ok(tail.into_iter().next())
}

async fn insert_progress(conn: &Connection, update: &ProgressUpdate) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO progress_updates (id, request_id, seq, body, at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            update.id.to_string(),
            update.request_id.to_string(),
            update.seq as i64,
            to_json(update)?,
            update.at.to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| write_err("insert_progress", e))?;
    Ok(())
}

async fn begin(conn: &Connection, op: &str) -> Result<libsql::Transaction, DatabaseError> {
    conn.transaction()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: begin: {e}")))
}

/// Commit on success, roll back otherwise.
async fn finish(
    tx: libsql::Transaction,
    op: &str,
    result: Result<(), DatabaseError>,
) -> Result<(), DatabaseError> {
    match result {
        Ok(()) => tx
            .commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: commit: {e}"))),
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                debug!(op, error = %rb, "Rollback failed");
            }
            Err(e)
        }
    }
}

async fn delete_department_in(conn: &Connection, key: &str) -> Result<(), DatabaseError> {
    let requests = count(conn, "SELECT COUNT(*) FROM requests WHERE department_id = ?1", key).await?;
    let templates = count(conn, "SELECT COUNT(*) FROM templates WHERE department_id = ?1", key).await?;
    if requests > 0 || templates > 0 {
        return Err(DatabaseError::Constraint(format!(
            "department {key} is referenced by {requests} request(s) and {templates} template(s)"
        )));
    }
    let affected = conn
        .execute("DELETE FROM departments WHERE id = ?1", params![key])
        .await
        .map_err(|e| write_err("delete_department", e))?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity: "department".into(),
            id: key.to_string(),
        });
    }
    Ok(())
}

async fn create_request_in(
    conn: &Connection,
    request: &OnboardingRequest,
    initial: &ProgressUpdate,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO requests (id, department_id, status, start_date, version, body, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            request.id.to_string(),
            request.department.to_string(),
            request.status.as_str(),
            request.start_date().to_string(),
            request.version as i64,
            to_json(request)?,
            request.created_at.to_rfc3339(),
            request.updated_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| write_err("create_request", e))?;
    insert_progress(conn, initial).await
}

async fn save_request_in(
    conn: &Connection,
    request: &OnboardingRequest,
    expected_version: u64,
    update: Option<&ProgressUpdate>,
) -> Result<(), DatabaseError> {
    let id = request.id;
    let affected = conn
        .execute(
            "UPDATE requests SET status = ?1, start_date = ?2, version = ?3, body = ?4, updated_at = ?5
             WHERE id = ?6 AND version = ?7",
            params![
                request.status.as_str(),
                request.start_date().to_string(),
                request.version as i64,
                to_json(request)?,
                request.updated_at.to_rfc3339(),
                id.to_string(),
                expected_version as i64,
            ],
        )
        .await
        .map_err(|e| write_err("save_request", e))?;
    if affected == 0 {
        return Err(match stored_version(conn, id).await? {
            Some(found) => DatabaseError::Conflict {
                entity: "request".into(),
                id: id.to_string(),
                expected: expected_version,
                found,
            },
            None => DatabaseError::NotFound {
                entity: "request".into(),
                id: id.to_string(),
            },
        });
    }
    if let Some(update) = update {
        // Same ordering rules as the in-memory log, checked against the tail only.
        let tail = read_progress_tail(conn, id).await?;
        update
            .check_follows(tail.as_ref())
            .map_err(|e| DatabaseError::Constraint(e.to_string()))?;
        insert_progress(conn, update).await?;
    }
    Ok(())
}

// ── Trait implementation ────────────────────────────────────────────

const DEPARTMENT_COLUMNS: &str =
    "id, slug, name, manager, email, active, auto_assign_to_manager, created_at";

#[async_trait]
impl Database for LibSqlBackend {
    // ── Departments ─────────────────────────────────────────────────

    async fn insert_department(&self, dept: &Department) -> Result<(), DatabaseError> {
        let _w = self.writes.lock().await;
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO departments ({DEPARTMENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    dept.id.to_string(),
                    dept.slug.clone(),
                    dept.name.clone(),
                    dept.manager.as_str(),
                    opt_text(dept.email.as_deref()),
                    dept.active as i64,
                    dept.auto_assign_to_manager as i64,
                    dept.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("insert_department", e))?;
        debug!(slug = %dept.slug, "Department inserted");
        Ok(())
    }

    async fn get_department(&self, id: DepartmentId) -> Result<Option<Department>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {DEPARTMENT_COLUMNS} FROM departments WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(read_err("get_department"))?;
        match rows.next().await.map_err(read_err("get_department"))? {
            Some(row) => Ok(Some(row_to_department(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_department_by_slug(&self, slug: &str) -> Result<Option<Department>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {DEPARTMENT_COLUMNS} FROM departments WHERE slug = ?1"),
                params![slug],
            )
            .await
            .map_err(read_err("get_department_by_slug"))?;
        match rows.next().await.map_err(read_err("get_department_by_slug"))? {
            Some(row) => Ok(Some(row_to_department(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_departments(&self) -> Result<Vec<Department>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {DEPARTMENT_COLUMNS} FROM departments ORDER BY slug"),
                (),
            )
            .await
            .map_err(read_err("list_departments"))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(read_err("list_departments"))? {
            out.push(row_to_department(&row)?);
        }
        Ok(out)
    }

    async fn delete_department(&self, id: DepartmentId) -> Result<(), DatabaseError> {
        let _w = self.writes.lock().await;
        let tx = begin(self.conn(), "delete_department").await?;
        let result = delete_department_in(&tx, &id.to_string()).await;
        finish(tx, "delete_department", result).await?;
        debug!(department_id = %id, "Department deleted");
        Ok(())
    }

    // ── Templates ───────────────────────────────────────────────────

    async fn insert_template(&self, template: &OnboardingTemplate) -> Result<(), DatabaseError> {
        let _w = self.writes.lock().await;
        if self.get_department(template.department).await?.is_none() {
            return Err(DatabaseError::Constraint(format!(
                "template department {} does not exist",
                template.department
            )));
        }
        self.conn()
            .execute(
                "INSERT INTO templates (id, department_id, name, body, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    template.id.to_string(),
                    template.department.to_string(),
                    template.name.clone(),
                    to_json(template)?,
                    template.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("insert_template", e))?;
        Ok(())
    }

    async fn get_template(&self, id: TemplateId) -> Result<Option<OnboardingTemplate>, DatabaseError> {
        let rows = self
            .conn()
            .query("SELECT body FROM templates WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(read_err("get_template"))?;
        Ok(collect_bodies(rows, "get_template").await?.into_iter().next())
    }

    async fn list_templates(&self) -> Result<Vec<OnboardingTemplate>, DatabaseError> {
        let rows = self
            .conn()
            .query("SELECT body FROM templates ORDER BY name", ())
            .await
            .map_err(read_err("list_templates"))?;
        collect_bodies(rows, "list_templates").await
    }

    // ── Requests ────────────────────────────────────────────────────

    async fn create_request(
        &self,
        request: &OnboardingRequest,
        initial: &ProgressUpdate,
    ) -> Result<(), DatabaseError> {
        let _w = self.writes.lock().await;
        if self.get_department(request.department).await?.is_none() {
            return Err(DatabaseError::Constraint(format!(
                "request department {} does not exist",
                request.department
            )));
        }
        let tx = begin(self.conn(), "create_request").await?;
        let result = create_request_in(&tx, request, initial).await;
        finish(tx, "create_request", result).await
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<OnboardingRequest>, DatabaseError> {
        let rows = self
            .conn()
            .query("SELECT body FROM requests WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(read_err("get_request"))?;
        Ok(collect_bodies(rows, "get_request").await?.into_iter().next())
    }

    async fn list_requests(&self) -> Result<Vec<OnboardingRequest>, DatabaseError> {
        let rows = self
            .conn()
            .query("SELECT body FROM requests ORDER BY created_at, id", ())
            .await
            .map_err(read_err("list_requests"))?;
        collect_bodies(rows, "list_requests").await
    }

    async fn save_request(
        &self,
        request: &OnboardingRequest,
        expected_version: u64,
        update: Option<&ProgressUpdate>,
    ) -> Result<(), DatabaseError> {
        let _w = self.writes.lock().await;
        let tx = begin(self.conn(), "save_request").await?;
        let result = save_request_in(&tx, request, expected_version, update).await;
        finish(tx, "save_request", result).await
    }

    async fn load_progress(&self, id: RequestId) -> Result<ProgressLog, DatabaseError> {
        if stored_version(self.conn(), id).await?.is_none() {
            return Err(DatabaseError::NotFound {
                entity: "request".into(),
                id: id.to_string(),
            });
        }
        read_progress(self.conn(), id).await
    }

    // ── Notification settings ───────────────────────────────────────

    async fn get_notification_settings(
        &self,
        user: &UserId,
    ) -> Result<NotificationSettings, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT notify_on_assign, notify_on_update FROM notification_settings WHERE user_id = ?1",
                params![user.as_str()],
            )
            .await
            .map_err(read_err("get_notification_settings"))?;
        match rows.next().await.map_err(read_err("get_notification_settings"))? {
            Some(row) => Ok(NotificationSettings {
                notify_on_assign: row.get::<i64>(0).map_err(read_err("get_notification_settings"))? != 0,
                notify_on_update: row.get::<i64>(1).map_err(read_err("get_notification_settings"))? != 0,
            }),
            None => Ok(NotificationSettings::default()),
        }
    }

    async fn put_notification_settings(
        &self,
        user: &UserId,
        settings: &NotificationSettings,
    ) -> Result<(), DatabaseError> {
        let _w = self.writes.lock().await;
        self.conn()
            .execute(
                "INSERT INTO notification_settings (user_id, notify_on_assign, notify_on_update, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                    notify_on_assign = excluded.notify_on_assign,
                    notify_on_update = excluded.notify_on_update,
                    updated_at = excluded.updated_at",
                params![
                    user.as_str(),
                    settings.notify_on_assign as i64,
                    settings.notify_on_update as i64,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("put_notification_settings", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::RequestStatus;
    use crate::store::test_support::{sample_department, sample_request};
    use crate::tasks::OnboardingTemplate;

    async fn backend_with_request() -> (LibSqlBackend, Department, OnboardingRequest) {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let dept = sample_department("it");
        db.insert_department(&dept).await.unwrap();
        let (request, initial) = sample_request(&dept);
        db.create_request(&request, &initial).await.unwrap();
        (db, dept, request)
    }

    #[tokio::test]
    async fn department_round_trip_and_slug_lookup() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let dept = sample_department("it-ops").with_email("it@example.com").with_auto_assign();
        db.insert_department(&dept).await.unwrap();

        let loaded = db.get_department_by_slug("it-ops").await.unwrap().unwrap();
        assert_eq!(loaded.id, dept.id);
        assert_eq!(loaded.email.as_deref(), Some("it@example.com"));
        assert!(loaded.auto_assign_to_manager);

        let err = db.insert_department(&sample_department("it-ops")).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)), "got {err}");
    }

    #[tokio::test]
    async fn save_request_appends_atomically() {
        let (db, _dept, mut request) = backend_with_request().await;

        let update = ProgressUpdate::new(
            request.id,
            2,
            request.coordinator.clone(),
            Some(RequestStatus::Draft),
            RequestStatus::InProgress,
            None,
            request.updated_at,
        );
        request.status = RequestStatus::InProgress;
        request.progress_entries = 2;
        request.touch(request.updated_at);
        db.save_request(&request, 0, Some(&update)).await.unwrap();

        let stored = db.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::InProgress);
        assert_eq!(stored.version, 1);
        let log = db.load_progress(request.id).await.unwrap();
        assert_eq!(log.status_path(), vec![RequestStatus::Draft, RequestStatus::InProgress]);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict_and_writes_nothing() {
        let (db, _dept, mut request) = backend_with_request().await;
        request.touch(request.updated_at);
        db.save_request(&request, 0, None).await.unwrap();

        let note = ProgressUpdate::new(
            request.id,
            2,
            request.coordinator.clone(),
            Some(RequestStatus::Draft),
            RequestStatus::Draft,
            Some("late".into()),
            request.updated_at,
        );
        let err = db.save_request(&request, 0, Some(&note)).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict { found: 1, .. }), "got {err}");
        assert_eq!(db.load_progress(request.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn append_is_checked_against_the_stored_tail() {
        let (db, _dept, mut request) = backend_with_request().await;
        let mut version = 0;
        for seq in 2..=6 {
            let note = ProgressUpdate::new(
                request.id,
                seq,
                request.coordinator.clone(),
                Some(RequestStatus::Draft),
                RequestStatus::Draft,
                Some(format!("note {seq}")),
                request.updated_at,
            );
            request.progress_entries = seq;
            request.touch(request.updated_at);
            db.save_request(&request, version, Some(&note)).await.unwrap();
            version += 1;
        }

        // Reusing a sequence number is refused and rolls back the request update.
        let duplicate = ProgressUpdate::new(
            request.id,
            6,
            request.coordinator.clone(),
            Some(RequestStatus::Draft),
            RequestStatus::Draft,
            None,
            request.updated_at,
        );
        request.touch(request.updated_at);
        let err = db.save_request(&request, version, Some(&duplicate)).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)), "got {err}");
        assert_eq!(db.get_request(request.id).await.unwrap().unwrap().version, version);

        // A chain break against the tail is refused as well.
        let wrong_start = ProgressUpdate::new(
            request.id,
            7,
            request.coordinator.clone(),
            Some(RequestStatus::Blocked),
            RequestStatus::InProgress,
            None,
            request.updated_at,
        );
        let err = db.save_request(&request, version, Some(&wrong_start)).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)), "got {err}");

        let log = db.load_progress(request.id).await.unwrap();
        assert_eq!(log.len(), 6);
        assert_eq!(log.last().map(|e| e.seq), Some(6));
    }

    #[tokio::test]
    async fn referenced_department_cannot_be_deleted() {
        let (db, dept, _request) = backend_with_request().await;
        let err = db.delete_department(dept.id).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)), "got {err}");

        let unused = sample_department("finance");
        db.insert_department(&unused).await.unwrap();
        db.delete_department(unused.id).await.unwrap();
        assert!(db.get_department(unused.id).await.unwrap().is_none());

        let err = db.delete_department(unused.id).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn templates_and_settings_persist() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let dept = sample_department("hr");
        db.insert_department(&dept).await.unwrap();
        let template = OnboardingTemplate::all_required("Standard", dept.id, ["Laptop", "Badge"]);
        db.insert_template(&template).await.unwrap();

        let loaded = db.get_template(template.id).await.unwrap().unwrap();
        assert_eq!(loaded.items.len(), 2);
        assert_eq!(db.list_templates().await.unwrap().len(), 1);

        let user = UserId::new("ana");
        let quiet = NotificationSettings {
            notify_on_assign: false,
            notify_on_update: true,
        };
        db.put_notification_settings(&user, &quiet).await.unwrap();
        assert_eq!(db.get_notification_settings(&user).await.unwrap(), quiet);
    }

    #[tokio::test]
    async fn local_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("onboard.db");
        let dept = sample_department("it");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.insert_department(&dept).await.unwrap();
        }
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert_eq!(db.list_departments().await.unwrap().len(), 1);
    }
}
