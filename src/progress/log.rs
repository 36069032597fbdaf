//! ProgressLog — append-only, insertion-ordered record of one request's
//! status changes and notes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directory::UserId;
use crate::error::EngineError;
use crate::lifecycle::{RequestId, RequestStatus};

/// What a log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Created,
    StatusChange,
    Note,
}

/// One immutable history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub id: Uuid,
    pub request_id: RequestId,
    /// 1-based position in the request's log.
    pub seq: u64,
    pub author: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// `None` only for the creation entry.
    pub status_before: Option<RequestStatus>,
    pub status_after: RequestStatus,
    pub at: DateTime<Utc>,
}

impl ProgressUpdate {
    pub fn new(
        request_id: RequestId,
        seq: u64,
        author: UserId,
        status_before: Option<RequestStatus>,
        status_after: RequestStatus,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            seq,
            author,
            note,
            status_before,
            status_after,
            at,
        }
    }

    pub fn kind(&self) -> UpdateKind {
        match self.status_before {
            None => UpdateKind::Created,
            Some(before) if before != self.status_after => UpdateKind::StatusChange,
            Some(_) => UpdateKind::Note,
        }
    }

    pub fn is_status_change(&self) -> bool {
        self.kind() != UpdateKind::Note
    }

    /// Ordering rules against the entry currently at the tail of the log
    /// (`None` for an empty log): next sequence number, not earlier than
    /// the tail, and starting from the status the tail ended in.
    pub fn check_follows(&self, previous: Option<&ProgressUpdate>) -> Result<(), EngineError> {
        let expected_seq = previous.map_or(1, |p| p.seq + 1);
        if self.seq != expected_seq {
            return Err(EngineError::validation(format!(
                "progress entry seq {} out of order (expected {expected_seq})",
                self.seq
            )));
        }
        match previous {
            None if self.status_before.is_some() => Err(EngineError::validation(
                "first progress entry must record request creation",
            )),
            Some(last) if last.request_id != self.request_id => Err(EngineError::validation(
                format!("progress entry for {} follows one for {}", self.request_id, last.request_id),
            )),
            Some(last) if self.at < last.at => Err(EngineError::validation(format!(
                "progress entry at {} predates previous entry at {}",
                self.at, last.at
            ))),
            Some(last) if self.status_before != Some(last.status_after) => {
                Err(EngineError::validation(format!(
                    "progress entry starts from {:?} but log is at {}",
                    self.status_before, last.status_after
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Append-only log for a single request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressLog {
    request_id: RequestId,
    entries: Vec<ProgressUpdate>,
}

impl ProgressLog {
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            entries: Vec::new(),
        }
    }

    /// Rebuild from stored entries, re-checking every append invariant.
    pub fn from_entries(
        request_id: RequestId,
        entries: impl IntoIterator<Item = ProgressUpdate>,
    ) -> Result<Self, EngineError> {
        let mut log = Self::new(request_id);
        for entry in entries {
            log.append(entry)?;
        }
        Ok(log)
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Append an entry. It must belong to this request and satisfy
    /// [`ProgressUpdate::check_follows`] against the current tail.
    pub fn append(&mut self, entry: ProgressUpdate) -> Result<(), EngineError> {
        if entry.request_id != self.request_id {
            return Err(EngineError::validation(format!(
                "progress entry for {} appended to log of {}",
                entry.request_id, self.request_id
            )));
        }
        entry.check_follows(self.entries.last())?;
        self.entries.push(entry);
        Ok(())
    }

    pub fn next_seq(&self) -> u64 {
        self.entries.len() as u64 + 1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&ProgressUpdate> {
        self.entries.last()
    }

    /// Chronological view of the log. The returned iterator is cheap to
    /// clone, so callers can walk it more than once.
    pub fn history(&self) -> History<'_> {
        History {
            entries: &self.entries,
            pos: 0,
        }
    }

    /// Status path recorded by the log, creation first.
    pub fn status_path(&self) -> Vec<RequestStatus> {
        self.history()
            .filter(|e| e.is_status_change())
            .map(|e| e.status_after)
            .collect()
    }
}

/// Lazy, restartable iterator over a log's entries.
#[derive(Debug, Clone)]
pub struct History<'a> {
    entries: &'a [ProgressUpdate],
    pos: usize,
}

impl History<'_> {
    /// Rewind to the first entry.
    pub fn restart(&mut self) {
        self.pos = 0;
    }
}

impl<'a> Iterator for History<'a> {
    type Item = &'a ProgressUpdate;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.get(self.pos)?;
        self.pos += 1;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.entries.len() - self.pos;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for History<'_> {}
