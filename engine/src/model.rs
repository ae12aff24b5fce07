//! Core data model for upload tasks.
//!
//! This module defines the values passed between the coordinator, the tasks
//! and the transports:
//! - UploadFile: one selected file and its bytes
//! - TaskId: the opaque identifier of a task
//! - Endpoint and HttpMethod: where a task's bytes are sent
//! - TaskStatus, Outcome: per-task lifecycle and transfer results
//! - TaskSnapshot, SelectionReport, BatchSummary: read-only views for callers

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::UploadError;

/// A file selected for upload.
///
/// The content is held as [`Bytes`] so a transfer can hand it to the HTTP
/// body without copying.
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Filename as presented to the backend (no directory components)
    pub name: String,

    /// MIME type sent alongside the bytes
    pub content_type: String,

    /// Raw file content
    pub data: Bytes,
}

impl UploadFile {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        UploadFile {
            name: name.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    /// Total size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Opaque identifier of an upload task, unique for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        TaskId(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// HTTP method used for a transfer.
///
/// `Post` sends the file as a multipart form (`file` field), `Put` sends the
/// raw bytes as the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
        }
    }
}

/// Destination of a single transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub url: String,
    pub method: HttpMethod,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, method: HttpMethod) -> Self {
        Endpoint {
            url: url.into(),
            method,
        }
    }
}

/// Transfer status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Selected, not transferring
    Ready,
    /// Transfer in flight
    Uploading,
    /// Backend accepted the file
    Done,
    /// Backend rejected the file or the network failed
    Failed,
}

impl TaskStatus {
    /// Returns true for `Done` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Ready => write!(f, "Ready"),
            TaskStatus::Uploading => write!(f, "Uploading"),
            TaskStatus::Done => write!(f, "Done"),
            TaskStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Result of [`UploadTask::send`](crate::task::UploadTask::send).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The file is on the server (or already was)
    Done(TaskId),
    /// The transfer ended in `Failed`
    Failed { id: TaskId, reason: String },
    /// The transfer was cancelled; the task is `Ready` again
    Aborted(TaskId),
}

impl Outcome {
    pub fn id(&self) -> TaskId {
        match self {
            Outcome::Done(id) | Outcome::Aborted(id) => *id,
            Outcome::Failed { id, .. } => *id,
        }
    }

    /// True when the task reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Aborted(_))
    }
}

/// Point-in-time copy of a task, used for rendering and reporting.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub status: TaskStatus,
    pub progress: u8,
    pub endpoint: Option<Endpoint>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// What happened to a file selection.
#[derive(Debug, Default)]
pub struct SelectionReport {
    /// Tasks created, in selection order
    pub accepted: Vec<TaskId>,

    /// Files dropped by the filters (`DuplicateFile` or `InvalidFilename`)
    pub rejected: Vec<UploadError>,
}

impl SelectionReport {
    /// Names dropped because a task with the same name was already queued.
    pub fn duplicates(&self) -> impl Iterator<Item = &str> {
        self.rejected.iter().filter_map(|err| match err {
            UploadError::DuplicateFile { name } => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Counters for one submitted batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    /// Task ids in the order they were sent
    pub sent: Vec<TaskId>,
    pub done: usize,
    pub failed: usize,

    /// True when `abort_all` ended the batch early
    pub aborted: bool,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: &Outcome) {
        self.sent.push(outcome.id());
        match outcome {
            Outcome::Done(_) => self.done += 1,
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Aborted(_) => self.aborted = true,
        }
    }
}
