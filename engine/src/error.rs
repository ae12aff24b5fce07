//! Error types for the upload engine.
//!
//! `UploadError` covers contract violations (sending a task twice), selection
//! filters, batch-level failures and file loading. A failed transfer of a
//! single file is recorded on its task as `TaskStatus::Failed`, not raised
//! across the coordinator.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::TaskId;

#[derive(Debug, Error)]
pub enum UploadError {
    /// `send` was called on a task with a transfer in flight
    #[error("task {id} is already uploading")]
    AlreadyUploading { id: TaskId },

    /// A task with the same filename is already queued
    #[error("a file named {name:?} is already queued")]
    DuplicateFile { name: String },

    /// Network-level failure while talking to the upload endpoint
    #[error("upload of task {id} failed: {reason}")]
    TransferFailed { id: TaskId, reason: String },

    /// The signing request of the legacy protocol failed; nothing was sent
    #[error("failed to obtain signed upload URLs: {reason}")]
    SigningFailed { reason: String },

    #[error("task {id} has no upload endpoint configured")]
    EndpointNotConfigured { id: TaskId },

    /// Removal was requested while the task is uploading
    #[error("task {id} is uploading and cannot be removed")]
    TaskActive { id: TaskId },

    #[error("invalid filename {name:?}: {reason}")]
    InvalidFilename { name: String, reason: String },

    #[error("invalid album URL {url:?}: {reason}")]
    InvalidAlbumUrl { url: String, reason: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl UploadError {
    /// The task this error refers to, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::AlreadyUploading { id }
            | Self::TransferFailed { id, .. }
            | Self::EndpointNotConfigured { id }
            | Self::TaskActive { id } => Some(*id),
            _ => None,
        }
    }

    /// True for errors that stop a whole batch rather than a single file.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, Self::SigningFailed { .. })
    }
}
