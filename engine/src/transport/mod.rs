//! Transfer strategies.
//!
//! The coordinator only sequences tasks; moving bytes is delegated to an
//! [`UploadTransport`]. [`HttpTransport`] implements both backend protocols:
//! the direct multipart POST to the album upload endpoint and the legacy
//! flow that first obtains a signed URL per file and then PUTs to it.

mod http;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;

use crate::error::UploadError;
use crate::model::{Endpoint, TaskId, UploadFile};
use crate::task::{ProgressReporter, UploadTask};

pub use http::{HttpTransport, Protocol, FILE_FIELD};

/// Everything a transport needs to send one task's file.
pub struct Transfer {
    pub task_id: TaskId,
    pub file: UploadFile,
    pub endpoint: Endpoint,

    /// Feed byte counts here as the body is written
    pub progress: ProgressReporter,
}

#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Called with the pending tasks before the first transfer of a batch,
    /// and again for tasks that join the batch while it runs.
    ///
    /// Transports that assign destinations per batch (signed URLs) configure
    /// each task's endpoint here. An error aborts the batch.
    async fn prepare_batch(&self, _tasks: &[UploadTask]) -> Result<(), UploadError> {
        Ok(())
    }

    /// Send one file and return the HTTP status of the response.
    ///
    /// Network-level failures are returned as `UploadError::TransferFailed`.
    /// Cancellation is handled by the caller dropping the future.
    async fn send(&self, transfer: Transfer) -> Result<u16, UploadError>;
}
