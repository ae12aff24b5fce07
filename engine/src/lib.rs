//! # Upload Engine - Sequential Album Uploads
//!
//! A headless engine that uploads photos to an album, one file at a time.
//! Designed as the foundation for multiple front ends (CLI, GUI, automation).
//!
//! ## Overview
//!
//! The engine provides:
//! - Per-file upload tasks with progress tracking and cancellation
//! - A coordinator that sends tasks strictly in selection order, never two at once
//! - Failure isolation: one rejected file does not stop the batch
//! - Two backend protocols behind one transport trait (direct multipart POST,
//!   legacy signed-URL PUT)
//! - Progress reporting via an observer trait (decoupled from UI technology)
//!
//! ## Basic Usage
//!
//! ```no_run
//! use upload_engine::{fs_ops, AlbumContext, Protocol, UploadConfig};
//! use std::path::PathBuf;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let album = AlbumContext::from_page_url("https://photos.example/album/abc123")?;
//! let coordinator = UploadConfig::new(album, Protocol::Direct).coordinator(None);
//!
//! // Select files (duplicates and invalid names are dropped)
//! let files = fs_ops::collect_files(&[PathBuf::from("holiday/")])?;
//! let report = coordinator.on_files_selected(files);
//! println!("queued {} files", report.accepted.len());
//!
//! // Send them one by one
//! if let Some(summary) = coordinator.submit().await? {
//!     println!("{} done, {} failed", summary.done, summary.failed);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (UploadFile, TaskId, TaskStatus, snapshots)
//! - **error**: Error types and handling
//! - **task**: One file's upload lifecycle
//! - **coordinator**: Sequencing of a batch of tasks
//! - **transport**: Transfer strategies (HTTP protocols)
//! - **progress**: Observer trait and channel-backed observer
//! - **config**: Album resolution and transport selection
//! - **fs_ops**: Loading and validating files from disk
//! - **view**: Text rendering of task rows

pub mod config;
pub mod coordinator;
pub mod error;
pub mod fs_ops;
pub mod model;
pub mod progress;
pub mod task;
pub mod transport;
pub mod view;

// Re-export main types
pub use config::{AlbumContext, UploadConfig};
pub use coordinator::UploadCoordinator;
pub use error::UploadError;
pub use model::{
    BatchSummary, Endpoint, HttpMethod, Outcome, SelectionReport, TaskId, TaskSnapshot,
    TaskStatus, UploadFile,
};
pub use progress::{ChannelObserver, UploadEvent, UploadObserver};
pub use task::{ProgressReporter, UploadTask};
pub use transport::{HttpTransport, Protocol, Transfer, UploadTransport};
pub use view::TaskView;
