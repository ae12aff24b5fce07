//! Text rendering of upload tasks.
//!
//! A `TaskView` is one row of the upload form: filename, progress bar and
//! status text. Its delete action forwards to the coordinator.

use crate::coordinator::UploadCoordinator;
use crate::error::UploadError;
use crate::model::{TaskId, TaskSnapshot, TaskStatus};

const BAR_WIDTH: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskView {
    pub id: TaskId,
    pub filename: String,
    pub size: u64,
    pub status: TaskStatus,
    pub progress: u8,
    pub error: Option<String>,
}

impl TaskView {
    pub fn from_snapshot(task: &TaskSnapshot) -> Self {
        TaskView {
            id: task.id,
            filename: task.filename.clone(),
            size: task.size,
            status: task.status,
            progress: task.progress,
            error: task.error.clone(),
        }
    }

    /// Apply a progress notification for this row.
    pub fn set_progress(&mut self, percent: u8) {
        self.progress = self.progress.max(percent.min(100));
    }

    pub fn status_text(&self) -> String {
        match (self.status, &self.error) {
            (TaskStatus::Failed, Some(reason)) => format!("Failed: {}", reason),
            (status, _) => status.to_string(),
        }
    }

    /// `photo.jpg (1.50 KB) [==========          ] 50% Uploading`
    pub fn render(&self) -> String {
        format!(
            "{} ({}) {} {}",
            self.filename,
            format_bytes(self.size),
            progress_bar(self.progress),
            self.status_text()
        )
    }

    /// The row's delete button: ask the coordinator to drop the task.
    pub fn delete(&self, coordinator: &UploadCoordinator) -> Result<(), UploadError> {
        coordinator.remove_task(self.id)
    }
}

pub fn progress_bar(percent: u8) -> String {
    let percent = percent.min(100) as usize;
    let filled = percent * BAR_WIDTH / 100;
    format!(
        "[{}{}] {}%",
        "=".repeat(filled),
        " ".repeat(BAR_WIDTH - filled),
        percent
    )
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}
