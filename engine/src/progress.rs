//! Progress reporting.
//!
//! This module defines the `UploadObserver` trait, which decouples tasks and
//! the coordinator from whatever renders them (terminal rows, a GUI, a log).
//! `ChannelObserver` forwards every notification as an [`UploadEvent`] over a
//! crossbeam channel for consumers living on another thread.

use crossbeam_channel::Sender;

use crate::model::{BatchSummary, TaskId, TaskSnapshot};

/// Receives notifications from tasks and the coordinator.
///
/// Methods are called synchronously from whichever thread drives the
/// transfer, never while engine locks are held, so implementations may query
/// the coordinator.
pub trait UploadObserver: Send + Sync {
    /// A selected file was accepted and wrapped in a task.
    fn on_task_added(&self, task: &TaskSnapshot);

    /// A task's transfer is about to start.
    fn on_task_started(&self, task: &TaskSnapshot);

    /// The progress of the active task increased.
    fn on_task_progress(&self, id: TaskId, percent: u8);

    /// A task reached `Done` or `Failed`.
    fn on_task_finished(&self, task: &TaskSnapshot);

    /// A transfer was cancelled and the task is `Ready` again.
    fn on_task_aborted(&self, task: &TaskSnapshot);

    /// A task was destroyed and its row should disappear.
    fn on_task_removed(&self, id: TaskId);

    /// `submit` started a batch of `pending` tasks.
    fn on_batch_started(&self, pending: usize);

    /// The batch ended (all tasks processed, or aborted).
    fn on_batch_completed(&self, summary: &BatchSummary);
}

/// Owned form of the observer notifications.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    TaskAdded(TaskSnapshot),
    TaskStarted(TaskSnapshot),
    TaskProgress { id: TaskId, percent: u8 },
    TaskFinished(TaskSnapshot),
    TaskAborted(TaskSnapshot),
    TaskRemoved(TaskId),
    BatchStarted { pending: usize },
    BatchCompleted(BatchSummary),
}

/// An `UploadObserver` that sends every notification down a channel.
pub struct ChannelObserver {
    sender: Sender<UploadEvent>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<UploadEvent>) -> Self {
        ChannelObserver { sender }
    }

    fn emit(&self, event: UploadEvent) {
        // A dropped receiver means nobody is watching anymore.
        let _ = self.sender.send(event);
    }
}

impl UploadObserver for ChannelObserver {
    fn on_task_added(&self, task: &TaskSnapshot) {
        self.emit(UploadEvent::TaskAdded(task.clone()));
    }

    fn on_task_started(&self, task: &TaskSnapshot) {
        self.emit(UploadEvent::TaskStarted(task.clone()));
    }

    fn on_task_progress(&self, id: TaskId, percent: u8) {
        self.emit(UploadEvent::TaskProgress { id, percent });
    }

    fn on_task_finished(&self, task: &TaskSnapshot) {
        self.emit(UploadEvent::TaskFinished(task.clone()));
    }

    fn on_task_aborted(&self, task: &TaskSnapshot) {
        self.emit(UploadEvent::TaskAborted(task.clone()));
    }

    fn on_task_removed(&self, id: TaskId) {
        self.emit(UploadEvent::TaskRemoved(id));
    }

    fn on_batch_started(&self, pending: usize) {
        self.emit(UploadEvent::BatchStarted { pending });
    }

    fn on_batch_completed(&self, summary: &BatchSummary) {
        self.emit(UploadEvent::BatchCompleted(summary.clone()));
    }
}
