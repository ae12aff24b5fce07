//! Scripted in-memory transport and recording observer for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{Transfer, UploadTransport};
use crate::error::UploadError;
use crate::model::{BatchSummary, TaskId, TaskSnapshot};
use crate::progress::UploadObserver;
use crate::task::UploadTask;

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Status(u16),
    NetworkError(String),
    /// Never completes; used to observe cancellation.
    Hang,
}

pub(crate) struct ScriptedTransport {
    replies: Mutex<HashMap<String, Reply>>,
    default_reply: Reply,
    sign_error: Option<String>,
    calls: Mutex<Vec<String>>,
    prepared: Mutex<Vec<Vec<String>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    pub(crate) hanging: Notify,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        ScriptedTransport {
            replies: Mutex::new(HashMap::new()),
            default_reply: Reply::Status(200),
            sign_error: None,
            calls: Mutex::new(Vec::new()),
            prepared: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            hanging: Notify::new(),
        }
    }

    pub(crate) fn reply(self, filename: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(filename.to_string(), reply);
        self
    }

    pub(crate) fn failing_signing(mut self, reason: &str) -> Self {
        self.sign_error = Some(reason.to_string());
        self
    }

    pub(crate) fn set_reply(&self, filename: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .insert(filename.to_string(), reply);
    }

    /// Filenames in the order they were sent.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn prepared(&self) -> usize {
        self.prepared.lock().unwrap().len()
    }

    /// Filenames handed to each `prepare_batch` call.
    pub(crate) fn prepared_batches(&self) -> Vec<Vec<String>> {
        self.prepared.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl UploadTransport for ScriptedTransport {
    async fn prepare_batch(&self, tasks: &[UploadTask]) -> Result<(), UploadError> {
        self.prepared
            .lock()
            .unwrap()
            .push(tasks.iter().map(|task| task.filename().to_string()).collect());
        match &self.sign_error {
            Some(reason) => Err(UploadError::SigningFailed {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn send(&self, transfer: Transfer) -> Result<u16, UploadError> {
        self.calls.lock().unwrap().push(transfer.file.name.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(&transfer.file.name)
            .cloned()
            .unwrap_or_else(|| self.default_reply.clone());

        if let Reply::Hang = reply {
            self.hanging.notify_one();
            std::future::pending::<()>().await;
        }

        let total = transfer.file.size();
        for quarter in 1..=4 {
            transfer.progress.report(total * quarter / 4, total);
            tokio::task::yield_now().await;
        }

        match reply {
            Reply::Status(status) => Ok(status),
            Reply::NetworkError(reason) => Err(UploadError::TransferFailed {
                id: transfer.task_id,
                reason,
            }),
            Reply::Hang => unreachable!("hanging transfers never resume"),
        }
    }
}

/// Records observer notifications as short strings, e.g. `started a.jpg`.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    events: Mutex<Vec<String>>,
    progress: Mutex<HashMap<TaskId, Vec<u8>>>,
}

impl RecordingObserver {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn progress_of(&self, id: TaskId) -> Vec<u8> {
        self.progress
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl UploadObserver for RecordingObserver {
    fn on_task_added(&self, task: &TaskSnapshot) {
        self.push(format!("added {}", task.filename));
    }

    fn on_task_started(&self, task: &TaskSnapshot) {
        self.push(format!("started {}", task.filename));
    }

    fn on_task_progress(&self, id: TaskId, percent: u8) {
        self.progress
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .push(percent);
    }

    fn on_task_finished(&self, task: &TaskSnapshot) {
        self.push(format!("{} {}", task.status, task.filename));
    }

    fn on_task_aborted(&self, task: &TaskSnapshot) {
        self.push(format!("aborted {}", task.filename));
    }

    fn on_task_removed(&self, _id: TaskId) {
        self.push("removed".to_string());
    }

    fn on_batch_started(&self, pending: usize) {
        self.push(format!("batch started {}", pending));
    }

    fn on_batch_completed(&self, summary: &BatchSummary) {
        self.push(format!(
            "batch completed {}/{}",
            summary.done,
            summary.sent.len()
        ));
    }
}
