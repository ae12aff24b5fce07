//! Upload coordination.
//!
//! The coordinator owns the tasks of one album form and sends them one at a
//! time, in the order they were selected:
//! - `on_files_selected` filters and wraps files into tasks
//! - `submit` starts a batch by sending the first pending task
//! - `on_task_finished` drops the finished task from the pending list and
//!   yields the next one
//! - `abort_all` cancels the batch and any in-flight transfer
//!
//! A failed task does not stop the batch. An aborted transfer does: the task
//! goes back to `Ready` and `submit` returns, so a later `submit` picks up
//! where the batch stopped.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::AlbumContext;
use crate::error::UploadError;
use crate::fs_ops;
use crate::model::{BatchSummary, Outcome, SelectionReport, TaskId, TaskSnapshot, TaskStatus, UploadFile};
use crate::progress::UploadObserver;
use crate::task::UploadTask;
use crate::transport::UploadTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Submitting,
}

#[derive(Clone)]
pub struct UploadCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    album: AlbumContext,
    transport: Arc<dyn UploadTransport>,
    observer: Option<Arc<dyn UploadObserver>>,
    finished_tx: Sender<TaskId>,
    finished_rx: Receiver<TaskId>,
    state: Mutex<CoordinatorState>,
}

#[derive(Default)]
struct CoordinatorState {
    /// Every visible task, in selection order
    tasks: Vec<UploadTask>,

    /// Tasks not yet processed by the current or next batch, in submission order
    pending: Vec<TaskId>,

    phase: Phase,

    /// Cancels the running batch, including a transport's batch preparation
    batch: Option<CancellationToken>,
}

impl CoordinatorState {
    fn task(&self, id: TaskId) -> Option<&UploadTask> {
        self.tasks.iter().find(|task| task.id() == id)
    }

    fn first_pending(&self) -> Option<UploadTask> {
        self.pending.first().and_then(|id| self.task(*id)).cloned()
    }

    fn pending_tasks(&self) -> Vec<UploadTask> {
        self.pending
            .iter()
            .filter_map(|id| self.task(*id))
            .cloned()
            .collect()
    }

    fn is_pending_name(&self, name: &str) -> bool {
        self.pending
            .iter()
            .filter_map(|id| self.task(*id))
            .any(|task| task.filename() == name)
    }
}

impl UploadCoordinator {
    /// Create a coordinator for `album`.
    ///
    /// Every task it creates reports to `observer`.
    pub fn new(
        album: AlbumContext,
        transport: Arc<dyn UploadTransport>,
        observer: Option<Arc<dyn UploadObserver>>,
    ) -> Self {
        let (finished_tx, finished_rx) = unbounded();
        UploadCoordinator {
            inner: Arc::new(CoordinatorInner {
                album,
                transport,
                observer,
                finished_tx,
                finished_rx,
                state: Mutex::new(CoordinatorState::default()),
            }),
        }
    }

    pub fn album(&self) -> &AlbumContext {
        &self.inner.album
    }

    /// Wrap newly selected files into tasks.
    ///
    /// Files whose name matches a pending task, and names the backend would
    /// refuse, are dropped and listed in the report. Accepted files get a
    /// task configured for the album's upload endpoint.
    pub fn on_files_selected(&self, files: impl IntoIterator<Item = UploadFile>) -> SelectionReport {
        let mut report = SelectionReport::default();
        let mut added = Vec::new();
        {
            let mut state = self.state();
            for file in files {
                if state.is_pending_name(&file.name) {
                    debug!("{} is already queued; ignoring", file.name);
                    report
                        .rejected
                        .push(UploadError::DuplicateFile { name: file.name });
                    continue;
                }
                if let Err(err) = fs_ops::validate_filename(&file.name) {
                    warn!("{}", err);
                    report.rejected.push(err);
                    continue;
                }

                let task = UploadTask::create_observed(file, self.inner.observer.clone());
                let endpoint = self.inner.album.upload_endpoint();
                task.configure_endpoint(endpoint.url, endpoint.method);
                task.subscribe_finished(self.inner.finished_tx.clone());

                report.accepted.push(task.id());
                state.pending.push(task.id());
                state.tasks.push(task.clone());
                added.push(task);
            }
        }

        for task in &added {
            let snapshot = task.snapshot();
            self.notify(|observer| observer.on_task_added(&snapshot));
        }
        report
    }

    /// Destroy a task and forget it.
    ///
    /// Unknown ids are ignored so repeated delete clicks are harmless.
    ///
    /// # Errors
    /// `TaskActive` while the task is uploading.
    pub fn remove_task(&self, id: TaskId) -> Result<(), UploadError> {
        let removed = {
            let mut state = self.state();
            let Some(index) = state.tasks.iter().position(|task| task.id() == id) else {
                return Ok(());
            };
            if state.tasks[index].is_active() {
                return Err(UploadError::TaskActive { id });
            }
            state.pending.retain(|pending| *pending != id);
            state.tasks.remove(index)
        };
        removed.destroy();
        Ok(())
    }

    /// Send every pending task, one at a time.
    ///
    /// Returns `None` when there was nothing to do: no pending tasks, or a
    /// batch already running. Only the first pending task is started here;
    /// each later one is started once its predecessor finished. Tasks that
    /// join the pending list mid-batch are handed to the transport's
    /// `prepare_batch` before they are sent.
    ///
    /// # Errors
    /// Batch-level failures such as `SigningFailed`. Per-file failures are
    /// counted in the summary instead.
    pub async fn submit(&self) -> Result<Option<BatchSummary>, UploadError> {
        self.drain_finished();
        let (batch, pending) = {
            let mut state = self.state();
            if state.phase == Phase::Submitting {
                debug!("submit ignored: a batch is already running");
                return Ok(None);
            }
            if state.pending.is_empty() {
                return Ok(None);
            }
            let batch = CancellationToken::new();
            state.phase = Phase::Submitting;
            state.batch = Some(batch.clone());
            (batch, state.pending.len())
        };
        let _idle = IdleOnDrop(self);

        info!(
            "uploading {} file(s) to album {}",
            pending,
            self.inner.album.album_id()
        );
        self.notify(|observer| observer.on_batch_started(pending));

        let mut summary = BatchSummary::default();
        let mut prepared = HashSet::new();
        let mut next = self.state().first_pending();
        while let Some(task) = next {
            if !prepared.contains(&task.id()) {
                // Covers files selected or requeued while the batch runs
                let unprepared: Vec<UploadTask> = self
                    .state()
                    .pending_tasks()
                    .into_iter()
                    .filter(|pending| !prepared.contains(&pending.id()))
                    .collect();
                let ready = tokio::select! {
                    biased;
                    _ = batch.cancelled() => None,
                    ready = self.inner.transport.prepare_batch(&unprepared) => Some(ready),
                };
                match ready {
                    None => {
                        summary.aborted = true;
                        break;
                    }
                    Some(Err(err)) => {
                        warn!("upload batch aborted: {}", err);
                        return Err(err);
                    }
                    Some(Ok(())) => prepared.extend(unprepared.iter().map(UploadTask::id)),
                }
            }

            let sent = tokio::select! {
                biased;
                _ = batch.cancelled() => None,
                sent = task.send(self.inner.transport.as_ref()) => Some(sent),
            };
            let outcome = match sent {
                None => {
                    summary.aborted = true;
                    break;
                }
                Some(Ok(outcome)) => outcome,
                Some(Err(err)) => {
                    warn!("stopping batch: {}", err);
                    summary.aborted = true;
                    break;
                }
            };
            summary.record(&outcome);
            if !outcome.is_terminal() {
                break;
            }
            next = self.advance(&outcome);
        }

        info!(
            "upload batch finished: {} done, {} failed{}",
            summary.done,
            summary.failed,
            if summary.aborted { ", aborted" } else { "" }
        );
        self.notify(|observer| observer.on_batch_completed(&summary));
        Ok(Some(summary))
    }

    /// Handle a task's "transfer finished" notification.
    ///
    /// The task leaves the pending list but stays visible in its terminal
    /// state. Returns the next pending task in selection order, if any.
    pub fn on_task_finished(&self, id: TaskId) -> Option<UploadTask> {
        let mut state = self.state();
        state.pending.retain(|pending| *pending != id);
        state.first_pending()
    }

    /// Cancel the running batch and every in-flight transfer.
    ///
    /// Returns the number of transfers cancelled.
    pub fn abort_all(&self) -> usize {
        let (batch, tasks) = {
            let state = self.state();
            (state.batch.clone(), state.tasks.clone())
        };
        if let Some(batch) = batch {
            batch.cancel();
        }
        let aborted = tasks.iter().filter(|task| task.abort()).count();
        info!("abort requested; {} transfer(s) cancelled", aborted);
        aborted
    }

    /// Queue every `Failed` task again, as `Ready`.
    ///
    /// Tasks whose name is already pending stay `Failed`. Returns the number
    /// of tasks requeued; they are sent by the next `submit`.
    pub fn requeue_failed(&self) -> usize {
        let mut state = self.state();
        let failed: Vec<UploadTask> = state
            .tasks
            .iter()
            .filter(|task| task.status() == TaskStatus::Failed)
            .cloned()
            .collect();

        let mut requeued = 0;
        for task in failed {
            if state.is_pending_name(task.filename()) || !task.reset_failed() {
                continue;
            }
            state.pending.push(task.id());
            requeued += 1;
        }
        if requeued > 0 {
            info!("{} failed upload(s) queued again", requeued);
        }
        requeued
    }

    /// Snapshots of every visible task, in selection order.
    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        let tasks = self.state().tasks.clone();
        tasks.iter().map(UploadTask::snapshot).collect()
    }

    pub fn task(&self, id: TaskId) -> Option<UploadTask> {
        self.state().task(id).cloned()
    }

    /// Number of tasks waiting to be sent (including the active one).
    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_submitting(&self) -> bool {
        self.state().phase == Phase::Submitting
    }

    /// Process queued finished notifications and return the next task to
    /// send after `outcome`.
    fn advance(&self, outcome: &Outcome) -> Option<UploadTask> {
        self.drain_finished();
        // A task already Done short-circuits without a notification
        self.on_task_finished(outcome.id())
    }

    fn drain_finished(&self) {
        for id in self.inner.finished_rx.try_iter() {
            self.on_task_finished(id);
        }
    }

    fn state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, f: impl FnOnce(&dyn UploadObserver)) {
        if let Some(observer) = &self.inner.observer {
            f(observer.as_ref());
        }
    }
}

/// Returns the coordinator to `Idle` when `submit` ends or is dropped.
struct IdleOnDrop<'a>(&'a UploadCoordinator);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state();
        state.phase = Phase::Idle;
        state.batch = None;
    }
}
