//! Upload tasks.
//!
//! An [`UploadTask`] wraps one selected file and owns its transfer lifecycle:
//! `Ready → Uploading → Done | Failed`. The handle is cheap to clone; all
//! clones share the same state so a transfer can be aborted while `send` is
//! awaiting it.
//!
//! Completion is published in two ways: observers receive `on_task_finished`,
//! and the single subscriber registered with [`UploadTask::subscribe_finished`]
//! (the coordinator) receives the task id on a channel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::error::UploadError;
use crate::model::{Endpoint, HttpMethod, Outcome, TaskId, TaskSnapshot, TaskStatus, UploadFile};
use crate::progress::UploadObserver;
use crate::transport::{Transfer, UploadTransport};

/// Status codes the backend answers with on success.
const SUCCESS_STATUSES: [u16; 2] = [200, 204];

#[derive(Clone)]
pub struct UploadTask {
    inner: Arc<TaskInner>,
}

struct TaskInner {
    id: TaskId,
    file: UploadFile,
    created_at: DateTime<Utc>,
    observer: Option<Arc<dyn UploadObserver>>,
    state: Mutex<TaskState>,
}

struct TaskState {
    status: TaskStatus,
    progress: u8,
    endpoint: Option<Endpoint>,
    error: Option<String>,
    finished_at: Option<DateTime<Utc>>,

    /// Present iff `status == Uploading`
    active: Option<CancellationToken>,

    /// Bumped on every transfer so stale completions and progress are ignored
    attempt: u64,

    on_finished: Option<Sender<TaskId>>,
}

impl UploadTask {
    /// Wrap a file in a new `Ready` task.
    pub fn create(file: UploadFile) -> Self {
        Self::create_observed(file, None)
    }

    /// Wrap a file in a new `Ready` task that reports to `observer`.
    pub fn create_observed(file: UploadFile, observer: Option<Arc<dyn UploadObserver>>) -> Self {
        UploadTask {
            inner: Arc::new(TaskInner {
                id: TaskId::new(),
                file,
                created_at: Utc::now(),
                observer,
                state: Mutex::new(TaskState {
                    status: TaskStatus::Ready,
                    progress: 0,
                    endpoint: None,
                    error: None,
                    finished_at: None,
                    active: None,
                    attempt: 0,
                    on_finished: None,
                }),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn file(&self) -> &UploadFile {
        &self.inner.file
    }

    pub fn filename(&self) -> &str {
        &self.inner.file.name
    }

    pub fn status(&self) -> TaskStatus {
        self.state().status
    }

    pub fn progress(&self) -> u8 {
        self.state().progress
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.state().endpoint.clone()
    }

    /// True while a transfer is in flight.
    pub fn is_active(&self) -> bool {
        self.state().status == TaskStatus::Uploading
    }

    /// Set the destination. Must happen before [`send`](Self::send).
    pub fn configure_endpoint(&self, url: impl Into<String>, method: HttpMethod) {
        let endpoint = Endpoint::new(url, method);
        debug!(
            "task {} ({}) will upload via {} {}",
            self.id(),
            self.filename(),
            endpoint.method,
            endpoint.url
        );
        self.state().endpoint = Some(endpoint);
    }

    /// Register the receiver of this task's "transfer finished" notification.
    ///
    /// There is a single subscriber; a second call replaces the first.
    pub fn subscribe_finished(&self, sender: Sender<TaskId>) {
        self.state().on_finished = Some(sender);
    }

    /// Transfer the file through `transport`.
    ///
    /// A `Done` task resolves immediately without touching the network.
    /// Success (200 or 204) and failure both publish the finished
    /// notification; an aborted transfer publishes nothing and leaves the
    /// task `Ready`.
    ///
    /// # Errors
    /// `AlreadyUploading` if a transfer is in flight, `EndpointNotConfigured`
    /// if no destination was set. Transfer failures are not errors; they are
    /// returned as `Outcome::Failed`.
    pub async fn send(&self, transport: &dyn UploadTransport) -> Result<Outcome, UploadError> {
        let (endpoint, token, attempt) = {
            let mut state = self.state();
            match state.status {
                TaskStatus::Uploading => {
                    return Err(UploadError::AlreadyUploading { id: self.id() });
                }
                TaskStatus::Done => return Ok(Outcome::Done(self.id())),
                TaskStatus::Ready | TaskStatus::Failed => {}
            }
            let endpoint = state
                .endpoint
                .clone()
                .ok_or(UploadError::EndpointNotConfigured { id: self.id() })?;

            let token = CancellationToken::new();
            state.attempt += 1;
            state.status = TaskStatus::Uploading;
            state.progress = 0;
            state.error = None;
            state.finished_at = None;
            state.active = Some(token.clone());
            (endpoint, token, state.attempt)
        };

        info!(
            "uploading {} ({} bytes) to {}",
            self.filename(),
            self.inner.file.size(),
            endpoint.url
        );
        let started = self.snapshot();
        self.notify(|observer| observer.on_task_started(&started));

        let transfer = Transfer {
            task_id: self.id(),
            file: self.inner.file.clone(),
            endpoint,
            progress: ProgressReporter {
                task: self.clone(),
                attempt,
            },
        };

        let guard = ReleaseOnDrop {
            task: self,
            attempt: Some(attempt),
        };
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = transport.send(transfer) => Some(result),
        };
        guard.defuse();

        Ok(self.complete(attempt, result))
    }

    /// Cancel the in-flight transfer, if any.
    ///
    /// Returns true when a transfer was cancelled. The task goes back to
    /// `Ready` with progress 0.
    pub fn abort(&self) -> bool {
        self.release(None)
    }

    /// Abort any transfer and tell observers the task's row is gone.
    pub fn destroy(&self) {
        self.abort();
        debug!("task {} ({}) destroyed", self.id(), self.filename());
        self.notify(|observer| observer.on_task_removed(self.id()));
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.state();
        TaskSnapshot {
            id: self.inner.id,
            filename: self.inner.file.name.clone(),
            content_type: self.inner.file.content_type.clone(),
            size: self.inner.file.size(),
            status: state.status,
            progress: state.progress,
            endpoint: state.endpoint.clone(),
            error: state.error.clone(),
            created_at: self.inner.created_at,
            finished_at: state.finished_at,
        }
    }

    /// Put a `Failed` task back to `Ready` so it can be sent again.
    pub(crate) fn reset_failed(&self) -> bool {
        let mut state = self.state();
        if state.status != TaskStatus::Failed {
            return false;
        }
        state.status = TaskStatus::Ready;
        state.progress = 0;
        state.error = None;
        state.finished_at = None;
        true
    }

    fn state(&self) -> MutexGuard<'_, TaskState> {
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

    /// Cancel the transfer `attempt` (or whichever is active when `None`).
    fn release(&self, attempt: Option<u64>) -> bool {
        let token = {
            let mut state = self.state();
            if attempt.is_some_and(|attempt| attempt != state.attempt) {
                return false;
            }
            let token = state.active.take();
            if token.is_some() {
                state.status = TaskStatus::Ready;
                state.progress = 0;
            }
            token
        };

        match token {
            Some(token) => {
                token.cancel();
                info!("upload of {} aborted", self.filename());
                let snapshot = self.snapshot();
                self.notify(|observer| observer.on_task_aborted(&snapshot));
                true
            }
            None => false,
        }
    }

    fn advance_progress(&self, attempt: u64, percent: u8) {
        {
            let mut state = self.state();
            if state.attempt != attempt
                || state.status != TaskStatus::Uploading
                || percent <= state.progress
            {
                return;
            }
            state.progress = percent;
        }
        self.notify(|observer| observer.on_task_progress(self.id(), percent));
    }

    fn complete(&self, attempt: u64, result: Option<Result<u16, UploadError>>) -> Outcome {
        let id = self.id();
        let (outcome, subscriber) = {
            let mut state = self.state();
            // abort() already moved the task back to Ready
            if state.attempt != attempt || state.status != TaskStatus::Uploading {
                return Outcome::Aborted(id);
            }
            state.active = None;

            let outcome = match result {
                None => {
                    state.status = TaskStatus::Ready;
                    state.progress = 0;
                    return Outcome::Aborted(id);
                }
                Some(Ok(status)) if SUCCESS_STATUSES.contains(&status) => {
                    state.status = TaskStatus::Done;
                    state.progress = 100;
                    Outcome::Done(id)
                }
                Some(Ok(status)) => Outcome::Failed {
                    id,
                    reason: format!("server responded with status {}", status),
                },
                Some(Err(err)) => Outcome::Failed {
                    id,
                    reason: err.to_string(),
                },
            };
            if let Outcome::Failed { reason, .. } = &outcome {
                state.status = TaskStatus::Failed;
                state.error = Some(reason.clone());
            }
            state.finished_at = Some(Utc::now());
            (outcome, state.on_finished.clone())
        };

        match &outcome {
            Outcome::Failed { reason, .. } => warn!("upload of {} failed: {}", self.filename(), reason),
            _ => info!("upload of {} done", self.filename()),
        }
        let finished = self.snapshot();
        self.notify(|observer| observer.on_task_finished(&finished));
        if let Some(subscriber) = subscriber {
            // The coordinator may be gone; the task's own state is authoritative.
            let _ = subscriber.send(id);
        }
        outcome
    }
}

impl std::fmt::Debug for UploadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadTask")
            .field("id", &self.inner.id)
            .field("filename", &self.inner.file.name)
            .field("status", &self.status())
            .finish()
    }
}

/// Handed to transports inside a [`Transfer`] to report bytes written.
#[derive(Clone)]
pub struct ProgressReporter {
    task: UploadTask,
    attempt: u64,
}

impl ProgressReporter {
    /// Record that `sent` of `total` bytes have been written.
    ///
    /// Progress is `round(sent / total * 100)` and never decreases; unknown
    /// totals (zero) are ignored.
    pub fn report(&self, sent: u64, total: u64) {
        if total == 0 {
            return;
        }
        let percent = ((sent as f64 / total as f64) * 100.0).round().min(100.0) as u8;
        self.task.advance_progress(self.attempt, percent);
    }
}

/// Returns the task to `Ready` if `send` is dropped mid-transfer.
struct ReleaseOnDrop<'a> {
    task: &'a UploadTask,
    attempt: Option<u64>,
}

impl ReleaseOnDrop<'_> {
    fn defuse(mut self) {
        self.attempt = None;
    }
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            self.task.release(Some(attempt));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{RecordingObserver, Reply, ScriptedTransport};
    use crossbeam_channel::unbounded;

    fn photo(name: &str) -> UploadFile {
        UploadFile::new(name, "image/jpeg", vec![7u8; 4096])
    }

    fn ready_task(name: &str) -> UploadTask {
        let task = UploadTask::create(photo(name));
        task.configure_endpoint("http://localhost/api/albums/1/album/upload", HttpMethod::Post);
        task
    }

    #[test]
    fn test_create_starts_ready() {
        let task = UploadTask::create(photo("a.jpg"));
        assert_eq!(task.status(), TaskStatus::Ready);
        assert_eq!(task.progress(), 0);
        assert!(task.endpoint().is_none());
        assert!(!task.is_active());
    }

    #[tokio::test]
    async fn test_send_success_marks_done_and_notifies() {
        let transport = ScriptedTransport::new().reply("a.jpg", Reply::Status(204));
        let task = ready_task("a.jpg");
        let (tx, rx) = unbounded();
        task.subscribe_finished(tx);

        let outcome = task.send(&transport).await.unwrap();

        assert_eq!(outcome, Outcome::Done(task.id()));
        assert_eq!(task.status(), TaskStatus::Done);
        assert_eq!(task.progress(), 100);
        assert!(!task.is_active());
        assert_eq!(rx.try_recv().unwrap(), task.id());
    }

    #[tokio::test]
    async fn test_send_non_success_status_fails_and_notifies() {
        let transport = ScriptedTransport::new().reply("a.jpg", Reply::Status(201));
        let task = ready_task("a.jpg");
        let (tx, rx) = unbounded();
        task.subscribe_finished(tx);

        let outcome = task.send(&transport).await.unwrap();

        assert!(matches!(outcome, Outcome::Failed { id, .. } if id == task.id()));
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(
            task.snapshot().error.as_deref(),
            Some("server responded with status 201")
        );
        assert_eq!(rx.try_recv().unwrap(), task.id());
    }

    #[tokio::test]
    async fn test_send_network_error_fails() {
        let transport = ScriptedTransport::new()
            .reply("a.jpg", Reply::NetworkError("connection reset".to_string()));
        let task = ready_task("a.jpg");

        let outcome = task.send(&transport).await.unwrap();

        assert!(matches!(outcome, Outcome::Failed { ref reason, .. } if reason.contains("connection reset")));
        assert_eq!(task.status(), TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_send_on_done_task_does_not_transfer_again() {
        let transport = ScriptedTransport::new();
        let task = ready_task("a.jpg");
        task.send(&transport).await.unwrap();
        assert_eq!(transport.calls().len(), 1);

        let outcome = task.send(&transport).await.unwrap();

        assert_eq!(outcome, Outcome::Done(task.id()));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_send_without_endpoint_is_rejected() {
        let transport = ScriptedTransport::new();
        let task = UploadTask::create(photo("a.jpg"));

        let err = task.send(&transport).await.unwrap_err();

        assert!(matches!(err, UploadError::EndpointNotConfigured { .. }));
        assert_eq!(task.status(), TaskStatus::Ready);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_send_while_uploading_is_rejected() {
        let transport = ScriptedTransport::new().reply("a.jpg", Reply::Hang);
        let task = ready_task("a.jpg");

        let first = task.send(&transport);
        let second = async {
            transport.hanging.notified().await;
            let err = task.send(&transport).await.unwrap_err();
            task.abort();
            err
        };
        let (first, err) = tokio::join!(first, second);

        assert!(matches!(err, UploadError::AlreadyUploading { id } if id == task.id()));
        assert_eq!(first.unwrap(), Outcome::Aborted(task.id()));
    }

    #[tokio::test]
    async fn test_abort_returns_task_to_ready_without_finished_notification() {
        let transport = ScriptedTransport::new().reply("a.jpg", Reply::Hang);
        let task = ready_task("a.jpg");
        let (tx, rx) = unbounded();
        task.subscribe_finished(tx);

        let (outcome, aborted) = tokio::join!(task.send(&transport), async {
            transport.hanging.notified().await;
            assert!(task.is_active());
            task.abort()
        });

        assert!(aborted);
        assert_eq!(outcome.unwrap(), Outcome::Aborted(task.id()));
        assert_eq!(task.status(), TaskStatus::Ready);
        assert_eq!(task.progress(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_abort_without_transfer_is_a_no_op() {
        let task = ready_task("a.jpg");
        assert!(!task.abort());
        assert_eq!(task.status(), TaskStatus::Ready);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_ends_at_100() {
        let observer = RecordingObserver::new();
        let transport = ScriptedTransport::new();
        let task = UploadTask::create_observed(photo("a.jpg"), Some(observer.clone()));
        task.configure_endpoint("http://localhost/upload", HttpMethod::Put);

        task.send(&transport).await.unwrap();

        let progress = observer.progress_of(task.id());
        assert_eq!(progress, vec![25, 50, 75, 100]);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_progress_from_an_aborted_attempt_is_ignored() {
        let observer = RecordingObserver::new();
        let transport = ScriptedTransport::new().reply("a.jpg", Reply::Hang);
        let task = UploadTask::create_observed(photo("a.jpg"), Some(observer.clone()));
        task.configure_endpoint("http://localhost/upload", HttpMethod::Put);

        let (outcome, stale) = tokio::join!(task.send(&transport), async {
            transport.hanging.notified().await;
            let stale = ProgressReporter {
                task: task.clone(),
                attempt: task.state().attempt,
            };
            task.abort();
            stale
        });
        assert_eq!(outcome.unwrap(), Outcome::Aborted(task.id()));

        stale.report(50, 100);
        assert_eq!(task.progress(), 0);

        let (outcome, _) = tokio::join!(task.send(&transport), async {
            transport.hanging.notified().await;
            stale.report(100, 100);
            assert_eq!(task.status(), TaskStatus::Uploading);
            assert_eq!(task.progress(), 0);
            task.abort();
        });
        assert_eq!(outcome.unwrap(), Outcome::Aborted(task.id()));

        assert!(observer.progress_of(task.id()).is_empty());
    }

    #[tokio::test]
    async fn test_failed_task_can_be_reset_and_resent() {
        let transport = ScriptedTransport::new().reply("a.jpg", Reply::Status(500));
        let task = ready_task("a.jpg");
        task.send(&transport).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Failed);

        assert!(task.reset_failed());
        assert_eq!(task.status(), TaskStatus::Ready);
        transport.set_reply("a.jpg", Reply::Status(200));

        let outcome = task.send(&transport).await.unwrap();
        assert_eq!(outcome, Outcome::Done(task.id()));
        assert_eq!(transport.calls(), vec!["a.jpg", "a.jpg"]);
    }

    #[tokio::test]
    async fn test_destroy_aborts_and_removes_view() {
        let observer = RecordingObserver::new();
        let transport = ScriptedTransport::new().reply("a.jpg", Reply::Hang);
        let task = UploadTask::create_observed(photo("a.jpg"), Some(observer.clone()));
        task.configure_endpoint("http://localhost/upload", HttpMethod::Put);

        let (outcome, _) = tokio::join!(task.send(&transport), async {
            transport.hanging.notified().await;
            task.destroy();
        });

        assert_eq!(outcome.unwrap(), Outcome::Aborted(task.id()));
        assert_eq!(
            observer.events(),
            vec!["started a.jpg", "aborted a.jpg", "removed"]
        );
    }
}
