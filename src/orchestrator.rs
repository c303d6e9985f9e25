use std::{path::Path, sync::Arc};

use serde::Serialize;
use uuid::Uuid;

use crate::client::{ArtifactKind, HttpTranscriptionClient, ProgressFn, TranscriptionClient};
use crate::config::ClientConfig;
use crate::error::{err, ClientError, ErrorKind};
use crate::hasher;
use crate::poller::PollingScheduler;
use crate::status;
use crate::store::{Promotion, TaskStore};
use crate::task::{LifecycleState, Task};
use crate::trace::{self, Span};

/// User-visible event handed to the embedding application's notification
/// sink.
#[derive(Debug, Clone, Serialize)]
pub struct TaskNotice {
    pub task_id: String,
    pub kind: String, // duplicate|completed|failed
    pub message: String,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: TaskNotice);
}

/// Discards every notice. Used when the embedder has no notification sink.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _notice: TaskNotice) {}
}

/// Terminal result of one submission call.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// The backend had already processed this content; the transcript fetch
    /// is running in the background.
    Completed { fingerprint: String },
    /// Accepted by the backend; polling is active.
    Processing { fingerprint: String },
    /// The content matches an existing task; no second task, no second
    /// upload.
    Duplicate { existing_id: String },
    /// The task was deleted while submission was in flight.
    Cancelled { task_id: String },
    /// Hashing or upload failed; the task is in the `failed` state.
    Failed { task_id: String, error: ClientError },
}

/// Drives the task lifecycle: hash, dedupe, upload, poll, resolve. Holds the
/// store, the backend client, the poll timers, and the notice sink; clones
/// share all of them.
#[derive(Clone)]
pub struct TaskOrchestrator {
    store: TaskStore,
    client: Arc<dyn TranscriptionClient>,
    poller: PollingScheduler,
    notifier: Arc<dyn Notifier>,
}

impl TaskOrchestrator {
    /// Restores the task snapshot and resumes polling for every restored
    /// task that still has a backend job to watch. Must be called within a
    /// Tokio runtime.
    pub fn open(cfg: &ClientConfig) -> Self {
        Self::open_with_notifier(cfg, Arc::new(NullNotifier))
    }

    pub fn open_with_notifier(cfg: &ClientConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_components(
            TaskStore::open(&cfg.data_dir),
            Arc::new(HttpTranscriptionClient::new(cfg.base_url.clone())),
            PollingScheduler::new(cfg.poll_interval()),
            notifier,
        )
    }

    fn with_components(
        store: TaskStore,
        client: Arc<dyn TranscriptionClient>,
        poller: PollingScheduler,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let this = Self {
            store,
            client,
            poller,
            notifier,
        };
        this.resume_polling();
        this
    }

    /// Ordered task snapshot, newest first.
    pub fn tasks(&self) -> Vec<Task> {
        self.store.tasks()
    }

    /// Runs the submission protocol for one selected file. Every failure is
    /// scoped to this task; the returned outcome mirrors its final state.
    pub async fn submit(&self, path: &Path) -> SubmitOutcome {
        let temp_id = format!("temp-{}", Uuid::new_v4());
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let data_dir = self.store.data_dir().to_path_buf();

        self.store.create(&temp_id, &display_name, path);

        let span = Span::start(
            &data_dir,
            Some(&temp_id),
            "Submit",
            "HASH.compute",
            Some(serde_json::json!({ "name": display_name })),
        );
        let fingerprint = match hasher::compute_fingerprint(path).await {
            Ok(v) => {
                span.ok(Some(serde_json::json!({ "fingerprint": v })));
                v
            }
            Err(e) => {
                span.err(e.kind.as_str(), &e.code, &e.message, None);
                self.fail_task(&temp_id, &display_name, &e);
                return SubmitOutcome::Failed {
                    task_id: temp_id,
                    error: e,
                };
            }
        };

        match self.store.promote(&temp_id, &fingerprint) {
            Promotion::Promoted => {}
            Promotion::Duplicate { existing_id } => {
                self.store.remove(&temp_id);
                trace::event(
                    &data_dir,
                    Some(&existing_id),
                    "Submit",
                    "DEDUPE.hit",
                    "ok",
                    Some(serde_json::json!({ "fingerprint": fingerprint })),
                );
                self.notify(
                    &existing_id,
                    "duplicate",
                    format!("{display_name} is already tracked"),
                );
                return SubmitOutcome::Duplicate { existing_id };
            }
            Promotion::Missing => {
                trace::event(
                    &data_dir,
                    Some(&temp_id),
                    "Submit",
                    "SUBMIT.abandoned",
                    "ok",
                    None,
                );
                return SubmitOutcome::Cancelled { task_id: temp_id };
            }
        }

        let span = Span::start(&data_dir, Some(&fingerprint), "Submit", "UPLOAD.send", None);
        let progress_store = self.store.clone();
        let progress_fp = fingerprint.clone();
        let on_progress: ProgressFn = Arc::new(move |percent| {
            progress_store.set_progress(&progress_fp, percent.min(100));
        });
        let ack = match self.client.upload(path, &fingerprint, on_progress).await {
            Ok(v) => {
                span.ok(Some(serde_json::json!({
                    "completed": v.status.is_completed(),
                    "task_id": v.task_id.as_deref(),
                })));
                v
            }
            Err(e) => {
                span.err(e.kind.as_str(), &e.code, &e.message, None);
                self.fail_task(&fingerprint, &display_name, &e);
                return SubmitOutcome::Failed {
                    task_id: fingerprint,
                    error: e,
                };
            }
        };

        if ack.status.is_completed() {
            match self
                .store
                .advance(&fingerprint, LifecycleState::Succeeded, 100)
            {
                Some(_) => {
                    self.notify(
                        &fingerprint,
                        "completed",
                        format!("{display_name}: transcription completed"),
                    );
                    self.spawn_fetch_result(&fingerprint);
                    SubmitOutcome::Completed { fingerprint }
                }
                None => SubmitOutcome::Cancelled {
                    task_id: fingerprint,
                },
            }
        } else {
            match self
                .store
                .advance(&fingerprint, LifecycleState::Processing, 0)
            {
                Some(_) => {
                    self.start_polling(&fingerprint);
                    SubmitOutcome::Processing { fingerprint }
                }
                None => SubmitOutcome::Cancelled {
                    task_id: fingerprint,
                },
            }
        }
    }

    /// Sole cancellation mechanism: removes the task and stops its poll
    /// timer before returning.
    pub fn delete_task(&self, id: &str) -> bool {
        match self.store.remove(id) {
            Some(task) => {
                if !task.fingerprint.is_empty() {
                    self.poller.stop(&task.fingerprint);
                }
                trace::event(
                    self.store.data_dir(),
                    Some(id),
                    "Task",
                    "TASK.delete",
                    "ok",
                    None,
                );
                true
            }
            None => false,
        }
    }

    /// Blank names are rejected; returns whether the rename applied.
    pub fn rename_task(&self, id: &str, display_name: &str) -> bool {
        self.store.rename(id, display_name)
    }

    /// Artifacts exist only after the backend finished; anything else is
    /// refused without a request.
    pub async fn download_artifact(
        &self,
        fingerprint: &str,
        kind: ArtifactKind,
    ) -> Result<Vec<u8>, ClientError> {
        match self.store.find_by_fingerprint(fingerprint) {
            Some(t) if t.state == LifecycleState::Succeeded => {
                self.client.download_artifact(fingerprint, kind).await
            }
            Some(_) => Err(err(
                ErrorKind::Protocol,
                "E_NOT_READY",
                "artifacts are available only after a task succeeds",
            )),
            None => Err(err(
                ErrorKind::Protocol,
                "E_UNKNOWN_TASK",
                "no task with this fingerprint",
            )),
        }
    }

    /// Session teardown: cancels all poll timers.
    pub fn shutdown(&self) {
        self.poller.shutdown();
        trace::event(
            self.store.data_dir(),
            None,
            "Session",
            "SESSION.shutdown",
            "ok",
            None,
        );
    }

    fn resume_polling(&self) {
        let fingerprints = self.store.resumable_fingerprints();
        if fingerprints.is_empty() {
            return;
        }
        trace::event(
            self.store.data_dir(),
            None,
            "Rehydrate",
            "POLL.resume",
            "ok",
            Some(serde_json::json!({ "count": fingerprints.len() })),
        );
        for fingerprint in fingerprints {
            self.start_polling(&fingerprint);
        }
    }

    fn start_polling(&self, fingerprint: &str) -> bool {
        let this = self.clone();
        let fp = fingerprint.to_string();
        self.poller.start(fingerprint, move || {
            let this = this.clone();
            let fp = fp.clone();
            async move { this.poll_tick(&fp).await }
        })
    }

    async fn poll_tick(&self, fingerprint: &str) {
        let data_dir = self.store.data_dir().to_path_buf();
        let report = match self.client.check_status(fingerprint).await {
            Ok(v) => v,
            Err(e) => {
                // Swallowed; the next interval retries.
                trace::event(
                    &data_dir,
                    Some(fingerprint),
                    "Poll",
                    "POLL.tick",
                    "err",
                    Some(serde_json::json!({
                        "kind": e.kind.as_str(),
                        "code": e.code,
                        "message": e.message,
                    })),
                );
                return;
            }
        };

        let (state, progress) = status::translate(&report.status, report.celery_status.as_deref());
        let prev = match self.store.advance(fingerprint, state, progress) {
            Some(prev) => prev,
            None => {
                // The task is gone; no timer may outlive it.
                self.poller.stop(fingerprint);
                return;
            }
        };

        match state {
            LifecycleState::Succeeded => {
                self.poller.stop(fingerprint);
                if prev != LifecycleState::Succeeded {
                    trace::event(
                        &data_dir,
                        Some(fingerprint),
                        "Poll",
                        "POLL.terminal",
                        "ok",
                        Some(serde_json::json!({ "state": "succeeded" })),
                    );
                    let name = self
                        .store
                        .find_by_fingerprint(fingerprint)
                        .map(|t| t.display_name)
                        .unwrap_or_default();
                    self.notify(
                        fingerprint,
                        "completed",
                        format!("{name}: transcription completed"),
                    );
                    self.spawn_fetch_result(fingerprint);
                }
            }
            LifecycleState::Failed => {
                self.poller.stop(fingerprint);
                if prev != LifecycleState::Failed {
                    trace::event(
                        &data_dir,
                        Some(fingerprint),
                        "Poll",
                        "POLL.terminal",
                        "ok",
                        Some(serde_json::json!({ "state": "failed" })),
                    );
                    let name = self
                        .store
                        .find_by_fingerprint(fingerprint)
                        .map(|t| t.display_name)
                        .unwrap_or_default();
                    self.notify(
                        fingerprint,
                        "failed",
                        format!("{name}: transcription failed"),
                    );
                }
            }
            _ => {}
        }
    }

    fn spawn_fetch_result(&self, fingerprint: &str) {
        let this = self.clone();
        let fp = fingerprint.to_string();
        tokio::spawn(async move {
            this.fetch_and_attach(&fp).await;
        });
    }

    async fn fetch_and_attach(&self, fingerprint: &str) {
        let data_dir = self.store.data_dir().to_path_buf();
        let span = Span::start(&data_dir, Some(fingerprint), "Resolve", "TEXT.fetch", None);
        match self.client.fetch_text(fingerprint).await {
            Ok(result) => {
                let attached = self.store.attach_result(fingerprint, result);
                span.ok(Some(serde_json::json!({ "attached": attached })));
            }
            Err(e) => {
                // The task keeps its succeeded state; only the text is
                // missing until a future client asks again.
                span.err(e.kind.as_str(), &e.code, &e.message, None);
            }
        }
    }

    fn fail_task(&self, id: &str, display_name: &str, error: &ClientError) {
        if self.store.mark_failed(id) {
            self.notify(id, "failed", format!("{display_name}: {error}"));
        }
    }

    fn notify(&self, task_id: &str, kind: &str, message: String) {
        self.notifier.notify(TaskNotice {
            task_id: task_id.to_string(),
            kind: kind.to_string(),
            message,
        });
    }
}
