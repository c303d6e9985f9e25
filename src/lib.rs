//! Client-side orchestration for the VideoASR transcription backend.
//!
//! Selected video files are identified by a SHA-256 fingerprint, uploaded
//! once per distinct content, and tracked as tasks that survive restarts
//! through a JSON snapshot. Progress for in-flight backend jobs arrives by
//! polling; completed jobs resolve into an attached transcript.
//!
//! The entry point is [`TaskOrchestrator`], which needs a running Tokio
//! runtime.

pub mod client;
pub mod config;
pub mod error;
pub mod hasher;
pub mod orchestrator;
pub mod poller;
pub mod status;
pub mod store;
pub mod task;
pub mod trace;

pub use client::{
    AckStatus, ArtifactKind, HttpTranscriptionClient, ProgressFn, StatusReport,
    TranscriptionClient, UploadAck,
};
pub use config::ClientConfig;
pub use error::{ClientError, ErrorKind};
pub use orchestrator::{NullNotifier, Notifier, SubmitOutcome, TaskNotice, TaskOrchestrator};
pub use poller::PollingScheduler;
pub use store::{Promotion, TaskStore};
pub use task::{LifecycleState, Task, TranscriptResult};
