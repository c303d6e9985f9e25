use std::{
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Client-visible phase of a task.
///
/// Monotonic along `hashing -> uploading -> queued -> processing ->
/// succeeded`, except that `failed` may be entered from any non-terminal
/// state. `queued` is never minted by the current submission path (upload
/// acks go straight to `processing`) but remains valid in snapshots and is
/// resumed like `processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Hashing,
    Uploading,
    Queued,
    Processing,
    Succeeded,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Succeeded | LifecycleState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptResult {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// One tracked transcription job.
///
/// `id` is a temporary token (`temp-` prefix) until the fingerprint is
/// computed, then it is rebound to the fingerprint value; the two id spaces
/// are never in use simultaneously. `local_path` is the original file
/// selection and is never persisted, so restored tasks carry `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub fingerprint: String,
    pub display_name: String,
    #[serde(skip)]
    pub local_path: Option<PathBuf>,
    pub state: LifecycleState,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TranscriptResult>,
    pub created_at_ms: i64,
}

impl Task {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, local_path: PathBuf) -> Self {
        Self {
            id: id.into(),
            fingerprint: String::new(),
            display_name: display_name.into(),
            local_path: Some(local_path),
            state: LifecycleState::Hashing,
            progress: 0,
            result: None,
            created_at_ms: now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn serde_drops_local_path_and_keeps_the_rest() {
        let mut t = Task::new("temp-1", "clip.mp4", PathBuf::from("/videos/clip.mp4"));
        t.fingerprint = "ab".repeat(32);
        t.id = t.fingerprint.clone();
        t.state = LifecycleState::Processing;
        t.progress = 40;

        let json = serde_json::to_string(&t).expect("serialize");
        assert!(!json.contains("local_path"));
        assert!(!json.contains("result"));

        let back: Task = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.id, t.id);
        assert_eq!(back.fingerprint, t.fingerprint);
        assert_eq!(back.display_name, "clip.mp4");
        assert_eq!(back.state, LifecycleState::Processing);
        assert_eq!(back.progress, 40);
        assert_eq!(back.created_at_ms, t.created_at_ms);
        assert!(back.local_path.is_none());
        assert!(back.result.is_none());
    }

    #[test]
    fn state_names_are_stable_lowercase() {
        let v = serde_json::to_value([
            LifecycleState::Hashing,
            LifecycleState::Uploading,
            LifecycleState::Queued,
            LifecycleState::Processing,
            LifecycleState::Succeeded,
            LifecycleState::Failed,
        ])
        .expect("serialize");
        assert_eq!(
            v,
            serde_json::json!([
                "hashing",
                "uploading",
                "queued",
                "processing",
                "succeeded",
                "failed"
            ])
        );
    }

    #[test]
    fn terminal_states() {
        assert!(LifecycleState::Succeeded.is_terminal());
        assert!(LifecycleState::Failed.is_terminal());
        assert!(!LifecycleState::Queued.is_terminal());
        assert!(!LifecycleState::Processing.is_terminal());
    }
}
