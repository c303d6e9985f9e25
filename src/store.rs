use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};

use crate::task::{LifecycleState, Task, TranscriptResult};
use crate::trace;

pub const SNAPSHOT_FILE: &str = "tasks.json";

pub fn snapshot_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SNAPSHOT_FILE)
}

fn load_snapshot(data_dir: &Path) -> Result<Vec<Task>> {
    let p = snapshot_path(data_dir);
    if !p.exists() {
        return Ok(Vec::new());
    }
    let s = fs::read_to_string(&p).context("read tasks.json failed")?;
    let v: Vec<Task> = serde_json::from_str(&s).context("parse tasks.json failed")?;
    Ok(v)
}

fn save_snapshot(data_dir: &Path, tasks: &[Task]) -> Result<()> {
    fs::create_dir_all(data_dir).ok();
    let p = snapshot_path(data_dir);
    let s = serde_json::to_string_pretty(tasks).context("serialize tasks failed")?;
    fs::write(&p, s).context("write tasks.json failed")?;
    Ok(())
}

/// Outcome of claiming a fingerprint for a freshly hashed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Promotion {
    Promoted,
    /// Another live task already holds this fingerprint.
    Duplicate { existing_id: String },
    /// The temporary task is gone (deleted while hashing).
    Missing,
}

/// Authoritative task collection, newest first.
///
/// Every mutation looks its target up by `id` or `fingerprint` and is a
/// no-op when the key matches nothing; nothing is ever addressed by
/// position. Each committed mutation rewrites the whole snapshot file,
/// last-writer-wins.
#[derive(Clone)]
pub struct TaskStore {
    tasks: Arc<Mutex<Vec<Task>>>,
    data_dir: PathBuf,
}

impl TaskStore {
    /// Loads the snapshot before any task can be created. A missing file
    /// yields an empty store; an unreadable or corrupt one is traced and
    /// also yields an empty store, so a bad snapshot never takes the
    /// session down.
    pub fn open(data_dir: &Path) -> Self {
        let span = trace::Span::start(data_dir, None, "Store", "STORE.load", None);
        let tasks = match load_snapshot(data_dir) {
            Ok(v) => {
                span.ok(Some(serde_json::json!({ "count": v.len() })));
                v
            }
            Err(e) => {
                span.err_anyhow("io", "E_SNAPSHOT_LOAD", &e, None);
                Vec::new()
            }
        };
        Self {
            tasks: Arc::new(Mutex::new(tasks)),
            data_dir: data_dir.to_path_buf(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Ordered snapshot of the current list, newest first.
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().clone()
    }

    pub fn find_by_id(&self, id: &str) -> Option<Task> {
        self.tasks.lock().unwrap().iter().find(|t| t.id == id).cloned()
    }

    pub fn find_by_fingerprint(&self, fingerprint: &str) -> Option<Task> {
        if fingerprint.is_empty() {
            return None;
        }
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.fingerprint == fingerprint)
            .cloned()
    }

    pub fn create(&self, temp_id: &str, display_name: &str, path: &Path) -> Task {
        let task = Task::new(temp_id, display_name, path.to_path_buf());
        let mut g = self.tasks.lock().unwrap();
        g.insert(0, task.clone());
        self.persist(&g);
        task
    }

    /// Rebinds the temporary id to the fingerprint and moves the task to
    /// `uploading`. Doubles as the dedupe commit point: the uniqueness check
    /// and the rebind happen under one lock, so two submissions of identical
    /// content cannot both claim the fingerprint.
    pub fn promote(&self, temp_id: &str, fingerprint: &str) -> Promotion {
        let mut g = self.tasks.lock().unwrap();
        if let Some(existing) = g
            .iter()
            .find(|t| t.fingerprint == fingerprint && t.id != temp_id)
        {
            return Promotion::Duplicate {
                existing_id: existing.id.clone(),
            };
        }
        match g.iter_mut().find(|t| t.id == temp_id) {
            Some(t) => {
                t.fingerprint = fingerprint.to_string();
                t.id = fingerprint.to_string();
                t.state = LifecycleState::Uploading;
                self.persist(&g);
                Promotion::Promoted
            }
            None => Promotion::Missing,
        }
    }

    /// Moves the task with this fingerprint to a new state and progress,
    /// returning its previous state, or `None` when no such task exists.
    pub fn advance(
        &self,
        fingerprint: &str,
        state: LifecycleState,
        progress: u8,
    ) -> Option<LifecycleState> {
        if fingerprint.is_empty() {
            return None;
        }
        let mut g = self.tasks.lock().unwrap();
        match g.iter_mut().find(|t| t.fingerprint == fingerprint) {
            Some(t) => {
                let prev = t.state;
                t.state = state;
                t.progress = progress;
                self.persist(&g);
                Some(prev)
            }
            None => None,
        }
    }

    pub fn set_progress(&self, fingerprint: &str, progress: u8) -> bool {
        if fingerprint.is_empty() {
            return false;
        }
        let mut g = self.tasks.lock().unwrap();
        match g.iter_mut().find(|t| t.fingerprint == fingerprint) {
            Some(t) => {
                t.progress = progress;
                self.persist(&g);
                true
            }
            None => false,
        }
    }

    pub fn attach_result(&self, fingerprint: &str, result: TranscriptResult) -> bool {
        if fingerprint.is_empty() {
            return false;
        }
        let mut g = self.tasks.lock().unwrap();
        match g.iter_mut().find(|t| t.fingerprint == fingerprint) {
            Some(t) => {
                t.result = Some(result);
                self.persist(&g);
                true
            }
            None => false,
        }
    }

    /// Blank names are rejected; the task is left untouched.
    pub fn rename(&self, id: &str, display_name: &str) -> bool {
        let trimmed = display_name.trim();
        if trimmed.is_empty() {
            return false;
        }
        let mut g = self.tasks.lock().unwrap();
        match g.iter_mut().find(|t| t.id == id) {
            Some(t) => {
                t.display_name = trimmed.to_string();
                self.persist(&g);
                true
            }
            None => false,
        }
    }

    pub fn mark_failed(&self, id: &str) -> bool {
        let mut g = self.tasks.lock().unwrap();
        match g.iter_mut().find(|t| t.id == id) {
            Some(t) => {
                t.state = LifecycleState::Failed;
                self.persist(&g);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> Option<Task> {
        let mut g = self.tasks.lock().unwrap();
        let pos = g.iter().position(|t| t.id == id)?;
        let task = g.remove(pos);
        self.persist(&g);
        Some(task)
    }

    /// Fingerprints whose restored tasks still have a backend job to watch.
    pub fn resumable_fingerprints(&self) -> Vec<String> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| {
                matches!(
                    t.state,
                    LifecycleState::Queued | LifecycleState::Processing
                ) && !t.fingerprint.is_empty()
            })
            .map(|t| t.fingerprint.clone())
            .collect()
    }

    fn persist(&self, tasks: &[Task]) {
        if let Err(e) = save_snapshot(&self.data_dir, tasks) {
            trace::event(
                &self.data_dir,
                None,
                "Store",
                "STORE.persist",
                "err",
                Some(serde_json::json!({ "error": format!("{e:#}") })),
            );
            let _ = writeln!(std::io::stderr(), "snapshot write failed: {e:#}");
        }
    }
}
