use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use anyhow::Error as AnyhowError;
use serde::Serialize;
use serde_json::Value;

const DEFAULT_TRACE_MAX_BYTES: u64 = 10_000_000; // 10MB
const DEFAULT_TRACE_MAX_FILES: usize = 5;
const MAX_ERROR_MESSAGE_CHARS: usize = 2_000;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub(crate) fn env_bool_default_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(v) => {
            let t = v.trim().to_ascii_lowercase();
            !(t == "0" || t == "false" || t == "no" || t == "off")
        }
        Err(_) => true,
    }
}

pub(crate) fn env_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(v) => v.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

pub(crate) fn env_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(v) => v.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

pub fn enabled() -> bool {
    // Default: enabled. Users can set VIDEOASR_TRACE_ENABLED=0 to disable.
    env_bool_default_true("VIDEOASR_TRACE_ENABLED")
}

fn max_bytes() -> u64 {
    env_u64("VIDEOASR_TRACE_MAX_BYTES", DEFAULT_TRACE_MAX_BYTES)
}

fn max_files() -> usize {
    env_usize("VIDEOASR_TRACE_MAX_FILES", DEFAULT_TRACE_MAX_FILES)
}

pub fn trace_path(data_dir: &Path) -> PathBuf {
    data_dir.join("trace.jsonl")
}

fn rotate_if_needed_best_effort(data_dir: &Path) {
    let p = trace_path(data_dir);
    let max_b = max_bytes();
    let max_f = max_files();
    if max_f == 0 {
        return;
    }

    let len = match std::fs::metadata(&p) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if len <= max_b {
        return;
    }

    // Remove the oldest first so renames cannot fail on an existing dest.
    let oldest = data_dir.join(format!("trace.jsonl.{max_f}"));
    if oldest.exists() {
        let _ = std::fs::remove_file(&oldest);
    }

    // Shift: trace.jsonl.(n-1) -> trace.jsonl.n, then trace.jsonl -> trace.jsonl.1
    for i in (1..max_f).rev() {
        let src = data_dir.join(format!("trace.jsonl.{i}"));
        let dst = data_dir.join(format!("trace.jsonl.{}", i + 1));
        if src.exists() {
            let _ = std::fs::rename(&src, &dst);
        }
    }
    let first = data_dir.join("trace.jsonl.1");
    let _ = std::fs::rename(&p, &first);
}

fn trace_write_lock() -> &'static Mutex<()> {
    static TRACE_WRITE_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    TRACE_WRITE_LOCK.get_or_init(|| Mutex::new(()))
}

fn emit_best_effort(data_dir: &Path, ev: &TraceEvent) {
    if !enabled() {
        return;
    }
    let _guard = match trace_write_lock().lock() {
        Ok(g) => g,
        Err(_) => return,
    };
    let _ = std::fs::create_dir_all(data_dir);
    rotate_if_needed_best_effort(data_dir);

    let p = trace_path(data_dir);
    let mut f = match OpenOptions::new().create(true).append(true).open(&p) {
        Ok(f) => f,
        Err(e) => {
            let _ = writeln!(std::io::stderr(), "trace: open failed: {}: {e}", p.display());
            return;
        }
    };
    let mut line = match serde_json::to_string(ev) {
        Ok(s) => s,
        Err(e) => {
            let _ = writeln!(std::io::stderr(), "trace: serialize failed: {e}");
            return;
        }
    };
    line.push('\n');
    if let Err(e) = f.write_all(line.as_bytes()) {
        let _ = writeln!(std::io::stderr(), "trace: write failed: {e}");
    }
}

fn clamp_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let clipped: String = s.chars().take(max_chars).collect();
    format!("{clipped}...(truncated)")
}

fn anyhow_chain(err: &AnyhowError) -> Vec<String> {
    err.chain().map(|e| e.to_string()).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceError {
    pub kind: String, // io|network|protocol|decode|logic
    pub code: String, // E_*
    pub message: String,
}

/// One JSONL line. `status` covers the span lifecycle (`start`, `ok`, `err`,
/// `aborted`) as well as free-standing events.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub ts_ms: i64,
    pub task_id: Option<String>,
    pub stage: String,
    pub step: String,
    pub status: String,
    pub duration_ms: Option<u128>,
    pub error: Option<TraceError>,
    pub ctx: Option<Value>,
}

pub fn event(
    data_dir: &Path,
    task_id: Option<&str>,
    stage: &str,
    step: &str,
    status: &str,
    ctx: Option<Value>,
) {
    emit_best_effort(
        data_dir,
        &TraceEvent {
            ts_ms: now_ms(),
            task_id: task_id.map(|s| s.to_string()),
            stage: stage.to_string(),
            step: step.to_string(),
            status: status.to_string(),
            duration_ms: None,
            error: None,
            ctx,
        },
    );
}

/// Guard for one traced operation. Emits a `start` line on construction and
/// exactly one terminal line: `ok`/`err` when finished explicitly, `aborted`
/// if dropped without either.
pub struct Span {
    data_dir: PathBuf,
    task_id: Option<String>,
    stage: String,
    step: String,
    t0: Instant,
    finished: bool,
}

impl Span {
    pub fn start(
        data_dir: &Path,
        task_id: Option<&str>,
        stage: &str,
        step: &str,
        ctx: Option<Value>,
    ) -> Self {
        emit_best_effort(
            data_dir,
            &TraceEvent {
                ts_ms: now_ms(),
                task_id: task_id.map(|s| s.to_string()),
                stage: stage.to_string(),
                step: step.to_string(),
                status: "start".to_string(),
                duration_ms: None,
                error: None,
                ctx,
            },
        );
        Self {
            data_dir: data_dir.to_path_buf(),
            task_id: task_id.map(|s| s.to_string()),
            stage: stage.to_string(),
            step: step.to_string(),
            t0: Instant::now(),
            finished: false,
        }
    }

    fn finish(&mut self, status: &str, error: Option<TraceError>, ctx: Option<Value>) {
        self.finished = true;
        emit_best_effort(
            &self.data_dir,
            &TraceEvent {
                ts_ms: now_ms(),
                task_id: self.task_id.clone(),
                stage: self.stage.clone(),
                step: self.step.clone(),
                status: status.to_string(),
                duration_ms: Some(self.t0.elapsed().as_millis()),
                error,
                ctx,
            },
        );
    }

    pub fn ok(mut self, ctx: Option<Value>) {
        self.finish("ok", None, ctx);
    }

    pub fn err(mut self, kind: &str, code: &str, message: &str, ctx: Option<Value>) {
        self.finish(
            "err",
            Some(TraceError {
                kind: kind.to_string(),
                code: code.to_string(),
                message: clamp_chars(message, MAX_ERROR_MESSAGE_CHARS),
            }),
            ctx,
        );
    }

    pub fn err_anyhow(mut self, kind: &str, code: &str, err: &AnyhowError, ctx: Option<Value>) {
        let mut m = serde_json::Map::new();
        m.insert("err_chain".to_string(), serde_json::json!(anyhow_chain(err)));
        if let Some(Value::Object(extra)) = ctx {
            for (k, v) in extra.into_iter() {
                m.insert(k, v);
            }
        }
        self.finish(
            "err",
            Some(TraceError {
                kind: kind.to_string(),
                code: code.to_string(),
                message: clamp_chars(&err.to_string(), MAX_ERROR_MESSAGE_CHARS),
            }),
            Some(Value::Object(m)),
        );
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finish(
            "aborted",
            Some(TraceError {
                kind: "logic".to_string(),
                code: "ABORTED".to_string(),
                message: "span dropped without explicit ok/err".to_string(),
            }),
            None,
        );
    }
}
