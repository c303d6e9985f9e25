use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{multipart, Client};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::error::{err, ClientError, ErrorKind};
use crate::task::TranscriptResult;

const UPLOAD_CHUNK_BYTES: usize = 256 * 1024;
const MAX_BODY_SNIPPET_CHARS: usize = 512;

/// Invoked with a rounded percentage as upload bytes are handed to the
/// transport; non-decreasing within one upload.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Backend answer to an upload. Its own vocabulary, distinct from the poll
/// status vocabulary: `completed` means the file was already processed and
/// the transcript is immediately available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Completed,
    Processing,
    #[serde(other)]
    Other,
}

impl AckStatus {
    /// Anything the backend does not explicitly call completed counts as
    /// accepted-and-processing.
    pub fn is_completed(&self) -> bool {
        matches!(self, AckStatus::Completed)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadAck {
    pub status: AckStatus,
    pub file_hash: String,
    #[serde(default)]
    pub task_id: Option<String>,
}

/// Poll answer. `status` stays free text so the translator can stay total;
/// `celery_status` is the backend's internal sub-state.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusReport {
    pub status: String,
    #[serde(default)]
    pub celery_status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TextResponse {
    text_content: String,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Text,
    Track,
}

impl ArtifactKind {
    fn path_segment(&self) -> &'static str {
        match self {
            ArtifactKind::Text => "text",
            ArtifactKind::Track => "track",
        }
    }
}

/// Remote backend operations, behind a trait so orchestration tests can
/// inject a scripted fake.
#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    async fn upload(
        &self,
        path: &Path,
        fingerprint: &str,
        on_progress: ProgressFn,
    ) -> Result<UploadAck, ClientError>;

    async fn check_status(&self, fingerprint: &str) -> Result<StatusReport, ClientError>;

    async fn fetch_text(&self, fingerprint: &str) -> Result<TranscriptResult, ClientError>;

    async fn download_artifact(
        &self,
        fingerprint: &str,
        kind: ArtifactKind,
    ) -> Result<Vec<u8>, ClientError>;
}

pub struct HttpTranscriptionClient {
    http: Client,
    base_url: String,
}

impl HttpTranscriptionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl TranscriptionClient for HttpTranscriptionClient {
    async fn upload(
        &self,
        path: &Path,
        fingerprint: &str,
        on_progress: ProgressFn,
    ) -> Result<UploadAck, ClientError> {
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            err(
                ErrorKind::Io,
                "E_UPLOAD_READ",
                format!("open {} failed: {e}", path.display()),
            )
        })?;
        let total = file
            .metadata()
            .await
            .map_err(|e| {
                err(
                    ErrorKind::Io,
                    "E_UPLOAD_READ",
                    format!("stat {} failed: {e}", path.display()),
                )
            })?
            .len();
        let mime = guess_mime(path);
        let file_name = remote_file_name(fingerprint, path);

        let part =
            multipart::Part::stream_with_length(progress_body(file, total, on_progress), total)
                .file_name(file_name)
                .mime_str(mime)
                .map_err(|e| {
                    err(ErrorKind::Protocol, "E_UPLOAD_MIME", format!("invalid mime: {e}"))
                })?;
        let form = multipart::Form::new().part("file", part);

        let resp = self
            .http
            .post(format!("{}/tasks/text", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                err(
                    ErrorKind::Network,
                    "E_UPLOAD_SEND",
                    format!("request failed: {e}"),
                )
            })?;
        let body = read_success_body(resp).await?;
        decode(&body, "E_UPLOAD_PARSE")
    }

    async fn check_status(&self, fingerprint: &str) -> Result<StatusReport, ClientError> {
        let resp = self
            .http
            .get(format!("{}/files/{fingerprint}/status", self.base_url))
            .send()
            .await
            .map_err(|e| {
                err(
                    ErrorKind::Network,
                    "E_STATUS_SEND",
                    format!("request failed: {e}"),
                )
            })?;
        let body = read_success_body(resp).await?;
        decode(&body, "E_STATUS_PARSE")
    }

    async fn fetch_text(&self, fingerprint: &str) -> Result<TranscriptResult, ClientError> {
        let resp = self
            .http
            .get(format!("{}/files/{fingerprint}/text", self.base_url))
            .send()
            .await
            .map_err(|e| {
                err(
                    ErrorKind::Network,
                    "E_TEXT_SEND",
                    format!("request failed: {e}"),
                )
            })?;
        let body = read_success_body(resp).await?;
        let parsed: TextResponse = decode(&body, "E_TEXT_PARSE")?;
        Ok(TranscriptResult {
            text: parsed.text_content,
            duration: parsed.duration,
        })
    }

    async fn download_artifact(
        &self,
        fingerprint: &str,
        kind: ArtifactKind,
    ) -> Result<Vec<u8>, ClientError> {
        let resp = self
            .http
            .get(format!(
                "{}/files/{fingerprint}/download/{}",
                self.base_url,
                kind.path_segment()
            ))
            .send()
            .await
            .map_err(|e| {
                err(
                    ErrorKind::Network,
                    "E_DOWNLOAD_SEND",
                    format!("request failed: {e}"),
                )
            })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(err(
                ErrorKind::Protocol,
                &format!("E_HTTP_STATUS_{}", status.as_u16()),
                body_snippet(&body),
            ));
        }
        let bytes = resp.bytes().await.map_err(|e| {
            err(
                ErrorKind::Network,
                "E_DOWNLOAD_READ",
                format!("read response failed: {e}"),
            )
        })?;
        Ok(bytes.to_vec())
    }
}

/// Server-side artifact name: the fingerprint plus the original extension,
/// so identical content always lands under the same name.
fn remote_file_name(fingerprint: &str, path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{fingerprint}.{ext}"),
        _ => fingerprint.to_string(),
    }
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

/// Tracks transmitted bytes and reports the cumulative rounded percentage,
/// capped at 100 even if the file grew after its length was taken.
struct ProgressCounter {
    sent: u64,
    total: u64,
    on_progress: ProgressFn,
}

impl ProgressCounter {
    fn new(total: u64, on_progress: ProgressFn) -> Self {
        Self {
            sent: 0,
            total,
            on_progress,
        }
    }

    fn account(&mut self, n: usize) {
        self.sent = self.sent.saturating_add(n as u64);
        let percent = if self.total == 0 {
            100
        } else {
            ((self.sent.min(self.total) as f64 / self.total as f64) * 100.0).round() as u8
        };
        (self.on_progress)(percent);
    }
}

/// Streams the file in fixed chunks; each chunk reports progress as the
/// transport pulls it, so nothing is reported before transmission starts and
/// memory stays bounded by one chunk.
fn progress_body(file: tokio::fs::File, total: u64, on_progress: ProgressFn) -> reqwest::Body {
    let mut counter = ProgressCounter::new(total, on_progress);
    let stream = ReaderStream::with_capacity(file, UPLOAD_CHUNK_BYTES).map(move |chunk| {
        chunk.map(|b| {
            counter.account(b.len());
            b
        })
    });
    reqwest::Body::wrap_stream(stream)
}

async fn read_success_body(resp: reqwest::Response) -> Result<String, ClientError> {
    let status = resp.status();
    let body = resp.text().await.map_err(|e| {
        err(
            ErrorKind::Network,
            "E_RESPONSE_READ",
            format!("read response failed: {e}"),
        )
    })?;
    if !status.is_success() {
        return Err(err(
            ErrorKind::Protocol,
            &format!("E_HTTP_STATUS_{}", status.as_u16()),
            body_snippet(&body),
        ));
    }
    Ok(body)
}

fn decode<T: DeserializeOwned>(body: &str, code: &str) -> Result<T, ClientError> {
    serde_json::from_str(body)
        .map_err(|e| err(ErrorKind::Decode, code, format!("invalid json response: {e}")))
}

fn body_snippet(body: &str) -> String {
    if body.chars().count() <= MAX_BODY_SNIPPET_CHARS {
        return body.to_string();
    }
    let s: String = body.chars().take(MAX_BODY_SNIPPET_CHARS).collect();
    format!("{s}...(truncated)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[test]
    fn remote_file_name_keeps_original_extension() {
        let fp = "a".repeat(64);
        assert_eq!(
            remote_file_name(&fp, &PathBuf::from("/videos/talk.mp4")),
            format!("{fp}.mp4")
        );
        assert_eq!(remote_file_name(&fp, &PathBuf::from("/videos/noext")), fp);
    }

    #[test]
    fn guess_mime_covers_common_video_containers() {
        assert_eq!(guess_mime(&PathBuf::from("a.MP4")), "video/mp4");
        assert_eq!(guess_mime(&PathBuf::from("a.webm")), "video/webm");
        assert_eq!(guess_mime(&PathBuf::from("a.xyz")), "application/octet-stream");
        assert_eq!(guess_mime(&PathBuf::from("noext")), "application/octet-stream");
    }

    #[test]
    fn ack_status_treats_unknown_values_as_not_completed() {
        let completed: AckStatus = serde_json::from_str("\"completed\"").expect("parse");
        let processing: AckStatus = serde_json::from_str("\"processing\"").expect("parse");
        let other: AckStatus = serde_json::from_str("\"queued\"").expect("parse");
        assert!(completed.is_completed());
        assert!(!processing.is_completed());
        assert_eq!(other, AckStatus::Other);
        assert!(!other.is_completed());
    }

    #[test]
    fn upload_ack_and_status_report_decode() {
        let ack: UploadAck =
            decode(r#"{"status":"completed","file_hash":"abc","task_id":"t-9"}"#, "E_T").expect("ack");
        assert!(ack.status.is_completed());
        assert_eq!(ack.file_hash, "abc");
        assert_eq!(ack.task_id.as_deref(), Some("t-9"));

        let report: StatusReport =
            decode(r#"{"status":"progress","celery_status":"STARTED"}"#, "E_T").expect("report");
        assert_eq!(report.status, "progress");
        assert_eq!(report.celery_status.as_deref(), Some("STARTED"));

        let bare: StatusReport = decode(r#"{"status":"success"}"#, "E_T").expect("bare");
        assert!(bare.celery_status.is_none());

        let e = decode::<UploadAck>("not json", "E_UPLOAD_PARSE").expect_err("must fail");
        assert_eq!(e.kind, ErrorKind::Decode);
        assert_eq!(e.code, "E_UPLOAD_PARSE");
    }

    fn collecting_counter(total: u64) -> (ProgressCounter, Arc<Mutex<Vec<u8>>>) {
        let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let counter = ProgressCounter::new(total, Arc::new(move |p| seen2.lock().unwrap().push(p)));
        (counter, seen)
    }

    #[test]
    fn progress_counter_is_monotonic_and_ends_at_100() {
        let (mut counter, seen) = collecting_counter(10);
        for _ in 0..10 {
            counter.account(1);
        }
        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&10));
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "percent went backwards");
        assert!(seen.iter().all(|p| *p <= 100));
    }

    #[test]
    fn progress_counter_rounds_and_caps_at_100() {
        let (mut counter, seen) = collecting_counter(3);
        counter.account(1);
        counter.account(1);
        counter.account(1);
        // Over-total bytes (file grew after stat) must not exceed 100.
        counter.account(5);
        assert_eq!(*seen.lock().unwrap(), vec![33, 67, 100, 100]);
    }

    #[tokio::test]
    async fn progress_body_reports_nothing_before_transmission() {
        let td = tempfile::tempdir().expect("tempdir");
        let p = td.path().join("clip.mp4");
        std::fs::write(&p, vec![1u8; UPLOAD_CHUNK_BYTES + 1]).expect("write");

        let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let cb: ProgressFn = Arc::new(move |p| seen2.lock().unwrap().push(p));

        let file = tokio::fs::File::open(&p).await.expect("open");
        let _body = progress_body(file, (UPLOAD_CHUNK_BYTES + 1) as u64, cb);
        // The body reads and reports lazily; nothing is consumed yet.
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn body_snippet_truncates_oversized_bodies() {
        let body = "y".repeat(MAX_BODY_SNIPPET_CHARS * 2);
        let snip = body_snippet(&body);
        assert!(snip.ends_with("...(truncated)"));
        assert_eq!(body_snippet("short"), "short");
    }
}
