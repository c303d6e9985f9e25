/// Failure kinds crossing the client boundary.
///
/// Duplicate fingerprints are not represented here: dedupe is a normal
/// submission outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Local file read failure (hashing, upload body).
    Io,
    /// Transport-level failure before an HTTP status was obtained.
    Network,
    /// Non-2xx response or an operation the backend refuses.
    Protocol,
    /// Response body that could not be parsed.
    Decode,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Io => "io",
            ErrorKind::Network => "network",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Decode => "decode",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ClientError {}

pub fn err(kind: ErrorKind, code: &str, message: impl Into<String>) -> ClientError {
    ClientError {
        kind,
        code: code.to_string(),
        message: message.into(),
    }
}
