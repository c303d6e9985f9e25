use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::{err, ClientError, ErrorKind};

/// Read granularity; peak memory stays bounded by one chunk.
pub const HASH_CHUNK_BYTES: usize = 2 * 1024 * 1024;

/// SHA-256 over the file's full byte content, as 64 lowercase hex chars.
///
/// Identical bytes yield an identical fingerprint regardless of file name.
/// Any read failure aborts the computation; no partial fingerprint is
/// produced.
pub async fn compute_fingerprint(path: &Path) -> Result<String, ClientError> {
    let mut file = tokio::fs::File::open(path).await.map_err(|e| {
        err(
            ErrorKind::Io,
            "E_HASH_OPEN",
            format!("open {} failed: {e}", path.display()),
        )
    })?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_BYTES];
    loop {
        let n = file.read(&mut buf).await.map_err(|e| {
            err(
                ErrorKind::Io,
                "E_HASH_READ",
                format!("read {} failed: {e}", path.display()),
            )
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
