//! Filesystem helpers shared by the checkpoint store and the run reporter.
//!
//! Snapshot files and manifests are replaced atomically (write to `.tmp`,
//! then rename) so a crash mid-write never leaves a truncated checkpoint.
//! Reporter output is append-only.

use sha2::{Digest, Sha256};
use std::io::{self, Write};
use std::path::Path;

/// Serialize `data` as pretty JSON and atomically replace `path` with it.
///
/// Returns the SHA-256 of the bytes written, hex encoded.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<String> {
    let json = serde_json::to_vec_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, &json)?;
    Ok(sha256_hex(&json))
}

/// Atomically replace `path` with `data`, creating parent directories.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load and deserialize JSON from a file.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read(path)?;
    let value =
        serde_json::from_slice(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

/// Append `text` to `path`, creating the file and its parents if needed.
pub fn append(path: &Path, text: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(text.as_bytes())?;
    file.flush()
}

/// Serialize `data` as a single JSON line and append it to `path`.
pub fn append_json_line<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let mut line = serde_json::to_string(data).map_err(io::Error::other)?;
    line.push('\n');
    append(path, &line)
}

/// Hex-encoded SHA-256 digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
