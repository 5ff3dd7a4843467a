//! Parsed-log cache.
//!
//! Reparsing a large session log dominates startup for repeated queries, so
//! the scan result can be stored next to the log as a zstd-compressed bincode
//! snapshot. The snapshot carries a format version and the source file's
//! length and mtime; any mismatch or decode failure is answered with a fresh
//! parse, never an error.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use color_eyre::eyre::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::types::ScanResult;

/// Bumped whenever the serialized model changes shape
const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
enum CacheError {
    #[error("written by format version {0}")]
    Version(u32),

    #[error("source file changed since the cache was written")]
    Stale,

    #[error("decode failed: {0}")]
    Decode(#[from] bincode::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Write-side envelope; field order must match [`CacheFile`]
#[derive(Serialize)]
struct CacheEnvelope<'a> {
    version: u32,
    source_len: u64,
    source_mtime: u64,
    scan: &'a ScanResult,
}

/// Read-side envelope
#[derive(Deserialize)]
struct CacheFile {
    version: u32,
    source_len: u64,
    source_mtime: u64,
    scan: ScanResult,
}

/// Sibling path the cache lives at: `<log>.scan.zst`
pub fn cache_path(log_path: &Path) -> PathBuf {
    let mut name = log_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".scan.zst");
    log_path.with_file_name(name)
}

fn source_stamp(log_path: &Path) -> std::io::Result<(u64, u64)> {
    let meta = fs::metadata(log_path)?;
    let mtime = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok((meta.len(), mtime))
}

/// Try to load a cached scan for `log_path`. Every failure reason falls back
/// to `None` so the caller reparses.
pub fn load_cached_scan(log_path: &Path) -> Option<ScanResult> {
    let path = cache_path(log_path);
    if !path.exists() {
        return None;
    }
    match try_load(log_path, &path) {
        Ok(scan) => {
            info!(
                "Loaded cached scan from {} ({} events)",
                path.display(),
                scan.events.len()
            );
            Some(scan)
        }
        Err(err) => {
            warn!("Ignoring cache {}: {}", path.display(), err);
            None
        }
    }
}

fn try_load(log_path: &Path, cache: &Path) -> Result<ScanResult, CacheError> {
    let compressed = fs::read(cache)?;
    let bytes = zstd::decode_all(compressed.as_slice())?;
    let file: CacheFile = bincode::deserialize(&bytes)?;

    if file.version != CACHE_FORMAT_VERSION {
        return Err(CacheError::Version(file.version));
    }
    let (len, mtime) = source_stamp(log_path)?;
    if file.source_len != len || file.source_mtime != mtime {
        return Err(CacheError::Stale);
    }
    Ok(file.scan)
}

/// Store the scan next to the log it came from
pub fn store_scan(log_path: &Path, scan: &ScanResult) -> Result<()> {
    let (source_len, source_mtime) =
        source_stamp(log_path).with_context(|| format!("Failed to stat {}", log_path.display()))?;

    let envelope = CacheEnvelope {
        version: CACHE_FORMAT_VERSION,
        source_len,
        source_mtime,
        scan,
    };
    let bytes = bincode::serialize(&envelope).context("Failed to serialize scan cache")?;
    let compressed = zstd::encode_all(bytes.as_slice(), zstd::DEFAULT_COMPRESSION_LEVEL)
        .context("Failed to compress scan cache")?;

    let path = cache_path(log_path);
    fs::write(&path, compressed)
        .with_context(|| format!("Failed to write scan cache to {}", path.display()))?;

    info!("Cached scan at {}", path.display());
    Ok(())
}
