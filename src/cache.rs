//! Content-addressed file cache for HTTP payloads.
//!
//! Keys are sha256 of the request identity (URL + query), entries carry a
//! stored-at timestamp and expire after the configured TTL. Writes go
//! through a tmp file and rename, so concurrent writers degrade to
//! last-write-wins rather than torn files. The cache is an optimisation
//! only; a miss or a corrupt entry is never an error.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    stored_at: DateTime<Utc>,
    payload: String,
}

pub struct PayloadCache {
    dir: PathBuf,
    ttl: Duration,
    enabled: bool,
}

impl PayloadCache {
    pub fn new(dir: &Path, ttl_hours: u32, enabled: bool) -> Self {
        if enabled {
            let _ = fs::create_dir_all(dir);
        }
        Self {
            dir: dir.to_path_buf(),
            ttl: Duration::hours(i64::from(ttl_hours)),
            enabled,
        }
    }

    /// Disabled cache that never hits; handy for tests.
    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            ttl: Duration::hours(0),
            enabled: false,
        }
    }

    fn key(request_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request_id.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(32);
        for b in digest.iter().take(16) {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{b:02x}");
        }
        out
    }

    fn path_for(&self, request_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::key(request_id)))
    }

    pub fn get(&self, request_id: &str, now: DateTime<Utc>) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let path = self.path_for(request_id);
        let raw = fs::read_to_string(&path).ok()?;
        let entry: Entry = serde_json::from_str(&raw).ok()?;
        if now - entry.stored_at > self.ttl {
            debug!(path = %path.display(), "cache entry expired");
            return None;
        }
        Some(entry.payload)
    }

    pub fn put(&self, request_id: &str, payload: &str, now: DateTime<Utc>) {
        if !self.enabled {
            return;
        }
        let entry = Entry {
            stored_at: now,
            payload: payload.to_string(),
        };
        let path = self.path_for(request_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string(&entry).unwrap_or_else(|_| "{}".to_string());
        let write = || -> std::io::Result<()> {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(json.as_bytes())?;
            fs::rename(&tmp, &path)?;
            Ok(())
        };
        if let Err(e) = write() {
            debug!(error = %e, path = %path.display(), "cache write failed");
        }
    }
}
