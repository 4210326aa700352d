//! Content-addressed cache of workflow results
//!
//! # Cache Structure
//!
//! ```text
//! {directory}/
//!   {sha256 of canonical (unit, backend, params)}.json
//! ```
//!
//! Each record carries the TTL it was written with, so changing the
//! configured TTL does not affect entries already on disk. Unreadable
//! records are treated as misses and removed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::error::{ConclaveError, Result};

/// One persisted cache record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub unit: String,
    pub backend: String,
    pub params: Value,
    pub result: Value,
    pub stored_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl CacheRecord {
    /// Fresh while strictly less than `ttl_seconds` have elapsed
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        let elapsed_ms = i128::from(now.signed_duration_since(self.stored_at).num_milliseconds());
        elapsed_ms < i128::from(self.ttl_seconds) * 1000
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub corrupt_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub ttl_seconds: u64,
    pub directory: PathBuf,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
}

/// Deterministic key: SHA-256 over the canonical JSON of the triple
pub fn cache_key<P>(unit: &str, backend: &str, params: &P) -> Result<String>
where
    P: Serialize + ?Sized,
{
    let key_data = json!({
        "unit": unit,
        "backend": backend,
        "params": serde_json::to_value(params)?,
    });
    let canonical = serde_jcs::to_vec(&key_data).map_err(|e| {
        ConclaveError::Json(<serde_json::Error as serde::ser::Error>::custom(e.to_string()))
    })?;

    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// File-backed result cache, safe to share between concurrent runs
#[derive(Debug)]
pub struct ResultCache {
    config: CacheConfig,
    counters: Mutex<Counters>,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        if config.enabled {
            info!(
                directory = %config.directory.display(),
                ttl_seconds = config.ttl_seconds,
                "Result cache enabled"
            );
        } else {
            info!("Result cache disabled");
        }

        Self {
            config,
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.config.directory.join(format!("{}.json", key))
    }

    pub async fn get<P>(&self, unit: &str, backend: &str, params: &P) -> Option<Value>
    where
        P: Serialize + ?Sized,
    {
        self.get_at(unit, backend, params, Utc::now()).await
    }

    pub(crate) async fn get_at<P>(
        &self,
        unit: &str,
        backend: &str,
        params: &P,
        now: DateTime<Utc>,
    ) -> Option<Value>
    where
        P: Serialize + ?Sized,
    {
        if !self.config.enabled {
            return None;
        }

        let found = match cache_key(unit, backend, params) {
            Ok(key) => self.lookup(&key, now).await,
            Err(e) => {
                warn!(unit, backend, error = %e, "Cannot derive cache key");
                None
            }
        };

        let mut counters = self.counters.lock();
        match found {
            Some(_) => counters.hits += 1,
            None => counters.misses += 1,
        }
        found
    }

    async fn lookup(&self, key: &str, now: DateTime<Utc>) -> Option<Value> {
        let path = self.record_path(key);

        let record = match read_record(&path).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(key, "Cache miss");
                return None;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable cache record, removing");
                remove_quietly(&path).await;
                return None;
            }
        };

        if !record.is_fresh_at(now) {
            debug!(key, stored_at = %record.stored_at, ttl = record.ttl_seconds, "Cache entry expired");
            return None;
        }

        info!(unit = %record.unit, key = &key[..8], "Cache hit");
        Some(record.result)
    }

    pub async fn set<P>(&self, unit: &str, backend: &str, params: &P, result: &Value)
    where
        P: Serialize + ?Sized,
    {
        self.set_at(unit, backend, params, result, Utc::now()).await
    }

    pub(crate) async fn set_at<P>(
        &self,
        unit: &str,
        backend: &str,
        params: &P,
        result: &Value,
        now: DateTime<Utc>,
    ) where
        P: Serialize + ?Sized,
    {
        if !self.config.enabled {
            return;
        }

        if let Err(e) = self.store(unit, backend, params, result, now).await {
            warn!(unit, backend, error = %e, "Failed to write cache record");
        }
    }

    async fn store<P>(
        &self,
        unit: &str,
        backend: &str,
        params: &P,
        result: &Value,
        now: DateTime<Utc>,
    ) -> Result<()>
    where
        P: Serialize + ?Sized,
    {
        let key = cache_key(unit, backend, params)?;
        let record = CacheRecord {
            unit: unit.to_string(),
            backend: backend.to_string(),
            params: serde_json::to_value(params)?,
            result: result.clone(),
            stored_at: now,
            ttl_seconds: self.config.ttl_seconds,
        };

        fs::create_dir_all(&self.config.directory).await?;
        let content = serde_json::to_string_pretty(&record)?;
        write_atomic(&self.record_path(&key), &content).await?;

        info!(unit, key = &key[..8], "Cache stored");
        Ok(())
    }

    /// Remove every record matching the filters; `None` matches anything.
    /// Unreadable records met on the way are removed and counted too.
    pub async fn invalidate(&self, unit: Option<&str>, backend: Option<&str>) -> usize {
        if !self.config.enabled {
            return 0;
        }

        let mut removed = 0;
        for path in self.record_paths().await {
            let matches = match read_record(&path).await {
                Ok(Some(record)) => {
                    unit.map_or(true, |u| record.unit == u)
                        && backend.map_or(true, |b| record.backend == b)
                }
                Ok(None) => false,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable cache record, removing");
                    true
                }
            };

            if matches && fs::remove_file(&path).await.is_ok() {
                debug!(path = %path.display(), "Invalidated cache record");
                removed += 1;
            }
        }

        info!(removed, "Invalidated cache entries");
        removed
    }

    pub async fn clear_all(&self) -> usize {
        self.invalidate(None, None).await
    }

    pub async fn stats(&self) -> CacheStats {
        let (hits, misses) = {
            let counters = self.counters.lock();
            (counters.hits, counters.misses)
        };

        let mut stats = CacheStats {
            enabled: self.config.enabled,
            total_entries: 0,
            valid_entries: 0,
            expired_entries: 0,
            corrupt_entries: 0,
            hits,
            misses,
            ttl_seconds: self.config.ttl_seconds,
            directory: self.config.directory.clone(),
        };

        if !self.config.enabled {
            return stats;
        }

        let now = Utc::now();
        for path in self.record_paths().await {
            stats.total_entries += 1;
            match read_record(&path).await {
                Ok(Some(record)) if record.is_fresh_at(now) => stats.valid_entries += 1,
                Ok(Some(_)) => stats.expired_entries += 1,
                Ok(None) => stats.total_entries -= 1,
                Err(_) => stats.corrupt_entries += 1,
            }
        }

        stats
    }

    async fn record_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        let mut entries = match fs::read_dir(&self.config.directory).await {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(error = %e, "Failed to read cache directory");
                }
                return paths;
            }
        };

        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) == Some("json") {
                        paths.push(path);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read cache directory entry");
                    break;
                }
            }
        }

        paths
    }
}

/// `Ok(None)` when the record does not exist
async fn read_record(path: &Path) -> Result<Option<CacheRecord>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&content)?))
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove cache record");
        }
    }
}

/// Write to a unique temp file beside `path`, then rename over it
async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

    if let Err(e) = fs::write(&temp_path, content).await {
        remove_quietly(&temp_path).await;
        return Err(e.into());
    }

    if let Err(e) = fs::rename(&temp_path, path).await {
        remove_quietly(&temp_path).await;
        return Err(e.into());
    }

    Ok(())
}
