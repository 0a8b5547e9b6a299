use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{cache_key, key_hash};
use crate::server::models::Table;
use crate::server::services::upstream::{scalar_text, UpstreamClient, UpstreamError};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Upstream(UpstreamError),
}

/// Sidecar metadata for a cached payload, seconds since the epoch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct EntryMeta {
    stored_at: i64,
    last_access: i64,
}

/// Keyed disk cache in front of the upstream invoker.
///
/// Entries live under `<root>/<interface>/<key_hash>.bin` with a sibling
/// `.meta`. Concurrent lookups of the same key collapse onto one upstream
/// call via a per-key mutex; distinct keys proceed in parallel.
pub struct DataCache {
    root: PathBuf,
    upstream: Arc<UpstreamClient>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    ceiling_bytes: u64,
    serve_stale_on_error: bool,
}

impl DataCache {
    pub fn new(
        root: PathBuf,
        upstream: Arc<UpstreamClient>,
        ceiling_bytes: u64,
        serve_stale_on_error: bool,
    ) -> anyhow::Result<DataCache> {
        std::fs::create_dir_all(&root)
            .map_err(|e| anyhow::anyhow!("cannot create cache root {}: {e}", root.display()))?;
        Ok(DataCache {
            root,
            upstream,
            locks: DashMap::new(),
            ceiling_bytes,
            serve_stale_on_error,
        })
    }

    /// The single entry point: returns the cached table when fresh,
    /// otherwise performs the upstream call and caches the result. On
    /// upstream failure a stale entry is served when policy allows.
    pub async fn get_or_compute(
        self: &Arc<Self>,
        interface: &str,
        params: &Map<String, Value>,
    ) -> Result<Table, CacheError> {
        let canonical = cache_key(interface, params);
        let hash = key_hash(&canonical);
        let lock_key = format!("{interface}/{hash}");

        let lock = self
            .locks
            .entry(lock_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let bin_path = self.root.join(interface).join(format!("{hash}.bin"));
        let meta_path = self.root.join(interface).join(format!("{hash}.meta"));

        let existing = self.read_entry(&bin_path, &meta_path).await;
        if let Some((table, meta)) = &existing {
            if is_fresh(params, meta.stored_at, Local::now()) {
                debug!(interface, key = %hash, "cache hit");
                self.touch(&meta_path, *meta).await;
                return Ok(table.clone());
            }
        }

        match self.upstream.call(interface, params).await {
            Ok(table) => {
                debug!(interface, key = %hash, "cache miss, stored fresh payload");
                self.write_entry(&bin_path, &meta_path, &table).await;
                self.spawn_sweep();
                Ok(table)
            }
            Err(err) => {
                if let Some((stale, meta)) = existing {
                    if self.serve_stale_on_error {
                        let age = Utc::now().timestamp() - meta.stored_at;
                        warn!(
                            interface,
                            key = %hash,
                            age_secs = age,
                            error = %err,
                            "upstream failed, serving stale cache entry"
                        );
                        return Ok(stale);
                    }
                }
                Err(CacheError::Upstream(err))
            }
        }
    }

    /// Read failures count as a miss; the upstream call decides from there.
    async fn read_entry(&self, bin_path: &Path, meta_path: &Path) -> Option<(Table, EntryMeta)> {
        let bytes = match tokio::fs::read(bin_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %bin_path.display(), error = %e, "cache read failed, treating as miss");
                return None;
            }
        };
        let meta_bytes = tokio::fs::read(meta_path).await.ok()?;
        let meta: EntryMeta = serde_json::from_slice(&meta_bytes).ok()?;
        let table: Table = serde_json::from_slice(&bytes).ok()?;
        Some((table, meta))
    }

    /// Best-effort: a write failure is logged and the fresh payload is still
    /// returned to the caller.
    async fn write_entry(&self, bin_path: &Path, meta_path: &Path, table: &Table) {
        let now = Utc::now().timestamp();
        let meta = EntryMeta {
            stored_at: now,
            last_access: now,
        };
        let payload = match serde_json::to_vec(table) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to serialize cache payload");
                return;
            }
        };
        let meta_bytes = match serde_json::to_vec(&meta) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to serialize cache metadata");
                return;
            }
        };

        if let Err(e) = self.persist(bin_path, &payload).await {
            warn!(path = %bin_path.display(), error = %e, "cache write failed");
            return;
        }
        if let Err(e) = self.persist(meta_path, &meta_bytes).await {
            warn!(path = %meta_path.display(), error = %e, "cache metadata write failed");
        }
    }

    /// Temp-then-rename within the destination directory so readers never
    /// observe a torn file.
    async fn persist(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let dir = path.parent().unwrap_or(&self.root);
        tokio::fs::create_dir_all(dir).await?;
        let tmp = dir.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes).await?;
        match tokio::fs::rename(&tmp, path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(e)
            }
        }
    }

    async fn touch(&self, meta_path: &Path, meta: EntryMeta) {
        let updated = EntryMeta {
            last_access: Utc::now().timestamp(),
            ..meta
        };
        if let Ok(bytes) = serde_json::to_vec(&updated) {
            if let Err(e) = self.persist(meta_path, &bytes).await {
                debug!(path = %meta_path.display(), error = %e, "failed to update access time");
            }
        }
    }

    fn spawn_sweep(self: &Arc<Self>) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            match cache.sweep().await {
                Ok(0) => {}
                Ok(evicted) => info!(evicted, "cache sweep evicted entries"),
                Err(e) => warn!(error = %e, "cache sweep failed"),
            }
        });
    }

    /// Evicts least-recently-read entries until the tree fits under the
    /// ceiling. Entries whose key lock is currently held are skipped so an
    /// in-flight read is never pulled out from under a caller.
    pub async fn sweep(self: &Arc<Self>) -> Result<u64, CacheError> {
        let mut entries = Vec::new();
        let mut total: u64 = 0;

        let mut interfaces = tokio::fs::read_dir(&self.root).await?;
        while let Some(dir_entry) = interfaces.next_entry().await? {
            if !dir_entry.file_type().await?.is_dir() {
                continue;
            }
            let interface = dir_entry.file_name().to_string_lossy().to_string();
            let mut files = tokio::fs::read_dir(dir_entry.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                    continue;
                }
                let meta_path = path.with_extension("meta");
                let bin_len = file.metadata().await.map(|m| m.len()).unwrap_or(0);
                let meta_len = tokio::fs::metadata(&meta_path)
                    .await
                    .map(|m| m.len())
                    .unwrap_or(0);
                let last_access = match tokio::fs::read(&meta_path).await {
                    Ok(bytes) => serde_json::from_slice::<EntryMeta>(&bytes)
                        .map(|m| m.last_access)
                        .unwrap_or(0),
                    Err(_) => 0,
                };
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                total += bin_len + meta_len;
                entries.push(SweepCandidate {
                    lock_key: format!("{interface}/{stem}"),
                    bin_path: path,
                    meta_path,
                    bytes: bin_len + meta_len,
                    last_access,
                });
            }
        }

        if total <= self.ceiling_bytes {
            return Ok(0);
        }

        entries.sort_by_key(|e| e.last_access);
        let mut evicted = 0;
        for candidate in entries {
            if total <= self.ceiling_bytes {
                break;
            }
            // Respect in-flight readers holding the key lock.
            if let Some(lock) = self.locks.get(&candidate.lock_key).map(|l| l.clone()) {
                let Ok(_guard) = lock.try_lock() else {
                    continue;
                };
                tokio::fs::remove_file(&candidate.bin_path).await?;
                let _ = tokio::fs::remove_file(&candidate.meta_path).await;
            } else {
                tokio::fs::remove_file(&candidate.bin_path).await?;
                let _ = tokio::fs::remove_file(&candidate.meta_path).await;
            }
            self.locks.remove(&candidate.lock_key);
            total = total.saturating_sub(candidate.bytes);
            evicted += 1;
        }
        Ok(evicted)
    }
}

struct SweepCandidate {
    lock_key: String,
    bin_path: PathBuf,
    meta_path: PathBuf,
    bytes: u64,
    last_access: i64,
}

/// Freshness rule: results whose `end_date` lies strictly before today are
/// immutable history and never expire; anything touching today or the
/// future is only valid on the local calendar day it was stored.
fn is_fresh(params: &Map<String, Value>, stored_at: i64, now: DateTime<Local>) -> bool {
    if let Some(end) = params.get("end_date").map(scalar_text) {
        if let Some(end_date) = parse_calendar_date(&end) {
            if end_date < now.date_naive() {
                return true;
            }
        }
    }
    match Local.timestamp_opt(stored_at, 0).single() {
        Some(stored) => stored.date_naive() == now.date_naive(),
        None => false,
    }
}

fn parse_calendar_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y-%m-%d"))
        .ok()
}
