use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tokio::sync::RwLock;

use crate::config::CacheConfig;
use crate::scm::types::ChangedFile;
use crate::settings::types::EffectiveSettings;

/// Memoizes analysis results so a retried delivery or an identical re-run
/// never repeats the expensive upstream call.
///
/// The primary backend is a shared SQLite store; when it is unreachable at
/// startup or at call time, a process-local bounded map with the same TTL
/// semantics takes over. Every operation is best-effort: read errors are
/// misses, write errors are swallowed. The review pipeline never fails, and
/// never produces different results, because the cache is degraded.
#[derive(Clone)]
pub struct AnalysisCache {
    primary: Option<SqlitePool>,
    fallback: Arc<RwLock<HashMap<String, FallbackEntry>>>,
    max_entries: usize,
}

#[derive(Clone)]
struct FallbackEntry {
    value: String,
    expires_at: Instant,
}

impl AnalysisCache {
    /// Connect the primary backend. Connection failure is logged and leaves
    /// the cache in fallback-only mode; construction itself never fails.
    pub async fn connect(config: &CacheConfig) -> Self {
        let primary = match &config.url {
            Some(url) => match Self::connect_primary(url).await {
                Ok(pool) => Some(pool),
                Err(e) => {
                    tracing::warn!(error = %e, "Cache store unreachable, using in-process fallback");
                    None
                }
            },
            None => None,
        };

        Self {
            primary,
            fallback: Arc::new(RwLock::new(HashMap::new())),
            max_entries: config.max_entries,
        }
    }

    async fn connect_primary(url: &str) -> sqlx::Result<SqlitePool> {
        let options = sqlx::sqlite::SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS analysis_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(pool)
    }

    /// In-process-only cache for tests and for deployments without a shared
    /// store configured.
    pub fn unconnected(max_entries: usize) -> Self {
        Self {
            primary: None,
            fallback: Arc::new(RwLock::new(HashMap::new())),
            max_entries,
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        if let Some(pool) = &self.primary {
            match sqlx::query_as::<_, (String, i64)>(
                "SELECT value, expires_at FROM analysis_cache WHERE key = ?",
            )
            .bind(key)
            .fetch_optional(pool)
            .await
            {
                Ok(Some((value, expires_at))) => {
                    if expires_at > unix_now() {
                        return Some(value);
                    }
                    // Expired rows are removed lazily here and by the sweeper
                    let _ = sqlx::query("DELETE FROM analysis_cache WHERE key = ?")
                        .bind(key)
                        .execute(pool)
                        .await;
                    return None;
                }
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!(error = %e, "Cache read failed, treating as miss");
                }
            }
        }

        let fallback = self.fallback.read().await;
        fallback
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) {
        if let Some(pool) = &self.primary {
            let expires_at = unix_now() + ttl.as_secs() as i64;
            let result = sqlx::query(
                "INSERT INTO analysis_cache (key, value, expires_at) VALUES (?, ?, ?)
                 ON CONFLICT (key) DO UPDATE
                 SET value = excluded.value, expires_at = excluded.expires_at",
            )
            .bind(key)
            .bind(value)
            .bind(expires_at)
            .execute(pool)
            .await;
            match result {
                Ok(_) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "Cache write failed, falling back to local map");
                }
            }
        }

        let mut fallback = self.fallback.write().await;
        if fallback.len() >= self.max_entries && !fallback.contains_key(key) {
            evict_one(&mut fallback);
        }
        fallback.insert(
            key.to_string(),
            FallbackEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub async fn invalidate(&self, key: &str) {
        if let Some(pool) = &self.primary {
            if let Err(e) = sqlx::query("DELETE FROM analysis_cache WHERE key = ?")
                .bind(key)
                .execute(pool)
                .await
            {
                tracing::warn!(error = %e, "Cache invalidation failed");
            }
        }
        self.fallback.write().await.remove(key);
    }

    /// Evict expired entries from both backends. Run from the periodic
    /// sweeper task.
    pub async fn sweep(&self) {
        if let Some(pool) = &self.primary {
            if let Err(e) = sqlx::query("DELETE FROM analysis_cache WHERE expires_at <= ?")
                .bind(unix_now())
                .execute(pool)
                .await
            {
                tracing::warn!(error = %e, "Cache sweep failed on primary store");
            }
        }

        let now = Instant::now();
        let mut fallback = self.fallback.write().await;
        fallback.retain(|_, entry| entry.expires_at > now);
    }

    /// Spawn the periodic sweeper for this cache instance.
    pub fn spawn_sweeper(&self, interval: Duration) {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.sweep().await;
            }
        });
    }

    pub async fn close(&self) {
        if let Some(pool) = &self.primary {
            pool.close().await;
        }
    }
}

/// Derive the cache key for an analysis request: a stable hash over the
/// sorted (filename, patch) pairs combined with a hash of the effective
/// settings, so identical diffs under different settings never collide.
pub fn cache_key(files: &[ChangedFile], settings: &EffectiveSettings) -> String {
    let mut sorted: Vec<&ChangedFile> = files.iter().collect();
    sorted.sort_by(|a, b| a.filename.cmp(&b.filename));

    let mut hasher = Sha256::new();
    for file in sorted {
        hasher.update(file.filename.as_bytes());
        hasher.update([0]);
        if let Some(patch) = &file.patch {
            hasher.update(patch.as_bytes());
        }
        hasher.update([0]);
    }
    hasher.update(settings.severity_threshold.as_str().as_bytes());
    for category in &settings.enabled_categories {
        hasher.update(category.as_str().as_bytes());
        hasher.update([0]);
    }
    for item in settings.ignored_files.iter().chain(&settings.ignored_patterns) {
        hasher.update(item.as_bytes());
        hasher.update([0]);
    }
    // HashMap iteration order is unstable; fold language profiles in sorted
    let mut languages: Vec<_> = settings.languages.iter().collect();
    languages.sort_by(|a, b| a.0.cmp(b.0));
    for (lang, profile) in languages {
        hasher.update(lang.as_bytes());
        hasher.update([profile.enabled as u8]);
        hasher.update(profile.max_file_size_bytes.to_le_bytes());
    }

    hex::encode(hasher.finalize())
}

fn evict_one(map: &mut HashMap<String, FallbackEntry>) {
    // Prefer dropping the entry closest to expiry
    if let Some(key) = map
        .iter()
        .min_by_key(|(_, entry)| entry.expires_at)
        .map(|(k, _)| k.clone())
    {
        map.remove(&key);
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
