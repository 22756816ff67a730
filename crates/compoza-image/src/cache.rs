//! In-memory update-check cache with in-flight tracking
//!
//! One [`UpdateCache`] is built at startup and handed to the checker. It
//! holds the last result per image and the set of images currently being
//! checked. Time comes from an injectable clock so TTL behaviour is testable.

use crate::detached::{spawn_detached, Detached};
use chrono::{DateTime, TimeDelta, Utc};
use compoza_core::types::UpdateCheckConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source of "now"
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Outcome of the last check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Checked,
    #[default]
    Unknown,
    Error,
}

/// Progress of the asynchronous digest -> version lookup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Pending,
    #[default]
    Resolved,
    Failed,
}

/// One image's cached check result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedUpdate {
    pub image: String,
    pub update_available: bool,
    pub status: CheckStatus,
    /// Stamped by [`UpdateCache::set_cached_update`]
    pub checked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    pub version_status: VersionStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Written after a registry 429; re-checked on the longer back-off
    #[serde(default)]
    pub rate_limited: bool,
}

impl CachedUpdate {
    pub fn new(image: impl Into<String>, status: CheckStatus) -> Self {
        Self {
            image: image.into(),
            status,
            ..Default::default()
        }
    }
}

/// Timing knobs, taken from `update-check` configuration
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub rate_limited_ttl: Duration,
    pub recheck_interval: Duration,
    pub pending_timeout: Duration,
    pub sweep_interval: Duration,
}

impl From<&UpdateCheckConfig> for CacheSettings {
    fn from(config: &UpdateCheckConfig) -> Self {
        Self {
            ttl: config.cache_ttl(),
            rate_limited_ttl: config.rate_limited_ttl(),
            recheck_interval: config.recheck_interval(),
            pending_timeout: config.pending_timeout(),
            sweep_interval: config.sweep_interval(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from(&UpdateCheckConfig::default())
    }
}

/// What one sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub expired_entries: usize,
    pub stale_pending: usize,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CachedUpdate>,
    pending: HashMap<String, DateTime<Utc>>,
}

fn delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

pub struct UpdateCache {
    state: Mutex<CacheState>,
    settings: CacheSettings,
    clock: Clock,
}

impl std::fmt::Debug for UpdateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("UpdateCache")
            .field("entries", &state.entries.len())
            .field("pending", &state.pending.len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl UpdateCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self::with_clock(settings, Arc::new(Utc::now))
    }

    pub fn with_clock(settings: CacheSettings, clock: Clock) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            settings,
            clock,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Entry for `image` if it has not expired
    pub fn get_cached_update(&self, image: &str) -> Option<CachedUpdate> {
        let now = self.now();
        let mut state = self.state.lock();
        match state.entries.get(image) {
            Some(entry) if now < entry.expires_at => Some(entry.clone()),
            Some(_) => {
                state.entries.remove(image);
                None
            }
            None => None,
        }
    }

    /// Store `entry`, stamping it now and expiring it after `ttl` (default TTL when `None`)
    pub fn set_cached_update(&self, mut entry: CachedUpdate, ttl: Option<Duration>) {
        let now = self.now();
        entry.checked_at = now;
        entry.expires_at = now
            .checked_add_signed(delta(ttl.unwrap_or(self.settings.ttl)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        debug!(
            "Caching {} (status {:?}, update {}) until {}",
            entry.image, entry.status, entry.update_available, entry.expires_at
        );
        self.state.lock().entries.insert(entry.image.clone(), entry);
    }

    /// Whether a new registry lookup should start for `image`
    ///
    /// False while a check is in flight. Otherwise true when nothing valid is
    /// cached or the entry is older than the re-check interval (the longer
    /// rate-limit back-off for entries written after a 429).
    pub fn should_check_image(&self, image: &str) -> bool {
        let now = self.now();
        self.needs_check(&self.state.lock(), image, now)
    }

    /// [`should_check_image`](Self::should_check_image) and
    /// [`mark_check_pending`](Self::mark_check_pending) under one lock
    ///
    /// Returns true when the caller now owns the check for `image`.
    pub fn begin_check(&self, image: &str) -> bool {
        let now = self.now();
        let mut state = self.state.lock();
        if !self.needs_check(&state, image, now) {
            return false;
        }
        state.pending.insert(image.to_string(), now);
        true
    }

    fn needs_check(&self, state: &CacheState, image: &str, now: DateTime<Utc>) -> bool {
        if let Some(started) = state.pending.get(image) {
            if now - *started < delta(self.settings.pending_timeout) {
                return false;
            }
        }

        match state.entries.get(image) {
            None => true,
            Some(entry) if now >= entry.expires_at => true,
            Some(entry) => {
                let interval = if entry.rate_limited {
                    self.settings.rate_limited_ttl
                } else {
                    self.settings.recheck_interval
                };
                now - entry.checked_at >= delta(interval)
            }
        }
    }

    /// Record that a check for `image` has started
    pub fn mark_check_pending(&self, image: &str) {
        let now = self.now();
        self.state.lock().pending.insert(image.to_string(), now);
    }

    pub fn mark_check_complete(&self, image: &str) {
        self.state.lock().pending.remove(image);
    }

    pub fn is_check_pending(&self, image: &str) -> bool {
        self.state.lock().pending.contains_key(image)
    }

    /// Attach resolved versions; a missing entry is left missing
    pub fn update_cached_versions(
        &self,
        image: &str,
        current_version: Option<String>,
        latest_version: Option<String>,
    ) {
        if let Some(entry) = self.state.lock().entries.get_mut(image) {
            entry.current_version = current_version;
            entry.latest_version = latest_version;
            entry.version_status = VersionStatus::Resolved;
        }
    }

    pub fn mark_version_resolution_failed(&self, image: &str) {
        if let Some(entry) = self.state.lock().entries.get_mut(image) {
            entry.version_status = VersionStatus::Failed;
        }
    }

    /// Drop entries for `images`, or everything when `None`
    pub fn clear_cached_updates(&self, images: Option<&[String]>) {
        let mut state = self.state.lock();
        match images {
            Some(images) => {
                for image in images {
                    state.entries.remove(image);
                }
                debug!("Cleared cached updates for {} image(s)", images.len());
            }
            None => {
                state.entries.clear();
                debug!("Cleared all cached updates");
            }
        }
    }

    /// All unexpired entries
    pub fn entries(&self) -> Vec<CachedUpdate> {
        let now = self.now();
        self.state
            .lock()
            .entries
            .values()
            .filter(|e| now < e.expires_at)
            .cloned()
            .collect()
    }

    /// Evict expired entries and clear in-flight markers older than the pending timeout
    pub fn sweep(&self) -> SweepStats {
        let now = self.now();
        let pending_timeout = delta(self.settings.pending_timeout);
        let mut state = self.state.lock();

        let entries_before = state.entries.len();
        state.entries.retain(|_, e| now < e.expires_at);

        let mut stale = Vec::new();
        state.pending.retain(|image, started| {
            let keep = now - *started < pending_timeout;
            if !keep {
                stale.push(image.clone());
            }
            keep
        });
        for image in &stale {
            warn!("Check for {} did not finish within the pending timeout; releasing it", image);
        }

        SweepStats {
            expired_entries: entries_before - state.entries.len(),
            stale_pending: stale.len(),
        }
    }

    /// Run [`sweep`](Self::sweep) on the configured interval until the cache is dropped
    pub fn spawn_sweeper(self: &Arc<Self>) -> Detached {
        let cache: Weak<Self> = Arc::downgrade(self);
        // interval() panics on a zero period
        let period = self.settings.sweep_interval.max(Duration::from_secs(1));

        spawn_detached("update-cache-sweeper", async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    info!("Update cache dropped, stopping sweeper");
                    return Ok(());
                };
                let stats = cache.sweep();
                if stats != SweepStats::default() {
                    debug!(
                        "Cache sweep evicted {} entries, released {} stuck checks",
                        stats.expired_entries, stats.stale_pending
                    );
                }
            }
        })
    }
}
