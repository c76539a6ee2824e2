use chrono::{DateTime, Utc};
use snh48_storage::MemberStore;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

pub use snh48_core::{
    FieldSpec, MemberRecord, Snapshot, MEMBERS_TABLE, MEMBER_FIELDS, MEMBER_SCHEMA,
};
pub use snh48_remote::{
    HttpMemberSource, HttpSourceConfig, MemberSource, RemoteError, DEFAULT_API_URL,
    DEFAULT_TIMEOUT_SECS,
};
pub use snh48_storage::{CacheError, QueryRow, SnapshotCache, StoreError, DEFAULT_CACHE_FILE};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Default)]
struct RefreshState {
    last_refresh: Option<Instant>,
    last_refreshed_at: Option<DateTime<Utc>>,
}

impl RefreshState {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.last_refresh
            .map_or(true, |refreshed| refreshed.elapsed() >= ttl)
    }
}

/// Owns the active member store and decides when it is rebuilt.
///
/// Refreshes are serialized on `refresh`; `active` is only locked to run a
/// query or to swap in a fully built replacement, so readers see either the
/// previous table or the new one and never a partial build.
pub struct Roster {
    source: Box<dyn MemberSource>,
    cache: SnapshotCache,
    active: Mutex<MemberStore>,
    refresh: Mutex<RefreshState>,
}

impl Roster {
    /// Loads the cached snapshot, or fetches and caches one when no cache
    /// exists. Fails rather than starting without data.
    ///
    /// The roster starts stale either way, so the first
    /// [`Roster::refresh_if_stale`] always goes to the provider.
    pub fn open<S>(source: S, cache: SnapshotCache) -> Result<Self, RosterError>
    where
        S: MemberSource + 'static,
    {
        let mut state = RefreshState::default();
        let snapshot = if cache.exists() {
            cache.load()?
        } else {
            info!(
                event = "member_cache_missing",
                path = %cache.path().display()
            );
            let snapshot = source.fetch()?;
            cache.save(&snapshot)?;
            state.last_refreshed_at = Some(snapshot.fetched_at());
            snapshot
        };
        let store = MemberStore::from_snapshot(&snapshot)?;
        info!(
            event = "roster_ready",
            record_count = store.record_count(),
            snapshot_at = %snapshot.fetched_at()
        );

        Ok(Self {
            source: Box::new(source),
            cache,
            active: Mutex::new(store),
            refresh: Mutex::new(state),
        })
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// Refreshes from the provider when no refresh has happened yet since
    /// construction or the last one is at least `ttl` old. Returns whether a
    /// refresh ran. On failure the current data stays and the roster stays
    /// stale, so the next call retries.
    pub fn refresh_if_stale(&self, ttl: Duration) -> Result<bool, RosterError> {
        let mut state = lock(&self.refresh);
        if !state.is_stale(ttl) {
            return Ok(false);
        }
        self.refresh_locked(&mut state)?;
        Ok(true)
    }

    /// Unconditionally refetches, persists and rebuilds. Returns the new
    /// record count.
    pub fn force_refresh(&self) -> Result<usize, RosterError> {
        let mut state = lock(&self.refresh);
        self.refresh_locked(&mut state)
    }

    pub fn query(&self, sql: &str) -> Result<Vec<QueryRow>, RosterError> {
        Ok(lock(&self.active).query(sql)?)
    }

    pub fn record_count(&self) -> usize {
        lock(&self.active).record_count()
    }

    pub fn last_refreshed_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.refresh).last_refreshed_at
    }

    fn refresh_locked(&self, state: &mut RefreshState) -> Result<usize, RosterError> {
        let result = self.rebuild_from_source();
        match &result {
            Ok(record_count) => {
                state.last_refresh = Some(Instant::now());
                state.last_refreshed_at = Some(Utc::now());
                info!(event = "roster_refreshed", record_count = *record_count);
            }
            Err(err) => {
                warn!(
                    event = "roster_refresh_failed",
                    error = %err,
                    record_count = self.record_count()
                );
            }
        }
        result
    }

    fn rebuild_from_source(&self) -> Result<usize, RosterError> {
        let snapshot = self.source.fetch()?;
        self.cache.save(&snapshot)?;
        let store = MemberStore::from_snapshot(&snapshot)?;
        let record_count = store.record_count();

        let previous = {
            let mut active = lock(&self.active);
            std::mem::replace(&mut *active, store)
        };
        drop(previous);
        Ok(record_count)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
