//! Time-bounded snapshot cache with single-flight refresh coordination.
//!
//! [`SnapshotCache`] holds the last snapshot fetched from a slow upstream
//! source plus the access credential, and tracks how stale they are. Any
//! number of readers may serve the stale snapshot while exactly one caller
//! repopulates it; claiming that role is the job of
//! [`RefreshClaim`](refresh::RefreshClaim).
//!
//! # Design
//!
//! All fields live behind one mutex, accessed through the scoped
//! [`CacheGuard`] returned by [`SnapshotCache::lock`]. The lock is only ever
//! held for field reads and writes, never across an await and never while
//! the actual fetch runs. Time is measured with [`tokio::time::Instant`] so
//! every expiry property is testable under a paused clock.

pub mod refresh;

pub use refresh::{RefreshClaim, RefreshOutcome, read_fresh, refresh_with};

use crate::config::CacheConfig;
use crate::credentials::AccessToken;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default multiple of the TTL after which an in-flight refresh counts as
/// stuck.
const DEFAULT_STUCK_MULTIPLIER: u32 = 2;

/// Default interval between completion polls while another refresh runs.
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Fields guarded by the cache mutex.
struct CacheInner<S> {
    /// Last successfully fetched snapshot. Replaced, never mutated in place.
    snapshot: Option<S>,
    /// Last known access credential. Independent lifetime from `snapshot`:
    /// login stores it before the first fetch ever completes.
    credential: Option<AccessToken>,
    /// When `update` last ran. Construction counts as the start of the first
    /// validity window.
    last_updated: Instant,
    /// Configured validity window.
    ttl: Duration,
    /// Start time of the in-flight refresh; `None` when no refresh is
    /// claimed.
    refresh_started: Option<Instant>,
    /// Stuck-refresh threshold, as a multiple of `ttl`.
    stuck_multiplier: u32,
}

/// Shared cache of the last upstream snapshot.
///
/// One instance serves the whole process; construct it at the composition
/// root and hand out `Arc` clones to whoever reads or refreshes it.
pub struct SnapshotCache<S> {
    inner: Mutex<CacheInner<S>>,
    /// Sleep between polls in `wait_for_completion`. Lives outside the mutex
    /// so waiters read it without taking the lock.
    poll_interval: Duration,
}

impl<S> SnapshotCache<S> {
    /// Create a cache whose snapshots are served as fresh for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                snapshot: None,
                credential: None,
                last_updated: Instant::now(),
                ttl,
                refresh_started: None,
                stuck_multiplier: DEFAULT_STUCK_MULTIPLIER,
            }),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    /// Create a cache from configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl())
            .with_stuck_multiplier(config.stuck_multiplier)
            .with_poll_interval(config.poll_interval())
    }

    /// Override the stuck-refresh multiplier (minimum 1).
    #[must_use]
    pub fn with_stuck_multiplier(self, multiplier: u32) -> Self {
        self.lock_inner().stuck_multiplier = multiplier.max(1);
        self
    }

    /// Override the completion poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Acquire the cache lock for a read/write session.
    ///
    /// The guard releases the lock on every exit path, including panics.
    pub fn lock(&self) -> CacheGuard<'_, S> {
        CacheGuard {
            cache: self,
            inner: self.lock_inner(),
        }
    }

    /// Lock the inner state, recovering from poisoning.
    ///
    /// Every mutation under the lock is a whole-field replacement, so a
    /// poisoned guard still holds consistent state.
    fn lock_inner(&self) -> MutexGuard<'_, CacheInner<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scoped access to the cache state.
///
/// All reads and writes go through this guard; dropping it releases the
/// lock.
pub struct CacheGuard<'a, S> {
    cache: &'a SnapshotCache<S>,
    inner: MutexGuard<'a, CacheInner<S>>,
}

impl<S> CacheGuard<'_, S> {
    /// Whether the cache needs a refresh from this caller's point of view.
    ///
    /// Within the TTL this is `false`. Past the TTL it is `true`, except
    /// while another refresh is in flight: then the caller should keep
    /// serving the existing snapshot (`false`) unless there is no snapshot
    /// to serve, or the flight has been running for `stuck_multiplier × ttl`
    /// and is force-cleared so a new claimer can take over.
    pub fn is_expired(&mut self) -> bool {
        let now = Instant::now();

        if now.duration_since(self.inner.last_updated) < self.inner.ttl {
            return false;
        }

        if let Some(started) = self.inner.refresh_started {
            let running = now.duration_since(started);
            if running >= self.inner.ttl * self.inner.stuck_multiplier {
                warn!(
                    "in-flight refresh stuck after {}s, force-clearing",
                    running.as_secs()
                );
                self.inner.refresh_started = None;
                return true;
            }
            // Serve stale while the other refresh finishes, unless there is
            // nothing usable to serve.
            return self.inner.snapshot.is_none();
        }

        true
    }

    /// Store a freshly fetched snapshot and start a new validity window.
    ///
    /// This also marks the in-flight refresh as complete; waiters observe
    /// the cleared flag on their next poll.
    pub fn update(&mut self, snapshot: S) {
        self.inner.snapshot = Some(snapshot);
        self.inner.refresh_started = None;
        self.inner.last_updated = Instant::now();
        debug!("snapshot updated");
    }

    /// Store a snapshot together with a new access credential.
    pub fn update_with_credential(&mut self, snapshot: S, credential: AccessToken) {
        self.inner.credential = Some(credential);
        self.update(snapshot);
    }

    /// Store an access credential without touching the snapshot.
    ///
    /// Used at login, before the first fetch has produced anything.
    pub fn set_credential(&mut self, credential: AccessToken) {
        self.inner.credential = Some(credential);
    }

    /// The current snapshot, if any.
    pub fn snapshot(&self) -> Option<S>
    where
        S: Clone,
    {
        self.inner.snapshot.clone()
    }

    /// The stored access credential, if any.
    pub fn credential(&self) -> Option<AccessToken> {
        self.inner.credential.clone()
    }

    /// Time since the last successful update (or construction).
    pub fn age(&self) -> Duration {
        Instant::now().duration_since(self.inner.last_updated)
    }

    /// Whether a refresh is currently claimed as in flight.
    pub fn refresh_in_flight(&self) -> bool {
        self.inner.refresh_started.is_some()
    }
}
