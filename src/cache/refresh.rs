//! Single-flight refresh claims and the refresh driver.
//!
//! When the cache expires, many callers may notice at once. Exactly one of
//! them should hit the upstream source; the rest keep serving the stale
//! snapshot or wait for the winner to finish. [`RefreshClaim::begin`] settles
//! the race under the cache lock, and [`refresh_with`] / [`read_fresh`] wrap
//! the claim, the fetch and the store into one call.

use super::{CacheGuard, SnapshotCache};
use crate::error::Result;
use crate::fetch::Fetcher;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Outcome of a coordinated refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// This caller won the claim, fetched and stored a new snapshot.
    Refreshed,
    /// Another caller already had the refresh in flight; this caller waited
    /// for it instead of fetching.
    AwaitedOther,
}

/// A claim on the right to refresh the cache.
///
/// Created with [`begin`](Self::begin) while holding the cache lock; the
/// guard is consumed so the claim decision and the flag write are one
/// critical section. If this claim won, dropping it without calling
/// [`CacheGuard::update`] releases the in-flight flag so a failed fetch
/// never wedges the cache.
#[must_use = "dropping the claim immediately releases the in-flight flag"]
pub struct RefreshClaim<'a, S> {
    cache: &'a SnapshotCache<S>,
    /// The flag value we wrote, or `None` if another refresh was already in
    /// flight. Drop only clears the flag while it still holds this exact
    /// stamp, so a late drop cannot stomp a successor's claim.
    claimed: Option<Instant>,
}

impl<'a, S> RefreshClaim<'a, S> {
    /// Attempt to claim the refresh, consuming the lock guard.
    ///
    /// The first caller to get here after expiry wins and marks the refresh
    /// as in flight; everyone else gets a claim that reports
    /// [`started_elsewhere`](Self::started_elsewhere).
    pub fn begin(mut guard: CacheGuard<'a, S>) -> Self {
        let claimed = if guard.inner.refresh_started.is_none() {
            let now = Instant::now();
            guard.inner.refresh_started = Some(now);
            Some(now)
        } else {
            None
        };
        Self {
            cache: guard.cache,
            claimed,
        }
    }

    /// Whether another caller already had the refresh in flight.
    pub fn started_elsewhere(&self) -> bool {
        self.claimed.is_none()
    }

    /// Wait until the in-flight refresh completes.
    ///
    /// Polls the flag between short sleeps; the lock is never held while
    /// sleeping. Returns immediately if no refresh is in flight.
    pub async fn wait_for_completion(&self) {
        debug_assert!(
            self.started_elsewhere(),
            "the winning claimer refreshes instead of waiting"
        );
        loop {
            if self.cache.lock_inner().refresh_started.is_none() {
                return;
            }
            tokio::time::sleep(self.cache.poll_interval).await;
        }
    }

    /// Like [`wait_for_completion`](Self::wait_for_completion) but gives up
    /// after `timeout`. Returns `true` if the refresh completed in time.
    pub async fn wait_for_completion_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_for_completion())
            .await
            .is_ok()
    }
}

impl<S> Drop for RefreshClaim<'_, S> {
    fn drop(&mut self) {
        let Some(started) = self.claimed else {
            return;
        };
        let mut inner = self.cache.lock_inner();
        // A successful update already cleared the flag, and a force-clear may
        // have handed it to a new claimer. Only release our own stamp.
        if inner.refresh_started == Some(started) {
            inner.refresh_started = None;
            debug!("refresh claim released without an update");
        }
    }
}

/// Refresh the cache through `fetcher`, coordinating with concurrent
/// callers.
///
/// Call this once the cache is known to be expired. If another refresh is in
/// flight this waits for it and returns [`RefreshOutcome::AwaitedOther`];
/// otherwise it fetches, stores the snapshot and returns
/// [`RefreshOutcome::Refreshed`]. A fetch error propagates to the winning
/// caller only, after the in-flight flag has been released.
pub async fn refresh_with<S, F>(cache: &SnapshotCache<S>, fetcher: &F) -> Result<RefreshOutcome>
where
    F: Fetcher<Snapshot = S> + ?Sized,
{
    let claim = RefreshClaim::begin(cache.lock());

    if claim.started_elsewhere() {
        debug!("refresh already in flight; awaiting completion");
        claim.wait_for_completion().await;
        return Ok(RefreshOutcome::AwaitedOther);
    }

    // The fetch runs without the lock. On error the claim's Drop releases
    // the in-flight flag.
    let snapshot = fetcher.fetch().await?;
    cache.lock().update(snapshot);
    Ok(RefreshOutcome::Refreshed)
}

/// Read a fresh snapshot, refreshing through `fetcher` if needed.
///
/// Fresh cache: returns the snapshot without touching the source. Expired
/// with another refresh in flight: waits, then returns whatever is stored.
/// Expired otherwise: fetches, stores and returns the new snapshot.
pub async fn read_fresh<S, F>(cache: &SnapshotCache<S>, fetcher: &F) -> Result<Option<S>>
where
    S: Clone,
    F: Fetcher<Snapshot = S> + ?Sized,
{
    let claim = {
        let mut guard = cache.lock();
        if !guard.is_expired() {
            return Ok(guard.snapshot());
        }
        RefreshClaim::begin(guard)
    };

    if claim.started_elsewhere() {
        claim.wait_for_completion().await;
        return Ok(cache.lock().snapshot());
    }

    let snapshot = fetcher.fetch().await?;
    let mut guard = cache.lock();
    guard.update(snapshot);
    Ok(guard.snapshot())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use tokio::time::advance;

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test(start_paused = true)]
    async fn first_claim_wins_and_later_claims_observe_it() {
        let cache: SnapshotCache<u32> = SnapshotCache::new(TTL);
        advance(TTL).await;

        let winner = RefreshClaim::begin(cache.lock());
        assert!(!winner.started_elsewhere());

        let loser = RefreshClaim::begin(cache.lock());
        assert!(loser.started_elsewhere());

        drop(loser);
        // The loser's drop must not release the winner's flag.
        assert!(cache.lock().refresh_in_flight());
        drop(winner);
        assert!(!cache.lock().refresh_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_winning_claim_releases_the_flag() {
        let cache: SnapshotCache<u32> = SnapshotCache::new(TTL);
        advance(TTL).await;

        {
            let claim = RefreshClaim::begin(cache.lock());
            assert!(!claim.started_elsewhere());
            assert!(cache.lock().refresh_in_flight());
        }
        assert!(!cache.lock().refresh_in_flight());

        // The cache is claimable again.
        let claim = RefreshClaim::begin(cache.lock());
        assert!(!claim.started_elsewhere());
    }

    #[tokio::test(start_paused = true)]
    async fn update_then_drop_does_not_clear_a_successors_claim() {
        let cache: SnapshotCache<u32> = SnapshotCache::new(TTL);
        advance(TTL).await;

        let first = RefreshClaim::begin(cache.lock());
        cache.lock().update(1);

        // A new claim starts before the first claim is dropped.
        advance(TTL).await;
        let second = RefreshClaim::begin(cache.lock());
        assert!(!second.started_elsewhere());

        drop(first);
        assert!(
            cache.lock().refresh_in_flight(),
            "stale claim drop must not release the new flight"
        );
        drop(second);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_returns_once_the_refresh_completes() {
        let cache = std::sync::Arc::new(SnapshotCache::<u32>::new(TTL));
        advance(TTL).await;

        let winner = RefreshClaim::begin(cache.lock());
        assert!(!winner.started_elsewhere());

        let waiter_cache = cache.clone();
        let waiter = tokio::spawn(async move {
            let claim = RefreshClaim::begin(waiter_cache.lock());
            assert!(claim.started_elsewhere());
            claim.wait_for_completion().await;
            waiter_cache.lock().snapshot()
        });

        advance(Duration::from_secs(1)).await;
        cache.lock().update(9);
        drop(winner);

        assert_eq!(waiter.await.unwrap(), Some(9));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_with_timeout_reports_incomplete_refreshes() {
        let cache: SnapshotCache<u32> = SnapshotCache::new(TTL);
        advance(TTL).await;

        let winner = RefreshClaim::begin(cache.lock());
        let waiter = RefreshClaim::begin(cache.lock());
        assert!(waiter.started_elsewhere());

        assert!(
            !waiter
                .wait_for_completion_timeout(Duration::from_secs(2))
                .await
        );

        cache.lock().update(3);
        assert!(
            waiter
                .wait_for_completion_timeout(Duration::from_secs(2))
                .await
        );
        drop(winner);
    }
}
