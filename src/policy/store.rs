// Cached policy with single-flight refresh.
//
// The store hands out the cached policy while it is fresh. Once it goes
// stale, the first caller starts a refresh task and parks a shared handle to
// it in the state; every other caller that arrives while that handle exists
// awaits the same handle instead of issuing its own request. The refresh task
// clears the handle itself before publishing its result, so the next stale
// access always starts over.
//
// Failed refreshes are never cached: the previous policy is returned and
// `last_fetch` stays where it was, so the next stale access tries again.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::model::Policy;
use super::traits::PolicySource;
use crate::fail_open;
use crate::timeout::with_timeout;

/// A pending refresh that any number of callers can await.
type RefreshHandle = Shared<BoxFuture<'static, Arc<Policy>>>;

/// Process-lifetime policy cache for one client.
pub struct PolicyStore {
    source: Arc<dyn PolicySource>,
    refresh_interval: Duration,
    fetch_timeout: Duration,
    state: Arc<Mutex<PolicyFetchState>>,
}

struct PolicyFetchState {
    cached: Arc<Policy>,
    /// Set only by successful fetches.
    last_fetch: Option<Instant>,
    /// At most one refresh is ever in flight.
    in_flight: Option<RefreshHandle>,
}

impl PolicyFetchState {
    fn is_fresh(&self, refresh_interval: Duration) -> bool {
        self.last_fetch
            .is_some_and(|fetched_at| fetched_at.elapsed() <= refresh_interval)
    }
}

impl PolicyStore {
    /// Create a store seeded with the default policy and no fetch history,
    /// so the first access always refreshes.
    pub fn new(
        source: Arc<dyn PolicySource>,
        refresh_interval: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self::with_initial(source, refresh_interval, fetch_timeout, Policy::default())
    }

    /// Like [`PolicyStore::new`], but serves `initial` until the first
    /// successful refresh.
    pub fn with_initial(
        source: Arc<dyn PolicySource>,
        refresh_interval: Duration,
        fetch_timeout: Duration,
        initial: Policy,
    ) -> Self {
        Self {
            source,
            refresh_interval,
            fetch_timeout,
            state: Arc::new(Mutex::new(PolicyFetchState {
                cached: Arc::new(initial),
                last_fetch: None,
                in_flight: None,
            })),
        }
    }

    /// Return the cached policy if fresh, otherwise join (or start) the
    /// single in-flight refresh and return its result.
    ///
    /// Never fails: a refresh that errors, times out, or panics yields the
    /// previously cached policy.
    pub async fn current_or_refresh(&self) -> Arc<Policy> {
        let refresh = {
            let mut state = self.state.lock().await;
            if state.is_fresh(self.refresh_interval) {
                return Arc::clone(&state.cached);
            }

            match &state.in_flight {
                Some(pending) => {
                    debug!("Policy refresh already in flight, joining it");
                    pending.clone()
                }
                None => {
                    let pending = self.spawn_refresh(Arc::clone(&state.cached));
                    state.in_flight = Some(pending.clone());
                    pending
                }
            }
        }; // Lock is dropped here, before awaiting the refresh

        refresh.await
    }

    /// The cached policy, without checking freshness.
    pub async fn cached(&self) -> Arc<Policy> {
        Arc::clone(&self.state.lock().await.cached)
    }

    /// When the last successful fetch completed, if ever.
    pub async fn last_fetch(&self) -> Option<Instant> {
        self.state.lock().await.last_fetch
    }

    pub async fn is_refreshing(&self) -> bool {
        self.state.lock().await.in_flight.is_some()
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Spawn the refresh as its own task so it runs to completion (and clears
    /// the handle) even if every waiting caller is dropped.
    fn spawn_refresh(&self, previous: Arc<Policy>) -> RefreshHandle {
        let state = Arc::clone(&self.state);
        let task = tokio::spawn(refresh(
            Arc::clone(&self.source),
            Arc::clone(&self.state),
            self.fetch_timeout,
        ));

        async move {
            match task.await {
                Ok(policy) => policy,
                Err(err) => {
                    warn!(error = %err, "Policy refresh task did not complete");
                    state.lock().await.in_flight = None;
                    previous
                }
            }
        }
        .boxed()
        .shared()
    }
}

async fn refresh(
    source: Arc<dyn PolicySource>,
    state: Arc<Mutex<PolicyFetchState>>,
    fetch_timeout: Duration,
) -> Arc<Policy> {
    let fetched = fail_open::run("policy_refresh", None, async {
        let policy = with_timeout(fetch_timeout, None)
            .run(source.fetch_policy())
            .await?;
        Ok(Some(policy))
    })
    .await;

    let mut state = state.lock().await;
    state.in_flight = None;

    match fetched {
        Some(policy) => {
            info!(
                block_nsfw_images = policy.block_nsfw_images,
                nsfw_threshold = policy.nsfw_threshold,
                "Policy refreshed"
            );
            state.cached = Arc::new(policy);
            state.last_fetch = Some(Instant::now());
        }
        None => {
            debug!("Policy refresh failed, keeping previous policy");
        }
    }

    Arc::clone(&state.cached)
}
