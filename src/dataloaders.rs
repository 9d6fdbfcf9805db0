//! DataLoader utilities for batch loading
///
/// Implements the DataLoader pattern: loads issued within one coalescing
/// window are handed to a [`BatchLoader`] together, identical keys share a
/// single in-flight request, and successful values are cached for the
/// lifetime of the loader. Failures are delivered per key and never cached.
/// See: https://github.com/graphql/dataloader

use async_trait::async_trait;
use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::{ApiError, Result};

/// Default coalescing window
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(1);

/// Batch loader trait for loading multiple items at once
#[async_trait]
pub trait BatchLoader<K, V>: Send + Sync
where
    K: Send + Sync + Clone + Eq + Hash,
    V: Send + Sync + Clone,
{
    /// Load batch of items by keys
    ///
    /// Every key should have an entry in the returned map. One key failing
    /// must not fail its siblings, so results are reported per key.
    async fn load_batch(&self, keys: &[K]) -> HashMap<K, Result<V>>;
}

type SharedLoad<V> = Shared<BoxFuture<'static, Result<V>>>;

struct LoaderState<K, V> {
    cache: HashMap<K, V>,
    in_flight: HashMap<K, SharedLoad<V>>,
    pending: Vec<(K, oneshot::Sender<Result<V>>)>,
}

impl<K, V> Default for LoaderState<K, V> {
    fn default() -> Self {
        Self {
            cache: HashMap::new(),
            in_flight: HashMap::new(),
            pending: Vec::new(),
        }
    }
}

/// DataLoader with caching and batching
///
/// Cloning is cheap and clones share the same cache.
pub struct DataLoader<K, V, L>
where
    K: Send + Sync + Clone + Eq + Hash + 'static,
    V: Send + Sync + Clone + 'static,
    L: BatchLoader<K, V> + 'static,
{
    loader: Arc<L>,
    state: Arc<Mutex<LoaderState<K, V>>>,
    delay: Duration,
}

impl<K, V, L> DataLoader<K, V, L>
where
    K: Send + Sync + Clone + Eq + Hash + 'static,
    V: Send + Sync + Clone + 'static,
    L: BatchLoader<K, V> + 'static,
{
    /// Create new DataLoader with a batch loader
    pub fn new(loader: L) -> Self {
        Self {
            loader: Arc::new(loader),
            state: Arc::new(Mutex::new(LoaderState::default())),
            delay: DEFAULT_BATCH_DELAY,
        }
    }

    /// Set the coalescing window. Zero waits for a single scheduler yield.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Access the underlying batch loader
    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Load a single item by key
    ///
    /// Served from cache when possible, otherwise joins the in-flight load
    /// for the key or enqueues it into the current batch window.
    pub async fn load(&self, key: K) -> Result<V> {
        let shared = {
            let mut state = self.state.lock().await;

            if let Some(value) = state.cache.get(&key) {
                return Ok(value.clone());
            }

            match state.in_flight.get(&key) {
                Some(shared) => shared.clone(),
                None => {
                    let (tx, rx) = oneshot::channel();
                    let shared = rx
                        .map(|received| {
                            received.unwrap_or_else(|_| {
                                Err(ApiError::BatchDropped("batch task ended".to_string()))
                            })
                        })
                        .boxed()
                        .shared();

                    state.in_flight.insert(key.clone(), shared.clone());
                    let opens_window = state.pending.is_empty();
                    state.pending.push((key, tx));
                    if opens_window {
                        self.schedule_dispatch();
                    }
                    shared
                }
            }
        };

        shared.await
    }

    /// Load multiple items by keys
    ///
    /// Results are returned in key order; each key succeeds or fails on its own.
    pub async fn load_many(&self, keys: Vec<K>) -> Vec<Result<V>> {
        join_all(keys.into_iter().map(|key| self.load(key))).await
    }

    /// Clear the cache
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.cache.clear();
    }

    /// Drop a single cached value
    pub async fn clear_key(&self, key: &K) {
        let mut state = self.state.lock().await;
        state.cache.remove(key);
    }

    /// Prime the cache with a value
    ///
    /// Useful for seeding the cache with data you already have.
    pub async fn prime(&self, key: K, value: V) {
        let mut state = self.state.lock().await;
        state.cache.insert(key, value);
    }

    fn schedule_dispatch(&self) {
        let loader = Arc::clone(&self.loader);
        let state = Arc::clone(&self.state);
        let delay = self.delay;

        tokio::spawn(async move {
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }

            // Later loads open a new window from here on.
            let batch = std::mem::take(&mut state.lock().await.pending);
            Self::dispatch(loader, state, batch).await;
        });
    }

    async fn dispatch(
        loader: Arc<L>,
        state: Arc<Mutex<LoaderState<K, V>>>,
        batch: Vec<(K, oneshot::Sender<Result<V>>)>,
    ) {
        if batch.is_empty() {
            return;
        }

        let keys: Vec<K> = batch.iter().map(|(key, _)| key.clone()).collect();
        debug!(keys = keys.len(), "dispatching batch");

        let mut results = match AssertUnwindSafe(loader.load_batch(&keys))
            .catch_unwind()
            .await
        {
            Ok(results) => results,
            Err(_) => {
                warn!(keys = keys.len(), "batch loader panicked");
                HashMap::new()
            }
        };

        let mut replies = Vec::with_capacity(batch.len());
        {
            let mut state = state.lock().await;
            for (key, tx) in batch {
                let result = results.remove(&key).unwrap_or_else(|| {
                    Err(ApiError::BatchDropped(
                        "batch loader returned no result".to_string(),
                    ))
                });
                state.in_flight.remove(&key);
                if let Ok(value) = &result {
                    state.cache.insert(key, value.clone());
                }
                replies.push((tx, result));
            }
        }

        for (tx, result) in replies {
            // The receiver is gone only if every waiter was dropped.
            let _ = tx.send(result);
        }
    }
}

impl<K, V, L> Clone for DataLoader<K, V, L>
where
    K: Send + Sync + Clone + Eq + Hash + 'static,
    V: Send + Sync + Clone + 'static,
    L: BatchLoader<K, V> + 'static,
{
    fn clone(&self) -> Self {
        Self {
            loader: self.loader.clone(),
            state: self.state.clone(),
            delay: self.delay,
        }
    }
}
