use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::BoxFuture;
use sentry::{Hub, SentryFutureExt};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::HandlerCacheConfig;

use super::HandlerError;
use super::eviction::{EvictionSchedule, run_eviction};

/// The driver behind a [`HandlerCache`].
///
/// The driver derives cache keys from the caller's argument, resolves the configuration needed to
/// build a handler and finally builds it. The cache itself never inspects any of these types.
pub trait HandlerDriver: Send + Sync + 'static {
    /// Input argument to the driver.
    type Arg: Send + Sync;
    /// Cache key for the handler.
    type Key: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static;
    /// Everything needed to build a handler, as returned by [`resolve`](Self::resolve).
    type Config: Send;
    /// The handler that is being cached.
    type Handler: Send + Sync + 'static;

    /// Returns the cache key corresponding to the `arg`.
    fn cache_key(&self, arg: &Self::Arg) -> Self::Key;

    /// Resolves the configuration for the `arg`.
    ///
    /// Returns [`HandlerError::NotReady`] or [`HandlerError::NotFound`] for the expected cases in
    /// which no handler can be built yet.
    fn resolve<'a>(&'a self, arg: &'a Self::Arg)
    -> BoxFuture<'a, Result<Self::Config, HandlerError>>;

    /// Builds a new handler from the resolved `config`.
    ///
    /// All background work started on behalf of the handler must be bound to `context`. The
    /// context is cancelled once the handler has been evicted, or right away if building fails.
    fn build<'a>(
        &'a self,
        config: Self::Config,
        arg: &'a Self::Arg,
        context: CancellationToken,
    ) -> BoxFuture<'a, Result<Self::Handler, HandlerError>>;
}

/// A handler saved in the in-memory moka cache, together with its lifetime context.
pub(super) struct CachedHandler<H> {
    pub(super) handler: Arc<H>,
    pub(super) context: CancellationToken,
}

impl<H> Clone for CachedHandler<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            context: self.context.clone(),
        }
    }
}

pub(super) type InMemoryHandlers<K, H> = moka::future::Cache<K, CachedHandler<H>>;

/// A lazily populated cache of per-cluster handlers.
///
/// Handlers are built on first access and shared by all callers of the same key. Concurrent
/// misses for the same key are coalesced, so only one construction runs at a time and only one
/// handler becomes visible.
///
/// Every stored handler is evicted on a fixed schedule: it is hidden after
/// [`grace_period`](HandlerCacheConfig::grace_period), and its lifetime context is cancelled
/// once the [`drain_delay`](HandlerCacheConfig::drain_delay) has elapsed after that. Accesses do
/// not extend this schedule.
pub struct HandlerCache<D: HandlerDriver> {
    driver: D,
    config: HandlerCacheConfig,
    handlers: InMemoryHandlers<D::Key, D::Handler>,
    /// Tracks all spawned eviction schedules.
    evictions: TaskTracker,
    shutdown: CancellationToken,
}

impl<D: HandlerDriver> fmt::Debug for HandlerCache<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerCache")
            .field("config", &self.config)
            .field("in-memory handlers", &self.handlers.entry_count())
            .field("pending evictions", &self.evictions.len())
            .finish()
    }
}

impl<D: HandlerDriver> HandlerCache<D> {
    pub fn new(driver: D, config: HandlerCacheConfig) -> Self {
        let handlers = InMemoryHandlers::builder().name("handlers").build();

        Self {
            driver,
            config,
            handlers,
            evictions: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Returns the handler for `arg`, building it if necessary.
    ///
    /// Returns `None` if the configuration is not ready yet, the key is unknown, or resolving or
    /// building failed. Nothing is stored in those cases, so the next call tries again.
    pub async fn get(&self, arg: &D::Arg) -> Option<Arc<D::Handler>> {
        metric!(counter("handlers.access") += 1);

        if self.shutdown.is_cancelled() {
            return None;
        }

        let key = self.driver.cache_key(arg);
        if let Some(cached) = self.handlers.get(&key).await {
            metric!(counter("handlers.memory.hit") += 1);
            return Some(cached.handler);
        }

        let entry = self
            .handlers
            .entry_by_ref(&key)
            .or_optionally_insert_with(Box::pin(self.construct(arg, &key)))
            .await?;

        if entry.is_fresh() {
            self.schedule_eviction(key, entry.value().clone());
        } else {
            // another caller finished constructing while we were waiting for it
            metric!(counter("handlers.memory.hit") += 1);
        }

        Some(entry.into_value().handler)
    }

    /// Whether a handler for `key` is currently visible.
    pub fn contains(&self, key: &D::Key) -> bool {
        self.handlers.contains_key(key)
    }

    /// Stops all pending eviction schedules and tears down every stored handler.
    ///
    /// All handlers are hidden before their contexts are cancelled. Subsequent calls to
    /// [`get`](Self::get) return `None`.
    pub async fn shutdown(&self) {
        tracing::debug!(
            pending = self.evictions.len(),
            "Shutting down handler cache"
        );

        self.shutdown.cancel();
        self.evictions.close();
        self.evictions.wait().await;

        // handlers inserted concurrently with the shutdown may not have been scheduled
        let remaining: Vec<_> = self.handlers.iter().map(|(_, cached)| cached).collect();
        self.handlers.invalidate_all();
        for cached in remaining {
            cached.context.cancel();
        }
    }

    /// Resolves the configuration and builds a handler for `arg`.
    ///
    /// A fresh lifetime context is created for every attempt, and cancelled unless the handler is
    /// built successfully. This also covers the construction future being dropped midway.
    async fn construct(&self, arg: &D::Arg, key: &D::Key) -> Option<CachedHandler<D::Handler>> {
        let config = match self.driver.resolve(arg).await {
            Ok(config) => config,
            Err(err) => {
                log_failure(key, &err);
                return None;
            }
        };

        let context = CancellationToken::new();
        let guard = context.clone().drop_guard();

        let handler = self
            .driver
            .build(config, arg, context.clone())
            .bind_hub(Hub::new_from_top(Hub::current()))
            .await;

        match handler {
            Ok(handler) => {
                guard.disarm();
                metric!(counter("handlers.construction") += 1, "status" => "ok");
                tracing::debug!(cluster = %key, "Constructed cluster handler");
                Some(CachedHandler {
                    handler: Arc::new(handler),
                    context,
                })
            }
            Err(err) => {
                log_failure(key, &err);
                None
            }
        }
    }

    fn schedule_eviction(&self, key: D::Key, cached: CachedHandler<D::Handler>) {
        tracing::trace!(cluster = %key, "Scheduling eviction of cluster handler");

        let schedule = EvictionSchedule {
            handlers: self.handlers.clone(),
            key,
            context: cached.context,
            grace_period: self.config.grace_period,
            drain_delay: self.config.drain_delay,
            shutdown: self.shutdown.clone(),
        };

        self.evictions
            .spawn(run_eviction(schedule).bind_hub(Hub::new_from_top(Hub::current())));
    }
}

fn log_failure<K: fmt::Display>(key: &K, err: &HandlerError) {
    metric!(counter("handlers.construction") += 1, "status" => err.metrics_tag());

    if err.is_expected() {
        tracing::debug!(cluster = %key, "Cluster handler unavailable: {err}");
    } else {
        tracing::error!(
            error = err as &dyn std::error::Error,
            cluster = %key,
            "Failed to load cluster",
        );
    }
}
