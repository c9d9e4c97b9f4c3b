//! # Kubegate handler caching
//!
//! Requests for a downstream cluster are served by a handler that is bound to that cluster's
//! control plane. Building one is expensive: the cluster record has to be resolved into connection
//! settings, a client with the cluster's trust material has to be set up, and background work
//! (health probing) has to be started. This module caches those handlers in memory.
//!
//! ## Lookup
//!
//! [`HandlerCache::get`] first looks for a visible handler and returns it right away. On a miss,
//! the [`HandlerDriver`] resolves the configuration and builds a new handler. Concurrent misses
//! for the same key are coalesced via moka's entry API, so at most one construction runs per key
//! and exactly one handler becomes visible.
//!
//! Failed lookups are never cached. A cluster that is not ready yet, an unknown cluster and a
//! failed construction all produce `None`, and the next access tries again from scratch.
//!
//! ## Eviction
//!
//! Handlers do not live forever. Each stored handler gets its own eviction schedule, see the
//! `eviction` module. The schedule is fixed and not extended by accesses.
//!
//! ### Metrics
//!
//! - `handlers.access`: All accesses.
//! - `handlers.memory.hit`: Accesses served by an already visible handler.
//! - `handlers.construction`: Construction attempts, tagged with `status`.
//! - `handlers.hidden`: Handlers removed from the cache.
//! - `handlers.destroyed`: Handlers whose lifetime context was cancelled.

mod eviction;
mod handler_error;
mod handlers;

pub use handler_error::HandlerError;
pub use handlers::{HandlerCache, HandlerDriver};
