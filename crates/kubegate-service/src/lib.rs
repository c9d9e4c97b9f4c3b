//! The kubegate service library.
//!
//! Kubegate routes requests to the control planes of downstream clusters. For each cluster it
//! lazily builds a handler, caches it for a fixed time and tears it down afterwards, see
//! [`caching`].

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod clusters;
pub mod config;
pub mod logging;
pub mod services;
pub mod upstream;
