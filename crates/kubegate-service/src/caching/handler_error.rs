use thiserror::Error;

/// An error that happens while resolving the configuration for, or constructing, a cluster
/// handler.
///
/// None of these are ever returned to callers of [`HandlerCache::get`](super::HandlerCache::get).
/// They only decide how a failed miss is logged and tagged in metrics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// The configuration needed to build the handler is not populated yet.
    ///
    /// This is an expected, transient state for freshly provisioned clusters.
    #[error("configuration not ready")]
    NotReady,
    /// The key does not correspond to any known cluster.
    #[error("not found")]
    NotFound,
    /// Looking up or decoding the configuration failed unexpectedly.
    ///
    /// The attached string describes the malformed data or the failed lookup.
    #[error("failed to resolve configuration: {0}")]
    Resolution(String),
    /// Building the handler or starting its background work failed.
    #[error("failed to construct handler: {0}")]
    Construction(String),
}

impl HandlerError {
    /// Whether this error is an expected outcome that does not warrant an error log.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::NotReady | Self::NotFound)
    }

    /// The value used for the `status` tag of construction metrics.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            Self::NotReady => "not_ready",
            Self::NotFound => "not_found",
            Self::Resolution(_) => "resolution_error",
            Self::Construction(_) => "construction_error",
        }
    }

    /// Wraps any error raised while resolving configuration.
    pub fn resolution<E: std::fmt::Display>(err: E) -> Self {
        Self::Resolution(err.to_string())
    }

    /// Wraps any error raised while constructing a handler.
    pub fn construction<E: std::fmt::Display>(err: E) -> Self {
        Self::Construction(err.to_string())
    }
}
