//! Handlers that forward requests to downstream clusters.

mod driver;
mod handler;

pub use driver::{ClusterHandlerDriver, ClusterHandlers};
pub use handler::{UpstreamHandler, UpstreamRequest, UpstreamResponse};
