//! Kubegate.
//!
//! Kubegate is a standalone web service that forwards API requests to downstream Kubernetes
//! clusters. It keeps one handler per cluster, created on first use and torn down again after a
//! period of inactivity.

#![warn(
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod endpoints;
mod healthcheck;
mod server;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            kubegate_service::logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
