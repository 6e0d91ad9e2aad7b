//! Prometheus metrics for claim allocation and catalog sync.
//!
//! This module provides metric collection for:
//! - Claim submissions (committed, conflicted, failed)
//! - Transaction retries caused by store contention
//! - Post-commit notification failures
//! - Live catalog subscriptions
//!
//! # Example
//!
//! ```rust,no_run
//! use claimboard_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! println!("{}", server.render().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder handle.
///
/// Installs the global recorder and renders the exposition format for
/// scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address metrics are advertised on (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by another test), this
    /// logs a warning and succeeds without a render handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder wasn't installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "claims_committed_total",
        "Total number of claim submissions that committed"
    );
    describe_counter!(
        "claim_items_committed_total",
        "Total number of items reserved by committed submissions"
    );
    describe_counter!(
        "claim_conflicts_total",
        "Total number of submissions rejected because an item was already taken"
    );
    describe_counter!(
        "claim_transient_failures_total",
        "Total number of submissions that failed with a transient error"
    );
    describe_histogram!(
        "claim_submit_duration_seconds",
        "Time taken by submit_claim, including retries"
    );
    describe_counter!(
        "transaction_retries_total",
        "Total number of transaction bodies re-run after contention"
    );
    describe_counter!(
        "notification_failures_total",
        "Total number of post-commit notifications that failed"
    );
    describe_gauge!(
        "catalog_sync_live_subscriptions",
        "Subscriptions held by active catalog sync sessions"
    );
}

/// Claim allocation metrics recorder.
pub struct ClaimMetrics;

impl ClaimMetrics {
    /// Record a committed submission of `items` items.
    pub fn record_commit(items: usize, duration: Duration) {
        counter!("claims_committed_total").increment(1);
        counter!("claim_items_committed_total").increment(items as u64);
        histogram!("claim_submit_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a submission lost to an existing claim.
    pub fn record_conflict() {
        counter!("claim_conflicts_total").increment(1);
    }

    /// Record a transient failure.
    pub fn record_transient_failure() {
        counter!("claim_transient_failures_total").increment(1);
    }

    /// Record a failed notification.
    pub fn record_notification_failure() {
        counter!("notification_failures_total").increment(1);
    }
}

/// Transaction metrics recorder.
pub struct TransactionMetrics;

impl TransactionMetrics {
    /// Record a body re-run after contention.
    pub fn record_retry() {
        counter!("transaction_retries_total").increment(1);
    }
}

/// Catalog sync metrics recorder.
pub struct SyncMetrics;

impl SyncMetrics {
    /// Adjust the live subscription gauge by `delta`.
    pub fn record_subscriptions(delta: f64) {
        gauge!("catalog_sync_live_subscriptions").increment(delta);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
    }

    #[tokio::test]
    async fn test_claim_metrics_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        ClaimMetrics::record_commit(2, Duration::from_millis(40));
        ClaimMetrics::record_conflict();
        TransactionMetrics::record_retry();

        // handle is None if another test installed the recorder first
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("claims_committed_total"));
            assert!(rendered.contains("claim_conflicts_total"));
            assert!(rendered.contains("transaction_retries_total"));
        }
    }
}
