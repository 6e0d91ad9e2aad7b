//! Configuration management for the claimboard demo.
//!
//! Loads configuration from environment variables with sensible defaults.

use claimboard_runtime::allocator::AllocatorConfig;
use claimboard_runtime::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::{AddrParseError, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Claim allocation settings
    pub claims: ClaimsConfig,
    /// Simulation settings
    pub simulation: SimulationConfig,
    /// Observability settings
    pub server: ServerConfig,
}

/// Claim allocation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimsConfig {
    /// Address copied on every confirmation
    pub admin_email: Option<String>,
    /// Sender display name on confirmations
    pub from_name: String,
    /// Whether confirmations are sent at all
    pub notifications: bool,
    /// Transaction retries after contention
    pub tx_max_retries: usize,
    /// First backoff delay in milliseconds
    pub tx_initial_delay_ms: u64,
}

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of concurrent participants
    pub participants: usize,
    /// Items each participant selects
    pub picks_per_participant: usize,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Tracing filter directives, as accepted by `RUST_LOG`
    pub log_level: String,
    /// Metrics recorder host
    pub metrics_host: String,
    /// Metrics recorder port
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults for
    /// missing or unparsable values.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            claims: ClaimsConfig {
                admin_email: lookup("CLAIMBOARD_ADMIN_EMAIL")
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
                from_name: lookup("CLAIMBOARD_FROM_NAME")
                    .unwrap_or_else(|| "Diwali Potluck".to_string()),
                notifications: parsed(&lookup, "CLAIMBOARD_NOTIFICATIONS").unwrap_or(true),
                tx_max_retries: parsed(&lookup, "CLAIMBOARD_TX_MAX_RETRIES").unwrap_or(4),
                tx_initial_delay_ms: parsed(&lookup, "CLAIMBOARD_TX_INITIAL_DELAY_MS")
                    .unwrap_or(25),
            },
            simulation: SimulationConfig {
                participants: parsed(&lookup, "CLAIMBOARD_PARTICIPANTS").unwrap_or(8),
                picks_per_participant: parsed(&lookup, "CLAIMBOARD_PICKS").unwrap_or(3),
            },
            server: ServerConfig {
                log_level: lookup("RUST_LOG").unwrap_or_else(|| {
                    "claimboard_demo=info,claimboard_runtime=info".to_string()
                }),
                metrics_host: lookup("METRICS_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
                metrics_port: parsed(&lookup, "METRICS_PORT").unwrap_or(9090),
            },
        }
    }

    /// Backoff used by the claim transaction
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.claims.tx_max_retries)
            .initial_delay(Duration::from_millis(self.claims.tx_initial_delay_ms))
            .build()
    }

    /// Allocator settings derived from this configuration
    #[must_use]
    pub fn allocator_config(&self) -> AllocatorConfig {
        AllocatorConfig {
            retry_policy: self.retry_policy(),
            admin_email: self.claims.admin_email.clone(),
            from_name: self.claims.from_name.clone(),
        }
    }

    /// Address advertised by the metrics recorder.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn metrics_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.server.metrics_host, self.server.metrics_port).parse()
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_with(&[]);
        assert_eq!(config.claims.admin_email, None);
        assert!(config.claims.notifications);
        assert_eq!(config.simulation.participants, 8);
        assert_eq!(config.retry_policy().max_attempts(), 5);
        assert_eq!(config.metrics_addr().unwrap().port(), 9090);
        assert_eq!(config.server.log_level, "claimboard_demo=info,claimboard_runtime=info");
    }

    #[test]
    fn values_are_read_and_invalid_ones_ignored() {
        let config = config_with(&[
            ("CLAIMBOARD_ADMIN_EMAIL", " admin@example.com "),
            ("CLAIMBOARD_NOTIFICATIONS", "false"),
            ("CLAIMBOARD_TX_MAX_RETRIES", "7"),
            ("CLAIMBOARD_PARTICIPANTS", "many"),
        ]);

        let allocator = config.allocator_config();
        assert_eq!(allocator.admin_email.as_deref(), Some("admin@example.com"));
        assert!(!config.claims.notifications);
        assert_eq!(allocator.retry_policy.max_retries, 7);
        assert_eq!(config.simulation.participants, 8);
    }

    #[test]
    fn blank_admin_email_disables_copy() {
        let config = config_with(&[("CLAIMBOARD_ADMIN_EMAIL", "   ")]);
        assert_eq!(config.claims.admin_email, None);
    }
}
