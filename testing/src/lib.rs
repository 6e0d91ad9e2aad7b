//! # Claimboard Testing
//!
//! Testing utilities and in-memory collaborators for claimboard.
//!
//! This crate provides:
//! - [`InMemoryCatalogStore`]: versioned documents, optimistic transactions
//!   and live subscriptions, with fault injection
//! - [`mocks::RecordingNotifier`]: captures notifications, optionally failing
//! - [`mocks::FixedClock`] and [`mocks::SequentialPledgeIds`] for
//!   deterministic records
//!
//! ## Example
//!
//! ```ignore
//! use claimboard_testing::{InMemoryCatalogStore, test_clock};
//!
//! #[tokio::test]
//! async fn claim_flow() {
//!     let store = Arc::new(InMemoryCatalogStore::new());
//!     let (_, items) = store.seed_category("Sweets", &["Ladoo", "Barfi"]);
//!     let allocator = ClaimAllocator::new(store.clone(), AllocatorConfig::default())
//!         .with_clock(Arc::new(test_clock()));
//!
//!     let receipt = allocator.submit_claim(&claimant, &items).await?;
//!     assert_eq!(receipt.pledge.items.len(), 2);
//! }
//! ```

pub mod store;

/// Mock implementations of environment and collaborator traits.
pub mod mocks {
    use chrono::{DateTime, Utc};
    use claimboard_core::environment::{Clock, PledgeIdGenerator};
    use claimboard_core::error::NotificationError;
    use claimboard_core::model::PledgeId;
    use claimboard_core::notification::{NotificationParams, Notifier};
    use claimboard_core::store::BoxFuture;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use claimboard_testing::mocks::FixedClock;
    /// use claimboard_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-10-20 18:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-10-20T18:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Predictable pledge identifiers: `pledge-1`, `pledge-2`, ...
    #[derive(Debug, Default)]
    pub struct SequentialPledgeIds {
        next: AtomicU64,
    }

    impl SequentialPledgeIds {
        /// Starts the sequence at 1
        #[must_use]
        pub const fn new() -> Self {
            Self {
                next: AtomicU64::new(0),
            }
        }
    }

    impl PledgeIdGenerator for SequentialPledgeIds {
        fn next_id(&self, _now: DateTime<Utc>) -> PledgeId {
            let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
            PledgeId::new(format!("pledge-{n}"))
        }
    }

    /// Notifier that records every message it is asked to send.
    ///
    /// Can be configured to fail for every recipient or for specific ones.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingNotifier {
        sent: Arc<Mutex<Vec<NotificationParams>>>,
        fail_all: bool,
        failing_recipients: HashSet<String>,
    }

    impl RecordingNotifier {
        /// A notifier where every send succeeds
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// A notifier where every send fails
        #[must_use]
        pub fn failing() -> Self {
            Self {
                fail_all: true,
                ..Self::default()
            }
        }

        /// Fail sends addressed to `recipient`
        #[must_use]
        pub fn fail_for(mut self, recipient: &str) -> Self {
            self.failing_recipients.insert(recipient.to_string());
            self
        }

        /// Messages delivered successfully, in send order
        #[must_use]
        pub fn sent(&self) -> Vec<NotificationParams> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn send(&self, params: NotificationParams) -> BoxFuture<'_, Result<(), NotificationError>> {
            Box::pin(async move {
                if self.fail_all || self.failing_recipients.contains(&params.to_email) {
                    return Err(NotificationError::DeliveryFailed {
                        recipient: params.to_email,
                        reason: "simulated delivery failure".to_string(),
                    });
                }
                self.sent
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(params);
                Ok(())
            })
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use claimboard_core::model::Claimant;

    /// Installs a `tracing` subscriber honouring `RUST_LOG`, once per process.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// A claimant with plausible contact details derived from `name`.
    #[must_use]
    pub fn claimant(name: &str) -> Claimant {
        let handle = name.to_lowercase().replace(' ', ".");
        Claimant::new(name, format!("{handle}@example.com"), "514-555-0100")
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, RecordingNotifier, SequentialPledgeIds, test_clock};
pub use store::InMemoryCatalogStore;
