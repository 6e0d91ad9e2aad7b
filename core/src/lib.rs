//! # Claimboard Core
//!
//! Data model and collaborator contracts for claimboard, a system that lets
//! many anonymous participants claim unique items from shared categories.
//!
//! ## Core Concepts
//!
//! - **Claim**: the record that makes one item unavailable; its existence is
//!   the only source of truth for "taken"
//! - **Pledge**: append-only audit record of one successful submission
//! - **Catalog Store**: the authoritative store, offering live subscriptions
//!   and optimistic transactions ([`store::CatalogStore`])
//! - **Notifier**: best-effort confirmation side channel ([`notification::Notifier`])
//! - **Selection**: client-local toggle set ([`selection::SelectionState`])
//!
//! The protocols built on these contracts (claim allocation, catalog sync)
//! live in `claimboard-runtime`; in-memory collaborators for tests live in
//! `claimboard-testing`.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod error;
pub mod model;
pub mod notification;
pub mod selection;
pub mod store;

/// Environment module - Dependency injection traits
///
/// Time and identifier generation are injected so that allocation is
/// deterministic under test.
pub mod environment {
    use crate::model::PledgeId;
    use chrono::{DateTime, Utc};
    use rand::Rng;

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Generates identifiers for pledge records.
    pub trait PledgeIdGenerator: Send + Sync {
        /// Produces an identifier for a pledge committed at `now`
        fn next_id(&self, now: DateTime<Utc>) -> PledgeId;
    }

    /// Millisecond timestamp followed by six random base-36 characters.
    ///
    /// Unique with overwhelming probability but not guaranteed: two pledges
    /// committed in the same millisecond can collide with probability
    /// 36^-6. This is a known limitation of the identifier scheme.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct TimeRandomPledgeIds;

    const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    impl PledgeIdGenerator for TimeRandomPledgeIds {
        fn next_id(&self, now: DateTime<Utc>) -> PledgeId {
            let mut rng = rand::thread_rng();
            let suffix: String = (0..6)
                .map(|_| char::from(BASE36[rng.gen_range(0..BASE36.len())]))
                .collect();
            PledgeId::new(format!("{}-{suffix}", now.timestamp_millis()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{PledgeIdGenerator, TimeRandomPledgeIds};
    use chrono::TimeZone;

    #[test]
    fn pledge_ids_are_timestamp_and_suffix() {
        #[allow(clippy::unwrap_used)]
        let now = chrono::Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let id = TimeRandomPledgeIds.next_id(now);

        let (millis, suffix) = id.as_str().split_once('-').unwrap_or_default();
        assert_eq!(millis, "1700000000123");
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }
}
