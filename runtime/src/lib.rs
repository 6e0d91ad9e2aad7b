//! # Claimboard Runtime
//!
//! Protocols built on the claimboard core contracts.
//!
//! This crate reserves items for participants and keeps a live view of the
//! catalog.
//!
//! ## Core Components
//!
//! - **Claim Allocator**: all-or-nothing reservation of a set of items inside
//!   one optimistic transaction, with post-commit confirmation
//! - **Catalog Sync**: a session owning every live subscription and
//!   publishing merged catalog snapshots
//! - **Transaction Runner**: re-executes a transaction body on contention
//!
//! ## Example
//!
//! ```ignore
//! use claimboard_runtime::{AllocatorConfig, CatalogSync, ClaimAllocator};
//!
//! let session = CatalogSync::activate(store.clone())?;
//! let allocator = ClaimAllocator::new(store, AllocatorConfig::default());
//!
//! let receipt = allocator.submit_claim(&claimant, &selection).await?;
//! let snapshot = session.wait_for(|s| s.is_taken(&selection[0].id)).await?;
//!
//! session.deactivate().await?;
//! ```

/// Out-of-band catalog administration
pub mod admin;

/// All-or-nothing claim allocation
pub mod allocator;

/// Prometheus metrics for observability
pub mod metrics;

/// Development notifier
pub mod notifier;

/// Per-participant pledge report
pub mod report;

/// Retry logic with exponential backoff
pub mod retry;

/// Live catalog subscriptions
pub mod sync;

/// Optimistic transaction runner
pub mod transaction;

pub use allocator::{AllocatorConfig, ClaimAllocator, ClaimReceipt, NotificationOutcome};
pub use report::PledgeReport;
pub use retry::RetryPolicy;
pub use sync::{CatalogSync, SyncError, SyncSession};
pub use transaction::run_transaction;
