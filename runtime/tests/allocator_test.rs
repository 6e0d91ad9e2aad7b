//! Integration tests for claim allocation
//!
//! Exercises the full submit path against the in-memory store: the
//! all-or-nothing guarantee, validation, retries under contention and the
//! post-commit notification side channel.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use claimboard_core::error::{ClaimError, NotificationError, TransientError};
use claimboard_core::model::{Claimant, ItemRef};
use claimboard_runtime::allocator::{AllocatorConfig, ClaimAllocator, NotificationOutcome};
use claimboard_runtime::retry::RetryPolicy;
use claimboard_testing::helpers::{claimant, init_test_tracing};
use claimboard_testing::{InMemoryCatalogStore, RecordingNotifier, SequentialPledgeIds, test_clock};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

fn fast_retries(max_retries: usize) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(max_retries)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .build()
}

fn allocator_for(store: &InMemoryCatalogStore) -> ClaimAllocator {
    let config = AllocatorConfig {
        retry_policy: fast_retries(4),
        ..AllocatorConfig::default()
    };
    ClaimAllocator::new(Arc::new(store.clone()), config)
        .with_clock(Arc::new(test_clock()))
        .with_ids(Arc::new(SequentialPledgeIds::new()))
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_claim_reserves_every_requested_item() {
    init_test_tracing();
    let store = InMemoryCatalogStore::new();
    let (_, items) = store.seed_category("Sweets", &["I1", "I2"]);

    let receipt = allocator_for(&store)
        .submit_claim(&claimant("Asha"), &items)
        .await
        .unwrap();

    let claims = store.claims();
    assert_eq!(claims.len(), 2);
    assert!(claims.contains_key(&items[0].id));
    assert!(claims.contains_key(&items[1].id));

    let pledges = store.pledges();
    assert_eq!(pledges.len(), 1);
    assert_eq!(pledges[0], receipt.pledge);
    assert_eq!(pledges[0].item_names(), vec!["I1", "I2"]);
    assert_eq!(pledges[0].email, "asha@example.com");
}

#[tokio::test]
async fn test_duplicate_ids_are_claimed_once() {
    let store = InMemoryCatalogStore::new();
    let (_, items) = store.seed_category("Sweets", &["Ladoo", "Barfi"]);
    let request = vec![items[0].clone(), items[1].clone(), items[0].clone()];

    let receipt = allocator_for(&store)
        .submit_claim(&claimant("Asha"), &request)
        .await
        .unwrap();

    assert_eq!(receipt.pledge.items, items);
    assert_eq!(store.claims().len(), 2);
}

// ============================================================================
// Conflicts
// ============================================================================

#[tokio::test]
async fn test_conflict_names_first_taken_item_and_writes_nothing() {
    let store = InMemoryCatalogStore::new();
    let (_, items) = store.seed_category("Sweets", &["I1", "I2", "I3"]);
    let allocator = allocator_for(&store);

    allocator
        .submit_claim(&claimant("Asha"), &[items[1].clone(), items[2].clone()])
        .await
        .unwrap();

    let err = allocator
        .submit_claim(&claimant("Ravi"), &[items[0].clone(), items[2].clone(), items[1].clone()])
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ClaimError::Conflict {
            item_id: items[2].id.clone(),
            item_name: "I3".to_string(),
        }
    );
    assert_eq!(err.to_string(), "Item already taken: I3");
    assert!(!store.claims().contains_key(&items[0].id));
    assert_eq!(store.pledges().len(), 1);
}

#[tokio::test]
async fn test_item_is_available_again_after_reset() {
    let store = InMemoryCatalogStore::new();
    let (_, items) = store.seed_category("Sweets", &["Ladoo"]);
    let allocator = allocator_for(&store);

    allocator.submit_claim(&claimant("Asha"), &items).await.unwrap();
    store.reset_claim(&items[0].id);
    let receipt = allocator.submit_claim(&claimant("Ravi"), &items).await.unwrap();

    assert_eq!(receipt.pledge.name, "Ravi");
    assert_eq!(store.claims()[&items[0].id].by_name, "Ravi");
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_empty_selection_never_reaches_store() {
    let store = InMemoryCatalogStore::new();

    let err = allocator_for(&store)
        .submit_claim(&claimant("Asha"), &[])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ClaimError::Transient(TransientError::InvalidInput(_))
    ));
    assert_eq!(store.transactions_started(), 0);
}

#[tokio::test]
async fn test_blank_contact_details_never_reach_store() {
    let store = InMemoryCatalogStore::new();
    let (_, items) = store.seed_category("Sweets", &["Ladoo"]);
    let nameless = Claimant::new("  ", "asha@example.com", "514-555-0100");

    let err = allocator_for(&store)
        .submit_claim(&nameless, &items)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ClaimError::Transient(TransientError::InvalidInput("name is required".to_string()))
    );
    assert_eq!(store.transactions_started(), 0);
}

// ============================================================================
// Transient failures and retries
// ============================================================================

#[tokio::test]
async fn test_unavailable_store_is_transient() {
    let store = InMemoryCatalogStore::new();
    let (_, items) = store.seed_category("Sweets", &["Ladoo"]);
    store.set_unavailable(Some("network down"));

    let err = allocator_for(&store)
        .submit_claim(&claimant("Asha"), &items)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ClaimError::Transient(TransientError::Unavailable("network down".to_string()))
    );
    assert!(store.claims().is_empty());
}

#[tokio::test]
async fn test_contention_is_retried_transparently() {
    let store = InMemoryCatalogStore::new();
    let (_, items) = store.seed_category("Sweets", &["Ladoo"]);
    store.fail_next_commits(2);

    let receipt = allocator_for(&store)
        .submit_claim(&claimant("Asha"), &items)
        .await
        .unwrap();

    assert_eq!(store.transactions_started(), 3);
    assert_eq!(store.commits(), 1);
    // only the attempt that committed drew a pledge id that was kept
    assert_eq!(store.pledges(), vec![receipt.pledge]);
}

#[tokio::test]
async fn test_contention_exhaustion_surfaces_as_transient() {
    let store = InMemoryCatalogStore::new();
    let (_, items) = store.seed_category("Sweets", &["Ladoo"]);
    store.fail_next_commits(100);

    let config = AllocatorConfig {
        retry_policy: fast_retries(2),
        ..AllocatorConfig::default()
    };
    let allocator = ClaimAllocator::new(Arc::new(store.clone()), config);

    let err = allocator
        .submit_claim(&claimant("Asha"), &items)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ClaimError::Transient(TransientError::ContentionExhausted { attempts: 3 })
    );
    assert!(store.claims().is_empty());
    assert!(store.pledges().is_empty());
}

// ============================================================================
// Notifications
// ============================================================================

#[tokio::test]
async fn test_notification_failure_keeps_committed_claim() {
    let store = InMemoryCatalogStore::new();
    let (_, items) = store.seed_category("Sweets", &["Ladoo"]);
    let allocator = allocator_for(&store).with_notifier(Arc::new(RecordingNotifier::failing()));

    let receipt = allocator
        .submit_claim(&claimant("Asha"), &items)
        .await
        .unwrap();

    assert!(receipt.notification_failed());
    assert!(matches!(
        receipt.notification,
        NotificationOutcome::Failed(NotificationError::DeliveryFailed { ref recipient, .. })
            if recipient == "asha@example.com"
    ));
    assert_eq!(store.claims().len(), 1);
    assert_eq!(store.pledges().len(), 1);
}

#[tokio::test]
async fn test_admin_copy_failure_is_reported() {
    let store = InMemoryCatalogStore::new();
    let (_, items) = store.seed_category("Sweets", &["Ladoo", "Barfi"]);
    let notifier = RecordingNotifier::new().fail_for("admin@example.com");
    let config = AllocatorConfig {
        admin_email: Some("admin@example.com".to_string()),
        ..AllocatorConfig::default()
    };
    let allocator = ClaimAllocator::new(Arc::new(store.clone()), config)
        .with_notifier(Arc::new(notifier.clone()));

    let receipt = allocator
        .submit_claim(&claimant("Asha"), &items)
        .await
        .unwrap();

    assert!(receipt.notification_failed());
    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].items, "Ladoo, Barfi");
}

#[tokio::test]
async fn test_no_notification_on_conflict() {
    let store = InMemoryCatalogStore::new();
    let (_, items) = store.seed_category("Sweets", &["Ladoo"]);
    let notifier = RecordingNotifier::new();
    let allocator = allocator_for(&store).with_notifier(Arc::new(notifier.clone()));

    allocator.submit_claim(&claimant("Asha"), &items).await.unwrap();
    let err = allocator.submit_claim(&claimant("Ravi"), &items).await.unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(notifier.sent().len(), 1);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A submission either claims every requested item or writes nothing.
    #[test]
    fn prop_submission_is_all_or_nothing(
        pre_claimed in prop::collection::vec(any::<bool>(), 1..6),
        request in prop::collection::vec(0usize..6, 1..6),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let store = InMemoryCatalogStore::new();
            let names: Vec<String> = (0..pre_claimed.len()).map(|n| format!("Item {n}")).collect();
            let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let (_, items) = store.seed_category("Mixed", &name_refs);
            let allocator = allocator_for(&store);

            for (item, taken) in items.iter().zip(&pre_claimed) {
                if *taken {
                    allocator.submit_claim(&claimant("Early"), &[item.clone()]).await.unwrap();
                }
            }
            let claims_before = store.claims();
            let pledges_before = store.pledges().len();

            let desired: Vec<ItemRef> = request
                .iter()
                .map(|n| items[n % items.len()].clone())
                .collect();
            let result = allocator.submit_claim(&claimant("Late"), &desired).await;

            let first_taken = desired.iter().find(|item| claims_before.contains_key(&item.id));
            match (result, first_taken) {
                (Err(ClaimError::Conflict { item_id, .. }), Some(taken)) => {
                    prop_assert_eq!(&item_id, &taken.id);
                    prop_assert_eq!(store.claims(), claims_before);
                    prop_assert_eq!(store.pledges().len(), pledges_before);
                }
                (Ok(receipt), None) => {
                    let claims = store.claims();
                    for item in &desired {
                        prop_assert_eq!(&claims[&item.id].by_name, "Late");
                    }
                    prop_assert_eq!(store.pledges().len(), pledges_before + 1);
                    prop_assert!(receipt.pledge.items.len() <= desired.len());
                }
                (other, taken) => {
                    prop_assert!(
                        false,
                        "unexpected outcome {:?} with first taken {:?}",
                        other,
                        taken
                    );
                }
            }
            Ok(())
        })?;
    }
}
