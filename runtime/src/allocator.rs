//! Claim allocation.
//!
//! [`ClaimAllocator::submit_claim`] reserves a set of items for one
//! claimant, all or nothing. Inside a single optimistic transaction it:
//!
//! 1. reads the claim document of every requested item
//! 2. aborts with [`ClaimError::Conflict`] on the first item (in request
//!    order) that already has a claim
//! 3. buffers one [`Claim`] per item and one [`Pledge`] for the whole set
//! 4. commits, re-running steps 1-3 from scratch on contention
//!
//! Notification happens only after the commit succeeded and never undoes
//! it. Its outcome is reported in the [`ClaimReceipt`].

use crate::metrics::ClaimMetrics;
use crate::retry::RetryPolicy;
use crate::transaction::run_transaction;
use claimboard_core::environment::{Clock, PledgeIdGenerator, SystemClock, TimeRandomPledgeIds};
use claimboard_core::error::{ClaimError, NotificationError, TransactionError, TransientError};
use claimboard_core::model::{Claim, Claimant, ItemId, ItemRef, Pledge};
use claimboard_core::notification::{NotificationParams, Notifier};
use claimboard_core::selection::SelectionState;
use claimboard_core::store::{CatalogStore, CatalogTransaction};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Allocator settings.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Backoff applied when a commit loses to a concurrent writer
    pub retry_policy: RetryPolicy,
    /// Address that receives a copy of every confirmation
    pub admin_email: Option<String>,
    /// Sender display name on confirmations
    pub from_name: String,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            admin_email: None,
            from_name: "Claimboard".to_string(),
        }
    }
}

/// What happened to the post-commit confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// Every message was delivered
    Sent,
    /// No notifier is configured
    Skipped,
    /// A message failed; the claim is still committed
    Failed(NotificationError),
}

/// Result of a committed submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimReceipt {
    /// The pledge recorded alongside the claims
    pub pledge: Pledge,
    /// Confirmation outcome
    pub notification: NotificationOutcome,
}

impl ClaimReceipt {
    /// Whether the "saved, but email failed" warning applies
    #[must_use]
    pub const fn notification_failed(&self) -> bool {
        matches!(self.notification, NotificationOutcome::Failed(_))
    }
}

/// Abort reason of the reservation body.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ItemTaken {
    item_id: ItemId,
    item_name: String,
}

impl fmt::Display for ItemTaken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) already claimed", self.item_name, self.item_id)
    }
}

/// Reserves items for claimants through the catalog store.
///
/// # Example
///
/// ```no_run
/// use claimboard_core::model::{Claimant, ItemRef};
/// use claimboard_core::store::CatalogStore;
/// use claimboard_runtime::allocator::{AllocatorConfig, ClaimAllocator};
/// use std::sync::Arc;
///
/// # async fn example(store: Arc<dyn CatalogStore>) {
/// let allocator = ClaimAllocator::new(store, AllocatorConfig::default());
/// let claimant = Claimant::new("Asha", "asha@example.com", "514-555-0100");
/// match allocator.submit_claim(&claimant, &[ItemRef::new("i1", "Ladoo")]).await {
///     Ok(receipt) => println!("pledge {}", receipt.pledge.id),
///     Err(err) if err.is_conflict() => println!("{err}, please re-select"),
///     Err(err) => println!("try again: {err}"),
/// }
/// # }
/// ```
#[derive(Clone)]
pub struct ClaimAllocator {
    store: Arc<dyn CatalogStore>,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn PledgeIdGenerator>,
    config: AllocatorConfig,
}

impl ClaimAllocator {
    /// Allocator using the system clock, time-random pledge ids and no
    /// notifier.
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>, config: AllocatorConfig) -> Self {
        Self {
            store,
            notifier: None,
            clock: Arc::new(SystemClock),
            ids: Arc::new(TimeRandomPledgeIds),
            config,
        }
    }

    /// Sends confirmations through `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Stamps claims and pledges with `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Draws pledge ids from `ids`.
    #[must_use]
    pub fn with_ids(mut self, ids: Arc<dyn PledgeIdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Claims every item in `desired` for `claimant`, or none of them.
    ///
    /// Duplicate ids are collapsed, keeping the first occurrence.
    ///
    /// # Errors
    ///
    /// - [`ClaimError::Conflict`] naming the first requested item that is
    ///   already claimed; nothing was written
    /// - [`ClaimError::Transient`] for an empty request, blank contact
    ///   details, store failures and exhausted contention retries
    pub async fn submit_claim(
        &self,
        claimant: &Claimant,
        desired: &[ItemRef],
    ) -> Result<ClaimReceipt, ClaimError> {
        let started = Instant::now();

        if let Err(err) = validate(claimant, desired) {
            tracing::debug!(error = %err, "Claim rejected before reaching the store");
            return Err(err.into());
        }

        let items = Arc::new(dedup_items(desired));
        let claimant = Arc::new(claimant.clone());
        let clock = Arc::clone(&self.clock);
        let ids = Arc::clone(&self.ids);

        tracing::debug!(
            claimant = %claimant.email,
            items = items.len(),
            "Submitting claim"
        );

        let body_items = Arc::clone(&items);
        let body_claimant = Arc::clone(&claimant);
        let outcome = run_transaction(self.store.as_ref(), &self.config.retry_policy, move |tx| {
            let items = Arc::clone(&body_items);
            let claimant = Arc::clone(&body_claimant);
            let clock = Arc::clone(&clock);
            let ids = Arc::clone(&ids);
            Box::pin(async move {
                reserve(tx, &claimant, &items, clock.as_ref(), ids.as_ref()).await
            })
        })
        .await;

        let pledge = match outcome {
            Ok(pledge) => pledge,
            Err(TransactionError::Aborted(taken)) => {
                ClaimMetrics::record_conflict();
                tracing::info!(
                    item_id = %taken.item_id,
                    item = %taken.item_name,
                    claimant = %claimant.email,
                    "Claim lost to an existing claim"
                );
                return Err(ClaimError::Conflict {
                    item_id: taken.item_id,
                    item_name: taken.item_name,
                });
            }
            Err(TransactionError::Store(err)) => {
                ClaimMetrics::record_transient_failure();
                tracing::warn!(error = %err, "Claim failed in the store");
                return Err(TransientError::from(err).into());
            }
            Err(TransactionError::ContentionExhausted { attempts }) => {
                ClaimMetrics::record_transient_failure();
                return Err(TransientError::ContentionExhausted { attempts }.into());
            }
        };

        ClaimMetrics::record_commit(pledge.items.len(), started.elapsed());
        tracing::info!(
            pledge_id = %pledge.id,
            claimant = %claimant.email,
            items = pledge.items.len(),
            "Claim committed"
        );

        let notification = self.notify(&claimant, &pledge).await;
        Ok(ClaimReceipt {
            pledge,
            notification,
        })
    }

    /// Submits the current selection and clears it once the claim commits.
    ///
    /// On error the selection is left untouched so the participant can
    /// adjust it.
    ///
    /// # Errors
    ///
    /// Same as [`ClaimAllocator::submit_claim`].
    pub async fn submit_selection(
        &self,
        claimant: &Claimant,
        selection: &mut SelectionState,
    ) -> Result<ClaimReceipt, ClaimError> {
        let receipt = self.submit_claim(claimant, selection.items()).await?;
        selection.clear();
        Ok(receipt)
    }

    async fn notify(&self, claimant: &Claimant, pledge: &Pledge) -> NotificationOutcome {
        let Some(notifier) = &self.notifier else {
            return NotificationOutcome::Skipped;
        };

        let params = NotificationParams::for_claimant(claimant, pledge, &self.config.from_name);
        let admin_params = self
            .config
            .admin_email
            .as_deref()
            .map(|admin| params.redirected_to_admin(admin));

        let mut messages = vec![params];
        messages.extend(admin_params);

        for message in messages {
            let recipient = message.to_email.clone();
            if let Err(err) = notifier.send(message).await {
                ClaimMetrics::record_notification_failure();
                tracing::warn!(
                    pledge_id = %pledge.id,
                    recipient = %recipient,
                    error = %err,
                    "Claim saved but confirmation failed"
                );
                return NotificationOutcome::Failed(err);
            }
        }

        NotificationOutcome::Sent
    }
}

fn validate(claimant: &Claimant, desired: &[ItemRef]) -> Result<(), TransientError> {
    if desired.is_empty() {
        return Err(TransientError::InvalidInput(
            "select at least one item".to_string(),
        ));
    }
    for (field, value) in [
        ("name", &claimant.name),
        ("email", &claimant.email),
        ("phone", &claimant.phone),
    ] {
        if value.trim().is_empty() {
            return Err(TransientError::InvalidInput(format!("{field} is required")));
        }
    }
    Ok(())
}

fn dedup_items(desired: &[ItemRef]) -> Vec<ItemRef> {
    let mut seen = HashSet::with_capacity(desired.len());
    desired
        .iter()
        .filter(|item| seen.insert(item.id.clone()))
        .cloned()
        .collect()
}

/// The re-executable transaction body: reads, conflict check, writes.
async fn reserve(
    tx: &mut dyn CatalogTransaction,
    claimant: &Claimant,
    items: &[ItemRef],
    clock: &dyn Clock,
    ids: &dyn PledgeIdGenerator,
) -> Result<Pledge, TransactionError<ItemTaken>> {
    let mut existing = Vec::with_capacity(items.len());
    for item in items {
        existing.push(tx.get_claim(&item.id).await?);
    }

    if let Some((item, _)) = items.iter().zip(&existing).find(|(_, claim)| claim.is_some()) {
        return Err(TransactionError::Aborted(ItemTaken {
            item_id: item.id.clone(),
            item_name: item.name.clone(),
        }));
    }

    let now = clock.now();
    for item in items {
        tx.set_claim(item.id.clone(), Claim::new(claimant, item, now));
    }
    let pledge = Pledge::new(ids.next_id(now), claimant, items, now);
    tx.set_pledge(pledge.clone());
    Ok(pledge)
}
