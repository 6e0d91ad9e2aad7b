//! Catalog store abstraction.
//!
//! The catalog store is the only shared mutable resource in the system. It
//! holds categories, items, claim records and pledges, and offers two
//! capabilities:
//!
//! - **Live subscriptions**: collection-scoped queries that deliver the full
//!   collection every time it changes
//! - **Optimistic transactions**: reads recorded inside a transaction are
//!   validated at commit; if any of them changed, commit fails with
//!   [`StoreError::Contention`] and the caller re-runs the body
//!
//! # Dyn Compatibility
//!
//! Traits return `Pin<Box<dyn Future>>` rather than using `async fn` so that
//! they can be held as `Arc<dyn CatalogStore>` by long-lived services.
//!
//! # Example
//!
//! ```no_run
//! use claimboard_core::model::ItemId;
//! use claimboard_core::store::CatalogStore;
//! use claimboard_core::error::StoreError;
//!
//! async fn is_free(store: &dyn CatalogStore, item: &ItemId) -> Result<bool, StoreError> {
//!     let mut tx = store.begin_transaction().await?;
//!     let claim = tx.get_claim(item).await?;
//!     tx.commit().await?;
//!     Ok(claim.is_none())
//! }
//! ```

use crate::error::StoreError;
use crate::model::{Category, CategoryId, Claim, Item, ItemId, Pledge};
use futures::Stream;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Boxed, sendable future used by the store traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A collection-scoped query a subscription is opened for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CollectionQuery {
    /// Every category, ordered by name
    Categories,
    /// Items of one category, ordered by name (case-insensitive)
    Items(CategoryId),
    /// Every claim record, keyed by item
    Claims,
    /// Every pledge, newest first
    Pledges,
}

impl fmt::Display for CollectionQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Categories => f.write_str("categories"),
            Self::Items(category_id) => write!(f, "categories/{category_id}/items"),
            Self::Claims => f.write_str("taken"),
            Self::Pledges => f.write_str("pledges"),
        }
    }
}

/// Full contents of a subscribed collection at one point in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CollectionSnapshot {
    /// Categories in name order
    Categories(Vec<Category>),
    /// Items of one category in name order
    Items {
        /// The category the items were fetched from
        category_id: CategoryId,
        /// The items
        items: Vec<Item>,
    },
    /// Claim records keyed by item
    Claims(BTreeMap<ItemId, Claim>),
    /// Pledges, newest first
    Pledges(Vec<Pledge>),
}

/// Release hook run exactly once when a subscription ends.
type ReleaseFn = Box<dyn FnOnce() + Send>;

/// A live subscription to one collection.
///
/// Yields a full [`CollectionSnapshot`] each time the collection changes,
/// starting with its current contents. Calling [`Subscription::release`] (or
/// dropping the subscription) unregisters it from the store before
/// returning, so no further snapshots are produced for it.
pub struct Subscription {
    query: CollectionQuery,
    receiver: mpsc::UnboundedReceiver<Result<CollectionSnapshot, StoreError>>,
    release: Option<ReleaseFn>,
}

impl Subscription {
    /// Creates a subscription fed by `receiver`.
    ///
    /// `release` is invoked once, on [`release`](Self::release) or drop.
    #[must_use]
    pub fn new(
        query: CollectionQuery,
        receiver: mpsc::UnboundedReceiver<Result<CollectionSnapshot, StoreError>>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            query,
            receiver,
            release: Some(Box::new(release)),
        }
    }

    /// The query this subscription was opened for
    #[must_use]
    pub const fn query(&self) -> &CollectionQuery {
        &self.query
    }

    /// Unregisters the subscription from the store.
    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            self.receiver.close();
        }
    }
}

impl Stream for Subscription {
    type Item = Result<CollectionSnapshot, StoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("query", &self.query)
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// A read-then-write transaction against the store.
///
/// Writes are buffered and applied atomically by [`commit`](Self::commit).
/// Dropping a transaction without committing discards its writes.
pub trait CatalogTransaction: Send {
    /// Reads the current claim for `item_id` from the store, bypassing any
    /// cache, and records the read for commit-time validation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable or rejects the read.
    fn get_claim<'a>(
        &'a mut self,
        item_id: &'a ItemId,
    ) -> BoxFuture<'a, Result<Option<Claim>, StoreError>>;

    /// Buffers a write of the claim record for `item_id`.
    fn set_claim(&mut self, item_id: ItemId, claim: Claim);

    /// Buffers a write of a pledge record.
    fn set_pledge(&mut self, pledge: Pledge);

    /// Validates every read and applies every buffered write atomically.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Contention`] if a document read by this transaction
    ///   changed since it was read; nothing is written
    /// - Other variants if the store fails the commit; nothing is written
    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), StoreError>>;
}

/// Authoritative store of categories, items, claims and pledges.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; a single store is shared by every
/// session and allocator in a process.
pub trait CatalogStore: Send + Sync {
    /// Opens a live subscription for `query`.
    ///
    /// The current collection contents are delivered as the first snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the subscription cannot be established.
    fn subscribe(&self, query: CollectionQuery) -> Result<Subscription, StoreError>;

    /// Starts a new optimistic transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable.
    fn begin_transaction(&self) -> BoxFuture<'_, Result<Box<dyn CatalogTransaction>, StoreError>>;
}

/// Administrative catalog edits.
///
/// These writes are out-of-band with respect to the claim protocol: they
/// never touch claim records.
pub trait CatalogAdmin: Send + Sync {
    /// Creates a category and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn create_category(&self, name: String) -> BoxFuture<'_, Result<CategoryId, StoreError>>;

    /// Adds an item to an existing category and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the category does not exist.
    fn add_item(
        &self,
        category_id: CategoryId,
        name: String,
    ) -> BoxFuture<'_, Result<ItemId, StoreError>>;

    /// Lists the current items of a category.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the category does not exist.
    fn list_items(&self, category_id: CategoryId) -> BoxFuture<'_, Result<Vec<Item>, StoreError>>;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use futures::StreamExt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn query_display_uses_collection_paths() {
        assert_eq!(CollectionQuery::Categories.to_string(), "categories");
        assert_eq!(
            CollectionQuery::Items(CategoryId::new("c1")).to_string(),
            "categories/c1/items"
        );
        assert_eq!(CollectionQuery::Claims.to_string(), "taken");
    }

    #[tokio::test]
    async fn release_runs_hook_once_and_ends_stream() {
        let (tx, rx) = mpsc::unbounded_channel();
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let mut subscription = Subscription::new(CollectionQuery::Claims, rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tx.send(Ok(CollectionSnapshot::Claims(BTreeMap::new()))).unwrap();
        assert!(subscription.next().await.is_some());

        subscription.release();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(tx.send(Ok(CollectionSnapshot::Claims(BTreeMap::new()))).is_err());
    }

    #[test]
    fn subscription_is_pending_until_delivery() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscription = Subscription::new(CollectionQuery::Claims, rx, || {});

        let mut next = tokio_test::task::spawn(subscription.next());
        tokio_test::assert_pending!(next.poll());

        tx.send(Ok(CollectionSnapshot::Claims(BTreeMap::new()))).unwrap();
        assert!(next.is_woken());
        assert!(tokio_test::assert_ready!(next.poll()).is_some());
    }

    #[test]
    fn drop_releases_subscription() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let subscription = Subscription::new(CollectionQuery::Categories, rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        drop(subscription);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
