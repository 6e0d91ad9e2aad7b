//! Catalog Sync: a live, merged view of categories, items and claims.
//!
//! [`CatalogSync::activate`] opens one subscription over the categories,
//! one over the claims, and one per known category over its items. A single
//! driver task owns all of them in a keyed map. Every delivery is folded
//! into the driver's state and a fresh immutable [`CatalogSnapshot`] is
//! published to observers through a `watch` channel.
//!
//! Whenever the category list changes the driver reconciles the item
//! subscriptions against it: subscriptions for vanished categories are
//! released, new categories get one, unchanged ones are left alone. The
//! live count is therefore always `1 + categories + 1` once the first
//! category list has been processed.
//!
//! A subscription the store ends on its own is dropped from the map and
//! logged; it is opened again by the next reconciliation.
//!
//! The [`SyncSession`] returned by activation owns the driver.
//! [`SyncSession::deactivate`] releases every subscription and returns once
//! the driver has stopped; dropping the session aborts the driver, which
//! releases them as well.

use crate::metrics::SyncMetrics;
use claimboard_core::error::StoreError;
use claimboard_core::model::{
    CatalogSnapshot, Category, CategoryId, CategoryView, Claim, Item, ItemId, ItemRef,
};
use claimboard_core::store::{CatalogStore, CollectionQuery, CollectionSnapshot, Subscription};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt, StreamMap};

/// Errors from a catalog sync session.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A base subscription could not be opened during activation.
    #[error("Failed to open catalog subscription: {0}")]
    Subscribe(#[from] StoreError),

    /// The session no longer publishes snapshots.
    #[error("Catalog sync stopped")]
    Stopped,

    /// The driver task panicked or was cancelled.
    #[error("Catalog sync driver failed: {0}")]
    Driver(String),
}

/// Entry point for catalog synchronisation.
pub struct CatalogSync;

impl CatalogSync {
    /// Opens the base subscriptions and starts the driver task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Subscribe`] if the categories or claims
    /// subscription cannot be opened. Anything opened before the failure is
    /// released before returning.
    pub fn activate(store: Arc<dyn CatalogStore>) -> Result<SyncSession, SyncError> {
        let mut streams = StreamMap::new();
        for query in [CollectionQuery::Categories, CollectionQuery::Claims] {
            let subscription = store.subscribe(query)?;
            streams.insert(subscription.query().clone(), Feed::new(subscription));
        }

        let (publisher, snapshots) = watch::channel(Arc::new(CatalogSnapshot::default()));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let live = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));

        let mut driver = Driver {
            store,
            streams,
            state: CatalogState::default(),
            publisher,
            live: Arc::clone(&live),
            closed: Arc::clone(&closed),
        };
        driver.update_live();

        tracing::info!("Catalog sync activated");
        let handle = tokio::spawn(driver.run(shutdown_rx));

        Ok(SyncSession {
            snapshots,
            shutdown: Some(shutdown_tx),
            driver: Some(handle),
            live,
            closed,
        })
    }
}

/// An active catalog sync.
///
/// Owns the driver task and, through it, every subscription.
pub struct SyncSession {
    snapshots: watch::Receiver<Arc<CatalogSnapshot>>,
    shutdown: Option<oneshot::Sender<()>>,
    driver: Option<JoinHandle<()>>,
    live: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl SyncSession {
    /// Latest published snapshot
    #[must_use]
    pub fn current(&self) -> Arc<CatalogSnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// A receiver notified on every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<CatalogSnapshot>> {
        self.snapshots.clone()
    }

    /// Waits for a published snapshot satisfying `ready`.
    ///
    /// Returns immediately if the latest snapshot already satisfies it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Stopped`] if the driver stops first.
    pub async fn wait_for(
        &self,
        mut ready: impl FnMut(&CatalogSnapshot) -> bool,
    ) -> Result<Arc<CatalogSnapshot>, SyncError> {
        let mut receiver = self.snapshots.clone();
        let snapshot = receiver
            .wait_for(|snapshot| ready(snapshot.as_ref()))
            .await
            .map_err(|_| SyncError::Stopped)?;
        Ok(Arc::clone(&snapshot))
    }

    /// Subscriptions currently held by the driver
    #[must_use]
    pub fn live_subscriptions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Releases every subscription and stops the driver.
    ///
    /// No snapshot is published once this is called.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Driver`] if the driver task panicked.
    pub async fn deactivate(mut self) -> Result<(), SyncError> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(driver) = self.driver.take() {
            driver.await.map_err(|e| SyncError::Driver(e.to_string()))?;
        }
        tracing::info!("Catalog sync deactivated");
        Ok(())
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(driver) = self.driver.take() {
            tracing::debug!("Catalog sync session dropped without deactivate, aborting driver");
            driver.abort();
        }
    }
}

/// Latest contents of every subscribed collection.
#[derive(Default)]
struct CatalogState {
    categories: Vec<Category>,
    items: HashMap<CategoryId, Vec<ItemRef>>,
    taken: BTreeMap<ItemId, Claim>,
}

impl CatalogState {
    fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            categories: self
                .categories
                .iter()
                .map(|category| CategoryView {
                    id: category.id.clone(),
                    name: category.name.clone(),
                    items: self.items.get(&category.id).cloned().unwrap_or_default(),
                })
                .collect(),
            taken: self.taken.clone(),
        }
    }
}

/// What a [`Feed`] yields.
enum FeedEvent {
    Delivery(Result<CollectionSnapshot, StoreError>),
    Ended,
}

/// A subscription that reports its own end before finishing.
struct Feed {
    subscription: Option<Subscription>,
}

impl Feed {
    const fn new(subscription: Subscription) -> Self {
        Self {
            subscription: Some(subscription),
        }
    }

    fn release(self) {
        if let Some(subscription) = self.subscription {
            subscription.release();
        }
    }
}

impl Stream for Feed {
    type Item = FeedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<FeedEvent>> {
        let Some(subscription) = self.subscription.as_mut() else {
            return Poll::Ready(None);
        };
        match Pin::new(subscription).poll_next(cx) {
            Poll::Ready(Some(delivery)) => Poll::Ready(Some(FeedEvent::Delivery(delivery))),
            Poll::Ready(None) => {
                self.subscription = None;
                Poll::Ready(Some(FeedEvent::Ended))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

struct Driver {
    store: Arc<dyn CatalogStore>,
    streams: StreamMap<CollectionQuery, Feed>,
    state: CatalogState,
    publisher: watch::Sender<Arc<CatalogSnapshot>>,
    live: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl Driver {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                next = self.streams.next() => match next {
                    Some((query, FeedEvent::Delivery(delivery))) => self.handle(&query, delivery),
                    Some((query, FeedEvent::Ended)) => self.ended(&query),
                    None => {
                        tracing::warn!("All catalog subscriptions ended");
                        break;
                    }
                },
            }
        }
    }

    fn handle(
        &mut self,
        query: &CollectionQuery,
        delivery: Result<CollectionSnapshot, StoreError>,
    ) {
        match delivery {
            Ok(CollectionSnapshot::Categories(categories)) => {
                self.state.categories = categories;
                self.reconcile();
            }
            Ok(CollectionSnapshot::Items { category_id, items }) => {
                self.state
                    .items
                    .insert(category_id, items.iter().map(Item::to_ref).collect());
            }
            Ok(CollectionSnapshot::Claims(taken)) => {
                self.state.taken = taken;
            }
            Ok(CollectionSnapshot::Pledges(_)) => {
                tracing::debug!(%query, "Ignoring pledge delivery");
                return;
            }
            Err(err) => {
                tracing::error!(%query, error = %err, "Catalog subscription reported an error");
                return;
            }
        }
        self.publish();
    }

    /// Drops a subscription the store has finished.
    ///
    /// The last delivered contents stay in the snapshot.
    fn ended(&mut self, query: &CollectionQuery) {
        self.streams.remove(query);
        self.update_live();
        tracing::warn!(
            %query,
            live = self.streams.len(),
            "Catalog subscription ended by the store"
        );
    }

    /// Brings item subscriptions in line with the current category list.
    fn reconcile(&mut self) {
        let wanted: HashSet<&CategoryId> = self
            .state
            .categories
            .iter()
            .map(|category| &category.id)
            .collect();

        let stale: Vec<CollectionQuery> = self
            .streams
            .keys()
            .filter(|query| matches!(query, CollectionQuery::Items(id) if !wanted.contains(id)))
            .cloned()
            .collect();

        for query in stale {
            if let Some(feed) = self.streams.remove(&query) {
                feed.release();
            }
            if let CollectionQuery::Items(category_id) = &query {
                self.state.items.remove(category_id);
            }
            tracing::debug!(%query, "Released item subscription");
        }

        for category in &self.state.categories {
            let query = CollectionQuery::Items(category.id.clone());
            if self.streams.contains_key(&query) {
                continue;
            }
            match self.store.subscribe(query.clone()) {
                Ok(subscription) => {
                    tracing::debug!(%query, category = %category.name, "Opened item subscription");
                    self.streams.insert(query, Feed::new(subscription));
                }
                Err(err) => {
                    // retried on the next category delivery
                    tracing::error!(%query, error = %err, "Failed to open item subscription");
                }
            }
        }

        self.update_live();
    }

    fn publish(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.publisher.send_replace(Arc::new(self.state.snapshot()));
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_live(&mut self) {
        let now = self.streams.len();
        let before = self.live.swap(now, Ordering::SeqCst);
        SyncMetrics::record_subscriptions(now as f64 - before as f64);
    }

    fn release_all(&mut self) {
        let queries: Vec<CollectionQuery> = self.streams.keys().cloned().collect();
        for query in queries {
            if let Some(feed) = self.streams.remove(&query) {
                feed.release();
            }
        }
        self.update_live();
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.release_all();
        tracing::debug!("Catalog sync driver stopped");
    }
}
