//! In-memory catalog store for fast, deterministic testing.
//!
//! Mirrors the semantics the claim protocol relies on in a real document
//! store:
//!
//! - Every claim document carries a version; a transaction records the
//!   version of each claim it reads and commit fails with
//!   [`StoreError::Contention`] if any of them moved
//! - Commits apply all buffered writes under one lock, then fan the new
//!   collection contents out to every matching subscriber
//! - Releasing a subscription unregisters it under the same lock, so no
//!   snapshot is delivered to it afterwards
//!
//! Fault injection hooks (`fail_next_commits`, `set_unavailable`,
//! `close_subscriptions`, `with_read_latency`) let tests exercise retries
//! and failure paths.

use claimboard_core::error::StoreError;
use claimboard_core::model::{Category, CategoryId, Claim, Item, ItemId, ItemRef, Pledge, PledgeId};
use claimboard_core::store::{
    BoxFuture, CatalogAdmin, CatalogStore, CatalogTransaction, CollectionQuery,
    CollectionSnapshot, Subscription,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

type SnapshotSender = mpsc::UnboundedSender<Result<CollectionSnapshot, StoreError>>;

struct Listener {
    id: u64,
    query: CollectionQuery,
    sender: SnapshotSender,
}

#[derive(Default)]
struct Inner {
    next_doc: u64,
    next_listener: u64,
    categories: BTreeMap<CategoryId, Category>,
    items: BTreeMap<CategoryId, BTreeMap<ItemId, Item>>,
    claims: BTreeMap<ItemId, Claim>,
    claim_versions: HashMap<ItemId, u64>,
    pledges: BTreeMap<PledgeId, Pledge>,
    listeners: Vec<Listener>,
    failing_commits: usize,
    unavailable: Option<String>,
    transactions_started: usize,
    commits: usize,
}

impl Inner {
    fn next_doc_id(&mut self, prefix: &str) -> String {
        self.next_doc += 1;
        format!("{prefix}-{}", self.next_doc)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        match &self.unavailable {
            Some(reason) => Err(StoreError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn claim_version(&self, item_id: &ItemId) -> u64 {
        self.claim_versions.get(item_id).copied().unwrap_or(0)
    }

    fn snapshot(&self, query: &CollectionQuery) -> CollectionSnapshot {
        match query {
            CollectionQuery::Categories => {
                let mut categories: Vec<Category> = self.categories.values().cloned().collect();
                categories.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
                CollectionSnapshot::Categories(categories)
            }
            CollectionQuery::Items(category_id) => {
                let mut items: Vec<Item> = self
                    .items
                    .get(category_id)
                    .map(|items| items.values().cloned().collect())
                    .unwrap_or_default();
                items.sort_by(|a, b| {
                    a.name
                        .to_lowercase()
                        .cmp(&b.name.to_lowercase())
                        .then_with(|| a.id.cmp(&b.id))
                });
                CollectionSnapshot::Items {
                    category_id: category_id.clone(),
                    items,
                }
            }
            CollectionQuery::Claims => CollectionSnapshot::Claims(self.claims.clone()),
            CollectionQuery::Pledges => {
                let mut pledges: Vec<Pledge> = self.pledges.values().cloned().collect();
                pledges.sort_by(|a, b| {
                    b.created_at
                        .cmp(&a.created_at)
                        .then_with(|| b.id.cmp(&a.id))
                });
                CollectionSnapshot::Pledges(pledges)
            }
        }
    }

    /// Pushes the current contents of every collection matching `changed`.
    fn notify(&mut self, changed: impl Fn(&CollectionQuery) -> bool) {
        let mut closed = Vec::new();
        for listener in self.listeners.iter().filter(|listener| changed(&listener.query)) {
            let snapshot = self.snapshot(&listener.query);
            if listener.sender.send(Ok(snapshot)).is_err() {
                closed.push(listener.id);
            }
        }
        self.listeners.retain(|listener| !closed.contains(&listener.id));
    }
}

/// In-memory [`CatalogStore`] and [`CatalogAdmin`].
///
/// Cheap to clone; clones share the same documents and subscribers.
///
/// # Example
///
/// ```
/// use claimboard_testing::InMemoryCatalogStore;
///
/// let store = InMemoryCatalogStore::new();
/// let (_sweets, items) = store.seed_category("Sweets", &["Ladoo", "Barfi"]);
/// assert_eq!(items.len(), 2);
/// assert_eq!(store.live_subscriptions(), 0);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryCatalogStore {
    inner: Arc<Mutex<Inner>>,
    read_latency: Option<Duration>,
}

impl InMemoryCatalogStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every transactional read by `latency` after it is recorded.
    ///
    /// Widens the window between read and commit so that concurrent
    /// submissions genuinely interleave.
    #[must_use]
    pub fn with_read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a category with the given items, bypassing the async admin API.
    pub fn seed_category(&self, name: &str, items: &[&str]) -> (CategoryId, Vec<ItemRef>) {
        let mut inner = self.lock();
        let category_id = CategoryId::new(inner.next_doc_id("cat"));
        inner.categories.insert(
            category_id.clone(),
            Category {
                id: category_id.clone(),
                name: name.to_string(),
            },
        );

        let mut refs = Vec::with_capacity(items.len());
        for item_name in items {
            let item_id = ItemId::new(inner.next_doc_id("item"));
            let item = Item {
                id: item_id,
                name: (*item_name).to_string(),
                category_id: category_id.clone(),
            };
            refs.push(item.to_ref());
            inner
                .items
                .entry(category_id.clone())
                .or_default()
                .insert(item.id.clone(), item);
        }

        let touched = category_id.clone();
        inner.notify(|query| {
            matches!(query, CollectionQuery::Categories)
                || matches!(query, CollectionQuery::Items(id) if *id == touched)
        });
        (category_id, refs)
    }

    /// Deletes a category and its items.
    pub fn remove_category(&self, category_id: &CategoryId) {
        let mut inner = self.lock();
        inner.categories.remove(category_id);
        inner.items.remove(category_id);
        let touched = category_id.clone();
        inner.notify(|query| {
            matches!(query, CollectionQuery::Categories)
                || matches!(query, CollectionQuery::Items(id) if *id == touched)
        });
    }

    /// Deletes the claim on `item_id`, making the item available again.
    ///
    /// Administrative reset; not part of the claim protocol.
    pub fn reset_claim(&self, item_id: &ItemId) {
        let mut inner = self.lock();
        if inner.claims.remove(item_id).is_some() {
            *inner.claim_versions.entry(item_id.clone()).or_insert(0) += 1;
            inner.notify(|query| matches!(query, CollectionQuery::Claims));
        }
    }

    /// Makes the next `count` commits fail with [`StoreError::Contention`].
    pub fn fail_next_commits(&self, count: usize) {
        self.lock().failing_commits = count;
    }

    /// Makes every operation fail with [`StoreError::Unavailable`], or
    /// restores the store when `reason` is `None`.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        self.lock().unavailable = reason.map(str::to_string);
    }

    /// Ends every subscription for `query` from the store side.
    ///
    /// Each affected stream yields whatever was already queued and then
    /// finishes, as when a real store drops a listener.
    pub fn close_subscriptions(&self, query: &CollectionQuery) {
        self.lock().listeners.retain(|listener| &listener.query != query);
        tracing::trace!(%query, "subscriptions closed by store");
    }

    /// Number of registered subscriptions
    #[must_use]
    pub fn live_subscriptions(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Number of registered subscriptions for `query`
    #[must_use]
    pub fn live_subscriptions_for(&self, query: &CollectionQuery) -> usize {
        self.lock()
            .listeners
            .iter()
            .filter(|listener| &listener.query == query)
            .count()
    }

    /// Current claim records
    #[must_use]
    pub fn claims(&self) -> BTreeMap<ItemId, Claim> {
        self.lock().claims.clone()
    }

    /// Current pledges, in no particular order
    #[must_use]
    pub fn pledges(&self) -> Vec<Pledge> {
        self.lock().pledges.values().cloned().collect()
    }

    /// Number of transactions begun so far
    #[must_use]
    pub fn transactions_started(&self) -> usize {
        self.lock().transactions_started
    }

    /// Number of successful commits so far
    #[must_use]
    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    fn release_hook(&self, listener_id: u64) -> impl FnOnce() + Send + 'static {
        let inner: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        move || {
            if let Some(inner) = inner.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
                inner.listeners.retain(|listener| listener.id != listener_id);
            }
        }
    }
}

impl CatalogStore for InMemoryCatalogStore {
    fn subscribe(&self, query: CollectionQuery) -> Result<Subscription, StoreError> {
        let mut inner = self.lock();
        inner.check_available()?;

        let (sender, receiver) = mpsc::unbounded_channel();
        sender
            .send(Ok(inner.snapshot(&query)))
            .map_err(|_| StoreError::Unavailable("subscriber closed".to_string()))?;

        inner.next_listener += 1;
        let id = inner.next_listener;
        inner.listeners.push(Listener {
            id,
            query: query.clone(),
            sender,
        });
        drop(inner);

        tracing::trace!(%query, listener = id, "subscription registered");
        Ok(Subscription::new(query, receiver, self.release_hook(id)))
    }

    fn begin_transaction(&self) -> BoxFuture<'_, Result<Box<dyn CatalogTransaction>, StoreError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.check_available()?;
            inner.transactions_started += 1;
            drop(inner);

            Ok(Box::new(InMemoryTransaction {
                inner: Arc::clone(&self.inner),
                read_latency: self.read_latency,
                reads: HashMap::new(),
                claim_writes: Vec::new(),
                pledge_writes: Vec::new(),
            }) as Box<dyn CatalogTransaction>)
        })
    }
}

impl CatalogAdmin for InMemoryCatalogStore {
    fn create_category(&self, name: String) -> BoxFuture<'_, Result<CategoryId, StoreError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.check_available()?;
            let category_id = CategoryId::new(inner.next_doc_id("cat"));
            inner.categories.insert(
                category_id.clone(),
                Category {
                    id: category_id.clone(),
                    name,
                },
            );
            inner.notify(|query| matches!(query, CollectionQuery::Categories));
            Ok(category_id)
        })
    }

    fn add_item(
        &self,
        category_id: CategoryId,
        name: String,
    ) -> BoxFuture<'_, Result<ItemId, StoreError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.check_available()?;
            if !inner.categories.contains_key(&category_id) {
                return Err(StoreError::NotFound(format!("categories/{category_id}")));
            }
            let item_id = ItemId::new(inner.next_doc_id("item"));
            let item = Item {
                id: item_id.clone(),
                name,
                category_id: category_id.clone(),
            };
            inner
                .items
                .entry(category_id.clone())
                .or_default()
                .insert(item_id.clone(), item);
            inner.notify(|query| matches!(query, CollectionQuery::Items(id) if *id == category_id));
            Ok(item_id)
        })
    }

    fn list_items(&self, category_id: CategoryId) -> BoxFuture<'_, Result<Vec<Item>, StoreError>> {
        Box::pin(async move {
            let inner = self.lock();
            inner.check_available()?;
            if !inner.categories.contains_key(&category_id) {
                return Err(StoreError::NotFound(format!("categories/{category_id}")));
            }
            match inner.snapshot(&CollectionQuery::Items(category_id)) {
                CollectionSnapshot::Items { items, .. } => Ok(items),
                _ => Ok(Vec::new()),
            }
        })
    }
}

struct InMemoryTransaction {
    inner: Arc<Mutex<Inner>>,
    read_latency: Option<Duration>,
    reads: HashMap<ItemId, u64>,
    claim_writes: Vec<(ItemId, Claim)>,
    pledge_writes: Vec<Pledge>,
}

impl InMemoryTransaction {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CatalogTransaction for InMemoryTransaction {
    fn get_claim<'a>(
        &'a mut self,
        item_id: &'a ItemId,
    ) -> BoxFuture<'a, Result<Option<Claim>, StoreError>> {
        Box::pin(async move {
            let (claim, version) = {
                let inner = self.lock();
                inner.check_available()?;
                (inner.claims.get(item_id).cloned(), inner.claim_version(item_id))
            };
            self.reads.entry(item_id.clone()).or_insert(version);

            if let Some(latency) = self.read_latency {
                tokio::time::sleep(latency).await;
            }
            Ok(claim)
        })
    }

    fn set_claim(&mut self, item_id: ItemId, claim: Claim) {
        self.claim_writes.push((item_id, claim));
    }

    fn set_pledge(&mut self, pledge: Pledge) {
        self.pledge_writes.push(pledge);
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), StoreError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.check_available()?;

            if inner.failing_commits > 0 {
                inner.failing_commits -= 1;
                return Err(StoreError::Contention);
            }

            let stale = self
                .reads
                .iter()
                .any(|(item_id, version)| inner.claim_version(item_id) != *version);
            if stale {
                return Err(StoreError::Contention);
            }

            let touched_claims = !self.claim_writes.is_empty();
            let touched_pledges = !self.pledge_writes.is_empty();
            for (item_id, claim) in &self.claim_writes {
                *inner.claim_versions.entry(item_id.clone()).or_insert(0) += 1;
                inner.claims.insert(item_id.clone(), claim.clone());
            }
            for pledge in &self.pledge_writes {
                inner.pledges.insert(pledge.id.clone(), pledge.clone());
            }
            inner.commits += 1;

            inner.notify(|query| match query {
                CollectionQuery::Claims => touched_claims,
                CollectionQuery::Pledges => touched_pledges,
                _ => false,
            });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::Utc;
    use claimboard_core::model::Claimant;
    use futures::StreamExt;

    fn claim(item: &ItemRef) -> Claim {
        Claim::new(&Claimant::new("Asha", "asha@example.com", "555"), item, Utc::now())
    }

    #[tokio::test]
    async fn commit_fails_when_read_claim_changed() {
        let store = InMemoryCatalogStore::new();
        let (_, items) = store.seed_category("Sweets", &["Ladoo"]);
        let ladoo = &items[0];

        let mut first = store.begin_transaction().await.unwrap();
        let mut second = store.begin_transaction().await.unwrap();
        assert!(first.get_claim(&ladoo.id).await.unwrap().is_none());
        assert!(second.get_claim(&ladoo.id).await.unwrap().is_none());

        first.set_claim(ladoo.id.clone(), claim(ladoo));
        second.set_claim(ladoo.id.clone(), claim(ladoo));

        first.commit().await.unwrap();
        assert_eq!(second.commit().await, Err(StoreError::Contention));
        assert_eq!(store.claims().len(), 1);
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn uncommitted_transaction_writes_nothing() {
        let store = InMemoryCatalogStore::new();
        let (_, items) = store.seed_category("Sweets", &["Ladoo"]);

        let mut tx = store.begin_transaction().await.unwrap();
        tx.set_claim(items[0].id.clone(), claim(&items[0]));
        drop(tx);

        assert!(store.claims().is_empty());
    }

    #[tokio::test]
    async fn subscribers_receive_initial_and_committed_snapshots() {
        let store = InMemoryCatalogStore::new();
        let (_, items) = store.seed_category("Sweets", &["Ladoo"]);
        let mut claims = store.subscribe(CollectionQuery::Claims).unwrap();

        let initial = claims.next().await.unwrap().unwrap();
        assert_eq!(initial, CollectionSnapshot::Claims(BTreeMap::new()));

        let mut tx = store.begin_transaction().await.unwrap();
        tx.set_claim(items[0].id.clone(), claim(&items[0]));
        tx.commit().await.unwrap();

        match claims.next().await.unwrap().unwrap() {
            CollectionSnapshot::Claims(taken) => assert!(taken.contains_key(&items[0].id)),
            other => unreachable!("unexpected snapshot {other:?}"),
        }
    }

    #[tokio::test]
    async fn released_subscription_is_unregistered() {
        let store = InMemoryCatalogStore::new();
        let subscription = store.subscribe(CollectionQuery::Categories).unwrap();
        assert_eq!(store.live_subscriptions(), 1);

        subscription.release();
        assert_eq!(store.live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn closed_subscription_stream_finishes() {
        let store = InMemoryCatalogStore::new();
        let mut categories = store.subscribe(CollectionQuery::Categories).unwrap();
        let _claims = store.subscribe(CollectionQuery::Claims).unwrap();

        store.close_subscriptions(&CollectionQuery::Categories);

        assert!(categories.next().await.unwrap().is_ok());
        assert!(categories.next().await.is_none());
        assert_eq!(store.live_subscriptions(), 1);
    }

    #[tokio::test]
    async fn items_are_ordered_case_insensitively() {
        let store = InMemoryCatalogStore::new();
        let (category_id, _) = store.seed_category("Sweets", &["jalebi", "Barfi", "ladoo"]);

        let items = store.list_items(category_id).await.unwrap();
        let names: Vec<_> = items.iter().map(|item| item.name.as_str()).collect();
        assert_eq!(names, vec!["Barfi", "jalebi", "ladoo"]);
    }

    #[tokio::test]
    async fn unavailable_store_rejects_transactions() {
        let store = InMemoryCatalogStore::new();
        store.set_unavailable(Some("offline"));

        let result = store.begin_transaction().await;
        assert!(matches!(result, Err(StoreError::Unavailable(reason)) if reason == "offline"));
    }
}
