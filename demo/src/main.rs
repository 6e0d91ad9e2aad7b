//! Potluck sign-up simulation.
//!
//! Seeds an in-memory catalog, keeps a live view of it and lets a crowd of
//! participants claim dishes concurrently. Participants who lose an item to
//! someone faster re-select from what is still available.

mod config;

use anyhow::Context;
use claimboard_core::error::ClaimError;
use claimboard_core::model::{CatalogSnapshot, Claimant, ItemId, ItemRef, Pledge};
use claimboard_core::selection::SelectionState;
use claimboard_core::store::{CatalogStore, CollectionQuery, CollectionSnapshot};
use claimboard_runtime::admin::add_category_with_items;
use claimboard_runtime::metrics::MetricsServer;
use claimboard_runtime::notifier::ConsoleNotifier;
use claimboard_runtime::{CatalogSync, ClaimAllocator, PledgeReport, SyncSession};
use claimboard_testing::InMemoryCatalogStore;
use config::Config;
use futures::StreamExt;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CATALOG: &[(&str, &str)] = &[
    ("Sweets", "Ladoo, Barfi, Jalebi, Gulab Jamun, ladoo"),
    ("Savoury", "Samosa, Pakora, Dhokla, Kachori"),
    ("Drinks", "Masala Chai, Mango Lassi, Nimbu Pani"),
    ("Supplies", "Plates, Cups, Napkins, Diyas"),
];

/// Attempts per participant, counting re-selections after a conflict.
const MAX_ROUNDS: usize = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_new(&config.server.log_level)
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        participants = config.simulation.participants,
        notifications = config.claims.notifications,
        admin_email = ?config.claims.admin_email,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.metrics_addr()?);
    metrics.start()?;

    let store = Arc::new(InMemoryCatalogStore::new().with_read_latency(Duration::from_millis(2)));
    let mut listed = 0;
    for (name, items) in CATALOG {
        let created = add_category_with_items(store.as_ref(), name, items).await?;
        listed += created.item_ids.len();
    }

    let session = CatalogSync::activate(store.clone())?;
    let outcome = simulate(&config, &store, &session, listed).await;
    // torn down on every path, including a failed simulation
    session.deactivate().await?;
    outcome?;

    if let Some(rendered) = metrics.render() {
        println!("\n{rendered}");
    }
    info!("Simulation finished");
    Ok(())
}

async fn simulate(
    config: &Config,
    store: &Arc<InMemoryCatalogStore>,
    session: &SyncSession,
    listed: usize,
) -> anyhow::Result<()> {
    let snapshot = tokio::time::timeout(
        Duration::from_secs(5),
        session.wait_for(|s| s.stats().total == listed),
    )
    .await
    .context("catalog did not load in time")??;
    info!(categories = snapshot.categories.len(), items = listed, "Catalog loaded");

    let mut allocator = ClaimAllocator::new(store.clone(), config.allocator_config());
    if config.claims.notifications {
        allocator = allocator.with_notifier(Arc::new(ConsoleNotifier::new()));
    }

    let all_items: Vec<ItemRef> = snapshot.items().cloned().collect();
    let mut handles = Vec::with_capacity(config.simulation.participants);
    for n in 1..=config.simulation.participants {
        let picks: Vec<ItemRef> = all_items
            .choose_multiple(&mut rand::thread_rng(), config.simulation.picks_per_participant)
            .cloned()
            .collect();
        let claimant = Claimant::new(
            format!("Guest {n}"),
            format!("guest{n}@example.com"),
            format!("514-555-{n:04}"),
        );
        handles.push(tokio::spawn(participate(
            allocator.clone(),
            session.subscribe(),
            claimant,
            picks,
        )));
    }

    let mut committed_items = 0;
    for handle in handles {
        committed_items += handle.await.context("participant task failed")?;
    }

    let snapshot = tokio::time::timeout(
        Duration::from_secs(5),
        session.wait_for(|s| s.taken.len() == committed_items),
    )
    .await
    .context("claims did not propagate in time")??;
    print_summary(&snapshot);

    let pledges = current_pledges(store.as_ref()).await?;
    let report = PledgeReport::from_pledges(&pledges);
    println!("\nPledges ({} items):", report.total_items());
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// One participant's session: select, submit, re-select on conflict.
///
/// Returns the number of items this participant ended up claiming.
async fn participate(
    allocator: ClaimAllocator,
    catalog: watch::Receiver<Arc<CatalogSnapshot>>,
    claimant: Claimant,
    picks: Vec<ItemRef>,
) -> usize {
    let wanted = picks.len();
    let mut selection = SelectionState::new();
    for item in picks {
        selection.toggle(item);
    }

    for round in 1..=MAX_ROUNDS {
        match allocator.submit_selection(&claimant, &mut selection).await {
            Ok(receipt) => {
                if receipt.notification_failed() {
                    warn!(
                        claimant = %claimant.name,
                        "Saved, but sending the confirmation email failed"
                    );
                }
                info!(
                    claimant = %claimant.name,
                    items = %receipt.pledge.item_names().join(", "),
                    round,
                    "Pledge saved"
                );
                return receipt.pledge.items.len();
            }
            Err(ClaimError::Conflict { item_id, item_name }) => {
                info!(
                    claimant = %claimant.name,
                    item = %item_name,
                    "Item already taken, re-selecting"
                );
                let latest = Arc::clone(&catalog.borrow());
                reselect(&mut selection, &latest, &item_id, wanted);
                if selection.is_empty() {
                    info!(claimant = %claimant.name, "Nothing left to claim");
                    return 0;
                }
            }
            Err(err) => {
                warn!(claimant = %claimant.name, error = %err, "Submission failed");
                return 0;
            }
        }
    }
    0
}

/// Drops taken items from `selection` and tops it up with available ones.
fn reselect(
    selection: &mut SelectionState,
    catalog: &CatalogSnapshot,
    lost: &ItemId,
    wanted: usize,
) {
    let stale: Vec<ItemRef> = selection
        .items()
        .iter()
        .filter(|item| &item.id == lost || catalog.is_taken(&item.id))
        .cloned()
        .collect();
    for item in stale {
        selection.toggle(item);
    }

    let mut available = catalog
        .items()
        .filter(|item| &item.id != lost && !catalog.is_taken(&item.id));
    while selection.len() < wanted {
        let Some(item) = available.next() else { break };
        if !selection.contains(&item.id) {
            selection.toggle(item.clone());
        }
    }
}

async fn current_pledges(store: &dyn CatalogStore) -> anyhow::Result<Vec<Pledge>> {
    let mut subscription = store.subscribe(CollectionQuery::Pledges)?;
    let delivery = subscription
        .next()
        .await
        .context("pledge subscription closed before delivering")?;
    subscription.release();

    match delivery? {
        CollectionSnapshot::Pledges(pledges) => Ok(pledges),
        other => anyhow::bail!("unexpected delivery for pledges: {other:?}"),
    }
}

fn print_summary(snapshot: &CatalogSnapshot) {
    let stats = snapshot.stats();
    println!(
        "\nAvailability: {} total, {} taken, {} remaining",
        stats.total, stats.taken, stats.remaining
    );
    for category in &snapshot.categories {
        println!("  {}", category.name);
        for item in &category.items {
            match snapshot.claim_for(&item.id) {
                Some(claim) => println!("    [x] {:<16} {}", item.name, claim.by_name),
                None => println!("    [ ] {}", item.name),
            }
        }
    }
}
