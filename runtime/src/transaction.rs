//! Optimistic transaction runner.
//!
//! [`run_transaction`] begins a transaction, runs a body against it and
//! commits. When the commit (or a read) reports
//! [`StoreError::Contention`](claimboard_core::error::StoreError::Contention)
//! the whole body is re-run against a fresh transaction, following the
//! [`RetryPolicy`]. The body may therefore execute several times: it must
//! only read and buffer writes through the transaction handle and must not
//! perform any other side effect.
//!
//! # Example
//!
//! ```no_run
//! use claimboard_core::error::TransactionError;
//! use claimboard_core::model::ItemId;
//! use claimboard_core::store::CatalogStore;
//! use claimboard_runtime::retry::RetryPolicy;
//! use claimboard_runtime::transaction::run_transaction;
//! use std::sync::Arc;
//!
//! async fn is_free(store: &dyn CatalogStore, item: ItemId) -> bool {
//!     let item = Arc::new(item);
//!     let result = run_transaction(store, &RetryPolicy::default(), move |tx| {
//!         let item = Arc::clone(&item);
//!         Box::pin(async move {
//!             let claim = tx.get_claim(&item).await?;
//!             Ok::<_, TransactionError<String>>(claim.is_none())
//!         })
//!     })
//!     .await;
//!     matches!(result, Ok(true))
//! }
//! ```

use crate::metrics::TransactionMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use claimboard_core::error::{StoreError, TransactionError};
use claimboard_core::store::{BoxFuture, CatalogStore, CatalogTransaction};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

fn is_contention<E>(err: &TransactionError<E>) -> bool {
    matches!(err, TransactionError::Store(store_err) if store_err.is_retryable())
}

/// Runs `body` inside an optimistic transaction, re-running it on contention.
///
/// # Errors
///
/// - [`TransactionError::Aborted`] if the body aborted; nothing was written
/// - [`TransactionError::Store`] for non-retryable store failures
/// - [`TransactionError::ContentionExhausted`] if every attempt allowed by
///   `policy` lost to a concurrent commit
pub async fn run_transaction<S, F, T, E>(
    store: &S,
    policy: &RetryPolicy,
    body: F,
) -> Result<T, TransactionError<E>>
where
    S: CatalogStore + ?Sized,
    F: for<'c> Fn(&'c mut dyn CatalogTransaction) -> BoxFuture<'c, Result<T, TransactionError<E>>>
        + Sync,
    T: Send,
    E: fmt::Display + Send,
{
    let attempts = AtomicUsize::new(0);
    let attempts_ref = &attempts;
    let body = &body;

    let result = retry_with_predicate(
        policy,
        move || {
            attempts_ref.fetch_add(1, Ordering::Relaxed);
            async move {
                let mut tx = store.begin_transaction().await?;
                let value = body(tx.as_mut()).await?;
                tx.commit().await?;
                Ok::<T, TransactionError<E>>(value)
            }
        },
        is_contention,
    )
    .await;

    let attempts = attempts.load(Ordering::Relaxed);
    for _ in 1..attempts {
        TransactionMetrics::record_retry();
    }

    match result {
        Err(TransactionError::Store(StoreError::Contention)) => {
            tracing::warn!(attempts, "Transaction abandoned after repeated contention");
            Err(TransactionError::ContentionExhausted { attempts })
        }
        other => other,
    }
}
