//! Error types shared by the store, allocator and notification layers.

use crate::model::{CategoryId, ItemId};
use thiserror::Error;

/// Errors reported by a [`CatalogStore`](crate::store::CatalogStore) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The caller is not allowed to perform the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A document read inside the transaction changed before commit.
    ///
    /// The transaction body must be re-run against fresh reads.
    #[error("Transaction contention: a document read by the transaction changed before commit")]
    Contention,

    /// A referenced document does not exist.
    #[error("Document not found: {0}")]
    NotFound(String),

    /// A document could not be decoded or encoded.
    #[error("Malformed document: {0}")]
    Malformed(String),
}

impl StoreError {
    /// Whether the transaction runner should re-execute the body.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention)
    }
}

/// Outcome of a transaction body that did not commit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError<E> {
    /// The body decided to abort; nothing was written.
    #[error("Transaction aborted: {0}")]
    Aborted(E),

    /// The store failed a read, a write or the commit.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Every attempt hit contention.
    #[error("Transaction gave up after {attempts} contended attempts")]
    ContentionExhausted {
        /// Number of attempts made
        attempts: usize,
    },
}

/// Failures a caller can recover from by retrying.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransientError {
    /// The store was unreachable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the request.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The request was rejected before reaching the store.
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    /// The store's retry budget was exhausted by concurrent writers.
    #[error("Too much contention, gave up after {attempts} attempts")]
    ContentionExhausted {
        /// Number of attempts made
        attempts: usize,
    },
}

impl From<StoreError> for TransientError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => Self::Unavailable(reason),
            StoreError::PermissionDenied(reason) => Self::PermissionDenied(reason),
            StoreError::Contention => Self::ContentionExhausted { attempts: 1 },
            StoreError::NotFound(reason) | StoreError::Malformed(reason) => {
                Self::InvalidInput(reason)
            }
        }
    }
}

/// Errors returned by `submit_claim`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    /// A requested item already has a claim. Nothing was written.
    #[error("Item already taken: {item_name}")]
    Conflict {
        /// The first conflicting item in request order
        item_id: ItemId,
        /// Its name, for display
        item_name: String,
    },

    /// Network, permission or input failure. Nothing was written.
    #[error(transparent)]
    Transient(#[from] TransientError),
}

impl ClaimError {
    /// Whether this is a lost race for an item
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Failure of the post-commit notification side channel.
///
/// Never undoes a committed claim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    /// The dispatcher rejected or failed to deliver the message.
    #[error("Notification to {recipient} failed: {reason}")]
    DeliveryFailed {
        /// Recipient address
        recipient: String,
        /// Failure reason
        reason: String,
    },
}

/// Errors from administrative catalog edits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    /// The category name was blank.
    #[error("Category name is required")]
    EmptyCategoryName,

    /// The target category does not exist.
    #[error("Unknown category: {0}")]
    UnknownCategory(CategoryId),

    /// The store failed the write.
    #[error(transparent)]
    Store(#[from] StoreError),
}
