//! Records persisted in the catalog store and the derived catalog view.
//!
//! Field names of the persisted records (`Claim`, `Pledge`) are part of the
//! contract with reporting and export consumers, so serialization uses the
//! camel-cased names those consumers read (`byName`, `itemName`, `createdAt`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Creates a `", stringify!($name), "` from any string-like value")]
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a category document
    CategoryId
);
string_id!(
    /// Identifier of an item document; also the key of its claim record
    ItemId
);
string_id!(
    /// Identifier of a pledge audit record
    PledgeId
);

// ============================================================================
// Persisted records
// ============================================================================

/// A named list of claimable items.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Category identifier
    pub id: CategoryId,
    /// Display name, used for ordering
    pub name: String,
}

/// A claimable item inside exactly one category.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Item identifier, stable for the item's lifetime
    pub id: ItemId,
    /// Display name
    pub name: String,
    /// Owning category, resolved from the subscription that delivered the item
    pub category_id: CategoryId,
}

impl Item {
    /// The `{id, name}` view of this item
    #[must_use]
    pub fn to_ref(&self) -> ItemRef {
        ItemRef {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// The `{id, name}` pair a participant selects and a pledge records.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    /// Item identifier
    pub id: ItemId,
    /// Item name at the time it was referenced
    pub name: String,
}

impl ItemRef {
    /// Creates a new item reference
    #[must_use]
    pub fn new(id: impl Into<ItemId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Contact details of an anonymous participant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claimant {
    /// Participant name
    pub name: String,
    /// Participant email
    pub email: String,
    /// Participant phone number
    pub phone: String,
}

impl Claimant {
    /// Creates a new claimant
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            phone: phone.into(),
        }
    }
}

/// The record whose existence makes one item unavailable.
///
/// Keyed by [`ItemId`] in the store. At most one claim exists per item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    /// Claimant name
    pub by_name: String,
    /// Claimant email
    pub by_email: String,
    /// Claimant phone
    pub by_phone: String,
    /// Name of the claimed item
    pub item_name: String,
    /// Commit-time timestamp
    pub at: DateTime<Utc>,
}

impl Claim {
    /// Builds the claim record for `item` on behalf of `claimant`
    #[must_use]
    pub fn new(claimant: &Claimant, item: &ItemRef, at: DateTime<Utc>) -> Self {
        Self {
            by_name: claimant.name.clone(),
            by_email: claimant.email.clone(),
            by_phone: claimant.phone.clone(),
            item_name: item.name.clone(),
            at,
        }
    }
}

/// Append-only audit record of one successful submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pledge {
    /// Pledge identifier
    pub id: PledgeId,
    /// Claimant name
    pub name: String,
    /// Claimant email
    pub email: String,
    /// Claimant phone
    pub phone: String,
    /// Every item claimed by the submission, in request order
    pub items: Vec<ItemRef>,
    /// Commit-time timestamp
    pub created_at: DateTime<Utc>,
}

impl Pledge {
    /// Builds the pledge summarizing `items` for `claimant`
    #[must_use]
    pub fn new(
        id: PledgeId,
        claimant: &Claimant,
        items: &[ItemRef],
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: claimant.name.clone(),
            email: claimant.email.clone(),
            phone: claimant.phone.clone(),
            items: items.to_vec(),
            created_at,
        }
    }

    /// Names of the pledged items, in request order
    #[must_use]
    pub fn item_names(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.name.as_str()).collect()
    }
}

// ============================================================================
// Derived view
// ============================================================================

/// A category joined with the items its subscription last delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategoryView {
    /// Category identifier
    pub id: CategoryId,
    /// Category name
    pub name: String,
    /// Items ordered by name; empty until the item subscription delivers
    pub items: Vec<ItemRef>,
}

/// Item counts shown alongside the catalog.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CatalogStats {
    /// Items currently listed across all categories
    pub total: usize,
    /// Listed items that have a claim
    pub taken: usize,
    /// Listed items without a claim
    pub remaining: usize,
}

/// Immutable, advisory view of the catalog.
///
/// This is a cache of the store. It may lag behind a concurrent commit, so it
/// is only used to decide UI affordances, never to decide whether a claim is
/// allowed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    /// Categories ordered by name
    pub categories: Vec<CategoryView>,
    /// Claim records keyed by item
    pub taken: BTreeMap<ItemId, Claim>,
}

impl CatalogSnapshot {
    /// Whether the snapshot has a claim for `item_id`
    #[must_use]
    pub fn is_taken(&self, item_id: &ItemId) -> bool {
        self.taken.contains_key(item_id)
    }

    /// The claim for `item_id`, if any
    #[must_use]
    pub fn claim_for(&self, item_id: &ItemId) -> Option<&Claim> {
        self.taken.get(item_id)
    }

    /// Looks an item up across every category
    #[must_use]
    pub fn find_item(&self, item_id: &ItemId) -> Option<(&CategoryView, &ItemRef)> {
        self.categories.iter().find_map(|category| {
            category
                .items
                .iter()
                .find(|item| &item.id == item_id)
                .map(|item| (category, item))
        })
    }

    /// Iterates over every listed item
    pub fn items(&self) -> impl Iterator<Item = &ItemRef> {
        self.categories.iter().flat_map(|category| category.items.iter())
    }

    /// Total, taken and remaining counts.
    ///
    /// Claims for items that are no longer listed are not counted.
    #[must_use]
    pub fn stats(&self) -> CatalogStats {
        let total = self.items().count();
        let taken = self.items().filter(|item| self.is_taken(&item.id)).count();
        CatalogStats {
            total,
            taken,
            remaining: total.saturating_sub(taken),
        }
    }
}
