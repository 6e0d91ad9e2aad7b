//! Client-local selection of items a participant intends to claim.
//!
//! Pure in-memory state with no store interaction. Iteration follows the
//! order in which items were first selected, which is the order a claim
//! request reports its first conflict in.

use crate::model::{ItemId, ItemRef};

/// Toggle set of selected items keyed by item id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectionState {
    items: Vec<ItemRef>,
}

impl SelectionState {
    /// Creates an empty selection
    #[must_use]
    pub const fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Adds `item` if absent, removes it if present.
    ///
    /// Returns `true` if the item is selected afterwards.
    pub fn toggle(&mut self, item: ItemRef) -> bool {
        if let Some(index) = self.position(&item.id) {
            self.items.remove(index);
            false
        } else {
            self.items.push(item);
            true
        }
    }

    /// Whether `item_id` is selected
    #[must_use]
    pub fn contains(&self, item_id: &ItemId) -> bool {
        self.position(item_id).is_some()
    }

    /// Selected items in selection order
    #[must_use]
    pub fn items(&self) -> &[ItemRef] {
        &self.items
    }

    /// Number of selected items
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is selected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Clears the selection (after a successful submission or on request)
    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn position(&self, item_id: &ItemId) -> Option<usize> {
        self.items.iter().position(|item| &item.id == item_id)
    }
}
