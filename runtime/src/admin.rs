//! Out-of-band catalog administration.
//!
//! Organisers create a category together with its items in one step, the
//! items given as a comma-separated list. These writes bypass the claim
//! protocol and never touch claims or pledges.

use claimboard_core::error::AdminError;
use claimboard_core::model::{CategoryId, ItemId};
use claimboard_core::store::CatalogAdmin;
use std::collections::HashSet;

/// What [`add_category_with_items`] created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedCategory {
    /// New category
    pub category_id: CategoryId,
    /// New items, in list order
    pub item_ids: Vec<ItemId>,
}

/// Splits a comma-separated item list.
///
/// Entries are trimmed, blanks dropped and duplicates removed
/// case-insensitively; the first spelling wins.
#[must_use]
pub fn parse_item_list(csv: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    csv.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Creates a category named `name` holding the items listed in `csv`.
///
/// # Errors
///
/// - [`AdminError::EmptyCategoryName`] if `name` is blank
/// - [`AdminError::Store`] if a write fails; items written before the
///   failure are kept
pub async fn add_category_with_items(
    admin: &dyn CatalogAdmin,
    name: &str,
    csv: &str,
) -> Result<CreatedCategory, AdminError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AdminError::EmptyCategoryName);
    }

    let category_id = admin.create_category(name.to_string()).await?;
    let mut item_ids = Vec::new();
    for item in parse_item_list(csv) {
        item_ids.push(admin.add_item(category_id.clone(), item).await?);
    }

    tracing::info!(
        category_id = %category_id,
        category = name,
        items = item_ids.len(),
        "Category created"
    );
    Ok(CreatedCategory {
        category_id,
        item_ids,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use claimboard_testing::InMemoryCatalogStore;

    #[test]
    fn item_list_is_trimmed_and_deduplicated() {
        assert_eq!(
            parse_item_list(" Ladoo, barfi ,, LADOO,Barfi , Jalebi "),
            vec!["Ladoo", "barfi", "Jalebi"]
        );
        assert!(parse_item_list(" , ,").is_empty());
    }

    #[tokio::test]
    async fn creates_category_and_items() {
        let store = InMemoryCatalogStore::new();

        let created = add_category_with_items(&store, "  Sweets ", "Ladoo, Barfi")
            .await
            .unwrap();

        assert_eq!(created.item_ids.len(), 2);
        let items = store.list_items(created.category_id).await.unwrap();
        let names: Vec<&str> = items.iter().map(|item| item.name.as_str()).collect();
        assert_eq!(names, vec!["Barfi", "Ladoo"]);
    }

    #[tokio::test]
    async fn blank_name_is_rejected() {
        let store = InMemoryCatalogStore::new();
        let result = add_category_with_items(&store, "   ", "Ladoo").await;
        assert_eq!(result, Err(AdminError::EmptyCategoryName));
    }
}
