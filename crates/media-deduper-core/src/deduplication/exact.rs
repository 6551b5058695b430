use std::collections::BTreeMap;

use crate::store::ItemRef;
use crate::types::ContentHash;

/// Groups items by content hash.
///
/// Only groups with 2 or more items (byte-identical duplicates) are returned,
/// ordered by the smallest item id in each group.
pub fn find_exact_duplicates(items: &[ItemRef]) -> Vec<Vec<ItemRef>> {
    let mut by_hash: BTreeMap<ContentHash, Vec<ItemRef>> = BTreeMap::new();
    for item in items.iter().filter(|item| !item.is_removed()) {
        if let Some(hash) = item.content_hash() {
            by_hash.entry(hash).or_default().push(item.clone());
        }
    }

    let mut groups: Vec<Vec<ItemRef>> = by_hash
        .into_values()
        .filter(|group| group.len() > 1)
        .map(|mut group| {
            group.sort_by_key(|item| item.id());
            group
        })
        .collect();
    groups.sort_by_key(|group| group[0].id());
    groups
}
