//! Orders opportunities for display.

use crate::search::normalizer::Opportunity;

/// Maximum number of opportunities surfaced per query.
pub const MAX_RESULTS: usize = 8;

/// Sorts by score descending and keeps the top `MAX_RESULTS`.
/// The sort is stable, so equal scores keep their upstream order.
/// Unscored records rank as 0.
pub fn rank(mut items: Vec<Opportunity>) -> Vec<Opportunity> {
    items.sort_by(|a, b| sort_key(b).total_cmp(&sort_key(a)));
    items.truncate(MAX_RESULTS);
    items
}

/// `-0.0` and `0.0` must compare equal under `total_cmp` to keep ties stable.
fn sort_key(item: &Opportunity) -> f64 {
    item.score.unwrap_or(0.0) + 0.0
}
