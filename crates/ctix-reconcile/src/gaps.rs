//! Gap detection
//!
//! Entities with no validated relation are queued for another round of
//! relation extraction.

use std::collections::BTreeSet;

use crate::index::IdentityIndex;
use crate::validate::{RejectedRelation, ValidatedRelation};

/// Index keys referenced by no validated relation, as head or tail
pub fn find_gaps<'a, I>(index: &IdentityIndex, validated: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a ValidatedRelation>,
{
    let covered: BTreeSet<&str> = validated
        .into_iter()
        .flat_map(|r| [r.resolved_head.key.as_str(), r.resolved_tail.key.as_str()])
        .collect();

    index
        .keys()
        .filter(|key| !covered.contains(key.as_str()))
        .cloned()
        .collect()
}

/// Relation-side texts that matched nothing in the index
pub fn unresolved_texts<'a, I>(rejected: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a RejectedRelation>,
{
    rejected
        .into_iter()
        .flat_map(|r| r.unresolved_text.iter().cloned())
        .collect()
}
