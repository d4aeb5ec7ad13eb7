//! Identity index builder
//!
//! Folds provenance-tagged mentions into one [`CanonicalEntity`] per
//! comparison key.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use ctix_core::{CanonicalEntity, MentionBatch, RawMention};

use crate::normalize::normalize;

/// Canonical entities of one document, keyed by comparison key
pub type IdentityIndex = BTreeMap<String, CanonicalEntity>;

/// Build the identity index from a flat mention sequence
///
/// Order matters only for tie-breaks: the first mention of a key supplies the
/// display text, and the first-seen type wins among equal-priority channels.
pub fn build_index<'a, I>(mentions: I) -> IdentityIndex
where
    I: IntoIterator<Item = &'a RawMention>,
{
    mentions
        .into_iter()
        .fold(IdentityIndex::new(), |mut index, mention| {
            absorb(&mut index, mention);
            index
        })
}

/// Build the identity index from batches, folded in slice order
pub fn build_index_from_batches(batches: &[MentionBatch]) -> IdentityIndex {
    build_index(batches.iter().flat_map(|batch| batch.mentions.iter()))
}

fn absorb(index: &mut IdentityIndex, mention: &RawMention) {
    let text = normalize(&mention.text);
    let key = text.to_lowercase();
    if key.is_empty() {
        return;
    }

    match index.entry(key) {
        Entry::Occupied(mut entry) => merge_mention(entry.get_mut(), mention),
        Entry::Vacant(entry) => {
            let key = entry.key().clone();
            entry.insert(CanonicalEntity::from_mention(key, text, mention));
        }
    }
}

fn merge_mention(entity: &mut CanonicalEntity, mention: &RawMention) {
    entity.sources.insert(mention.source);
    entity.mention_count += 1;

    if entity.canonical_name.is_none() {
        entity.canonical_name = mention.canonical_name.clone();
    }
    if entity.external_id.is_none() {
        entity.external_id = mention.external_id.clone();
    }

    if mention.declared_type.trim().is_empty() {
        return;
    }
    let outranks = mention.source.priority() > entity.type_source.priority();
    if outranks || entity.entity_type.trim().is_empty() {
        entity.entity_type = mention.declared_type.clone();
        entity.type_source = mention.source;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ctix_core::Source;
    use std::collections::BTreeSet;

    #[test]
    fn test_same_key_merges_sources() {
        let mentions = vec![
            RawMention::new("APT28 has", "HackOrg", Source::Merged),
            RawMention::new("apt28", "intrusion-set", Source::RelationExtraction),
        ];

        let index = build_index(&mentions);
        assert_eq!(index.len(), 1);

        let entity = &index["apt28"];
        assert_eq!(entity.text, "APT28");
        assert_eq!(entity.entity_type, "HackOrg");
        assert_eq!(entity.mention_count, 2);
        assert_eq!(
            entity.sources,
            BTreeSet::from([Source::Merged, Source::RelationExtraction])
        );
    }

    #[test]
    fn test_knowledge_base_type_outranks_free_text() {
        let mentions = vec![
            RawMention::new("Sofacy", "HackOrg", Source::Merged),
            RawMention::new("sofacy", "intrusion-set", Source::KnowledgeBase)
                .with_canonical_name("APT28")
                .with_external_id("G0007"),
        ];

        let index = build_index(&mentions);
        let entity = &index["sofacy"];
        assert_eq!(entity.entity_type, "intrusion-set");
        assert_eq!(entity.type_source, Source::KnowledgeBase);
        assert_eq!(entity.canonical_name.as_deref(), Some("APT28"));
        assert_eq!(entity.external_id.as_deref(), Some("G0007"));
        assert_eq!(entity.text, "Sofacy");
    }

    #[test]
    fn test_lower_priority_never_replaces_type() {
        let mentions = vec![
            RawMention::new("mimikatz", "tool", Source::KnowledgeBase),
            RawMention::new("Mimikatz", "Tool", Source::Indicator),
            RawMention::new("Mimikatz", "Malware", Source::Merged),
        ];

        let index = build_index(&mentions);
        assert_eq!(index["mimikatz"].entity_type, "tool");
        assert_eq!(index["mimikatz"].type_source, Source::KnowledgeBase);
    }

    #[test]
    fn test_first_seen_wins_on_equal_priority() {
        let mentions = vec![
            RawMention::new("Tasklist", "Tool", Source::Merged),
            RawMention::new("Tasklist", "Malware", Source::Novel),
        ];

        let index = build_index(&mentions);
        assert_eq!(index["tasklist"].entity_type, "Tool");
        assert_eq!(index["tasklist"].type_source, Source::Merged);
    }

    #[test]
    fn test_first_non_empty_identifiers_are_kept() {
        let mentions = vec![
            RawMention::new("T1059", "attack-pattern", Source::AttackTechnique),
            RawMention::new("T1059", "attack-pattern", Source::KnowledgeBase)
                .with_external_id("T1059"),
            RawMention::new("T1059", "attack-pattern", Source::KnowledgeBase)
                .with_external_id("T9999"),
        ];

        let index = build_index(&mentions);
        assert_eq!(index["t1059"].external_id.as_deref(), Some("T1059"));
    }

    #[test]
    fn test_blank_mentions_are_skipped() {
        let mentions = vec![
            RawMention::new("   ", "Tool", Source::Merged),
            RawMention::new("", "Tool", Source::Merged),
        ];
        assert!(build_index(&mentions).is_empty());
    }

    #[test]
    fn test_batches_fold_in_order() {
        let mut merged = MentionBatch::new(Source::Merged);
        merged.push("Andariel", "HackOrg");
        let mut kb = MentionBatch::new(Source::KnowledgeBase);
        kb.push("ANDARIEL", "intrusion-set");
        kb.push("Tasklist", "tool");

        let index = build_index_from_batches(&[merged, kb]);
        assert_eq!(index.len(), 2);
        assert_eq!(index["andariel"].text, "Andariel");
        assert_eq!(index["andariel"].entity_type, "intrusion-set");
    }

    #[test]
    fn test_keys_are_unique_after_normalization() {
        let mentions: Vec<RawMention> = ["Black Mine", "black mine.", "  BLACK   MINE ", "the Black Mine"]
            .iter()
            .map(|t| RawMention::new(*t, "Campaign", Source::Merged))
            .collect();

        let index = build_index(&mentions);
        assert_eq!(index.len(), 1);
        assert_eq!(index["black mine"].mention_count, 4);
    }
}
