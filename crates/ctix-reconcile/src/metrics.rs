//! Summary counts
//!
//! Per-document entity and relation summaries plus the cross-document
//! aggregate carried by the consolidated result.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use ctix_core::MentionBatch;

use crate::index::IdentityIndex;
use crate::merge::MergedDocument;
use crate::validate::{RejectedRelation, ValidatedRelation};

// ============================================================================
// Entity Summary
// ============================================================================

/// Entity counts for one document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySummary {
    /// Raw mentions across every channel
    pub total_mentions: usize,
    /// Canonical entities in the identity index
    pub unique_entity_texts: usize,
    /// Raw mentions per channel
    pub by_source: BTreeMap<String, usize>,
    /// Canonical entities per resolved type
    pub by_type: BTreeMap<String, usize>,
    /// Canonical entities with no validated relation
    pub needing_relations: usize,
}

impl EntitySummary {
    pub fn from_parts(batches: &[MentionBatch], index: &IdentityIndex, needing: usize) -> Self {
        let mut by_source = BTreeMap::new();
        for batch in batches {
            *by_source.entry(batch.source.to_string()).or_insert(0) += batch.len();
        }

        let mut by_type = BTreeMap::new();
        for entity in index.values() {
            *by_type.entry(type_label(&entity.entity_type)).or_insert(0) += 1;
        }

        Self {
            total_mentions: batches.iter().map(MentionBatch::len).sum(),
            unique_entity_texts: index.len(),
            by_source,
            by_type,
            needing_relations: needing,
        }
    }

    /// Fraction of canonical entities covered by a validated relation
    pub fn coverage(&self) -> f32 {
        if self.unique_entity_texts == 0 {
            0.0
        } else {
            self.unique_entity_texts.saturating_sub(self.needing_relations) as f32
                / self.unique_entity_texts as f32
        }
    }
}

// ============================================================================
// Relation Summary
// ============================================================================

/// Relation counts for one document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationSummary {
    /// Validated relations after deduplication
    pub total_relations: usize,
    pub unique_relation_types: usize,
    pub relation_type_counts: BTreeMap<String, usize>,
    /// `"HeadType -> TailType"` occurrence counts
    pub entity_pair_patterns: BTreeMap<String, usize>,
    pub rejected_relations: usize,
    pub rejection_reasons: BTreeMap<String, usize>,
    pub duplicates_dropped: usize,
    /// Candidates read from the relation extractor
    pub candidate_count: usize,
}

impl RelationSummary {
    pub fn from_parts(
        validated: &[ValidatedRelation],
        rejected: &[RejectedRelation],
        duplicates_dropped: usize,
        candidate_count: usize,
    ) -> Self {
        let mut relation_type_counts = BTreeMap::new();
        let mut entity_pair_patterns = BTreeMap::new();
        for relation in validated {
            *relation_type_counts
                .entry(relation.relation.clone())
                .or_insert(0) += 1;
            *entity_pair_patterns
                .entry(relation.type_pattern())
                .or_insert(0) += 1;
        }

        let mut rejection_reasons = BTreeMap::new();
        for relation in rejected {
            *rejection_reasons
                .entry(relation.reason.to_string())
                .or_insert(0) += 1;
        }

        Self {
            total_relations: validated.len(),
            unique_relation_types: relation_type_counts.len(),
            relation_type_counts,
            entity_pair_patterns,
            rejected_relations: rejected.len(),
            rejection_reasons,
            duplicates_dropped,
            candidate_count,
        }
    }

    /// Fraction of candidates that validated (duplicates count as validated)
    pub fn validation_rate(&self) -> f32 {
        if self.candidate_count == 0 {
            0.0
        } else {
            (self.total_relations + self.duplicates_dropped) as f32 / self.candidate_count as f32
        }
    }
}

// ============================================================================
// Aggregate Counts
// ============================================================================

/// Counts summed over every document of a consolidated result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateCounts {
    pub total_entities: usize,
    pub total_mentions: usize,
    pub total_relations: usize,
    pub total_rejected_relations: usize,
    pub total_entities_needing_relations: usize,
    pub entities_by_type: BTreeMap<String, usize>,
    pub relation_type_counts: BTreeMap<String, usize>,
}

impl AggregateCounts {
    /// Add one document's summaries
    pub fn add_document(&mut self, document: &MergedDocument) {
        let entities = document.entity_summary();
        let relations = document.relation_summary();

        self.total_entities += entities.unique_entity_texts;
        self.total_mentions += entities.total_mentions;
        self.total_entities_needing_relations += entities.needing_relations;
        self.total_relations += relations.total_relations;
        self.total_rejected_relations += relations.rejected_relations;

        add_counts(&mut self.entities_by_type, &entities.by_type);
        add_counts(&mut self.relation_type_counts, &relations.relation_type_counts);
    }

    /// Human-readable multi-line report
    pub fn report(&self) -> String {
        let mut lines = vec![
            format!("Entities:            {}", self.total_entities),
            format!("Mentions:            {}", self.total_mentions),
            format!("Validated relations: {}", self.total_relations),
            format!("Rejected relations:  {}", self.total_rejected_relations),
            format!("Needing relations:   {}", self.total_entities_needing_relations),
        ];

        if !self.relation_type_counts.is_empty() {
            lines.push("Relation types:".to_string());
            lines.extend(
                self.relation_type_counts
                    .iter()
                    .map(|(label, count)| format!("  {label}: {count}")),
            );
        }

        lines.join("\n")
    }
}

fn add_counts(into: &mut BTreeMap<String, usize>, from: &BTreeMap<String, usize>) {
    for (key, count) in from {
        *into.entry(key.clone()).or_insert(0) += count;
    }
}

pub(crate) fn type_label(entity_type: &str) -> String {
    let trimmed = entity_type.trim();
    if trimmed.is_empty() {
        "Unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::build_index_from_batches;
    use crate::matcher::EntityMatcher;
    use crate::validate::validate;
    use ctix_core::{RelationCandidate, Source};

    fn batches() -> Vec<MentionBatch> {
        let mut merged = MentionBatch::new(Source::Merged);
        merged.push("Andariel", "HackOrg");
        merged.push("Tasklist", "Tool");
        merged.push("Black Mine", "");
        let mut kb = MentionBatch::new(Source::KnowledgeBase);
        kb.push("andariel", "intrusion-set");
        vec![merged, kb]
    }

    #[test]
    fn test_entity_summary_counts() {
        let batches = batches();
        let index = build_index_from_batches(&batches);
        let summary = EntitySummary::from_parts(&batches, &index, 1);

        assert_eq!(summary.total_mentions, 4);
        assert_eq!(summary.unique_entity_texts, 3);
        assert_eq!(summary.by_source["merged"], 3);
        assert_eq!(summary.by_source["kb"], 1);
        assert_eq!(summary.by_type["intrusion-set"], 1);
        assert_eq!(summary.by_type["Unknown"], 1);
        assert!((summary.coverage() - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_relation_summary_counts() {
        let index = build_index_from_batches(&batches());
        let candidates = vec![
            RelationCandidate::new("Andariel", "uses", "Tasklist", 1).with_types("HackOrg", "Tool"),
            RelationCandidate::new("Andariel", "uses", "Tasklist", 1).with_types("HackOrg", "Tool"),
            RelationCandidate::new("Andariel", "targets", "XAgent", 2),
        ];
        let validation = validate(&candidates, &index, &EntityMatcher::new());
        let duplicates = validation.duplicates_dropped;
        let (validated, rejected) = validation.into_parts();

        let summary = RelationSummary::from_parts(&validated, &rejected, duplicates, 3);
        assert_eq!(summary.total_relations, 1);
        assert_eq!(summary.unique_relation_types, 1);
        assert_eq!(summary.entity_pair_patterns["HackOrg -> Tool"], 1);
        assert_eq!(summary.rejection_reasons["tail-unresolved"], 1);
        assert_eq!(summary.duplicates_dropped, 1);
        assert!((summary.validation_rate() - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_summaries_have_zero_rates() {
        assert_eq!(EntitySummary::default().coverage(), 0.0);
        assert_eq!(RelationSummary::default().validation_rate(), 0.0);
    }

    #[test]
    fn test_coverage_with_inconsistent_counts() {
        let summary = EntitySummary {
            unique_entity_texts: 2,
            needing_relations: 5,
            ..Default::default()
        };
        assert_eq!(summary.coverage(), 0.0);
    }

    #[test]
    fn test_summary_field_names() {
        let json = serde_json::to_value(RelationSummary::default()).unwrap();
        assert!(json.get("totalRelations").is_some());
        assert!(json.get("entityPairPatterns").is_some());
        assert!(json.get("candidateCount").is_some());
    }
}
