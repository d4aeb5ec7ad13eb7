//! Document merge aggregator
//!
//! Runs the per-document pipeline in a fixed order (mentions, identity
//! index, validation, gaps, counts) and freezes the result into a
//! [`MergedDocument`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ctix_core::{CtixError, MatchingConfig, MentionBatch, RelationCandidate, Result};

use crate::gaps::{find_gaps, unresolved_texts};
use crate::index::{build_index_from_batches, IdentityIndex};
use crate::input::{DocumentSources, SourceFiles, Technique, MISSING_FILE};
use crate::matcher::EntityMatcher;
use crate::metrics::{type_label, EntitySummary, RelationSummary};
use crate::validate::{validate, RejectedRelation, ValidatedRelation};
use crate::{DocumentMerger, EntityResolver};

// ============================================================================
// Merged Document
// ============================================================================

/// Provenance metadata of a merged document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub source_files: SourceFiles,
    pub total_sentences: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntitySection {
    summary: EntitySummary,
    #[serde(with = "detailed_list")]
    detailed_list: IdentityIndex,
    /// Resolved type -> display texts
    by_type: BTreeMap<String, Vec<String>>,
}

/// ATT&CK context of a document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackTtps {
    pub tactics: Vec<Value>,
    pub techniques: Vec<Technique>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelationshipSection {
    summary: RelationSummary,
    validated_relations: Vec<ValidatedRelation>,
    rejected_relations: Vec<RejectedRelation>,
    entities_needing_relationship_extraction: BTreeSet<String>,
    unresolved_entity_texts: BTreeSet<String>,
}

/// Reconciled view of one document
///
/// Built once by [`merge`] / [`merge_parts`] and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedDocument {
    document_name: String,
    metadata: DocumentMetadata,
    entities: EntitySection,
    attack_ttps: AttackTtps,
    ioc_indicators: BTreeMap<String, Vec<String>>,
    /// Sentence id -> text, for sentences with a validated relation; every
    /// sentence when none has one
    sentences: BTreeMap<u32, String>,
    relationships: RelationshipSection,
}

impl MergedDocument {
    pub fn document_name(&self) -> &str {
        &self.document_name
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    pub fn entity_summary(&self) -> &EntitySummary {
        &self.entities.summary
    }

    pub fn relation_summary(&self) -> &RelationSummary {
        &self.relationships.summary
    }

    /// Identity index of the document
    pub fn entities(&self) -> &IdentityIndex {
        &self.entities.detailed_list
    }

    pub fn entities_by_type(&self) -> &BTreeMap<String, Vec<String>> {
        &self.entities.by_type
    }

    pub fn attack_ttps(&self) -> &AttackTtps {
        &self.attack_ttps
    }

    pub fn ioc_indicators(&self) -> &BTreeMap<String, Vec<String>> {
        &self.ioc_indicators
    }

    pub fn sentences(&self) -> &BTreeMap<u32, String> {
        &self.sentences
    }

    pub fn validated_relations(&self) -> &[ValidatedRelation] {
        &self.relationships.validated_relations
    }

    pub fn rejected_relations(&self) -> &[RejectedRelation] {
        &self.relationships.rejected_relations
    }

    /// Index keys with no validated relation
    pub fn entities_needing_relations(&self) -> &BTreeSet<String> {
        &self.relationships.entities_needing_relationship_extraction
    }

    /// Relation-side texts that matched no entity
    pub fn unresolved_entity_texts(&self) -> &BTreeSet<String> {
        &self.relationships.unresolved_entity_texts
    }

    /// Whether the relation extraction result was absent
    pub fn relations_missing(&self) -> bool {
        self.metadata.source_files.relationship_extraction == MISSING_FILE
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// Merge already-extracted mention batches and candidates
///
/// Batches are folded in slice order; candidates are validated in order.
pub fn merge_parts<R>(
    document_name: impl Into<String>,
    batches: &[MentionBatch],
    candidates: &[RelationCandidate],
    resolver: &R,
) -> MergedDocument
where
    R: EntityResolver + ?Sized,
{
    let document_name = document_name.into();

    let index = build_index_from_batches(batches);
    let validation = validate(candidates, &index, resolver);
    let gaps = find_gaps(&index, validation.validated());
    let unresolved = unresolved_texts(validation.rejected());
    let duplicates_dropped = validation.duplicates_dropped;
    let (validated, rejected) = validation.into_parts();

    let entity_summary = EntitySummary::from_parts(batches, &index, gaps.len());
    let relation_summary =
        RelationSummary::from_parts(&validated, &rejected, duplicates_dropped, candidates.len());

    let covered: BTreeSet<u32> = validated.iter().map(|r| r.sentence_id).collect();
    let sentences: BTreeMap<u32, String> = candidates
        .iter()
        .filter(|c| covered.contains(&c.sentence_id) && !c.sentence_text.trim().is_empty())
        .map(|c| (c.sentence_id, c.sentence_text.clone()))
        .collect();

    let mut by_type: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entity in index.values() {
        by_type
            .entry(type_label(&entity.entity_type))
            .or_default()
            .push(entity.text.clone());
    }

    tracing::debug!(
        document = %document_name,
        entities = index.len(),
        validated = validated.len(),
        rejected = rejected.len(),
        gaps = gaps.len(),
        "document merged"
    );

    MergedDocument {
        document_name,
        metadata: DocumentMetadata {
            source_files: SourceFiles {
                entity_extraction: String::new(),
                relationship_extraction: MISSING_FILE.to_string(),
            },
            total_sentences: 0,
        },
        entities: EntitySection {
            summary: entity_summary,
            detailed_list: index,
            by_type,
        },
        attack_ttps: AttackTtps::default(),
        ioc_indicators: BTreeMap::new(),
        sentences,
        relationships: RelationshipSection {
            summary: relation_summary,
            validated_relations: validated,
            rejected_relations: rejected,
            entities_needing_relationship_extraction: gaps,
            unresolved_entity_texts: unresolved,
        },
    }
}

/// Merge one document's loaded sources
///
/// Fails with `InputMalformed` when the entity extraction result is absent.
pub fn merge(sources: &DocumentSources, config: &MatchingConfig) -> Result<MergedDocument> {
    if sources.entity_extraction.is_none() {
        return Err(CtixError::malformed(
            &sources.document_name,
            "entity extraction result is missing",
        ));
    }

    let batches = sources.mention_batches();
    let candidates = sources.relation_candidates();
    let matcher = EntityMatcher::with_config(config);

    let mut document = merge_parts(sources.published_name(), &batches, &candidates, &matcher);
    document.metadata = DocumentMetadata {
        source_files: sources.source_files.clone(),
        total_sentences: sources.total_sentences(),
    };
    document.attack_ttps = AttackTtps {
        tactics: sources.tactics(),
        techniques: sources.techniques(),
    };
    document.ioc_indicators = sources.indicator_groups();
    if document.sentences.is_empty() {
        document.sentences = sources.sentence_texts();
    }

    if sources.relations.is_none() {
        tracing::warn!(
            document = %sources.document_name,
            "no relation extraction result, merged with zero candidates"
        );
    }

    Ok(document)
}

/// [`DocumentMerger`] backed by [`merge`]
#[derive(Debug, Clone, Default)]
pub struct ReconcileMerger {
    matching: MatchingConfig,
}

impl ReconcileMerger {
    pub fn new(matching: MatchingConfig) -> Self {
        Self { matching }
    }
}

impl DocumentMerger for ReconcileMerger {
    fn merge(&self, sources: &DocumentSources) -> Result<MergedDocument> {
        merge(sources, &self.matching)
    }
}

/// The identity index travels as a list of entities
mod detailed_list {
    use serde::{Deserialize, Deserializer, Serializer};

    use ctix_core::CanonicalEntity;

    use crate::index::IdentityIndex;

    pub fn serialize<S: Serializer>(
        index: &IdentityIndex,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(index.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<IdentityIndex, D::Error> {
        let list = Vec::<CanonicalEntity>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|e| (e.key.clone(), e)).collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
