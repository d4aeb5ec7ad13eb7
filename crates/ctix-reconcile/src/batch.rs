//! Batch fold
//!
//! Cross-document consolidation and the per-run status summary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::merge::MergedDocument;
use crate::metrics::AggregateCounts;

const DESCRIPTION: &str =
    "Merged entity and relationship extraction results for every processed document";

// ============================================================================
// Consolidated Result
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedMetadata {
    pub total_documents: usize,
    pub description: String,
}

/// Every merged document of a batch plus aggregate counts
///
/// Built by a commutative, associative fold: [`ConsolidatedResult::combine`]
/// is a map union, and on a name collision the document whose JSON form is
/// byte-greater is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedResult {
    pub metadata: ConsolidatedMetadata,
    pub aggregate_counts: AggregateCounts,
    pub documents: BTreeMap<String, MergedDocument>,
}

impl ConsolidatedResult {
    /// Empty result
    pub fn new() -> Self {
        Self {
            metadata: ConsolidatedMetadata {
                total_documents: 0,
                description: DESCRIPTION.to_string(),
            },
            aggregate_counts: AggregateCounts::default(),
            documents: BTreeMap::new(),
        }
    }

    /// Fold documents into a new result
    pub fn from_documents<I>(documents: I) -> Self
    where
        I: IntoIterator<Item = MergedDocument>,
    {
        let mut result = Self::new();
        for document in documents {
            result.absorb(document);
        }
        result.refresh();
        result
    }

    /// Add one document
    pub fn insert(&mut self, document: MergedDocument) {
        self.absorb(document);
        self.refresh();
    }

    /// Union of two results
    pub fn combine(mut self, other: Self) -> Self {
        for document in other.documents.into_values() {
            self.absorb(document);
        }
        self.refresh();
        self
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn absorb(&mut self, document: MergedDocument) {
        let name = document.document_name().to_string();
        match self.documents.get(&name) {
            Some(existing) if ordering_bytes(existing) >= ordering_bytes(&document) => {
                tracing::debug!(document = %name, "duplicate document name, keeping existing");
            }
            _ => {
                self.documents.insert(name, document);
            }
        }
    }

    fn refresh(&mut self) {
        let mut counts = AggregateCounts::default();
        for document in self.documents.values() {
            counts.add_document(document);
        }
        self.aggregate_counts = counts;
        self.metadata.total_documents = self.documents.len();
    }
}

impl Default for ConsolidatedResult {
    fn default() -> Self {
        Self::new()
    }
}

fn ordering_bytes(document: &MergedDocument) -> Vec<u8> {
    serde_json::to_vec(document).unwrap_or_default()
}

// ============================================================================
// Batch Summary
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failed,
}

/// Outcome of one document in a batch run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStatus {
    pub name: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relations: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_entities: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Status report of a batch run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_documents: usize,
    pub processed_successfully: usize,
    pub failed: usize,
    pub documents: Vec<DocumentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchSummary {
    /// Start a summary stamped with the current time
    pub fn start() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn record_success(&mut self, name: impl Into<String>, document: &MergedDocument) {
        self.documents.push(DocumentStatus {
            name: name.into(),
            status: Status::Success,
            entities: Some(document.entities().len()),
            relations: Some(document.validated_relations().len()),
            missing_entities: Some(document.entities_needing_relations().len()),
            reason: None,
        });
        self.total_documents += 1;
        self.processed_successfully += 1;
    }

    pub fn record_failure(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        self.documents.push(DocumentStatus {
            name: name.into(),
            status: Status::Failed,
            entities: None,
            relations: None,
            missing_entities: None,
            reason: Some(reason.into()),
        });
        self.total_documents += 1;
        self.failed += 1;
    }

    /// Sort entries by name and stamp the finish time
    pub fn finish(mut self) -> Self {
        self.documents.sort_by(|a, b| a.name.cmp(&b.name));
        self.finished_at = Some(Utc::now());
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::EntityMatcher;
    use crate::merge::merge_parts;
    use ctix_core::{MentionBatch, RelationCandidate, Source};

    fn document(name: &str, entities: &[&str], relations: &[(&str, &str, &str)]) -> MergedDocument {
        let mut batch = MentionBatch::new(Source::Merged);
        for text in entities {
            batch.push(*text, "Entity");
        }
        let candidates: Vec<RelationCandidate> = relations
            .iter()
            .enumerate()
            .map(|(i, (h, r, t))| RelationCandidate::new(*h, *r, *t, i as u32 + 1))
            .collect();
        merge_parts(name, &[batch], &candidates, &EntityMatcher::new())
    }

    #[test]
    fn test_from_documents_aggregates() {
        let result = ConsolidatedResult::from_documents(vec![
            document("a", &["Andariel", "Tasklist"], &[("Andariel", "uses", "Tasklist")]),
            document("b", &["APT28"], &[("APT28", "uses", "XAgent")]),
        ]);

        assert_eq!(result.metadata.total_documents, 2);
        assert_eq!(result.aggregate_counts.total_entities, 3);
        assert_eq!(result.aggregate_counts.total_relations, 1);
        assert_eq!(result.aggregate_counts.total_rejected_relations, 1);
        assert_eq!(result.aggregate_counts.total_entities_needing_relations, 1);
        assert_eq!(result.aggregate_counts.relation_type_counts["uses"], 1);
    }

    #[test]
    fn test_combine_is_commutative() {
        let a = ConsolidatedResult::from_documents(vec![document("a", &["Andariel"], &[])]);
        let b = ConsolidatedResult::from_documents(vec![document("b", &["APT28"], &[])]);

        let ab = a.clone().combine(b.clone());
        let ba = b.combine(a);
        assert_eq!(
            serde_json::to_string(&ab).unwrap(),
            serde_json::to_string(&ba).unwrap()
        );
    }

    #[test]
    fn test_name_collision_is_order_independent() {
        let small = document("same", &["Andariel"], &[]);
        let large = document("same", &["Andariel", "Tasklist"], &[]);

        let mut first = ConsolidatedResult::new();
        first.insert(small.clone());
        first.insert(large.clone());

        let mut second = ConsolidatedResult::new();
        second.insert(large);
        second.insert(small);

        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_empty_result() {
        let result = ConsolidatedResult::default();
        assert!(result.is_empty());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["metadata"]["totalDocuments"], 0);
        assert!(json["aggregateCounts"].is_object());
    }

    #[test]
    fn test_batch_summary_sorted_and_counted() {
        let doc = document("b", &["Andariel", "Tasklist"], &[("Andariel", "uses", "Tasklist")]);

        let mut summary = BatchSummary::start();
        summary.record_success("b", &doc);
        summary.record_failure("a", "entity extraction result is missing");
        let summary = summary.finish();

        assert_eq!(summary.total_documents, 2);
        assert_eq!(summary.processed_successfully, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.documents[0].name, "a");
        assert_eq!(summary.documents[0].status, Status::Failed);
        assert_eq!(summary.documents[1].relations, Some(1));
        assert_eq!(summary.documents[1].missing_entities, Some(0));
        assert!(summary.finished_at.is_some());
    }

    #[test]
    fn test_status_json_omits_empty_fields() {
        let mut summary = BatchSummary::default();
        summary.record_failure("x", "bad json");

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["processedSuccessfully"], 0);
        assert_eq!(json["documents"][0]["status"], "failed");
        assert!(json["documents"][0].get("entities").is_none());
        assert!(json.get("startedAt").is_none());
    }
}
