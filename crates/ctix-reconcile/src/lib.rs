//! CTIX Reconcile - Entity/relation reconciliation engine
//!
//! Merges the entity lists produced by several extraction channels into one
//! identity index per document, anchors relation triples to it, and reports
//! which entities still lack relations.

use ctix_core::Result;

pub mod batch;
pub mod gaps;
pub mod index;
pub mod input;
pub mod matcher;
pub mod merge;
pub mod metrics;
pub mod normalize;
pub mod validate;

pub use batch::{BatchSummary, ConsolidatedResult, DocumentStatus};
pub use index::{build_index, build_index_from_batches, IdentityIndex};
pub use input::DocumentSources;
pub use matcher::{EntityMatcher, MatchKind, Resolution};
pub use merge::{merge, merge_parts, MergedDocument, ReconcileMerger};
pub use normalize::{comparison_key, is_meaningful, normalize};
pub use validate::{validate, RejectedRelation, RejectionReason, ValidatedRelation};

/// Trait for resolving relation-side text to an identity index key
pub trait EntityResolver: Send + Sync {
    fn resolve(&self, text: &str, index: &IdentityIndex) -> Option<Resolution>;

    /// Resolve several texts against the same index, in order
    fn resolve_all(&self, texts: &[&str], index: &IdentityIndex) -> Vec<Option<Resolution>> {
        texts.iter().map(|text| self.resolve(text, index)).collect()
    }
}

/// Trait for turning loaded document sources into a merged document
pub trait DocumentMerger: Send + Sync {
    fn merge(&self, sources: &DocumentSources) -> Result<MergedDocument>;
}
