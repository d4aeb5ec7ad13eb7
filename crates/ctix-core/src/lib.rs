//! CTIX Core - Domain models, errors, and shared types
//!
//! This crate defines the core abstractions used throughout CTIX:
//! - Provenance channels (`Source`) and their conflict priority
//! - Raw entity mentions and provenance-tagged mention batches
//! - Canonical (merged) entities
//! - Relation candidates produced by relation extraction
//! - Common error types
//! - Configuration management

pub mod config;

pub use config::{AppConfig, BatchConfig, ConfigError, LoggingConfig, MatchingConfig};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for CTIX operations
#[derive(Error, Debug)]
pub enum CtixError {
    #[error("Malformed input for document {document}: {reason}")]
    InputMalformed { document: String, reason: String },

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CtixError {
    /// Shorthand for an `InputMalformed` error
    pub fn malformed(document: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InputMalformed {
            document: document.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CtixError>;

// ============================================================================
// Provenance
// ============================================================================

/// Extraction channel a mention originated from
///
/// When two mentions of the same entity disagree on type, the channel with
/// the higher [`Source::priority`] decides:
/// - `KnowledgeBase`: curated knowledge-base match (highest)
/// - `Indicator`: indicator-of-compromise extraction
/// - `AttackTechnique`: ATT&CK technique tagging
/// - `Merged`, `Novel`, `RelationExtraction`: free-text model output (lowest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "merged")]
    Merged,
    #[serde(rename = "kb")]
    KnowledgeBase,
    #[serde(rename = "ioc")]
    Indicator,
    #[serde(rename = "attack_technique")]
    AttackTechnique,
    #[serde(rename = "novel")]
    Novel,
    #[serde(rename = "relationship_extraction")]
    RelationExtraction,
}

impl Source {
    /// All channels, in the order batches are folded into an index
    pub const ALL: [Source; 6] = [
        Source::Merged,
        Source::KnowledgeBase,
        Source::Indicator,
        Source::Novel,
        Source::AttackTechnique,
        Source::RelationExtraction,
    ];

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merged => "merged",
            Self::KnowledgeBase => "kb",
            Self::Indicator => "ioc",
            Self::AttackTechnique => "attack_technique",
            Self::Novel => "novel",
            Self::RelationExtraction => "relationship_extraction",
        }
    }

    /// Type-conflict priority (higher wins)
    pub fn priority(&self) -> u8 {
        match self {
            Self::KnowledgeBase => 4,
            Self::Indicator => 3,
            Self::AttackTechnique => 2,
            Self::Merged | Self::Novel | Self::RelationExtraction => 1,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Entity Mentions
// ============================================================================

/// A single entity mention as produced by an upstream extraction channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMention {
    /// Mention text as extracted
    pub text: String,

    /// Entity type declared by the channel
    pub declared_type: String,

    /// Originating channel
    pub source: Source,

    /// Canonical name (knowledge-base matches)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_name: Option<String>,

    /// External identifier, e.g. an ATT&CK id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl RawMention {
    /// Create a new mention
    pub fn new(text: impl Into<String>, declared_type: impl Into<String>, source: Source) -> Self {
        Self {
            text: text.into(),
            declared_type: declared_type.into(),
            source,
            canonical_name: None,
            external_id: None,
        }
    }

    /// Set canonical name (empty strings are ignored)
    pub fn with_canonical_name(mut self, name: impl Into<String>) -> Self {
        self.canonical_name = non_empty(name.into());
        self
    }

    /// Set external id (empty strings are ignored)
    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = non_empty(id.into());
        self
    }
}

/// Mentions that all came from the same channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionBatch {
    pub source: Source,
    pub mentions: Vec<RawMention>,
}

impl MentionBatch {
    /// Create an empty batch for a channel
    pub fn new(source: Source) -> Self {
        Self {
            source,
            mentions: Vec::new(),
        }
    }

    /// Add a plain mention tagged with this batch's channel
    pub fn push(&mut self, text: impl Into<String>, declared_type: impl Into<String>) {
        self.mentions
            .push(RawMention::new(text, declared_type, self.source));
    }

    /// Add a fully built mention; its source is overwritten by the batch's
    pub fn push_mention(&mut self, mut mention: RawMention) {
        mention.source = self.source;
        self.mentions.push(mention);
    }

    pub fn len(&self) -> usize {
        self.mentions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mentions.is_empty()
    }
}

/// The merged representation of every mention sharing one identity key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEntity {
    /// Identity key (lowercased normalized text)
    pub key: String,

    /// Display text (normalized, original case)
    pub text: String,

    /// Resolved entity type
    #[serde(rename = "type")]
    pub entity_type: String,

    /// Channel that supplied the resolved type
    pub type_source: Source,

    /// Every channel that mentioned this entity
    pub sources: BTreeSet<Source>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// Number of raw mentions folded into this entity
    pub mention_count: usize,
}

impl CanonicalEntity {
    /// Create a canonical entity from its first mention
    pub fn from_mention(key: String, text: String, mention: &RawMention) -> Self {
        Self {
            key,
            text,
            entity_type: mention.declared_type.clone(),
            type_source: mention.source,
            sources: BTreeSet::from([mention.source]),
            canonical_name: mention.canonical_name.clone(),
            external_id: mention.external_id.clone(),
            mention_count: 1,
        }
    }
}

// ============================================================================
// Relation Candidates
// ============================================================================

/// One raw relation triple with its sentence provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationCandidate {
    pub head_text: String,
    pub head_type: String,
    pub relation_label: String,
    pub tail_text: String,
    pub tail_type: String,
    pub sentence_id: u32,
    #[serde(default, skip_serializing)]
    pub sentence_text: String,
}

impl RelationCandidate {
    /// Create a new candidate with empty types and sentence text
    pub fn new(
        head: impl Into<String>,
        relation: impl Into<String>,
        tail: impl Into<String>,
        sentence_id: u32,
    ) -> Self {
        Self {
            head_text: head.into(),
            head_type: String::new(),
            relation_label: relation.into(),
            tail_text: tail.into(),
            tail_type: String::new(),
            sentence_id,
            sentence_text: String::new(),
        }
    }

    /// Set head and tail types
    pub fn with_types(mut self, head_type: impl Into<String>, tail_type: impl Into<String>) -> Self {
        self.head_type = head_type.into();
        self.tail_type = tail_type.into();
        self
    }

    /// Set sentence text
    pub fn with_sentence(mut self, text: impl Into<String>) -> Self {
        self.sentence_text = text.into();
        self
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

// ============================================================================
// Tests
// ============================================================================
