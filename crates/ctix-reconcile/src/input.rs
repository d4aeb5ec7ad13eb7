//! Input shapes
//!
//! Deserializable forms of the per-document extraction results and the
//! conversion from them into mention batches and relation candidates.
//! Parsing is lenient: unknown fields are ignored and list entries of the
//! wrong shape are skipped rather than failing the document.

use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use ctix_core::{CtixError, MentionBatch, RawMention, RelationCandidate, Result, Source};

use crate::normalize::is_meaningful;

static TECHNIQUE_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(T\d{4})(?:\.\d{3})?").expect("valid technique regex"));

/// Placeholder file name for a missing relation extraction result
pub const MISSING_FILE: &str = "MISSING";

/// Placeholder file name for a relation extraction result that failed to parse
pub const MALFORMED_FILE: &str = "MALFORMED";

// ============================================================================
// Entity Extraction (required)
// ============================================================================

/// Grouped entity extraction result for one document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityExtraction {
    /// Source document file name
    #[serde(default)]
    pub file: String,

    /// Entity texts grouped by type (`malware`, `tools`, `ips`, ...)
    #[serde(default)]
    pub entities: BTreeMap<String, Value>,

    #[serde(default)]
    pub attack: AttackSection,

    /// Paths of the per-channel files this result was merged from
    #[serde(default)]
    pub provenance: Provenance,
}

/// ATT&CK tactics and techniques attached to an extraction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttackSection {
    #[serde(default)]
    pub tactics: Vec<Value>,
    #[serde(default)]
    pub techniques: Vec<Value>,
}

/// Per-channel file paths recorded by the entity merge step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default)]
    pub ioc_file: Option<String>,
    #[serde(default)]
    pub kb_file: Option<String>,
    #[serde(default)]
    pub novel_file: Option<String>,
    #[serde(default)]
    pub ttp_file: Option<String>,
}

// ============================================================================
// Optional Channels
// ============================================================================

/// Indicator-of-compromise extraction result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorFile {
    #[serde(default)]
    pub iocs: BTreeMap<String, Value>,
}

/// Knowledge-base matching result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBaseFile {
    #[serde(default)]
    pub kb_matches: KbMatches,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KbMatches {
    #[serde(default)]
    pub matches: Vec<Value>,
    #[serde(default)]
    pub nationalities: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct KbMatch {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    canonical: Option<String>,
    #[serde(default, rename = "type")]
    match_type: Option<String>,
    #[serde(default)]
    external_id: Option<String>,
}

/// Novel-entity extraction result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NovelFile {
    #[serde(default, alias = "novel_entities")]
    pub novel: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TypedText {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    canonical: Option<String>,
    #[serde(default, rename = "type")]
    entity_type: Option<String>,
}

/// ATT&CK technique classification result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechniqueFile {
    #[serde(default)]
    pub ttp_details: TtpDetails,
    #[serde(default)]
    pub iocs: TtpIocs,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TtpDetails {
    #[serde(default)]
    pub techniques: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TtpIocs {
    #[serde(default)]
    pub attack_techniques: EnterpriseTechniques,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnterpriseTechniques {
    #[serde(default)]
    pub enterprise: Vec<Value>,
}

/// Scored ATT&CK technique, reduced to its main technique code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Technique {
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawTechnique {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

// ============================================================================
// Relation Extraction
// ============================================================================

/// Joint entity/relation extraction result for one document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationExtraction {
    #[serde(default, deserialize_with = "null_as_default")]
    pub document_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_sentences: u32,
    /// Per-sentence records; entries of the wrong shape are skipped
    #[serde(default, deserialize_with = "null_as_default")]
    pub sentences: Vec<Value>,
    /// Flat relation list, used only when `sentences` is empty
    #[serde(default, deserialize_with = "null_as_default")]
    pub all_relations: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub all_entities: Vec<Value>,
}

/// One sentence of a relation extraction; `null` fields read as empty
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentenceRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub sentence_id: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub relations: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RelationRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    head: String,
    #[serde(default, deserialize_with = "null_as_default")]
    head_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    relation: String,
    #[serde(default, deserialize_with = "null_as_default")]
    tail: String,
    #[serde(default, deserialize_with = "null_as_default")]
    tail_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    sentence_id: u32,
}

// ============================================================================
// Document Sources
// ============================================================================

/// File names recorded in the merged output's metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFiles {
    pub entity_extraction: String,
    pub relationship_extraction: String,
}

/// Everything loaded for one document
#[derive(Debug, Clone, Default)]
pub struct DocumentSources {
    /// Batch name of the document (file base name)
    pub document_name: String,
    pub entity_extraction: Option<EntityExtraction>,
    pub indicators: Option<IndicatorFile>,
    pub knowledge_base: Option<KnowledgeBaseFile>,
    pub novel: Option<NovelFile>,
    pub techniques: Option<TechniqueFile>,
    pub relations: Option<RelationExtraction>,
    pub source_files: SourceFiles,
}

impl DocumentSources {
    /// Create empty sources for a document
    pub fn new(document_name: impl Into<String>) -> Self {
        Self {
            document_name: document_name.into(),
            source_files: SourceFiles {
                entity_extraction: String::new(),
                relationship_extraction: MISSING_FILE.to_string(),
            },
            ..Default::default()
        }
    }

    pub fn with_entity_extraction(mut self, extraction: EntityExtraction) -> Self {
        self.entity_extraction = Some(extraction);
        self
    }

    pub fn with_indicators(mut self, indicators: IndicatorFile) -> Self {
        self.indicators = Some(indicators);
        self
    }

    pub fn with_knowledge_base(mut self, kb: KnowledgeBaseFile) -> Self {
        self.knowledge_base = Some(kb);
        self
    }

    pub fn with_novel(mut self, novel: NovelFile) -> Self {
        self.novel = Some(novel);
        self
    }

    pub fn with_techniques(mut self, techniques: TechniqueFile) -> Self {
        self.techniques = Some(techniques);
        self
    }

    pub fn with_relations(mut self, relations: RelationExtraction) -> Self {
        self.relations = Some(relations);
        self
    }

    /// Name the merged record is published under
    pub fn published_name(&self) -> String {
        self.entity_extraction
            .as_ref()
            .map(|e| e.file.trim())
            .filter(|f| !f.is_empty())
            .unwrap_or(self.document_name.as_str())
            .to_string()
    }

    /// Entity groups from the entity extraction, string entries only
    pub fn entity_groups(&self) -> BTreeMap<String, Vec<String>> {
        self.entity_extraction
            .as_ref()
            .map(|e| {
                e.entities
                    .iter()
                    .map(|(group, list)| (group.clone(), string_list(list)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Indicator lists by kind, deduplicated in order
    ///
    /// Domains and email addresses are case-folded.
    pub fn indicator_groups(&self) -> BTreeMap<String, Vec<String>> {
        let Some(indicators) = &self.indicators else {
            return BTreeMap::new();
        };

        indicators
            .iocs
            .iter()
            .filter(|(_, list)| list.is_array())
            .map(|(kind, list)| {
                let fold_case = kind == "domains" || kind.starts_with("email");
                let values = string_list(list).into_iter().map(|v| {
                    if fold_case {
                        v.to_lowercase()
                    } else {
                        v
                    }
                });
                (kind.clone(), unique_in_order(values))
            })
            .collect()
    }

    /// ATT&CK tactics named by the entity extraction
    pub fn tactics(&self) -> Vec<Value> {
        self.entity_extraction
            .as_ref()
            .map(|e| e.attack.tactics.clone())
            .unwrap_or_default()
    }

    /// Techniques from every channel, unique by main code
    ///
    /// The first non-empty name and score seen for a code are kept.
    pub fn techniques(&self) -> Vec<Technique> {
        let mut raw: Vec<RawTechnique> = Vec::new();
        if let Some(extraction) = &self.entity_extraction {
            raw.extend(parse_entries(&extraction.attack.techniques));
        }
        if let Some(file) = &self.techniques {
            raw.extend(parse_entries(&file.ttp_details.techniques));
            raw.extend(
                string_list_of(&file.iocs.attack_techniques.enterprise)
                    .into_iter()
                    .map(|code| RawTechnique {
                        code: Some(code),
                        ..Default::default()
                    }),
            );
        }

        let mut out: Vec<Technique> = Vec::new();
        for technique in raw {
            let Some(code) = technique.code.as_deref().and_then(main_technique_code) else {
                continue;
            };
            let name = technique.name.unwrap_or_default().trim().to_string();
            match out.iter_mut().find(|t| t.code == code) {
                Some(existing) => {
                    if existing.name.is_empty() {
                        existing.name = name;
                    }
                    if existing.score.is_none() {
                        existing.score = technique.score;
                    }
                }
                None => out.push(Technique {
                    code,
                    name,
                    score: technique.score,
                }),
            }
        }
        out
    }

    /// Provenance-tagged mention batches in fold order
    pub fn mention_batches(&self) -> Vec<MentionBatch> {
        Source::ALL
            .iter()
            .map(|source| self.batch_for(*source))
            .filter(|batch| !batch.is_empty())
            .collect()
    }

    fn batch_for(&self, source: Source) -> MentionBatch {
        let mut batch = MentionBatch::new(source);
        match source {
            Source::Merged => {
                for (group, texts) in self.entity_groups() {
                    for text in texts {
                        batch.push(text, group.as_str());
                    }
                }
            }
            Source::KnowledgeBase => {
                if let Some(kb) = &self.knowledge_base {
                    for m in parse_entries::<KbMatch>(&kb.kb_matches.matches) {
                        let text = first_non_empty(&m.text, &m.canonical);
                        if text.is_empty() {
                            continue;
                        }
                        let match_type = m.match_type.unwrap_or_else(|| "unknown".to_string());
                        batch.push_mention(
                            RawMention::new(text, match_type, source)
                                .with_canonical_name(m.canonical.unwrap_or_default())
                                .with_external_id(m.external_id.unwrap_or_default()),
                        );
                    }
                    for nationality in string_list_of(&kb.kb_matches.nationalities) {
                        batch.push(nationality.to_lowercase(), "nationality");
                    }
                }
            }
            Source::Indicator => {
                for (kind, values) in self.indicator_groups() {
                    for value in values {
                        batch.push(value, kind.as_str());
                    }
                }
            }
            Source::Novel => {
                if let Some(novel) = &self.novel {
                    for entry in parse_entries::<TypedText>(&novel.novel) {
                        let text = first_non_empty(&entry.canonical, &entry.text);
                        if !text.is_empty() {
                            batch.push(text, entry.entity_type.unwrap_or_default());
                        }
                    }
                }
            }
            Source::AttackTechnique => {
                for technique in self.techniques() {
                    let text = if technique.name.is_empty() {
                        technique.code.clone()
                    } else {
                        technique.name.clone()
                    };
                    batch.push_mention(
                        RawMention::new(text, "attack-pattern", source)
                            .with_canonical_name(technique.name)
                            .with_external_id(technique.code),
                    );
                }
            }
            Source::RelationExtraction => {
                if let Some(relations) = &self.relations {
                    for entry in parse_entries::<TypedText>(&relations.all_entities) {
                        let text = entry.text.unwrap_or_default();
                        if is_meaningful(&text) {
                            let entity_type =
                                entry.entity_type.unwrap_or_else(|| "Unknown".to_string());
                            batch.push(text, entity_type);
                        }
                    }
                }
            }
        }
        batch
    }

    /// Well-formed sentence records of the relation extraction
    pub fn sentence_records(&self) -> Vec<SentenceRecord> {
        self.relations
            .as_ref()
            .map(|r| parse_entries(&r.sentences))
            .unwrap_or_default()
    }

    /// Sentence id -> text for every non-empty sentence
    pub fn sentence_texts(&self) -> BTreeMap<u32, String> {
        self.sentence_records()
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| (s.sentence_id, s.text))
            .collect()
    }

    /// Relation candidates flattened in sentence order
    pub fn relation_candidates(&self) -> Vec<RelationCandidate> {
        let Some(relations) = &self.relations else {
            return Vec::new();
        };

        let sentences = self.sentence_records();
        if sentences.is_empty() {
            return parse_entries::<RelationRecord>(&relations.all_relations)
                .into_iter()
                .map(|r| {
                    let sentence_id = r.sentence_id;
                    to_candidate(r, sentence_id, "")
                })
                .collect();
        }

        sentences
            .iter()
            .flat_map(|sentence| {
                parse_entries::<RelationRecord>(&sentence.relations)
                    .into_iter()
                    .map(move |r| to_candidate(r, sentence.sentence_id, &sentence.text))
            })
            .collect()
    }

    /// Sentence count reported by the relation extractor
    pub fn total_sentences(&self) -> u32 {
        self.relations
            .as_ref()
            .map(|r| r.total_sentences.max(self.sentence_records().len() as u32))
            .unwrap_or(0)
    }
}

// ============================================================================
// Parsing helpers
// ============================================================================

/// Parse a required input, mapping failures to `InputMalformed`
pub fn parse_required<T: DeserializeOwned>(document: &str, what: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| CtixError::malformed(document, format!("invalid {what}: {e}")))
}

/// Parse an optional input; malformed content is logged and treated as absent
pub fn parse_optional<T: DeserializeOwned>(document: &str, what: &str, bytes: &[u8]) -> Option<T> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(document, "ignoring malformed {}: {}", what, e);
            None
        }
    }
}

/// Reduce `T1047.001` (or any text containing it) to `T1047`
pub fn main_technique_code(raw: &str) -> Option<String> {
    TECHNIQUE_CODE
        .captures(raw.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_uppercase())
}

fn to_candidate(record: RelationRecord, sentence_id: u32, sentence_text: &str) -> RelationCandidate {
    RelationCandidate::new(record.head, record.relation, record.tail, sentence_id)
        .with_types(record.head_type, record.tail_type)
        .with_sentence(sentence_text)
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn parse_entries<T: DeserializeOwned>(values: &[Value]) -> Vec<T> {
    values
        .iter()
        .filter(|v| v.is_object())
        .filter_map(|v| serde_json::from_value(v.clone()).ok())
        .collect()
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| string_list_of(items))
        .unwrap_or_default()
}

fn string_list_of(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn unique_in_order(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

fn first_non_empty(a: &Option<String>, b: &Option<String>) -> String {
    [a, b]
        .into_iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

// ============================================================================
// Tests
// ============================================================================
