//! Relation validation
//!
//! Checks every relation candidate against the identity index. Candidates
//! whose head and tail both resolve become validated relations (deduplicated
//! per sentence); everything else is kept as a rejection with its reason.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use ctix_core::RelationCandidate;

use crate::index::IdentityIndex;
use crate::matcher::Resolution;
use crate::normalize::normalize;
use crate::EntityResolver;

// ============================================================================
// Outcome Types
// ============================================================================

/// Relation whose head and tail both resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedRelation {
    /// Cleaned head text
    pub head: String,
    pub head_type: String,
    pub relation: String,
    /// Cleaned tail text
    pub tail: String,
    pub tail_type: String,
    pub sentence_id: u32,
    pub resolved_head: Resolution,
    pub resolved_tail: Resolution,
}

impl ValidatedRelation {
    /// Key used to drop repeated triples within one sentence
    pub fn dedup_key(&self) -> (String, String, String, u32) {
        (
            self.resolved_head.key.clone(),
            self.relation.to_lowercase(),
            self.resolved_tail.key.clone(),
            self.sentence_id,
        )
    }

    /// `"HeadType -> TailType"` pattern used in summaries
    pub fn type_pattern(&self) -> String {
        format!("{} -> {}", self.head_type, self.tail_type)
    }
}

/// Why a candidate was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RejectionReason {
    #[serde(rename = "head-unresolved")]
    HeadUnresolved,
    #[serde(rename = "tail-unresolved")]
    TailUnresolved,
    #[serde(rename = "both-unresolved")]
    BothUnresolved,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HeadUnresolved => "head-unresolved",
            Self::TailUnresolved => "tail-unresolved",
            Self::BothUnresolved => "both-unresolved",
        }
    }

    /// Side(s) that failed to resolve
    pub fn missing_side(&self) -> MissingSide {
        match self {
            Self::HeadUnresolved => MissingSide::Head,
            Self::TailUnresolved => MissingSide::Tail,
            Self::BothUnresolved => MissingSide::Both,
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Relation side(s) without a matching entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingSide {
    Head,
    Tail,
    Both,
}

/// Relation that could not be anchored to the identity index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedRelation {
    pub head: String,
    pub head_type: String,
    pub relation: String,
    pub tail: String,
    pub tail_type: String,
    pub sentence_id: u32,
    pub reason: RejectionReason,
    pub missing_side: MissingSide,
    /// Cleaned text of every side that failed to resolve
    pub unresolved_text: Vec<String>,
}

/// Result of validating one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Validated(ValidatedRelation),
    Rejected(RejectedRelation),
}

impl ValidationOutcome {
    pub fn is_validated(&self) -> bool {
        matches!(self, Self::Validated(_))
    }
}

/// Outcomes of a validation pass, in candidate order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    pub outcomes: Vec<ValidationOutcome>,
    /// Validated duplicates dropped by the dedup key
    pub duplicates_dropped: usize,
}

impl Validation {
    /// Validated relations, in candidate order
    pub fn validated(&self) -> impl Iterator<Item = &ValidatedRelation> {
        self.outcomes.iter().filter_map(|o| match o {
            ValidationOutcome::Validated(v) => Some(v),
            ValidationOutcome::Rejected(_) => None,
        })
    }

    /// Rejected relations, in candidate order
    pub fn rejected(&self) -> impl Iterator<Item = &RejectedRelation> {
        self.outcomes.iter().filter_map(|o| match o {
            ValidationOutcome::Rejected(r) => Some(r),
            ValidationOutcome::Validated(_) => None,
        })
    }

    /// Split into validated and rejected lists
    pub fn into_parts(self) -> (Vec<ValidatedRelation>, Vec<RejectedRelation>) {
        let mut validated = Vec::new();
        let mut rejected = Vec::new();
        for outcome in self.outcomes {
            match outcome {
                ValidationOutcome::Validated(v) => validated.push(v),
                ValidationOutcome::Rejected(r) => rejected.push(r),
            }
        }
        (validated, rejected)
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Validate candidates against an identity index
pub fn validate<R>(
    candidates: &[RelationCandidate],
    index: &IdentityIndex,
    resolver: &R,
) -> Validation
where
    R: EntityResolver + ?Sized,
{
    let sides: Vec<(String, String)> = candidates
        .iter()
        .map(|c| (normalize(&c.head_text), normalize(&c.tail_text)))
        .collect();
    let texts: Vec<&str> = sides
        .iter()
        .flat_map(|(head, tail)| [head.as_str(), tail.as_str()])
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let resolved: HashMap<&str, Option<Resolution>> = texts
        .iter()
        .copied()
        .zip(resolver.resolve_all(&texts, index))
        .collect();

    let mut validation = Validation::default();
    let mut seen: HashSet<(String, String, String, u32)> = HashSet::new();

    for (candidate, (head, tail)) in candidates.iter().zip(&sides) {
        let outcome = validate_one(candidate, head, tail, &resolved);

        if let ValidationOutcome::Validated(relation) = &outcome {
            if !seen.insert(relation.dedup_key()) {
                validation.duplicates_dropped += 1;
                continue;
            }
        } else {
            tracing::trace!(
                head = %candidate.head_text,
                tail = %candidate.tail_text,
                "relation rejected"
            );
        }

        validation.outcomes.push(outcome);
    }

    tracing::debug!(
        candidates = candidates.len(),
        kept = validation.outcomes.len(),
        duplicates = validation.duplicates_dropped,
        "validation pass complete"
    );

    validation
}

fn validate_one(
    candidate: &RelationCandidate,
    head: &str,
    tail: &str,
    resolved: &HashMap<&str, Option<Resolution>>,
) -> ValidationOutcome {
    let head = head.to_string();
    let tail = tail.to_string();
    let relation = candidate.relation_label.trim().to_string();

    let resolved_head = resolved.get(head.as_str()).cloned().flatten();
    let resolved_tail = resolved.get(tail.as_str()).cloned().flatten();

    let reason = match (resolved_head, resolved_tail) {
        (Some(resolved_head), Some(resolved_tail)) => {
            return ValidationOutcome::Validated(ValidatedRelation {
                head,
                head_type: candidate.head_type.clone(),
                relation,
                tail,
                tail_type: candidate.tail_type.clone(),
                sentence_id: candidate.sentence_id,
                resolved_head,
                resolved_tail,
            });
        }
        (None, Some(_)) => RejectionReason::HeadUnresolved,
        (Some(_), None) => RejectionReason::TailUnresolved,
        (None, None) => RejectionReason::BothUnresolved,
    };

    let unresolved_text = match reason {
        RejectionReason::HeadUnresolved => vec![head.clone()],
        RejectionReason::TailUnresolved => vec![tail.clone()],
        RejectionReason::BothUnresolved => vec![head.clone(), tail.clone()],
    };

    ValidationOutcome::Rejected(RejectedRelation {
        head,
        head_type: candidate.head_type.clone(),
        relation,
        tail,
        tail_type: candidate.tail_type.clone(),
        sentence_id: candidate.sentence_id,
        reason,
        missing_side: reason.missing_side(),
        unresolved_text,
    })
}

// ============================================================================
// Tests
// ============================================================================
