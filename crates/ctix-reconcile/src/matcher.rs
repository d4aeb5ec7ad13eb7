//! Entity matcher
//!
//! Resolves free text from a relation triple to a key of the identity index.
//! Precedence is fixed: exact key, then token overlap, then substring
//! containment. There is no edit-distance scoring.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use ctix_core::MatchingConfig;

use crate::index::IdentityIndex;
use crate::normalize::{comparison_key, is_meaningful, significant_tokens};
use crate::EntityResolver;

/// How a relation side was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    TokenOverlap,
    Containment,
}

impl std::fmt::Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::TokenOverlap => write!(f, "token_overlap"),
            Self::Containment => write!(f, "containment"),
        }
    }
}

/// Index key a relation side resolved to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub key: String,
    pub match_kind: MatchKind,
}

impl Resolution {
    fn new(key: &str, match_kind: MatchKind) -> Self {
        Self {
            key: key.to_string(),
            match_kind,
        }
    }
}

/// Index keys with their significant tokens, in key order
type KeyTokens<'a> = Vec<(&'a str, BTreeSet<String>)>;

fn key_tokens(index: &IdentityIndex) -> KeyTokens<'_> {
    index
        .keys()
        .map(|key| (key.as_str(), significant_tokens(key)))
        .filter(|(_, tokens)| !tokens.is_empty())
        .collect()
}

/// Exact / token-overlap / containment matcher
#[derive(Debug, Clone)]
pub struct EntityMatcher {
    /// Minimum shared significant tokens for an overlap match
    min_shared_tokens: usize,
    /// Minimum length (chars) of the contained string
    min_containment_len: usize,
    /// Whether the containment stage runs at all
    enable_containment: bool,
}

impl EntityMatcher {
    /// Create a matcher with default thresholds
    pub fn new() -> Self {
        Self::with_config(&MatchingConfig::default())
    }

    /// Create with custom config
    pub fn with_config(config: &MatchingConfig) -> Self {
        Self {
            min_shared_tokens: config.min_shared_tokens.max(1),
            min_containment_len: config.min_containment_len,
            enable_containment: config.enable_containment,
        }
    }

    /// Exact comparison-key lookup
    pub fn match_exact(&self, key: &str, index: &IdentityIndex) -> Option<Resolution> {
        index
            .contains_key(key)
            .then(|| Resolution::new(key, MatchKind::Exact))
    }

    /// Best entity sharing enough significant tokens
    ///
    /// Most shared tokens wins, then fewest unshared tokens, then the
    /// smallest key.
    pub fn match_token_overlap(&self, key: &str, index: &IdentityIndex) -> Option<Resolution> {
        self.best_overlap(key, &key_tokens(index))
    }

    fn best_overlap(&self, key: &str, keys: &KeyTokens<'_>) -> Option<Resolution> {
        let tokens = significant_tokens(key);
        if tokens.is_empty() {
            return None;
        }

        let mut best: Option<(&str, usize, usize)> = None;
        for &(candidate, ref candidate_tokens) in keys {
            let shared = tokens.intersection(candidate_tokens).count();
            if shared < self.min_shared_tokens {
                continue;
            }
            let unshared = symmetric_len(&tokens, candidate_tokens);
            let better = match best {
                None => true,
                Some((_, best_shared, best_unshared)) => {
                    shared > best_shared || (shared == best_shared && unshared < best_unshared)
                }
            };
            if better {
                best = Some((candidate, shared, unshared));
            }
        }

        best.map(|(k, _, _)| Resolution::new(k, MatchKind::TokenOverlap))
    }

    /// Best entity whose key contains, or is contained in, the text
    ///
    /// Longest contained string wins, then the smallest key.
    pub fn match_containment(&self, key: &str, index: &IdentityIndex) -> Option<Resolution> {
        if !self.enable_containment {
            return None;
        }

        let mut best: Option<(&str, usize)> = None;
        for candidate in index.keys() {
            let contained = if candidate.contains(key) {
                key.chars().count()
            } else if key.contains(candidate.as_str()) {
                candidate.chars().count()
            } else {
                continue;
            };
            if contained < self.min_containment_len {
                continue;
            }
            if best.map_or(true, |(_, len)| contained > len) {
                best = Some((candidate, contained));
            }
        }

        best.map(|(k, _)| Resolution::new(k, MatchKind::Containment))
    }

    fn resolve_with(
        &self,
        text: &str,
        index: &IdentityIndex,
        keys: &KeyTokens<'_>,
    ) -> Option<Resolution> {
        if !is_meaningful(text) {
            return None;
        }
        let key = comparison_key(text);

        self.match_exact(&key, index)
            .or_else(|| self.best_overlap(&key, keys))
            .or_else(|| self.match_containment(&key, index))
    }
}

impl Default for EntityMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityResolver for EntityMatcher {
    fn resolve(&self, text: &str, index: &IdentityIndex) -> Option<Resolution> {
        self.resolve_with(text, index, &key_tokens(index))
    }

    /// Key tokens are computed once for the whole batch
    fn resolve_all(&self, texts: &[&str], index: &IdentityIndex) -> Vec<Option<Resolution>> {
        let keys = key_tokens(index);
        texts
            .iter()
            .map(|text| self.resolve_with(text, index, &keys))
            .collect()
    }
}

fn symmetric_len(a: &BTreeSet<String>, b: &BTreeSet<String>) -> usize {
    a.symmetric_difference(b).count()
}

// ============================================================================
// Tests
// ============================================================================
