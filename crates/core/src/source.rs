//! Query, source, and merged-context value objects.
//!
//! A `Source` is the flattened, externally visible unit of context — it feeds
//! both the prompt text and the UI citation list. `MergedContext` bundles the
//! five processed tiers and is the direct input to serialization.

use serde::{Deserialize, Serialize};

use crate::item::{ContextPool, SearchDomain};

/// A user query plus optional pre-computed rewrites used to widen recall.
/// Immutable for the duration of one allocation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rewritten: Vec<String>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            rewritten: Vec::new(),
        }
    }

    pub fn with_rewrites(text: impl Into<String>, rewritten: Vec<String>) -> Self {
        Self {
            text: text.into(),
            rewritten,
        }
    }

    /// The original query followed by its rewrites, deduplicated, originals
    /// first. This is the fan-out set for multilingual search.
    pub fn variants(&self) -> Vec<String> {
        let mut out = vec![self.text.clone()];
        for rewrite in &self.rewritten {
            if !out.contains(rewrite) {
                out.push(rewrite.clone());
            }
        }
        out
    }
}

/// A citable unit of context: content plus title/url/entity metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub page_content: String,
    /// Entity identity for search-style sources that reference a library
    /// entity (used for cross-tier identity dedup).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<SearchDomain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl Source {
    /// Identity key for dedup, when the source references a known entity.
    pub fn entity_key(&self) -> Option<(SearchDomain, &str)> {
        match (self.entity_type, self.entity_id.as_deref()) {
            (Some(domain), Some(id)) if !id.is_empty() => Some((domain, id)),
            _ => None,
        }
    }
}

/// The five processed tiers, in priority order, ready for serialization.
///
/// Invariant: no two items across tiers share the same (domain, entity id)
/// identity, and no two items share byte-identical content. The allocator's
/// cleanup pass enforces this before construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedContext {
    pub url_sources: Vec<Source>,
    pub mentioned_context: ContextPool,
    pub relevant_context: ContextPool,
    pub web_search_sources: Vec<Source>,
    pub library_search_sources: Vec<Source>,
}

impl MergedContext {
    pub fn is_empty(&self) -> bool {
        self.url_sources.is_empty()
            && self.mentioned_context.is_empty()
            && self.relevant_context.is_empty()
            && self.web_search_sources.is_empty()
            && self.library_search_sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_keep_original_first_and_dedup() {
        let query = Query::with_rewrites(
            "tesla battery roadmap",
            vec![
                "tesla battery plans".into(),
                "tesla battery roadmap".into(),
            ],
        );
        let variants = query.variants();
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0], "tesla battery roadmap");
    }

    #[test]
    fn entity_key_requires_both_fields() {
        let mut source = Source {
            url: Some("https://example.com".into()),
            title: "t".into(),
            page_content: "c".into(),
            entity_type: Some(SearchDomain::Document),
            entity_id: None,
        };
        assert!(source.entity_key().is_none());
        source.entity_id = Some("doc-1".into());
        assert_eq!(source.entity_key(), Some((SearchDomain::Document, "doc-1")));
    }
}
