//! Context item domain types.
//!
//! A `ContextItem` is one unit of candidate context for a model prompt. The
//! four variants carry fixed, typed metadata — consumers switch on the
//! variant tag instead of probing optional metadata bags.

use serde::{Deserialize, Serialize};

use crate::source::Source;

/// The entity domain a context item belongs to. Doubles as the search-domain
/// filter passed to the persistent index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchDomain {
    /// Knowledge-base resource (imported page, file, etc.)
    Resource,
    /// Canvas document
    Document,
    /// Free-floating content selection (highlighted text, note)
    Content,
    /// Content extracted from a URL found in the query
    UrlSource,
}

impl std::fmt::Display for SearchDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Resource => "resource",
            Self::Document => "document",
            Self::Content => "content",
            Self::UrlSource => "urlSource",
        };
        write!(f, "{s}")
    }
}

/// Stable identity of a context item: entity id scoped by domain.
/// URL-sourced items key on their URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub domain: SearchDomain,
    pub entity_id: String,
}

impl ItemKey {
    pub fn new(domain: SearchDomain, entity_id: impl Into<String>) -> Self {
        Self {
            domain,
            entity_id: entity_id.into(),
        }
    }
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.domain, self.entity_id)
    }
}

/// Metadata for a free-floating content selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMeta {
    pub entity_id: String,
    /// The domain the selection was lifted from (document, resource, ...).
    pub domain: SearchDomain,
    #[serde(default)]
    pub title: String,
    /// `Some(false)` forces chunk recall even for small items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_whole_content: Option<bool>,
}

/// A knowledge-base resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub resource_id: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A canvas document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
    pub doc_id: String,
    pub title: String,
    pub content: String,
}

/// One unit of candidate context — the tagged union over all source shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContextItem {
    /// A free text selection with its origin metadata.
    Content { text: String, meta: ContentMeta },
    /// A knowledge-base resource.
    #[serde(rename_all = "camelCase")]
    Resource {
        resource: ResourceInfo,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        use_whole_content: Option<bool>,
    },
    /// A canvas document.
    #[serde(rename_all = "camelCase")]
    Document {
        document: DocumentInfo,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        use_whole_content: Option<bool>,
    },
    /// A crawled URL source.
    Url(Source),
}

impl ContextItem {
    /// The item's textual content.
    pub fn content(&self) -> &str {
        match self {
            Self::Content { text, .. } => text,
            Self::Resource { resource, .. } => &resource.content,
            Self::Document { document, .. } => &document.content,
            Self::Url(source) => &source.page_content,
        }
    }

    /// The item's display title (may be empty).
    pub fn title(&self) -> &str {
        match self {
            Self::Content { meta, .. } => &meta.title,
            Self::Resource { resource, .. } => &resource.title,
            Self::Document { document, .. } => &document.title,
            Self::Url(source) => &source.title,
        }
    }

    /// Stable identity for deduplication and index scoping.
    pub fn key(&self) -> ItemKey {
        match self {
            Self::Content { meta, .. } => ItemKey::new(meta.domain, meta.entity_id.clone()),
            Self::Resource { resource, .. } => {
                ItemKey::new(SearchDomain::Resource, resource.resource_id.clone())
            }
            Self::Document { document, .. } => {
                ItemKey::new(SearchDomain::Document, document.doc_id.clone())
            }
            Self::Url(source) => ItemKey::new(
                SearchDomain::UrlSource,
                source.url.clone().unwrap_or_default(),
            ),
        }
    }

    /// The caller's whole-content hint, if any. `Some(false)` forces recall.
    pub fn use_whole_content(&self) -> Option<bool> {
        match self {
            Self::Content { meta, .. } => meta.use_whole_content,
            Self::Resource {
                use_whole_content, ..
            }
            | Self::Document {
                use_whole_content, ..
            } => *use_whole_content,
            Self::Url(_) => None,
        }
    }

    /// Set the whole-content hint, preserving everything else.
    pub fn set_use_whole_content(&mut self, hint: Option<bool>) {
        match self {
            Self::Content { meta, .. } => meta.use_whole_content = hint,
            Self::Resource {
                use_whole_content, ..
            }
            | Self::Document {
                use_whole_content, ..
            } => *use_whole_content = hint,
            Self::Url(_) => {}
        }
    }

    /// Rebuild the item with replacement content (used after chunk recall).
    pub fn with_content(&self, content: String) -> Self {
        let mut item = self.clone();
        match &mut item {
            Self::Content { text, .. } => *text = content,
            Self::Resource { resource, .. } => resource.content = content,
            Self::Document { document, .. } => document.content = content,
            Self::Url(source) => source.page_content = content,
        }
        item
    }

    /// Flatten to a citable source.
    pub fn to_source(&self) -> Source {
        match self {
            Self::Content { text, meta } => Source {
                url: None,
                title: meta.title.clone(),
                page_content: text.clone(),
                entity_type: Some(meta.domain),
                entity_id: Some(meta.entity_id.clone()),
            },
            Self::Resource { resource, .. } => Source {
                url: resource.url.clone(),
                title: resource.title.clone(),
                page_content: resource.content.clone(),
                entity_type: Some(SearchDomain::Resource),
                entity_id: Some(resource.resource_id.clone()),
            },
            Self::Document { document, .. } => Source {
                url: None,
                title: document.title.clone(),
                page_content: document.content.clone(),
                entity_type: Some(SearchDomain::Document),
                entity_id: Some(document.doc_id.clone()),
            },
            Self::Url(source) => source.clone(),
        }
    }

    /// Whether the item carries no usable content (skipped with a log by
    /// the processors, never fatal).
    pub fn is_malformed(&self) -> bool {
        self.content().is_empty() || self.key().entity_id.is_empty()
    }
}

/// One heterogeneous pool of candidate context (mentioned or relevant).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPool {
    #[serde(default)]
    pub content: Vec<ContextItem>,
    #[serde(default)]
    pub resources: Vec<ContextItem>,
    #[serde(default)]
    pub documents: Vec<ContextItem>,
}

impl ContextPool {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.resources.is_empty() && self.documents.is_empty()
    }

    /// All items in pool order: content, resources, documents.
    pub fn iter(&self) -> impl Iterator<Item = &ContextItem> {
        self.content
            .iter()
            .chain(self.resources.iter())
            .chain(self.documents.iter())
    }

    pub fn item_count(&self) -> usize {
        self.content.len() + self.resources.len() + self.documents.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource_item(id: &str, content: &str) -> ContextItem {
        ContextItem::Resource {
            resource: ResourceInfo {
                resource_id: id.into(),
                title: "A resource".into(),
                content: content.into(),
                url: None,
            },
            use_whole_content: None,
        }
    }

    #[test]
    fn key_is_scoped_by_domain() {
        let resource = resource_item("id-1", "text");
        let document = ContextItem::Document {
            document: DocumentInfo {
                doc_id: "id-1".into(),
                title: "A doc".into(),
                content: "text".into(),
            },
            use_whole_content: None,
        };
        assert_ne!(resource.key(), document.key());
        assert_eq!(resource.key().to_string(), "resource-id-1");
    }

    #[test]
    fn with_content_replaces_only_content() {
        let item = resource_item("id-1", "original");
        let rewritten = item.with_content("recalled".into());
        assert_eq!(rewritten.content(), "recalled");
        assert_eq!(rewritten.key(), item.key());
        assert_eq!(rewritten.title(), item.title());
    }

    #[test]
    fn to_source_carries_entity_identity() {
        let source = resource_item("id-9", "text").to_source();
        assert_eq!(source.entity_type, Some(SearchDomain::Resource));
        assert_eq!(source.entity_id.as_deref(), Some("id-9"));
    }

    #[test]
    fn empty_content_is_malformed() {
        assert!(resource_item("id-1", "").is_malformed());
        assert!(!resource_item("id-1", "x").is_malformed());
    }

    #[test]
    fn pool_iterates_in_category_order() {
        let pool = ContextPool {
            content: vec![],
            resources: vec![resource_item("r", "a")],
            documents: vec![ContextItem::Document {
                document: DocumentInfo {
                    doc_id: "d".into(),
                    title: String::new(),
                    content: "b".into(),
                },
                use_whole_content: None,
            }],
        };
        let keys: Vec<String> = pool.iter().map(|i| i.key().to_string()).collect();
        assert_eq!(keys, vec!["resource-r", "document-d"]);
    }
}
