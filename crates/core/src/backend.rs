//! Collaborator traits — the narrow interfaces the context engine consumes.
//!
//! The vector index, ephemeral embed-and-search, web search, library search,
//! reranker, and URL crawler are external, rate-limited services owned by the
//! host process. The engine accesses them read-only per call through these
//! traits; tests substitute mocks.

use async_trait::async_trait;

use crate::error::SearchError;
use crate::item::{ItemKey, SearchDomain};
use crate::source::Source;

/// One relevance-ranked hit from a search collaborator.
#[derive(Debug, Clone)]
pub struct RankedHit {
    pub content: String,
    pub title: String,
    /// Byte offset of the hit within its parent content, when chunked.
    pub start: Option<usize>,
    pub score: f32,
    pub domain: SearchDomain,
    pub entity_id: String,
}

/// A document handed to the ephemeral index for on-the-fly embedding.
#[derive(Debug, Clone)]
pub struct EphemeralDoc {
    pub content: String,
    pub key: ItemKey,
    pub title: String,
}

/// Persistent vector/document search, scoped by entity filter and domain.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(
        &self,
        query: &str,
        entities: &[ItemKey],
        domains: &[SearchDomain],
        limit: usize,
    ) -> Result<Vec<RankedHit>, SearchError>;
}

/// On-the-fly chunk + embed + search over caller-supplied content. Used when
/// the persistent index is cold and for whole-item similarity ranking.
#[async_trait]
pub trait EphemeralIndex: Send + Sync {
    /// Index `docs` in memory and run `query` against them.
    ///
    /// With `need_chunk` the backend splits each doc into fixed-size token
    /// chunks before embedding and returns chunk-level hits (carrying
    /// `start` offsets); without it each doc is embedded whole and hits map
    /// one-to-one to input docs.
    async fn index_and_search(
        &self,
        query: &str,
        docs: &[EphemeralDoc],
        k: usize,
        need_chunk: bool,
    ) -> Result<Vec<RankedHit>, SearchError>;
}

/// Live web search for one (query, locale) pair.
#[async_trait]
pub trait WebSearchBackend: Send + Sync {
    async fn search(
        &self,
        query: &str,
        locale: &str,
        limit: usize,
    ) -> Result<Vec<Source>, SearchError>;
}

/// Knowledge-base / library search for one (query, locale) pair.
#[async_trait]
pub trait LibrarySearchBackend: Send + Sync {
    async fn search(
        &self,
        query: &str,
        locale: &str,
        limit: usize,
        whole_space: bool,
    ) -> Result<Vec<Source>, SearchError>;
}

/// Cross-encoder reranking of merged search results.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Reorder `sources` by relevance to `query`, dropping everything below
    /// `relevance_threshold`.
    async fn rerank(
        &self,
        query: &str,
        sources: Vec<Source>,
        relevance_threshold: f32,
    ) -> Result<Vec<Source>, SearchError>;
}

/// Extracts URLs from a query and crawls them into sources. Callers run this
/// upstream of allocation and pass the resulting pool in.
#[async_trait]
pub trait UrlContentFetcher: Send + Sync {
    async fn extract_and_crawl(&self, query: &str) -> Result<Vec<Source>, SearchError>;
}
