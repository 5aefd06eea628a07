//! Retrieval layer for the scribeflow context engine.
//!
//! Three pieces sit between the raw candidate pools and the budget
//! allocator:
//!
//! - [`ChunkRetriever`] — lossy compression for oversized items: pulls the
//!   query-relevant sub-spans of an item through an ordered fallback chain
//!   (persistent index → ephemeral in-memory index → naive truncation).
//! - [`SimilarityRanker`] — orders a homogeneous item list by relevance at
//!   whole-item granularity.
//! - [`MultilingualSearcher`] — bounded fan-out of web/library search across
//!   query rewrites and locales, with merge, URL dedup, and optional
//!   reranking.

pub mod chunks;
pub mod multilingual;
pub mod ranker;

pub use chunks::ChunkRetriever;
pub use multilingual::MultilingualSearcher;
pub use ranker::SimilarityRanker;
