//! # Scribeflow Core
//!
//! Domain types, collaborator traits, and error definitions for the
//! scribeflow context engine. This crate has **zero framework dependencies**
//! — it defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (vector search, ephemeral indexing, web and
//! library search, reranking, tokenization) is defined as a trait here.
//! Implementations live in the host process; the context crates consume them
//! as `Arc<dyn Trait>`. This enables:
//! - Swapping backends via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod backend;
pub mod chunk;
pub mod error;
pub mod item;
pub mod message;
pub mod source;
pub mod tokenizer;

// Re-export key types at crate root for ergonomics
pub use backend::{
    EphemeralDoc, EphemeralIndex, LibrarySearchBackend, RankedHit, Reranker, SearchBackend,
    UrlContentFetcher, WebSearchBackend,
};
pub use chunk::{Chunk, assemble_chunks};
pub use error::{ConfigError, ContextError, Error, Result, RetrievalError, SearchError};
pub use item::{ContentMeta, ContextItem, ContextPool, DocumentInfo, ItemKey, ResourceInfo, SearchDomain};
pub use message::{CacheControl, ContentBlock, Message, MessageContent, ModelInfo, Role};
pub use source::{MergedContext, Query, Source};
pub use tokenizer::{CharTokenizer, Tokenizer, truncate_to_tokens};
