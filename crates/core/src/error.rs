//! Error types for the scribeflow context domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all context-engine operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Search backend errors ---
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    // --- Chunk retrieval errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Context assembly errors ---
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    // --- Configuration errors ---
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures surfaced by search collaborators (vector index, web search,
/// library search, reranker).
#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Malformed response from backend: {0}")]
    MalformedResponse(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited by backend, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

/// Failures inside the chunk-recall fallback chain.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Recall strategy '{strategy}' failed for {entity_id}: {reason}")]
    StrategyFailed {
        strategy: &'static str,
        entity_id: String,
        reason: String,
    },

    #[error("Recall strategy '{strategy}' returned no chunks for {entity_id}")]
    EmptyResult {
        strategy: &'static str,
        entity_id: String,
    },

    #[error("Recall timed out after {timeout_secs}s for {entity_id}")]
    Timeout { entity_id: String, timeout_secs: u64 },
}

/// Failures in allocation and serialization.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Malformed context item: {0}")]
    MalformedItem(String),

    #[error("Allocation deadline exceeded after {elapsed_ms}ms")]
    DeadlineExceeded { elapsed_ms: u64 },
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_error_displays_correctly() {
        let err = Error::Search(SearchError::RateLimited {
            retry_after_secs: 30,
        });
        assert!(err.to_string().contains("30"));
        assert!(err.to_string().contains("Rate limited"));
    }

    #[test]
    fn retrieval_error_names_strategy_and_entity() {
        let err = Error::Retrieval(RetrievalError::StrategyFailed {
            strategy: "indexed",
            entity_id: "doc-42".into(),
            reason: "index offline".into(),
        });
        assert!(err.to_string().contains("indexed"));
        assert!(err.to_string().contains("doc-42"));
    }

    #[test]
    fn config_error_names_field() {
        let err = ConfigError::Invalid {
            field: "budget.max_context_ratio".into(),
            reason: "must be in (0, 1]".into(),
        };
        assert!(err.to_string().contains("max_context_ratio"));
    }
}
