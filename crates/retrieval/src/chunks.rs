//! Chunk recall — ordered fallback chain over search backends.
//!
//! Each strategy is tried in sequence; a failure or empty result falls
//! through to the next. The tail strategy (naive truncation) cannot fail, so
//! the caller always gets *something* back:
//!
//! 1. **Indexed** — persistent vector/document index scoped to the item's
//!    entity id and domain. Only items that live in the library (documents,
//!    resources) have a persistent index.
//! 2. **Ephemeral** — split, embed, and search the item's content in memory.
//!    Covers cold indexes and content that was never ingested.
//! 3. **Truncation** — a single chunk holding the head of the content,
//!    capped to a safe token ceiling.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use scribeflow_core::backend::{EphemeralDoc, EphemeralIndex, RankedHit, SearchBackend};
use scribeflow_core::chunk::Chunk;
use scribeflow_core::error::RetrievalError;
use scribeflow_core::item::{ContextItem, SearchDomain};
use scribeflow_core::tokenizer::{Tokenizer, truncate_to_tokens};

/// A recall strategy in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecallStrategy {
    Indexed,
    Ephemeral,
}

impl RecallStrategy {
    fn name(self) -> &'static str {
        match self {
            Self::Indexed => "indexed",
            Self::Ephemeral => "ephemeral",
        }
    }
}

/// Retrieves query-relevant chunks of a single oversized item.
pub struct ChunkRetriever {
    search: Arc<dyn SearchBackend>,
    ephemeral: Arc<dyn EphemeralIndex>,
    tokenizer: Arc<dyn Tokenizer>,
    /// Token ceiling for content handed to the ephemeral index and for the
    /// truncation fallback.
    recall_ceiling: usize,
    /// Per-backend-call timeout.
    call_timeout: Duration,
}

impl ChunkRetriever {
    pub fn new(
        search: Arc<dyn SearchBackend>,
        ephemeral: Arc<dyn EphemeralIndex>,
        tokenizer: Arc<dyn Tokenizer>,
        recall_ceiling: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            search,
            ephemeral,
            tokenizer,
            recall_ceiling,
            call_timeout,
        }
    }

    /// Retrieve up to `limit` chunks of `item` relevant to `query`, in
    /// descending relevance order. Infallible: exhausting the strategy chain
    /// degrades to naive head truncation.
    pub async fn retrieve(&self, query: &str, item: &ContextItem, limit: usize) -> Vec<Chunk> {
        let key = item.key();

        for strategy in Self::strategies_for(item) {
            match self.attempt(*strategy, query, item, limit).await {
                Ok(chunks) if !chunks.is_empty() => {
                    debug!(
                        strategy = strategy.name(),
                        entity_id = %key.entity_id,
                        chunks = chunks.len(),
                        "Recall: strategy succeeded"
                    );
                    return chunks;
                }
                Ok(_) => {
                    warn!(
                        strategy = strategy.name(),
                        entity_id = %key.entity_id,
                        "Recall: strategy returned no chunks, trying next"
                    );
                }
                Err(e) => {
                    warn!(
                        strategy = strategy.name(),
                        entity_id = %key.entity_id,
                        error = %e,
                        "Recall: strategy failed, trying next"
                    );
                }
            }
        }

        warn!(
            entity_id = %key.entity_id,
            "Recall: all strategies exhausted, falling back to head truncation"
        );
        vec![Chunk {
            content: truncate_to_tokens(item.content(), self.recall_ceiling, &*self.tokenizer),
            start: Some(0),
            score: 0.0,
        }]
    }

    /// Which strategies apply to an item. Free-floating content and URL
    /// sources were never ingested into the library index, so they start at
    /// the ephemeral path.
    fn strategies_for(item: &ContextItem) -> &'static [RecallStrategy] {
        match item.key().domain {
            SearchDomain::Document | SearchDomain::Resource => {
                &[RecallStrategy::Indexed, RecallStrategy::Ephemeral]
            }
            SearchDomain::Content | SearchDomain::UrlSource => &[RecallStrategy::Ephemeral],
        }
    }

    async fn attempt(
        &self,
        strategy: RecallStrategy,
        query: &str,
        item: &ContextItem,
        limit: usize,
    ) -> Result<Vec<Chunk>, RetrievalError> {
        let key = item.key();
        let future = async {
            match strategy {
                RecallStrategy::Indexed => {
                    self.search
                        .search(query, &[key.clone()], &[key.domain], limit)
                        .await
                }
                RecallStrategy::Ephemeral => {
                    let doc = EphemeralDoc {
                        content: truncate_to_tokens(
                            item.content(),
                            self.recall_ceiling,
                            &*self.tokenizer,
                        ),
                        key: key.clone(),
                        title: item.title().to_string(),
                    };
                    self.ephemeral
                        .index_and_search(query, &[doc], limit, true)
                        .await
                }
            }
        };

        match tokio::time::timeout(self.call_timeout, future).await {
            Ok(Ok(hits)) => Ok(hits.into_iter().map(hit_to_chunk).collect()),
            Ok(Err(e)) => Err(RetrievalError::StrategyFailed {
                strategy: strategy.name(),
                entity_id: key.entity_id,
                reason: e.to_string(),
            }),
            Err(_) => Err(RetrievalError::Timeout {
                entity_id: key.entity_id,
                timeout_secs: self.call_timeout.as_secs(),
            }),
        }
    }
}

fn hit_to_chunk(hit: RankedHit) -> Chunk {
    Chunk {
        content: hit.content,
        start: hit.start,
        score: hit.score,
    }
}
