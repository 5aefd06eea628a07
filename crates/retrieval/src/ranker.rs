//! Whole-item similarity ranking.
//!
//! Ranks a set of context items against the user's query by indexing each
//! item as a single ephemeral document and reading the result order back.
//! Ranking is best-effort: a backend failure keeps the caller's original
//! order instead of surfacing an error, since a worse ordering is always
//! preferable to an empty context.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use scribeflow_core::backend::{EphemeralDoc, EphemeralIndex};
use scribeflow_core::item::{ContextItem, ItemKey};
use scribeflow_core::source::Source;
use scribeflow_core::tokenizer::{Tokenizer, truncate_to_tokens};

pub struct SimilarityRanker {
    ephemeral: Arc<dyn EphemeralIndex>,
    tokenizer: Arc<dyn Tokenizer>,
    /// Token cap on the content shipped per item for whole-item embedding;
    /// ranked items keep their full content.
    rank_ceiling: usize,
}

impl SimilarityRanker {
    pub fn new(
        ephemeral: Arc<dyn EphemeralIndex>,
        tokenizer: Arc<dyn Tokenizer>,
        rank_ceiling: usize,
    ) -> Self {
        Self {
            ephemeral,
            tokenizer,
            rank_ceiling,
        }
    }

    /// Reorder `items` by descending similarity to `query`. Items the backend
    /// does not return are appended after the ranked ones in their original
    /// order, so the output is always a permutation of the input.
    pub async fn rank_items(&self, query: &str, items: Vec<ContextItem>) -> Vec<ContextItem> {
        if items.len() <= 1 {
            return items;
        }

        let docs: Vec<EphemeralDoc> = items
            .iter()
            .map(|item| EphemeralDoc {
                content: truncate_to_tokens(item.content(), self.rank_ceiling, &*self.tokenizer),
                key: item.key(),
                title: item.title().to_string(),
            })
            .collect();

        let hits = match self
            .ephemeral
            .index_and_search(query, &docs, docs.len(), false)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "Similarity ranking failed, keeping original order");
                return items;
            }
        };

        let original_order: Vec<ItemKey> = items.iter().map(ContextItem::key).collect();
        // Duplicate-key items queue up so each hit claims one copy and the
        // rest survive into the unranked tail.
        let mut by_key: HashMap<ItemKey, VecDeque<ContextItem>> = HashMap::new();
        for item in items {
            by_key.entry(item.key()).or_default().push_back(item);
        }

        let mut ranked = Vec::with_capacity(original_order.len());
        for hit in hits {
            let key = ItemKey {
                domain: hit.domain,
                entity_id: hit.entity_id,
            };
            if let Some(item) = by_key.get_mut(&key).and_then(VecDeque::pop_front) {
                ranked.push(item);
            }
        }

        // Backend may drop items (dedup inside the index, empty content).
        // Keep them, ranked last, in their original order.
        if ranked.len() < original_order.len() {
            debug!(
                unranked = original_order.len() - ranked.len(),
                "Some items missing from ranking result, appending"
            );
            for key in &original_order {
                if let Some(item) = by_key.get_mut(key).and_then(VecDeque::pop_front) {
                    ranked.push(item);
                }
            }
        }

        ranked
    }

    /// Reorder search sources by descending similarity to `query`, by lifting
    /// each source into a context item and ranking those.
    pub async fn rank_sources(&self, query: &str, sources: Vec<Source>) -> Vec<Source> {
        if sources.len() <= 1 {
            return sources;
        }
        let items: Vec<ContextItem> = sources.into_iter().map(ContextItem::Url).collect();
        self.rank_items(query, items)
            .await
            .into_iter()
            .map(|item| item.to_source())
            .collect()
    }
}
