//! Tier processors — the two-phase greedy pack.
//!
//! Every tier funnels through one generic pass, [`TierProcessor::pack_items`]:
//!
//! - **Phase 1** spends up to `relevant_ratio` of the tier budget on items in
//!   similarity order. Oversized items (and items whose caller explicitly
//!   opted out of whole-content inclusion) are chunk-recalled; everything else
//!   goes in verbatim while it fits.
//! - **Phase 2** spends the remainder on the leftovers: items under the short
//!   threshold go in verbatim, the rest are chunk-recalled with the chunk set
//!   truncated to whatever budget is left. Exhaustion is checked after each
//!   admit, so a run can overshoot by at most one short item.
//!
//! Recall I/O for phase 1 runs up front under a bounded concurrent fan-out;
//! the pack itself is sequential so the output is deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use scribeflow_config::BudgetPolicy;
use scribeflow_core::chunk::{Chunk, assemble_chunks, truncate_chunks};
use scribeflow_core::item::{ContextItem, ContextPool, ItemKey};
use scribeflow_core::source::Source;
use scribeflow_core::tokenizer::Tokenizer;
use scribeflow_retrieval::{ChunkRetriever, SimilarityRanker};

use crate::token::count_item_tokens;

pub struct TierProcessor {
    retriever: Arc<ChunkRetriever>,
    ranker: Arc<SimilarityRanker>,
    tokenizer: Arc<dyn Tokenizer>,
    policy: BudgetPolicy,
    recall_concurrency: usize,
}

impl TierProcessor {
    pub fn new(
        retriever: Arc<ChunkRetriever>,
        ranker: Arc<SimilarityRanker>,
        tokenizer: Arc<dyn Tokenizer>,
        policy: BudgetPolicy,
        recall_concurrency: usize,
    ) -> Self {
        Self {
            retriever,
            ranker,
            tokenizer,
            policy,
            recall_concurrency,
        }
    }

    /// Whether an item must be chunk-recalled rather than included whole.
    fn must_recall(&self, item: &ContextItem, tokens: usize) -> bool {
        tokens > self.policy.need_recall_threshold || item.use_whole_content() == Some(false)
    }

    /// Pack `items` into at most `budget` tokens, most relevant first.
    /// `usize::MAX` means unbounded (the caller truncates afterwards).
    pub async fn pack_items(
        &self,
        query: &str,
        items: Vec<ContextItem>,
        budget: usize,
    ) -> Vec<ContextItem> {
        if items.is_empty() {
            return Vec::new();
        }

        let items: Vec<ContextItem> = items
            .into_iter()
            .filter(|item| {
                if item.is_malformed() {
                    warn!(key = %item.key(), "Skipping malformed context item");
                    false
                } else {
                    true
                }
            })
            .collect();

        let ranked = self.ranker.rank_items(query, items).await;

        // Phase-1 recall targets are known up front; fetch their chunks
        // concurrently before the sequential pack.
        let recall_targets: Vec<&ContextItem> = ranked
            .iter()
            .filter(|item| self.must_recall(item, count_item_tokens(item, &*self.tokenizer)))
            .collect();
        let mut prefetched = self.prefetch_chunks(query, &recall_targets).await;

        let mut remaining = budget;
        let mut packed: Vec<ContextItem> = Vec::new();
        let mut leftovers: Vec<ContextItem> = Vec::new();

        // Phase 1: primary pass under the ratio-capped sub-budget. The first
        // item that no longer fits ends the phase; everything after it is
        // retried in phase 2.
        let mut phase_budget = BudgetPolicy::fraction_of(budget, self.policy.relevant_ratio);
        let mut ranked = ranked.into_iter();
        for item in ranked.by_ref() {
            let tokens = count_item_tokens(&item, &*self.tokenizer);
            if self.must_recall(&item, tokens) {
                let chunks = prefetched.remove(&item.key()).unwrap_or_default();
                let kept = truncate_chunks(chunks, phase_budget, &*self.tokenizer);
                if kept.is_empty() {
                    leftovers.push(item);
                    break;
                }
                let recalled = item.with_content(assemble_chunks(kept));
                let used = count_item_tokens(&recalled, &*self.tokenizer);
                phase_budget = phase_budget.saturating_sub(used);
                remaining = remaining.saturating_sub(used);
                packed.push(recalled);
            } else if tokens <= phase_budget {
                phase_budget -= tokens;
                remaining = remaining.saturating_sub(tokens);
                packed.push(item);
            } else {
                leftovers.push(item);
                break;
            }
        }
        leftovers.extend(ranked);

        // Phase 2: leftovers against the full remaining budget. The budget
        // check runs after each admit, so overshoot is bounded to one short
        // item.
        for item in leftovers {
            let tokens = count_item_tokens(&item, &*self.tokenizer);
            if tokens < self.policy.short_content_threshold {
                // Short items are always worth their weight.
                remaining = remaining.saturating_sub(tokens);
                packed.push(item);
                if remaining == 0 {
                    break;
                }
                continue;
            }
            if remaining == 0 {
                break;
            }
            // Reuse chunks prefetched for phase 1 when the item fell through.
            let chunks = match prefetched.remove(&item.key()) {
                Some(chunks) if !chunks.is_empty() => chunks,
                _ => {
                    self.retriever
                        .retrieve(query, &item, self.policy.recall_chunk_limit)
                        .await
                }
            };
            let kept = truncate_chunks(chunks, remaining, &*self.tokenizer);
            if kept.is_empty() {
                continue;
            }
            let recalled = item.with_content(assemble_chunks(kept));
            let used = count_item_tokens(&recalled, &*self.tokenizer);
            remaining = remaining.saturating_sub(used);
            packed.push(recalled);
            if remaining == 0 {
                break;
            }
        }

        debug!(
            packed = packed.len(),
            budget,
            remaining,
            "Tier pack complete"
        );
        packed
    }

    /// Greedy verbatim fit for snippet-sized search sources: keep sources in
    /// rank order while they fit, stop at the first that does not. Search
    /// hits are already excerpt-length, so no recall pass applies.
    pub fn fit_sources(&self, sources: Vec<Source>, budget: usize) -> Vec<Source> {
        let mut remaining = budget;
        let mut kept = Vec::new();
        for source in sources {
            let tokens = self.tokenizer.count(&source.page_content);
            if tokens > remaining {
                break;
            }
            remaining -= tokens;
            kept.push(source);
        }
        kept
    }

    /// Pack crawled-page sources by lifting them into URL items; unlike
    /// search snippets these can be arbitrarily large and go through the full
    /// two-phase pass.
    pub async fn pack_sources(
        &self,
        query: &str,
        sources: Vec<Source>,
        budget: usize,
    ) -> Vec<Source> {
        let items = sources.into_iter().map(ContextItem::Url).collect();
        self.pack_items(query, items, budget)
            .await
            .into_iter()
            .map(|item| item.to_source())
            .collect()
    }

    /// Pack one heterogeneous pool, splitting `budget` across its buckets by
    /// the configured content/resource/document ratios.
    pub async fn pack_pool(&self, query: &str, pool: ContextPool, budget: usize) -> ContextPool {
        let content_budget = BudgetPolicy::fraction_of(budget, self.policy.mentioned_content_ratio);
        let resource_budget =
            BudgetPolicy::fraction_of(budget, self.policy.mentioned_resource_ratio);
        let document_budget =
            BudgetPolicy::fraction_of(budget, self.policy.mentioned_document_ratio);

        ContextPool {
            content: self.pack_items(query, pool.content, content_budget).await,
            resources: self.pack_items(query, pool.resources, resource_budget).await,
            documents: self.pack_items(query, pool.documents, document_budget).await,
        }
    }

    async fn prefetch_chunks(
        &self,
        query: &str,
        items: &[&ContextItem],
    ) -> HashMap<ItemKey, Vec<Chunk>> {
        let semaphore = Arc::new(Semaphore::new(self.recall_concurrency));
        let fetches = items.iter().map(|item| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (item.key(), Vec::new());
                };
                let chunks = self
                    .retriever
                    .retrieve(query, item, self.policy.recall_chunk_limit)
                    .await;
                (item.key(), chunks)
            }
        });
        futures::future::join_all(fetches).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scribeflow_core::backend::{EphemeralDoc, EphemeralIndex, RankedHit, SearchBackend};
    use scribeflow_core::error::SearchError;
    use scribeflow_core::item::{ContentMeta, SearchDomain};
    use scribeflow_core::tokenizer::CharTokenizer;
    use std::time::Duration;

    /// Ranks docs in input order; chunk queries return thirds of the content.
    struct PassthroughIndex;

    #[async_trait]
    impl EphemeralIndex for PassthroughIndex {
        async fn index_and_search(
            &self,
            _query: &str,
            docs: &[EphemeralDoc],
            _k: usize,
            need_chunk: bool,
        ) -> Result<Vec<RankedHit>, SearchError> {
            if !need_chunk {
                return Ok(docs
                    .iter()
                    .map(|doc| RankedHit {
                        content: doc.content.clone(),
                        title: doc.title.clone(),
                        start: None,
                        score: 1.0,
                        domain: doc.key.domain,
                        entity_id: doc.key.entity_id.clone(),
                    })
                    .collect());
            }
            let doc = &docs[0];
            let third = doc.content.len() / 3;
            Ok(vec![RankedHit {
                content: doc.content[..third].to_string(),
                title: doc.title.clone(),
                start: Some(0),
                score: 0.9,
                domain: doc.key.domain,
                entity_id: doc.key.entity_id.clone(),
            }])
        }
    }

    struct NoIndex;

    #[async_trait]
    impl SearchBackend for NoIndex {
        async fn search(
            &self,
            _query: &str,
            _entities: &[scribeflow_core::item::ItemKey],
            _domains: &[SearchDomain],
            _limit: usize,
        ) -> Result<Vec<RankedHit>, SearchError> {
            Ok(Vec::new())
        }
    }

    fn processor() -> TierProcessor {
        let tokenizer: Arc<dyn Tokenizer> = Arc::new(CharTokenizer);
        let index = Arc::new(PassthroughIndex);
        let retriever = Arc::new(ChunkRetriever::new(
            Arc::new(NoIndex),
            index.clone(),
            tokenizer.clone(),
            4096,
            Duration::from_secs(5),
        ));
        TierProcessor::new(
            retriever,
            Arc::new(SimilarityRanker::new(index, tokenizer.clone(), 4096)),
            tokenizer,
            BudgetPolicy::default(),
            5,
        )
    }

    fn content_item(id: &str, len: usize) -> ContextItem {
        ContextItem::Content {
            text: "x".repeat(len),
            meta: ContentMeta {
                entity_id: id.into(),
                domain: SearchDomain::Content,
                title: id.into(),
                use_whole_content: None,
            },
        }
    }

    #[tokio::test]
    async fn small_items_are_included_verbatim() {
        let packed = processor()
            .pack_items("q", vec![content_item("a", 400)], 1000)
            .await;
        assert_eq!(packed.len(), 1);
        assert_eq!(packed[0].content().len(), 400);
    }

    #[tokio::test]
    async fn oversized_items_are_chunk_recalled() {
        // 8000 chars = 2000 tokens, above the 1024 recall threshold.
        let packed = processor()
            .pack_items("q", vec![content_item("big", 8000)], 1500)
            .await;
        assert_eq!(packed.len(), 1);
        assert!(packed[0].content().len() < 8000);
    }

    #[tokio::test]
    async fn whole_content_false_forces_recall_even_when_small() {
        let mut item = content_item("sel", 600);
        item.set_use_whole_content(Some(false));
        let packed = processor().pack_items("q", vec![item], 10_000).await;
        assert_eq!(packed.len(), 1);
        assert!(packed[0].content().len() < 600);
    }

    #[tokio::test]
    async fn short_leftovers_survive_a_tight_budget() {
        // Budget 150: phase 1 (105 tokens) fits the 100-token item; the
        // 50-token item misses phase 1 but is under the short threshold.
        let items = vec![content_item("a", 400), content_item("b", 200)];
        let packed = processor().pack_items("q", items, 150).await;
        assert_eq!(packed.len(), 2);
        assert_eq!(packed[1].content().len(), 200);
    }

    #[tokio::test]
    async fn zero_budget_still_admits_short_items() {
        // The short-item rule is unconditional: tiny items survive even an
        // exhausted budget (bounded overshoot, tolerated by the allocator).
        let packed = processor()
            .pack_items("q", vec![content_item("a", 100), content_item("b", 2000)], 0)
            .await;
        assert_eq!(packed.len(), 1);
        assert_eq!(packed[0].key().entity_id, "a");
    }

    #[tokio::test]
    async fn a_flood_of_short_items_stops_at_the_budget() {
        // 1000 chars = 250 tokens each, below the 300-token short threshold.
        let items: Vec<ContextItem> =
            (0..50).map(|i| content_item(&format!("s{i}"), 1000)).collect();
        let packed = processor().pack_items("q", items, 500).await;
        let total: usize = packed
            .iter()
            .map(|i| count_item_tokens(i, &CharTokenizer))
            .sum();
        assert_eq!(packed.len(), 2);
        assert!(total <= 500, "packed {total} tokens into budget 500");
    }

    #[tokio::test]
    async fn fit_sources_stops_at_first_overflow() {
        let source = |title: &str, len: usize| Source {
            url: None,
            title: title.into(),
            page_content: "x".repeat(len),
            entity_type: None,
            entity_id: None,
        };
        let kept = processor().fit_sources(
            vec![source("a", 400), source("b", 400), source("c", 40)],
            150,
        );
        // a fits (100), b overflows and ends the pass even though c would fit
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].title, "a");
    }

    #[tokio::test]
    async fn malformed_items_are_dropped() {
        let packed = processor()
            .pack_items("q", vec![content_item("a", 0)], 1000)
            .await;
        assert!(packed.is_empty());
    }

    #[tokio::test]
    async fn pool_split_respects_bucket_ratios() {
        let pool = ContextPool {
            content: vec![content_item("c", 400)],
            resources: vec![],
            documents: vec![],
        };
        // content bucket gets 0.4 x 1000 = 400 tokens; a 100-token item fits.
        let packed = processor().pack_pool("q", pool, 1000).await;
        assert_eq!(packed.content.len(), 1);
    }

    #[tokio::test]
    async fn packed_output_never_exceeds_budget() {
        let items: Vec<ContextItem> =
            (0..20).map(|i| content_item(&format!("i{i}"), 2000)).collect();
        let budget = 1200;
        let packed = processor().pack_items("q", items, budget).await;
        let total: usize = packed
            .iter()
            .map(|i| count_item_tokens(i, &CharTokenizer))
            .sum();
        assert!(total <= budget, "packed {total} tokens into budget {budget}");
    }
}
