//! The budget allocator — one sequential fold over the context tiers.
//!
//! `prepare_context` seeds a single `remaining_tokens` counter from the
//! model's window and walks the tiers in consumption order (url sources, web
//! search, library search, mentioned, relevant), subtracting what each tier
//! actually packed before the next one runs. A cleanup pass then removes
//! cross-tier duplicates in favor of the higher-priority copy and caps
//! search-source noise.
//!
//! The allocator never fails the request. Backend errors degrade inside the
//! individual components, a blown deadline skips the remaining tiers and
//! serializes whatever already completed, and the worst case is an empty
//! context string.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use scribeflow_config::{BudgetPolicy, ContextConfig};
use scribeflow_core::item::ContextPool;
use scribeflow_core::message::ModelInfo;
use scribeflow_core::source::{MergedContext, Query, Source};
use scribeflow_core::tokenizer::Tokenizer;
use scribeflow_retrieval::MultilingualSearcher;

use crate::dedup::{
    dedup_pool_contents, filter_sources_against, filter_sources_against_sources,
    remove_overlapping_items,
};
use crate::processors::TierProcessor;
use crate::serializer::{flatten_to_sources, merged_context_to_string};
use crate::token::{count_pool_tokens, count_sources_tokens, truncate_pool};

/// Everything one allocation run needs. The caller resolves URL crawling and
/// query rewriting upstream and passes the results in.
#[derive(Debug, Clone)]
pub struct PrepareContextRequest {
    pub query: Query,
    pub mentioned_context: ContextPool,
    pub relevant_context: ContextPool,
    pub url_sources: Vec<Source>,
    /// The model's max token window; the context budget is a configured
    /// fraction of it.
    pub max_tokens: usize,
    pub enable_mentioned_context: bool,
    pub enable_web_search: bool,
    pub enable_library_search: bool,
    /// Search the whole workspace library rather than the current project.
    pub library_whole_space: bool,
    /// Deep mode: wider search limits, stricter rerank threshold.
    pub deep_search: bool,
    pub model_info: ModelInfo,
}

/// The packed, serialized result: the prompt-facing context string plus the
/// citation source list aligned with it.
#[derive(Debug, Clone, Default)]
pub struct PreparedContext {
    pub context_str: String,
    pub sources: Vec<Source>,
}

impl PreparedContext {
    pub fn empty() -> Self {
        Self::default()
    }
}

pub struct ContextAllocator {
    processor: TierProcessor,
    searcher: Option<Arc<MultilingualSearcher>>,
    tokenizer: Arc<dyn Tokenizer>,
    config: ContextConfig,
}

impl ContextAllocator {
    pub fn new(
        processor: TierProcessor,
        searcher: Option<Arc<MultilingualSearcher>>,
        tokenizer: Arc<dyn Tokenizer>,
        config: ContextConfig,
    ) -> Self {
        Self {
            processor,
            searcher,
            tokenizer,
            config,
        }
    }

    /// Pack the request's candidate context into the budget and serialize it.
    pub async fn prepare_context(&self, request: PrepareContextRequest) -> PreparedContext {
        let deadline =
            Instant::now() + Duration::from_secs(self.config.request_timeout_secs.max(1));
        let budget = BudgetPolicy::fraction_of(
            request.max_tokens,
            self.config.budget.max_context_ratio,
        );
        info!(
            query = %request.query.text,
            budget,
            deep = request.deep_search,
            "Preparing context"
        );

        let merged = self.fold_tiers(&request, budget, deadline).await;
        let context_str = merged_context_to_string(&merged);
        let sources = flatten_to_sources(&merged);
        info!(
            tokens = self.tokenizer.count(&context_str),
            sources = sources.len(),
            "Context prepared"
        );
        PreparedContext {
            context_str,
            sources,
        }
    }

    async fn fold_tiers(
        &self,
        request: &PrepareContextRequest,
        budget: usize,
        deadline: Instant,
    ) -> MergedContext {
        let query = &request.query;
        let mut remaining = budget;
        let mut merged = MergedContext::default();

        // 1. URL sources: highest priority, ratio-capped sub-budget.
        if !request.url_sources.is_empty() && remaining > 0 {
            let sub_budget =
                BudgetPolicy::fraction_of(budget, self.config.budget.url_sources_ratio)
                    .min(remaining);
            merged.url_sources = self
                .processor
                .pack_sources(&query.text, request.url_sources.clone(), sub_budget)
                .await;
            let used = count_sources_tokens(&merged.url_sources, &*self.tokenizer);
            remaining = remaining.saturating_sub(used);
            debug!(tier = "urlSources", used, remaining, "Tier packed");
        }

        // 2. Web search.
        if request.enable_web_search && !self.expired(deadline, "webSearch") {
            if let Some(searcher) = &self.searcher {
                let mut sources = searcher.search_web(query, request.deep_search).await;
                if !request.model_info.long_context {
                    sources.truncate(self.config.budget.short_context_source_cap);
                }
                merged.web_search_sources = self.processor.fit_sources(sources, remaining);
                let used = count_sources_tokens(&merged.web_search_sources, &*self.tokenizer);
                remaining = remaining.saturating_sub(used);
                debug!(tier = "webSearch", used, remaining, "Tier packed");
            }
        }

        // 3. Library search.
        if request.enable_library_search && !self.expired(deadline, "librarySearch") {
            if let Some(searcher) = &self.searcher {
                let mut sources = searcher
                    .search_library(query, request.deep_search, request.library_whole_space)
                    .await;
                if !request.model_info.long_context {
                    sources.truncate(self.config.budget.short_context_source_cap);
                }
                merged.library_search_sources = self.processor.fit_sources(sources, remaining);
                let used = count_sources_tokens(&merged.library_search_sources, &*self.tokenizer);
                remaining = remaining.saturating_sub(used);
                debug!(tier = "librarySearch", used, remaining, "Tier packed");
            }
        }

        let mut relevant = request.relevant_context.clone();

        // 4. Mentioned context.
        if request.enable_mentioned_context
            && request.model_info.supports_mentioned_context
            && !request.mentioned_context.is_empty()
            && !self.expired(deadline, "mentionedContext")
        {
            // Caller hints on mentioned items also apply to the same entity
            // when it resurfaces via relevance.
            propagate_whole_content_hints(&request.mentioned_context, &mut relevant);

            let mentioned_tokens =
                count_pool_tokens(&request.mentioned_context, &*self.tokenizer);
            let mentioned = if mentioned_tokens <= remaining {
                request.mentioned_context.clone()
            } else {
                let mut packed = self
                    .processor
                    .pack_pool(&query.text, request.mentioned_context.clone(), remaining)
                    .await;
                // Hard-truncate residual overflow, leaving headroom equal to
                // the short threshold so unconditionally-included short items
                // are not clawed back.
                let cap = remaining.saturating_add(self.config.budget.short_content_threshold);
                truncate_pool(&mut packed, cap, &*self.tokenizer);
                packed
            };
            let used = count_pool_tokens(&mentioned, &*self.tokenizer);
            remaining = remaining.saturating_sub(used);
            merged.mentioned_context = mentioned;
            debug!(tier = "mentionedContext", used, remaining, "Tier packed");
        }

        // 5. Relevant context: packed with an unbounded phase so ranking
        // decides the order, then cut down to whatever budget is left.
        if !relevant.is_empty() && remaining > 0 && !self.expired(deadline, "relevantContext") {
            remove_overlapping_items(&mut relevant, &merged.mentioned_context);
            let mut packed = self
                .processor
                .pack_pool(&query.text, relevant, usize::MAX)
                .await;
            truncate_pool(&mut packed, remaining, &*self.tokenizer);
            let used = count_pool_tokens(&packed, &*self.tokenizer);
            remaining = remaining.saturating_sub(used);
            merged.relevant_context = packed;
            debug!(tier = "relevantContext", used, remaining, "Tier packed");
        }

        // 6. Cross-tier cleanup: higher-priority copies win.
        dedup_pool_contents(&mut merged.relevant_context);
        merged.web_search_sources = filter_sources_against(
            std::mem::take(&mut merged.web_search_sources),
            &[&merged.mentioned_context, &merged.relevant_context],
        );
        merged.library_search_sources = filter_sources_against(
            std::mem::take(&mut merged.library_search_sources),
            &[&merged.mentioned_context, &merged.relevant_context],
        );
        merged.library_search_sources = filter_sources_against_sources(
            std::mem::take(&mut merged.library_search_sources),
            &merged.web_search_sources,
        );

        // 7. Noise cap: search hits defer to explicit context.
        if !merged.mentioned_context.is_empty() || !merged.relevant_context.is_empty() {
            merged
                .web_search_sources
                .truncate(self.config.budget.noise_cap);
            merged
                .library_search_sources
                .truncate(self.config.budget.noise_cap);
        }

        merged
    }

    fn expired(&self, deadline: Instant, tier: &str) -> bool {
        if Instant::now() >= deadline {
            warn!(tier, "Request deadline passed, serializing partial context");
            true
        } else {
            false
        }
    }
}

/// Copy `use_whole_content` hints from mentioned items onto the same entity
/// in the relevant pool.
fn propagate_whole_content_hints(mentioned: &ContextPool, relevant: &mut ContextPool) {
    use std::collections::HashMap;
    let hints: HashMap<_, _> = mentioned
        .iter()
        .filter_map(|item| item.use_whole_content().map(|hint| (item.key(), hint)))
        .collect();
    if hints.is_empty() {
        return;
    }
    for bucket in [
        &mut relevant.content,
        &mut relevant.resources,
        &mut relevant.documents,
    ] {
        for item in bucket.iter_mut() {
            if let Some(hint) = hints.get(&item.key()) {
                item.set_use_whole_content(Some(*hint));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribeflow_core::item::{ContentMeta, ContextItem, SearchDomain};

    fn content_item(id: &str, hint: Option<bool>) -> ContextItem {
        ContextItem::Content {
            text: "body".into(),
            meta: ContentMeta {
                entity_id: id.into(),
                domain: SearchDomain::Content,
                title: id.into(),
                use_whole_content: hint,
            },
        }
    }

    #[test]
    fn hints_propagate_to_matching_entities_only() {
        let mentioned = ContextPool {
            content: vec![content_item("a", Some(false))],
            resources: vec![],
            documents: vec![],
        };
        let mut relevant = ContextPool {
            content: vec![content_item("a", None), content_item("b", None)],
            resources: vec![],
            documents: vec![],
        };
        propagate_whole_content_hints(&mentioned, &mut relevant);
        assert_eq!(relevant.content[0].use_whole_content(), Some(false));
        assert_eq!(relevant.content[1].use_whole_content(), None);
    }
}
