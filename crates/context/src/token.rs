//! Token accounting helpers over items, pools, and sources.
//!
//! All counts go through the shared [`Tokenizer`] so the budget arithmetic in
//! the allocator and the processors agree with each other. Counts are
//! estimates; the budget policy tolerates small overshoot.

use scribeflow_core::item::{ContextItem, ContextPool};
use scribeflow_core::source::{MergedContext, Source};
use scribeflow_core::tokenizer::{Tokenizer, truncate_to_tokens};

pub fn count_item_tokens(item: &ContextItem, tokenizer: &dyn Tokenizer) -> usize {
    tokenizer.count(item.content())
}

pub fn count_pool_tokens(pool: &ContextPool, tokenizer: &dyn Tokenizer) -> usize {
    pool.iter().map(|item| count_item_tokens(item, tokenizer)).sum()
}

pub fn count_sources_tokens(sources: &[Source], tokenizer: &dyn Tokenizer) -> usize {
    sources.iter().map(|s| tokenizer.count(&s.page_content)).sum()
}

pub fn count_merged_tokens(merged: &MergedContext, tokenizer: &dyn Tokenizer) -> usize {
    count_sources_tokens(&merged.url_sources, tokenizer)
        + count_pool_tokens(&merged.mentioned_context, tokenizer)
        + count_pool_tokens(&merged.relevant_context, tokenizer)
        + count_sources_tokens(&merged.web_search_sources, tokenizer)
        + count_sources_tokens(&merged.library_search_sources, tokenizer)
}

/// Drop whole items greedily (in pool order) until the pool fits, then
/// hard-truncate the last kept item if needed. Used as the residual overflow
/// guard after packing.
pub fn truncate_pool(pool: &mut ContextPool, max_tokens: usize, tokenizer: &dyn Tokenizer) {
    if max_tokens == usize::MAX {
        return;
    }
    let mut remaining = max_tokens;
    for bucket in [&mut pool.content, &mut pool.resources, &mut pool.documents] {
        let mut kept = Vec::new();
        for item in bucket.drain(..) {
            let tokens = count_item_tokens(&item, tokenizer);
            if tokens <= remaining {
                remaining -= tokens;
                kept.push(item);
            } else if remaining > 0 {
                let truncated = truncate_to_tokens(item.content(), remaining, tokenizer);
                remaining = 0;
                kept.push(item.with_content(truncated));
            } else {
                break;
            }
        }
        *bucket = kept;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribeflow_core::item::{ContentMeta, SearchDomain};
    use scribeflow_core::tokenizer::CharTokenizer;

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

    #[test]
    fn pool_tokens_sum_over_all_buckets() {
        let pool = ContextPool {
            content: vec![content_item("a", 40)],
            resources: vec![],
            documents: vec![content_item("b", 80)],
        };
        // 40 chars -> 10 tokens, 80 chars -> 20 tokens
        assert_eq!(count_pool_tokens(&pool, &CharTokenizer), 30);
    }

    #[test]
    fn truncate_pool_drops_and_trims() {
        let mut pool = ContextPool {
            content: vec![content_item("a", 40), content_item("b", 40)],
            resources: vec![content_item("c", 40)],
            documents: vec![],
        };
        // 15 tokens: item a (10) fits, item b gets trimmed to 5 tokens,
        // item c is dropped.
        truncate_pool(&mut pool, 15, &CharTokenizer);
        assert_eq!(pool.content.len(), 2);
        assert!(pool.resources.is_empty());
        assert_eq!(count_pool_tokens(&pool, &CharTokenizer), 15);
    }

    #[test]
    fn unbounded_budget_is_a_noop() {
        let mut pool = ContextPool {
            content: vec![content_item("a", 4000)],
            resources: vec![],
            documents: vec![],
        };
        truncate_pool(&mut pool, usize::MAX, &CharTokenizer);
        assert_eq!(pool.content[0].content().len(), 4000);
    }
}
