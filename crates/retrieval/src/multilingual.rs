//! Multilingual search fan-out.
//!
//! Every query variant is searched in every configured locale, under a
//! bounded-concurrency fan-out. Results merge in deterministic (variant,
//! locale) order regardless of task completion order, drop duplicates
//! first-wins, optionally pass through the reranker, and are capped to the
//! effective result limit.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use scribeflow_config::SearchTuning;
use scribeflow_core::backend::{LibrarySearchBackend, Reranker, WebSearchBackend};
use scribeflow_core::source::{Query, Source};

/// Fans one query (plus rewrites) out across locales against a search
/// backend, merging into a single ranked source list.
pub struct MultilingualSearcher {
    web: Arc<dyn WebSearchBackend>,
    library: Arc<dyn LibrarySearchBackend>,
    reranker: Option<Arc<dyn Reranker>>,
    tuning: SearchTuning,
}

impl MultilingualSearcher {
    pub fn new(
        web: Arc<dyn WebSearchBackend>,
        library: Arc<dyn LibrarySearchBackend>,
        reranker: Option<Arc<dyn Reranker>>,
        tuning: SearchTuning,
    ) -> Self {
        Self {
            web,
            library,
            reranker,
            tuning,
        }
    }

    /// Web search across all (variant, locale) pairs. Best-effort: individual
    /// call failures are logged and skipped.
    pub async fn search_web(&self, query: &Query, deep: bool) -> Vec<Source> {
        let limit = self.tuning.limit(deep);
        let web = Arc::clone(&self.web);
        let sources = self
            .fan_out(query, move |variant, locale| {
                let web = Arc::clone(&web);
                async move { web.search(&variant, &locale, limit).await }
            })
            .await;
        self.finish(query, sources, limit, deep).await
    }

    /// Library search across all (variant, locale) pairs.
    pub async fn search_library(&self, query: &Query, deep: bool, whole_space: bool) -> Vec<Source> {
        let limit = self.tuning.limit(deep);
        let library = Arc::clone(&self.library);
        let sources = self
            .fan_out(query, move |variant, locale| {
                let library = Arc::clone(&library);
                async move { library.search(&variant, &locale, limit, whole_space).await }
            })
            .await;
        self.finish(query, sources, limit, deep).await
    }

    /// Run `call` for each (variant, locale) pair under the concurrency gate,
    /// then merge results in pair order. A timed-out or failed call
    /// contributes nothing.
    async fn fan_out<F, Fut>(&self, query: &Query, call: F) -> Vec<Source>
    where
        F: Fn(String, String) -> Fut,
        Fut: Future<Output = Result<Vec<Source>, scribeflow_core::error::SearchError>>
            + Send
            + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.tuning.search_concurrency));
        let call_timeout = Duration::from_secs(self.tuning.call_timeout_secs);
        let mut tasks = JoinSet::new();

        let mut pair_index = 0usize;
        for variant in query.variants() {
            for locale in &self.tuning.locales {
                let semaphore = Arc::clone(&semaphore);
                let future = call(variant.clone(), locale.clone());
                let variant = variant.clone();
                let locale = locale.clone();
                let idx = pair_index;
                pair_index += 1;

                tasks.spawn(async move {
                    let Ok(_permit) = semaphore.acquire().await else {
                        return (idx, Vec::new());
                    };
                    match tokio::time::timeout(call_timeout, future).await {
                        Ok(Ok(sources)) => (idx, sources),
                        Ok(Err(e)) => {
                            warn!(%variant, %locale, error = %e, "Search call failed");
                            (idx, Vec::new())
                        }
                        Err(_) => {
                            warn!(%variant, %locale, "Search call timed out");
                            (idx, Vec::new())
                        }
                    }
                });
            }
        }

        // Tasks finish in arbitrary order; re-sort by pair index so the merge
        // is deterministic for a given input.
        let mut batches: Vec<(usize, Vec<Source>)> = Vec::with_capacity(pair_index);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(batch) => batches.push(batch),
                Err(e) => warn!(error = %e, "Search task panicked"),
            }
        }
        batches.sort_by_key(|(idx, _)| *idx);

        batches
            .into_iter()
            .flat_map(|(_, sources)| sources)
            .collect()
    }

    /// Dedup, optionally rerank, and cap the merged results.
    async fn finish(
        &self,
        query: &Query,
        sources: Vec<Source>,
        limit: usize,
        deep: bool,
    ) -> Vec<Source> {
        let merged = dedup_by_url(sources);
        debug!(count = merged.len(), "Merged multilingual search results");

        let ranked = match (&self.reranker, self.tuning.enable_rerank) {
            (Some(reranker), true) => {
                let threshold = self.tuning.relevance_threshold(deep);
                match reranker
                    .rerank(&query.text, merged.clone(), threshold)
                    .await
                {
                    Ok(ranked) => ranked,
                    Err(e) => {
                        warn!(error = %e, "Rerank failed, keeping merge order");
                        merged
                    }
                }
            }
            _ => merged,
        };

        ranked.into_iter().take(limit).collect()
    }
}

/// First occurrence of each URL wins; sources without a URL are kept as-is.
fn dedup_by_url(sources: Vec<Source>) -> Vec<Source> {
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .filter(|source| match &source.url {
            Some(url) => seen.insert(url.clone()),
            None => true,
        })
        .collect()
}
