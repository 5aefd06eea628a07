//! Cross-tier deduplication.
//!
//! Two notions of "same" apply across tiers:
//!
//! - **Identity**: same `(domain, entity_id)` key. Search sources referencing
//!   a library entity carry the same key in their metadata.
//! - **Content**: byte-identical content, compared via sha256 digests so
//!   large bodies are never held twice for comparison.
//!
//! Higher-priority tiers always win; these helpers remove the lower-priority
//! copy.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use scribeflow_core::item::{ContextPool, ItemKey};
use scribeflow_core::source::Source;

fn content_digest(content: &str) -> [u8; 32] {
    Sha256::digest(content.as_bytes()).into()
}

/// Remove from `pool` every item whose identity already appears in `against`.
pub fn remove_overlapping_items(pool: &mut ContextPool, against: &ContextPool) {
    let seen: HashSet<ItemKey> = against.iter().map(|item| item.key()).collect();
    for bucket in [&mut pool.content, &mut pool.resources, &mut pool.documents] {
        bucket.retain(|item| !seen.contains(&item.key()));
    }
}

/// Remove within-pool items with byte-identical content, first wins. Pool
/// order (content, resources, documents) decides which copy survives.
pub fn dedup_pool_contents(pool: &mut ContextPool) {
    let mut seen: HashSet<[u8; 32]> = HashSet::new();
    for bucket in [&mut pool.content, &mut pool.resources, &mut pool.documents] {
        bucket.retain(|item| seen.insert(content_digest(item.content())));
    }
}

/// Remove sources that duplicate (by identity or content) anything in the
/// given higher-priority pools.
pub fn filter_sources_against(sources: Vec<Source>, pools: &[&ContextPool]) -> Vec<Source> {
    let mut keys: HashSet<ItemKey> = HashSet::new();
    let mut digests: HashSet<[u8; 32]> = HashSet::new();
    for pool in pools {
        for item in pool.iter() {
            keys.insert(item.key());
            digests.insert(content_digest(item.content()));
        }
    }

    sources
        .into_iter()
        .filter(|source| {
            if let Some((domain, id)) = source.entity_key() {
                if keys.contains(&ItemKey::new(domain, id)) {
                    return false;
                }
            }
            !digests.contains(&content_digest(&source.page_content))
        })
        .collect()
}

/// Remove sources duplicating (by url, identity, or content) any source in
/// the higher-priority list.
pub fn filter_sources_against_sources(sources: Vec<Source>, against: &[Source]) -> Vec<Source> {
    let urls: HashSet<&str> = against.iter().filter_map(|s| s.url.as_deref()).collect();
    let keys: HashSet<(scribeflow_core::item::SearchDomain, &str)> =
        against.iter().filter_map(|s| s.entity_key()).collect();
    let digests: HashSet<[u8; 32]> = against
        .iter()
        .map(|s| content_digest(&s.page_content))
        .collect();

    sources
        .into_iter()
        .filter(|source| {
            if source.url.as_deref().is_some_and(|url| urls.contains(url)) {
                return false;
            }
            if source.entity_key().is_some_and(|key| keys.contains(&key)) {
                return false;
            }
            !digests.contains(&content_digest(&source.page_content))
        })
        .collect()
}
