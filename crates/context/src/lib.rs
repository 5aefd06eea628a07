//! Context assembly for model prompts.
//!
//! Takes the caller's candidate context (explicit mentions, workspace-relevant
//! items, crawled URL sources) plus live web/library search, and packs it into
//! a single budgeted context string in strict priority order:
//!
//! `url sources > mentioned > relevant > web search > library search`
//!
//! Entry point is [`allocator::ContextAllocator::prepare_context`]. The
//! allocator never fails the request: backend errors degrade tier by tier and
//! the worst case is an empty context.

pub mod allocator;
pub mod dedup;
pub mod processors;
pub mod serializer;
pub mod token;

pub use allocator::{ContextAllocator, PrepareContextRequest, PreparedContext};
