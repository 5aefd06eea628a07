//! Context serialization and final request assembly.
//!
//! The merged context renders to one tagged string, tiers in priority order,
//! each item wrapped in a `<ContextItem>` element with a running citation
//! index so the model can cite back into the flattened source list.

use scribeflow_core::item::{ContextItem, ContextPool};
use scribeflow_core::message::{
    CacheControl, ContentBlock, ImageUrl, Message, MessageContent, ModelInfo,
};
use scribeflow_core::source::{MergedContext, Source};

/// Render the merged context as the prompt-facing context string. Empty tiers
/// are omitted entirely; an empty context renders as an empty string.
pub fn merged_context_to_string(merged: &MergedContext) -> String {
    if merged.is_empty() {
        return String::new();
    }

    let mut citation = 1usize;
    let mut out = String::new();

    render_sources(&mut out, "urlSources", &merged.url_sources, &mut citation);
    render_pool(
        &mut out,
        "mentionedContext",
        &merged.mentioned_context,
        &mut citation,
    );
    render_pool(
        &mut out,
        "relevantContext",
        &merged.relevant_context,
        &mut citation,
    );
    render_sources(
        &mut out,
        "webSearchSources",
        &merged.web_search_sources,
        &mut citation,
    );
    render_sources(
        &mut out,
        "librarySearchSources",
        &merged.library_search_sources,
        &mut citation,
    );

    out
}

/// Flatten the merged context to its citation list, in render order. Index
/// `i` in the output is citation `i + 1` in the context string.
pub fn flatten_to_sources(merged: &MergedContext) -> Vec<Source> {
    let mut sources = Vec::new();
    sources.extend(merged.url_sources.iter().cloned());
    sources.extend(merged.mentioned_context.iter().map(ContextItem::to_source));
    sources.extend(merged.relevant_context.iter().map(ContextItem::to_source));
    sources.extend(merged.web_search_sources.iter().cloned());
    sources.extend(merged.library_search_sources.iter().cloned());
    sources
}

fn render_sources(out: &mut String, tag: &str, sources: &[Source], citation: &mut usize) {
    if sources.is_empty() {
        return;
    }
    out.push_str(&format!("<{tag}>\n"));
    for source in sources {
        let url = source.url.as_deref().unwrap_or("");
        out.push_str(&format!(
            "<ContextItem citationIndex='[[citation:{}]]' type='source' url='{}' title='{}'>{}</ContextItem>\n",
            citation, url, source.title, source.page_content,
        ));
        *citation += 1;
    }
    out.push_str(&format!("</{tag}>\n\n"));
}

fn render_pool(out: &mut String, tag: &str, pool: &ContextPool, citation: &mut usize) {
    if pool.is_empty() {
        return;
    }
    out.push_str(&format!("<{tag}>\n"));
    for item in pool.iter() {
        let key = item.key();
        out.push_str(&format!(
            "<ContextItem citationIndex='[[citation:{}]]' type='{}' entityId='{}' title='{}'>{}</ContextItem>\n",
            citation,
            key.domain,
            key.entity_id,
            item.title(),
            item.content(),
        ));
        *citation += 1;
    }
    out.push_str(&format!("</{tag}>\n\n"));
}

/// Assemble the final message sequence for the completion call:
/// system prompt, chat history, extra injected messages, the context message
/// (omitted when empty), and the user's query (with image blocks when
/// supplied). Models with prompt-caching support get every message except the
/// last marked ephemeral-cacheable.
pub fn build_final_request_messages(
    system_prompt: &str,
    history: Vec<Message>,
    extra_messages: Vec<Message>,
    context_str: &str,
    user_query: &str,
    images: Vec<String>,
    model: &ModelInfo,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + extra_messages.len() + 3);
    messages.push(Message::system(system_prompt));
    messages.extend(history);
    messages.extend(extra_messages);

    if !context_str.is_empty() {
        messages.push(Message::user(format!("## Context\n\n{context_str}")));
    }

    if images.is_empty() {
        messages.push(Message::user(user_query));
    } else {
        let mut blocks = vec![ContentBlock::Text {
            text: user_query.to_string(),
            cache_control: None,
        }];
        blocks.extend(images.into_iter().map(|url| ContentBlock::ImageUrl {
            image_url: ImageUrl { url },
        }));
        messages.push(Message::user_with_blocks(blocks));
    }

    if model.context_caching {
        apply_context_caching(&mut messages);
    }
    messages
}

/// Mark every message except the last as part of the cacheable prefix. Only
/// text blocks carry the directive; image blocks never do.
fn apply_context_caching(messages: &mut [Message]) {
    let Some((_last, prefix)) = messages.split_last_mut() else {
        return;
    };
    for message in prefix {
        message.content = match std::mem::replace(&mut message.content, MessageContent::Text(String::new())) {
            MessageContent::Text(text) => MessageContent::Blocks(vec![ContentBlock::Text {
                text,
                cache_control: Some(CacheControl::Ephemeral),
            }]),
            MessageContent::Blocks(blocks) => MessageContent::Blocks(
                blocks
                    .into_iter()
                    .map(|block| match block {
                        ContentBlock::Text { text, .. } => ContentBlock::Text {
                            text,
                            cache_control: Some(CacheControl::Ephemeral),
                        },
                        image @ ContentBlock::ImageUrl { .. } => image,
                    })
                    .collect(),
            ),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribeflow_core::item::{ContentMeta, SearchDomain};

    fn merged_with(url: bool, mentioned: bool) -> MergedContext {
        let mut merged = MergedContext::default();
        if url {
            merged.url_sources.push(Source {
                url: Some("https://example.com".into()),
                title: "Example".into(),
                page_content: "crawled page".into(),
                entity_type: Some(SearchDomain::UrlSource),
                entity_id: Some("https://example.com".into()),
            });
        }
        if mentioned {
            merged.mentioned_context.content.push(ContextItem::Content {
                text: "mentioned note".into(),
                meta: ContentMeta {
                    entity_id: "note-1".into(),
                    domain: SearchDomain::Content,
                    title: "Note".into(),
                    use_whole_content: None,
                },
            });
        }
        merged
    }

    #[test]
    fn tiers_render_in_priority_order_with_running_citations() {
        let rendered = merged_context_to_string(&merged_with(true, true));
        let url_pos = rendered.find("<urlSources>").unwrap();
        let mentioned_pos = rendered.find("<mentionedContext>").unwrap();
        assert!(url_pos < mentioned_pos);
        assert!(rendered.contains("citationIndex='[[citation:1]]'"));
        assert!(rendered.contains("citationIndex='[[citation:2]]'"));
        assert!(rendered.contains("entityId='note-1'"));
    }

    #[test]
    fn empty_tiers_are_omitted() {
        let rendered = merged_context_to_string(&merged_with(false, true));
        assert!(!rendered.contains("urlSources"));
        assert!(rendered.contains("mentionedContext"));
    }

    #[test]
    fn empty_context_renders_empty() {
        assert_eq!(merged_context_to_string(&MergedContext::default()), "");
    }

    #[test]
    fn flattened_sources_match_render_order() {
        let sources = flatten_to_sources(&merged_with(true, true));
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].title, "Example");
        assert_eq!(sources[1].title, "Note");
    }

    #[test]
    fn context_message_is_skipped_when_empty() {
        let messages = build_final_request_messages(
            "system",
            vec![],
            vec![],
            "",
            "question",
            vec![],
            &ModelInfo::named("m"),
        );
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content.text(), "question");
    }

    #[test]
    fn caching_marks_all_but_the_last_message() {
        let mut model = ModelInfo::named("m");
        model.context_caching = true;
        let messages = build_final_request_messages(
            "system",
            vec![Message::user("earlier"), Message::assistant("reply")],
            vec![],
            "<ctx>",
            "question",
            vec![],
            &model,
        );
        let cached = |m: &Message| match &m.content {
            MessageContent::Blocks(blocks) => blocks.iter().any(|b| {
                matches!(
                    b,
                    ContentBlock::Text {
                        cache_control: Some(CacheControl::Ephemeral),
                        ..
                    }
                )
            }),
            MessageContent::Text(_) => false,
        };
        let (last, prefix) = messages.split_last().unwrap();
        assert!(prefix.iter().all(cached));
        assert!(!cached(last));
    }

    #[test]
    fn image_blocks_never_carry_cache_control() {
        let mut model = ModelInfo::named("m");
        model.context_caching = true;
        let messages = build_final_request_messages(
            "system",
            vec![],
            vec![],
            "",
            "look at this",
            vec!["https://example.com/a.png".into()],
            &model,
        );
        // The image message is last here, but force one into the prefix too.
        let mut with_trailing = messages.clone();
        with_trailing.push(Message::user("follow-up"));
        apply_context_caching(&mut with_trailing);
        for message in &with_trailing {
            if let MessageContent::Blocks(blocks) = &message.content {
                for block in blocks {
                    if let ContentBlock::ImageUrl { .. } = block {
                        // serialization of an image block has no cache_control
                        let json = serde_json::to_string(block).unwrap();
                        assert!(!json.contains("cache_control"));
                    }
                }
            }
        }
    }
}
