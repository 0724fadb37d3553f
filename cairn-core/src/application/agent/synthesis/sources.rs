//! Shape matchers for heterogeneous backend result payloads.
//!
//! Each backend nests its items under different keys (`results`,
//! `results.hits`, `result.thread`, `top_results`, `web.results`, ...).
//! The matchers here normalize those shapes into citation-ready context
//! sections, source references, and an inline-image manifest. New backend
//! shapes are handled by adding a matcher; orchestration never changes.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::warn;

use crate::domain::types::{ContextFile, FileKind, ToolCallResult};

/// Web results are capped; the other backends already bound their result
/// counts server-side.
const MAX_WEB_RESULTS: usize = 5;

/// Cap for opaque payloads rendered without a recognized shape.
const MAX_OPAQUE_CHARS: usize = 5_000;

// "Thu, 16 Oct 2025 21:13:14 +0200" -> "16 Oct 2025" / "21:13:14"
static DATE_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2}\s+\w+\s+\d{4})").expect("date pattern"));
static TIME_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2}:\d{2}:\d{2})").expect("time pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum SourceKind {
    Wiki,
    Logbook,
    Web,
}

/// One citable source, built fresh per synthesis call and never
/// persisted. IDs are per-backend-type sequence tags ("ELOG-1", "Web-2").
#[derive(Debug, Clone, Serialize)]
pub(crate) struct SourceReference {
    pub id: String,
    pub title: String,
    pub url: String,
    pub kind: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl SourceReference {
    fn plain(id: String, title: String, url: String, kind: SourceKind) -> Self {
        Self {
            id,
            title,
            url,
            kind,
            entry_id: None,
            date: None,
            time: None,
            author: None,
            category: None,
            system: None,
            domain: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct InlineImage {
    pub source_id: String,
    pub url: String,
    pub caption: String,
}

/// Everything the with-tools answer prompt needs from the tool results.
#[derive(Debug, Default)]
pub(crate) struct GroundingContext {
    pub sections: Vec<String>,
    pub references: Vec<SourceReference>,
    pub images: Vec<InlineImage>,
}

/// Assemble the grounding context from uploaded files and successful
/// tool results, routing each result through the matcher for its
/// backend.
pub(crate) fn collect_grounding(
    files: &[ContextFile],
    results: &[ToolCallResult],
) -> GroundingContext {
    let mut grounding = GroundingContext::default();

    if !files.is_empty() {
        grounding.sections.push("**UPLOADED FILES:**\n".to_string());
        for file in files {
            match file.kind {
                FileKind::Image => {
                    if file.inline_data.is_some() {
                        grounding
                            .sections
                            .push(format!("[FILE] Image: {}\n[Image data available]", file.name));
                    } else {
                        grounding
                            .sections
                            .push(format!("[FILE] Image: {}\n[Image uploaded]", file.name));
                    }
                }
                FileKind::Document => match file.preview.as_deref() {
                    Some(preview) if !preview.is_empty() => {
                        grounding
                            .sections
                            .push(format!("[FILE] Document: {}\n{}", file.name, preview));
                    }
                    _ => {
                        grounding
                            .sections
                            .push(format!("[FILE] Document: {}", file.name));
                    }
                },
            }
        }
        grounding.sections.push("\n**TOOL RESULTS:**\n".to_string());
    }

    for result in results.iter().filter(|r| r.success) {
        let Some(data) = result.data.as_ref() else {
            continue;
        };
        if result.tool.contains("search_accelerator_knowledge") {
            append_wiki(&mut grounding, data);
        } else if result.tool.to_lowercase().contains("elog") {
            append_logbook(&mut grounding, &result.tool, data);
        } else {
            append_web(&mut grounding, &result.tool, data);
        }
    }

    grounding
}

/// Knowledge-base results: `{"results": [...]}` with optional per-item
/// `images`.
fn append_wiki(grounding: &mut GroundingContext, data: &Value) {
    let items = data
        .get("results")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for (index, item) in items.iter().enumerate() {
        let source_id = format!("AccWiki-{}", index + 1);
        let url = text_field(item, "url", "N/A");
        let title = text_field(item, "title", "Unknown");

        grounding.references.push(SourceReference::plain(
            source_id.clone(),
            title.clone(),
            url.clone(),
            SourceKind::Wiki,
        ));

        if let Some(images) = item.get("images").and_then(Value::as_array) {
            for image in images {
                let image_url = image
                    .get("url")
                    .and_then(Value::as_str)
                    .or_else(|| image.get("src").and_then(Value::as_str));
                if let Some(image_url) = image_url {
                    let caption = image
                        .get("caption")
                        .and_then(Value::as_str)
                        .map(|text| text.to_string())
                        .unwrap_or_else(|| format!("Figure from {title}"));
                    grounding.images.push(InlineImage {
                        source_id: source_id.clone(),
                        url: image_url.to_string(),
                        caption,
                    });
                }
            }
        }

        match item.get("formatted_context").and_then(Value::as_str) {
            Some(formatted) => {
                grounding.sections.push(format!("[{source_id}]\n{formatted}"));
            }
            None => {
                warn!(source = %source_id, "knowledge-base result missing formatted_context, using fallback");
                let content = text_field(item, "content", "");
                grounding
                    .sections
                    .push(format!("[{source_id}] {title}\nContent: {content}\nURL: {url}"));
            }
        }
    }
}

/// Logbook results: thread fetches nest entries under `result.thread`,
/// searches under `results.hits`. Entries carry rich metadata and
/// attachments.
fn append_logbook(grounding: &mut GroundingContext, tool: &str, data: &Value) {
    let entries = if tool.contains("get_elog_thread") {
        data.pointer("/result/thread")
    } else {
        data.pointer("/results/hits")
    };
    let entries = entries.and_then(Value::as_array).cloned().unwrap_or_default();

    for (index, entry) in entries.iter().enumerate() {
        let source_id = format!("ELOG-{}", index + 1);
        let entry_id = text_field(entry, "elog_id", "N/A");
        let url = text_field(entry, "url", "N/A");
        let title = text_field(entry, "title", "N/A");
        let timestamp = text_field(entry, "timestamp", "N/A");

        let (date, time) = split_timestamp(&timestamp);

        grounding.references.push(SourceReference {
            id: source_id.clone(),
            title: title.clone(),
            url: url.clone(),
            kind: SourceKind::Logbook,
            entry_id: Some(entry_id.clone()),
            date: Some(date),
            time: Some(time),
            author: Some(text_field(entry, "author", "N/A")),
            category: Some(text_field(entry, "category", "N/A")),
            system: Some(text_field(entry, "system", "N/A")),
            domain: Some(text_field(entry, "domain", "N/A")),
        });

        if let Some(attachments) = entry.get("attachments").and_then(Value::as_array) {
            for attachment in attachments {
                let attachment_url = match attachment {
                    Value::Object(map) => map
                        .get("url")
                        .and_then(Value::as_str)
                        .map(|text| text.to_string()),
                    Value::String(text) => Some(text.clone()),
                    other => Some(other.to_string()),
                };
                if let Some(attachment_url) = attachment_url.filter(|u| !u.is_empty()) {
                    grounding.images.push(InlineImage {
                        source_id: source_id.clone(),
                        url: attachment_url,
                        caption: format!("Attachment from ELOG #{entry_id}"),
                    });
                }
            }
        }

        match entry.get("formatted_context").and_then(Value::as_str) {
            Some(formatted) => {
                grounding.sections.push(format!("[{source_id}]\n{formatted}"));
            }
            None => {
                warn!(source = %source_id, entry = %entry_id, "logbook entry missing formatted_context, using fallback");
                let content = text_field(entry, "body_clean", "");
                grounding.sections.push(format!(
                    "[{source_id}] ELOG #{entry_id}: {title}\nContent: {content}\nURL: {url}"
                ));
            }
        }
    }
}

/// Generic web-search handler: tries the known nesting shapes in
/// priority order, then falls back to opaque JSON.
fn append_web(grounding: &mut GroundingContext, tool: &str, data: &Value) {
    let items = web_result_items(data);

    if let Some(knowledge_base) = data.get("knowledge_base_formatted").and_then(Value::as_str) {
        grounding
            .sections
            .push(format!("[Knowledge Base]\n{knowledge_base}"));
    }

    if items.is_empty() {
        let pretty = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
        grounding
            .sections
            .push(format!("[{tool}]\n{}", truncate_chars(&pretty, MAX_OPAQUE_CHARS)));
        return;
    }

    for (index, item) in items.iter().take(MAX_WEB_RESULTS).enumerate() {
        let source_id = format!("Web-{}", index + 1);
        let url = text_field(item, "url", "N/A");
        let title = text_field(item, "title", "Unknown");

        grounding.references.push(SourceReference::plain(
            source_id.clone(),
            title.clone(),
            url.clone(),
            SourceKind::Web,
        ));

        match item.get("formatted_context").and_then(Value::as_str) {
            Some(formatted) => {
                grounding.sections.push(format!("[{source_id}]\n{formatted}"));
            }
            None => {
                warn!(source = %source_id, "web result missing formatted_context, using fallback");
                let content = item
                    .get("snippet")
                    .or_else(|| item.get("content"))
                    .or_else(|| item.get("description"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                grounding
                    .sections
                    .push(format!("[{source_id}] {title}\nContent: {content}\nURL: {url}"));
            }
        }
    }
}

/// The known web-search nesting shapes, in priority order.
fn web_result_items(data: &Value) -> Vec<Value> {
    if let Some(items) = data.get("top_results").and_then(Value::as_array) {
        return items.clone();
    }
    if let Some(items) = data.pointer("/data/results").and_then(Value::as_array) {
        return items.clone();
    }
    if let Some(items) = data.pointer("/web/results").and_then(Value::as_array) {
        return items.clone();
    }
    if let Some(items) = data.get("results").and_then(Value::as_array) {
        return items.clone();
    }
    if data.get("url").is_some() && data.get("title").is_some() {
        return vec![data.clone()];
    }
    Vec::new()
}

/// Render a JSON field as display text: strings verbatim, other values
/// via their JSON form, missing/null as the default.
fn text_field(item: &Value, key: &str, default: &str) -> String {
    match item.get(key) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => default.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Pull "16 Oct 2025" / "21:13:14" style date and time parts out of an
/// RFC 2822-ish logbook timestamp. Unparseable parts render as "N/A".
fn split_timestamp(timestamp: &str) -> (String, String) {
    if timestamp == "N/A" {
        return ("N/A".to_string(), "N/A".to_string());
    }
    let date = DATE_PART
        .captures(timestamp)
        .map(|captures| captures[1].to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let time = TIME_PART
        .captures(timestamp)
        .map(|captures| captures[1].to_string())
        .unwrap_or_else(|| "N/A".to_string());
    (date, time)
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wiki_results_prefer_formatted_context() {
        let results = vec![ToolCallResult::success(
            "search_accelerator_knowledge",
            json!({
                "results": [
                    {
                        "title": "SLS storage ring",
                        "url": "https://wiki.example/sls",
                        "formatted_context": "## SLS storage ring\nThe ring...",
                        "images": [
                            {"url": "https://wiki.example/sls/ring.png", "caption": "Ring layout"}
                        ]
                    },
                    {
                        "title": "Beamline overview",
                        "url": "https://wiki.example/beamline",
                        "content": "plain content"
                    }
                ]
            }),
        )];

        let grounding = collect_grounding(&[], &results);
        assert_eq!(grounding.references.len(), 2);
        assert_eq!(grounding.references[0].id, "AccWiki-1");
        assert_eq!(grounding.references[1].id, "AccWiki-2");
        assert!(grounding.sections[0].contains("## SLS storage ring"));
        assert!(grounding.sections[1].contains("Content: plain content"));
        assert_eq!(grounding.images.len(), 1);
        assert_eq!(grounding.images[0].caption, "Ring layout");
    }

    #[test]
    fn logbook_search_reads_hits_and_parses_timestamps() {
        let results = vec![ToolCallResult::success(
            "search_elog",
            json!({
                "results": {
                    "hits": [
                        {
                            "elog_id": 39109,
                            "title": "Beam dump during shift",
                            "url": "https://elog.example/39109",
                            "timestamp": "Thu, 16 Oct 2025 21:13:14 +0200",
                            "author": "operator",
                            "category": "Problem",
                            "system": "RF",
                            "domain": "linac",
                            "formatted_context": "entry text",
                            "attachments": [{"url": "https://elog.example/39109/plot.png"}]
                        }
                    ]
                }
            }),
        )];

        let grounding = collect_grounding(&[], &results);
        assert_eq!(grounding.references.len(), 1);
        let reference = &grounding.references[0];
        assert_eq!(reference.id, "ELOG-1");
        assert_eq!(reference.entry_id.as_deref(), Some("39109"));
        assert_eq!(reference.date.as_deref(), Some("16 Oct 2025"));
        assert_eq!(reference.time.as_deref(), Some("21:13:14"));
        assert_eq!(grounding.images.len(), 1);
        assert!(grounding.images[0].caption.contains("ELOG #39109"));
    }

    #[test]
    fn logbook_thread_reads_result_thread() {
        let results = vec![ToolCallResult::success(
            "get_elog_thread",
            json!({
                "result": {
                    "thread": [
                        {"elog_id": 1, "title": "root", "url": "u", "body_clean": "first"},
                        {"elog_id": 2, "title": "reply", "url": "u2", "body_clean": "second"}
                    ]
                }
            }),
        )];

        let grounding = collect_grounding(&[], &results);
        assert_eq!(grounding.references.len(), 2);
        assert!(grounding.sections[0].contains("ELOG #1: root"));
        assert!(grounding.sections[1].contains("Content: second"));
    }

    #[test]
    fn web_shapes_are_tried_in_priority_order() {
        for payload in [
            json!({"top_results": [{"title": "a", "url": "u"}]}),
            json!({"data": {"results": [{"title": "a", "url": "u"}]}}),
            json!({"web": {"results": [{"title": "a", "url": "u"}]}}),
            json!({"results": [{"title": "a", "url": "u"}]}),
            json!({"title": "a", "url": "u"}),
        ] {
            let results = vec![ToolCallResult::success("web_search", payload)];
            let grounding = collect_grounding(&[], &results);
            assert_eq!(grounding.references.len(), 1, "shape not recognized");
            assert_eq!(grounding.references[0].id, "Web-1");
            assert_eq!(grounding.references[0].kind, SourceKind::Web);
        }
    }

    #[test]
    fn web_results_are_capped() {
        let items: Vec<Value> = (0..8)
            .map(|i| json!({"title": format!("r{i}"), "url": format!("u{i}")}))
            .collect();
        let results = vec![ToolCallResult::success("web_search", json!({"results": items}))];

        let grounding = collect_grounding(&[], &results);
        assert_eq!(grounding.references.len(), MAX_WEB_RESULTS);
    }

    #[test]
    fn unrecognized_shape_falls_back_to_opaque_json() {
        let results = vec![ToolCallResult::success(
            "quick_lookup",
            json!({"payload": {"value": 42}}),
        )];

        let grounding = collect_grounding(&[], &results);
        assert!(grounding.references.is_empty());
        assert_eq!(grounding.sections.len(), 1);
        assert!(grounding.sections[0].starts_with("[quick_lookup]"));
        assert!(grounding.sections[0].contains("42"));
    }

    #[test]
    fn failed_results_contribute_nothing() {
        let results = vec![
            ToolCallResult::failure("search_elog", "timeout"),
            ToolCallResult::success("web_search", json!({"results": [{"title": "a", "url": "u"}]})),
        ];

        let grounding = collect_grounding(&[], &results);
        assert_eq!(grounding.references.len(), 1);
    }

    #[test]
    fn uploaded_files_render_before_tool_results() {
        let files = vec![ContextFile::document(
            "1",
            "runbook.txt",
            "text/plain",
            "procedure text",
        )];
        let results = vec![ToolCallResult::success(
            "web_search",
            json!({"results": [{"title": "a", "url": "u"}]}),
        )];

        let grounding = collect_grounding(&files, &results);
        assert!(grounding.sections[0].contains("UPLOADED FILES"));
        assert!(grounding.sections[1].contains("runbook.txt"));
        assert!(grounding.sections[2].contains("TOOL RESULTS"));
    }

    #[test]
    fn knowledge_base_block_is_included() {
        let results = vec![ToolCallResult::success(
            "quick_search",
            json!({
                "knowledge_base_formatted": "curated facts",
                "top_results": [{"title": "a", "url": "u"}]
            }),
        )];

        let grounding = collect_grounding(&[], &results);
        assert!(grounding.sections[0].contains("[Knowledge Base]\ncurated facts"));
    }
}
