//! JSON recovery from free-form model output. Models wrap the requested
//! JSON object in prose, code fences, or reasoning preambles; a balanced
//! brace scan (string- and escape-aware) pulls out candidate objects
//! without relying on regex over nested structures.

use serde_json::Value;

/// First balanced `{...}` group parsed as JSON, falling back to parsing
/// the whole trimmed text when no balanced group exists.
pub(crate) fn parse_object_from_text(text: &str) -> Option<Value> {
    match balanced_objects(text).first() {
        Some(snippet) => serde_json::from_str(snippet).ok(),
        None => serde_json::from_str(text.trim()).ok(),
    }
}

/// First balanced `{...}` group whose parsed value carries `key`, falling
/// back to parsing the whole trimmed text.
pub(crate) fn parse_object_with_key(text: &str, key: &str) -> Option<Value> {
    for snippet in balanced_objects(text) {
        if let Ok(value) = serde_json::from_str::<Value>(snippet) {
            if value.get(key).is_some() {
                return Some(value);
            }
        }
    }
    serde_json::from_str(text.trim()).ok()
}

/// All top-level balanced brace groups in order of appearance. An
/// unterminated group ends the scan.
fn balanced_objects(text: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut idx = 0;

    while let Some(offset) = text[idx..].find('{') {
        let start = idx + offset;
        match balanced_end(text, start) {
            Some(end) => {
                found.push(&text[start..=end]);
                idx = end + 1;
            }
            None => break,
        }
    }

    found
}

/// Byte index of the `}` closing the brace opened at `start`, honoring
/// string literals and escapes.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_object_from_prose() {
        let text = "Sure, here is my decision: {\"needs_tools\": true, \"reasoning\": \"new query\"} hope that helps";
        let value = parse_object_from_text(text).expect("extracts");
        assert_eq!(value["needs_tools"], json!(true));
    }

    #[test]
    fn handles_nested_braces() {
        let text = "{\"tools\": [{\"tool_name\": \"search_elog\", \"arguments\": {\"query\": \"beam dump\"}}]}";
        let value = parse_object_with_key(text, "tools").expect("extracts");
        assert_eq!(value["tools"][0]["arguments"]["query"], json!("beam dump"));
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scan() {
        let text = r#"{"reasoning": "use {braces} literally \" quoted", "adequate": false}"#;
        let value = parse_object_with_key(text, "adequate").expect("extracts");
        assert_eq!(value["adequate"], json!(false));
    }

    #[test]
    fn skips_objects_without_the_wanted_key() {
        let text = r#"First {"reasoning": "thinking"} then {"tools": []} done"#;
        let value = parse_object_with_key(text, "tools").expect("extracts");
        assert!(value["tools"].as_array().unwrap().is_empty());
    }

    #[test]
    fn code_fences_are_transparent_to_the_scan() {
        let text = "```json\n{\"adequate\": true, \"reasoning\": \"ok\", \"refinement\": \"\"}\n```";
        let value = parse_object_with_key(text, "adequate").expect("extracts");
        assert_eq!(value["adequate"], json!(true));
    }

    #[test]
    fn unbalanced_text_yields_none() {
        assert!(parse_object_from_text("{\"needs_tools\": tru").is_none());
        assert!(parse_object_from_text("no json at all").is_none());
    }

    #[test]
    fn whole_text_fallback_handles_non_object_json() {
        // No brace group to scan, but the trimmed text parses as JSON.
        let value = parse_object_from_text("  [1, 2, 3]  ").expect("parses");
        assert!(value.is_array());
    }
}
