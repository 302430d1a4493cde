use serde_json::Value;
use tracing::debug;

/// Recover one well-formed JSON object from arbitrary model text.
///
/// Model responses arrive as plain JSON, JSON wrapped in markdown fences,
/// JSON buried in prose, or JSON carrying stray unescaped backslashes.
/// Attempts, in order: the whole trimmed text, every fenced code block,
/// then a string/escape-aware balanced-brace scan from every `{`. The
/// first candidate that parses wins. Returns `None` when nothing parses;
/// never panics for any input.
pub fn recover_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(value) = try_parse(trimmed) {
        return Some(value);
    }

    for block in fenced_blocks(trimmed) {
        if let Some(value) = try_parse(block.trim()) {
            debug!(target = "snaplist.extract", "recovered object from fenced block");
            return Some(value);
        }
    }

    for candidate in brace_candidates(trimmed) {
        if let Some(value) = try_parse(candidate) {
            debug!(target = "snaplist.extract", "recovered object from brace scan");
            return Some(value);
        }
    }

    None
}

fn try_parse(candidate: &str) -> Option<Value> {
    let repaired = repair_escapes(candidate);
    serde_json::from_str::<Value>(&repaired)
        .ok()
        .filter(Value::is_object)
}

/// Double any backslash that does not start a valid JSON escape sequence,
/// so a literal stray backslash survives parsing as a literal backslash.
/// Already-valid sequences are left untouched.
fn repair_escapes(input: &str) -> String {
    const ESCAPABLE: &[char] = &['"', '\\', '/', 'b', 'f', 'n', 'r', 't', 'u'];
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.peek() {
            Some(next) if ESCAPABLE.contains(next) => {
                out.push('\\');
                out.push(*next);
                chars.next();
            }
            _ => out.push_str("\\\\"),
        }
    }
    out
}

/// Contents of every triple-backtick fenced block, with an optional
/// language tag line stripped.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        let Some(end) = after.find("```") else {
            break;
        };
        let mut body = &after[..end];
        if let Some(newline) = body.find('\n') {
            let tag = body[..newline].trim();
            if tag.chars().all(|c| c.is_ascii_alphanumeric()) {
                body = &body[newline + 1..];
            }
        }
        blocks.push(body);
        rest = &after[end + 3..];
    }
    blocks
}

/// Candidate substrings from every opening brace to its matching close,
/// tracked with string and escape awareness so braces inside quoted
/// values do not affect nesting depth.
fn brace_candidates(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut candidates = Vec::new();
    for (idx, &byte) in bytes.iter().enumerate() {
        if byte == b'{'
            && let Some(end) = matching_close(bytes, idx)
        {
            candidates.push(&text[idx..=end]);
        }
    }
    candidates
}

fn matching_close(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, &byte) in bytes.iter().enumerate().skip(open) {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx);
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
    fn parses_plain_object() {
        let value = recover_object(r#"{"key": "value"}"#).unwrap();
        assert_eq!(value, json!({"key": "value"}));
    }

    #[test]
    fn parses_object_with_surrounding_whitespace() {
        let value = recover_object("\n\n   {\"key\": 1}   \n").unwrap();
        assert_eq!(value, json!({"key": 1}));
    }

    #[test]
    fn strips_fence_and_prose() {
        let text = "Here you go:\n```json\n{\"x\":1}\n```\nThanks!";
        let value = recover_object(text).unwrap();
        assert_eq!(value, json!({"x": 1}));
    }

    #[test]
    fn fence_without_language_tag() {
        let text = "```\n{\"x\": 2}\n```";
        let value = recover_object(text).unwrap();
        assert_eq!(value, json!({"x": 2}));
    }

    #[test]
    fn embedded_in_prose_without_fence() {
        let text = "The result is {\"brand\": \"Nike\"} as requested.";
        let value = recover_object(text).unwrap();
        assert_eq!(value, json!({"brand": "Nike"}));
    }

    #[test]
    fn repairs_stray_backslash() {
        let text = r#"{"a": "Home \ Men"}"#;
        let value = recover_object(text).unwrap();
        assert_eq!(value["a"], json!("Home \\ Men"));
    }

    #[test]
    fn keeps_valid_escapes_untouched() {
        let text = r#"{"a": "line\nbreak", "b": "quote\"inside"}"#;
        let value = recover_object(text).unwrap();
        assert_eq!(value["a"], json!("line\nbreak"));
        assert_eq!(value["b"], json!("quote\"inside"));
    }

    #[test]
    fn invalid_escape_becomes_literal_backslash() {
        let text = r#"{"path": "C:\win"}"#;
        let value = recover_object(text).unwrap();
        assert_eq!(value["path"], json!("C:\\win"));
    }

    #[test]
    fn nested_braces_inside_string_values() {
        let text = r#"noise {"a": "curly {not a block}", "b": 2} tail"#;
        let value = recover_object(text).unwrap();
        assert_eq!(value["b"], json!(2));
    }

    #[test]
    fn escaped_quote_does_not_end_string() {
        let text = r#"prefix {"a": "she said \"hi\" {x}", "n": 1} suffix"#;
        let value = recover_object(text).unwrap();
        assert_eq!(value["n"], json!(1));
    }

    #[test]
    fn first_parsing_group_wins() {
        let text = r#"{"first": 1} and later {"second": 2}"#;
        let value = recover_object(text).unwrap();
        assert_eq!(value, json!({"first": 1}));
    }

    #[test]
    fn skips_malformed_group_and_takes_next() {
        let text = r#"{"broken": } then {"ok": true}"#;
        let value = recover_object(text).unwrap();
        assert_eq!(value, json!({"ok": true}));
    }

    #[test]
    fn nested_object_returns_outermost() {
        let text = r#"see {"outer": {"inner": 3}} done"#;
        let value = recover_object(text).unwrap();
        assert_eq!(value, json!({"outer": {"inner": 3}}));
    }

    #[test]
    fn rejects_bare_arrays() {
        assert!(recover_object("[1, 2, 3]").is_none());
    }

    #[test]
    fn not_found_for_empty_input() {
        assert!(recover_object("").is_none());
        assert!(recover_object("   \n\t ").is_none());
    }

    #[test]
    fn not_found_for_pure_prose() {
        assert!(recover_object("No structured data here, sorry.").is_none());
    }

    #[test]
    fn survives_deeply_unbalanced_braces() {
        let open = "{".repeat(2000);
        assert!(recover_object(&open).is_none());
        let close = "}".repeat(2000);
        assert!(recover_object(&close).is_none());
        let mixed = format!("{}{}", "{".repeat(500), "{\"ok\":1}");
        assert_eq!(recover_object(&mixed).unwrap(), json!({"ok": 1}));
    }

    #[test]
    fn survives_unterminated_fence() {
        let text = "```json\n{\"x\": 1}";
        let value = recover_object(text).unwrap();
        assert_eq!(value, json!({"x": 1}));
    }

    #[test]
    fn survives_large_input() {
        let mut text = "lorem ipsum ".repeat(20_000);
        text.push_str("{\"needle\": 42}");
        let value = recover_object(&text).unwrap();
        assert_eq!(value["needle"], json!(42));
    }

    #[test]
    fn idempotent_for_any_input() {
        let samples = [
            r#"{"a": 1}"#,
            "prose only",
            "```json\n{\"b\": 2}\n```",
            r#"{"a": "Home \ Men"}"#,
            "{{{{",
            "",
        ];
        for sample in samples {
            assert_eq!(recover_object(sample), recover_object(sample));
        }
    }

    #[test]
    fn multiple_fenced_blocks_first_valid_wins() {
        let text = "```json\nnot json\n```\nmiddle\n```json\n{\"c\": 3}\n```";
        let value = recover_object(text).unwrap();
        assert_eq!(value, json!({"c": 3}));
    }
}
