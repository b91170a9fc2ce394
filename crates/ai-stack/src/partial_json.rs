//! Best-effort parsing of incomplete JSON.
//!
//! Tool-call arguments stream in as fragments, so consumers rendering a
//! call in progress need *some* value before the buffer is complete.
//! [`parse_partial_json`] closes open strings, objects, and arrays, and
//! drops a trailing member that cannot be completed. The raw buffer stays
//! the source of truth; this is only a preview.

use serde_json::Value;

/// Parses `input`, repairing truncation where possible.
///
/// Returns `None` for empty input or when nothing parseable remains.
///
/// ```rust
/// use ai_stack::partial_json::parse_partial_json;
/// use serde_json::json;
///
/// assert_eq!(parse_partial_json(r#"{"city":"Par"#), Some(json!({"city": "Par"})));
/// assert_eq!(parse_partial_json(r#"{"a":1,"b"#), Some(json!({"a": 1})));
/// ```
pub fn parse_partial_json(input: &str) -> Option<Value> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let mut candidate = trimmed.to_owned();
    loop {
        let closed = close_json(&candidate)?;
        if let Ok(value) = serde_json::from_str(&closed) {
            return Some(value);
        }
        let cut = last_cut_point(&candidate)?;
        candidate.truncate(cut);
        if candidate.trim().is_empty() {
            return None;
        }
    }
}

/// Appends whatever closers `s` is missing. `None` if `s` contains a
/// closer that does not match its opener; truncating further cannot
/// repair that.
fn close_json(s: &str) -> Option<String> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in s.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
            }
            _ => {}
        }
    }

    let mut out = s.to_owned();
    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    out.extend(stack.iter().rev());
    Some(out)
}

/// Byte offset to truncate at so the last member is dropped: just before
/// the last top-level-or-nested comma, or just after the last opener.
fn last_cut_point(s: &str) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    let mut cut = None;

    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            ',' => cut = Some(i),
            '{' | '[' if i + 1 < s.len() => cut = Some(i + 1),
            _ => {}
        }
    }
    cut.filter(|&i| i < s.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_complete_json_passes_through() {
        assert_eq!(
            parse_partial_json(r#"{"location":"Paris"}"#),
            Some(json!({"location": "Paris"}))
        );
        assert_eq!(parse_partial_json("42"), Some(json!(42)));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(parse_partial_json(""), None);
        assert_eq!(parse_partial_json("   "), None);
    }

    #[test]
    fn test_open_object_and_string() {
        assert_eq!(parse_partial_json("{"), Some(json!({})));
        assert_eq!(parse_partial_json(r#"{"lo"#), Some(json!({})));
        assert_eq!(
            parse_partial_json(r#"{"location":"Pa"#),
            Some(json!({"location": "Pa"}))
        );
    }

    #[test]
    fn test_dangling_key_and_comma() {
        assert_eq!(parse_partial_json(r#"{"a":1,"#), Some(json!({"a": 1})));
        assert_eq!(parse_partial_json(r#"{"a":1,"b":"#), Some(json!({"a": 1})));
        assert_eq!(parse_partial_json(r#"{"a":"#), Some(json!({})));
    }

    #[test]
    fn test_nested_structures() {
        assert_eq!(
            parse_partial_json(r#"{"items":[1,2,{"x":"y"#),
            Some(json!({"items": [1, 2, {"x": "y"}]}))
        );
        assert_eq!(parse_partial_json("[1, 2"), Some(json!([1, 2])));
    }

    #[test]
    fn test_dangling_escape_in_string() {
        assert_eq!(
            parse_partial_json(r#"{"path":"C:\"#),
            Some(json!({"path": "C:"}))
        );
        assert_eq!(
            parse_partial_json(r#"{"q":"say \"hi"#),
            Some(json!({"q": "say \"hi"}))
        );
    }

    #[test]
    fn test_partial_literal_drops_member() {
        assert_eq!(parse_partial_json(r#"{"ok":true,"done":fa"#), Some(json!({"ok": true})));
    }

    #[test]
    fn test_mismatched_closer_is_none() {
        assert_eq!(parse_partial_json("{]"), None);
    }

    #[test]
    fn test_garbage_is_none() {
        assert_eq!(parse_partial_json("not json"), None);
    }
}
