//! Shared text helpers: string-aware JSON scanning and output truncation.

/// Tracks whether the scanner is inside a JSON string literal.
#[derive(Default)]
struct StringState {
    in_string: bool,
    escape: bool,
}

impl StringState {
    /// Feed one character. Returns true when the character belongs to a string
    /// literal (including its closing quote) and must not be treated as structure.
    fn feed(&mut self, ch: char) -> bool {
        if !self.in_string {
            if ch == '"' {
                self.in_string = true;
                return true;
            }
            return false;
        }
        if self.escape {
            self.escape = false;
        } else if ch == '\\' {
            self.escape = true;
        } else if ch == '"' {
            self.in_string = false;
        }
        true
    }
}

fn closer(open: char) -> char {
    if open == '{' { '}' } else { ']' }
}

/// Every top-level JSON object in `text` that is structurally complete, in order.
///
/// Unbalanced closers reset the scan, so garbage between objects is skipped.
pub fn complete_objects(text: &str) -> Vec<&str> {
    let mut objects = Vec::new();
    let mut stack: Vec<char> = Vec::new();
    let mut start: Option<usize> = None;
    let mut strings = StringState::default();

    for (i, ch) in text.char_indices() {
        if !stack.is_empty() && strings.feed(ch) {
            continue;
        }
        match ch {
            '{' | '[' => {
                if stack.is_empty() {
                    start = (ch == '{').then_some(i);
                }
                stack.push(ch);
            }
            '}' | ']' => match stack.last() {
                Some(&open) if closer(open) == ch => {
                    stack.pop();
                    if stack.is_empty()
                        && let Some(s) = start.take()
                    {
                        objects.push(&text[s..=i]);
                    }
                }
                _ => {
                    stack.clear();
                    start = None;
                }
            },
            _ => {}
        }
    }

    objects
}

/// Candidate completions for a JSON document cut off mid-structure, most complete first.
///
/// Each candidate is a prefix of `text` ending right after a complete value,
/// with trailing separators removed and the still-open containers closed.
/// A bare scalar (number or literal) only counts once a separator, whitespace
/// or closer follows it, so a number cut at the end of the input is dropped
/// rather than shortened. At most `limit` candidates are produced.
pub fn truncation_candidates(text: &str, limit: usize) -> Vec<String> {
    let Some(first) = text.find('{') else {
        return Vec::new();
    };
    let body = &text[first..];

    let mut cut_points: Vec<(usize, String)> = Vec::new();
    let mut stack: Vec<char> = Vec::new();
    let mut strings = StringState::default();
    let mut in_scalar = false;

    for (i, ch) in body.char_indices() {
        let end = i + ch.len_utf8();
        if strings.feed(ch) {
            if !strings.in_string && !stack.is_empty() {
                cut_points.push((end, closers(&stack)));
            }
            continue;
        }
        let scalar_ended = in_scalar;
        in_scalar = false;
        match ch {
            '{' | '[' => stack.push(ch),
            '}' | ']' => {
                if stack.last().map(|&o| closer(o)) != Some(ch) {
                    break;
                }
                stack.pop();
                if stack.is_empty() {
                    // A complete document needs no closing; nothing to repair past here.
                    break;
                }
                cut_points.push((end, closers(&stack)));
            }
            ',' if !stack.is_empty() => cut_points.push((i, closers(&stack))),
            c if c.is_whitespace() && scalar_ended && !stack.is_empty() => {
                cut_points.push((i, closers(&stack)));
            }
            c if c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.') => in_scalar = true,
            _ => {}
        }
    }

    cut_points
        .into_iter()
        .rev()
        .take(limit)
        .map(|(end, closing)| {
            let prefix = body[..end].trim_end().trim_end_matches(',');
            format!("{}{}", prefix, closing)
        })
        .collect()
}

fn closers(stack: &[char]) -> String {
    stack.iter().rev().map(|&open| closer(open)).collect()
}

/// Truncate `text` to at most `max_bytes`, on a char boundary, noting how much was dropped.
pub fn truncate_output(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n... [truncated {} bytes]",
        &text[..cut],
        text.len() - cut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_objects_single() {
        let text = r#"{"key": "value"}"#;
        assert_eq!(complete_objects(text), vec![text]);
    }

    #[test]
    fn test_complete_objects_duplicated_content() {
        let text = r#"{"a": 1}{"a": 2}"#;
        assert_eq!(complete_objects(text), vec![r#"{"a": 1}"#, r#"{"a": 2}"#]);
    }

    #[test]
    fn test_complete_objects_ignores_trailing_partial() {
        let text = r#"{"a": 1}
{"a": 2, "b": [1, 2"#;
        assert_eq!(complete_objects(text), vec![r#"{"a": 1}"#]);
    }

    #[test]
    fn test_complete_objects_braces_inside_strings() {
        let text = r#"{"msg": "a } b { c", "n": {"x": "\"}"}}"#;
        assert_eq!(complete_objects(text), vec![text]);
    }

    #[test]
    fn test_complete_objects_no_json() {
        assert!(complete_objects("No JSON here").is_empty());
    }

    #[test]
    fn test_truncation_candidates_closes_structure() {
        let text = r#"{"id": "x", "phases": [{"n": 1}, {"n": 2, "m"#;
        let candidates = truncation_candidates(text, 100);
        let first_valid = candidates
            .iter()
            .find(|c| serde_json::from_str::<serde_json::Value>(c).is_ok())
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(first_valid).unwrap();
        assert_eq!(value["id"], "x");
        assert_eq!(value["phases"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_truncation_candidates_drops_dangling_key() {
        let text = r#"{"a": 1, "b"#;
        let candidates = truncation_candidates(text, 100);
        assert!(candidates.iter().any(|c| c == r#"{"a": 1}"#));
    }

    #[test]
    fn test_truncation_candidates_never_shorten_a_number() {
        let text = r#"{"a": 1, "n": 12345"#;
        let candidates = truncation_candidates(text, 100);
        assert!(candidates.iter().all(|c| !c.contains("\"n\": 1")));
        let first_valid = candidates
            .iter()
            .find(|c| serde_json::from_str::<serde_json::Value>(c).is_ok())
            .unwrap();
        assert_eq!(first_valid, r#"{"a": 1}"#);
    }

    #[test]
    fn test_truncation_candidates_respects_limit() {
        let text = r#"{"a": [1, 2, 3, 4, 5, 6"#;
        assert_eq!(truncation_candidates(text, 2).len(), 2);
    }

    #[test]
    fn test_truncate_output_short_text_unchanged() {
        assert_eq!(truncate_output("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_output_long_text() {
        let out = truncate_output(&"x".repeat(100), 10);
        assert!(out.starts_with("xxxxxxxxxx\n"));
        assert!(out.contains("truncated 90 bytes"));
    }

    #[test]
    fn test_truncate_output_char_boundary() {
        let out = truncate_output("ééééé", 3);
        assert!(out.starts_with('é'));
        assert!(out.contains("truncated"));
    }
}
