//! Lenient parsing of remote matcher output
//!
//! The matcher is asked for a JSON array of strings but does not always
//! produce one. Parsing tries, in order: the whole body as a string array,
//! the whole body as any JSON array (keeping string elements), the outermost
//! `[...]` slice, and finally a line-by-line heuristic.

use serde_json::Value;

/// Lines shorter than this are not taken as snippets by the line heuristic
const MIN_LINE_SNIPPET_CHARS: usize = 20;

/// Strip markdown code fences from a model response
///
/// Handles both ```json and plain ``` fences.
pub fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();

    if trimmed.starts_with("```") && trimmed.ends_with("```") && trimmed.len() >= 6 {
        let without_start = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .unwrap_or(trimmed);

        let without_end = without_start.strip_suffix("```").unwrap_or(without_start);

        without_end.trim()
    } else {
        trimmed
    }
}

pub fn parse_snippets(raw: &str) -> Vec<String> {
    let body = strip_markdown_fences(raw);
    if body.is_empty() {
        return Vec::new();
    }

    if let Some(snippets) = parse_json_array(body) {
        return snippets;
    }

    if let (Some(open), Some(close)) = (body.find('['), body.rfind(']')) {
        if open < close {
            if let Some(snippets) = parse_json_array(&body[open..=close]) {
                log::debug!("Parsed snippets from embedded JSON array");
                return snippets;
            }
        }
    }

    log::debug!("Remote response is not JSON, falling back to line parsing");
    parse_lines(body)
}

fn parse_json_array(text: &str) -> Option<Vec<String>> {
    if let Ok(list) = serde_json::from_str::<Vec<String>>(text) {
        return Some(clean(list));
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => Some(clean(
            items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
        )),
        _ => None,
    }
}

fn clean(snippets: Vec<String>) -> Vec<String> {
    snippets
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_lines(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !starts_with_bullet(line))
        .map(|line| {
            line.trim_end_matches(',')
                .trim()
                .trim_matches(|c| c == '"' || c == '\'')
                .trim()
        })
        .filter(|line| line.chars().count() > MIN_LINE_SNIPPET_CHARS)
        .map(str::to_string)
        .collect()
}

/// `-`, `*`, `•`, `·`, `+`, or a number followed by `.` or `)`
fn starts_with_bullet(line: &str) -> bool {
    let Some(first) = line.chars().next() else {
        return false;
    };
    if matches!(first, '-' | '*' | '•' | '·' | '+') {
        return true;
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && matches!(line[digits..].chars().next(), Some('.' | ')'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_markdown_fences() {
        assert_eq!(strip_markdown_fences("```json\n[\"a\"]\n```"), "[\"a\"]");
        assert_eq!(strip_markdown_fences("```\n[]\n```"), "[]");
        assert_eq!(strip_markdown_fences("  [] "), "[]");
    }

    #[test]
    fn test_parse_json_array() {
        let snippets = parse_snippets(r#"["Revenue grew 12%", "  costs fell  ", ""]"#);
        assert_eq!(snippets, vec!["Revenue grew 12%", "costs fell"]);
    }

    #[test]
    fn test_parse_mixed_array_keeps_strings() {
        let snippets = parse_snippets(r#"["first", 2, {"x": 1}, "second"]"#);
        assert_eq!(snippets, vec!["first", "second"]);
    }

    #[test]
    fn test_parse_fenced_array() {
        let snippets = parse_snippets("```json\n[\"a snippet\"]\n```");
        assert_eq!(snippets, vec!["a snippet"]);
    }

    #[test]
    fn test_parse_embedded_array() {
        let snippets = parse_snippets("Here are the matches: [\"one match\", \"two match\"] hope that helps");
        assert_eq!(snippets, vec!["one match", "two match"]);
    }

    #[test]
    fn test_line_fallback() {
        let raw = "Matches found:\n\
                   \"The board approved the merger in May\",\n\
                   - a bulleted line that is long enough\n\
                   1. numbered line that is long enough too\n\
                   short line\n\
                   Quarterly revenue exceeded expectations";
        let snippets = parse_snippets(raw);
        assert_eq!(
            snippets,
            vec![
                "The board approved the merger in May",
                "Quarterly revenue exceeded expectations"
            ]
        );
    }

    #[test]
    fn test_empty_response() {
        assert!(parse_snippets("").is_empty());
        assert!(parse_snippets("[]").is_empty());
    }
}
