//! Text shaping helpers for model output and messenger limits.

use std::sync::OnceLock;

use regex::Regex;

/// Remove a surrounding Markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let re = FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n?(.*?)\n?\s*```\s*$").expect("valid regex")
    });

    match re.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => text.trim(),
    }
}

/// Split `text` into chunks of at most `limit` characters.
///
/// Breaks on the last newline inside the window when there is one, otherwise
/// on the last space, otherwise hard at the limit.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text.trim_end();

    while rest.chars().count() > limit {
        let window_end = rest
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..window_end];

        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(window_end);

        chunks.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start_matches(['\n', ' ']);
    }

    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// Render rows as a compact pipe-delimited Markdown table.
pub fn markdown_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    out.push_str("| ");
    out.push_str(&headers.join(" | "));
    out.push_str(" |\n|");
    for _ in headers {
        out.push_str("---|");
    }
    for row in rows {
        out.push_str("\n| ");
        out.push_str(&row.join(" | "));
        out.push_str(" |");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n{\"messages\": []}\n```";
        assert_eq!(strip_code_fences(raw), "{\"messages\": []}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[1]\n```\n"), "[1]");
    }

    #[test]
    fn split_prefers_newlines() {
        let text = format!("{}\n{}", "a".repeat(8), "b".repeat(8));
        let parts = split_message(&text, 10);
        assert_eq!(parts, vec!["a".repeat(8), "b".repeat(8)]);
    }

    #[test]
    fn split_hard_cuts_long_words() {
        let parts = split_message(&"x".repeat(25), 10);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.chars().count() <= 10));
        assert_eq!(parts.concat(), "x".repeat(25));
    }

    #[test]
    fn split_is_char_safe() {
        let parts = split_message("ção ção ção", 4);
        assert_eq!(parts, vec!["ção", "ção", "ção"]);
    }

    #[test]
    fn short_text_is_single_chunk() {
        assert_eq!(split_message("oi", 4096), vec!["oi"]);
        assert!(split_message("", 4096).is_empty());
    }

    #[test]
    fn renders_table() {
        let t = markdown_table(&["fase", "kWh"], &[vec!["fase1".into(), "1.50".into()]]);
        assert_eq!(t, "| fase | kWh |\n|---|---|\n| fase1 | 1.50 |");
    }
}
