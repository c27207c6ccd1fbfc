//! Step text normalization
//!
//! Two forms are produced from raw step text:
//! - [`normalize_step_text`]: lowercased, articles stripped, whitespace collapsed and
//!   quoted literals replaced by `{}`. Used for fuzzy comparison and telemetry.
//! - [`canonical_text`]: the same, but quoted literals are kept verbatim. Used where
//!   the literal matters (learned mappings, AI cache keys).

use std::sync::OnceLock;

use regex::Regex;

/// Placeholder substituted for quoted literals
pub const LITERAL_PLACEHOLDER: &str = "{}";

const ARTICLES: [&str; 3] = ["a", "an", "the"];

fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""([^"]*)"|'([^']*)'|`([^`]*)`|“([^”]*)”"#).expect("static regex")
    })
}

fn bullet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+").expect("static regex"))
}

/// Strip list markers, surrounding whitespace and a trailing period
pub fn clean_step_text(text: &str) -> String {
    let text = bullet_re().replace(text, "");
    let text = text.trim();
    let text = text.strip_suffix('.').unwrap_or(text);
    text.trim().to_string()
}

/// Quoted literals in order of appearance
pub fn extract_literals(text: &str) -> Vec<String> {
    quoted_re()
        .captures_iter(text)
        .filter_map(|c| {
            c.get(1)
                .or_else(|| c.get(2))
                .or_else(|| c.get(3))
                .or_else(|| c.get(4))
                .map(|m| m.as_str().to_string())
        })
        .collect()
}

fn collapse(text: &str) -> String {
    text.split_whitespace()
        .filter(|word| !ARTICLES.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Comparison form with literals replaced by [`LITERAL_PLACEHOLDER`]
pub fn normalize_step_text(text: &str) -> String {
    let cleaned = clean_step_text(text).replace("**", "");
    let replaced = quoted_re().replace_all(&cleaned, format!(" {LITERAL_PLACEHOLDER} "));
    let lowered = replaced
        .to_lowercase()
        .replace(|c: char| matches!(c, ',' | ';' | '!' | '?'), " ");
    collapse(&lowered)
}

/// Comparison form that keeps quoted literals
pub fn canonical_text(text: &str) -> String {
    let cleaned = clean_step_text(text).replace("**", "");
    let mut out = String::with_capacity(cleaned.len());
    let mut last = 0;
    for m in quoted_re().find_iter(&cleaned) {
        out.push_str(&cleaned[last..m.start()].to_lowercase());
        out.push(' ');
        out.push_str(m.as_str());
        out.push(' ');
        last = m.end();
    }
    out.push_str(&cleaned[last..].to_lowercase());
    collapse(&out)
}

/// Edit distance between two strings, counted in chars
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let a_len = a_chars.len();
    let b_len = b_chars.len();

    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0usize; b_len + 1];

    for i in 1..=a_len {
        curr[0] = i;
        for j in 1..=b_len {
            let cost = usize::from(a_chars[i - 1] != b_chars[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

/// Similarity in `[0, 1]`, 1 meaning identical
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(a, b) as f64 / max_len as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("abc", "abc"), 0);
        assert_eq!(levenshtein_distance("abc", "abd"), 1);
        assert_eq!(levenshtein_distance("click", "clik"), 1);
        assert_eq!(levenshtein_distance("", "abc"), 3);
    }

    #[test]
    fn test_normalize_replaces_literals_and_articles() {
        assert_eq!(
            normalize_step_text("- Click the \"Save Draft\" button."),
            "click {} button"
        );
        assert_eq!(
            normalize_step_text("Fill   the 'Email' field with  'a@b.c'"),
            "fill {} field with {}"
        );
    }

    #[test]
    fn test_normalize_strips_bold_markup() {
        assert_eq!(
            normalize_step_text("**Action**: Click 'Go'"),
            "action: click {}"
        );
    }

    #[test]
    fn test_canonical_keeps_literals() {
        assert_eq!(
            canonical_text("Click the 'Save' Button"),
            "click 'Save' button"
        );
    }

    #[test]
    fn test_extract_literals_in_order() {
        assert_eq!(
            extract_literals(r#"Enter "bob" into the 'User name' field"#),
            vec!["bob".to_string(), "User name".to_string()]
        );
    }

    #[test]
    fn test_clean_step_text() {
        assert_eq!(clean_step_text("  1. Open the page."), "Open the page");
        assert_eq!(clean_step_text("* Click Save"), "Click Save");
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("same", "same"), 1.0);
        assert!(similarity("click {} button", "clik {} button") > 0.9);
        assert!(similarity("drag item to dropzone", "navigate to {}") < 0.6);
    }
}
