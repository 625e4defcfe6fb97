use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Node};

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email pattern")
});

const IMAGE_EXTENSIONS: [&str; 6] = [".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg"];

/// Visible text of an HTML document, one space between text nodes.
/// Script, style and noscript bodies are skipped.
pub fn page_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut parts: Vec<&str> = Vec::new();

    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element())
            .map(|el| matches!(el.name(), "script" | "style" | "noscript"))
            .unwrap_or(false);
        if hidden {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed);
        }
    }

    parts.join(" ")
}

fn looks_like_asset(email: &str) -> bool {
    let lower = email.to_lowercase();
    let local = lower.split('@').next().unwrap_or_default();
    IMAGE_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(ext) || local.ends_with(ext))
}

/// Extract emails from text using regex. Unique, in order of first appearance,
/// with image-file lookalikes (`logo.png@...`, `...@2x.png`) dropped.
pub fn extract_emails(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    EMAIL_REGEX
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|email| !looks_like_asset(email))
        .filter(|email| seen.insert(email.to_string()))
        .map(str::to_string)
        .collect()
}

/// Parses a landing page and returns the emails found in its text.
pub fn emails_from_page(html: &str) -> Vec<String> {
    extract_emails(&page_text(html))
}
