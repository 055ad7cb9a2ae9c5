//! Markup parsing and visible-text helpers on top of `scraper`.

use crate::error::ParseError;
use scraper::{ElementRef, Html};
use std::collections::BTreeSet;

/// Content inside these never counts as page text.
const HIDDEN: &[&str] = &["script", "style", "noscript", "template", "footer", "nav"];

const BLOCKS: &[&str] = &[
    "body", "main", "header", "section", "article", "aside", "div", "p", "ul", "ol", "li", "dl",
    "dt", "dd", "table", "tr", "th", "td", "h1", "h2", "h3", "h4", "h5", "h6", "pre",
    "blockquote",
];

/// Turn fetched bytes into a queryable document.
pub fn parse_document(raw: &[u8]) -> Result<Html, ParseError> {
    let text = std::str::from_utf8(raw).map_err(|e| ParseError::NotUtf8(e.valid_up_to()))?;
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(Html::parse_document(text))
}

/// Collapse whitespace runs to single spaces.
pub fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lower-cased with all whitespace removed; used for phrase matching so
/// that markup-induced spacing in Japanese text does not break matches.
pub fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn contains_phrase(squashed_haystack: &str, phrase: &str) -> bool {
    let p = squash(phrase);
    !p.is_empty() && squashed_haystack.contains(&p)
}

fn is_hidden(el: ElementRef<'_>) -> bool {
    HIDDEN.contains(&el.value().name())
        || el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| HIDDEN.contains(&a.value().name()))
}

/// All visible text under `el`, whitespace-cleaned.
pub fn visible_text(el: ElementRef<'_>) -> String {
    if is_hidden(el) {
        return String::new();
    }
    let mut parts: Vec<&str> = Vec::new();
    for node in el.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| HIDDEN.contains(&a.value().name()));
        if !hidden {
            parts.push(&**text);
        }
    }
    clean_text(&parts.join(" "))
}

fn own_text(el: ElementRef<'_>) -> String {
    let parts: Vec<&str> = el
        .children()
        .filter_map(|c| c.value().as_text().map(|t| &**t))
        .collect();
    clean_text(&parts.join(" "))
}

/// One text fragment per innermost block element (its own text for blocks
/// that contain further blocks). Repeated fragments collapse.
pub fn text_fragments(root: ElementRef<'_>) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for el in root.descendants().filter_map(ElementRef::wrap) {
        if !BLOCKS.contains(&el.value().name()) || is_hidden(el) {
            continue;
        }
        let has_inner_block = el
            .descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .any(|d| BLOCKS.contains(&d.value().name()));
        let text = if has_inner_block {
            own_text(el)
        } else {
            visible_text(el)
        };
        if !text.is_empty() {
            out.insert(text);
        }
    }
    out
}

/// First `n` characters (not bytes).
pub fn prefix_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub fn to_ascii_digits(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
            '，' => ',',
            _ => c,
        })
        .collect()
}
