//! Best-effort title and body-text extraction from HTML.
//!
//! Extraction never fails: missing structure degrades through a chain of
//! fallbacks down to the whole document's text.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use articlepipe_shared::truncate_chars;

/// Title used when no title selector matches.
pub const FALLBACK_TITLE: &str = "Untitled";

/// Cap for the whole-document fallback text.
const WHOLE_TEXT_CHARS: usize = 5_000;

/// Subtrees whose text never counts as content.
const NOISE_TAGS: &[&str] = &["script", "style", "nav", "header", "footer", "aside"];

const TITLE_SELECTORS: &[&str] = &[
    "h1.article-title",
    "h1.entry-title",
    "h1.post-title",
    "h1",
    "title",
    ".article-header h1",
];

const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    ".article-content",
    ".post-content",
    ".entry-content",
    r#"[role="main"]"#,
];

/// Title and body text pulled out of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub title: String,
    pub content: String,
}

/// Turns raw HTML into an [`Extracted`] pair.
pub trait ContentExtractor: Send + Sync {
    /// Extract title and text. Must not panic on malformed input.
    fn extract(&self, html: &str) -> Extracted;

    /// Human-readable extractor name for tracing.
    fn name(&self) -> &str;
}

/// Selector-list extractor for article-like pages.
///
/// Title: first matching selector among `h1.article-title` … `title`.
/// Content: first matching container (`article`, `main`, …), else the longest
/// paragraph, else the whole document text.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorExtractor;

impl ContentExtractor for SelectorExtractor {
    fn extract(&self, html: &str) -> Extracted {
        let doc = Html::parse_document(html);
        Extracted {
            title: extract_title(&doc),
            content: extract_content(&doc),
        }
    }

    fn name(&self) -> &str {
        "selector"
    }
}

fn parse_all(selectors: &[&str]) -> Vec<Selector> {
    selectors
        .iter()
        .map(|s| Selector::parse(s).expect("valid selector"))
        .collect()
}

fn extract_title(doc: &Html) -> String {
    static TITLE_SEL: LazyLock<Vec<Selector>> = LazyLock::new(|| parse_all(TITLE_SELECTORS));

    for sel in TITLE_SEL.iter() {
        if let Some(el) = doc.select(sel).next() {
            let title = collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "));
            if !title.is_empty() {
                return title;
            }
        }
    }
    FALLBACK_TITLE.to_string()
}

fn extract_content(doc: &Html) -> String {
    static CONTENT_SEL: LazyLock<Vec<Selector>> =
        LazyLock::new(|| parse_all(CONTENT_SELECTORS));
    static P_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("p").expect("valid selector"));

    for sel in CONTENT_SEL.iter() {
        if let Some(el) = doc.select(sel).find(|el| !inside_noise(el)) {
            return visible_lines(el).join("\n");
        }
    }

    // No container: the longest paragraph is usually the article body.
    let longest = doc
        .select(&P_SEL)
        .filter(|p| !inside_noise(p))
        .map(|p| visible_lines(p).join(" "))
        .max_by_key(|text| text.chars().count());
    if let Some(text) = longest {
        return text;
    }

    let whole = visible_lines(doc.root_element()).join("\n");
    truncate_chars(&whole, WHOLE_TEXT_CHARS)
}

/// Whitespace-collapsed text nodes under `el`, skipping noise subtrees.
fn visible_lines(el: ElementRef<'_>) -> Vec<String> {
    let mut lines = Vec::new();
    collect_text(el, &mut lines);
    lines
}

fn collect_text(el: ElementRef<'_>, out: &mut Vec<String>) {
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            if !is_noise(&child_el) {
                collect_text(child_el, out);
            }
        } else if let Some(text) = child.value().as_text() {
            let line = collapse_whitespace(text);
            if !line.is_empty() {
                out.push(line);
            }
        }
    }
}

fn is_noise(el: &ElementRef<'_>) -> bool {
    NOISE_TAGS.contains(&el.value().name())
}

fn inside_noise(el: &ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| is_noise(&a))
}

fn collapse_whitespace(text: &str) -> String {
    static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
    WS_RE.replace_all(text.trim(), " ").into_owned()
}
