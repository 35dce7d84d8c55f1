use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::error::{Result, SearchError};

pub const DEFAULT_MAX_CHARS: usize = 10_000;
/// Below this many characters of priority text the secondary blocks are added.
pub const MIN_PRIORITY_CHARS: usize = 500;
pub const MARK_OPEN: &str = "<mark>";
pub const MARK_CLOSE: &str = "</mark>";

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector must parse")
}

static STRIPPED: Lazy<Selector> = Lazy::new(|| selector("script, style, nav, header, footer"));
static PRIORITY_BLOCKS: Lazy<Selector> = Lazy::new(|| selector("h1, h2, h3, p"));
static SECONDARY_BLOCKS: Lazy<Selector> =
    Lazy::new(|| selector("h4, h5, h6, li, td, th, blockquote, pre, code"));

static CONTENT_ROOTS: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["main", "article", ".content", "#content", "body"]
        .into_iter()
        .map(selector)
        .collect()
});

static DATE_SOURCES: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        r#"meta[name="article:published_time"]"#,
        r#"meta[property="article:published_time"]"#,
        r#"meta[name="publication-date"]"#,
        r#"meta[name="date"]"#,
        "time[datetime]",
        "time[pubdate]",
    ]
    .into_iter()
    .map(selector)
    .collect()
});

static META_DESCRIPTION: Lazy<Selector> = Lazy::new(|| selector(r#"meta[name="description"]"#));
static META_KEYWORDS: Lazy<Selector> = Lazy::new(|| selector(r#"meta[name="keywords"]"#));
static OG_TITLE: Lazy<Selector> = Lazy::new(|| selector(r#"meta[property="og:title"]"#));
static OG_DESCRIPTION: Lazy<Selector> =
    Lazy::new(|| selector(r#"meta[property="og:description"]"#));

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPage {
    /// Metadata and body text, truncated and highlighted.
    pub content: String,
    pub published_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMetadata {
    pub description: String,
    pub keywords: String,
    pub og_title: String,
    pub og_description: String,
}

impl PageMetadata {
    pub fn from_document(document: &Html) -> PageMetadata {
        PageMetadata {
            description: meta_content(document, &META_DESCRIPTION),
            keywords: meta_content(document, &META_KEYWORDS),
            og_title: meta_content(document, &OG_TITLE),
            og_description: meta_content(document, &OG_DESCRIPTION),
        }
    }
}

fn meta_content(document: &Html, selector: &Selector) -> String {
    document
        .select(selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Extract the scored content of a page. `title` is the result title reported
/// by the search engine.
pub fn extract(html: &str, title: &str, query: &str, max_chars: usize) -> Result<ExtractedPage> {
    let mut document = Html::parse_document(html);
    strip_non_content(&mut document);

    let root = main_content_root(&document)
        .ok_or_else(|| SearchError::Parse("page has no content root".into()))?;

    let mut body = collect_text(root, &PRIORITY_BLOCKS);
    if body.chars().count() < MIN_PRIORITY_CHARS {
        let secondary = collect_text(root, &SECONDARY_BLOCKS);
        if !secondary.is_empty() {
            if !body.is_empty() {
                body.push_str("\n\n");
            }
            body.push_str(&secondary);
        }
    }

    let metadata = PageMetadata::from_document(&document);
    let paragraphs: Vec<&str> = [
        title.trim(),
        metadata.og_title.as_str(),
        metadata.description.as_str(),
        metadata.og_description.as_str(),
        metadata.keywords.as_str(),
        body.as_str(),
    ]
    .into_iter()
    .filter(|p| !p.is_empty())
    .collect();
    let text = paragraphs.join("\n\n");
    let text = truncate_chars(&text, max_chars);

    Ok(ExtractedPage {
        content: highlight_query_terms(text, query),
        published_date: extract_publication_date(&document),
    })
}

/// Detach every script, style, nav, header and footer subtree.
pub fn strip_non_content(document: &mut Html) {
    let ids: Vec<_> = document.select(&STRIPPED).map(|el| el.id()).collect();
    for id in ids {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }
}

pub fn main_content_root(document: &Html) -> Option<ElementRef<'_>> {
    CONTENT_ROOTS
        .iter()
        .find_map(|selector| document.select(selector).next())
}

fn collect_text(root: ElementRef<'_>, selector: &Selector) -> String {
    root.select(selector)
        .map(|el| el.text().collect::<String>())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .collect::<Vec<String>>()
        .join("\n\n")
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Lowercased query words longer than two characters, deduplicated in order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in query.to_lowercase().split_whitespace() {
        if word.chars().count() > 2 && !terms.iter().any(|t| t == word) {
            terms.push(word.to_string());
        }
    }
    terms
}

/// Wrap whole-word, case-insensitive occurrences of the query terms in
/// `<mark>`. All terms are matched in one pass so markers never nest.
pub fn highlight_query_terms(text: &str, query: &str) -> String {
    let mut terms = query_terms(query);
    if terms.is_empty() {
        return text.to_string();
    }
    // leftmost-first alternation: prefer the longest term at a position
    terms.sort_by_key(|t| std::cmp::Reverse(t.len()));
    let alternation = terms
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<String>>()
        .join("|");

    match Regex::new(&format!(r"(?i)\b(?:{alternation})\b")) {
        Ok(re) => re
            .replace_all(text, format!("{MARK_OPEN}$0{MARK_CLOSE}").as_str())
            .into_owned(),
        Err(e) => {
            tracing::warn!(error = %e, "could not build highlight pattern");
            text.to_string()
        }
    }
}

/// First parseable date from the prioritised date-bearing tags.
pub fn extract_publication_date(document: &Html) -> Option<DateTime<Utc>> {
    DATE_SOURCES.iter().find_map(|selector| {
        let element = document.select(selector).next()?;
        let attrs = element.value();
        let raw = attrs
            .attr("content")
            .filter(|s| !s.trim().is_empty())
            .or_else(|| attrs.attr("datetime").filter(|s| !s.trim().is_empty()))
            .or_else(|| attrs.attr("pubdate").filter(|s| !s.trim().is_empty()))?;
        parse_date(raw)
    })
}

/// Lenient date parsing for page metadata and engine results.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%B %d, %Y", "%d %B %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}
