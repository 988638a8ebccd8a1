//! HTML content extraction.
//!
//! Turns a fetched page into a plain-text representation plus its title and
//! outbound links. Non-content elements (script, style, iframe and friends)
//! are stripped before text collection.

use scraper::{Html, Selector};
use url::Url;

use super::hierarchy::normalize;

/// Elements whose text is never page content.
const SKIP_ELEMENTS: &[&str] = &[
    "script", "style", "iframe", "noscript", "template", "head", "title", "svg",
];

#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub text: String,
    /// Normalized outbound links, in document order, deduplicated.
    pub links: Vec<String>,
}

pub fn extract_page(base: &Url, html: &str) -> ExtractedPage {
    let document = Html::parse_document(html);

    let title_selector = Selector::parse("title").expect("selector should parse");
    let title = document
        .select(&title_selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    // Depth-first walk in document order, pruning non-content subtrees.
    let mut text = String::new();
    let mut stack = vec![document.tree.root()];
    while let Some(node) = stack.pop() {
        if let Some(element) = node.value().as_element() {
            if SKIP_ELEMENTS.contains(&element.name()) {
                continue;
            }
        }
        if let Some(fragment) = node.value().as_text() {
            let trimmed = fragment.trim();
            if !trimmed.is_empty() {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(trimmed);
            }
        }
        let children: Vec<_> = node.children().collect();
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }

    ExtractedPage {
        title,
        text,
        links: extract_links(base, &document),
    }
}

fn extract_links(base: &Url, document: &Html) -> Vec<String> {
    let selector = Selector::parse("a[href]").expect("selector should parse");
    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("mailto:")
            || href.starts_with("javascript:")
        {
            continue;
        }
        let Ok(joined) = base.join(href) else {
            continue;
        };
        let Some(normalized) = normalize(joined.as_str()) else {
            continue;
        };
        if seen.insert(normalized.clone()) {
            links.push(normalized);
        }
    }
    links
}
