//! HTML helpers for EPUB content documents.
//!
//! Rendering goes through `html2text` with the trivial decorator so headings,
//! links and list items come out as bare text. Heading lookup is a regex over
//! the raw document, with the captured fragment rendered the same way.

use std::borrow::Cow;
use std::sync::LazyLock;

use html2text::render::text_renderer::TrivialDecorator;
use regex::Regex;

/// Wide enough that `html2text` never wraps a paragraph.
const RENDER_WIDTH: usize = 10_000;

static CDATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("valid CDATA regex"));
static H1: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h1\b[^>]*>(.*?)</h1\s*>").expect("valid h1 regex"));
static H2: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h2\b[^>]*>(.*?)</h2\s*>").expect("valid h2 regex"));
static TOC_NAV: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<nav\b[^>]*epub:type\s*=\s*["'][^"']*\btoc\b"#).expect("valid nav regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heading {
    H1,
    H2,
}

/// Renders `html` to text and joins its non-blank lines with `separator`.
/// `head`, `script` and `style` never reach the output.
pub fn html_to_text(html: &str, separator: &str) -> String {
    let rendered = render(&unwrap_cdata(html));
    rendered
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Whitespace-normalized text of the first `heading` element, if it has any.
pub fn heading_text(html: &str, heading: Heading) -> Option<String> {
    let pattern = match heading {
        Heading::H1 => &*H1,
        Heading::H2 => &*H2,
    };
    let inner = pattern.captures(html)?.get(1)?.as_str();
    let text = render(&unwrap_cdata(inner))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}

/// EPUB 3 navigation documents carry a `<nav epub:type="toc">`.
pub fn is_navigation_document(html: &str) -> bool {
    TOC_NAV.is_match(html)
}

pub fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn render(html: &str) -> String {
    html2text::from_read_with_decorator(html.as_bytes(), RENDER_WIDTH, TrivialDecorator::new())
}

/// The HTML parser treats CDATA in body content as a comment; XHTML readers
/// show it as text, so it is inlined as escaped text first.
fn unwrap_cdata(html: &str) -> Cow<'_, str> {
    CDATA.replace_all(html, |caps: &regex::Captures<'_>| xml_escape(&caps[1]))
}
