//! HTML parsing for Vault search results and document pages.

use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use url::Url;

use crate::acquisition::links;

pub const BASE_URL: &str = "https://vault.fbi.gov";
pub const SEARCH_URL: &str = "https://vault.fbi.gov/search";
/// Results per search page, the `b_start:int` stride.
pub const RESULTS_PER_PAGE: u32 = 20;

static RESULT_LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("dt > a").unwrap());
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static NEXT_ITEM: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li.next > a").unwrap());
static RESULT_COUNT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span.results-count").unwrap());
static HEADING: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());

/// A search hit: document page URL and its link text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLink {
    pub url: String,
    pub title: String,
}

/// Search URL for `term`; page 0 has no offset.
pub fn search_url(term: &str, page: u32) -> String {
    let mut params = vec![("SearchableText", term.to_string())];
    if page > 0 {
        params.push(("b_start:int", (page * RESULTS_PER_PAGE).to_string()));
    }
    match Url::parse_with_params(SEARCH_URL, &params) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{SEARCH_URL}?SearchableText={term}"),
    }
}

fn text_of(el: &ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `dt > a` anchors of a search results page, resolved against `base`.
pub fn parse_result_links(html: &str, base: &str) -> Vec<ResultLink> {
    let doc = Html::parse_document(html);
    doc.select(&RESULT_LINK)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let url = links::resolve_href(base, href)?;
            let title = text_of(&a);
            Some(ResultLink {
                url,
                title: if title.is_empty() {
                    "Unknown Document".to_string()
                } else {
                    title
                },
            })
        })
        .collect()
}

/// URL of the next results page, if any.
pub fn parse_next_page(html: &str, base: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let by_text_or_title = doc.select(&ANCHOR).find(|a| {
        let text = text_of(a);
        text.contains("next")
            || text.contains("Next")
            || a.value().attr("title") == Some("Go to next page")
    });
    let anchor = by_text_or_title.or_else(|| doc.select(&NEXT_ITEM).next())?;
    links::resolve_href(base, anchor.value().attr("href")?)
}

/// Total result count: the last integer in `span.results-count`.
pub fn parse_result_count(html: &str) -> Option<usize> {
    let doc = Html::parse_document(html);
    let text = text_of(&doc.select(&RESULT_COUNT).next()?);
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .last()?
        .parse()
        .ok()
}

/// Title of a document page (`<h1>`).
pub fn parse_document_title(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let title = text_of(&doc.select(&HEADING).next()?);
    (!title.is_empty()).then_some(title)
}

/// First link to the document's PDF.
pub fn extract_pdf_url(html: &str, base: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    doc.select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .find(|href| href.contains("at_download") || href.contains(".pdf"))
        .and_then(|href| links::resolve_href(base, href))
}
