//! HTML parsing for landing and episode pages. Pure functions over page text.

use crate::scraper::{strip_title_site_suffix, CompiledSelectors};
use reqwest::Url;
use scraper::{ElementRef, Html};
use std::collections::HashSet;

/// Episode link as found on the landing page, in page order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EpisodeLink {
    pub title: String,
    pub url: String,
}

/// Landing page contents: series title (if found) and episode links.
#[derive(Debug)]
pub(crate) struct SeriesPage {
    pub title: Option<String>,
    pub links: Vec<EpisodeLink>,
}

/// Episode page contents: title (if found) and absolute image URLs in page order.
#[derive(Debug)]
pub(crate) struct EpisodeImages {
    pub title: Option<String>,
    pub image_urls: Vec<String>,
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolve an href or src against the page URL. Anchors, scripts and data URIs yield None.
fn absolute_url(base: &Url, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty()
        || raw.starts_with('#')
        || raw.starts_with("javascript:")
        || raw.starts_with("data:")
    {
        return None;
    }
    let url = base.join(raw).ok()?;
    match url.scheme() {
        "http" | "https" => Some(url.to_string()),
        _ => None,
    }
}

fn page_title(doc: &Html, selectors: &CompiledSelectors) -> Option<String> {
    doc.select(&selectors.html_title)
        .next()
        .map(element_text)
        .map(|t| strip_title_site_suffix(&t, &selectors.title_suffixes))
        .filter(|t| !t.is_empty())
}

pub(crate) fn parse_series_page(
    html: &str,
    base: &Url,
    selectors: &CompiledSelectors,
) -> SeriesPage {
    let doc = Html::parse_document(html);
    let title = doc
        .select(&selectors.series_title)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
        .or_else(|| page_title(&doc, selectors));

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for a in doc.select(&selectors.episode_link) {
        let Some(url) = a.value().attr("href").and_then(|h| absolute_url(base, h)) else {
            continue;
        };
        if url == base.as_str() || !seen.insert(url.clone()) {
            continue;
        }
        let mut title = element_text(a);
        if title.is_empty() {
            title = a.value().attr("title").unwrap_or_default().trim().to_string();
        }
        links.push(EpisodeLink { title, url });
    }
    SeriesPage { title, links }
}

pub(crate) fn parse_episode_page(
    html: &str,
    base: &Url,
    selectors: &CompiledSelectors,
) -> EpisodeImages {
    let doc = Html::parse_document(html);
    let title = doc
        .select(&selectors.episode_title)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
        .or_else(|| page_title(&doc, selectors));

    let mut seen = HashSet::new();
    let mut image_urls = Vec::new();
    for img in doc.select(&selectors.image) {
        let src = selectors
            .image_attrs
            .iter()
            .filter_map(|attr| img.value().attr(attr))
            .find_map(|v| absolute_url(base, v));
        if let Some(url) = src {
            if seen.insert(url.clone()) {
                image_urls.push(url);
            }
        }
    }
    EpisodeImages { title, image_urls }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::SiteSelectors;

    fn selectors() -> CompiledSelectors {
        SiteSelectors::default().compile().unwrap()
    }

    fn base(u: &str) -> Url {
        Url::parse(u).unwrap()
    }

    const SERIES_HTML: &str = r##"<!DOCTYPE html><html><head><title>Tower Climb - MARUMARU</title></head>
<body><div class="list-wrap"><ul>
<li><a href="/ep/3"> Tower Climb  3화 </a></li>
<li><a href="/ep/2">Tower Climb 2화</a></li>
<li><a href="https://comics.example/ep/2">duplicate</a></li>
<li><a href="#top">top</a></li>
<li><a href="/ep/1" title="Tower Climb 1화"><img src="/thumb/1.jpg"></a></li>
</ul></div></body></html>"##;

    #[test]
    fn series_page_links_in_page_order_deduped() {
        let page = parse_series_page(
            SERIES_HTML,
            &base("https://comics.example/series/7"),
            &selectors(),
        );
        assert_eq!(page.title.as_deref(), Some("Tower Climb"));
        let urls: Vec<&str> = page.links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://comics.example/ep/3",
                "https://comics.example/ep/2",
                "https://comics.example/ep/1"
            ]
        );
        assert_eq!(page.links[0].title, "Tower Climb 3화");
        assert_eq!(page.links[2].title, "Tower Climb 1화");
    }

    #[test]
    fn series_title_prefers_configured_selector() {
        let html = r#"<html><head><title>ignored</title></head><body>
<div class="subject"><h1>Real Title</h1></div><div class="list-wrap"></div></body></html>"#;
        let page = parse_series_page(html, &base("https://comics.example/s"), &selectors());
        assert_eq!(page.title.as_deref(), Some("Real Title"));
        assert!(page.links.is_empty());
    }

    #[test]
    fn episode_page_prefers_lazy_attributes_and_keeps_order() {
        let html = r#"<html><body><h1 class="episode-title">Ep 1</h1>
<div class="view-content">
<img data-src="/img/a.jpg" src="/loading.gif">
<img src="https://cdn.example/b.png">
<img data-original="c.webp">
<img src="data:image/gif;base64,AAAA">
<img src="https://cdn.example/b.png">
</div></body></html>"#;
        let page = parse_episode_page(html, &base("https://comics.example/ep/1/"), &selectors());
        assert_eq!(page.title.as_deref(), Some("Ep 1"));
        assert_eq!(
            page.image_urls,
            vec![
                "https://comics.example/img/a.jpg",
                "https://cdn.example/b.png",
                "https://comics.example/ep/1/c.webp",
            ]
        );
    }

    #[test]
    fn episode_page_without_images_is_empty() {
        let page = parse_episode_page(
            "<html><body><p>moved</p></body></html>",
            &base("https://comics.example/ep/1"),
            &selectors(),
        );
        assert!(page.image_urls.is_empty());
        assert!(page.title.is_none());
    }
}
