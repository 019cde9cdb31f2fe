//! Series discovery and episode page fetching. Shared client, selectors, resolver and fetcher.

mod client;
mod error;
pub(crate) mod parse;

pub use client::{PoliteClient, PoliteClientBuilder, DEFAULT_DELAY_MS, DEFAULT_TIMEOUT_SECS};
pub use error::{DiscoveryError, FetchError};

use crate::model::{DownloadMode, EpisodePage, EpisodeRef, ImageRef, Series, SeriesTarget};
use crate::retry::RetryPolicy;
use reqwest::Url;
use scraper::Selector;
use serde::{Deserialize, Serialize};

/// Strip a known site suffix from the end of a page title (e.g. " - MARUMARU") so that
/// titles containing " - " or " | " themselves are preserved.
pub fn strip_title_site_suffix<S: AsRef<str>>(s: &str, suffixes: &[S]) -> String {
    let mut t = s.trim();
    for suffix in suffixes {
        let suffix = suffix.as_ref();
        if !suffix.is_empty() && t.ends_with(suffix) {
            t = t[..t.len() - suffix.len()].trim();
            break;
        }
    }
    t.to_string()
}

/// CSS selectors describing the source site's layout. Configurable because sites change markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteSelectors {
    /// Series title on the landing page. Falls back to `<title>`.
    pub series_title: String,
    /// Anchors linking to episodes on the landing page.
    pub episode_link: String,
    /// Episode title on an episode page. Falls back to `<title>`, then the link text.
    pub episode_title: String,
    /// Comic images on an episode page, in reading order.
    pub image: String,
    /// Attributes holding the image URL, first present wins (lazy-load attributes first).
    pub image_attrs: Vec<String>,
    /// Suffixes stripped from `<title>` text.
    pub title_suffixes: Vec<String>,
    /// Landing page lists the newest episode first.
    pub newest_first: bool,
}

impl Default for SiteSelectors {
    fn default() -> Self {
        Self {
            series_title: "div.subject h1".to_string(),
            episode_link: "div.list-wrap a[href]".to_string(),
            episode_title: "h1.episode-title, div.article-title".to_string(),
            image: "div.view-content img, div.article-gallery img".to_string(),
            image_attrs: vec![
                "data-src".to_string(),
                "data-original".to_string(),
                "src".to_string(),
            ],
            title_suffixes: vec![
                " - MARUMARU".to_string(),
                " | MARUMARU".to_string(),
                " - 마루마루".to_string(),
                " | 마루마루".to_string(),
            ],
            newest_first: true,
        }
    }
}

fn parse_selector(sel: &str) -> Result<Selector, String> {
    Selector::parse(sel).map_err(|e| format!("invalid selector {:?}: {}", sel, e))
}

impl SiteSelectors {
    /// Parse every selector; fails on the first invalid one.
    pub fn compile(&self) -> Result<CompiledSelectors, String> {
        if self.image_attrs.is_empty() {
            return Err("image_attrs must name at least one attribute".to_string());
        }
        Ok(CompiledSelectors {
            series_title: parse_selector(&self.series_title)?,
            episode_link: parse_selector(&self.episode_link)?,
            episode_title: parse_selector(&self.episode_title)?,
            image: parse_selector(&self.image)?,
            html_title: parse_selector("title")?,
            image_attrs: self.image_attrs.clone(),
            title_suffixes: self.title_suffixes.clone(),
            newest_first: self.newest_first,
        })
    }
}

/// Parsed form of [SiteSelectors].
#[derive(Debug, Clone)]
pub struct CompiledSelectors {
    pub(crate) series_title: Selector,
    pub(crate) episode_link: Selector,
    pub(crate) episode_title: Selector,
    pub(crate) image: Selector,
    pub(crate) html_title: Selector,
    pub(crate) image_attrs: Vec<String>,
    pub(crate) title_suffixes: Vec<String>,
    pub(crate) newest_first: bool,
}

/// Chooses which discovered episodes to download in selective mode.
///
/// Returns the chosen `sequence` values. Order of the returned list does not matter;
/// the resolver keeps series order.
pub trait EpisodeSelector {
    fn select(&self, series_title: &str, episodes: &[EpisodeRef]) -> Result<Vec<u32>, String>;
}

/// A selection fixed up front (e.g. from `--episodes 1-3,7`).
#[derive(Debug, Clone, Default)]
pub struct FixedSelection(pub Vec<u32>);

impl EpisodeSelector for FixedSelection {
    fn select(&self, _series_title: &str, _episodes: &[EpisodeRef]) -> Result<Vec<u32>, String> {
        Ok(self.0.clone())
    }
}

/// Single GET of an HTML page; maps status and body errors.
fn fetch_page_once(client: &PoliteClient, url: &str) -> Result<String, FetchError> {
    let response = client.get_page(url).map_err(|e| FetchError::Network {
        url: url.to_string(),
        source: e,
    })?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    response.text().map_err(|e| FetchError::BodyRead {
        url: url.to_string(),
        source: e,
    })
}

fn parse_url(url: &str) -> Result<Url, FetchError> {
    Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        input: url.to_string(),
        reason: e.to_string(),
    })
}

fn title_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segs| segs.rfind(|s| !s.is_empty()).map(String::from))
        .or_else(|| url.host_str().map(String::from))
        .unwrap_or_else(|| "series".to_string())
}

/// Produces the ordered episode list for a series target.
pub struct SeriesResolver<'a> {
    client: &'a PoliteClient,
    selectors: &'a CompiledSelectors,
    retry: &'a RetryPolicy,
}

impl<'a> SeriesResolver<'a> {
    pub fn new(
        client: &'a PoliteClient,
        selectors: &'a CompiledSelectors,
        retry: &'a RetryPolicy,
    ) -> Self {
        Self {
            client,
            selectors,
            retry,
        }
    }

    /// Every episode on the landing page, ascending by sequence.
    pub fn discover(&self, landing_url: &Url) -> Result<Series, DiscoveryError> {
        let url = landing_url.as_str();
        let html = self
            .retry
            .run(|_| fetch_page_once(self.client, url), FetchError::is_transient)
            .map_err(|e| e.error)?;
        let page = parse::parse_series_page(&html, landing_url, self.selectors);
        if page.links.is_empty() {
            return Err(DiscoveryError::NoEpisodes {
                url: url.to_string(),
            });
        }
        let mut links = page.links;
        if self.selectors.newest_first {
            links.reverse();
        }
        let episodes = links
            .into_iter()
            .zip(1u32..)
            .map(|(link, sequence)| EpisodeRef {
                sequence,
                title: if link.title.is_empty() {
                    format!("Episode {}", sequence)
                } else {
                    link.title
                },
                source_url: link.url,
            })
            .collect::<Vec<_>>();
        let title = page.title.unwrap_or_else(|| title_from_url(landing_url));
        tracing::info!(series = %title, episodes = episodes.len(), "discovered series");
        Ok(Series { title, episodes })
    }

    /// Discover, then in selective mode keep only the selector's choices in series order.
    pub fn resolve(
        &self,
        target: &SeriesTarget,
        selector: &dyn EpisodeSelector,
    ) -> Result<Series, DiscoveryError> {
        let mut series = self.discover(target.landing_url())?;
        if target.mode() == DownloadMode::Selective {
            let chosen = selector
                .select(&series.title, &series.episodes)
                .map_err(DiscoveryError::Selection)?;
            for seq in &chosen {
                if !series.episodes.iter().any(|e| e.sequence == *seq) {
                    tracing::warn!(sequence = seq, "selected episode does not exist; ignoring");
                }
            }
            series.episodes.retain(|e| chosen.contains(&e.sequence));
            tracing::info!(selected = series.episodes.len(), "episodes selected");
        }
        Ok(series)
    }
}

/// Fetches one episode page and lists its images.
pub struct PageFetcher<'a> {
    client: &'a PoliteClient,
    selectors: &'a CompiledSelectors,
}

impl<'a> PageFetcher<'a> {
    pub fn new(client: &'a PoliteClient, selectors: &'a CompiledSelectors) -> Self {
        Self { client, selectors }
    }

    /// One attempt. Zero images is a permanent error: the layout no longer matches.
    pub fn fetch_episode_page(&self, episode: &EpisodeRef) -> Result<EpisodePage, FetchError> {
        let base = parse_url(&episode.source_url)?;
        let html = fetch_page_once(self.client, &episode.source_url)?;
        let parsed = parse::parse_episode_page(&html, &base, self.selectors);
        if parsed.image_urls.is_empty() {
            return Err(FetchError::NoImages {
                url: episode.source_url.clone(),
            });
        }
        let images = parsed
            .image_urls
            .into_iter()
            .zip(1u32..)
            .map(|(source_url, position)| ImageRef {
                episode: episode.sequence,
                position,
                source_url,
            })
            .collect();
        Ok(EpisodePage {
            title: parsed.title.unwrap_or_else(|| episode.title.clone()),
            images,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use httpmock::prelude::*;

    /// Landing page listing `n` episodes newest first, linking to `/ep/<n>`.
    pub(crate) fn series_html(title: &str, n: u32) -> String {
        let items: String = (1..=n)
            .rev()
            .map(|i| format!("<li><a href=\"/ep/{i}\">{title} {i}화</a></li>"))
            .collect();
        format!(
            "<html><head><title>{title} - MARUMARU</title></head><body>\
             <div class=\"list-wrap\"><ul>{items}</ul></div></body></html>"
        )
    }

    /// Episode page with the given absolute image URLs.
    pub(crate) fn episode_html(title: &str, images: &[String]) -> String {
        let imgs: String = images
            .iter()
            .map(|u| format!("<img data-src=\"{u}\">"))
            .collect();
        format!(
            "<html><body><h1 class=\"episode-title\">{title}</h1>\
             <div class=\"view-content\">{imgs}</div></body></html>"
        )
    }

    fn fixtures() -> (PoliteClient, CompiledSelectors, RetryPolicy) {
        let client = PoliteClient::builder().delay_ms(0).build().unwrap();
        let selectors = SiteSelectors::default().compile().unwrap();
        (client, selectors, RetryPolicy::new(3, Vec::new()))
    }

    #[test]
    fn strip_title_site_suffix_removes_trailing_suffix_only() {
        assert_eq!(
            strip_title_site_suffix("Ep 1 - Part 2 - MARUMARU", &[" - MARUMARU"]),
            "Ep 1 - Part 2"
        );
        assert_eq!(
            strip_title_site_suffix("A | B", &[" - MARUMARU"]),
            "A | B"
        );
    }

    #[test]
    fn invalid_selector_is_reported() {
        let sel = SiteSelectors {
            image: "div[".to_string(),
            ..SiteSelectors::default()
        };
        let err = sel.compile().unwrap_err();
        assert!(err.contains("div["));
    }

    #[test]
    fn resolve_all_returns_ascending_unique_sequences() -> Result<(), DiscoveryError> {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/series/1");
            then.status(200).body(series_html("Tower", 4));
        });
        let (client, selectors, retry) = fixtures();
        let target = SeriesTarget::new(&server.url("/series/1"), DownloadMode::All).unwrap();
        let series = SeriesResolver::new(&client, &selectors, &retry)
            .resolve(&target, &FixedSelection::default())?;
        assert_eq!(series.title, "Tower");
        let seqs: Vec<u32> = series.episodes.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert!(series.episodes[0].source_url.ends_with("/ep/1"));
        assert_eq!(series.episodes[3].title, "Tower 4화");
        Ok(())
    }

    #[test]
    fn resolve_selective_keeps_series_order() -> Result<(), DiscoveryError> {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/series/1");
            then.status(200).body(series_html("Tower", 5));
        });
        let (client, selectors, retry) = fixtures();
        let target = SeriesTarget::new(&server.url("/series/1"), DownloadMode::Selective).unwrap();
        let series = SeriesResolver::new(&client, &selectors, &retry)
            .resolve(&target, &FixedSelection(vec![4, 2, 9]))?;
        let seqs: Vec<u32> = series.episodes.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![2, 4]);
        Ok(())
    }

    #[test]
    fn resolve_fails_without_episode_listing() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/series/1");
            then.status(200).body("<html><body>nothing</body></html>");
        });
        let (client, selectors, retry) = fixtures();
        let target = SeriesTarget::new(&server.url("/series/1"), DownloadMode::All).unwrap();
        let result = SeriesResolver::new(&client, &selectors, &retry)
            .resolve(&target, &FixedSelection::default());
        assert!(matches!(result, Err(DiscoveryError::NoEpisodes { .. })));
    }

    #[test]
    fn resolve_retries_transient_landing_failures() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/series/1");
            then.status(503);
        });
        let (client, selectors, retry) = fixtures();
        let target = SeriesTarget::new(&server.url("/series/1"), DownloadMode::All).unwrap();
        let result = SeriesResolver::new(&client, &selectors, &retry)
            .resolve(&target, &FixedSelection::default());
        assert!(matches!(
            result,
            Err(DiscoveryError::Fetch(FetchError::HttpStatus { status: 503, .. }))
        ));
        mock.assert_calls(3);
    }

    #[test]
    fn fetch_episode_page_numbers_images_in_page_order() -> Result<(), FetchError> {
        let server = MockServer::start();
        let urls: Vec<String> = (1..=3).map(|i| server.url(format!("/img/{i}.jpg"))).collect();
        server.mock(|when, then| {
            when.method(GET).path("/ep/1");
            then.status(200).body(episode_html("First", &urls));
        });
        let (client, selectors, _) = fixtures();
        let episode = EpisodeRef {
            sequence: 1,
            title: "link title".to_string(),
            source_url: server.url("/ep/1"),
        };
        let page = PageFetcher::new(&client, &selectors).fetch_episode_page(&episode)?;
        assert_eq!(page.title, "First");
        let positions: Vec<u32> = page.images.iter().map(|i| i.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert_eq!(page.images[2].source_url, urls[2]);
        Ok(())
    }

    #[test]
    fn fetch_episode_page_without_images_is_permanent() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/ep/1");
            then.status(200).body("<html><body></body></html>");
        });
        let (client, selectors, _) = fixtures();
        let episode = EpisodeRef {
            sequence: 1,
            title: "t".to_string(),
            source_url: server.url("/ep/1"),
        };
        let err = PageFetcher::new(&client, &selectors)
            .fetch_episode_page(&episode)
            .unwrap_err();
        assert!(matches!(err, FetchError::NoImages { .. }));
        assert!(!err.is_transient());
    }
}
