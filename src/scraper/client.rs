//! Shared blocking HTTP client. Page requests are spaced by a politeness delay;
//! image requests are not, since the worker pool already bounds their rate.

use reqwest::header::REFERER;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_DELAY_MS: u64 = 500;
const MAX_REDIRECTS: usize = 10;

/// Blocking HTTP client safe to share across worker threads.
#[derive(Debug)]
pub struct PoliteClient {
    inner: reqwest::blocking::Client,
    delay: Duration,
    last_page_request: Mutex<Option<Instant>>,
}

impl PoliteClient {
    /// Build a client with default User-Agent, timeout, and delay.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    pub fn builder() -> PoliteClientBuilder {
        PoliteClientBuilder::default()
    }

    /// GET an HTML page. Sleeps until the delay has passed since the previous page request.
    pub fn get_page(&self, url: &str) -> Result<reqwest::blocking::Response, reqwest::Error> {
        // Holding the lock across the wait serializes page requests.
        let mut last = self
            .last_page_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.delay {
                std::thread::sleep(self.delay - elapsed);
            }
        }
        let response = self.inner.get(url).send();
        *last = Some(Instant::now());
        response
    }

    /// GET an image. `referer` is sent when given; many image hosts reject requests without it.
    pub fn get_image(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> Result<reqwest::blocking::Response, reqwest::Error> {
        let mut request = self.inner.get(url);
        if let Some(r) = referer {
            request = request.header(REFERER, r);
        }
        request.send()
    }
}

/// Builder for PoliteClient with optional User-Agent, delay and timeout.
#[derive(Debug)]
pub struct PoliteClientBuilder {
    user_agent: Option<String>,
    delay_ms: u64,
    timeout_secs: u64,
}

impl Default for PoliteClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            delay_ms: DEFAULT_DELAY_MS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl PoliteClientBuilder {
    /// Set a custom User-Agent. If not set, a browser-like default is used.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Delay between page requests in milliseconds.
    pub fn delay_ms(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn build(self) -> Result<PoliteClient, reqwest::Error> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(PoliteClient {
            inner,
            delay: Duration::from_millis(self.delay_ms),
            last_page_request: Mutex::new(None),
        })
    }
}
