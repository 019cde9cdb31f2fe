//! Run orchestration: resolve the series, then fetch, download and assemble each episode.
//!
//! Episodes are processed one at a time. Image failures stay inside their episode and
//! episode failures stay inside the run; only discovery failure ends the run early.

use crate::assemble::EpisodeAssembler;
use crate::download::{ImageDownloader, PoolBudget, WorkerPool};
use crate::model::{
    DownloadOutcome, EpisodePage, EpisodeRef, EpisodeResult, EpisodeSummary, ImageRef, RunReport,
    SeriesTarget,
};
use crate::retry::RetryPolicy;
use crate::scraper::{
    CompiledSelectors, DiscoveryError, EpisodeSelector, FetchError, PageFetcher, PoliteClient,
    SeriesResolver,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Replace characters that are reserved on common filesystems; keep everything else
/// (including non-ASCII titles). Never returns an empty string.
pub fn sanitize_component(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_end_matches(['.', ' ']).trim_start();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_' || c == '.') {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<NNN>-<title>` so episode folders sort in reading order.
pub fn episode_dir_name(episode: &EpisodeRef) -> String {
    format!("{:03}-{}", episode.sequence, sanitize_component(&episode.title))
}

/// Where a run is. Logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Resolving,
    FetchingPage { episode: u32 },
    Downloading { episode: u32 },
    Assembling { episode: u32 },
    Done,
    Failed,
}

/// Progress notifications for a UI. Sent from worker threads for `ImageFinished`.
#[derive(Debug, Clone)]
pub enum ProgressEvent<'a> {
    SeriesResolved { title: &'a str, episodes: usize },
    EpisodeStarted { episode: &'a EpisodeRef, images: usize },
    ImageFinished { episode: u32, position: u32, success: bool },
    EpisodeFinished { summary: &'a EpisodeSummary },
}

/// Everything a run needs besides the HTTP client.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub destination: PathBuf,
    pub budget: PoolBudget,
    pub merge: bool,
    pub compress: bool,
    pub keep_files: bool,
    pub debug: bool,
    pub retry: RetryPolicy,
    pub selectors: CompiledSelectors,
}

/// Orchestrates one run. Holds no state across runs.
pub struct Pipeline<'a> {
    client: &'a PoliteClient,
    options: &'a PipelineOptions,
    progress: Option<&'a (dyn Fn(ProgressEvent<'_>) + Sync)>,
    cancel: Option<&'a AtomicBool>,
    state: PipelineState,
}

impl<'a> Pipeline<'a> {
    pub fn new(client: &'a PoliteClient, options: &'a PipelineOptions) -> Self {
        Self {
            client,
            options,
            progress: None,
            cancel: None,
            state: PipelineState::Idle,
        }
    }

    pub fn with_progress(mut self, progress: &'a (dyn Fn(ProgressEvent<'_>) + Sync)) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Flag checked before each episode; once set, no further episodes start.
    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        tracing::debug!(from = ?self.state, to = ?next, "pipeline state");
        self.state = next;
    }

    fn emit(&self, event: ProgressEvent<'_>) {
        if let Some(cb) = self.progress {
            cb(event);
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.map(|c| c.load(Ordering::SeqCst)).unwrap_or(false)
    }

    /// Resolve `target` and process every chosen episode. Only discovery failure is an error.
    pub fn run(
        &mut self,
        target: &SeriesTarget,
        selector: &dyn EpisodeSelector,
    ) -> Result<RunReport, DiscoveryError> {
        self.transition(PipelineState::Resolving);
        let options = self.options;
        let resolver = SeriesResolver::new(self.client, &options.selectors, &options.retry);
        let series = match resolver.resolve(target, selector) {
            Ok(s) => s,
            Err(e) => {
                self.transition(PipelineState::Failed);
                return Err(e);
            }
        };
        self.emit(ProgressEvent::SeriesResolved {
            title: &series.title,
            episodes: series.episodes.len(),
        });

        let series_dir = options.destination.join(sanitize_component(&series.title));
        let mut report = RunReport {
            series_title: series.title.clone(),
            episodes: Vec::with_capacity(series.episodes.len()),
            cancelled: false,
        };
        for episode in &series.episodes {
            if self.cancelled() {
                tracing::warn!(
                    remaining = series.episodes.len() - report.episodes.len(),
                    "cancelled; remaining episodes not started"
                );
                report.cancelled = true;
                break;
            }
            let summary = self.process_episode(episode, &series_dir);
            self.emit(ProgressEvent::EpisodeFinished { summary: &summary });
            report.episodes.push(summary);
        }
        self.transition(PipelineState::Done);
        Ok(report)
    }

    fn fetch_page_with_retry(
        &self,
        fetcher: &PageFetcher<'_>,
        episode: &EpisodeRef,
    ) -> Result<EpisodePage, FetchError> {
        self.options
            .retry
            .run(|_| fetcher.fetch_episode_page(episode), FetchError::is_transient)
            .map_err(|e| e.error)
    }

    fn process_episode(&mut self, episode: &EpisodeRef, series_dir: &Path) -> EpisodeSummary {
        self.transition(PipelineState::FetchingPage {
            episode: episode.sequence,
        });
        let options = self.options;
        let fetcher = PageFetcher::new(self.client, &options.selectors);
        let page = match self.fetch_page_with_retry(&fetcher, episode) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(episode = episode.sequence, error = %e, "episode page failed");
                return EpisodeSummary::page_failed(episode, e.to_string());
            }
        };

        let episode = EpisodeRef {
            title: page.title.clone(),
            ..episode.clone()
        };
        let dir = series_dir.join(episode_dir_name(&episode));
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::error!(path = %dir.display(), error = %e, "cannot create episode folder");
            return EpisodeSummary::page_failed(
                &episode,
                format!("cannot create {}: {}", dir.display(), e),
            );
        }

        self.transition(PipelineState::Downloading {
            episode: episode.sequence,
        });
        self.emit(ProgressEvent::EpisodeStarted {
            episode: &episode,
            images: page.images.len(),
        });
        tracing::info!(
            episode = episode.sequence,
            title = %episode.title,
            images = page.images.len(),
            workers = options.budget.workers(),
            "downloading episode"
        );
        let outcomes = self.download_images(&episode, &page.images, &dir);

        self.transition(PipelineState::Assembling {
            episode: episode.sequence,
        });
        let assembler = EpisodeAssembler::new(options.merge, options.compress, options.keep_files);
        let result = assembler.finish(EpisodeResult::new(episode, dir, page.images, outcomes));
        let summary = result.summary();
        tracing::info!(
            episode = summary.sequence,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "episode finished"
        );
        summary
    }

    fn download_images(
        &self,
        episode: &EpisodeRef,
        images: &[ImageRef],
        dir: &Path,
    ) -> Vec<DownloadOutcome> {
        let downloader =
            ImageDownloader::new(self.client, self.options.retry.clone(), self.options.debug)
                .with_referer(episode.source_url.clone());
        let pool = WorkerPool::new(self.options.budget);
        let progress = self.progress;
        pool.run(images, |image| {
            let outcome = downloader.download(image, dir);
            if let Some(cb) = progress {
                cb(ProgressEvent::ImageFinished {
                    episode: image.episode,
                    position: image.position,
                    success: outcome.is_success(),
                });
            }
            outcome
        })
        .into_iter()
        .map(|r| {
            r.unwrap_or_else(|panicked| DownloadOutcome::PermanentFailure {
                cause: panicked.to_string(),
            })
        })
        .collect()
    }
}
