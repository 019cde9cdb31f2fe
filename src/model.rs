//! Data model shared by discovery, download, assembly and reporting.
//!
//! Episodes and images carry 1-based ordinals; every on-disk name is derived from
//! them, so ordering here is what makes output folders sort in reading order.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Whether to download the whole catalog or a user-confirmed subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadMode {
    All,
    Selective,
}

/// A validated series landing URL plus download mode. Immutable for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesTarget {
    landing_url: Url,
    mode: DownloadMode,
}

impl SeriesTarget {
    /// Accepts only absolute http(s) URLs with a host.
    pub fn new(landing_url: &str, mode: DownloadMode) -> Result<Self, String> {
        let url = Url::parse(landing_url.trim()).map_err(|e| e.to_string())?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(format!("unsupported scheme '{}'", url.scheme()));
        }
        if url.host_str().is_none() {
            return Err("URL has no host".to_string());
        }
        Ok(Self {
            landing_url: url,
            mode,
        })
    }

    pub fn landing_url(&self) -> &Url {
        &self.landing_url
    }

    pub fn mode(&self) -> DownloadMode {
        self.mode
    }
}

/// One episode in ascending reading order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeRef {
    /// 1-based, strictly increasing across a resolved series.
    pub sequence: u32,
    pub title: String,
    pub source_url: String,
}

/// A resolved series: title plus the episodes chosen for this run.
#[derive(Debug, Clone)]
pub struct Series {
    pub title: String,
    pub episodes: Vec<EpisodeRef>,
}

/// One discovered image of an episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Sequence of the owning episode.
    pub episode: u32,
    /// 1-based reading-order position within the episode.
    pub position: u32,
    pub source_url: String,
}

impl ImageRef {
    /// File stem on disk: position zero-padded to three digits.
    pub fn file_stem(&self) -> String {
        format!("{:03}", self.position)
    }
}

/// Parsed episode page: title and images in on-page order.
#[derive(Debug, Clone)]
pub struct EpisodePage {
    pub title: String,
    pub images: Vec<ImageRef>,
}

/// Terminal result of one image download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Success { local_path: PathBuf, byte_size: u64 },
    /// Retry bound exhausted on a retryable error.
    TransientFailure { cause: String, attempt_count: u32 },
    PermanentFailure { cause: String },
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DownloadOutcome::Success { .. })
    }

    pub fn local_path(&self) -> Option<&PathBuf> {
        match self {
            DownloadOutcome::Success { local_path, .. } => Some(local_path),
            _ => None,
        }
    }
}

/// State of an optional finishing step (merge or archive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Disabled,
    Done { path: PathBuf },
    Skipped { reason: String },
    Failed { error: String },
}

impl StepStatus {
    pub fn ran(&self) -> bool {
        matches!(self, StepStatus::Done { .. })
    }
}

/// Everything known about one episode while the pipeline works on it.
#[derive(Debug, Clone)]
pub struct EpisodeResult {
    pub episode: EpisodeRef,
    pub directory: PathBuf,
    pub images: Vec<ImageRef>,
    /// Same length and order as `images`.
    pub outcomes: Vec<DownloadOutcome>,
    pub merged_path: Option<PathBuf>,
    pub archive_path: Option<PathBuf>,
    pub merge: StepStatus,
    pub archive: StepStatus,
}

impl EpisodeResult {
    pub fn new(
        episode: EpisodeRef,
        directory: PathBuf,
        images: Vec<ImageRef>,
        outcomes: Vec<DownloadOutcome>,
    ) -> Self {
        Self {
            episode,
            directory,
            images,
            outcomes,
            merged_path: None,
            archive_path: None,
            merge: StepStatus::Disabled,
            archive: StepStatus::Disabled,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Successful images as (position, path), ascending by position.
    pub fn successful_files(&self) -> Vec<(u32, PathBuf)> {
        let mut files: Vec<(u32, PathBuf)> = self
            .images
            .iter()
            .zip(&self.outcomes)
            .filter_map(|(img, o)| o.local_path().map(|p| (img.position, p.clone())))
            .collect();
        files.sort_by_key(|(pos, _)| *pos);
        files
    }

    pub fn failures(&self) -> Vec<ImageFailure> {
        self.images
            .iter()
            .zip(&self.outcomes)
            .filter_map(|(img, o)| match o {
                DownloadOutcome::Success { .. } => None,
                DownloadOutcome::TransientFailure {
                    cause,
                    attempt_count,
                } => Some(ImageFailure {
                    position: img.position,
                    source_url: img.source_url.clone(),
                    cause: format!("{} (after {} attempts)", cause, attempt_count),
                    transient: true,
                }),
                DownloadOutcome::PermanentFailure { cause } => Some(ImageFailure {
                    position: img.position,
                    source_url: img.source_url.clone(),
                    cause: cause.clone(),
                    transient: false,
                }),
            })
            .collect()
    }

    pub fn summary(&self) -> EpisodeSummary {
        let succeeded = self.succeeded();
        let failures = self.failures();
        let status = if self.images.is_empty() || succeeded == 0 {
            EpisodeStatus::EpisodeFailed {
                cause: format!("all {} images failed", self.images.len()),
            }
        } else if failures.is_empty() {
            EpisodeStatus::Completed
        } else {
            EpisodeStatus::Partial
        };
        EpisodeSummary {
            sequence: self.episode.sequence,
            title: self.episode.title.clone(),
            status,
            succeeded,
            failed: failures.len(),
            failures,
            merge: self.merge.clone(),
            archive: self.archive.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFailure {
    pub position: u32,
    pub source_url: String,
    pub cause: String,
    pub transient: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EpisodeStatus {
    Completed,
    Partial,
    EpisodeFailed { cause: String },
}

/// Per-episode accounting for the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub sequence: u32,
    pub title: String,
    pub status: EpisodeStatus,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<ImageFailure>,
    pub merge: StepStatus,
    pub archive: StepStatus,
}

impl EpisodeSummary {
    /// Summary for an episode whose page could not be fetched or parsed.
    pub fn page_failed(episode: &EpisodeRef, cause: String) -> Self {
        Self {
            sequence: episode.sequence,
            title: episode.title.clone(),
            status: EpisodeStatus::EpisodeFailed { cause },
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
            merge: StepStatus::Disabled,
            archive: StepStatus::Disabled,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, EpisodeStatus::EpisodeFailed { .. })
    }
}

/// Final accounting of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub series_title: String,
    pub episodes: Vec<EpisodeSummary>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn failed_episodes(&self) -> usize {
        self.episodes.iter().filter(|e| e.is_failed()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn episode() -> EpisodeRef {
        EpisodeRef {
            sequence: 2,
            title: "Episode 2".to_string(),
            source_url: "https://comics.example/ep/2".to_string(),
        }
    }

    fn images(n: u32) -> Vec<ImageRef> {
        (1..=n)
            .map(|position| ImageRef {
                episode: 2,
                position,
                source_url: format!("https://img.example/{}.jpg", position),
            })
            .collect()
    }

    #[test]
    fn series_target_accepts_http_urls() {
        let t = SeriesTarget::new(" https://comics.example/series/1 ", DownloadMode::All).unwrap();
        assert_eq!(t.landing_url().as_str(), "https://comics.example/series/1");
        assert_eq!(t.mode(), DownloadMode::All);
    }

    #[test]
    fn series_target_rejects_other_schemes() {
        assert!(SeriesTarget::new("ftp://comics.example/x", DownloadMode::All).is_err());
        assert!(SeriesTarget::new("not a url", DownloadMode::Selective).is_err());
    }

    #[test]
    fn file_stem_is_three_digit_padded() {
        let img = &images(12)[11];
        assert_eq!(img.file_stem(), "012");
    }

    #[test]
    fn summary_counts_partial_episode() {
        let imgs = images(3);
        let outcomes = vec![
            DownloadOutcome::Success {
                local_path: PathBuf::from("a/001.jpg"),
                byte_size: 10,
            },
            DownloadOutcome::PermanentFailure {
                cause: "HTTP 404".to_string(),
            },
            DownloadOutcome::Success {
                local_path: PathBuf::from("a/003.jpg"),
                byte_size: 10,
            },
        ];
        let result = EpisodeResult::new(episode(), PathBuf::from("a"), imgs, outcomes);
        let summary = result.summary();
        assert_eq!(summary.status, EpisodeStatus::Partial);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].position, 2);
        assert!(!summary.failures[0].transient);
        let files: Vec<u32> = result.successful_files().iter().map(|(p, _)| *p).collect();
        assert_eq!(files, vec![1, 3]);
    }

    #[test]
    fn summary_marks_all_failed_episode() {
        let outcomes = vec![DownloadOutcome::TransientFailure {
            cause: "timeout".to_string(),
            attempt_count: 3,
        }];
        let result = EpisodeResult::new(episode(), PathBuf::from("a"), images(1), outcomes);
        let summary = result.summary();
        assert!(summary.is_failed());
        assert!(summary.failures[0].cause.contains("after 3 attempts"));
        assert!(summary.failures[0].transient);
    }

    #[test]
    fn report_serializes_tagged_statuses() -> Result<(), Box<dyn Error>> {
        let report = RunReport {
            series_title: "Series".to_string(),
            episodes: vec![EpisodeSummary::page_failed(&episode(), "HTTP 404".to_string())],
            cancelled: false,
        };
        let value: serde_json::Value = serde_json::to_value(&report)?;
        assert_eq!(value["episodes"][0]["status"]["state"], "episode_failed");
        assert_eq!(value["episodes"][0]["merge"]["status"], "disabled");
        assert_eq!(report.failed_episodes(), 1);
        Ok(())
    }
}
