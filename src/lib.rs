//! mmdownloader: CLI downloader for comic series. Resolves a series page, fetches every
//! episode's images concurrently, and optionally merges and zips each episode.

pub mod assemble;
pub mod cli;
pub mod config;
pub mod download;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod retry;
pub mod scraper;

// Re-exports for CLI and consumers.
pub use crate::assemble::{AssembleError, EpisodeAssembler};
pub use crate::config::{Config, ConfigError, Settings};
pub use crate::download::{DownloadError, ImageDownloader, PoolBudget, WorkerPool};
pub use crate::model::{DownloadMode, DownloadOutcome, RunReport, SeriesTarget};
pub use crate::pipeline::{Pipeline, PipelineOptions, PipelineState, ProgressEvent};
pub use crate::retry::RetryPolicy;
pub use crate::scraper::{
    DiscoveryError, EpisodeSelector, FetchError, FixedSelection, PageFetcher, PoliteClient,
    PoliteClientBuilder, SeriesResolver, SiteSelectors,
};
