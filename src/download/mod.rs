//! Concurrent image retrieval: worker budget, pool, and the per-image downloader.

mod budget;
mod downloader;
mod pool;

pub use budget::{PoolBudget, MAX_LEVEL};
pub use downloader::{DownloadError, ImageDownloader};
pub(crate) use downloader::write_via_part;
pub use pool::{TaskPanicked, WorkerPool};
