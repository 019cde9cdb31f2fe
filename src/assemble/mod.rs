//! Episode finishing steps: merge successful images, zip the episode folder.
//!
//! Runs on the orchestrating thread only after every image has a terminal outcome.
//! Failures here are recorded on the episode and never abort the run.

mod archive;
mod merge;

pub(crate) use merge::MERGED_FILE_NAME;

use crate::model::{EpisodeResult, StepStatus};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("merged image would be {height} pixels tall, beyond the supported maximum")]
    TooLarge { height: u64 },
}

/// Which finishing steps to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeAssembler {
    merge: bool,
    compress: bool,
    keep_files: bool,
}

impl EpisodeAssembler {
    /// `keep_files = false` removes the loose episode folder once its archive is written.
    pub fn new(merge: bool, compress: bool, keep_files: bool) -> Self {
        Self {
            merge,
            compress,
            keep_files,
        }
    }

    /// Apply the enabled steps. Merge runs first so the archive includes the merged image.
    pub fn finish(&self, mut result: EpisodeResult) -> EpisodeResult {
        if self.merge {
            self.merge_step(&mut result);
        }
        if self.compress {
            self.archive_step(&mut result);
        }
        result
    }

    fn merge_step(&self, result: &mut EpisodeResult) {
        let files = result.successful_files();
        if files.is_empty() {
            tracing::info!(episode = result.episode.sequence, "no images downloaded; merge skipped");
            result.merge = StepStatus::Skipped {
                reason: "no successfully downloaded images".to_string(),
            };
            return;
        }
        let out = result.directory.join(MERGED_FILE_NAME);
        result.merge = match merge::merge_vertical(&files, &out) {
            Ok(Some(merged)) => {
                for (position, reason) in &merged.unreadable {
                    tracing::warn!(position, %reason, "image could not be decoded; left out of merge");
                }
                tracing::info!(
                    episode = result.episode.sequence,
                    images = merged.included,
                    path = %merged.path.display(),
                    "merged episode"
                );
                result.merged_path = Some(merged.path.clone());
                StepStatus::Done { path: merged.path }
            }
            Ok(None) => StepStatus::Skipped {
                reason: "none of the downloaded images could be decoded".to_string(),
            },
            Err(e) => {
                tracing::error!(episode = result.episode.sequence, error = %e, "merge failed");
                StepStatus::Failed {
                    error: e.to_string(),
                }
            }
        };
    }

    fn archive_step(&self, result: &mut EpisodeResult) {
        let Some(name) = result.directory.file_name().map(|n| n.to_string_lossy().into_owned())
        else {
            result.archive = StepStatus::Failed {
                error: format!("episode directory {} has no name", result.directory.display()),
            };
            return;
        };
        let parent = result
            .directory
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default();
        let out = parent.join(format!("{}.zip", name));
        result.archive = match archive::zip_directory(&result.directory, &out) {
            Ok(Some(entries)) => {
                tracing::info!(
                    episode = result.episode.sequence,
                    entries,
                    path = %out.display(),
                    "archived episode"
                );
                if !self.keep_files {
                    match std::fs::remove_dir_all(&result.directory) {
                        // The merged image now exists only inside the archive.
                        Ok(()) => {
                            if result.merged_path.take().is_some() {
                                result.merge = StepStatus::Done { path: out.clone() };
                            }
                        }
                        Err(e) => tracing::warn!(
                            path = %result.directory.display(),
                            error = %e,
                            "could not remove loose files after archiving"
                        ),
                    }
                }
                result.archive_path = Some(out.clone());
                StepStatus::Done { path: out }
            }
            Ok(None) => StepStatus::Skipped {
                reason: "episode folder is empty".to_string(),
            },
            Err(e) => {
                tracing::error!(episode = result.episode.sequence, error = %e, "archive failed");
                StepStatus::Failed {
                    error: e.to_string(),
                }
            }
        };
    }
}
