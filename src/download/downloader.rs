//! Single-image download: HTTP GET with retry, extension inference, atomic write.

use crate::model::{DownloadOutcome, ImageRef};
use crate::retry::RetryPolicy;
use crate::scraper::PoliteClient;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Image-level failure before it is folded into a [DownloadOutcome].
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid image URL {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("network error: {source}")]
    Network { source: reqwest::Error },

    #[error("HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("failed to read image body: {source}")]
    BodyRead { source: reqwest::Error },

    #[error("server returned an empty body")]
    EmptyBody,

    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    /// Connection resets, timeouts, truncated bodies, 5xx and 429 are retried.
    pub fn is_transient(&self) -> bool {
        match self {
            DownloadError::Network { .. } | DownloadError::BodyRead { .. } => true,
            DownloadError::HttpStatus { status } => *status >= 500 || *status == 429,
            DownloadError::InvalidUrl { .. }
            | DownloadError::EmptyBody
            | DownloadError::Io { .. } => false,
        }
    }
}

fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/bmp" => Some("bmp"),
        _ => None,
    }
}

fn extension_from_url(url: &Url) -> Option<&'static str> {
    let last = url.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("jpg"),
        "png" => Some("png"),
        "gif" => Some("gif"),
        "webp" => Some("webp"),
        "bmp" => Some("bmp"),
        _ => None,
    }
}

fn sniff_extension(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpg")
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("png")
    } else if bytes.starts_with(b"GIF8") {
        Some("gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("webp")
    } else if bytes.starts_with(b"BM") {
        Some("bmp")
    } else {
        None
    }
}

/// Content-Type first, then URL suffix, then magic bytes, then `jpg`.
pub(crate) fn infer_extension(content_type: Option<&str>, url: &Url, bytes: &[u8]) -> &'static str {
    content_type
        .and_then(extension_from_content_type)
        .or_else(|| extension_from_url(url))
        .or_else(|| sniff_extension(bytes))
        .unwrap_or("jpg")
}

/// `<name>.part` next to `path`.
pub(crate) fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Run `write` against the `.part` sibling of `path`, then rename it into place, so the
/// final name never holds a partial file. The `.part` file is removed on any failure.
pub(crate) fn write_via_part<E>(
    path: &Path,
    write: impl FnOnce(&Path) -> Result<(), E>,
    rename_err: impl FnOnce(std::io::Error) -> E,
) -> Result<(), E> {
    let tmp = part_path(path);
    if let Err(e) = write(&tmp) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(rename_err(e));
    }
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    write_via_part(path, |tmp| std::fs::write(tmp, bytes), |e| e)
}

/// Resident memory of this process in bytes, if the platform reports it.
fn process_memory_bytes() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut sys = sysinfo::System::new();
    sys.refresh_process(pid);
    sys.process(pid).map(|p| p.memory())
}

/// Downloads images with a shared client. Cheap to share across worker threads.
pub struct ImageDownloader<'a> {
    client: &'a PoliteClient,
    retry: RetryPolicy,
    debug: bool,
    referer: Option<String>,
}

impl<'a> ImageDownloader<'a> {
    pub fn new(client: &'a PoliteClient, retry: RetryPolicy, debug: bool) -> Self {
        Self {
            client,
            retry,
            debug,
            referer: None,
        }
    }

    /// Referer sent with every image request (the episode page URL).
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    fn fetch_once(&self, url: &Url) -> Result<(Vec<u8>, Option<String>), DownloadError> {
        let response = self
            .client
            .get_image(url.as_str(), self.referer.as_deref())
            .map_err(|e| DownloadError::Network { source: e })?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                status: status.as_u16(),
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = response
            .bytes()
            .map_err(|e| DownloadError::BodyRead { source: e })?;
        if bytes.is_empty() {
            return Err(DownloadError::EmptyBody);
        }
        Ok((bytes.to_vec(), content_type))
    }

    /// Download one image into `dest_dir` as `<NNN>.<ext>`. Never panics on network input;
    /// every path ends in exactly one terminal outcome.
    pub fn download(&self, image: &ImageRef, dest_dir: &Path) -> DownloadOutcome {
        let url = match Url::parse(&image.source_url) {
            Ok(u) => u,
            Err(e) => {
                let err = DownloadError::InvalidUrl {
                    input: image.source_url.clone(),
                    reason: e.to_string(),
                };
                return DownloadOutcome::PermanentFailure {
                    cause: err.to_string(),
                };
            }
        };

        let mut attempts_used = 0;
        let result = self.retry.run(
            |attempt| {
                attempts_used = attempt;
                self.fetch_once(&url)
            },
            DownloadError::is_transient,
        );
        let outcome = match result {
            Ok((bytes, content_type)) => {
                let ext = infer_extension(content_type.as_deref(), &url, &bytes);
                let path = dest_dir.join(format!("{}.{}", image.file_stem(), ext));
                match write_atomic(&path, &bytes) {
                    Ok(()) => DownloadOutcome::Success {
                        local_path: path,
                        byte_size: bytes.len() as u64,
                    },
                    Err(source) => DownloadOutcome::PermanentFailure {
                        cause: DownloadError::Io { path, source }.to_string(),
                    },
                }
            }
            Err(exhausted) if exhausted.error.is_transient() => DownloadOutcome::TransientFailure {
                cause: exhausted.error.to_string(),
                attempt_count: exhausted.attempts,
            },
            Err(exhausted) => DownloadOutcome::PermanentFailure {
                cause: exhausted.error.to_string(),
            },
        };

        match &outcome {
            DownloadOutcome::Success { byte_size, .. } if self.debug => {
                tracing::info!(
                    episode = image.episode,
                    position = image.position,
                    bytes = byte_size,
                    attempts = attempts_used,
                    memory_bytes = process_memory_bytes().unwrap_or(0),
                    "image downloaded"
                );
            }
            DownloadOutcome::Success { .. } => {
                tracing::debug!(episode = image.episode, position = image.position, "image downloaded");
            }
            DownloadOutcome::TransientFailure { cause, attempt_count } => {
                tracing::warn!(
                    episode = image.episode,
                    position = image.position,
                    attempts = attempt_count,
                    %cause,
                    "image failed after retries"
                );
            }
            DownloadOutcome::PermanentFailure { cause } => {
                tracing::warn!(episode = image.episode, position = image.position, %cause, "image failed");
            }
        }
        outcome
    }
}
