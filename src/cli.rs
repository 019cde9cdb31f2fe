//! CLI parsing and orchestration. Parses args, resolves settings, runs the pipeline and
//! prints the run summary. Maps errors to exit codes.

use crate::config::{self, Config, ConfigError, Settings};
use crate::download::PoolBudget;
use crate::model::{DownloadMode, EpisodeRef, EpisodeStatus, RunReport, SeriesTarget, StepStatus};
use crate::pipeline::{Pipeline, PipelineOptions, ProgressEvent};
use crate::retry::RetryPolicy;
use crate::scraper::{DiscoveryError, EpisodeSelector, FixedSelection, SeriesResolver};
use crate::PoliteClient;
use clap::Parser;
use std::cell::RefCell;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Discovery(#[from] DiscoveryError),

    #[error("all {count} requested episodes failed")]
    AllEpisodesFailed { count: usize },

    #[error("cannot write report {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled")]
    Cancelled,
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) | CliRunError::Config(_) => 1,
            CliRunError::Discovery(_) => 2,
            CliRunError::AllEpisodesFailed { .. } => 3,
            CliRunError::Report { .. } => 4,
            CliRunError::Cancelled => 130,
        }
    }
}

/// Parsed `--episodes` value: ascending, de-duplicated sequence numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeList(pub Vec<u32>);

#[derive(Parser, Debug)]
#[command(name = "mmdownloader")]
#[command(about = "Download every image of a comic series, episode by episode")]
#[command(
    after_help = "Config file keys (path, merge, debug, multi, zip, keep_files, user_agent, request_delay_ms, timeout_secs, retry_count, retry_backoff_ms, [selectors]) are read from ./mmdownloader.toml or the user config dir. CLI flags override config."
)]
pub struct Args {
    /// Series landing page URL.
    pub url: String,

    /// List the episodes and ask which ones to download.
    #[arg(long, conflicts_with = "episodes")]
    pub select: bool,

    /// Download only these episodes, e.g. 1-3,7 (1-based, in series order).
    #[arg(long, value_parser = parse_episode_list)]
    pub episodes: Option<EpisodeList>,

    /// Download root (overrides config; default ./downloads).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Stack each episode's images into merged.png.
    #[arg(long, overrides_with = "no_merge")]
    pub merge: bool,

    #[arg(long, overrides_with = "merge", hide = true)]
    pub no_merge: bool,

    /// Zip each episode folder next to it.
    #[arg(long, overrides_with = "no_zip")]
    pub zip: bool,

    #[arg(long, overrides_with = "zip", hide = true)]
    pub no_zip: bool,

    /// Keep the episode folder after zipping.
    #[arg(long, overrides_with = "no_keep_files")]
    pub keep_files: bool,

    /// Remove the episode folder once its zip is written.
    #[arg(long, overrides_with = "keep_files")]
    pub no_keep_files: bool,

    /// Log every image with its size and process memory use.
    #[arg(long)]
    pub debug: bool,

    /// Concurrency level: 0 sequential, 1 half the cores, 2 cores, 3 twice, 4 maximum.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=4))]
    pub multi: Option<u8>,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Delay between page requests in milliseconds (overrides config; default 500).
    #[arg(long)]
    pub delay: Option<u64>,

    /// Request timeout in seconds (overrides config; default 30).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Resolve the series and print its episodes without downloading.
    #[arg(long)]
    pub dry_run: bool,

    /// Write the JSON run report to this path.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Save the effective settings to the config file before running.
    #[arg(long)]
    pub save_config: bool,

    /// Suppress progress output (errors only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug logging and the full error chain on failure.
    #[arg(long)]
    pub verbose: bool,
}

/// `--x` / `--no-x` pair to an optional override.
fn flag_pair(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

impl Args {
    fn mode(&self) -> DownloadMode {
        if self.select || self.episodes.is_some() {
            DownloadMode::Selective
        } else {
            DownloadMode::All
        }
    }

    /// Only the settings given on the command line.
    fn config_overrides(&self) -> Config {
        Config {
            path: self.output.clone(),
            merge: flag_pair(self.merge, self.no_merge),
            debug: self.debug.then_some(true),
            multi: self.multi,
            zip: flag_pair(self.zip, self.no_zip),
            keep_files: flag_pair(self.keep_files, self.no_keep_files),
            user_agent: self.user_agent.clone(),
            request_delay_ms: self.delay,
            timeout_secs: self.timeout,
            ..Config::default()
        }
    }
}

/// Highest episode number accepted in a selection.
const MAX_EPISODE_NUMBER: u32 = 100_000;
/// Answers read before the prompt gives up on unparseable input.
const PROMPT_ATTEMPTS: usize = 3;

fn parse_range(token: &str) -> Result<(u32, u32), String> {
    let parse_one = |s: &str| -> Result<u32, String> {
        let s = s.trim();
        let n: u32 = s
            .parse()
            .map_err(|_| format!("'{}' is not a valid episode number", s))?;
        if n == 0 {
            return Err("episode numbers start at 1".to_string());
        }
        if n > MAX_EPISODE_NUMBER {
            return Err(format!(
                "episode {} is above the supported maximum ({})",
                n, MAX_EPISODE_NUMBER
            ));
        }
        Ok(n)
    };
    match token.split_once('-') {
        Some((from_str, to_str)) => {
            let from = parse_one(from_str)?;
            let to = parse_one(to_str)?;
            if from > to {
                return Err(format!("start ({}) must be <= end ({})", from, to));
            }
            Ok((from, to))
        }
        None => {
            let n = parse_one(token)?;
            Ok((n, n))
        }
    }
}

/// `1-3,7` -> [1, 2, 3, 7]. Whitespace around tokens is ignored; blank input is an
/// empty selection.
fn parse_selection(s: &str) -> Result<Vec<u32>, String> {
    let mut seqs = Vec::new();
    for token in s.split(',').map(str::trim) {
        if token.is_empty() {
            continue;
        }
        let (from, to) = parse_range(token)?;
        seqs.extend(from..=to);
    }
    seqs.sort_unstable();
    seqs.dedup();
    Ok(seqs)
}

/// `--episodes` value parser. Unlike the prompt, an empty list is rejected.
pub fn parse_episode_list(s: &str) -> Result<EpisodeList, String> {
    let seqs = parse_selection(s).map_err(|e| format!("Invalid --episodes: {}", e))?;
    if seqs.is_empty() {
        return Err(format!(
            "Invalid --episodes: expected numbers or ranges (e.g. 1-3,7), got '{}'",
            s.trim()
        ));
    }
    Ok(EpisodeList(seqs))
}

/// Prints the episode list to stderr and reads the choice from `input`.
///
/// A blank answer (or end of input) selects nothing. Unparseable answers are asked
/// again, up to [PROMPT_ATTEMPTS] times.
pub struct PromptSelector<R> {
    input: RefCell<R>,
}

impl<R: BufRead> PromptSelector<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: RefCell::new(input),
        }
    }
}

impl PromptSelector<std::io::StdinLock<'static>> {
    pub fn stdin() -> Self {
        Self::new(std::io::stdin().lock())
    }
}

impl<R: BufRead> EpisodeSelector for PromptSelector<R> {
    fn select(&self, series_title: &str, episodes: &[EpisodeRef]) -> Result<Vec<u32>, String> {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{} ({} episodes)", series_title, episodes.len());
        for ep in episodes {
            let _ = writeln!(err, "  {:>4}  {}", ep.sequence, ep.title);
        }

        let mut last_error = String::new();
        for _ in 0..PROMPT_ATTEMPTS {
            let _ = write!(err, "Episodes to download (e.g. 1-3,7, all, or blank for none): ");
            let _ = err.flush();

            let mut line = String::new();
            let read = self
                .input
                .borrow_mut()
                .read_line(&mut line)
                .map_err(|e| format!("cannot read selection: {}", e))?;
            if read == 0 {
                return Ok(Vec::new());
            }
            let line = line.trim();
            if line.eq_ignore_ascii_case("all") {
                return Ok(episodes.iter().map(|e| e.sequence).collect());
            }
            match parse_selection(line) {
                Ok(seqs) => return Ok(seqs),
                Err(e) => {
                    let _ = writeln!(err, "Not a valid selection: {}. Try again.", e);
                    last_error = e;
                }
            }
        }
        Err(format!(
            "no valid selection after {} answers (last: {})",
            PROMPT_ATTEMPTS, last_error
        ))
    }
}

/// Per-episode progress bar driven by pipeline events.
struct ProgressUi {
    bar: Mutex<Option<indicatif::ProgressBar>>,
}

impl ProgressUi {
    fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn handle(&self, event: ProgressEvent<'_>) {
        let mut bar = match self.bar.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match event {
            ProgressEvent::SeriesResolved { title, episodes } => {
                eprintln!("{}: {} episodes", title, episodes);
            }
            ProgressEvent::EpisodeStarted { episode, images } => {
                let pb = indicatif::ProgressBar::new(images as u64);
                if let Ok(style) = indicatif::ProgressStyle::default_bar()
                    .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
                {
                    pb.set_style(
                        style
                            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                            .progress_chars("█▉▊▋▌▍▎▏ "),
                    );
                }
                pb.enable_steady_tick(Duration::from_millis(80));
                pb.set_message(format!("{:03} {}", episode.sequence, episode.title));
                *bar = Some(pb);
            }
            ProgressEvent::ImageFinished { .. } => {
                if let Some(pb) = bar.as_ref() {
                    pb.inc(1);
                }
            }
            ProgressEvent::EpisodeFinished { summary } => {
                if let Some(pb) = bar.take() {
                    pb.disable_steady_tick();
                    pb.finish_and_clear();
                }
                eprintln!(
                    "{:03} {}: {}/{} images",
                    summary.sequence,
                    summary.title,
                    summary.succeeded,
                    summary.succeeded + summary.failed
                );
            }
        }
    }
}

fn step_label(step: &StepStatus) -> String {
    match step {
        StepStatus::Disabled => "off".to_string(),
        StepStatus::Done { .. } => "done".to_string(),
        StepStatus::Skipped { reason } => format!("skipped ({})", reason),
        StepStatus::Failed { error } => format!("failed ({})", error),
    }
}

/// Multi-line summary of a finished run.
fn render_summary(report: &RunReport) -> String {
    let mut out = format!("{}\n", report.series_title);
    for ep in &report.episodes {
        let state = match &ep.status {
            EpisodeStatus::Completed => "ok".to_string(),
            EpisodeStatus::Partial => "partial".to_string(),
            EpisodeStatus::EpisodeFailed { cause } => format!("failed: {}", cause),
        };
        out.push_str(&format!(
            "  {:03} {} | {} | {} ok, {} failed | merge {} | zip {}\n",
            ep.sequence,
            ep.title,
            state,
            ep.succeeded,
            ep.failed,
            step_label(&ep.merge),
            step_label(&ep.archive)
        ));
        for failure in &ep.failures {
            out.push_str(&format!(
                "      image {:03}: {} ({})\n",
                failure.position, failure.cause, failure.source_url
            ));
        }
    }
    if report.cancelled {
        out.push_str("  cancelled before all episodes were processed\n");
    }
    out
}

fn write_report(path: &Path, report: &RunReport) -> Result<(), CliRunError> {
    let to_err = |source: std::io::Error| CliRunError::Report {
        path: path.to_path_buf(),
        source,
    };
    let f = std::fs::File::create(path).map_err(to_err)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(f), report)
        .map_err(|e| to_err(std::io::Error::from(e)))
}

fn build_client(settings: &Settings) -> Result<PoliteClient, CliRunError> {
    let mut builder = PoliteClient::builder()
        .delay_ms(settings.request_delay_ms)
        .timeout_secs(settings.timeout_secs);
    if let Some(ua) = &settings.user_agent {
        builder = builder.user_agent(ua.clone());
    }
    builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))
}

fn retry_policy(settings: &Settings) -> RetryPolicy {
    RetryPolicy::new(
        settings.retry_count,
        settings
            .retry_backoff_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect(),
    )
}

/// Entry point for the CLI. Returns Ok(()) on success, including partial success.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let target = SeriesTarget::new(&args.url, args.mode()).map_err(|reason| {
        CliRunError::InvalidInput(format!(
            "Expected a series URL such as https://site.example/series/123. Invalid: {}: {}",
            args.url, reason
        ))
    })?;

    let loaded = config::load_config()?;
    let (config_path, file_config) = match loaded {
        Some((path, c)) => (Some(path), c),
        None => (None, Config::default()),
    };
    let settings = Settings::resolve(file_config, args.config_overrides())?;
    crate::logging::init(settings.debug, args.verbose, args.quiet);

    if args.save_config {
        let path = match config_path {
            Some(p) => p,
            None => config::config_search_paths()?
                .into_iter()
                .next()
                .unwrap_or_else(|| PathBuf::from(config::CONFIG_FILE_NAME)),
        };
        config::save_config(&path, &settings.to_config())?;
        tracing::info!(path = %path.display(), "saved config");
    }

    let client = build_client(&settings)?;
    let selectors = settings
        .selectors
        .compile()
        .map_err(|e| CliRunError::Config(ConfigError::Invalid(e)))?;
    let retry = retry_policy(&settings);

    let selector: Box<dyn EpisodeSelector> = match &args.episodes {
        Some(list) => Box::new(FixedSelection(list.0.clone())),
        None => Box::new(PromptSelector::stdin()),
    };

    if args.dry_run {
        let series = SeriesResolver::new(&client, &selectors, &retry)
            .resolve(&target, selector.as_ref())?;
        println!("{} ({} episodes)", series.title, series.episodes.len());
        for ep in &series.episodes {
            println!("  {:03}  {}  {}", ep.sequence, ep.title, ep.source_url);
        }
        eprintln!("Output: {}", settings.path.display());
        return Ok(());
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    if let Err(e) = ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
        eprintln!("Cancelling after the current episode...");
    }) {
        tracing::warn!(error = %e, "could not install Ctrl-C handler");
    }

    let options = PipelineOptions {
        destination: settings.path.clone(),
        budget: PoolBudget::from_level(settings.multi),
        merge: settings.merge,
        compress: settings.zip,
        keep_files: settings.keep_files,
        debug: settings.debug,
        retry,
        selectors,
    };
    tracing::debug!(
        level = options.budget.level(),
        workers = options.budget.workers(),
        "worker budget"
    );

    let ui = ProgressUi::new();
    let progress_cb = |event: ProgressEvent<'_>| ui.handle(event);
    let mut pipeline = Pipeline::new(&client, &options).with_cancel(&cancel);
    if !args.quiet {
        pipeline = pipeline.with_progress(&progress_cb);
    }
    let report = pipeline.run(&target, selector.as_ref())?;

    if let Some(path) = &args.report {
        write_report(path, &report)?;
    }
    if !args.quiet {
        eprint!("{}", render_summary(&report));
    }

    if report.cancelled {
        return Err(CliRunError::Cancelled);
    }
    let failed = report.failed_episodes();
    if !report.episodes.is_empty() && failed == report.episodes.len() {
        return Err(CliRunError::AllEpisodesFailed { count: failed });
    }
    Ok(())
}
