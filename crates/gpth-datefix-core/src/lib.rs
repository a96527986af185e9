pub mod date;
pub mod exiftool;
pub mod media;
pub mod pipeline;
pub mod report;
pub mod scan;
pub mod sidecar;
pub mod summary;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use date::{DateSource, ResolvedDate, Resolver, TimeBasis};
pub use exiftool::{ExifTool, MetadataTool};
pub use media::{MediaFile, MediaKind};
pub use pipeline::{FileError, FileReport, Outcome, Pipeline, Status};
pub use summary::RunSummary;

fn default_true() -> bool {
    true
}

fn default_exiftool() -> PathBuf {
    PathBuf::from("exiftool")
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_jobs() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Folder to reconcile, searched recursively
    pub root: PathBuf,
    /// Also set the filesystem modification time
    #[serde(default = "default_true")]
    pub set_file_time: bool,
    /// Use dates embedded in file names
    #[serde(default = "default_true")]
    pub allow_guess: bool,
    /// Also date files from screenshot/messenger style names
    #[serde(default)]
    pub extended_names: bool,
    #[serde(default)]
    pub time_basis: TimeBasis,
    #[serde(default = "default_exiftool")]
    pub exiftool: PathBuf,
    /// Per-invocation limit for the metadata tool
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Files processed concurrently; 1 keeps strict traversal order
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    /// Write a JSON report of every file here
    #[serde(default)]
    pub report: Option<PathBuf>,
}

impl RunOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            set_file_time: true,
            allow_guess: true,
            extended_names: false,
            time_basis: TimeBasis::default(),
            exiftool: default_exiftool(),
            timeout_secs: default_timeout_secs(),
            jobs: default_jobs(),
            report: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub summary: RunSummary,
    /// Files found by the scan; more than `summary.total` if cancelled
    pub discovered: u64,
    pub cancelled: bool,
}

/// Token for cooperative cancellation (Ctrl-C).
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Control options for a run.
#[derive(Debug, Clone, Default)]
pub struct ProcessControl {
    pub cancel_token: Option<CancellationToken>,
}

impl ProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_token.as_ref().map_or(false, |t| t.is_cancelled())
    }
}

/// Progress callback: (stage, current, total, message). Total 0 means unknown.
pub type ProgressCallback<'a> = dyn Fn(&str, u64, u64, &str) + Send + Sync + 'a;

/// Called once per file with (report, index, total), in completion order.
pub type FileCallback<'a> = dyn Fn(&FileReport, u64, u64) + Send + Sync + 'a;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Forwards at most one update per interval. The final update of a known
/// total always goes through.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback<'a>,
    interval: Duration,
    last_emit: std::sync::Mutex<Option<Instant>>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback<'a>) -> Self {
        Self::with_interval(inner, PROGRESS_INTERVAL)
    }

    pub fn with_interval(inner: &'a ProgressCallback<'a>, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last_emit: std::sync::Mutex::new(None),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let finished = total > 0 && current >= total;
        if !finished {
            let Ok(mut last) = self.last_emit.lock() else {
                return;
            };
            if last.is_some_and(|t| t.elapsed() < self.interval) {
                return;
            }
            *last = Some(Instant::now());
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Reconcile every file under `options.root` using the exiftool executable.
pub fn process(
    options: &RunOptions,
    control: &ProcessControl,
    progress: &ProgressCallback<'_>,
    on_file: &FileCallback<'_>,
) -> anyhow::Result<RunResult> {
    let tool = ExifTool::new(&options.exiftool, Duration::from_secs(options.timeout_secs));
    process_with_tool(options, control, &tool, progress, on_file)
}

/// Same as [`process`] with any metadata tool.
pub fn process_with_tool(
    options: &RunOptions,
    control: &ProcessControl,
    tool: &dyn MetadataTool,
    progress: &ProgressCallback<'_>,
    on_file: &FileCallback<'_>,
) -> anyhow::Result<RunResult> {
    let tp = ThrottledProgress::new(progress);

    let files = scan::scan_media(&options.root, &tp)?;
    let discovered = files.len() as u64;
    info!("found {} files under {}", discovered, options.root.display());

    let resolver = Resolver::configured(options.time_basis, options.allow_guess, options.extended_names);
    let pipeline = Pipeline {
        tool,
        resolver: &resolver,
        root: Some(options.root.as_path()),
        set_file_time: options.set_file_time,
    };

    let counter = AtomicU64::new(0);
    let handle = |file: &MediaFile| -> Option<FileReport> {
        if control.is_cancelled() {
            return None;
        }
        let report = pipeline.process_file(file);
        let index = counter.fetch_add(1, Ordering::Relaxed);
        on_file(&report, index, discovered);
        Some(report)
    };

    let reports: Vec<FileReport> = if options.jobs <= 1 {
        files.iter().map_while(handle).collect()
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.jobs)
            .build()
            .context("building worker pool")?;
        pool.install(|| files.par_iter().filter_map(handle).collect::<Vec<_>>())
    };

    let summary: RunSummary = reports
        .iter()
        .map(|r| RunSummary::from_outcome(&r.outcome))
        .sum();

    if let Some(report_path) = &options.report {
        report::write_report(&reports, &summary, report_path)
            .with_context(|| format!("writing report {}", report_path.display()))?;
    }

    Ok(RunResult {
        summary,
        discovered,
        cancelled: control.is_cancelled(),
    })
}
