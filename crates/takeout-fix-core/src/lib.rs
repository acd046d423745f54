pub mod cancel;
pub mod compare;
pub mod dispatch;
pub mod error;
pub mod extras;
pub mod formats;
pub mod media;
pub mod metadata;
pub mod outcome;
pub mod repair;
pub mod report;
pub mod scan;
pub mod sidecar;
pub mod tags;
pub mod timestamps;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

pub use cancel::{CancellationToken, CancelledError};
pub use error::SetupError;
pub use formats::{FormatTable, MediaCategory};
pub use repair::RetryPolicy;
pub use report::Summary;

use repair::RepairContext;
use report::Aggregator;
use tags::{ExifTagEditor, TagEditor};
use timestamps::TimestampSetter;

/// Finder metadata tolerated in otherwise empty output/error directories
const IGNORABLE_ENTRIES: &[&str] = &[".DS_Store"];

fn default_windows_timestamps() -> bool {
    cfg!(windows)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Extracted Takeout tree; never modified
    pub input: PathBuf,
    /// Repaired copies, mirroring the input layout
    pub output: PathBuf,
    /// Failed files with their sidecars, plus the not-processed listing
    pub error: PathBuf,
    /// Worker count; None uses 75% of logical cores
    #[serde(default)]
    pub parallelism: Option<usize>,
    #[serde(default)]
    pub allow_oversubscribe: bool,
    /// Also route files whose date could not be changed into the error tree
    #[serde(default)]
    pub debug: bool,
    /// Apply creation time too (Windows file-time rules)
    #[serde(default = "default_windows_timestamps")]
    pub windows_timestamps: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub formats: FormatTable,
}

impl RunOptions {
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        error: impl Into<PathBuf>,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            error: error.into(),
            parallelism: None,
            allow_oversubscribe: false,
            debug: false,
            windows_timestamps: default_windows_timestamps(),
            retry: RetryPolicy::default(),
            formats: FormatTable::default(),
        }
    }
}

/// Control options for a run (cancellation).
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
        self.cancel_token.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

/// The EXIF and timestamp capabilities a run uses.
#[derive(Clone)]
pub struct Collaborators {
    pub tags: Arc<dyn TagEditor>,
    pub times: Arc<dyn TimestampSetter>,
}

impl Collaborators {
    pub fn for_options(options: &RunOptions) -> Self {
        Self {
            tags: Arc::new(ExifTagEditor),
            times: timestamps::for_platform(options.windows_timestamps),
        }
    }
}

/// Type alias for progress callback: (stage, current, total, message).
/// `total` is 0 while the scan does not know it yet.
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str) + Send + Sync;

/// Throttled progress reporter: emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback,
    last_emit: std::sync::Mutex<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback) -> Self {
        Self {
            inner,
            last_emit: std::sync::Mutex::new(Instant::now() - std::time::Duration::from_secs(1)),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = total > 0 && current + 1 >= total;
        if !is_done {
            let mut last = self.last_emit.lock().unwrap_or_else(|e| e.into_inner());
            if last.elapsed().as_millis() < 200 {
                return;
            }
            *last = Instant::now();
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Run the full repair pipeline with progress reporting.
pub fn process(
    options: &RunOptions,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<Summary> {
    process_with_control(options, &ProcessControl::default(), progress_callback)
}

/// Run the full repair pipeline with progress reporting and control options.
pub fn process_with_control(
    options: &RunOptions,
    control: &ProcessControl,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<Summary> {
    process_with(options, control, &Collaborators::for_options(options), progress_callback)
}

/// Same as [`process_with_control`] with explicit EXIF/timestamp capabilities.
pub fn process_with(
    options: &RunOptions,
    control: &ProcessControl,
    collaborators: &Collaborators,
    progress_callback: &ProgressCallback,
) -> anyhow::Result<Summary> {
    let tp = ThrottledProgress::new(progress_callback);

    if let Some(ref token) = control.cancel_token {
        token.check()?;
    }

    validate_directories(options)?;

    // Stage 1: scan the input tree
    let scan = scan::scan_input(&options.input, &options.formats, &tp);
    tp.report("scan", scan.total_files.saturating_sub(1), scan.total_files, "Scan complete");
    let aggregator = Aggregator::from_scan(&scan);

    // Stage 2: group companions and resolve their sidecars
    let groups = media::group_companions(scan.media);
    let plans = dispatch::plan_groups(groups, &scan.sidecars);

    // Stage 3: repair
    let workers = dispatch::resolve_parallelism(options.parallelism, options.allow_oversubscribe);
    let ctx = RepairContext {
        output_root: options.output.clone(),
        error_root: options.error.clone(),
        debug: options.debug,
        retry: options.retry,
        tags: collaborators.tags.clone(),
        times: collaborators.times.clone(),
    };
    let aggregator = dispatch::dispatch(
        &plans,
        &ctx,
        workers,
        control.cancel_token.as_ref(),
        aggregator,
        &tp,
    )?;

    let summary = aggregator.finish(control.is_cancelled());
    if summary.cancelled {
        tracing::warn!(not_processed = summary.not_processed, "run cancelled");
    }

    match report::write_unprocessed_report(&options.error, &summary) {
        Ok(Some(path)) => tracing::info!(path = %path.display(), "wrote not-processed listing"),
        Ok(None) => {}
        Err(e) => tracing::warn!("cannot write not-processed listing: {}", e),
    }

    tracing::info!(
        processed = summary.processed,
        with_metadata = summary.with_metadata,
        errors = summary.errors,
        "run complete"
    );
    Ok(summary)
}

/// Check the three roots before any file is touched. Output and error roots
/// are created when missing.
pub fn validate_directories(options: &RunOptions) -> Result<(), SetupError> {
    let input = &options.input;
    if !input.exists() {
        return Err(SetupError::MissingInput(input.clone()));
    }
    if !input.is_dir() {
        return Err(SetupError::InputNotDirectory(input.clone()));
    }
    let io_err = |role: &'static str, path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| SetupError::Io { role, path, source }
    };
    let mut entries = fs::read_dir(input).map_err(io_err("input", input.as_path()))?;
    if entries.next().is_none() {
        return Err(SetupError::EmptyInput(input.clone()));
    }

    let input_real = input.canonicalize().map_err(io_err("input", input.as_path()))?;
    let output_real =
        resolve_path(&options.output).map_err(io_err("output", options.output.as_path()))?;
    let error_real =
        resolve_path(&options.error).map_err(io_err("error", options.error.as_path()))?;

    if output_real == error_real {
        return Err(SetupError::SameRoots(options.output.clone()));
    }
    for (role, path, real) in [
        ("output", &options.output, &output_real),
        ("error", &options.error, &error_real),
    ] {
        if real.starts_with(&input_real) {
            return Err(SetupError::InsideInput {
                role,
                path: path.clone(),
            });
        }
    }
    for (role, path) in [("output", &options.output), ("error", &options.error)] {
        prepare_empty_dir(role, path)?;
    }
    Ok(())
}

/// Create `path` if missing; otherwise it must hold nothing but ignorable
/// entries. Either way it must accept new files.
fn prepare_empty_dir(role: &'static str, path: &Path) -> Result<(), SetupError> {
    let io_err = |source: io::Error| SetupError::Io {
        role,
        path: path.to_path_buf(),
        source,
    };
    if path.exists() {
        if !path.is_dir() {
            return Err(SetupError::NotEmpty {
                role,
                path: path.to_path_buf(),
            });
        }
        for entry in fs::read_dir(path).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let name = entry.file_name();
            if !IGNORABLE_ENTRIES.iter().any(|ignored| name == *ignored) {
                return Err(SetupError::NotEmpty {
                    role,
                    path: path.to_path_buf(),
                });
            }
        }
    } else {
        fs::create_dir_all(path).map_err(io_err)?;
    }
    // Anonymous file, gone as soon as it is dropped
    tempfile::tempfile_in(path).map_err(io_err)?;
    Ok(())
}

/// Canonical form of a path that may not exist yet: the deepest existing
/// ancestor is canonicalized and the rest appended.
fn resolve_path(path: &Path) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(absolute),
        }
    }
    let mut resolved = existing.canonicalize()?;
    for name in missing.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
