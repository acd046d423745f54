mod render;

use std::path::{Path, PathBuf};

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use takeout_fix_core::{
    CancellationToken, FormatTable, MediaCategory, ProcessControl, RetryPolicy, RunOptions, Summary,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "takeout-fix",
    version,
    about = "Restore dates, GPS and descriptions in an extracted Google Photos Takeout"
)]
struct Cli {
    /// Extracted Google Photos Takeout directory (read only)
    #[arg(short, long)]
    input_dir: PathBuf,

    /// Where repaired copies are written (created if missing, must be empty)
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Where failed files and their sidecars are copied (created if missing, must be empty)
    #[arg(short, long)]
    error_dir: PathBuf,

    /// Number of parallel workers (default: 75% of logical cores)
    #[arg(short, long)]
    parallel: Option<usize>,

    /// Allow --parallel above the default cap
    #[arg(long)]
    force_parallel: bool,

    /// Also copy files whose date could not be changed into the error directory
    #[arg(short, long)]
    debug: bool,

    /// Extra media format, e.g. --format jxl=image (repeatable)
    #[arg(long = "format", value_name = "EXT=CATEGORY", value_parser = FormatTable::parse_entry)]
    formats: Vec<(String, MediaCategory)>,

    /// JSON object of extension -> category merged into the format table
    #[arg(long = "formats", value_name = "FILE")]
    formats_file: Option<PathBuf>,

    /// Attempts per filesystem operation before giving up
    #[arg(long, default_value_t = RetryPolicy::default().attempts)]
    retries: u32,

    /// Set creation time as well (default on Windows)
    #[arg(long)]
    windows_timestamps: bool,

    /// Write the full summary as JSON
    #[arg(long, value_name = "FILE")]
    summary_json: Option<PathBuf>,

    /// Show per-file log lines
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let t_total = std::time::Instant::now();

    let mut formats = FormatTable::default();
    if let Some(path) = &cli.formats_file {
        formats.merge(&FormatTable::from_json_file(path)?);
    }
    for (ext, category) in &cli.formats {
        formats.insert(ext, *category);
    }
    let listed: Vec<String> = formats.extensions().map(|(e, c)| format!("{}={}", e, c)).collect();
    tracing::info!(count = formats.len(), formats = %listed.join(" "), "media formats");

    let mut options = RunOptions::new(cli.input_dir, cli.output_dir, cli.error_dir);
    options.parallelism = cli.parallel;
    options.allow_oversubscribe = cli.force_parallel;
    options.debug = cli.debug;
    options.windows_timestamps |= cli.windows_timestamps;
    options.retry.attempts = cli.retries.max(1);
    options.formats = formats;
    tracing::debug!(?options, "starting run");

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling: finishing files in progress...");
        handler_token.cancel();
    })?;
    let control = ProcessControl::new().with_cancel_token(token);

    let pb = ProgressBar::new_spinner();
    let progress_bar = pb.clone();
    let on_progress = move |stage: &str, current: u64, total: u64, message: &str| {
        match stage {
            "repair" => {
                if pb.length() != Some(total) {
                    pb.set_length(total);
                    pb.set_style(
                        ProgressStyle::default_bar()
                            .template("[{bar:40}] {pos}/{len} {msg}")
                            .unwrap_or_else(|_| ProgressStyle::default_bar()),
                    );
                }
                pb.set_position(current + 1);
                pb.set_message(message.to_string());
            }
            _ => pb.set_message(format!("[{}] {} files {}", stage, current + 1, message)),
        }
    };
    let result = takeout_fix_core::process_with_control(&options, &control, &on_progress);
    progress_bar.finish_and_clear();
    let summary = result?;

    render::print_summary(&summary, &options);
    eprintln!("Done in {:.2}s", t_total.elapsed().as_secs_f64());

    if let Some(path) = &cli.summary_json {
        match write_summary_json(path, &summary) {
            Ok(()) => eprintln!("Summary written to {}", path.display()),
            Err(e) => tracing::warn!(path = %path.display(), "cannot write summary JSON: {:#}", e),
        }
    }

    Ok(())
}

fn write_summary_json(path: &Path, summary: &Summary) -> anyhow::Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(summary)?)?;
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info,takeout_fix_core=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
