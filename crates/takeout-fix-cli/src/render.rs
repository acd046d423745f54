use takeout_fix_core::report::UNPROCESSED_REPORT;
use takeout_fix_core::tags::exif_datetime;
use takeout_fix_core::{RunOptions, Summary};

/// Failures listed inline before pointing at --summary-json
const MAX_LISTED_FAILURES: usize = 20;

fn date(epoch: Option<i64>) -> String {
    epoch
        .and_then(exif_datetime)
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn print_summary(summary: &Summary, options: &RunOptions) {
    println!("=== Summary ===");
    println!("Files in input:        {}", summary.total_files);
    println!("Media files:           {}", summary.total_media);
    println!("Sidecars found:        {}", summary.sidecars);
    println!(
        "Repaired with metadata: {} ({:.1}%)",
        summary.with_metadata,
        summary.metadata_coverage()
    );
    println!("Copied without metadata: {}", summary.no_metadata);
    if options.debug {
        println!("Undated (debug copies): {}", summary.skipped_debug);
    }
    println!("Errors:                {}", summary.errors);
    println!();
    println!("EXIF dates written:    {}", summary.exif_dates_written);
    println!("GPS written:           {}", summary.gps_written);
    println!("Descriptions written:  {}", summary.descriptions_written);
    println!("Timestamps only (no EXIF support): {}", summary.exif_unsupported);

    if !summary.by_extension.is_empty() {
        println!("\n--- By extension ---");
        for (ext, stats) in &summary.by_extension {
            println!(
                "  {:<6} {:>7} total {:>7} with metadata {:>5} errors",
                ext, stats.total, stats.with_metadata, stats.errors
            );
        }
    }

    if let Some(sample) = &summary.sample {
        println!("\n--- Sample ---");
        println!("  {}", sample.relative.display());
        if let Some(sidecar) = &sample.sidecar {
            println!("  sidecar: {}", sidecar.display());
        }
        println!("  {} -> {}", date(sample.original), date(Some(sample.corrected)));
    }

    if !summary.failures.is_empty() {
        println!("\n--- Errors (first {}) ---", MAX_LISTED_FAILURES);
        for failure in summary.failures.iter().take(MAX_LISTED_FAILURES) {
            println!("  {}: {}", failure.relative.display(), failure.reason);
        }
        if summary.failures.len() > MAX_LISTED_FAILURES {
            println!("  ... and {} more", summary.failures.len() - MAX_LISTED_FAILURES);
        }
        println!("  Copies are in {}", options.error.display());
    }

    if !summary.unsupported.is_empty() || !summary.scan_errors.is_empty() {
        println!(
            "\nNot processed: {} files ({} look like media in an unlisted format), {} unreadable entries",
            summary.unsupported.len(),
            summary.unsupported_media_like(),
            summary.scan_errors.len()
        );
        println!("  Listed in {}", options.error.join(UNPROCESSED_REPORT).display());
    }

    if summary.cancelled {
        println!("\nCancelled: {} media files were not processed", summary.not_processed);
    }
}
