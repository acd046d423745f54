//! Outcome aggregation and the end-of-run summary.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::outcome::{Outcome, OutcomeKind};
use crate::scan::{ScanError, ScanResult, UnsupportedFile};

/// Name of the not-processed listing written into the error root.
pub const UNPROCESSED_REPORT: &str = "unprocessed.txt";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtensionStats {
    pub total: u64,
    pub with_metadata: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileError {
    pub relative: PathBuf,
    pub reason: String,
}

/// One repaired file shown as an example of what changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleFile {
    pub relative: PathBuf,
    pub sidecar: Option<PathBuf>,
    pub original: Option<i64>,
    pub corrected: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// Regular files seen by the scan, sidecars included
    pub total_files: u64,
    /// Supported media files
    pub total_media: u64,
    pub sidecars: u64,
    pub processed: u64,
    pub with_metadata: u64,
    pub no_metadata: u64,
    pub skipped_debug: u64,
    pub errors: u64,
    /// Media never started because the run was cancelled
    pub not_processed: u64,
    pub exif_dates_written: u64,
    pub gps_written: u64,
    pub descriptions_written: u64,
    pub exif_unsupported: u64,
    pub by_extension: BTreeMap<String, ExtensionStats>,
    pub failures: Vec<FileError>,
    pub unsupported: Vec<UnsupportedFile>,
    pub scan_errors: Vec<ScanError>,
    pub sample: Option<SampleFile>,
    pub cancelled: bool,
}

impl Summary {
    pub fn succeeded(&self) -> u64 {
        self.processed - self.errors
    }

    pub fn unsupported_media_like(&self) -> usize {
        self.unsupported.iter().filter(|u| u.looks_like_media).count()
    }

    /// Percentage of processed media that got a date from a sidecar.
    pub fn metadata_coverage(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        self.with_metadata as f64 * 100.0 / self.processed as f64
    }
}

/// Single-owner accumulator; fed from the dispatch channel only.
#[derive(Debug, Default)]
pub struct Aggregator {
    summary: Summary,
}

impl Aggregator {
    pub fn from_scan(scan: &ScanResult) -> Self {
        Self {
            summary: Summary {
                total_files: scan.total_files,
                total_media: scan.media.len() as u64,
                sidecars: scan.sidecars.len() as u64,
                unsupported: scan.unsupported.clone(),
                scan_errors: scan.errors.clone(),
                ..Default::default()
            },
        }
    }

    pub fn record(&mut self, outcome: Outcome) {
        let s = &mut self.summary;
        s.processed += 1;

        let ext = s.by_extension.entry(outcome.extension.clone()).or_default();
        ext.total += 1;
        match &outcome.kind {
            OutcomeKind::CopiedWithMetadata => {
                s.with_metadata += 1;
                ext.with_metadata += 1;
            }
            OutcomeKind::CopiedNoMetadata => s.no_metadata += 1,
            OutcomeKind::SkippedDebugNoDateChange => s.skipped_debug += 1,
            OutcomeKind::Error(reason) => {
                s.errors += 1;
                ext.errors += 1;
                s.failures.push(FileError {
                    relative: outcome.relative.clone(),
                    reason: reason.clone(),
                });
            }
        }

        let e = outcome.enrichment;
        s.exif_dates_written += u64::from(e.exif_dates);
        s.gps_written += u64::from(e.gps);
        s.descriptions_written += u64::from(e.description);
        s.exif_unsupported += u64::from(e.exif_unsupported);

        if outcome.kind == OutcomeKind::CopiedWithMetadata {
            if let Some(change) = outcome.timestamps {
                // Smallest path wins so the sample does not depend on scheduling
                let replace = s
                    .sample
                    .as_ref()
                    .map_or(true, |current| outcome.relative < current.relative);
                if replace {
                    s.sample = Some(SampleFile {
                        relative: outcome.relative,
                        sidecar: outcome.sidecar,
                        original: change.original,
                        corrected: change.corrected,
                    });
                }
            }
        }
    }

    pub fn finish(mut self, cancelled: bool) -> Summary {
        let s = &mut self.summary;
        s.failures.sort_by(|a, b| a.relative.cmp(&b.relative));
        s.not_processed = s.total_media.saturating_sub(s.processed);
        s.cancelled = cancelled;
        self.summary
    }
}

/// List every not-processed file (and scan error) under `error_root`.
pub fn write_unprocessed_report(
    error_root: &Path,
    summary: &Summary,
) -> io::Result<Option<PathBuf>> {
    if summary.unsupported.is_empty() && summary.scan_errors.is_empty() {
        return Ok(None);
    }
    let path = error_root.join(UNPROCESSED_REPORT);
    let mut out = io::BufWriter::new(fs::File::create(&path)?);
    for file in &summary.unsupported {
        let note = if file.looks_like_media { "\t(unlisted media format)" } else { "" };
        writeln!(out, "{}{}", file.relative.display(), note)?;
    }
    for error in &summary.scan_errors {
        writeln!(out, "{}\t(unreadable: {})", error.path.display(), error.message)?;
    }
    out.flush()?;
    Ok(Some(path))
}
