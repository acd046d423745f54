use std::path::PathBuf;

use serde::Serialize;

use crate::formats::MediaCategory;
use crate::media::MediaEntry;

/// How one media file left the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "kebab-case")]
pub enum OutcomeKind {
    /// Sidecar with a photo-taken time was applied
    CopiedWithMetadata,
    /// Copied as-is (no sidecar, or no usable date in it)
    CopiedNoMetadata,
    /// Debug mode: nothing changed the file's date, so it was also copied to the error tree
    SkippedDebugNoDateChange,
    Error(String),
}

/// Which tag groups were written into the output file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Enrichment {
    pub exif_dates: bool,
    pub gps: bool,
    pub description: bool,
    /// Had metadata to write but the format cannot carry EXIF here
    pub exif_unsupported: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimestampChange {
    /// Source modification time before the repair
    pub original: Option<i64>,
    pub corrected: i64,
}

/// Result record for one media file, sent from a worker to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub relative: PathBuf,
    pub extension: String,
    pub category: MediaCategory,
    pub kind: OutcomeKind,
    pub enrichment: Enrichment,
    pub timestamps: Option<TimestampChange>,
    pub sidecar: Option<PathBuf>,
}

impl Outcome {
    pub fn new(entry: &MediaEntry, kind: OutcomeKind, sidecar: Option<PathBuf>) -> Self {
        Self {
            relative: entry.relative.clone(),
            extension: entry.extension.clone(),
            category: entry.category,
            kind,
            enrichment: Enrichment::default(),
            timestamps: None,
            sidecar,
        }
    }

    pub fn error(entry: &MediaEntry, reason: impl Into<String>, sidecar: Option<PathBuf>) -> Self {
        Self::new(entry, OutcomeKind::Error(reason.into()), sidecar)
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.kind, OutcomeKind::Error(_))
    }

    pub fn error_reason(&self) -> Option<&str> {
        match &self.kind {
            OutcomeKind::Error(reason) => Some(reason),
            _ => None,
        }
    }
}
