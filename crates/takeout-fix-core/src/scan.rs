//! Walk the input tree once: media entries, the sidecar index, and
//! everything else that will not be processed.

use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::formats::FormatTable;
use crate::media::{self, MediaEntry};
use crate::sidecar::SidecarIndex;
use crate::ThrottledProgress;

/// Finder metadata, never reported
const IGNORED_NAMES: &[&str] = &[".DS_Store"];

/// A file that is neither supported media nor a sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsupportedFile {
    pub relative: PathBuf,
    /// The extension guesses as image/video, i.e. a format missing from the table
    pub looks_like_media: bool,
}

/// Entry the walk could not read (permissions, symlink cycles...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanError {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub media: Vec<MediaEntry>,
    pub sidecars: SidecarIndex,
    pub unsupported: Vec<UnsupportedFile>,
    pub errors: Vec<ScanError>,
    /// Every regular file seen, sidecars included
    pub total_files: u64,
}

/// Walk `root`, following symlinks. Unreadable entries are recorded and skipped.
pub fn scan_input(root: &Path, formats: &FormatTable, progress: &ThrottledProgress) -> ScanResult {
    let mut result = ScanResult::default();

    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                let message = match e.loop_ancestor() {
                    Some(ancestor) => format!("symlink loop back to {}", ancestor.display()),
                    None => e.to_string(),
                };
                tracing::warn!(path = %path.display(), "skipping unreadable entry: {}", message);
                result.errors.push(ScanError { path, message });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if IGNORED_NAMES.contains(&name.as_ref()) {
            continue;
        }

        let path = entry.path();
        result.total_files += 1;
        progress.report("scan", result.total_files - 1, 0, "Scanning input");

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();

        if extension == "json" {
            result.sidecars.insert(path);
            continue;
        }

        match formats.category_of(path) {
            Some(category) => {
                result.media.push(MediaEntry {
                    source: path.to_path_buf(),
                    relative,
                    category,
                    extension,
                });
            }
            None => {
                let looks_like_media = mime_guess::from_path(path)
                    .first()
                    .is_some_and(|m| {
                        m.type_() == mime_guess::mime::IMAGE || m.type_() == mime_guess::mime::VIDEO
                    });
                if looks_like_media {
                    tracing::warn!(
                        path = %relative.display(),
                        "media-like file with an unlisted format"
                    );
                } else {
                    tracing::debug!(path = %relative.display(), "not processed");
                }
                result.unsupported.push(UnsupportedFile {
                    relative,
                    looks_like_media,
                });
            }
        }
    }

    media::classify_live_photos(&mut result.media);
    tracing::info!(
        files = result.total_files,
        media = result.media.len(),
        sidecars = result.sidecars.len(),
        unsupported = result.unsupported.len(),
        "scan complete"
    );
    result
}
