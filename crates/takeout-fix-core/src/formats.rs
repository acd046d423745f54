use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What kind of media a file is, as far as repair is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaCategory {
    Image,
    Video,
    Raw,
    /// The motion half of a Live Photo / motion photo pair.
    LivePhotoVideo,
}

impl MediaCategory {
    /// Stills are the preferred source of a companion group's sidecar.
    pub fn is_still(self) -> bool {
        matches!(self, MediaCategory::Image | MediaCategory::Raw)
    }
}

impl fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MediaCategory::Image => "image",
            MediaCategory::Video => "video",
            MediaCategory::Raw => "raw",
            MediaCategory::LivePhotoVideo => "live-photo-video",
        };
        f.write_str(s)
    }
}

impl FromStr for MediaCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "image" | "photo" => Ok(MediaCategory::Image),
            "video" => Ok(MediaCategory::Video),
            "raw" => Ok(MediaCategory::Raw),
            other => Err(format!("unknown media category '{}' (expected image, video or raw)", other)),
        }
    }
}

const DEFAULT_IMAGES: &[&str] = &[
    "jpg", "jpeg", "heic", "heif", "png", "gif", "webp", "tif", "tiff", "bmp",
];
const DEFAULT_VIDEOS: &[&str] = &["mp4", "mov", "avi", "mkv", "m4v", "3gp", "mts"];
const DEFAULT_RAWS: &[&str] = &[
    "nef", // Nikon
    "dng", // Digital Negative
    "raw", // General RAW
    "cr2", // Canon Raw 2
    "cr3", // Canon Raw 3
    "arw", // Sony
    "orf", // Olympus
    "rw2", // Panasonic
    "pef", // Pentax
    "raf", // Fujifilm
];

/// Supported extensions and their categories. Keys are lowercase, without the dot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormatTable {
    extensions: BTreeMap<String, MediaCategory>,
}

impl Default for FormatTable {
    fn default() -> Self {
        let mut table = Self { extensions: BTreeMap::new() };
        for (list, category) in [
            (DEFAULT_IMAGES, MediaCategory::Image),
            (DEFAULT_VIDEOS, MediaCategory::Video),
            (DEFAULT_RAWS, MediaCategory::Raw),
        ] {
            for ext in list {
                table.insert(ext, category);
            }
        }
        table
    }
}

impl FormatTable {
    /// Register (or override) an extension. A leading dot and case are ignored.
    pub fn insert(&mut self, extension: &str, category: MediaCategory) {
        self.extensions.insert(normalize_extension(extension), category);
    }

    /// Merge another table over this one; entries in `other` win.
    pub fn merge(&mut self, other: &FormatTable) {
        for (ext, category) in &other.extensions {
            self.extensions.insert(ext.clone(), *category);
        }
    }

    /// Load a `{"ext": "category"}` JSON file.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        let raw: BTreeMap<String, MediaCategory> = serde_json::from_slice(&bytes)?;
        let mut table = Self { extensions: BTreeMap::new() };
        for (ext, category) in raw {
            table.insert(&ext, category);
        }
        Ok(table)
    }

    /// Parse an `EXT=CATEGORY` pair as given on the command line.
    pub fn parse_entry(entry: &str) -> Result<(String, MediaCategory), String> {
        let (ext, category) = entry
            .split_once('=')
            .ok_or_else(|| format!("expected EXT=CATEGORY, got '{}'", entry))?;
        let ext = normalize_extension(ext);
        if ext.is_empty() {
            return Err(format!("empty extension in '{}'", entry));
        }
        Ok((ext, category.parse()?))
    }

    pub fn category_of(&self, path: &Path) -> Option<MediaCategory> {
        let ext = path.extension()?.to_str()?;
        self.extensions.get(&normalize_extension(ext)).copied()
    }

    /// Every known extension with its category, sorted by extension.
    pub fn extensions(&self) -> impl Iterator<Item = (&str, MediaCategory)> {
        self.extensions.iter().map(|(e, c)| (e.as_str(), *c))
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

/// Lowercase extension without the leading dot.
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}
