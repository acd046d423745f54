use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::formats::MediaCategory;

/// A supported media file found under the input root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEntry {
    /// Absolute (or input-rooted) source path
    pub source: PathBuf,
    /// Path relative to the input root, mirrored into the output/error trees
    pub relative: PathBuf,
    pub category: MediaCategory,
    /// Lowercase extension without the dot
    pub extension: String,
}

impl MediaEntry {
    pub fn file_name(&self) -> &str {
        self.source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
    }

    /// Directory holding the source file (and its sidecars).
    pub fn directory(&self) -> &Path {
        self.source.parent().unwrap_or_else(|| Path::new(""))
    }

    /// Grouping key: same directory, same stem (case-insensitive).
    pub fn companion_key(&self) -> (PathBuf, String) {
        let stem = self
            .source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();
        (self.directory().to_path_buf(), stem)
    }
}

/// Files sharing a base name (e.g. `IMG_0001.HEIC` + `IMG_0001.MOV`).
/// All members receive the metadata of one sidecar.
#[derive(Debug, Clone)]
pub struct CompanionGroup {
    /// Stills first, then videos; ties broken by file name.
    pub members: Vec<MediaEntry>,
}

impl CompanionGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Mark videos that accompany a still as Live Photo components.
pub fn classify_live_photos(media: &mut [MediaEntry]) {
    let mut has_still: BTreeMap<(PathBuf, String), bool> = BTreeMap::new();
    for m in media.iter() {
        let entry = has_still.entry(m.companion_key()).or_insert(false);
        *entry |= m.category.is_still();
    }
    for m in media.iter_mut() {
        if m.category == MediaCategory::Video && has_still.get(&m.companion_key()) == Some(&true) {
            m.category = MediaCategory::LivePhotoVideo;
        }
    }
}

/// Partition media into companion groups. Singletons form groups of one.
/// Output order is deterministic (by directory, then stem).
pub fn group_companions(media: Vec<MediaEntry>) -> Vec<CompanionGroup> {
    let mut groups: BTreeMap<(PathBuf, String), Vec<MediaEntry>> = BTreeMap::new();
    for m in media {
        groups.entry(m.companion_key()).or_default().push(m);
    }

    groups
        .into_values()
        .map(|mut members| {
            members.sort_by(|a, b| {
                b.category
                    .is_still()
                    .cmp(&a.category.is_still())
                    .then_with(|| a.file_name().cmp(b.file_name()))
            });
            CompanionGroup { members }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, category: MediaCategory) -> MediaEntry {
        let source = PathBuf::from("/in").join(path);
        let extension = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        MediaEntry {
            relative: PathBuf::from(path),
            source,
            category,
            extension,
        }
    }

    #[test]
    fn test_live_photo_grouping() {
        let mut media = vec![
            entry("2021/IMG_0001.MOV", MediaCategory::Video),
            entry("2021/IMG_0001.HEIC", MediaCategory::Image),
            entry("2021/IMG_0002.MOV", MediaCategory::Video),
            entry("2022/IMG_0001.MOV", MediaCategory::Video),
        ];
        classify_live_photos(&mut media);
        assert_eq!(media[0].category, MediaCategory::LivePhotoVideo);
        assert_eq!(media[2].category, MediaCategory::Video);
        // Same stem in another directory is not a companion
        assert_eq!(media[3].category, MediaCategory::Video);

        let groups = group_companions(media);
        assert_eq!(groups.len(), 3);
        let pair = groups.iter().find(|g| g.len() == 2).unwrap();
        assert_eq!(pair.members[0].file_name(), "IMG_0001.HEIC");
        assert_eq!(pair.members[1].file_name(), "IMG_0001.MOV");
    }

    #[test]
    fn test_group_order_is_deterministic() {
        let a = vec![
            entry("b.jpg", MediaCategory::Image),
            entry("a.mp4", MediaCategory::Video),
            entry("a.jpg", MediaCategory::Image),
        ];
        let mut b = a.clone();
        b.reverse();
        let names = |groups: Vec<CompanionGroup>| -> Vec<String> {
            groups
                .iter()
                .flat_map(|g| g.members.iter().map(|m| m.file_name().to_string()))
                .collect()
        };
        assert_eq!(names(group_companions(a)), names(group_companions(b)));
    }
}
