//! Sidecar index and the media → JSON matcher.
//!
//! Google Takeout names sidecars inconsistently (`photo.jpg.json`, `photo.json`,
//! `photo.jpg.supplemental-metadata.json`, truncated variants, counters moved
//! behind the extension...). The matcher generates candidate names in a fixed
//! order and returns the first one present in the index.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::extras;
use crate::media::{CompanionGroup, MediaEntry};

/// Google caps sidecar file names at 51 characters, i.e. 46 before `.json`.
const GOOGLE_STEM_LIMIT: usize = 46;
/// Extra characters dropped past the limit (byte/char accounting differs between exports).
const MAX_TRUNCATION_STEPS: usize = 6;

const SUPPLEMENTAL_SUFFIXES: &[&str] = &[".suppl", ".supplemental-metadata"];

static COUNTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<name>.*)(?P<counter>\(\d+\))$").unwrap());

/// All `.json` files under the input root, grouped by directory.
/// Built once by the scanner; read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct SidecarIndex {
    /// directory -> (NFC name -> on-disk name)
    dirs: HashMap<PathBuf, HashMap<String, String>>,
    count: usize,
}

impl SidecarIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &Path) {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        let dir = normalize_dir(path.parent().unwrap_or_else(|| Path::new("")));
        let key: String = name.nfc().collect();
        if self
            .dirs
            .entry(dir)
            .or_default()
            .insert(key, name.to_string())
            .is_none()
        {
            self.count += 1;
        }
    }

    /// Path of `name` in `dir` if indexed.
    pub fn lookup(&self, dir: &Path, name: &str) -> Option<PathBuf> {
        let names = self.dirs.get(&normalize_dir(dir))?;
        let key: String = name.nfc().collect();
        names.get(&key).map(|real| dir.join(real))
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl<P: AsRef<Path>> FromIterator<P> for SidecarIndex {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        let mut index = SidecarIndex::new();
        for p in iter {
            index.insert(p.as_ref());
        }
        index
    }
}

/// Collapse separator differences (`a//b`, trailing `/`, mixed separators on Windows).
fn normalize_dir(dir: &Path) -> PathBuf {
    dir.components().collect()
}

/// Resolve the sidecar for one media file, or None if no candidate exists.
pub fn find_sidecar(entry: &MediaEntry, index: &SidecarIndex) -> Option<PathBuf> {
    let dir = entry.directory();
    for candidate in candidate_names(entry.file_name()) {
        if let Some(path) = index.lookup(dir, &candidate) {
            tracing::debug!(
                media = %entry.relative.display(),
                sidecar = %candidate,
                "matched sidecar"
            );
            return Some(path);
        }
    }
    None
}

/// The sidecar shared by a companion group and the member it was matched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSidecar {
    pub path: PathBuf,
    /// Index into `CompanionGroup::members`
    pub origin: usize,
}

/// Resolve one sidecar for a whole group. Members are tried in group order
/// (stills first); the first match wins and conflicting matches are logged.
pub fn resolve_group(group: &CompanionGroup, index: &SidecarIndex) -> Option<GroupSidecar> {
    let mut resolved: Option<GroupSidecar> = None;
    for (i, member) in group.members.iter().enumerate() {
        let Some(path) = find_sidecar(member, index) else {
            continue;
        };
        match &resolved {
            None => resolved = Some(GroupSidecar { path, origin: i }),
            Some(first) if first.path != path => {
                tracing::warn!(
                    media = %member.relative.display(),
                    own = %path.display(),
                    used = %first.path.display(),
                    "companion has its own sidecar; using the group's first match"
                );
            }
            Some(_) => {}
        }
    }
    resolved
}

/// Candidate sidecar names for a media file name, in match priority order.
pub fn candidate_names(file_name: &str) -> Vec<String> {
    let (stem, ext) = split_extension(file_name);
    let mut out = Vec::new();

    // 1-4: direct patterns and their truncations
    push_patterns(&mut out, file_name, stem);

    // 5: `foo(1).jpg` -> `foo.jpg(1).json`
    push_counter_swaps(&mut out, stem, ext);

    // 6: `foo-edited.jpg` -> sidecar of `foo.jpg`
    if let Some(original_stem) = extras::strip_edited_suffix(stem) {
        let original = format!("{}{}", original_stem, ext);
        push_patterns(&mut out, &original, &original_stem);
        push_counter_swaps(&mut out, &original_stem, ext);
    }

    // 7: `name_n-.jpg`, `name_n.jpg`, `name_.jpg` -> drop the stray last char
    if stem.ends_with("_n-") || stem.ends_with("_n") || stem.ends_with('_') {
        let mut trimmed = stem.to_string();
        trimmed.pop();
        out.push(format!("{}.json", trimmed));
    }

    let mut seen = HashSet::new();
    out.retain(|name| seen.insert(name.clone()));
    out
}

/// Rules 1-3, then the same stems truncated to Google's limit and progressively shorter.
fn push_patterns(out: &mut Vec<String>, full_name: &str, stem: &str) {
    let mut stems = vec![full_name.to_string()];
    stems.extend(SUPPLEMENTAL_SUFFIXES.iter().map(|s| format!("{}{}", full_name, s)));
    stems.push(stem.to_string());

    for s in &stems {
        out.push(format!("{}.json", s));
    }

    for limit in (GOOGLE_STEM_LIMIT - MAX_TRUNCATION_STEPS..=GOOGLE_STEM_LIMIT).rev() {
        for s in &stems {
            let cuts = [truncate_chars(s, limit), truncate_bytes(s, limit)];
            for truncated in cuts.into_iter().flatten() {
                out.push(format!("{}.json", truncated));
            }
        }
    }
}

fn push_counter_swaps(out: &mut Vec<String>, stem: &str, ext: &str) {
    let Some(caps) = COUNTER_RE.captures(stem) else {
        return;
    };
    let name = &caps["name"];
    let counter = &caps["counter"];
    if name.is_empty() {
        return;
    }
    let original = format!("{}{}", name, ext);
    out.push(format!("{}{}.json", original, counter));
    for suffix in SUPPLEMENTAL_SUFFIXES {
        let s = format!("{}{}", original, suffix);
        out.push(format!("{}{}.json", s, counter));
        if let Some(truncated) = truncate_chars(&s, GOOGLE_STEM_LIMIT) {
            out.push(format!("{}{}.json", truncated, counter));
        }
    }
}

/// `("photo", ".jpg")`; names without a dot have an empty extension.
fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(pos) if pos > 0 => file_name.split_at(pos),
        _ => (file_name, ""),
    }
}

/// Keep the first `limit` characters, or None if already that short.
fn truncate_chars(s: &str, limit: usize) -> Option<String> {
    if s.chars().count() <= limit {
        return None;
    }
    Some(s.chars().take(limit).collect())
}

/// Keep at most `limit` bytes (on a char boundary), or None if already that short.
fn truncate_bytes(s: &str, limit: usize) -> Option<String> {
    if s.len() <= limit {
        return None;
    }
    let mut end = limit;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    Some(s[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::MediaCategory;

    fn media(dir: &str, name: &str, category: MediaCategory) -> MediaEntry {
        let source = PathBuf::from(dir).join(name);
        MediaEntry {
            relative: PathBuf::from(name),
            extension: split_extension(name).1.trim_start_matches('.').to_lowercase(),
            source,
            category,
        }
    }

    fn resolve(name: &str, sidecars: &[&str]) -> Option<String> {
        let index: SidecarIndex = sidecars
            .iter()
            .map(|s| PathBuf::from("/in/album").join(s))
            .collect();
        find_sidecar(&media("/in/album", name, MediaCategory::Image), &index)
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
    }

    #[test]
    fn test_basic_patterns() {
        assert_eq!(resolve("f.jpg", &["f.jpg.json"]).as_deref(), Some("f.jpg.json"));
        assert_eq!(resolve("f.jpg", &["f.jpg.suppl.json"]).as_deref(), Some("f.jpg.suppl.json"));
        assert_eq!(
            resolve("f.mp4", &["f.mp4.supplemental-metadata.json"]).as_deref(),
            Some("f.mp4.supplemental-metadata.json")
        );
        assert_eq!(resolve("f.jpg", &["f.json"]).as_deref(), Some("f.json"));
        assert_eq!(resolve("f.jpg", &["g.jpg.json", "f.png.json"]), None);
    }

    #[test]
    fn test_pattern_priority() {
        let all = ["f.json", "f.jpg.supplemental-metadata.json", "f.jpg.suppl.json", "f.jpg.json"];
        assert_eq!(resolve("f.jpg", &all).as_deref(), Some("f.jpg.json"));
        assert_eq!(resolve("f.jpg", &all[..3]).as_deref(), Some("f.jpg.suppl.json"));
        assert_eq!(
            resolve("f.jpg", &all[..2]).as_deref(),
            Some("f.jpg.supplemental-metadata.json")
        );
    }

    #[test]
    fn test_truncated_supplemental() {
        // 5142914356_01611c5b98_o.jpg.supplemental-metadata cut to 46 chars
        assert_eq!(
            resolve(
                "5142914356_01611c5b98_o.jpg",
                &["5142914356_01611c5b98_o.jpg.supplemental-metad.json"]
            )
            .as_deref(),
            Some("5142914356_01611c5b98_o.jpg.supplemental-metad.json")
        );

        let long = "a_very_long_file_name_that_google_will_cut_short.jpg";
        let truncated = format!("{}.json", &long[..46]);
        assert_eq!(resolve(long, &[&truncated]), Some(truncated.clone()));

        // Short names are never truncated into a neighbour's sidecar
        assert_eq!(resolve("IMG_12.jpg", &["IMG_1.json"]), None);
    }

    #[test]
    fn test_counter_and_edited_variants() {
        assert_eq!(resolve("foo(1).jpg", &["foo.jpg(1).json"]).as_deref(), Some("foo.jpg(1).json"));
        assert_eq!(
            resolve("foo(2).jpg", &["foo.jpg.supplemental-metadata(2).json"]).as_deref(),
            Some("foo.jpg.supplemental-metadata(2).json")
        );
        assert_eq!(resolve("foo-edited.jpg", &["foo.jpg.json"]).as_deref(), Some("foo.jpg.json"));
        assert_eq!(resolve("foo_n-.jpg", &["foo_n.json"]).as_deref(), Some("foo_n.json"));
        assert_eq!(resolve("foo_.jpg", &["foo.json"]).as_deref(), Some("foo.json"));
    }

    #[test]
    fn test_unicode_normalization_and_separators() {
        // NFD media name, NFC sidecar name
        let nfd = "Cafe\u{301}.jpg";
        let nfc_sidecar = "Caf\u{e9}.jpg.json";
        assert_eq!(resolve(nfd, &[nfc_sidecar]).as_deref(), Some(nfc_sidecar));

        let index: SidecarIndex = ["/in/album//x.jpg.json"].iter().collect();
        let m = media("/in/album/", "x.jpg", MediaCategory::Image);
        assert!(find_sidecar(&m, &index).is_some());
    }

    #[test]
    fn test_group_prefers_still_and_first_match() {
        let index: SidecarIndex = ["/in/IMG_0001.HEIC.json", "/in/IMG_0001.MOV.json"]
            .iter()
            .collect();
        let group = CompanionGroup {
            members: vec![
                media("/in", "IMG_0001.HEIC", MediaCategory::Image),
                media("/in", "IMG_0001.MOV", MediaCategory::LivePhotoVideo),
            ],
        };
        let resolved = resolve_group(&group, &index).unwrap();
        assert_eq!(resolved.origin, 0);
        assert!(resolved.path.ends_with("IMG_0001.HEIC.json"));

        let only_video: SidecarIndex = ["/in/IMG_0001.MOV.json"].iter().collect();
        let resolved = resolve_group(&group, &only_video).unwrap();
        assert_eq!(resolved.origin, 1);

        assert!(resolve_group(&group, &SidecarIndex::new()).is_none());
    }

    #[test]
    fn test_index_counts_unique_files() {
        let index: SidecarIndex = ["/a/x.json", "/a/x.json", "/b/x.json"].iter().collect();
        assert_eq!(index.len(), 2);
        assert!(index.lookup(Path::new("/a"), "x.json").is_some());
        assert!(index.lookup(Path::new("/a"), "X.json").is_none());
    }
}
