//! Per-file repair transaction.
//!
//! Every member of a companion group is copied into a hidden partial file
//! next to its final location, patched (EXIF, then file times) and renamed
//! into place. Each writer gets its own uniquely named partial file. A
//! failed member leaves nothing behind in the output tree;
//! instead the source and its sidecar are copied into the error tree.

use std::any::Any;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::TempPath;

use crate::error::RepairError;
use crate::formats::MediaCategory;
use crate::media::{CompanionGroup, MediaEntry};
use crate::metadata::{self, ResolvedMetadata};
use crate::outcome::{Enrichment, Outcome, OutcomeKind, TimestampChange};
use crate::sidecar::GroupSidecar;
use crate::tags::{self, TagEditor};
use crate::timestamps::{self, FileTimes, PosixTimestamps, TimestampSetter};

const COPY_BUFFER: usize = 1024 * 1024;
const PARTIAL_MARKER: &str = "tfix-partial";

/// Retry for transient filesystem errors (network shares, antivirus locks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total tries, including the first
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// No retries, for tests and fail-fast runs.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            delay_ms: 0,
        }
    }

    pub fn run<T>(&self, mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && is_transient(&e) => {
                    tracing::debug!(attempt, "retrying after I/O error: {}", e);
                    std::thread::sleep(Duration::from_millis(self.delay_ms));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    !matches!(
        e.kind(),
        io::ErrorKind::NotFound
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::InvalidData
            | io::ErrorKind::AlreadyExists
            | io::ErrorKind::Unsupported
    )
}

/// Shared, read-only state every worker needs.
#[derive(Clone)]
pub struct RepairContext {
    pub output_root: PathBuf,
    pub error_root: PathBuf,
    pub debug: bool,
    pub retry: RetryPolicy,
    pub tags: Arc<dyn TagEditor>,
    pub times: Arc<dyn TimestampSetter>,
}

/// A companion group together with the sidecar resolved for it.
#[derive(Debug, Clone)]
pub struct GroupPlan {
    pub group: CompanionGroup,
    pub sidecar: Option<GroupSidecar>,
}

/// Repair every member of a group. Always yields one outcome per member.
pub fn repair_group(plan: &GroupPlan, ctx: &RepairContext) -> Vec<Outcome> {
    let sidecar_path = plan.sidecar.as_ref().map(|s| s.path.clone());

    let (metadata, failure) = match &plan.sidecar {
        None => (None, None),
        Some(sidecar) => match metadata::read_sidecar(&sidecar.path) {
            Ok(meta) => (Some(meta), None),
            Err(e) => {
                tracing::warn!("{}", e);
                (None, Some((sidecar.origin, RepairError::from(e).to_string())))
            }
        },
    };

    plan.group
        .members
        .iter()
        .enumerate()
        .map(|(i, member)| {
            if let Some((origin, reason)) = &failure {
                let reason = if i == *origin {
                    reason.clone()
                } else {
                    let from = plan.group.members[*origin].file_name();
                    RepairError::Companion(format!("{} ({})", reason, from)).to_string()
                };
                return fail(member, reason, sidecar_path.as_deref(), ctx);
            }

            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                repair_member(member, metadata.as_ref(), sidecar_path.as_deref(), ctx)
            }));
            match result {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let reason = RepairError::Panicked(panic_message(payload.as_ref())).to_string();
                    tracing::error!(media = %member.relative.display(), "{}", reason);
                    fail(member, reason, sidecar_path.as_deref(), ctx)
                }
            }
        })
        .collect()
}

fn repair_member(
    entry: &MediaEntry,
    metadata: Option<&ResolvedMetadata>,
    sidecar: Option<&Path>,
    ctx: &RepairContext,
) -> Outcome {
    let dest = ctx.output_root.join(&entry.relative);
    let applied = match write_output(entry, &dest, metadata, ctx) {
        Ok(applied) => applied,
        Err(e) => {
            tracing::warn!(media = %entry.relative.display(), "{}", e);
            return fail(entry, e.to_string(), sidecar, ctx);
        }
    };

    let kind = if metadata.is_some_and(|m| m.photo_taken.is_some()) {
        OutcomeKind::CopiedWithMetadata
    } else if ctx.debug && applied.timestamps.is_none() {
        let target = ctx.error_root.join(&entry.relative);
        if let Err(e) = copy_atomic(&entry.source, &target, ctx.retry) {
            tracing::warn!(media = %entry.relative.display(), "debug copy failed: {}", e);
        }
        OutcomeKind::SkippedDebugNoDateChange
    } else {
        OutcomeKind::CopiedNoMetadata
    };

    let mut outcome = Outcome::new(entry, kind, sidecar.map(Path::to_path_buf));
    outcome.enrichment = applied.enrichment;
    outcome.timestamps = applied.timestamps;
    outcome
}

struct Applied {
    enrichment: Enrichment,
    timestamps: Option<TimestampChange>,
}

/// Copy, patch and publish one output file. On error the partial file is removed.
fn write_output(
    entry: &MediaEntry,
    dest: &Path,
    metadata: Option<&ResolvedMetadata>,
    ctx: &RepairContext,
) -> Result<Applied, RepairError> {
    if let Some(parent) = dest.parent() {
        ctx.retry.run(|| fs::create_dir_all(parent)).map_err(RepairError::Copy)?;
    }
    let partial = ctx
        .retry
        .run(|| copy_to_partial(&entry.source, dest))
        .map_err(RepairError::Copy)?;

    let mut enrichment = Enrichment::default();
    if let Some(meta) = metadata {
        match entry.category {
            MediaCategory::Image | MediaCategory::Raw if ctx.tags.supports(&entry.extension) => {
                let existing = ctx.tags.read(&entry.source);
                let update = tags::plan_update(&existing, meta, entry.category);
                if !update.is_empty() {
                    ctx.tags.write(&partial, &update).map_err(RepairError::ExifWrite)?;
                    enrichment.exif_dates = update.writes_dates();
                    enrichment.gps = update.gps.is_some();
                    enrichment.description = update.description.is_some();
                }
            }
            MediaCategory::Image | MediaCategory::Raw => {
                tracing::debug!(
                    media = %entry.relative.display(),
                    "format cannot carry EXIF, timestamps only"
                );
                enrichment.exif_unsupported = true;
            }
            MediaCategory::Video | MediaCategory::LivePhotoVideo => {}
        }
    }

    let timestamps = match metadata.and_then(ResolvedMetadata::timestamp) {
        Some(epoch) => {
            ctx.retry
                .run(|| ctx.times.set_times(&partial, FileTimes::uniform(epoch)))
                .map_err(RepairError::Timestamp)?;
            Some(TimestampChange {
                original: timestamps::file_mtime(&entry.source),
                corrected: epoch,
            })
        }
        None => {
            // Nothing to apply: the copy keeps the source's own times
            let original = FileTimes::of(&entry.source).map_err(RepairError::Timestamp)?;
            ctx.retry
                .run(|| ctx.times.set_times(&partial, original))
                .map_err(RepairError::Timestamp)?;
            None
        }
    };

    publish(partial, dest, ctx.retry).map_err(RepairError::Copy)?;
    Ok(Applied {
        enrichment,
        timestamps,
    })
}

/// Record the failure and route the source (plus sidecar) into the error tree.
fn fail(
    entry: &MediaEntry,
    reason: String,
    sidecar: Option<&Path>,
    ctx: &RepairContext,
) -> Outcome {
    let reason = match route_to_error(entry, sidecar, ctx) {
        Ok(()) => reason,
        Err(e) => {
            tracing::error!(
                media = %entry.relative.display(),
                "cannot copy into error directory: {}",
                e
            );
            format!("{}; also failed to copy into error directory: {}", reason, e)
        }
    };
    Outcome::error(entry, reason, sidecar.map(Path::to_path_buf))
}

fn route_to_error(
    entry: &MediaEntry,
    sidecar: Option<&Path>,
    ctx: &RepairContext,
) -> io::Result<()> {
    let target = ctx.error_root.join(&entry.relative);
    copy_atomic(&entry.source, &target, ctx.retry)?;
    if let Some(sidecar) = sidecar {
        if let (Some(dir), Some(name)) = (target.parent(), sidecar.file_name()) {
            copy_atomic(sidecar, &dir.join(name), ctx.retry)?;
        }
    }
    Ok(())
}

/// Plain copy through a partial file, source times preserved where readable.
/// Several failing groups can route the same sidecar; each writes its own
/// partial file and the renames replace one identical copy with another.
fn copy_atomic(source: &Path, dest: &Path, retry: RetryPolicy) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        retry.run(|| fs::create_dir_all(parent))?;
    }
    let partial = retry.run(|| copy_to_partial(source, dest))?;
    if let Ok(times) = FileTimes::of(source) {
        let _ = PosixTimestamps.set_times(&partial, times);
    }
    publish(partial, dest, retry)
}

/// Copy `source` into a fresh partial file beside `dest`. The returned path
/// deletes the file on drop unless it is published.
fn copy_to_partial(source: &Path, dest: &Path) -> io::Result<TempPath> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let (prefix, suffix) = partial_affixes(dest);
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix).suffix(&suffix);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Mode of a plain File::create, umask applies
        builder.permissions(fs::Permissions::from_mode(0o666));
    }
    let mut partial = builder.tempfile_in(dir)?;

    let mut reader = BufReader::with_capacity(COPY_BUFFER, File::open(source)?);
    let mut writer = BufWriter::with_capacity(COPY_BUFFER, partial.as_file_mut());
    io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    drop(writer);
    // Close the handle so tag writers and timestamp setters can reopen it
    Ok(partial.into_temp_path())
}

/// Rename the partial file over `dest`, retrying transient failures.
fn publish(partial: TempPath, dest: &Path, retry: RetryPolicy) -> io::Result<()> {
    let mut pending = Some(partial);
    retry.run(|| match pending.take() {
        Some(partial) => partial.persist(dest).map_err(|e| {
            pending = Some(e.path);
            e.error
        }),
        None => Err(io::Error::new(io::ErrorKind::NotFound, "partial file already consumed")),
    })
}

/// `IMG_1.jpg` -> (`.IMG_1.`, `.tfix-partial.jpg`); the random part goes in
/// between and the real extension stays last for format detection.
fn partial_affixes(dest: &Path) -> (String, String) {
    let stem = dest.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let suffix = match dest.extension() {
        Some(ext) => format!(".{}.{}", PARTIAL_MARKER, ext.to_string_lossy()),
        None => format!(".{}", PARTIAL_MARKER),
    };
    (format!(".{}.", stem), suffix)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::{ExistingTags, TagUpdate};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTags {
        writes: Mutex<Vec<(PathBuf, TagUpdate)>>,
        fail: bool,
    }

    impl TagEditor for FakeTags {
        fn supports(&self, extension: &str) -> bool {
            extension == "jpg"
        }

        fn read(&self, _path: &Path) -> ExistingTags {
            ExistingTags::default()
        }

        fn write(&self, path: &Path, update: &TagUpdate) -> Result<(), String> {
            if self.fail {
                return Err("simulated write failure".to_string());
            }
            self.writes.lock().unwrap().push((path.to_path_buf(), update.clone()));
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        input: PathBuf,
        ctx: RepairContext,
    }

    fn fixture(tags: Arc<dyn TagEditor>, debug: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        fs::create_dir_all(&input).unwrap();
        let ctx = RepairContext {
            output_root: dir.path().join("out"),
            error_root: dir.path().join("err"),
            debug,
            retry: RetryPolicy::none(),
            tags,
            times: timestamps::for_platform(false),
        };
        Fixture {
            _dir: dir,
            input,
            ctx,
        }
    }

    fn media(input: &Path, relative: &str, category: MediaCategory) -> MediaEntry {
        let source = input.join(relative);
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, relative.as_bytes()).unwrap();
        MediaEntry {
            extension: source.extension().unwrap().to_string_lossy().to_lowercase(),
            source,
            relative: PathBuf::from(relative),
            category,
        }
    }

    fn plan(members: Vec<MediaEntry>, sidecar: Option<PathBuf>) -> GroupPlan {
        GroupPlan {
            group: CompanionGroup { members },
            sidecar: sidecar.map(|path| GroupSidecar { path, origin: 0 }),
        }
    }

    #[test]
    fn test_repair_with_metadata() {
        let tags = Arc::new(FakeTags::default());
        let fx = fixture(tags.clone(), false);
        let entry = media(&fx.input, "2021/beach.jpg", MediaCategory::Image);
        let json = fx.input.join("2021/beach.jpg.json");
        fs::write(
            &json,
            r#"{"photoTakenTime": {"timestamp": "1609459200"},
                "geoData": {"latitude": 37.7749, "longitude": -122.4194}}"#,
        )
        .unwrap();

        let outcomes = repair_group(&plan(vec![entry], Some(json)), &fx.ctx);
        assert_eq!(outcomes.len(), 1);
        let outcome = &outcomes[0];
        assert_eq!(outcome.kind, OutcomeKind::CopiedWithMetadata);
        assert!(outcome.enrichment.exif_dates);
        assert!(outcome.enrichment.gps);
        assert_eq!(outcome.timestamps.unwrap().corrected, 1609459200);

        let out = fx.ctx.output_root.join("2021/beach.jpg");
        assert_eq!(fs::read(&out).unwrap(), b"2021/beach.jpg");
        assert_eq!(timestamps::file_mtime(&out), Some(1609459200));
        // EXIF went to the partial file, never the source
        let writes = tags.writes.lock().unwrap();
        assert!(writes[0].0.file_name().unwrap().to_string_lossy().contains(PARTIAL_MARKER));
        assert!(leftovers(&fx.ctx.output_root).is_empty());
    }

    #[test]
    fn test_broken_sidecar_fails_whole_group() {
        let fx = fixture(Arc::new(FakeTags::default()), false);
        let still = media(&fx.input, "IMG_1.jpg", MediaCategory::Image);
        let video = media(&fx.input, "IMG_1.mp4", MediaCategory::LivePhotoVideo);
        let json = fx.input.join("IMG_1.jpg.json");
        fs::write(&json, "{ broken").unwrap();

        let outcomes = repair_group(&plan(vec![still, video], Some(json)), &fx.ctx);
        assert!(outcomes.iter().all(|o| !o.is_success()));
        assert!(outcomes[0].error_reason().unwrap().contains("malformed sidecar"));
        assert!(outcomes[1].error_reason().unwrap().contains("IMG_1.jpg"));

        assert!(!fx.ctx.output_root.join("IMG_1.jpg").exists());
        assert!(fx.ctx.error_root.join("IMG_1.jpg").exists());
        assert!(fx.ctx.error_root.join("IMG_1.mp4").exists());
        assert!(fx.ctx.error_root.join("IMG_1.jpg.json").exists());
    }

    #[test]
    fn test_exif_failure_leaves_no_output() {
        let fx = fixture(
            Arc::new(FakeTags {
                fail: true,
                ..Default::default()
            }),
            false,
        );
        let entry = media(&fx.input, "a.jpg", MediaCategory::Image);
        let json = fx.input.join("a.jpg.json");
        fs::write(&json, r#"{"photoTakenTime": {"timestamp": "1000"}}"#).unwrap();

        let outcomes = repair_group(&plan(vec![entry], Some(json)), &fx.ctx);
        assert!(outcomes[0].error_reason().unwrap().contains("simulated write failure"));
        assert!(!fx.ctx.output_root.join("a.jpg").exists());
        assert!(leftovers(&fx.ctx.output_root).is_empty());
        assert!(fx.ctx.error_root.join("a.jpg").exists());
    }

    #[test]
    fn test_no_sidecar_keeps_source_times() {
        let fx = fixture(Arc::new(FakeTags::default()), false);
        let entry = media(&fx.input, "clip.mov", MediaCategory::Video);
        let mtime = filetime::FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_mtime(&entry.source, mtime).unwrap();

        let outcomes = repair_group(&plan(vec![entry], None), &fx.ctx);
        assert_eq!(outcomes[0].kind, OutcomeKind::CopiedNoMetadata);
        assert!(outcomes[0].timestamps.is_none());
        assert_eq!(
            timestamps::file_mtime(&fx.ctx.output_root.join("clip.mov")),
            Some(1_500_000_000)
        );
    }

    #[test]
    fn test_debug_mode_copies_undated_files() {
        let fx = fixture(Arc::new(FakeTags::default()), true);
        let entry = media(&fx.input, "x/orphan.jpg", MediaCategory::Image);

        let outcomes = repair_group(&plan(vec![entry], None), &fx.ctx);
        assert_eq!(outcomes[0].kind, OutcomeKind::SkippedDebugNoDateChange);
        assert!(fx.ctx.output_root.join("x/orphan.jpg").exists());
        assert!(fx.ctx.error_root.join("x/orphan.jpg").exists());
    }

    #[test]
    fn test_raw_gets_timestamps_only() {
        let tags = Arc::new(FakeTags::default());
        let fx = fixture(tags.clone(), false);
        let entry = media(&fx.input, "scan.nef", MediaCategory::Raw);
        let json = fx.input.join("scan.nef.json");
        fs::write(&json, r#"{"photoTakenTime": {"timestamp": "86400"}}"#).unwrap();

        let outcomes = repair_group(&plan(vec![entry], Some(json)), &fx.ctx);
        assert_eq!(outcomes[0].kind, OutcomeKind::CopiedWithMetadata);
        assert!(outcomes[0].enrichment.exif_unsupported);
        assert!(tags.writes.lock().unwrap().is_empty());
        assert_eq!(timestamps::file_mtime(&fx.ctx.output_root.join("scan.nef")), Some(86400));
    }

    #[test]
    fn test_panic_becomes_error_outcome() {
        struct Exploding;
        impl TagEditor for Exploding {
            fn supports(&self, _: &str) -> bool {
                true
            }
            fn read(&self, _: &Path) -> ExistingTags {
                panic!("decoder blew up")
            }
            fn write(&self, _: &Path, _: &TagUpdate) -> Result<(), String> {
                Ok(())
            }
        }

        let fx = fixture(Arc::new(Exploding), false);
        let entry = media(&fx.input, "p.jpg", MediaCategory::Image);
        let json = fx.input.join("p.jpg.json");
        fs::write(&json, r#"{"photoTakenTime": {"timestamp": "1"}}"#).unwrap();

        let outcomes = repair_group(&plan(vec![entry], Some(json)), &fx.ctx);
        assert!(outcomes[0].error_reason().unwrap().contains("decoder blew up"));
        assert!(leftovers(&fx.ctx.output_root).is_empty());
        assert!(fx.ctx.error_root.join("p.jpg").exists());
    }

    #[test]
    fn test_retry_policy() {
        let mut calls = 0;
        let policy = RetryPolicy {
            attempts: 3,
            delay_ms: 0,
        };
        let result: io::Result<()> = policy.run(|| {
            calls += 1;
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);

        let mut calls = 0;
        let result: io::Result<()> = policy.run(|| {
            calls += 1;
            Err(io::Error::new(io::ErrorKind::NotFound, "gone"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_partial_affixes() {
        assert_eq!(
            partial_affixes(Path::new("out/2021/IMG_1.jpg")),
            (".IMG_1.".to_string(), ".tfix-partial.jpg".to_string())
        );
        assert_eq!(
            partial_affixes(Path::new("out/README")),
            (".README.".to_string(), ".tfix-partial".to_string())
        );
    }

    #[test]
    fn test_shared_sidecar_routed_by_concurrent_groups() {
        let fx = fixture(Arc::new(FakeTags::default()), false);
        let json = fx.input.join("foo.jpg.json");
        // Large enough that the copies overlap
        let mut broken = String::from("{\"photoTakenTime\": ");
        broken.push_str(&" ".repeat(4 * 1024 * 1024));
        fs::write(&json, &broken).unwrap();

        let names = [
            "foo",
            "foo-edited",
            "foo-bearbeitet",
            "foo-bewerkt",
            "foo-modificato",
            "foo-editada",
        ];
        let plans: Vec<GroupPlan> = names
            .iter()
            .map(|n| {
                let entry = media(&fx.input, &format!("{}.jpg", n), MediaCategory::Image);
                plan(vec![entry], Some(json.clone()))
            })
            .collect();

        let ctx = &fx.ctx;
        let outcomes: Vec<Outcome> = std::thread::scope(|s| {
            let handles: Vec<_> = plans
                .iter()
                .map(|p| s.spawn(move || repair_group(p, ctx)))
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(outcomes.len(), names.len());
        for outcome in &outcomes {
            let reason = outcome.error_reason().unwrap();
            assert!(reason.contains("malformed sidecar"), "{}", reason);
            assert!(!reason.contains("also failed"), "{}", reason);
        }
        for n in names {
            assert!(fx.ctx.error_root.join(format!("{}.jpg", n)).exists());
        }
        assert_eq!(fs::read_to_string(fx.ctx.error_root.join("foo.jpg.json")).unwrap(), broken);
        assert!(leftovers(&fx.ctx.error_root).is_empty());
    }

    #[test]
    fn test_failed_copy_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.jpg");
        let missing = dir.path().join("missing.jpg");
        let err = copy_atomic(&missing, &dest, RetryPolicy::none()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!dest.exists());
        assert!(leftovers(dir.path()).is_empty());
    }

    fn leftovers(root: &Path) -> Vec<PathBuf> {
        walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(PARTIAL_MARKER))
            .map(|e| e.into_path())
            .collect()
    }
}
