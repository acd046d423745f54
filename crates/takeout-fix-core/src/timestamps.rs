//! Platform timestamp capability, selected once per run.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use filetime::FileTime;

/// Epoch-second timestamps to apply to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTimes {
    /// Only honoured where the platform can set it
    pub created: Option<i64>,
    pub modified: i64,
    pub accessed: i64,
}

impl FileTimes {
    /// Same instant for creation, modification and access.
    pub fn uniform(epoch: i64) -> Self {
        Self {
            created: Some(epoch),
            modified: epoch,
            accessed: epoch,
        }
    }

    /// Current modification/access times of `path`.
    pub fn of(path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        let modified = FileTime::from_last_modification_time(&meta);
        let accessed = FileTime::from_last_access_time(&meta);
        Ok(Self {
            created: None,
            modified: modified.unix_seconds(),
            accessed: accessed.unix_seconds(),
        })
    }
}

/// Sets creation/modification/access times on a path.
pub trait TimestampSetter: Send + Sync {
    fn set_times(&self, path: &Path, times: FileTimes) -> io::Result<()>;
}

/// utime-style: modification and access only. POSIX has no settable birth time.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixTimestamps;

impl TimestampSetter for PosixTimestamps {
    fn set_times(&self, path: &Path, times: FileTimes) -> io::Result<()> {
        filetime::set_file_times(
            path,
            FileTime::from_unix_time(times.accessed, 0),
            FileTime::from_unix_time(times.modified, 0),
        )
    }
}

/// Windows rules: creation time is set alongside modification and access.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsTimestamps;

impl TimestampSetter for WindowsTimestamps {
    fn set_times(&self, path: &Path, times: FileTimes) -> io::Result<()> {
        let file = fs::OpenOptions::new().write(true).open(path)?;
        #[allow(unused_mut)]
        let mut std_times = fs::FileTimes::new()
            .set_modified(system_time(times.modified))
            .set_accessed(system_time(times.accessed));
        #[cfg(windows)]
        if let Some(created) = times.created {
            use std::os::windows::fs::FileTimesExt;
            std_times = std_times.set_created(system_time(created));
        }
        file.set_times(std_times)
    }
}

/// Pick the implementation once; callers never branch on platform again.
pub fn for_platform(windows_rules: bool) -> Arc<dyn TimestampSetter> {
    if windows_rules {
        Arc::new(WindowsTimestamps)
    } else {
        Arc::new(PosixTimestamps)
    }
}

fn system_time(epoch: i64) -> SystemTime {
    if epoch >= 0 {
        UNIX_EPOCH + Duration::from_secs(epoch as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(epoch.unsigned_abs())
    }
}

/// Modification time in epoch seconds, if readable.
pub fn file_mtime(path: &Path) -> Option<i64> {
    FileTimes::of(path).ok().map(|t| t.modified)
}
