//! Stale temp-file cleanup used by the auto-repair menu

use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// What one cleanup pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub bytes: u64,
    /// Matching files that could not be removed
    pub errors: usize,
}

/// Remove regular files in `dir` whose name starts with `prefix` and whose
/// modification time is more than `max_age` before `now`.
///
/// Only the top level of `dir` is scanned. A missing directory is not an
/// error. Per-file failures are counted, not returned.
pub fn cleanup_temp_files(
    dir: &Path,
    prefix: &str,
    max_age: Duration,
    now: SystemTime,
) -> io::Result<CleanupReport> {
    let mut report = CleanupReport::default();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(prefix) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Cannot stat temp file");
                report.errors += 1;
                continue;
            }
        };

        let stale = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > max_age);
        if !stale {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(path = %entry.path().display(), "Removed stale temp file");
                report.removed += 1;
                report.bytes += metadata.len();
            }
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Failed to remove temp file");
                report.errors += 1;
            }
        }
    }

    Ok(report)
}
