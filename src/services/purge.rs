use crate::services::session::SESSION_DIR_PREFIX;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub removed: usize,
    pub kept: usize,
}

/// Removes session work directories under `root` not modified for `older_than`.
///
/// Directories left behind by a crashed or killed process are the target;
/// anything without the session prefix is left alone.
pub fn purge_stale(root: &Path, older_than: Duration) -> std::io::Result<PurgeReport> {
    let mut report = PurgeReport::default();
    if !root.exists() {
        return Ok(report);
    }

    let now = SystemTime::now();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(SESSION_DIR_PREFIX) {
            continue;
        }

        let metadata = entry.metadata()?;
        if !metadata.is_dir() {
            continue;
        }

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();

        if age < older_than {
            report.kept += 1;
            continue;
        }

        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => {
                info!("🧹 Purged {} (idle for {:?})", entry.path().display(), age);
                report.removed += 1;
            }
            Err(e) => warn!("Failed to purge {}: {}", entry.path().display(), e),
        }
    }

    Ok(report)
}
