//! Per-run scratch directories for transient audio files.
//!
//! Every run gets its own directory under the scratch root, tagged with the
//! owning process ID. Leftovers from runs that crashed or were killed are
//! swept before a new run starts, and a run's directory is removed when the
//! run ends, whichever way it ends.

use crate::error::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Prefix of per-run directory names.
pub const RUN_DIR_PREFIX: &str = "cram-run-";

/// Run directories younger than this may belong to a live run. Only applies
/// when the owner's liveness cannot be determined.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60 * 60);

/// File inside a run directory holding the owner's process ID.
const OWNER_FILE: &str = ".owner";

/// Root directory holding per-run scratch directories.
#[derive(Debug, Clone)]
pub struct ScratchArea {
    root: PathBuf,
    stale_after: Duration,
}

impl ScratchArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Minimum age before a leftover run directory is swept.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Remove run directories left behind by earlier runs.
    ///
    /// A directory whose owning process has exited is removed right away and
    /// one whose owner is still running is kept. Without a readable owner,
    /// only entries older than the staleness threshold are touched. Returns
    /// the number of entries removed. Entries that cannot be removed are
    /// logged and skipped.
    pub fn sweep_stale(&self) -> Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in std::fs::read_dir(&self.root)?.flatten() {
            if !entry.file_name().to_string_lossy().starts_with(RUN_DIR_PREFIX) {
                continue;
            }

            let path = entry.path();
            let stale = match owner_alive(&path) {
                Some(alive) => !alive,
                None => {
                    let age = entry
                        .metadata()
                        .and_then(|m| m.modified())
                        .map(|modified| SystemTime::now().duration_since(modified).unwrap_or_default())
                        .unwrap_or(Duration::MAX);
                    age >= self.stale_after
                }
            };
            if !stale {
                continue;
            }

            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };

            match result {
                Ok(()) => {
                    debug!("Removed stale scratch entry {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove stale scratch entry {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            info!("Swept {} stale scratch entries", removed);
        }
        Ok(removed)
    }

    /// Create a fresh directory for one run.
    pub fn begin_run(&self) -> Result<RunScratch> {
        std::fs::create_dir_all(&self.root)?;
        let dir = tempfile::Builder::new()
            .prefix(RUN_DIR_PREFIX)
            .tempdir_in(&self.root)?;
        std::fs::write(dir.path().join(OWNER_FILE), std::process::id().to_string())?;
        debug!("Run scratch at {}", dir.path().display());
        Ok(RunScratch { dir })
    }
}

/// Whether the process that created a run directory is still running.
/// `None` when that cannot be told.
fn owner_alive(dir: &Path) -> Option<bool> {
    let pid: u32 = std::fs::read_to_string(dir.join(OWNER_FILE))
        .ok()?
        .trim()
        .parse()
        .ok()?;
    process_alive(pid)
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> Option<bool> {
    Some(Path::new("/proc").join(pid.to_string()).exists())
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> Option<bool> {
    None
}

/// Scratch directory owned by a single run. Removed on drop.
#[derive(Debug)]
pub struct RunScratch {
    dir: TempDir,
}

impl RunScratch {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now, reporting failures.
    pub fn close(self) -> Result<()> {
        self.dir.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_directory_is_removed_on_close() {
        let root = tempfile::tempdir().unwrap();
        let area = ScratchArea::new(root.path().join("scratch"));

        let run = area.begin_run().unwrap();
        let audio = run.path().join("audio.mp3");
        std::fs::write(&audio, b"mp3").unwrap();
        let run_dir = run.path().to_path_buf();

        run.close().unwrap();

        assert!(!audio.exists());
        assert!(!run_dir.exists());
    }

    #[test]
    fn test_run_directory_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let area = ScratchArea::new(root.path());

        let run_dir = {
            let run = area.begin_run().unwrap();
            std::fs::write(run.path().join("audio.mp3"), b"mp3").unwrap();
            run.path().to_path_buf()
        };

        assert!(!run_dir.exists());
    }

    #[test]
    fn test_runs_get_distinct_directories() {
        let root = tempfile::tempdir().unwrap();
        let area = ScratchArea::new(root.path());

        let a = area.begin_run().unwrap();
        let b = area.begin_run().unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_sweep_removes_only_run_entries() {
        let root = tempfile::tempdir().unwrap();
        let area = ScratchArea::new(root.path()).with_stale_after(Duration::ZERO);

        let stale = root.path().join(format!("{}crashed", RUN_DIR_PREFIX));
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("audio.mp3"), b"mp3").unwrap();
        std::fs::write(root.path().join(format!("{}file", RUN_DIR_PREFIX)), b"x").unwrap();
        let unrelated = root.path().join("keep.txt");
        std::fs::write(&unrelated, b"keep").unwrap();

        assert_eq!(area.sweep_stale().unwrap(), 2);
        assert!(!stale.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_sweep_keeps_recent_runs() {
        let root = tempfile::tempdir().unwrap();
        let area = ScratchArea::new(root.path());

        let live = area.begin_run().unwrap();
        assert_eq!(area.sweep_stale().unwrap(), 0);
        assert!(live.path().exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_sweep_removes_dead_owner_immediately() {
        let root = tempfile::tempdir().unwrap();
        let area = ScratchArea::new(root.path());

        // Above the kernel's pid_max, so never a live process.
        let killed = root.path().join(format!("{}killed", RUN_DIR_PREFIX));
        std::fs::create_dir_all(&killed).unwrap();
        std::fs::write(killed.join(OWNER_FILE), (i32::MAX as u32).to_string()).unwrap();
        std::fs::write(killed.join("audio.mp3"), b"mp3").unwrap();

        assert_eq!(area.sweep_stale().unwrap(), 1);
        assert!(!killed.exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_sweep_keeps_live_owner_past_threshold() {
        let root = tempfile::tempdir().unwrap();
        let area = ScratchArea::new(root.path()).with_stale_after(Duration::ZERO);

        let live = area.begin_run().unwrap();
        assert_eq!(area.sweep_stale().unwrap(), 0);
        assert!(live.path().exists());
    }

    #[test]
    fn test_sweep_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let area = ScratchArea::new(root.path().join("does-not-exist"));
        assert_eq!(area.sweep_stale().unwrap(), 0);
    }
}
