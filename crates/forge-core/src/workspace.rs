//! Per-invocation workspace provisioning
//!
//! Every build partition and every test-stage run gets a fresh
//! `{root_dir, build_dir, tmp_dir}` triple (`spec.md` §2 row 6, §4.4 step 3,
//! §9 "Workspace retention"). `root_dir` is always the process's current
//! working directory — Forge has no notion of a repository root to walk up
//! to, unlike the predecessor CLI this orchestrator's workspace handling
//! was generalized from. `tmp_dir` is a fresh `tmp/tmp-<uuid>` scratch
//! directory; after provisioning, older `tmp-*` siblings beyond the 10
//! most-recently-modified are pruned, tolerating `stat`/removal failures on
//! individual entries without aborting the whole prune.

use crate::errors::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// How many `tmp/tmp-*` directories to retain after pruning.
pub const RETAINED_TMP_DIRS: usize = 10;

/// The `{root_dir, build_dir, tmp_dir}` triple passed to every engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Process working directory, made absolute.
    pub root_dir: PathBuf,
    /// `root_dir/build` — durable build outputs.
    pub build_dir: PathBuf,
    /// `root_dir/tmp/tmp-<uuid>` — this invocation's scratch directory.
    pub tmp_dir: PathBuf,
}

/// Create `build/` and a fresh `tmp/tmp-<uuid>/` under `root_dir`, then
/// prune `root_dir/tmp` down to [`RETAINED_TMP_DIRS`] most-recent entries.
#[instrument(skip_all, fields(root = %root_dir.display()))]
pub fn provision(root_dir: &Path) -> Result<Workspace> {
    let root_dir = if root_dir.is_absolute() {
        root_dir.to_path_buf()
    } else {
        std::env::current_dir()?.join(root_dir)
    };

    let build_dir = root_dir.join("build");
    fs::create_dir_all(&build_dir)?;

    let tmp_root = root_dir.join("tmp");
    fs::create_dir_all(&tmp_root)?;

    let tmp_dir = tmp_root.join(format!("tmp-{}", Uuid::new_v4()));
    fs::create_dir_all(&tmp_dir)?;
    debug!("provisioned workspace at {}", tmp_dir.display());

    prune_tmp_dirs(&tmp_root, RETAINED_TMP_DIRS);

    Ok(Workspace {
        root_dir,
        build_dir,
        tmp_dir,
    })
}

/// Keep only the `retain` most-recently-modified `tmp-*` entries under
/// `tmp_root`. A `stat` or removal failure on one entry is logged and
/// skipped rather than treated as fatal, per `spec.md` §9.
#[instrument(skip_all, fields(tmp_root = %tmp_root.display(), retain))]
fn prune_tmp_dirs(tmp_root: &Path, retain: usize) {
    let entries = match fs::read_dir(tmp_root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("failed to list {}: {e}", tmp_root.display());
            return;
        }
    };

    let mut dirs: Vec<(PathBuf, SystemTime)> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let name_is_tmp = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("tmp-"));
        if !name_is_tmp || !path.is_dir() {
            continue;
        }
        match entry.metadata().and_then(|m| m.modified()) {
            Ok(mtime) => dirs.push((path, mtime)),
            Err(e) => warn!("failed to stat {}: {e}", path.display()),
        }
    }

    if dirs.len() <= retain {
        return;
    }

    // Newest first; anything past `retain` gets pruned.
    dirs.sort_by(|a, b| b.1.cmp(&a.1));
    for (path, _) in dirs.into_iter().skip(retain) {
        if let Err(e) = fs::remove_dir_all(&path) {
            warn!("failed to prune stale tmp dir {}: {e}", path.display());
        } else {
            debug!("pruned stale tmp dir {}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn provision_creates_build_and_tmp_dirs() {
        let root = TempDir::new().unwrap();
        let ws = provision(root.path()).unwrap();

        assert!(ws.build_dir.exists());
        assert!(ws.tmp_dir.exists());
        assert!(ws.tmp_dir.starts_with(root.path().join("tmp")));
        assert!(ws
            .tmp_dir
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("tmp-"));
    }

    #[test]
    fn each_invocation_gets_a_distinct_tmp_dir() {
        let root = TempDir::new().unwrap();
        let a = provision(root.path()).unwrap();
        let b = provision(root.path()).unwrap();
        assert_ne!(a.tmp_dir, b.tmp_dir);
    }

    #[test]
    fn prune_retains_only_most_recent_n() {
        let root = TempDir::new().unwrap();
        for _ in 0..(RETAINED_TMP_DIRS + 5) {
            provision(root.path()).unwrap();
            // Ensure distinguishable mtimes across filesystems with coarse
            // mtime resolution.
            sleep(Duration::from_millis(5));
        }

        let tmp_root = root.path().join("tmp");
        let remaining = fs::read_dir(&tmp_root).unwrap().count();
        assert!(
            remaining <= RETAINED_TMP_DIRS,
            "expected at most {RETAINED_TMP_DIRS} dirs, found {remaining}"
        );
    }

    #[test]
    fn prune_tolerates_unreadable_tmp_root() {
        // Pruning against a nonexistent directory must not panic.
        prune_tmp_dirs(Path::new("/nonexistent/definitely/not/here"), RETAINED_TMP_DIRS);
    }
}
