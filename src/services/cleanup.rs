use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Best-effort removal of files and directory trees. Nothing here is allowed
/// to fail the request it follows: errors are logged and skipped.
pub fn cleanup(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = remove_path(path) {
            tracing::warn!("Cleanup failed for {}: {}", path.display(), e);
        }
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!("Cleanup skipped, already gone: {}", path.display());
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let result = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };

    match result {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Prefix of every per-request directory under the work root
pub const REQUEST_DIR_PREFIX: &str = "req-";

/// Remove `req-*` leftovers of requests that never finished (crash, kill -9).
/// Other entries of the work root are left alone. Returns how many entries
/// were removed.
pub fn sweep_work_root(root: &Path) -> usize {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Could not scan work dir {}: {}", root.display(), e);
            return 0;
        }
    };

    let stale: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(REQUEST_DIR_PREFIX))
        })
        .map(|entry| entry.path())
        .collect();
    let count = stale.len();
    cleanup(&stale);
    count
}

/// Owns every path a request created. Dropping the guard schedules their
/// removal on the blocking pool (or removes them inline outside a runtime),
/// so cleanup happens on every exit path: fatal error, finished response
/// body, or a client that disconnected mid-download.
#[derive(Debug, Default)]
pub struct CleanupGuard {
    paths: Vec<PathBuf>,
    root: Option<PathBuf>,
}

impl CleanupGuard {
    /// Guard for a request directory; the directory itself is removed last.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            paths: Vec::new(),
            root: Some(root.into()),
        }
    }

    pub fn track(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    /// Paths in the order they will be removed
    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths
            .iter()
            .cloned()
            .chain(self.root.iter().cloned())
            .collect()
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let paths = self.paths();
        if paths.is_empty() {
            return;
        }
        self.paths.clear();
        self.root = None;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || cleanup(&paths));
            }
            Err(_) => cleanup(&paths),
        }
    }
}
