//! The temp-file manager (§4.1.2): scoped ownership of temp files created
//! while parsing multipart uploads.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Owns every temp file created while parsing multipart request bodies.
/// Every path it returns from [`TempFileManager::create`] is guaranteed
/// to be deleted by [`TempFileManager::cleanup`] (or when the manager is
/// dropped) unless the caller explicitly hands ownership elsewhere via
/// [`TempFileManager::untrack`] (which is what
/// [`crate::request::UploadedFile::move_to`] does).
#[derive(Debug)]
pub struct TempFileManager {
    dir: PathBuf,
    tracked: Mutex<Vec<PathBuf>>,
}

impl TempFileManager {
    /// Creates a manager that writes temp files under `dir` (typically
    /// `std::env::temp_dir()`).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            tracked: Mutex::new(Vec::new()),
        }
    }

    /// Writes `data` to a freshly created, uniquely named temp file and
    /// begins tracking it.
    pub fn create(&self, data: &[u8]) -> std::io::Result<PathBuf> {
        let name = format!("loopserve-upload-{}.tmp", self.next_id());
        let path = self.dir.join(name);
        let mut file = std::fs::File::create(&path)?;
        file.write_all(data)?;
        self.tracked.lock().unwrap().push(path.clone());
        Ok(path)
    }

    fn next_id(&self) -> u64 {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        COUNTER.fetch_add(1, Ordering::Relaxed)
    }

    /// Stops tracking `path` without deleting it — called once its
    /// ownership has been transferred out (e.g. via `move_to`).
    pub fn untrack(&self, path: &Path) {
        self.tracked.lock().unwrap().retain(|p| p != path);
    }

    /// Deletes every tracked temp file that has not been moved out,
    /// across all exit paths. Called at server reset, after request
    /// completion, and on fatal-error recovery (§4.1.2).
    pub fn cleanup(&self) {
        let mut tracked = self.tracked.lock().unwrap();
        for path in tracked.drain(..) {
            let _ = std::fs::remove_file(path);
        }
    }

    /// Deletes and stops tracking exactly `paths`, leaving every other
    /// tracked file untouched. Used to clean up a single request's
    /// uploads once its response has been written, without disturbing
    /// uploads still in flight for other requests.
    pub fn cleanup_paths(&self, paths: &[PathBuf]) {
        if paths.is_empty() {
            return;
        }
        let mut tracked = self.tracked.lock().unwrap();
        tracked.retain(|p| !paths.contains(p));
        drop(tracked);
        for path in paths {
            let _ = std::fs::remove_file(path);
        }
    }

    /// The number of temp files still tracked (not yet cleaned up or
    /// moved out).
    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().unwrap().len()
    }
}

impl Drop for TempFileManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cleanup_removes_untouched_files() {
        let manager = TempFileManager::new(std::env::temp_dir());
        let path = manager.create(b"hello").unwrap();
        assert!(path.exists());
        manager.cleanup();
        assert!(!path.exists());
    }

    #[test]
    fn untracked_files_survive_cleanup() {
        let manager = TempFileManager::new(std::env::temp_dir());
        let path = manager.create(b"hello").unwrap();
        manager.untrack(&path);
        manager.cleanup();
        assert!(path.exists());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn cleanup_paths_only_touches_the_given_files() {
        let manager = TempFileManager::new(std::env::temp_dir());
        let a = manager.create(b"a").unwrap();
        let b = manager.create(b"b").unwrap();
        manager.cleanup_paths(&[a.clone()]);
        assert!(!a.exists());
        assert!(b.exists());
        assert_eq!(manager.tracked_count(), 1);
        manager.cleanup();
        assert!(!b.exists());
    }

    #[test]
    fn drop_cleans_up_remaining_files() {
        let path = {
            let manager = TempFileManager::new(std::env::temp_dir());
            manager.create(b"hello").unwrap()
        };
        assert!(!path.exists());
    }
}
