//! Filesystem sentinels coordinating pod lifecycle
//!
//! A Kubernetes PreStop hook writes `TERMINATING` into the working directory
//! when the pod is going away; the hook waits for `WORKING` to disappear
//! before proceeding, so an in-flight item can finish and report. Everything
//! else in the working directory is ephemeral and purged before each poll.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

pub const WORKING_FILE: &str = "WORKING";
pub const TERMINATING_FILE: &str = "TERMINATING";

/// Termination state plus the `WORKING` marker for the pod's working directory
#[derive(Clone)]
pub struct Sentinels {
    dir: PathBuf,
    signalled: Arc<AtomicBool>,
}

impl Sentinels {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            signalled: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.dir
    }

    /// Record an intent to exit, as SIGTERM does
    pub fn request_termination(&self) {
        self.signalled.store(true, Ordering::SeqCst);
    }

    /// Whether the pod has been told to go away, by signal or PreStop file
    #[must_use]
    pub fn terminating(&self) -> bool {
        self.signalled.load(Ordering::SeqCst) || self.dir.join(TERMINATING_FILE).exists()
    }

    pub async fn set_working(&self) {
        if let Err(e) = tokio::fs::write(self.dir.join(WORKING_FILE), b"").await {
            warn!("Failed to create WORKING sentinel: {}", e);
        }
    }

    pub async fn clear_working(&self) {
        if let Err(e) = tokio::fs::remove_file(self.dir.join(WORKING_FILE)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove WORKING sentinel: {}", e);
            }
        }
    }

    /// Sleep for `total`, waking at least once a second to check for
    /// termination. Returns true when termination cut the sleep short.
    pub async fn sleep_check(&self, total: Duration) -> bool {
        let mut remaining = total;
        while remaining > Duration::ZERO {
            if self.terminating() {
                return true;
            }
            let slice = remaining.min(Duration::from_secs(1));
            tokio::time::sleep(slice).await;
            remaining = remaining.saturating_sub(slice);
        }
        self.terminating()
    }

    /// Delete every entry in the working directory except the sentinels, so
    /// artifacts left behind by service images cannot exhaust ephemeral
    /// storage.
    pub async fn purge_working_dir(&self) {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read working directory: {}", e);
                return;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if name == WORKING_FILE || name == TERMINATING_FILE {
                continue;
            }
            let path = entry.path();
            let removed = match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => tokio::fs::remove_dir_all(&path).await,
                _ => tokio::fs::remove_file(&path).await,
            };
            if let Err(e) = removed {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_working_marker_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let sentinels = Sentinels::new(dir.path());

        sentinels.set_working().await;
        assert!(dir.path().join(WORKING_FILE).exists());
        sentinels.clear_working().await;
        assert!(!dir.path().join(WORKING_FILE).exists());
        // clearing twice is fine
        sentinels.clear_working().await;
    }

    #[tokio::test]
    async fn test_terminating_file_detected() {
        let dir = tempfile::tempdir().unwrap();
        let sentinels = Sentinels::new(dir.path());
        assert!(!sentinels.terminating());

        std::fs::write(dir.path().join(TERMINATING_FILE), b"").unwrap();
        assert!(sentinels.terminating());
    }

    #[tokio::test]
    async fn test_signal_sets_termination() {
        let dir = tempfile::tempdir().unwrap();
        let sentinels = Sentinels::new(dir.path());
        sentinels.request_termination();
        assert!(sentinels.terminating());
    }

    #[tokio::test]
    async fn test_sleep_check_aborts_within_a_second() {
        let dir = tempfile::tempdir().unwrap();
        let sentinels = Sentinels::new(dir.path());

        let waker = sentinels.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            waker.request_termination();
        });

        let started = Instant::now();
        let terminated = sentinels.sleep_check(Duration::from_secs(30)).await;
        assert!(terminated);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_purge_spares_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let sentinels = Sentinels::new(dir.path());

        std::fs::write(dir.path().join(WORKING_FILE), b"").unwrap();
        std::fs::write(dir.path().join(TERMINATING_FILE), b"").unwrap();
        std::fs::write(dir.path().join("scratch.nc"), b"data").unwrap();
        std::fs::create_dir(dir.path().join("outputs")).unwrap();

        sentinels.purge_working_dir().await;

        assert!(dir.path().join(WORKING_FILE).exists());
        assert!(dir.path().join(TERMINATING_FILE).exists());
        assert!(!dir.path().join("scratch.nc").exists());
        assert!(!dir.path().join("outputs").exists());
    }
}
