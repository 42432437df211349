//! Per-path mutation locks.
//!
//! A PUT or DELETE holds the lock for its path from the precondition check
//! until the file-system change is visible, so two conditional writers on
//! the same path cannot both pass an If-Match against the same tag.
//! Unrelated paths never contend.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Number of tracked paths above which dead entries are swept.
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Default)]
pub struct PathLocks {
    locks: DashMap<PathBuf, Weak<Mutex<()>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `path`.
    pub async fn lock(&self, path: &Path) -> OwnedMutexGuard<()> {
        if self.locks.len() > SWEEP_THRESHOLD {
            self.locks.retain(|_, lock| lock.strong_count() > 0);
        }

        let mutex = {
            let mut entry = self.locks.entry(path.to_path_buf()).or_default();
            match entry.upgrade() {
                Some(mutex) => mutex,
                None => {
                    let mutex = Arc::new(Mutex::new(()));
                    *entry = Arc::downgrade(&mutex);
                    mutex
                }
            }
        };

        mutex.lock_owned().await
    }

    /// Number of paths currently tracked, live or dead.
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_path_is_exclusive() {
        let locks = Arc::new(PathLocks::new());
        let guard = locks.lock(Path::new("/root/a.txt")).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(Path::new("/root/a.txt")).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_paths_do_not_contend() {
        let locks = PathLocks::new();
        let _a = locks.lock(Path::new("/root/a.txt")).await;
        let _b = tokio::time::timeout(
            Duration::from_secs(1),
            locks.lock(Path::new("/root/b.txt")),
        )
        .await
        .unwrap();
        assert_eq!(locks.tracked(), 2);
    }

    #[tokio::test]
    async fn test_released_lock_is_reused() {
        let locks = PathLocks::new();
        drop(locks.lock(Path::new("/root/a.txt")).await);
        drop(locks.lock(Path::new("/root/a.txt")).await);
        assert_eq!(locks.tracked(), 1);
    }
}
