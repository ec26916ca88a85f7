use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::error::{CoreError, Result};

/// Cooperative lock file dropped into the root being applied.
pub const LOCK_FILE_NAME: &str = ".namegnome.lock";

const RETRY_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockFileContents {
    owner: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_alive(_pid: u32) -> bool {
    // Cannot verify; err on the side of treating the owner as live.
    true
}

fn lock_name(root: &Path) -> String {
    format!("root:{}", root.display())
}

/// Exclusive per-root apply lock, two layers deep: a `.namegnome.lock` file
/// under the root plus a row in the cache's `locks` table. Orphans (owner
/// process gone, acquisition older than the timeout) are recovered.
#[derive(Debug)]
pub struct RootLock {
    store: Arc<CacheStore>,
    root: PathBuf,
    lock_path: PathBuf,
    name: String,
    owner: String,
    released: bool,
}

impl RootLock {
    pub async fn acquire(
        store: Arc<CacheStore>,
        root: &Path,
        owner: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let lock_path = root.join(LOCK_FILE_NAME);
        let name = lock_name(root);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match Self::try_acquire(&store, root, &lock_path, &name, owner, timeout).await {
                Ok(lock) => return Ok(lock),
                Err(CoreError::Locked {
                    root,
                    owner,
                    acquired_at,
                }) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(CoreError::Locked {
                            root,
                            owner,
                            acquired_at,
                        });
                    }
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn try_acquire(
        store: &Arc<CacheStore>,
        root: &Path,
        lock_path: &Path,
        name: &str,
        owner: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let contents = LockFileContents {
            owner: owner.to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let serialized = serde_json::to_string(&contents)?;

        // Layer 1: O_EXCL lock file creation.
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(file) => {
                use std::io::Write;
                let mut file = file;
                file.write_all(serialized.as_bytes())
                    .map_err(|err| CoreError::Filesystem {
                        path: lock_path.to_path_buf(),
                        message: err.to_string(),
                    })?;
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(lock_path)
                    .ok()
                    .and_then(|raw| serde_json::from_str::<LockFileContents>(&raw).ok());
                if let Some(holder) = &holder {
                    let age = Utc::now().signed_duration_since(holder.acquired_at);
                    let orphaned = !pid_alive(holder.pid)
                        && age.num_seconds() as u64 > timeout.as_secs();
                    if orphaned {
                        warn!(
                            owner = holder.owner,
                            pid = holder.pid,
                            "recovering orphaned lock file"
                        );
                        let _ = std::fs::remove_file(lock_path);
                        store.force_release_lock(name).await?;
                        return Box::pin(Self::try_acquire(
                            store, root, lock_path, name, owner, timeout,
                        ))
                        .await;
                    }
                }
                return Err(CoreError::Locked {
                    root: root.to_path_buf(),
                    owner: holder
                        .as_ref()
                        .map_or_else(|| "unknown".to_string(), |h| h.owner.clone()),
                    acquired_at: holder.map_or_else(Utc::now, |h| h.acquired_at),
                });
            }
            Err(err) => {
                return Err(CoreError::Filesystem {
                    path: lock_path.to_path_buf(),
                    message: err.to_string(),
                });
            }
        }

        // Layer 2: advisory row in the cache database.
        let row_taken = store
            .acquire_lock(name, owner, Some(i64::from(std::process::id())))
            .await?;
        if !row_taken {
            let holder = store.get_lock(name).await?;
            let orphaned = holder.as_ref().is_some_and(|row| {
                let age = Utc::now().signed_duration_since(row.acquired_at);
                let dead = row.pid.is_none_or(|pid| !pid_alive(pid as u32));
                dead && age.num_seconds() as u64 > timeout.as_secs()
            });
            if orphaned {
                warn!(name, "recovering orphaned lock row");
                store.force_release_lock(name).await?;
                if !store
                    .acquire_lock(name, owner, Some(i64::from(std::process::id())))
                    .await?
                {
                    let _ = std::fs::remove_file(lock_path);
                    let holder = store.get_lock(name).await?;
                    return Err(CoreError::Locked {
                        root: root.to_path_buf(),
                        owner: holder.as_ref().map_or_else(
                            || "unknown".to_string(),
                            |row| row.owner.clone(),
                        ),
                        acquired_at: holder.map_or_else(Utc::now, |row| row.acquired_at),
                    });
                }
            } else {
                let _ = std::fs::remove_file(lock_path);
                return Err(CoreError::Locked {
                    root: root.to_path_buf(),
                    owner: holder
                        .as_ref()
                        .map_or_else(|| "unknown".to_string(), |row| row.owner.clone()),
                    acquired_at: holder.map_or_else(Utc::now, |row| row.acquired_at),
                });
            }
        }

        info!(root = %root.display(), owner, "acquired apply lock");
        Ok(Self {
            store: Arc::clone(store),
            root: root.to_path_buf(),
            lock_path: lock_path.to_path_buf(),
            name: name.to_string(),
            owner: owner.to_string(),
            released: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Release both layers. Also runs (best effort, file layer only) on drop
    /// so a crash mid-apply leaves a recoverable rather than a live lock.
    pub async fn release(mut self) -> Result<()> {
        let _ = std::fs::remove_file(&self.lock_path);
        self.store.release_lock(&self.name, &self.owner).await?;
        self.released = true;
        Ok(())
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
