//! Apply executor: per-root locking, snapshot verification, atomic renames
//! with rollback manifests.

pub mod lock;

pub use lock::{LOCK_FILE_NAME, RootLock};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::{info, warn};
use uuid::Uuid;

use namegnome_model::{
    ApplyMode, ApplyOptions, ApplyReport, ApplySummary, CollisionStrategy, ItemOutcome,
    ItemStatus, PlanItem, PlanReview, RollbackEntry, RollbackManifest, ScanSnapshot,
};

use crate::cache::CacheStore;
use crate::error::{CoreError, Result};
use crate::jobs::JobHandle;

fn manifest_key(id: &str) -> String {
    format!("rollback:{id}")
}

fn mint_rollback_token() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..16)
        .map(|_| (rng.sample(Alphanumeric) as char).to_ascii_lowercase())
        .collect();
    format!("rbk_{suffix}")
}

#[cfg(unix)]
fn inode_and_mtime(metadata: &std::fs::Metadata) -> (u64, i64) {
    use std::os::unix::fs::MetadataExt;
    (metadata.ino(), metadata.mtime())
}

#[cfg(not(unix))]
fn inode_and_mtime(metadata: &std::fs::Metadata) -> (u64, i64) {
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    (0, mtime)
}

fn is_cross_device(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc_exdev())
}

const fn libc_exdev() -> i32 {
    // EXDEV is 18 on every unix namegnome targets.
    18
}

#[derive(Debug)]
pub struct ApplyExecutor {
    store: Arc<CacheStore>,
}

impl ApplyExecutor {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }

    /// Run a plan against the filesystem. `snapshot` supplies the recorded
    /// mtimes for stale detection; without it only existence is checked.
    pub async fn apply(
        &self,
        plan: &PlanReview,
        root: &Path,
        snapshot: Option<&ScanSnapshot>,
        options: &ApplyOptions,
        lock_timeout: Duration,
        job: Option<&JobHandle>,
    ) -> Result<ApplyReport> {
        let started_at = Utc::now();
        let report_id = Uuid::new_v4();
        let dry_run = options.mode == ApplyMode::DryRun;

        // Dry runs never mutate, so they skip the lock entirely.
        let lock = if dry_run {
            None
        } else {
            Some(
                RootLock::acquire(
                    Arc::clone(&self.store),
                    root,
                    &report_id.to_string(),
                    lock_timeout,
                )
                .await?,
            )
        };

        let recorded_mtimes: BTreeMap<PathBuf, i64> = snapshot
            .map(|snap| {
                snap.files
                    .iter()
                    .map(|f| (f.path.clone(), f.modified.timestamp()))
                    .collect()
            })
            .unwrap_or_default();

        let mut outcomes: Vec<ItemOutcome> = Vec::with_capacity(plan.items.len());
        let mut committed: Vec<(usize, RollbackEntry)> = Vec::new();
        let mut rolled_back = false;
        let total = plan.items.len() as u64;

        'items: for (index, item) in plan.items.iter().enumerate() {
            if let Some(job) = job {
                job.progress("apply", index as u64, total);
            }
            let dst_abs = if item.dst.path.is_absolute() {
                item.dst.path.clone()
            } else {
                root.join(&item.dst.path)
            };

            let (status, error) = apply_item(
                item,
                &dst_abs,
                &recorded_mtimes,
                snapshot.is_some(),
                options,
                dry_run,
            );

            if status == ItemStatus::Renamed {
                let metadata = std::fs::metadata(&dst_abs).ok();
                let (inode, mtime) = metadata.as_ref().map(inode_and_mtime).unwrap_or((0, 0));
                committed.push((
                    index,
                    RollbackEntry {
                        src: item.src.path.clone(),
                        dst: dst_abs.clone(),
                        status,
                        inode,
                        mtime,
                    },
                ));
                self.persist_manifest(&report_id.to_string(), options.mode, &committed)
                    .await?;
            }
            outcomes.push(ItemOutcome {
                item_id: item.id,
                src: item.src.path.clone(),
                dst: dst_abs,
                status,
                error,
            });

            if status == ItemStatus::Failed
                && options.mode == ApplyMode::Transactional
                && !dry_run
            {
                // Hard failure: revert the committed prefix in reverse
                // order, then stop.
                rolled_back = true;
                let reverted = undo_entries(committed.iter().rev().map(|(i, e)| (*i, e)));
                for (entry_index, status) in reverted {
                    if let Some(outcome) = outcomes
                        .iter_mut()
                        .find(|o| o.item_id == plan.items[entry_index].id)
                    {
                        outcome.status = status;
                    }
                }
                for remaining in plan.items.iter().skip(index + 1) {
                    outcomes.push(ItemOutcome {
                        item_id: remaining.id,
                        src: remaining.src.path.clone(),
                        dst: remaining.dst.path.clone(),
                        status: ItemStatus::Failed,
                        error: Some("not attempted; transaction aborted".to_string()),
                    });
                }
                break 'items;
            }
        }

        if let Some(job) = job {
            job.progress("apply", total, total);
        }

        let rollback_token = if options.mode == ApplyMode::ContinueOnError
            && !dry_run
            && !committed.is_empty()
            && !rolled_back
        {
            let token = mint_rollback_token();
            self.persist_manifest(&token, options.mode, &committed).await?;
            Some(token)
        } else {
            None
        };

        if let Some(lock) = lock {
            lock.release().await?;
        }

        let mut summary = ApplySummary::default();
        for outcome in &outcomes {
            match outcome.status {
                ItemStatus::Renamed | ItemStatus::WouldRename => summary.renamed += 1,
                ItemStatus::SkippedCollision | ItemStatus::Unchanged => summary.skipped += 1,
                ItemStatus::Stale => summary.stale += 1,
                ItemStatus::Failed => summary.failed += 1,
                ItemStatus::RolledBack | ItemStatus::RollbackSkipped => summary.rolled_back += 1,
            }
        }

        info!(
            plan_id = %plan.plan_id,
            renamed = summary.renamed,
            failed = summary.failed,
            stale = summary.stale,
            rolled_back,
            "apply finished"
        );

        Ok(ApplyReport {
            report_id,
            plan_id: plan.plan_id,
            mode: options.mode,
            started_at,
            finished_at: Utc::now(),
            outcomes,
            summary,
            rollback_token,
            rolled_back,
        })
    }

    async fn persist_manifest(
        &self,
        id: &str,
        mode: ApplyMode,
        committed: &[(usize, RollbackEntry)],
    ) -> Result<()> {
        let manifest = RollbackManifest {
            report_id: Uuid::nil(),
            created_at: Utc::now(),
            mode,
            entries: committed.iter().map(|(_, entry)| entry.clone()).collect(),
        };
        self.store
            .kv_put_json(&manifest_key(id), &manifest, None)
            .await
    }

    /// Undo the committed subset behind a `rollback_token`, on demand.
    pub async fn rollback_by_token(&self, token: &str) -> Result<Vec<ItemOutcome>> {
        let Some(cached) = self
            .store
            .kv_get_json::<RollbackManifest>(&manifest_key(token))
            .await?
        else {
            return Err(CoreError::Validation(format!(
                "unknown rollback token: {token}"
            )));
        };
        let manifest = cached.value;
        let statuses = undo_entries(
            manifest
                .entries
                .iter()
                .enumerate()
                .rev()
                .map(|(i, e)| (i, e)),
        );
        let mut outcomes = Vec::new();
        for (index, status) in statuses {
            let entry = &manifest.entries[index];
            outcomes.push(ItemOutcome {
                item_id: Uuid::nil(),
                src: entry.src.clone(),
                dst: entry.dst.clone(),
                status,
                error: None,
            });
        }
        Ok(outcomes)
    }
}

fn apply_item(
    item: &PlanItem,
    dst_abs: &Path,
    recorded_mtimes: &BTreeMap<PathBuf, i64>,
    have_snapshot: bool,
    options: &ApplyOptions,
    dry_run: bool,
) -> (ItemStatus, Option<String>) {
    let src = &item.src.path;

    // Optimistic snapshot verification: the source must still look exactly
    // like it did at scan time.
    let src_metadata = match std::fs::metadata(src) {
        Ok(metadata) => metadata,
        Err(_) => return (ItemStatus::Stale, Some("source missing".into())),
    };
    if have_snapshot {
        match recorded_mtimes.get(src) {
            Some(recorded) if *recorded == inode_and_mtime(&src_metadata).1 => {}
            Some(_) => {
                return (ItemStatus::Stale, Some("source modified since scan".into()));
            }
            None => {
                return (
                    ItemStatus::Stale,
                    Some("source not part of the bound scan".into()),
                );
            }
        }
    }

    if src == dst_abs {
        return (ItemStatus::Unchanged, None);
    }

    let collision = dst_abs.exists();
    if collision && options.collision == CollisionStrategy::Skip {
        return (ItemStatus::SkippedCollision, None);
    }

    if dry_run {
        return (ItemStatus::WouldRename, None);
    }

    if let Some(parent) = dst_abs.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            return (
                ItemStatus::Failed,
                Some(format!("cannot create {}: {err}", parent.display())),
            );
        }
    }

    if collision && options.collision == CollisionStrategy::Backup {
        let backup = backup_path(dst_abs);
        if let Err(err) = std::fs::rename(dst_abs, &backup) {
            return (
                ItemStatus::Failed,
                Some(format!("cannot back up existing target: {err}")),
            );
        }
    }

    match std::fs::rename(src, dst_abs) {
        Ok(()) => (ItemStatus::Renamed, None),
        Err(err) if is_cross_device(&err) => (
            ItemStatus::Failed,
            Some("cross-device rename not supported".to_string()),
        ),
        Err(err) => (ItemStatus::Failed, Some(err.to_string())),
    }
}

fn backup_path(dst: &Path) -> PathBuf {
    let mut name = dst.file_name().map_or_else(
        || "backup".to_string(),
        |n| n.to_string_lossy().to_string(),
    );
    name.push_str(".bak");
    dst.with_file_name(name)
}

/// Reverse committed renames, newest first, verifying the recorded inode is
/// still present at the destination before restoring.
fn undo_entries<'a, I>(entries: I) -> Vec<(usize, ItemStatus)>
where
    I: Iterator<Item = (usize, &'a RollbackEntry)>,
{
    let mut results = Vec::new();
    for (index, entry) in entries {
        let current = std::fs::metadata(&entry.dst).ok();
        let inode_matches = current
            .as_ref()
            .map(|m| inode_and_mtime(m).0 == entry.inode)
            .unwrap_or(false);
        if !inode_matches {
            warn!(dst = %crate::logging::redacted(&entry.dst), "rollback skipped: inode moved on");
            results.push((index, ItemStatus::RollbackSkipped));
            continue;
        }
        match std::fs::rename(&entry.dst, &entry.src) {
            Ok(()) => results.push((index, ItemStatus::RolledBack)),
            Err(err) => {
                warn!(dst = %crate::logging::redacted(&entry.dst), error = %err, "rollback rename failed");
                results.push((index, ItemStatus::RollbackSkipped));
            }
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_path_appends_bak() {
        assert_eq!(
            backup_path(Path::new("/m/file.mkv")),
            PathBuf::from("/m/file.mkv.bak")
        );
    }

    #[test]
    fn rollback_tokens_are_prefixed() {
        let token = mint_rollback_token();
        assert!(token.starts_with("rbk_"));
        assert_eq!(token.len(), 20);
    }
}
