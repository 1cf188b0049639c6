//! Resumable progress: which app ids are done and which permanently failed.
//!
//! Both sets are persisted as newline-delimited id lists. An id lives in at
//! most one set. Writes go through a temp file and a rename so a crash mid-write
//! leaves the previous flush intact.
use crate::records::{AppId, CatalogEntry};
use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct ProgressTracker {
    completed_path: PathBuf,
    failed_path: PathBuf,
    completed: HashSet<AppId>,
    failed: HashSet<AppId>,
    flush_every: usize,
    since_flush: usize,
}

impl ProgressTracker {
    pub fn load(
        completed_path: impl Into<PathBuf>,
        failed_path: impl Into<PathBuf>,
        flush_every: usize,
    ) -> Result<Self> {
        let completed_path = completed_path.into();
        let failed_path = failed_path.into();
        let completed = read_id_set(&completed_path)?;
        let mut failed = read_id_set(&failed_path)?;

        let overlap: Vec<AppId> = failed.intersection(&completed).copied().collect();
        if !overlap.is_empty() {
            warn!(
                count = overlap.len(),
                "ids present in both completed and failed lists; keeping them as completed"
            );
            for id in &overlap {
                failed.remove(id);
            }
        }

        info!(
            completed = completed.len(),
            failed = failed.len(),
            path = %completed_path.display(),
            "progress state loaded"
        );
        Ok(Self {
            completed_path,
            failed_path,
            completed,
            failed,
            flush_every: flush_every.max(1),
            since_flush: 0,
        })
    }

    pub fn is_completed(&self, appid: AppId) -> bool {
        self.completed.contains(&appid)
    }

    pub fn is_failed(&self, appid: AppId) -> bool {
        self.failed.contains(&appid)
    }

    pub fn is_done(&self, appid: AppId) -> bool {
        self.is_completed(appid) || self.is_failed(appid)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Catalog ids not yet attempted, in catalog order, without duplicates.
    pub fn remaining(&self, catalog: &[CatalogEntry]) -> Vec<AppId> {
        let mut seen: HashSet<AppId> = HashSet::with_capacity(catalog.len());
        catalog
            .iter()
            .map(|entry| entry.appid)
            .filter(|id| !self.is_done(*id) && seen.insert(*id))
            .collect()
    }

    pub fn mark_completed(&mut self, appid: AppId) {
        self.failed.remove(&appid);
        if self.completed.insert(appid) {
            self.since_flush += 1;
        }
    }

    /// Record a permanent failure. Returns false (and changes nothing) when the
    /// id is already completed.
    pub fn mark_failed(&mut self, appid: AppId) -> bool {
        if self.completed.contains(&appid) {
            debug!(appid, "ignoring failure for an already completed app");
            return false;
        }
        if self.failed.insert(appid) {
            self.since_flush += 1;
        }
        true
    }

    /// Re-admit failed ids so the next run attempts them again. With `only`
    /// empty every failed id is cleared. Returns how many were removed.
    pub fn clear_failed(&mut self, only: &[AppId]) -> usize {
        let removed = if only.is_empty() {
            let n = self.failed.len();
            self.failed.clear();
            n
        } else {
            only.iter().filter(|id| self.failed.remove(id)).count()
        };
        if removed > 0 {
            self.since_flush += removed;
        }
        removed
    }

    pub fn flush_due(&self) -> bool {
        self.since_flush >= self.flush_every
    }

    pub fn pending(&self) -> usize {
        self.since_flush
    }

    pub fn flush(&mut self) -> Result<()> {
        write_id_set(&self.completed_path, &self.completed)?;
        write_id_set(&self.failed_path, &self.failed)?;
        debug!(
            completed = self.completed.len(),
            failed = self.failed.len(),
            flushed = self.since_flush,
            "progress state flushed"
        );
        self.since_flush = 0;
        Ok(())
    }
}

fn read_id_set(path: &Path) -> Result<HashSet<AppId>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    let mut out = HashSet::new();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<AppId>() {
            Ok(id) => {
                out.insert(id);
            }
            Err(_) => {
                warn!(path = %path.display(), line = lineno + 1, value = %line, "skipping malformed app id");
            }
        }
    }
    Ok(out)
}

fn write_id_set(path: &Path, ids: &HashSet<AppId>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let sorted: BTreeSet<&AppId> = ids.iter().collect();
    let mut buf = String::with_capacity(sorted.len() * 8);
    for id in sorted {
        buf.push_str(&id.to_string());
        buf.push('\n');
    }

    let tmp = path.with_extension("tmp");
    {
        let mut file =
            fs::File::create(&tmp).with_context(|| format!("failed to create {}", tmp.display()))?;
        file.write_all(buf.as_bytes())
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync {}", tmp.display()))?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to move {} into place", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(appid: AppId) -> CatalogEntry {
        CatalogEntry {
            appid,
            name: format!("app {appid}"),
        }
    }

    fn tracker_in(dir: &Path, flush_every: usize) -> ProgressTracker {
        ProgressTracker::load(
            dir.join("completed_apps.txt"),
            dir.join("failed_apps.txt"),
            flush_every,
        )
        .unwrap()
    }

    #[test]
    fn missing_and_empty_files_load_as_empty_sets() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("failed_apps.txt"), "").unwrap();
        let t = tracker_in(dir.path(), 10);
        assert_eq!(t.completed_count(), 0);
        assert_eq!(t.failed_count(), 0);
    }

    #[test]
    fn remaining_excludes_completed_and_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker_in(dir.path(), 10);
        t.mark_completed(10);
        let catalog = vec![entry(10), entry(20), entry(30)];
        let mut rest = t.remaining(&catalog);
        rest.sort_unstable();
        assert_eq!(rest, vec![20, 30]);

        t.mark_failed(30);
        assert_eq!(t.remaining(&catalog), vec![20]);
    }

    #[test]
    fn remaining_drops_duplicate_catalog_entries() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker_in(dir.path(), 10);
        let catalog = vec![entry(5), entry(7), entry(5)];
        assert_eq!(t.remaining(&catalog), vec![5, 7]);
    }

    #[test]
    fn sets_stay_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker_in(dir.path(), 10);
        t.mark_failed(1);
        t.mark_completed(1);
        assert!(t.is_completed(1));
        assert!(!t.is_failed(1));

        assert!(!t.mark_failed(1));
        assert!(t.is_completed(1));
        assert!(!t.is_failed(1));
    }

    #[test]
    fn flush_round_trips_and_tolerates_junk_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker_in(dir.path(), 10);
        t.mark_completed(3);
        t.mark_completed(1);
        t.mark_failed(2);
        t.flush().unwrap();

        let raw = fs::read_to_string(dir.path().join("completed_apps.txt")).unwrap();
        assert_eq!(raw, "1\n3\n");

        fs::write(
            dir.path().join("failed_apps.txt"),
            "2\n\nnot-a-number\n  4  \n",
        )
        .unwrap();
        let reloaded = tracker_in(dir.path(), 10);
        assert!(reloaded.is_completed(1) && reloaded.is_completed(3));
        assert!(reloaded.is_failed(2) && reloaded.is_failed(4));
        assert_eq!(reloaded.failed_count(), 2);
    }

    #[test]
    fn overlapping_files_resolve_to_completed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("completed_apps.txt"), "9\n").unwrap();
        fs::write(dir.path().join("failed_apps.txt"), "9\n8\n").unwrap();
        let t = tracker_in(dir.path(), 10);
        assert!(t.is_completed(9));
        assert!(!t.is_failed(9));
        assert!(t.is_failed(8));
    }

    #[test]
    fn crash_loses_at_most_one_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker_in(dir.path(), 10);
        for id in 1..=25u64 {
            t.mark_completed(id);
            if t.flush_due() {
                t.flush().unwrap();
            }
        }
        // Simulated crash: no final flush.
        drop(t);

        let reloaded = tracker_in(dir.path(), 10);
        assert_eq!(reloaded.completed_count(), 20);
        assert!((1..=20u64).all(|id| reloaded.is_completed(id)));
    }

    #[test]
    fn clear_failed_all_or_selected() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker_in(dir.path(), 10);
        t.mark_failed(1);
        t.mark_failed(2);
        t.mark_failed(3);
        assert_eq!(t.clear_failed(&[2, 99]), 1);
        assert!(t.is_failed(1) && !t.is_failed(2));
        assert_eq!(t.clear_failed(&[]), 2);
        assert_eq!(t.failed_count(), 0);
    }
}
