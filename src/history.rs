// Append-only JSONL log of confirmed batch deletions, one record per batch.

use crate::core::catalog::RemovedPhoto;
use crate::core::photo::Reason;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const HISTORY_FILE_NAME: &str = ".sweeprs-history.jsonl";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("History record {index} cannot be restored: {detail}")]
    InvalidRecord { index: usize, detail: String },

    #[error("No moved history records to restore")]
    NothingToRestore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Moved,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedEntry {
    pub original: PathBuf,
    /// Where the file went when it was moved rather than deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_at: Option<PathBuf>,
    pub reasons: Vec<Reason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: String,
    pub removed: Vec<RemovedEntry>,
    pub action: HistoryAction,
}

impl HistoryRecord {
    /// Build a record from a delete report. Photos without a native file
    /// have nothing to restore and are left out. `stored_at` is taken from
    /// where the deleter actually put each file.
    pub fn from_removed(removed: &[RemovedPhoto], action: HistoryAction) -> Self {
        let removed = removed
            .iter()
            .filter_map(|photo| {
                Some(RemovedEntry {
                    original: photo.native_location.clone()?,
                    stored_at: photo.stored_at.clone(),
                    reasons: photo.reasons.iter().copied().collect(),
                })
            })
            .collect();

        Self {
            timestamp: Utc::now().to_rfc3339(),
            removed,
            action,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSelection {
    Latest,
    Index(usize),
    All,
}

#[derive(Debug, Default)]
pub struct RestoreReport {
    pub records: usize,
    pub restored: Vec<(PathBuf, PathBuf)>,
    pub skipped: Vec<(PathBuf, String)>,
}

pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn for_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(HISTORY_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(out, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }

    /// Every readable record with its line index. Malformed lines are
    /// logged and skipped.
    pub fn list(&self) -> Result<Vec<(usize, HistoryRecord)>, HistoryError> {
        Ok(self
            .read_lines()?
            .into_iter()
            .enumerate()
            .filter_map(|(index, line)| match serde_json::from_str(&line) {
                Ok(record) => Some((index, record)),
                Err(e) => {
                    log::warn!("Skipping malformed history entry {}: {}", index, e);
                    None
                }
            })
            .collect())
    }

    /// Move files from selected `moved` records back to where they were and
    /// drop those records from the log. Other lines are kept as they are.
    pub fn restore(&self, selection: RestoreSelection) -> Result<RestoreReport, HistoryError> {
        let lines = self.read_lines()?;
        let records: Vec<Option<HistoryRecord>> = lines
            .iter()
            .map(|line| serde_json::from_str(line).ok())
            .collect();
        let restorable: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.as_ref().is_some_and(|r| r.action == HistoryAction::Moved))
            .map(|(i, _)| i)
            .collect();

        let selected: Vec<usize> = match selection {
            RestoreSelection::All if restorable.is_empty() => {
                return Err(HistoryError::NothingToRestore);
            }
            RestoreSelection::All => restorable,
            RestoreSelection::Latest => {
                vec![*restorable.last().ok_or(HistoryError::NothingToRestore)?]
            }
            RestoreSelection::Index(index) => {
                if !restorable.contains(&index) {
                    return Err(HistoryError::InvalidRecord {
                        index,
                        detail: "not a moved record in this history".to_string(),
                    });
                }
                vec![index]
            }
        };

        let mut report = RestoreReport::default();
        for &index in &selected {
            let Some(record) = &records[index] else {
                continue;
            };
            log::info!(
                "Restoring {} file(s) from record {}",
                record.removed.len(),
                record.timestamp
            );
            for entry in &record.removed {
                restore_entry(entry, &mut report)?;
            }
            report.records += 1;
        }

        let remaining: String = lines
            .iter()
            .enumerate()
            .filter(|(i, _)| !selected.contains(i))
            .map(|(_, line)| format!("{}\n", line))
            .collect();
        fs::write(&self.path, remaining)?;

        Ok(report)
    }

    fn read_lines(&self) -> Result<Vec<String>, HistoryError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

fn restore_entry(entry: &RemovedEntry, report: &mut RestoreReport) -> Result<(), HistoryError> {
    let Some(src) = &entry.stored_at else {
        report
            .skipped
            .push((entry.original.clone(), "no stored copy".to_string()));
        return Ok(());
    };
    if !src.exists() {
        log::warn!("Stored file {} no longer exists; skipping", src.display());
        report
            .skipped
            .push((src.clone(), "stored file missing".to_string()));
        return Ok(());
    }
    if entry.original.exists() {
        log::warn!("{} already exists; not overwriting", entry.original.display());
        report
            .skipped
            .push((src.clone(), "original path is occupied".to_string()));
        return Ok(());
    }

    if let Some(parent) = entry.original.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(src, &entry.original)?;
    report.restored.push((src.clone(), entry.original.clone()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::NativeFileDeleter;
    use crate::core::photo::PhotoId;
    use crate::core::trash::FsDeleter;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn removed(path: &Path, stored_at: Option<PathBuf>, reason: Reason) -> RemovedPhoto {
        RemovedPhoto {
            id: PhotoId::new(),
            display_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            native_location: Some(path.to_path_buf()),
            stored_at,
            reasons: BTreeSet::from([reason]),
        }
    }

    /// Move `paths` (relative to `dir`) into `cleanup/` and log it.
    fn move_and_record(dir: &Path, log: &HistoryLog, paths: &[&str]) {
        let deleter = FsDeleter::MoveTo(dir.join("cleanup"));
        fs::create_dir_all(dir.join("cleanup")).unwrap();
        let photos: Vec<RemovedPhoto> = paths
            .iter()
            .map(|rel| {
                let original = dir.join(rel);
                if let Some(parent) = original.parent() {
                    fs::create_dir_all(parent).unwrap();
                }
                fs::write(&original, rel.as_bytes()).unwrap();
                let stored_at = deleter.delete(&original).unwrap();
                removed(&original, stored_at, Reason::Blurry)
            })
            .collect();
        let record = HistoryRecord::from_removed(&photos, HistoryAction::Moved);
        log.append(&record).unwrap();
    }

    #[test]
    fn test_append_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let log = HistoryLog::for_dir(temp_dir.path());
        assert!(log.list().unwrap().is_empty());

        move_and_record(temp_dir.path(), &log, &["a.jpg"]);
        let deleted = HistoryRecord::from_removed(
            &[removed(&temp_dir.path().join("b.jpg"), None, Reason::Screenshot)],
            HistoryAction::Deleted,
        );
        log.append(&deleted).unwrap();

        let records = log.list().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].1.action, HistoryAction::Moved);
        assert_eq!(records[1].1.removed[0].reasons, vec![Reason::Screenshot]);
        assert_eq!(records[1].1.removed[0].stored_at, None);
    }

    #[test]
    fn test_memory_only_photos_are_not_recorded() {
        let photo = RemovedPhoto {
            id: PhotoId::new(),
            display_name: "from_zip.jpg".to_string(),
            native_location: None,
            stored_at: None,
            reasons: BTreeSet::new(),
        };
        let record = HistoryRecord::from_removed(&[photo], HistoryAction::Deleted);
        assert!(record.removed.is_empty());
    }

    #[test]
    fn test_restore_latest_moves_files_back() {
        let temp_dir = TempDir::new().unwrap();
        let log = HistoryLog::for_dir(temp_dir.path());
        move_and_record(temp_dir.path(), &log, &["one.jpg"]);
        move_and_record(temp_dir.path(), &log, &["two.jpg", "three.jpg"]);

        let report = log.restore(RestoreSelection::Latest).unwrap();

        assert_eq!(report.records, 1);
        assert_eq!(report.restored.len(), 2);
        assert!(temp_dir.path().join("two.jpg").exists());
        assert!(temp_dir.path().join("three.jpg").exists());
        assert!(!temp_dir.path().join("one.jpg").exists());

        let remaining = log.list().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].1.removed[0].original, temp_dir.path().join("one.jpg"));
    }

    #[test]
    fn test_restore_keeps_other_lines() {
        let temp_dir = TempDir::new().unwrap();
        let log = HistoryLog::for_dir(temp_dir.path());
        move_and_record(temp_dir.path(), &log, &["one.jpg"]);
        fs::write(
            log.path(),
            format!("{}not json\n", fs::read_to_string(log.path()).unwrap()),
        )
        .unwrap();

        let report = log.restore(RestoreSelection::All).unwrap();

        assert_eq!(report.records, 1);
        assert_eq!(fs::read_to_string(log.path()).unwrap(), "not json\n");
    }

    #[test]
    fn test_restore_rejects_deleted_record() {
        let temp_dir = TempDir::new().unwrap();
        let log = HistoryLog::for_dir(temp_dir.path());
        let deleted = HistoryRecord::from_removed(
            &[removed(&temp_dir.path().join("gone.jpg"), None, Reason::Duplicate)],
            HistoryAction::Deleted,
        );
        log.append(&deleted).unwrap();

        assert!(matches!(
            log.restore(RestoreSelection::Index(0)),
            Err(HistoryError::InvalidRecord { index: 0, .. })
        ));
        assert!(matches!(
            log.restore(RestoreSelection::Latest),
            Err(HistoryError::NothingToRestore)
        ));
    }

    #[test]
    fn test_restore_does_not_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let log = HistoryLog::for_dir(temp_dir.path());
        move_and_record(temp_dir.path(), &log, &["dup.jpg"]);
        fs::write(temp_dir.path().join("dup.jpg"), b"new file").unwrap();

        let report = log.restore(RestoreSelection::Latest).unwrap();

        assert!(report.restored.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(fs::read(temp_dir.path().join("dup.jpg")).unwrap(), b"new file");
    }

    #[test]
    fn test_restore_same_names_from_different_folders() {
        let temp_dir = TempDir::new().unwrap();
        let log = HistoryLog::for_dir(temp_dir.path());
        move_and_record(temp_dir.path(), &log, &["a.jpg", "nested/a.jpg"]);

        let records = log.list().unwrap();
        let stored: Vec<_> = records[0]
            .1
            .removed
            .iter()
            .map(|entry| entry.stored_at.clone().unwrap())
            .collect();
        assert_ne!(stored[0], stored[1]);

        let report = log.restore(RestoreSelection::Latest).unwrap();

        assert_eq!(report.restored.len(), 2);
        assert_eq!(fs::read(temp_dir.path().join("a.jpg")).unwrap(), b"a.jpg");
        assert_eq!(
            fs::read(temp_dir.path().join("nested/a.jpg")).unwrap(),
            b"nested/a.jpg"
        );
    }
}
