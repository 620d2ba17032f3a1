use crate::core::photo::{PhotoId, PhotoItem, PhotoStatus, Reason, Upload};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("No photos selected")]
    NothingSelected,

    #[error("Unknown photo: {0}")]
    UnknownPhoto(PhotoId),
}

/// Emitted after every catalog mutation so an observer can re-render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogEvent {
    BatchRegistered { ids: Vec<PhotoId> },
    BatchCommitted { ids: Vec<PhotoId> },
    Kept { ids: Vec<PhotoId> },
    Deleted { ids: Vec<PhotoId> },
}

/// Merged analysis outcome for one photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemVerdict {
    pub id: PhotoId,
    pub reasons: BTreeSet<Reason>,
}

impl ItemVerdict {
    pub fn status(&self) -> PhotoStatus {
        if self.reasons.is_empty() {
            PhotoStatus::Keep
        } else {
            PhotoStatus::Delete
        }
    }
}

/// Platform capability for removing a photo's backing file.
pub trait NativeFileDeleter {
    /// Remove the file at `location`. Returns where it was moved to, or
    /// `None` when it is gone for good.
    fn delete(&self, location: &Path) -> std::io::Result<Option<PathBuf>>;
}

#[derive(Debug, Clone)]
pub struct RemovedPhoto {
    pub id: PhotoId,
    pub display_name: String,
    pub native_location: Option<PathBuf>,
    /// Actual destination of a moved file.
    pub stored_at: Option<PathBuf>,
    pub reasons: BTreeSet<Reason>,
}

#[derive(Debug, Default)]
pub struct DeleteReport {
    pub removed: Vec<RemovedPhoto>,
    pub native_deleted: usize,
    pub native_failures: Vec<(PhotoId, String)>,
}

/// Authoritative collection of photos under review.
#[derive(Default)]
pub struct PhotoCatalog {
    items: Vec<PhotoItem>,
    event_sender: Option<mpsc::UnboundedSender<CatalogEvent>>,
}

impl PhotoCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_sender(mut self, sender: mpsc::UnboundedSender<CatalogEvent>) -> Self {
        self.event_sender = Some(sender);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[PhotoItem] {
        &self.items
    }

    pub fn get(&self, id: &PhotoId) -> Option<&PhotoItem> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn item(&self, id: &PhotoId) -> Result<&PhotoItem, CatalogError> {
        self.get(id)
            .ok_or_else(|| CatalogError::UnknownPhoto(id.clone()))
    }

    pub fn with_status(&self, status: PhotoStatus) -> Vec<&PhotoItem> {
        self.items
            .iter()
            .filter(|item| item.status() == status)
            .collect()
    }

    /// The "Suggested Deletion" bucket.
    pub fn suggested(&self) -> Vec<&PhotoItem> {
        self.with_status(PhotoStatus::Delete)
    }

    pub fn kept(&self) -> Vec<&PhotoItem> {
        self.with_status(PhotoStatus::Keep)
    }

    pub fn analyzing(&self) -> Vec<&PhotoItem> {
        self.with_status(PhotoStatus::Analyzing)
    }

    /// Add a new upload batch in `Analyzing` so placeholders render before
    /// any analysis starts. Returns the new ids in upload order.
    pub fn register(&mut self, uploads: Vec<Upload>) -> Vec<PhotoId> {
        let start = self.items.len();
        self.items
            .extend(uploads.into_iter().map(PhotoItem::from_upload));
        let ids: Vec<PhotoId> = self.items[start..]
            .iter()
            .map(|item| item.id().clone())
            .collect();

        log::info!("Registered {} photo(s) for analysis", ids.len());
        self.emit(CatalogEvent::BatchRegistered { ids: ids.clone() });
        ids
    }

    /// Apply a whole batch of verdicts in one step. Items that were removed or
    /// already decided by the user while the batch was in flight are left alone.
    pub fn commit(&mut self, verdicts: Vec<ItemVerdict>) -> Vec<PhotoId> {
        let mut committed = Vec::with_capacity(verdicts.len());

        for verdict in verdicts {
            let Some(item) = self.items.iter_mut().find(|item| *item.id() == verdict.id) else {
                log::debug!("Skipping verdict for removed photo {}", verdict.id);
                continue;
            };
            if item.status != PhotoStatus::Analyzing {
                log::debug!("Photo {} was decided during analysis, keeping user choice", verdict.id);
                continue;
            }

            item.status = verdict.status();
            item.reasons = verdict.reasons;
            committed.push(verdict.id);
        }

        self.emit(CatalogEvent::BatchCommitted {
            ids: committed.clone(),
        });
        committed
    }

    /// Move every selected photo to `Keep` and clear its reasons.
    pub fn keep(&mut self, selection: &HashSet<PhotoId>) -> Result<Vec<PhotoId>, CatalogError> {
        if selection.is_empty() {
            return Err(CatalogError::NothingSelected);
        }

        let mut kept = Vec::new();
        for item in self.items.iter_mut().filter(|item| selection.contains(item.id())) {
            item.status = PhotoStatus::Keep;
            item.reasons.clear();
            kept.push(item.id().clone());
        }

        log::info!("Marked {} photo(s) to keep", kept.len());
        self.emit(CatalogEvent::Kept { ids: kept.clone() });
        Ok(kept)
    }

    /// Remove the selected photos, releasing their buffers. When a deleter is
    /// supplied, photos with a native location also have their file removed.
    /// A photo whose file could not be removed stays in the catalog, untouched,
    /// and is listed in `native_failures` so the user can retry.
    pub fn delete(
        &mut self,
        selection: &HashSet<PhotoId>,
        deleter: Option<&dyn NativeFileDeleter>,
    ) -> Result<DeleteReport, CatalogError> {
        if selection.is_empty() {
            return Err(CatalogError::NothingSelected);
        }

        let mut report = DeleteReport::default();
        let mut remaining = Vec::with_capacity(self.items.len());
        for item in std::mem::take(&mut self.items) {
            if !selection.contains(item.id()) {
                remaining.push(item);
                continue;
            }

            let outcome = match (deleter, item.native_location()) {
                (Some(deleter), Some(location)) => Some(deleter.delete(location).inspect_err(|e| {
                    log::warn!("Failed to delete {}: {}", location.display(), e)
                })),
                _ => None,
            };
            let stored_at = match outcome {
                Some(Ok(stored_at)) => {
                    report.native_deleted += 1;
                    stored_at
                }
                Some(Err(e)) => {
                    report.native_failures.push((item.id().clone(), e.to_string()));
                    remaining.push(item);
                    continue;
                }
                None => None,
            };

            report.removed.push(RemovedPhoto {
                id: item.id().clone(),
                display_name: item.display_name().to_string(),
                native_location: item.native_location().cloned(),
                stored_at,
                reasons: item.reasons().clone(),
            });
        }
        self.items = remaining;

        let ids: Vec<PhotoId> = report.removed.iter().map(|r| r.id.clone()).collect();
        log::info!("Deleted {} photo(s)", ids.len());
        self.emit(CatalogEvent::Deleted { ids });
        Ok(report)
    }

    fn emit(&self, event: CatalogEvent) {
        if let Some(sender) = &self.event_sender {
            let _ = sender.send(event);
        }
    }
}
