// Upload-time limits applied before anything reaches the catalog.

use crate::config::UploadLimits;
use crate::core::photo::Upload;
use std::fs;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use walkdir::WalkDir;

pub const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "webp", "heic", "bmp"];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Batch of {count} files exceeds the limit of {limit}")]
    TooManyFiles { count: usize, limit: usize },

    #[error("Archive is {size} bytes, limit is {limit}")]
    ArchiveTooLarge { size: u64, limit: u64 },

    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    UnsupportedType,
    TooLarge { size: u64, limit: u64 },
    Unreadable(String),
}

#[derive(Debug, Clone)]
pub struct Rejected {
    pub name: String,
    pub reason: RejectReason,
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub accepted: Vec<Upload>,
    pub rejected: Vec<Rejected>,
}

impl IngestReport {
    fn reject(&mut self, name: impl Into<String>, reason: RejectReason) {
        let name = name.into();
        log::warn!("Skipping {}: {:?}", name, reason);
        self.rejected.push(Rejected { name, reason });
    }
}

pub struct Ingestor {
    limits: UploadLimits,
}

impl Ingestor {
    pub fn new(limits: UploadLimits) -> Self {
        Self { limits }
    }

    pub fn is_supported(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// Recursively collect image files under `dir`, in file-name order.
    pub fn from_directory(&self, dir: &Path) -> Result<IngestReport, IngestError> {
        if !dir.is_dir() {
            return Err(IngestError::InvalidPath {
                path: dir.display().to_string(),
            });
        }

        let mut report = IngestReport::default();
        for entry in WalkDir::new(dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if !path.is_file() || !Self::is_supported(path) {
                continue;
            }

            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    report.reject(name, RejectReason::Unreadable(e.to_string()));
                    continue;
                }
            };
            if size > self.limits.max_file_bytes {
                report.reject(
                    name,
                    RejectReason::TooLarge {
                        size,
                        limit: self.limits.max_file_bytes,
                    },
                );
                continue;
            }

            match fs::read(path) {
                Ok(bytes) => report
                    .accepted
                    .push(Upload::new(name, bytes).with_native_location(path.to_path_buf())),
                Err(e) => report.reject(name, RejectReason::Unreadable(e.to_string())),
            }
        }

        Ok(report)
    }

    /// Inflate image entries of a zip archive. Entries carry no native
    /// location: they only exist in memory.
    pub fn from_archive(&self, archive_path: &Path) -> Result<IngestReport, IngestError> {
        let size = fs::metadata(archive_path)?.len();
        if size > self.limits.max_archive_bytes {
            return Err(IngestError::ArchiveTooLarge {
                size,
                limit: self.limits.max_archive_bytes,
            });
        }

        let file = fs::File::open(archive_path)?;
        let mut archive = zip::ZipArchive::new(file)?;
        let mut report = IngestReport::default();

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                continue;
            }

            let Some(entry_path) = entry.enclosed_name() else {
                continue;
            };
            let name = entry_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            // macOS resource forks and hidden files are noise.
            if name.is_empty() || name.starts_with('.') {
                continue;
            }
            if !Self::is_supported(&entry_path) {
                report.reject(name, RejectReason::UnsupportedType);
                continue;
            }
            if entry.size() > self.limits.max_file_bytes {
                report.reject(
                    name,
                    RejectReason::TooLarge {
                        size: entry.size(),
                        limit: self.limits.max_file_bytes,
                    },
                );
                continue;
            }

            let mut bytes = Vec::with_capacity(entry.size() as usize);
            match entry.read_to_end(&mut bytes) {
                Ok(_) => report.accepted.push(Upload::new(name, bytes)),
                Err(e) => report.reject(name, RejectReason::Unreadable(e.to_string())),
            }
        }

        Ok(report)
    }

    /// Reject a single batch that is over the size limit.
    pub fn check_batch(&self, uploads: &[Upload]) -> Result<(), IngestError> {
        if uploads.len() > self.limits.max_batch_files {
            return Err(IngestError::TooManyFiles {
                count: uploads.len(),
                limit: self.limits.max_batch_files,
            });
        }
        Ok(())
    }

    /// Split a large selection into batches that each respect the limit.
    pub fn into_batches(&self, uploads: Vec<Upload>) -> Vec<Vec<Upload>> {
        let size = self.limits.max_batch_files.max(1);
        let mut batches = Vec::new();
        let mut current = Vec::with_capacity(size.min(uploads.len()));

        for upload in uploads {
            current.push(upload);
            if current.len() == size {
                batches.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }
}
