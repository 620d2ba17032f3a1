use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque identifier assigned when a photo enters the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PhotoId(String);

impl PhotoId {
    pub fn new() -> Self {
        Self(format!("pht_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PhotoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoStatus {
    Analyzing,
    Keep,
    Delete,
}

/// Why a photo is suggested for deletion. Several may apply at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reason {
    Blurry,
    Duplicate,
    Screenshot,
    NoPeople,
    Unknown,
}

impl Reason {
    pub fn label(&self) -> &'static str {
        match self {
            Reason::Blurry => "Blurry",
            Reason::Duplicate => "Duplicate",
            Reason::Screenshot => "Screenshot",
            Reason::NoPeople => "No People",
            Reason::Unknown => "Unknown Person",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Raw file handed over by the file picker, folder walk or archive extraction.
#[derive(Debug, Clone)]
pub struct Upload {
    pub display_name: String,
    pub bytes: Vec<u8>,
    /// Present only when the file lives in platform storage.
    pub native_location: Option<PathBuf>,
}

impl Upload {
    pub fn new(display_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            display_name: display_name.into(),
            bytes,
            native_location: None,
        }
    }

    pub fn with_native_location(mut self, location: PathBuf) -> Self {
        self.native_location = Some(location);
        self
    }
}

/// One uploaded image under review.
#[derive(Debug, Clone)]
pub struct PhotoItem {
    id: PhotoId,
    display_name: String,
    size_bytes: u64,
    source_bytes: Arc<[u8]>,
    native_location: Option<PathBuf>,
    pub(crate) status: PhotoStatus,
    pub(crate) reasons: BTreeSet<Reason>,
}

impl PhotoItem {
    pub(crate) fn from_upload(upload: Upload) -> Self {
        Self {
            id: PhotoId::new(),
            display_name: upload.display_name,
            size_bytes: upload.bytes.len() as u64,
            source_bytes: Arc::from(upload.bytes),
            native_location: upload.native_location,
            status: PhotoStatus::Analyzing,
            reasons: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &PhotoId {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn source_bytes(&self) -> &[u8] {
        &self.source_bytes
    }

    pub(crate) fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.source_bytes)
    }

    pub fn native_location(&self) -> Option<&PathBuf> {
        self.native_location.as_ref()
    }

    pub fn status(&self) -> PhotoStatus {
        self.status
    }

    pub fn reasons(&self) -> &BTreeSet<Reason> {
        &self.reasons
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / 1024.0 / 1024.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_starts_analyzing() {
        let item = PhotoItem::from_upload(Upload::new("a.jpg", vec![1, 2, 3]));
        assert_eq!(item.status(), PhotoStatus::Analyzing);
        assert!(item.reasons().is_empty());
        assert_eq!(item.size_bytes(), 3);
        assert!(item.id().as_str().starts_with("pht_"));
        assert!(item.native_location().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = PhotoId::new();
        let b = PhotoId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_reason_serializes_lowercase() {
        let json = serde_json::to_string(&Reason::NoPeople).unwrap();
        assert_eq!(json, "\"nopeople\"");
    }
}
