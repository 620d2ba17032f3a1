//! Photo cleanup pipeline: perceptual duplicate detection, multi-provider
//! vision analysis and a reviewable catalog of keep/delete suggestions.

pub mod config;
pub mod core;
pub mod history;
pub mod orchestrator;
pub mod server;
pub mod settings;
pub mod vision;

pub use crate::config::AppConfig;
pub use crate::core::catalog::{CatalogEvent, PhotoCatalog};
pub use crate::core::photo::{PhotoId, PhotoItem, PhotoStatus, Reason, Upload};
pub use crate::orchestrator::{AnalysisOrchestrator, AnalysisProgress, AnalysisPhase};
pub use crate::settings::{ProviderCredentials, ScanPreferences};
pub use crate::vision::{AnalysisResult, VisionClient};
