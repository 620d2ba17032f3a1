// Batch analysis: register placeholders, fingerprint, fan out staggered
// provider calls, merge verdicts, commit once.

use crate::config::AppConfig;
use crate::core::catalog::{ItemVerdict, PhotoCatalog};
use crate::core::duplicate::{DuplicateDetector, DuplicateGraph};
use crate::core::fingerprint::DecodeError;
use crate::core::payload::{ImageService, PreparedImage};
use crate::core::photo::{PhotoId, Reason, Upload};
use crate::settings::{ProviderCredentials, ScanPreferences};
use crate::vision::{AnalysisError, PhotoAnalysis, VisionClient};
use futures::future::join_all;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisProgress {
    pub items_done: usize,
    pub total_items: usize,
    pub current_item: String,
    pub phase: AnalysisPhase,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AnalysisPhase {
    Fingerprinting,
    Analyzing,
    Merging,
    Complete,
}

pub struct AnalysisOrchestrator {
    client: VisionClient,
    images: ImageService,
    detector: DuplicateDetector,
    stagger_interval: Duration,
    progress_sender: Option<mpsc::UnboundedSender<AnalysisProgress>>,
}

struct PendingEntry {
    id: PhotoId,
    display_name: String,
    bytes: Arc<[u8]>,
}

/// A registered batch whose items are still `Analyzing`. Holds its own
/// handles to the image bytes, so the catalog stays free for user actions
/// while the batch is analyzed.
pub struct PendingBatch {
    entries: Vec<PendingEntry>,
}

impl AnalysisOrchestrator {
    pub fn new(config: &AppConfig, client: VisionClient) -> Self {
        Self {
            client,
            images: ImageService::new(&config.image),
            detector: DuplicateDetector::new(),
            stagger_interval: Duration::from_millis(config.analysis.stagger_interval_ms),
            progress_sender: None,
        }
    }

    pub fn with_progress_sender(mut self, sender: mpsc::UnboundedSender<AnalysisProgress>) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    pub fn register_batch(&self, catalog: &mut PhotoCatalog, uploads: Vec<Upload>) -> PendingBatch {
        let ids = catalog.register(uploads);
        let entries = ids
            .into_iter()
            .filter_map(|id| {
                let item = catalog.get(&id)?;
                Some(PendingEntry {
                    display_name: item.display_name().to_string(),
                    bytes: item.shared_bytes(),
                    id,
                })
            })
            .collect();
        PendingBatch { entries }
    }

    /// Register, analyze and commit one upload batch.
    pub async fn process_batch(
        &self,
        catalog: &mut PhotoCatalog,
        uploads: Vec<Upload>,
        preferences: &ScanPreferences,
        credentials: &ProviderCredentials,
    ) -> Vec<PhotoId> {
        let pending = self.register_batch(catalog, uploads);
        let verdicts = pending.analyze(self, preferences, credentials).await;
        catalog.commit(verdicts)
    }

    fn send_progress(&self, progress: AnalysisProgress) {
        if let Some(sender) = &self.progress_sender {
            let _ = sender.send(progress);
        }
    }
}

impl PendingBatch {
    pub fn ids(&self) -> Vec<PhotoId> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run the whole pipeline for this batch. Individual failures degrade
    /// the affected item; there is always one verdict per item, in upload
    /// order.
    pub async fn analyze(
        self,
        orchestrator: &AnalysisOrchestrator,
        preferences: &ScanPreferences,
        credentials: &ProviderCredentials,
    ) -> Vec<ItemVerdict> {
        let total = self.entries.len();

        orchestrator.send_progress(AnalysisProgress {
            items_done: 0,
            total_items: total,
            current_item: "Computing fingerprints...".to_string(),
            phase: AnalysisPhase::Fingerprinting,
        });

        let prepared: Vec<Result<PreparedImage, DecodeError>> = self
            .entries
            .par_iter()
            .map(|entry| orchestrator.images.prepare(&entry.bytes))
            .collect();

        for (entry, result) in self.entries.iter().zip(&prepared) {
            if let Err(e) = result {
                log::warn!("Could not decode {}: {}", entry.display_name, e);
            }
        }

        let fingerprints: Vec<_> = prepared
            .iter()
            .map(|p| p.as_ref().ok().map(|p| p.fingerprint))
            .collect();
        let graph = orchestrator.detector.detect(&fingerprints);

        orchestrator.send_progress(AnalysisProgress {
            items_done: 0,
            total_items: total,
            current_item: "Analyzing photos...".to_string(),
            phase: AnalysisPhase::Analyzing,
        });

        let done = AtomicUsize::new(0);
        let calls = self
            .entries
            .iter()
            .zip(&prepared)
            .enumerate()
            .map(|(index, (entry, image))| {
                let done = &done;
                async move {
                    let delay = orchestrator.stagger_interval * index as u32;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }

                    let analysis = orchestrator
                        .client
                        .analyze(
                            &entry.display_name,
                            image.as_ref().map(|p| &p.payload),
                            credentials,
                        )
                        .await;

                    let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                    orchestrator.send_progress(AnalysisProgress {
                        items_done: finished,
                        total_items: total,
                        current_item: entry.display_name.clone(),
                        phase: AnalysisPhase::Analyzing,
                    });
                    analysis
                }
            });
        let analyses = join_all(calls).await;

        orchestrator.send_progress(AnalysisProgress {
            items_done: total,
            total_items: total,
            current_item: "Merging results...".to_string(),
            phase: AnalysisPhase::Merging,
        });

        let verdicts = merge_batch(self.entries, &analyses, &graph, preferences);

        let suggested = verdicts.iter().filter(|v| !v.reasons.is_empty()).count();
        let degraded = analyses.iter().filter(|a| a.is_degraded()).count();
        log::info!(
            "Analyzed {} photo(s): {} suggested for deletion, {} degraded",
            total,
            suggested,
            degraded
        );

        orchestrator.send_progress(AnalysisProgress {
            items_done: total,
            total_items: total,
            current_item: "Analysis complete".to_string(),
            phase: AnalysisPhase::Complete,
        });

        verdicts
    }
}

fn merge_batch(
    entries: Vec<PendingEntry>,
    analyses: &[PhotoAnalysis],
    graph: &DuplicateGraph,
    preferences: &ScanPreferences,
) -> Vec<ItemVerdict> {
    let duplicates = graph.duplicate_indices();
    entries
        .into_iter()
        .zip(analyses)
        .enumerate()
        .map(|(index, (entry, analysis))| ItemVerdict {
            id: entry.id,
            reasons: merge_reasons(analysis, duplicates.contains(&index), preferences),
        })
        .collect()
}

/// Union of every reason that applies to one item. The filename screenshot
/// check is not gated by `scan_screenshots`.
///
/// A failed provider call (transport, 429, error status) leaves the item with
/// no reasons at all. An undecodable image only gets the filename check.
pub fn merge_reasons(
    analysis: &PhotoAnalysis,
    is_duplicate: bool,
    preferences: &ScanPreferences,
) -> BTreeSet<Reason> {
    let mut reasons = BTreeSet::new();
    match &analysis.failure {
        None => {}
        Some(AnalysisError::Decode(_)) => {
            if analysis.filename_screenshot {
                reasons.insert(Reason::Screenshot);
            }
            return reasons;
        }
        Some(_) => return reasons,
    }
    let ai = &analysis.result;

    if is_duplicate && preferences.scan_duplicates {
        reasons.insert(Reason::Duplicate);
    }
    if analysis.filename_screenshot || (preferences.scan_screenshots && ai.is_screenshot) {
        reasons.insert(Reason::Screenshot);
    }
    if preferences.scan_blurry && ai.is_blurry {
        reasons.insert(Reason::Blurry);
    }
    if preferences.scan_no_people && !ai.has_people {
        reasons.insert(Reason::NoPeople);
    }

    reasons
}
