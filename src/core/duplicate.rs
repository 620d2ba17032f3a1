// Near-duplicate detection over one upload batch.
//
// Pairs are compared exhaustively (O(n²)); batches are capped at upload time,
// which keeps this cheap enough to run on every batch.

use crate::core::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Two fingerprints closer than this many bits are duplicates (≈92% similar).
pub const DUPLICATE_DISTANCE_THRESHOLD: u32 = 5;

/// Batch index → later batch indices it is similar to. Only `i < j` edges
/// are stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGraph {
    edges: BTreeMap<usize, Vec<usize>>,
}

impl DuplicateGraph {
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn matches_of(&self, index: usize) -> &[usize] {
        self.edges.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.edges
            .iter()
            .flat_map(|(&i, js)| js.iter().map(move |&j| (i, j)))
    }

    /// Indices to tag as duplicates: the later member of every matched pair.
    /// The earlier upload is the canonical copy and stays untagged unless it
    /// is itself the later member of another pair.
    pub fn duplicate_indices(&self) -> BTreeSet<usize> {
        self.edges.values().flatten().copied().collect()
    }

    fn insert(&mut self, i: usize, j: usize) {
        self.edges.entry(i).or_default().push(j);
    }
}

pub struct DuplicateDetector {
    threshold: u32,
}

impl DuplicateDetector {
    pub fn new() -> Self {
        Self {
            threshold: DUPLICATE_DISTANCE_THRESHOLD,
        }
    }

    pub fn is_duplicate(&self, a: &Fingerprint, b: &Fingerprint) -> bool {
        a.distance(b) < self.threshold
    }

    /// Build the similarity graph for a batch. `None` slots (decode failures)
    /// never match anything.
    pub fn detect(&self, fingerprints: &[Option<Fingerprint>]) -> DuplicateGraph {
        let mut graph = DuplicateGraph::default();

        for (i, a) in fingerprints.iter().enumerate() {
            let Some(a) = a else { continue };
            for (j, b) in fingerprints.iter().enumerate().skip(i + 1) {
                let Some(b) = b else { continue };
                if self.is_duplicate(a, b) {
                    graph.insert(i, j);
                }
            }
        }

        if !graph.is_empty() {
            log::debug!(
                "Found {} similar pair(s) in batch of {}",
                graph.pairs().count(),
                fingerprints.len()
            );
        }

        graph
    }
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new()
    }
}
