use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Stable gene identifier as found in the annotation (e.g. `ENSG...`).
pub type GeneId = String;
/// Stable transcript identifier as found in the annotation.
pub type TranscriptId = String;

/// Provenance of a record: which genes and transcripts it was seen in.
///
/// Sets are ordered so that reports built from them are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub gene_ids: BTreeSet<GeneId>,
    pub transcript_ids: BTreeSet<TranscriptId>,
}

impl Source {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids(gene_id: Option<&str>, transcript_id: Option<&str>) -> Self {
        let mut s = Self::default();
        s.add(gene_id, transcript_id);
        s
    }

    /// Record a gene and/or transcript; empty strings are ignored.
    pub fn add(&mut self, gene_id: Option<&str>, transcript_id: Option<&str>) {
        if let Some(g) = gene_id.map(str::trim).filter(|g| !g.is_empty()) {
            self.gene_ids.insert(g.to_string());
        }
        if let Some(t) = transcript_id.map(str::trim).filter(|t| !t.is_empty()) {
            self.transcript_ids.insert(t.to_string());
        }
    }

    pub fn merge(&mut self, other: &Source) {
        self.gene_ids.extend(other.gene_ids.iter().cloned());
        self.transcript_ids.extend(other.transcript_ids.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.gene_ids.is_empty() && self.transcript_ids.is_empty()
    }

    /// True if both sources name at least one common gene.
    pub fn shares_gene(&self, other: &Source) -> bool {
        self.gene_ids.intersection(&other.gene_ids).next().is_some()
    }
}
